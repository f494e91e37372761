use std::any::{self, Any};
use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use tokio::time::error::Elapsed;

/// The error type preserved inside a [`Failure`] so callers can downcast it.
pub type SharedError = Arc<dyn StdError + Send + Sync + 'static>;

/// Classification of a captured failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
  /// The unit of work returned `Err(e)`; `type_name` names the type of `e`.
  Error { type_name: &'static str },
  /// The unit of work gave up on a cooperative deadline (`tokio::time::timeout`).
  Timeout,
  /// The unit of work panicked.
  Panic,
}

impl fmt::Display for FailureKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      FailureKind::Error { type_name } => f.write_str(type_name),
      FailureKind::Timeout => f.write_str("timeout"),
      FailureKind::Panic => f.write_str("panic"),
    }
  }
}

/// Renders a backtrace of the catching frame when backtraces are enabled
/// (`RUST_BACKTRACE` / `RUST_LIB_BACKTRACE`).
fn captured_backtrace() -> Option<String> {
  let backtrace = Backtrace::capture();
  match backtrace.status() {
    BacktraceStatus::Captured => Some(backtrace.to_string()),
    _ => None,
  }
}

/// Failure information captured by the worker wrapper for one unit of work.
#[derive(Clone)]
pub struct Failure {
  kind: FailureKind,
  message: String,
  trace: Option<String>,
  source: Option<SharedError>,
}

impl Failure {
  /// Captures an error returned by a unit of work.
  pub(crate) fn from_error<E>(error: E) -> Self
  where
    E: StdError + Send + Sync + 'static,
  {
    let kind = if (&error as &dyn Any).is::<Elapsed>() {
      FailureKind::Timeout
    } else {
      FailureKind::Error {
        type_name: any::type_name::<E>(),
      }
    };

    let mut causes = Vec::new();
    let mut next = error.source();
    while let Some(cause) = next {
      causes.push(cause.to_string());
      next = cause.source();
    }

    Self {
      kind,
      message: error.to_string(),
      trace: if causes.is_empty() { None } else { Some(causes.join("\n")) },
      source: Some(Arc::new(error)),
    }
  }

  /// Captures the payload of a panic caught while running a unit of work.
  pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
    let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
      (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
      s.clone()
    } else {
      "unit of work panicked with a non-string payload".to_string()
    };

    Self {
      kind: FailureKind::Panic,
      message,
      trace: captured_backtrace(),
      source: None,
    }
  }

  pub fn kind(&self) -> FailureKind {
    self.kind
  }

  pub fn message(&self) -> &str {
    &self.message
  }

  /// The rendered cause chain of the original error, one cause per line. For
  /// panics, the backtrace of the catching frame when backtraces are enabled.
  pub fn trace(&self) -> Option<&str> {
    self.trace.as_deref()
  }

  /// The original error, if the failure was an `Err` rather than a panic.
  pub fn error(&self) -> Option<&SharedError> {
    self.source.as_ref()
  }

  /// Downcasts the original error to a concrete type.
  pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
    self.source.as_deref().and_then(|e| e.downcast_ref::<E>())
  }

  pub fn is_panic(&self) -> bool {
    self.kind == FailureKind::Panic
  }

  pub fn is_timeout(&self) -> bool {
    self.kind == FailureKind::Timeout
  }
}

impl fmt::Debug for Failure {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Failure")
      .field("kind", &self.kind)
      .field("message", &self.message)
      .field("trace", &self.trace)
      .finish_non_exhaustive()
  }
}

impl fmt::Display for Failure {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}: {}", self.kind, self.message)
  }
}

impl StdError for Failure {
  fn source(&self) -> Option<&(dyn StdError + 'static)> {
    self
      .source
      .as_deref()
      .map(|e| e as &(dyn StdError + 'static))
  }
}

impl PartialEq for Failure {
  fn eq(&self, other: &Self) -> bool {
    self.kind == other.kind && self.message == other.message && self.trace == other.trace
  }
}

/// The captured result of one unit of work.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
  Success(T),
  Failure(Failure),
}

impl<T> Outcome<T> {
  pub fn is_success(&self) -> bool {
    matches!(self, Outcome::Success(_))
  }

  pub fn is_failure(&self) -> bool {
    matches!(self, Outcome::Failure(_))
  }

  pub fn success(&self) -> Option<&T> {
    match self {
      Outcome::Success(value) => Some(value),
      Outcome::Failure(_) => None,
    }
  }

  pub fn failure(&self) -> Option<&Failure> {
    match self {
      Outcome::Success(_) => None,
      Outcome::Failure(failure) => Some(failure),
    }
  }

  /// Converts into a `Result`, handing the failure back as an error value.
  pub fn into_result(self) -> Result<T, Failure> {
    match self {
      Outcome::Success(value) => Ok(value),
      Outcome::Failure(failure) => Err(failure),
    }
  }
}
