use thiserror::Error;

/// Errors raised by the execution runtime backing an `Engine`.
///
/// Failures of the units of work themselves never show up here; they are
/// captured as [`crate::Outcome::Failure`] and retrieved through
/// `Engine::get_results`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
  #[error("Limiter's slot semaphore was closed unexpectedly")]
  SemaphoreClosed,

  #[error("Execution runtime is unavailable: {0}")]
  RuntimeUnavailable(String),
}
