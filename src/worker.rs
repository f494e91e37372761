use crate::channel::ResultSender;
use crate::outcome::{Failure, Outcome};

use std::error::Error as StdError;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{info_span, trace, warn, Instrument};

lazy_static::lazy_static! {
  static ref NEXT_UNIT_ID_COUNTER: AtomicU64 = AtomicU64::new(0);
}

/// A unit of work already wrapped with outcome capture and publication.
///
/// Strategies only ever see these: the identifier, the caller's future and the
/// result channel are all bound inside.
pub type Job = BoxFuture<'static, ()>;

pub(crate) fn next_unit_id() -> u64 {
  NEXT_UNIT_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed)
}

/// Wraps a unit of work so that running the returned job executes it exactly
/// once and publishes exactly one outcome for `ident`, whatever happens.
///
/// Errors and panics raised by `work` stop here.
pub(crate) fn wrap_unit<K, T, E, Fut>(
  pool_name: Arc<String>,
  unit_id: u64,
  ident: K,
  work: Fut,
  sender: ResultSender<K, T>,
) -> Job
where
  K: Send + 'static,
  T: Send + 'static,
  E: StdError + Send + Sync + 'static,
  Fut: Future<Output = Result<T, E>> + Send + 'static,
{
  let span = info_span!("unit", pool_name = %*pool_name, %unit_id);

  async move {
    trace!(pool_name = %*pool_name, %unit_id, "Unit running.");

    // Classifying an error runs the caller's `Display`/`source` code, so it
    // stays inside the unwind guard too.
    let guarded = async move {
      match work.await {
        Ok(value) => Outcome::Success(value),
        Err(error) => Outcome::Failure(Failure::from_error(error)),
      }
    };

    let outcome = match AssertUnwindSafe(guarded).catch_unwind().await {
      Ok(Outcome::Success(value)) => {
        trace!(pool_name = %*pool_name, %unit_id, "Unit completed successfully.");
        Outcome::Success(value)
      }
      Ok(Outcome::Failure(failure)) => {
        warn!(pool_name = %*pool_name, %unit_id, kind = %failure.kind(), "Unit failed: {}", failure.message());
        Outcome::Failure(failure)
      }
      Err(panic_payload) => {
        let failure = Failure::from_panic(panic_payload);
        warn!(pool_name = %*pool_name, %unit_id, "Unit panicked: {}", failure.message());
        Outcome::Failure(failure)
      }
    };

    sender.publish(unit_id, ident, outcome);
  }
  .instrument(span)
  .boxed()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::channel::result_channel;
  use crate::outcome::FailureKind;
  use std::collections::HashMap;
  use std::convert::Infallible;

  #[derive(Debug, thiserror::Error)]
  #[error("invalid record {0}")]
  struct InvalidRecord(u32);

  fn pool_name() -> Arc<String> {
    Arc::new("test_worker".to_string())
  }

  #[tokio::test]
  async fn test_success_publishes_value() {
    let (tx, mut rx) = result_channel::<u32, u32>(pool_name());
    let job = wrap_unit(pool_name(), next_unit_id(), 1, async { Ok::<_, Infallible>(41 + 1) }, tx);
    job.await;

    let mut store = HashMap::new();
    assert_eq!(rx.drain_into(&mut store), 1);
    assert_eq!(store.get(&1), Some(&Outcome::Success(42)));
  }

  #[tokio::test]
  async fn test_error_is_captured_not_propagated() {
    let (tx, mut rx) = result_channel::<u32, u32>(pool_name());
    let job = wrap_unit(pool_name(), next_unit_id(), 7, async { Err::<u32, _>(InvalidRecord(7)) }, tx);
    job.await;

    let mut store = HashMap::new();
    rx.drain_into(&mut store);
    let failure = store.get(&7).and_then(Outcome::failure).unwrap();
    assert_eq!(
      failure.kind(),
      FailureKind::Error {
        type_name: std::any::type_name::<InvalidRecord>()
      }
    );
    assert_eq!(failure.message(), "invalid record 7");
    assert_eq!(failure.downcast_ref::<InvalidRecord>().map(|e| e.0), Some(7));
  }

  #[tokio::test]
  async fn test_panic_is_captured_not_propagated() {
    let (tx, mut rx) = result_channel::<u32, u32>(pool_name());
    let work = async {
      panic!("record store corrupted");
      #[allow(unreachable_code)]
      Ok::<u32, Infallible>(0)
    };
    wrap_unit(pool_name(), next_unit_id(), 3, work, tx).await;

    let mut store = HashMap::new();
    rx.drain_into(&mut store);
    let failure = store.get(&3).and_then(Outcome::failure).unwrap();
    assert!(failure.is_panic());
    assert_eq!(failure.message(), "record store corrupted");
  }

  #[derive(Debug)]
  struct UnprintableError;

  impl std::fmt::Display for UnprintableError {
    fn fmt(&self, _f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      panic!("cannot render error");
    }
  }

  impl StdError for UnprintableError {}

  #[tokio::test]
  async fn test_panicking_error_display_still_publishes() {
    let (tx, mut rx) = result_channel::<u32, u32>(pool_name());
    let job = wrap_unit(pool_name(), next_unit_id(), 9, async { Err::<u32, _>(UnprintableError) }, tx);
    job.await;

    let mut store = HashMap::new();
    assert_eq!(rx.drain_into(&mut store), 1);
    let failure = store.get(&9).and_then(Outcome::failure).unwrap();
    assert!(failure.is_panic());
    assert_eq!(failure.message(), "cannot render error");
  }

  #[test]
  fn test_unit_ids_are_unique() {
    let a = next_unit_id();
    let b = next_unit_id();
    assert_ne!(a, b);
  }
}
