use crate::outcome::Outcome;

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tracing::{trace, warn};

/// A completed unit of work travelling from a worker to the result store.
pub(crate) struct Completion<K, T> {
  pub(crate) unit_id: u64,
  pub(crate) ident: K,
  pub(crate) outcome: Outcome<T>,
}

/// Creates a connected pair of result channel halves.
///
/// The channel is unbounded: publishing never waits, so a finished unit can
/// always hand over its outcome before it releases its execution slot.
pub(crate) fn result_channel<K, T>(pool_name: Arc<String>) -> (ResultSender<K, T>, ResultReceiver<K, T>) {
  let (tx, rx) = mpsc::unbounded_channel();
  (
    ResultSender {
      tx,
      pool_name: pool_name.clone(),
    },
    ResultReceiver { rx, pool_name },
  )
}

/// The producer half. Cloned once per spawned unit of work.
pub(crate) struct ResultSender<K, T> {
  tx: UnboundedSender<Completion<K, T>>,
  pool_name: Arc<String>,
}

// Manual impl: a derive would require `K: Clone` and `T: Clone`.
impl<K, T> Clone for ResultSender<K, T> {
  fn clone(&self) -> Self {
    Self {
      tx: self.tx.clone(),
      pool_name: self.pool_name.clone(),
    }
  }
}

impl<K, T> fmt::Debug for ResultSender<K, T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ResultSender")
      .field("pool_name", &self.pool_name)
      .field("is_closed", &self.tx.is_closed())
      .finish_non_exhaustive()
  }
}

impl<K, T> ResultSender<K, T> {
  /// Publishes one outcome. Never blocks and never fails: if the receiving
  /// engine is gone the outcome is dropped and the loss is logged.
  pub(crate) fn publish(&self, unit_id: u64, ident: K, outcome: Outcome<T>) {
    let completion = Completion {
      unit_id,
      ident,
      outcome,
    };
    if self.tx.send(completion).is_err() {
      warn!(
        pool_name = %*self.pool_name,
        %unit_id,
        "Result receiver was dropped. Outcome of unit has been discarded."
      );
    } else {
      trace!(pool_name = %*self.pool_name, %unit_id, "Outcome published to result channel.");
    }
  }
}

/// The single consumer half, owned by the result store.
pub(crate) struct ResultReceiver<K, T> {
  rx: UnboundedReceiver<Completion<K, T>>,
  pool_name: Arc<String>,
}

impl<K, T> fmt::Debug for ResultReceiver<K, T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ResultReceiver")
      .field("pool_name", &self.pool_name)
      .field("pending", &self.rx.len())
      .finish_non_exhaustive()
  }
}

impl<K, T> ResultReceiver<K, T> {
  /// Takes one completion if one is available, without waiting.
  pub(crate) fn try_recv(&mut self) -> Option<Completion<K, T>> {
    match self.rx.try_recv() {
      Ok(completion) => Some(completion),
      Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
    }
  }

  /// Number of completions published but not yet taken.
  pub(crate) fn pending(&self) -> usize {
    self.rx.len()
  }
}

impl<K: Eq + Hash, T> ResultReceiver<K, T> {
  /// Moves everything currently in the channel into `store`, stopping as soon
  /// as the channel is empty. Later entries for the same identifier overwrite
  /// earlier ones. Returns the number of completions moved.
  pub(crate) fn drain_into(&mut self, store: &mut HashMap<K, Outcome<T>>) -> usize {
    let mut moved = 0;
    while let Some(completion) = self.try_recv() {
      trace!(
        pool_name = %*self.pool_name,
        unit_id = completion.unit_id,
        success = completion.outcome.is_success(),
        "Draining completion into result store."
      );
      store.insert(completion.ident, completion.outcome);
      moved += 1;
    }
    moved
  }
}
