use crate::channel::ResultReceiver;
use crate::outcome::Outcome;

use std::collections::HashMap;
use std::hash::Hash;

use tracing::trace;

/// Outcomes collected so far, keyed by the identifier given at spawn time.
///
/// Only the owner of the store mutates it, by draining the result channel.
/// Entries are never removed; a later outcome for the same identifier
/// replaces the earlier one.
#[derive(Debug)]
pub(crate) struct ResultStore<K, T> {
  receiver: ResultReceiver<K, T>,
  results: HashMap<K, Outcome<T>>,
}

impl<K: Eq + Hash, T> ResultStore<K, T> {
  pub(crate) fn new(receiver: ResultReceiver<K, T>) -> Self {
    Self {
      receiver,
      results: HashMap::new(),
    }
  }

  /// Moves every completion currently waiting in the channel into the store.
  pub(crate) fn drain(&mut self) -> usize {
    let moved = self.receiver.drain_into(&mut self.results);
    if moved > 0 {
      trace!(moved, stored = self.results.len(), "Drained result channel.");
    }
    moved
  }

  pub(crate) fn results(&self) -> &HashMap<K, Outcome<T>> {
    &self.results
  }
}

impl<K, T> ResultStore<K, T> {
  /// Completions published but not drained yet.
  pub(crate) fn pending(&self) -> usize {
    self.receiver.pending()
  }
}
