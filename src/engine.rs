use crate::channel::{result_channel, ResultSender};
use crate::error::EngineError;
use crate::limiter::{ExecutionStrategy, Synchronous, TokioPool};
use crate::outcome::Outcome;
use crate::store::ResultStore;
use crate::worker::{next_unit_id, wrap_unit};

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use tokio::runtime::Handle as TokioHandle;
use tracing::{debug, info, trace, warn};

/// Default concurrency ceiling for a new engine.
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Construction parameters for an [`Engine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
  /// Name used in log records.
  pub name: String,
  /// Maximum number of units running at once. `0` selects synchronous mode.
  pub concurrency: usize,
  /// Runtime to run units on. Defaults to the runtime the engine is built in.
  pub tokio_handle: Option<TokioHandle>,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      name: "outcome_pool".to_string(),
      concurrency: DEFAULT_CONCURRENCY,
      tokio_handle: None,
    }
  }
}

impl EngineConfig {
  pub fn with_name(mut self, name: &str) -> Self {
    self.name = name.to_string();
    self
  }

  pub fn with_concurrency(mut self, concurrency: usize) -> Self {
    self.concurrency = concurrency;
    self
  }

  pub fn with_handle(mut self, tokio_handle: TokioHandle) -> Self {
    self.tokio_handle = Some(tokio_handle);
    self
  }
}

/// Runs identified units of work with bounded concurrency and collects their
/// outcomes by identifier.
///
/// `spawn` hands a unit to the execution strategy and returns without waiting
/// for it (unless the engine is synchronous). Each unit's outcome is published
/// when it finishes and shows up in [`Engine::get_results`] on the next drain.
/// [`Engine::join`] waits for every unit spawned so far.
///
/// Identifiers are not checked for uniqueness. If two units share one, the
/// outcome drained last is the one kept.
pub struct Engine<K, T> {
  pool_name: Arc<String>,
  strategy: Arc<dyn ExecutionStrategy>,
  sender: ResultSender<K, T>,
  store: ResultStore<K, T>,
}

impl<K, T> fmt::Debug for Engine<K, T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Engine")
      .field("pool_name", &self.pool_name)
      .field("strategy", &self.strategy)
      .finish_non_exhaustive()
  }
}

impl<K, T> Engine<K, T>
where
  K: Eq + Hash + Send + 'static,
  T: Send + 'static,
{
  /// Creates an engine with the given concurrency ceiling.
  ///
  /// With `concurrency == 0`, or when called outside a Tokio runtime, every
  /// unit runs synchronously inside `spawn`.
  pub fn new(concurrency: usize) -> Self {
    Self::with_config(EngineConfig::default().with_concurrency(concurrency))
  }

  pub fn with_config(config: EngineConfig) -> Self {
    let strategy: Arc<dyn ExecutionStrategy> = if config.concurrency == 0 {
      debug!(pool_name = %config.name, "Concurrency disabled. Running units synchronously.");
      Arc::new(Synchronous)
    } else {
      match config.tokio_handle {
        Some(handle) => Arc::new(TokioPool::new(config.concurrency, handle, &config.name)),
        None => match TokioPool::current(config.concurrency, &config.name) {
          Ok(pool) => Arc::new(pool),
          Err(e) => {
            debug!(pool_name = %config.name, "No pooled runtime ({}). Running units synchronously.", e);
            Arc::new(Synchronous)
          }
        },
      }
    };
    Self::with_strategy(&config.name, strategy)
  }

  /// Creates an engine that executes units through `strategy`.
  pub fn with_strategy(pool_name: &str, strategy: Arc<dyn ExecutionStrategy>) -> Self {
    let pool_name = Arc::new(pool_name.to_string());
    let (sender, receiver) = result_channel(pool_name.clone());
    info!(
      pool_name = %*pool_name,
      concurrency = strategy.concurrency(),
      synchronous = strategy.is_synchronous(),
      "Engine created."
    );
    Self {
      pool_name,
      strategy,
      sender,
      store: ResultStore::new(receiver),
    }
  }

  pub fn name(&self) -> &str {
    &self.pool_name
  }

  /// Effective ceiling on simultaneously running units.
  pub fn concurrency(&self) -> usize {
    self.strategy.concurrency()
  }

  /// `true` when units run inside `spawn` on the caller.
  pub fn is_synchronous(&self) -> bool {
    self.strategy.is_synchronous()
  }

  /// Number of units currently occupying an execution slot.
  pub fn in_flight(&self) -> usize {
    self.strategy.in_flight()
  }

  /// Outcomes published but not yet moved into the result store.
  pub fn undrained(&self) -> usize {
    self.store.pending()
  }

  /// Schedules `work` under `ident`.
  ///
  /// Whatever `work` resolves to, or if it panics, exactly one outcome for
  /// `ident` is published. Failures of `work` are never returned here; only a
  /// failure of the execution runtime itself is.
  pub async fn spawn<E, Fut>(&self, ident: K, work: Fut) -> Result<(), EngineError>
  where
    E: StdError + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
  {
    let unit_id = next_unit_id();
    debug!(pool_name = %*self.pool_name, %unit_id, "Spawning unit.");
    trace!(pool_name = %*self.pool_name, %unit_id, "Unit queued.");

    let job = wrap_unit(self.pool_name.clone(), unit_id, ident, work, self.sender.clone());
    self.strategy.run(unit_id, job).await?;
    self.strategy.yield_now().await;
    Ok(())
  }

  /// Drains every outcome published so far into the result store and returns
  /// the store. Never waits for running units.
  pub fn get_results(&mut self) -> &HashMap<K, Outcome<T>> {
    self.store.drain();
    self.store.results()
  }

  /// Waits until every unit spawned before this call has finished.
  ///
  /// Outcomes stay in the result channel until the next `get_results`.
  pub async fn join(&self) -> Result<(), EngineError> {
    self.strategy.wait_all().await
  }
}

impl<K, T> Drop for Engine<K, T> {
  fn drop(&mut self) {
    let in_flight = self.strategy.in_flight();
    if in_flight > 0 {
      warn!(
        pool_name = %*self.pool_name,
        in_flight,
        "Engine dropped with units still running. Their outcomes will be discarded."
      );
    } else {
      trace!(
        pool_name = %*self.pool_name,
        undrained = self.store.pending(),
        "Engine dropped."
      );
    }
  }
}
