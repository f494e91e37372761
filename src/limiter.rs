use crate::error::EngineError;
use crate::worker::Job;

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use futures::future::{self, BoxFuture};
use futures::FutureExt;
use tokio::runtime::Handle as TokioHandle;
use tokio::sync::Semaphore;
use tracing::{debug, trace};

/// Where and how wrapped units of work get executed.
///
/// An `Engine` hands every job to exactly one strategy, chosen at
/// construction. Implementations must run each job exactly once and must not
/// consider a job finished until the job future itself has returned, since
/// that is the point where its outcome has been published.
pub trait ExecutionStrategy: Send + Sync + fmt::Debug {
  /// Schedules `job`. May wait for a free slot before returning.
  fn run(&self, unit_id: u64, job: Job) -> BoxFuture<'_, Result<(), EngineError>>;

  /// Resolves once every job handed to `run` before this call has finished.
  fn wait_all(&self) -> BoxFuture<'_, Result<(), EngineError>>;

  /// Gives freshly scheduled jobs a chance to start.
  fn yield_now(&self) -> BoxFuture<'_, ()>;

  /// Maximum number of jobs running at the same time.
  fn concurrency(&self) -> usize;

  /// Number of jobs currently holding a slot.
  fn in_flight(&self) -> usize;

  /// `true` when `run` executes jobs inline on the caller.
  fn is_synchronous(&self) -> bool {
    false
  }
}

/// Runs every job to completion inside `run`, on the caller's task.
///
/// This is the degraded mode used when concurrency is disabled or no Tokio
/// runtime is available: `wait_all` and `yield_now` have nothing to do.
#[derive(Debug, Default, Clone, Copy)]
pub struct Synchronous;

impl ExecutionStrategy for Synchronous {
  fn run(&self, unit_id: u64, job: Job) -> BoxFuture<'_, Result<(), EngineError>> {
    async move {
      trace!(%unit_id, "Running unit synchronously on the caller.");
      job.await;
      Ok(())
    }
    .boxed()
  }

  fn wait_all(&self) -> BoxFuture<'_, Result<(), EngineError>> {
    future::ready(Ok(())).boxed()
  }

  fn yield_now(&self) -> BoxFuture<'_, ()> {
    future::ready(()).boxed()
  }

  fn concurrency(&self) -> usize {
    1
  }

  fn in_flight(&self) -> usize {
    0
  }

  fn is_synchronous(&self) -> bool {
    true
  }
}

/// Runs jobs as Tokio tasks, at most `concurrency` at a time.
///
/// Each slot is a semaphore permit. `run` waits for a permit, then spawns the
/// job holding it; the permit is released only after the job returns.
pub struct TokioPool {
  pool_name: Arc<String>,
  concurrency: usize,
  semaphore: Arc<Semaphore>,
  tokio_handle: TokioHandle,
  active_units: Arc<DashMap<u64, Instant>>,
}

impl fmt::Debug for TokioPool {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TokioPool")
      .field("pool_name", &self.pool_name)
      .field("concurrency", &self.concurrency)
      .field("available_slots", &self.semaphore.available_permits())
      .field("in_flight", &self.active_units.len())
      .finish_non_exhaustive()
  }
}

impl TokioPool {
  /// Largest slot count; `wait_all` claims every slot in a single `u32` request.
  pub const MAX_CONCURRENCY: usize = u32::MAX as usize;

  pub fn new(concurrency: usize, tokio_handle: TokioHandle, pool_name: &str) -> Self {
    let concurrency = concurrency.clamp(1, Self::MAX_CONCURRENCY.min(Semaphore::MAX_PERMITS));
    Self {
      pool_name: Arc::new(pool_name.to_string()),
      concurrency,
      semaphore: Arc::new(Semaphore::new(concurrency)),
      tokio_handle,
      active_units: Arc::new(DashMap::new()),
    }
  }

  /// Builds a pool on the runtime the caller is currently running in.
  pub fn current(concurrency: usize, pool_name: &str) -> Result<Self, EngineError> {
    let handle = TokioHandle::try_current().map_err(|e| EngineError::RuntimeUnavailable(e.to_string()))?;
    Ok(Self::new(concurrency, handle, pool_name))
  }

  pub fn available_slots(&self) -> usize {
    self.semaphore.available_permits()
  }
}

impl ExecutionStrategy for TokioPool {
  fn run(&self, unit_id: u64, job: Job) -> BoxFuture<'_, Result<(), EngineError>> {
    async move {
      let permit = self
        .semaphore
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| EngineError::SemaphoreClosed)?;
      trace!(
        pool_name = %*self.pool_name,
        %unit_id,
        "Acquired slot. Available: {}",
        self.semaphore.available_permits()
      );

      self.active_units.insert(unit_id, Instant::now());
      let active_units = self.active_units.clone();
      let pool_name = self.pool_name.clone();

      self.tokio_handle.spawn(async move {
        let _slot = permit;
        job.await;
        if let Some((_, started)) = active_units.remove(&unit_id) {
          debug!(
            pool_name = %*pool_name,
            %unit_id,
            elapsed = ?started.elapsed(),
            "Unit finished, releasing slot."
          );
        }
      });
      Ok(())
    }
    .boxed()
  }

  fn wait_all(&self) -> BoxFuture<'_, Result<(), EngineError>> {
    async move {
      debug!(
        pool_name = %*self.pool_name,
        in_flight = self.active_units.len(),
        "Waiting for all slots to become idle."
      );
      // The semaphore is fair, so this queues behind every earlier `run` and
      // ahead of every later one.
      let all_slots = self
        .semaphore
        .acquire_many(self.concurrency as u32)
        .await
        .map_err(|_| EngineError::SemaphoreClosed)?;
      drop(all_slots);
      debug!(pool_name = %*self.pool_name, "All slots idle.");
      Ok(())
    }
    .boxed()
  }

  fn yield_now(&self) -> BoxFuture<'_, ()> {
    tokio::task::yield_now().boxed()
  }

  fn concurrency(&self) -> usize {
    self.concurrency
  }

  fn in_flight(&self) -> usize {
    self.active_units.len()
  }
}
