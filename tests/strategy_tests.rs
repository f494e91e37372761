use futures::future::BoxFuture;
use futures::FutureExt;
use outcome_pool::{Engine, EngineConfig, EngineError, ExecutionStrategy, Job, Outcome, TokioPool};
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn setup_tracing_for_test() {
  use std::sync::Once;
  use tracing_subscriber::{fmt, EnvFilter};
  static TRACING_INIT: Once = Once::new();

  TRACING_INIT.call_once(|| {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,outcome_pool=trace"));

    fmt::Subscriber::builder()
      .with_env_filter(filter)
      .with_test_writer()
      .try_init()
      .ok();
  });
}

/// Runs jobs inline and counts how the engine drives it.
#[derive(Debug, Default)]
struct RecordingStrategy {
  runs: AtomicUsize,
  waits: AtomicUsize,
  yields: AtomicUsize,
}

impl ExecutionStrategy for RecordingStrategy {
  fn run(&self, _unit_id: u64, job: Job) -> BoxFuture<'_, Result<(), EngineError>> {
    self.runs.fetch_add(1, Ordering::SeqCst);
    async move {
      job.await;
      Ok(())
    }
    .boxed()
  }

  fn wait_all(&self) -> BoxFuture<'_, Result<(), EngineError>> {
    self.waits.fetch_add(1, Ordering::SeqCst);
    futures::future::ready(Ok(())).boxed()
  }

  fn yield_now(&self) -> BoxFuture<'_, ()> {
    self.yields.fetch_add(1, Ordering::SeqCst);
    futures::future::ready(()).boxed()
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

/// A strategy whose runtime is gone: every call fails.
#[derive(Debug)]
struct BrokenRuntime;

impl ExecutionStrategy for BrokenRuntime {
  fn run(&self, _unit_id: u64, _job: Job) -> BoxFuture<'_, Result<(), EngineError>> {
    futures::future::ready(Err(EngineError::SemaphoreClosed)).boxed()
  }

  fn wait_all(&self) -> BoxFuture<'_, Result<(), EngineError>> {
    futures::future::ready(Err(EngineError::RuntimeUnavailable("runtime shut down".to_string()))).boxed()
  }

  fn yield_now(&self) -> BoxFuture<'_, ()> {
    futures::future::ready(()).boxed()
  }

  fn concurrency(&self) -> usize {
    4
  }

  fn in_flight(&self) -> usize {
    0
  }
}

#[tokio::test]
async fn test_injected_strategy_is_driven_once_per_call() {
  setup_tracing_for_test();
  let strategy = Arc::new(RecordingStrategy::default());
  let mut engine = Engine::<u32, u32>::with_strategy("test_recording", strategy.clone());
  assert_eq!(engine.name(), "test_recording");
  assert!(engine.is_synchronous());

  for i in 0..3u32 {
    engine.spawn(i, async move { Ok::<_, Infallible>(i) }).await.unwrap();
  }
  engine.join().await.unwrap();

  assert_eq!(strategy.runs.load(Ordering::SeqCst), 3);
  assert_eq!(strategy.yields.load(Ordering::SeqCst), 3);
  assert_eq!(strategy.waits.load(Ordering::SeqCst), 1);
  assert_eq!(engine.get_results().len(), 3);
}

#[tokio::test]
async fn test_runtime_failures_reach_the_caller() {
  setup_tracing_for_test();
  let mut engine = Engine::<u32, u32>::with_strategy("test_broken", Arc::new(BrokenRuntime));

  let spawn_result = engine.spawn(1, async { Ok::<_, Infallible>(1) }).await;
  assert_eq!(spawn_result, Err(EngineError::SemaphoreClosed));
  assert!(matches!(engine.join().await, Err(EngineError::RuntimeUnavailable(_))));
  assert!(engine.get_results().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tokio_pool_strategy_through_engine() {
  setup_tracing_for_test();
  let pool = Arc::new(TokioPool::current(2, "test_pool_strategy").unwrap());
  let mut engine = Engine::<u32, u32>::with_strategy("test_pool_strategy", pool.clone());
  assert!(!engine.is_synchronous());

  for i in 0..4u32 {
    engine
      .spawn(i, async move {
        tokio::time::sleep(Duration::from_millis(15)).await;
        Ok::<_, Infallible>(i + 1)
      })
      .await
      .unwrap();
  }
  assert!(pool.available_slots() <= 2);
  engine.join().await.unwrap();

  assert_eq!(pool.available_slots(), 2);
  assert_eq!(pool.in_flight(), 0);
  let results = engine.get_results();
  for i in 0..4u32 {
    assert_eq!(results[&i], Outcome::Success(i + 1));
  }
}

#[tokio::test]
async fn test_config_builder_selects_strategy() {
  setup_tracing_for_test();
  let pooled: Engine<u32, u32> = Engine::with_config(EngineConfig::default().with_name("pooled").with_concurrency(5));
  assert_eq!(pooled.concurrency(), 5);
  assert!(!pooled.is_synchronous());

  let synchronous: Engine<u32, u32> = Engine::with_config(EngineConfig::default().with_name("sync").with_concurrency(0));
  assert!(synchronous.is_synchronous());
  assert_eq!(synchronous.in_flight(), 0);
}
