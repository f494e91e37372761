use outcome_pool::{Engine, Outcome};
use std::convert::Infallible;
use std::time::Duration;
use tracing::info;

#[derive(Debug, thiserror::Error)]
#[error("unit {0} refused to run")]
struct Refused(u32);

async fn long_unit(id: u32) -> Result<String, Refused> {
  info!("Unit {} starting (should take 1s)", id);
  tokio::time::sleep(Duration::from_secs(1)).await;
  if id == 3 {
    return Err(Refused(id));
  }
  Ok(format!("Unit {} finished", id))
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  info!("--- Concurrency Limit Demo (Limit: 2) ---");

  let concurrency_limit = 2;
  let mut engine = Engine::<u32, String>::new(concurrency_limit);
  let num_units = 5;

  info!(
    "Spawning {} units, each takes 1 sec. With concurrency {}, this should take ~{} secs.",
    num_units,
    concurrency_limit,
    (num_units as f32 / concurrency_limit as f32).ceil()
  );

  for i in 0..num_units {
    if let Err(e) = engine.spawn(i, long_unit(i)).await {
      tracing::error!("Failed to spawn unit {}: {:?}", i, e);
    }
  }
  engine
    .spawn(num_units, async { Ok::<_, Infallible>("instant".to_string()) })
    .await
    .expect("Spawn failed");

  engine.join().await.expect("Join failed");

  let mut idents: Vec<_> = engine.get_results().keys().copied().collect();
  idents.sort_unstable();
  for ident in idents {
    match &engine.get_results()[&ident] {
      Outcome::Success(value) => info!("Unit {}: {}", ident, value),
      Outcome::Failure(failure) => info!("Unit {}: failed with {}", ident, failure),
    }
  }

  let failed = engine.get_results().values().filter(|o| o.is_failure()).count();
  info!("{} of {} units failed.", failed, engine.get_results().len());
  info!("--- Concurrency Limit Demo End ---");
}
