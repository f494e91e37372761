//! A Tokio-based engine that runs identified units of work with a bounded
//! concurrency ceiling and collects each unit's outcome by identifier.

mod channel;
mod engine;
mod error;
mod limiter;
mod outcome;
mod store;
mod worker;

pub use engine::{Engine, EngineConfig, DEFAULT_CONCURRENCY};
pub use error::EngineError;
pub use limiter::{ExecutionStrategy, Synchronous, TokioPool};
pub use outcome::{Failure, FailureKind, Outcome, SharedError};
pub use worker::Job;
