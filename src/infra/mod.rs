//! Infrastructure layer implementations.

pub mod database;
pub mod queue;
pub mod runtime;

pub use database::{PostgresClient, PostgresConfig};
pub use queue::{InProcessJobQueue, WorkerConfig, spawn_workers};
pub use runtime::{SystemClock, ThreadRandom};
