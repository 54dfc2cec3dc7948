//! Transfer lifecycle engine.
//!
//! Layers follow the dependency direction `api -> app -> domain <- infra`:
//! - [`domain`]: entities, state machine, fee rules, errors and the traits
//!   infrastructure must implement
//! - [`app`]: orchestration, background workers and shared state
//! - [`infra`]: PostgreSQL, the in-process job queue, clock and randomness
//! - [`api`]: HTTP handlers, authentication and routing

pub mod api;
pub mod app;
pub mod domain;
pub mod infra;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
