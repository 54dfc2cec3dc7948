//! Test doubles and fixtures, available to unit tests and to integration
//! tests through the `test-utils` feature.

pub mod mocks;

pub use mocks::{
    FixedClock, InMemoryAuditLogStore, InMemoryTransferRepository, MockConfig, RecordingJobQueue,
    ScriptedRandom, UpdateStep,
};

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;

use crate::domain::{CreateTransferRequest, Recipient};

/// Fixed instant used as "now" by deterministic tests
pub fn test_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 14, 10, 0, 0)
        .single()
        .unwrap_or_default()
}

/// A valid creation request for the given whole amount
pub fn sample_request(amount: i64) -> CreateTransferRequest {
    CreateTransferRequest::new(
        Decimal::from(amount),
        "XOF",
        "mobile_money",
        Recipient::new("+221770000000", "Awa Diop"),
    )
}
