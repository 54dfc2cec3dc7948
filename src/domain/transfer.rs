//! Transfer entity and its state machine.
//!
//! Fields are private: `fees` and `total` only ever change through
//! [`Transfer::set_amount`], and `status` only through
//! [`Transfer::transition_to`].

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::error::AppError;
use super::fee::{calculate_fee, calculate_total};
use super::types::{CreateTransferRequest, Metadata, Recipient, TransferStatus};

/// Core transfer entity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(from = "TransferRecord")]
pub struct Transfer {
    id: String,
    amount: Decimal,
    currency: String,
    channel: String,
    recipient: Recipient,
    metadata: Metadata,
    status: TransferStatus,
    reference: String,
    fees: Decimal,
    total: Decimal,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    /// Optimistic-lock counter, bumped by the repository on every write
    version: i64,
}

/// Flat persisted shape of a transfer.
///
/// Converting a record into a [`Transfer`] re-derives `fees` and `total`
/// from `amount`, so a stored or deserialized snapshot can never carry an
/// inconsistent fee.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRecord {
    pub id: String,
    pub amount: Decimal,
    pub currency: String,
    pub channel: String,
    pub recipient: Recipient,
    #[serde(default)]
    pub metadata: Metadata,
    pub status: TransferStatus,
    pub reference: String,
    #[serde(default)]
    pub fees: Decimal,
    #[serde(default)]
    pub total: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub version: i64,
}

impl From<TransferRecord> for Transfer {
    fn from(record: TransferRecord) -> Self {
        Self {
            fees: calculate_fee(record.amount),
            total: calculate_total(record.amount),
            id: record.id,
            amount: record.amount,
            currency: record.currency,
            channel: record.channel,
            recipient: record.recipient,
            metadata: record.metadata,
            status: record.status,
            reference: record.reference,
            created_at: record.created_at,
            updated_at: record.updated_at,
            version: record.version,
        }
    }
}

impl Transfer {
    /// Create a new `PENDING` transfer with its fee and total computed.
    #[must_use]
    pub fn new(
        id: String,
        reference: String,
        request: &CreateTransferRequest,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            amount: request.amount,
            currency: request.currency.clone(),
            channel: request.channel.clone(),
            recipient: request.recipient.clone(),
            metadata: request.metadata.clone(),
            status: TransferStatus::Pending,
            reference,
            fees: calculate_fee(request.amount),
            total: calculate_total(request.amount),
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn recipient(&self) -> &Recipient {
        &self.recipient
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn status(&self) -> TransferStatus {
        self.status
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn fees(&self) -> Decimal {
        self.fees
    }

    pub fn total(&self) -> Decimal {
        self.total
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn can_transition_to(&self, target: TransferStatus) -> bool {
        self.status.can_transition_to(target)
    }

    /// Move to `target`, refreshing `updated_at`.
    ///
    /// Fails with [`AppError::InvalidTransition`] and leaves the entity
    /// untouched when the transition table disallows it.
    pub fn transition_to(&mut self, target: TransferStatus, at: DateTime<Utc>) -> Result<(), AppError> {
        if !self.can_transition_to(target) {
            return Err(AppError::InvalidTransition {
                from: self.status,
                to: target,
            });
        }
        self.status = target;
        self.touch(at);
        Ok(())
    }

    /// Replace the amount and recompute `fees` and `total`. Status is unchanged.
    pub fn set_amount(&mut self, amount: Decimal, at: DateTime<Utc>) {
        self.amount = amount;
        self.fees = calculate_fee(amount);
        self.total = calculate_total(amount);
        self.touch(at);
    }

    /// Record the version the store assigned after a successful write.
    pub(crate) fn with_version(mut self, version: i64) -> Self {
        self.version = version;
        self
    }

    /// Full snapshot, used as audit `old_values` for deletions.
    pub fn to_record(&self) -> TransferRecord {
        TransferRecord {
            id: self.id.clone(),
            amount: self.amount,
            currency: self.currency.clone(),
            channel: self.channel.clone(),
            recipient: self.recipient.clone(),
            metadata: self.metadata.clone(),
            status: self.status,
            reference: self.reference.clone(),
            fees: self.fees,
            total: self.total,
            created_at: self.created_at,
            updated_at: self.updated_at,
            version: self.version,
        }
    }

    /// JSON snapshot of the full entity
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self.to_record()).unwrap_or(serde_json::Value::Null)
    }

    fn touch(&mut self, at: DateTime<Utc>) {
        // Never move updated_at backwards, even with a skewed clock
        self.updated_at = at.max(self.updated_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 9, 0, 0).unwrap()
    }

    fn transfer(amount: i64) -> Transfer {
        let request = CreateTransferRequest::new(
            Decimal::from(amount),
            "USD",
            "mobile",
            Recipient::new("+15550100", "Jane Roe"),
        );
        Transfer::new("t-1".to_string(), "TRF-20250115-AB12".to_string(), &request, t0())
    }

    fn in_status(status: TransferStatus) -> Transfer {
        let mut record = transfer(10000).to_record();
        record.status = status;
        Transfer::from(record)
    }

    #[test]
    fn test_new_transfer_is_pending_with_fees() {
        let t = transfer(10000);
        assert_eq!(t.status(), TransferStatus::Pending);
        assert_eq!(t.fees(), Decimal::from(100));
        assert_eq!(t.total(), Decimal::from(10100));
        assert_eq!(t.created_at(), t.updated_at());
        assert_eq!(t.version(), 0);

        let big = transfer(300000);
        assert_eq!(big.fees(), Decimal::from(1500));
        assert_eq!(big.total(), Decimal::from(301500));
    }

    #[test]
    fn test_can_transition_to_matches_table() {
        for from in TransferStatus::ALL {
            let t = in_status(from);
            for to in TransferStatus::ALL {
                assert_eq!(t.can_transition_to(to), from.allowed_transitions().contains(&to));
            }
        }
    }

    #[test]
    fn test_valid_transition_refreshes_updated_at() {
        let mut t = transfer(10000);
        let later = t0() + Duration::seconds(30);
        t.transition_to(TransferStatus::Processing, later).unwrap();
        assert_eq!(t.status(), TransferStatus::Processing);
        assert_eq!(t.updated_at(), later);
    }

    #[test]
    fn test_invalid_transition_leaves_entity_untouched() {
        for from in TransferStatus::ALL {
            for to in TransferStatus::ALL {
                if from.can_transition_to(to) {
                    continue;
                }
                let mut t = in_status(from);
                let before = t.clone();
                let err = t
                    .transition_to(to, t0() + Duration::minutes(5))
                    .unwrap_err();
                assert!(matches!(
                    err,
                    AppError::InvalidTransition { from: f, to: target } if f == from && target == to
                ));
                assert_eq!(t, before);
            }
        }
    }

    #[test]
    fn test_failed_can_return_to_pending_but_completed_cannot_move() {
        let mut failed = in_status(TransferStatus::Failed);
        assert!(failed.transition_to(TransferStatus::Pending, t0()).is_ok());

        let mut completed = in_status(TransferStatus::Completed);
        for to in TransferStatus::ALL {
            assert!(completed.transition_to(to, t0()).is_err());
        }
    }

    #[test]
    fn test_set_amount_recomputes_fees_and_total() {
        let mut t = transfer(10000);
        let later = t0() + Duration::seconds(1);
        t.set_amount(Decimal::from(300000), later);
        assert_eq!(t.fees(), Decimal::from(1500));
        assert_eq!(t.total(), Decimal::from(301500));
        assert_eq!(t.updated_at(), later);
        assert_eq!(t.status(), TransferStatus::Pending);
    }

    #[test]
    fn test_updated_at_never_moves_backwards() {
        let mut t = transfer(10000);
        t.set_amount(Decimal::from(20000), t0() - Duration::hours(1));
        assert_eq!(t.updated_at(), t0());
    }

    #[test]
    fn test_deserialization_rederives_fees() {
        let mut value = serde_json::to_value(transfer(10000)).unwrap();
        value["fees"] = serde_json::json!("9999");
        value["total"] = serde_json::json!("1");
        let t: Transfer = serde_json::from_value(value).unwrap();
        assert_eq!(t.fees(), Decimal::from(100));
        assert_eq!(t.total(), Decimal::from(10100));
    }
}
