//! Append-only audit trail model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const TRANSFER_CREATED: &str = "TRANSFER_CREATED";
pub const TRANSFER_UPDATED: &str = "TRANSFER_UPDATED";
pub const TRANSFER_PROCESSING: &str = "TRANSFER_PROCESSING";
pub const TRANSFER_SUCCESS: &str = "TRANSFER_SUCCESS";
pub const TRANSFER_FAILED: &str = "TRANSFER_FAILED";
pub const TRANSFER_CANCELED: &str = "TRANSFER_CANCELED";
pub const TRANSFER_DELETED_CLEANUP: &str = "TRANSFER_DELETED_CLEANUP";

/// One stored audit entry. Entries are never updated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditLogEntry {
    pub id: i64,
    pub transfer_id: String,
    pub action: String,
    pub old_values: Option<Value>,
    pub new_values: Option<Value>,
    pub timestamp: DateTime<Utc>,
    pub user_id: Option<String>,
}

/// Audit entry before the store assigns its id
#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditLogEntry {
    pub transfer_id: String,
    pub action: String,
    pub old_values: Option<Value>,
    pub new_values: Option<Value>,
    pub timestamp: DateTime<Utc>,
    pub user_id: Option<String>,
}

impl NewAuditLogEntry {
    #[must_use]
    pub fn new(transfer_id: impl Into<String>, action: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            transfer_id: transfer_id.into(),
            action: action.to_string(),
            old_values: None,
            new_values: None,
            timestamp,
            user_id: None,
        }
    }

    #[must_use]
    pub fn with_values(mut self, old_values: Option<Value>, new_values: Option<Value>) -> Self {
        self.old_values = old_values;
        self.new_values = new_values;
        self
    }

    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Attach the id the store assigned
    pub fn into_entry(self, id: i64) -> AuditLogEntry {
        AuditLogEntry {
            id,
            transfer_id: self.transfer_id,
            action: self.action,
            old_values: self.old_values,
            new_values: self.new_values,
            timestamp: self.timestamp,
            user_id: self.user_id,
        }
    }
}
