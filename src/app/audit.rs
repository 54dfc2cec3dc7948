//! Best-effort audit trail recording.

use std::sync::Arc;

use serde_json::Value;
use tracing::{error, instrument};

use crate::domain::{AppError, AuditLogEntry, AuditLogStore, Clock, NewAuditLogEntry};

/// Records audit entries without ever failing the caller's operation.
pub struct AuditService {
    store: Arc<dyn AuditLogStore>,
    clock: Arc<dyn Clock>,
}

impl AuditService {
    #[must_use]
    pub fn new(store: Arc<dyn AuditLogStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Append an entry. Storage failures are logged and swallowed.
    pub async fn log(
        &self,
        transfer_id: &str,
        action: &str,
        old_values: Option<Value>,
        new_values: Option<Value>,
    ) -> Option<AuditLogEntry> {
        self.record(transfer_id, action, old_values, new_values, None)
            .await
    }

    /// Same as [`log`](Self::log), attributed to `user_id`.
    pub async fn log_as(
        &self,
        user_id: &str,
        transfer_id: &str,
        action: &str,
        old_values: Option<Value>,
        new_values: Option<Value>,
    ) -> Option<AuditLogEntry> {
        self.record(transfer_id, action, old_values, new_values, Some(user_id))
            .await
    }

    #[instrument(skip(self, old_values, new_values))]
    async fn record(
        &self,
        transfer_id: &str,
        action: &str,
        old_values: Option<Value>,
        new_values: Option<Value>,
        user_id: Option<&str>,
    ) -> Option<AuditLogEntry> {
        let mut entry = NewAuditLogEntry::new(transfer_id, action, self.clock.now())
            .with_values(old_values, new_values);
        if let Some(user_id) = user_id {
            entry = entry.with_user(user_id);
        }
        match self.store.append(entry).await {
            Ok(stored) => Some(stored),
            Err(e) => {
                error!(transfer_id = %transfer_id, action = %action, error = ?e, "Failed to write audit log entry");
                None
            }
        }
    }

    /// Entries for one transfer in insertion order
    #[instrument(skip(self))]
    pub async fn get_logs_for_transfer(&self, transfer_id: &str) -> Result<Vec<AuditLogEntry>, AppError> {
        self.store.list_for_transfer(transfer_id).await
    }
}
