//! PostgreSQL transfer repository and audit store.

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder, Row, postgres::PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};

use crate::domain::{
    AppError, AuditLogEntry, AuditLogStore, CursorOptions, DatabaseError, Metadata,
    NewAuditLogEntry, PaginatedResponse, Recipient, Transfer, TransferFilters, TransferRecord,
    TransferRepository, TransferStatus,
};

const TRANSFER_COLUMNS: &str = "id, amount, currency, channel, recipient, metadata, status, \
     reference, fees, total, created_at, updated_at, version";

/// PostgreSQL connection pool configuration
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(3),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

/// PostgreSQL client with connection pooling
pub struct PostgresClient {
    pool: PgPool,
}

impl PostgresClient {
    /// Create a new PostgreSQL client with custom configuration
    pub async fn new(database_url: &str, config: PostgresConfig) -> Result<Self, AppError> {
        info!("Connecting to PostgreSQL...");
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .max_lifetime(config.max_lifetime)
            .connect(database_url)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Run database migrations using sqlx migrate
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Migration(e.to_string())))?;
        info!("Database migrations completed successfully");
        Ok(())
    }

    fn row_to_transfer(row: &sqlx::postgres::PgRow) -> Result<Transfer, AppError> {
        let status: String = row.try_get("status").map_err(DatabaseError::from)?;
        let status: TransferStatus = status
            .parse()
            .map_err(|e: String| AppError::Database(DatabaseError::Query(e)))?;
        let Json(recipient): Json<Recipient> = row.try_get("recipient").map_err(DatabaseError::from)?;
        let Json(metadata): Json<Metadata> = row.try_get("metadata").map_err(DatabaseError::from)?;

        let record = TransferRecord {
            id: row.try_get("id").map_err(DatabaseError::from)?,
            amount: row.try_get("amount").map_err(DatabaseError::from)?,
            currency: row.try_get("currency").map_err(DatabaseError::from)?,
            channel: row.try_get("channel").map_err(DatabaseError::from)?,
            recipient,
            metadata,
            status,
            reference: row.try_get("reference").map_err(DatabaseError::from)?,
            fees: row.try_get("fees").map_err(DatabaseError::from)?,
            total: row.try_get("total").map_err(DatabaseError::from)?,
            created_at: row.try_get("created_at").map_err(DatabaseError::from)?,
            updated_at: row.try_get("updated_at").map_err(DatabaseError::from)?,
            version: row.try_get("version").map_err(DatabaseError::from)?,
        };
        Ok(Transfer::from(record))
    }

    fn row_to_audit_entry(row: &sqlx::postgres::PgRow) -> Result<AuditLogEntry, AppError> {
        let old_values: Option<Json<serde_json::Value>> =
            row.try_get("old_values").map_err(DatabaseError::from)?;
        let new_values: Option<Json<serde_json::Value>> =
            row.try_get("new_values").map_err(DatabaseError::from)?;
        Ok(AuditLogEntry {
            id: row.try_get("id").map_err(DatabaseError::from)?,
            transfer_id: row.try_get("transfer_id").map_err(DatabaseError::from)?,
            action: row.try_get("action").map_err(DatabaseError::from)?,
            old_values: old_values.map(|Json(v)| v),
            new_values: new_values.map(|Json(v)| v),
            timestamp: row.try_get("timestamp").map_err(DatabaseError::from)?,
            user_id: row.try_get("user_id").map_err(DatabaseError::from)?,
        })
    }

    async fn fetch_transfers(
        &self,
        mut builder: QueryBuilder<'_, Postgres>,
    ) -> Result<Vec<Transfer>, AppError> {
        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from)?;
        rows.iter().map(Self::row_to_transfer).collect()
    }
}

/// Append `AND ...` clauses for every present filter
fn push_filters<'a>(builder: &mut QueryBuilder<'a, Postgres>, filters: &'a TransferFilters) {
    if let Some(status) = filters.status {
        builder.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(min) = filters.min_amount {
        builder.push(" AND amount >= ").push_bind(min);
    }
    if let Some(max) = filters.max_amount {
        builder.push(" AND amount <= ").push_bind(max);
    }
    if let Some(after) = filters.created_after {
        builder.push(" AND created_at >= ").push_bind(after);
    }
    if let Some(before) = filters.created_before {
        builder.push(" AND created_at <= ").push_bind(before);
    }
    if let Some(currency) = filters.currency.as_deref() {
        builder.push(" AND currency = ").push_bind(currency);
    }
    if let Some(channel) = filters.channel.as_deref() {
        builder.push(" AND channel = ").push_bind(channel);
    }
    if let Some(reference) = filters.reference.as_deref() {
        builder.push(" AND reference = ").push_bind(reference);
    }
    if let Some(q) = filters.q.as_deref() {
        let pattern = format!("%{}%", escape_like(q));
        builder
            .push(" AND (reference ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR recipient->>'name' ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

/// Escape LIKE wildcards so user text matches literally
fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[async_trait]
impl TransferRepository for PostgresClient {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        Ok(())
    }

    #[instrument(skip(self, transfer), fields(id = %transfer.id(), reference = %transfer.reference()))]
    async fn create(&self, transfer: &Transfer) -> Result<Transfer, AppError> {
        let sql = format!(
            r#"
            INSERT INTO transfers (
                id, amount, currency, channel, recipient, metadata, status,
                reference, fees, total, created_at, updated_at, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, 1)
            RETURNING {TRANSFER_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(transfer.id())
            .bind(transfer.amount())
            .bind(transfer.currency())
            .bind(transfer.channel())
            .bind(Json(transfer.recipient()))
            .bind(Json(transfer.metadata()))
            .bind(transfer.status().as_str())
            .bind(transfer.reference())
            .bind(transfer.fees())
            .bind(transfer.total())
            .bind(transfer.created_at())
            .bind(transfer.updated_at())
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from)?;
        Self::row_to_transfer(&row)
    }

    #[instrument(skip(self))]
    async fn find_by_id(&self, id: &str) -> Result<Option<Transfer>, AppError> {
        let sql = format!("SELECT {TRANSFER_COLUMNS} FROM transfers WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from)?;
        row.as_ref().map(Self::row_to_transfer).transpose()
    }

    #[instrument(skip(self))]
    async fn find_by_reference(&self, reference: &str) -> Result<Option<Transfer>, AppError> {
        let sql = format!("SELECT {TRANSFER_COLUMNS} FROM transfers WHERE reference = $1");
        let row = sqlx::query(&sql)
            .bind(reference)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from)?;
        row.as_ref().map(Self::row_to_transfer).transpose()
    }

    #[instrument(skip(self))]
    async fn find_all(&self) -> Result<Vec<Transfer>, AppError> {
        let mut builder = QueryBuilder::new(format!("SELECT {TRANSFER_COLUMNS} FROM transfers"));
        builder.push(" ORDER BY created_at DESC, id DESC");
        self.fetch_transfers(builder).await
    }

    #[instrument(skip(self))]
    async fn find_with_filters(&self, filters: &TransferFilters) -> Result<Vec<Transfer>, AppError> {
        let mut builder =
            QueryBuilder::new(format!("SELECT {TRANSFER_COLUMNS} FROM transfers WHERE TRUE"));
        push_filters(&mut builder, filters);
        builder.push(" ORDER BY created_at DESC, id DESC");
        self.fetch_transfers(builder).await
    }

    #[instrument(skip(self))]
    async fn find_with_filters_and_cursor_pagination(
        &self,
        filters: &TransferFilters,
        options: &CursorOptions,
    ) -> Result<PaginatedResponse<Transfer>, AppError> {
        let mut builder =
            QueryBuilder::new(format!("SELECT {TRANSFER_COLUMNS} FROM transfers WHERE TRUE"));
        if let Some(cursor) = options.cursor.as_deref() {
            builder.push(" AND id > ").push_bind(cursor);
        }
        push_filters(&mut builder, filters);
        // Fetch one extra row to learn whether another page exists
        builder
            .push(" ORDER BY id ASC LIMIT ")
            .push_bind((options.limit + 1) as i64);

        let rows = self.fetch_transfers(builder).await?;
        Ok(PaginatedResponse::from_overfetch(rows, options.limit, |t| {
            t.id().to_string()
        }))
    }

    #[instrument(skip(self, transfer), fields(version = transfer.version()))]
    async fn update(&self, id: &str, transfer: &Transfer) -> Result<Option<Transfer>, AppError> {
        let sql = format!(
            r#"
            UPDATE transfers
            SET status = $1, amount = $2, fees = $3, total = $4,
                updated_at = $5, version = version + 1
            WHERE id = $6 AND version = $7
            RETURNING {TRANSFER_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(transfer.status().as_str())
            .bind(transfer.amount())
            .bind(transfer.fees())
            .bind(transfer.total())
            .bind(transfer.updated_at())
            .bind(id)
            .bind(transfer.version())
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from)?;

        if let Some(row) = row {
            return Self::row_to_transfer(&row).map(Some);
        }

        let exists = sqlx::query("SELECT 1 FROM transfers WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from)?
            .is_some();
        if exists {
            Err(DatabaseError::VersionConflict(id.to_string()).into())
        } else {
            Ok(None)
        }
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: &str) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM transfers WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from)?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, ids), fields(count = ids.len()))]
    async fn delete_many(&self, ids: &[String]) -> Result<Vec<String>, AppError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query("DELETE FROM transfers WHERE id = ANY($1) RETURNING id")
            .bind(ids)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from)?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("id").map_err(|e| DatabaseError::from(e).into()))
            .collect()
    }
}

#[async_trait]
impl AuditLogStore for PostgresClient {
    #[instrument(skip(self, entry), fields(transfer_id = %entry.transfer_id, action = %entry.action))]
    async fn append(&self, entry: NewAuditLogEntry) -> Result<AuditLogEntry, AppError> {
        let row = sqlx::query(
            r#"
            INSERT INTO audit_logs (transfer_id, action, old_values, new_values, timestamp, user_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(&entry.transfer_id)
        .bind(&entry.action)
        .bind(entry.old_values.as_ref().map(Json))
        .bind(entry.new_values.as_ref().map(Json))
        .bind(entry.timestamp)
        .bind(entry.user_id.as_deref())
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        let id: i64 = row.try_get("id").map_err(DatabaseError::from)?;
        Ok(entry.into_entry(id))
    }

    #[instrument(skip(self))]
    async fn list_for_transfer(&self, transfer_id: &str) -> Result<Vec<AuditLogEntry>, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT id, transfer_id, action, old_values, new_values, timestamp, user_id
            FROM audit_logs
            WHERE transfer_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(transfer_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        rows.iter().map(Self::row_to_audit_entry).collect()
    }
}
