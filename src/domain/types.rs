//! Domain types with validation support.

use std::borrow::Cow;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::error::{AppError, ValidationError};

/// Largest accepted transfer amount (99,999,999.99)
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(0x540B_E3FF, 2, 0, false, 2);

/// Number of fractional digits amounts may carry
pub const AMOUNT_SCALE: u32 = 2;

/// Lifecycle status of a transfer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    /// Created, waiting for processing
    #[default]
    Pending,
    /// Picked up, outcome not yet known
    Processing,
    /// Terminal: money moved
    Completed,
    /// Processing failed; may be moved back to pending
    Failed,
    /// Terminal: aborted before processing
    Cancelled,
}

impl TransferStatus {
    pub const ALL: [TransferStatus; 5] = [
        Self::Pending,
        Self::Processing,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Human-readable name
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Processing => "Processing",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::Cancelled => "Cancelled",
        }
    }

    /// Statuses reachable in one step from this one
    pub fn allowed_transitions(&self) -> &'static [TransferStatus] {
        match self {
            Self::Pending => &[Self::Processing, Self::Cancelled],
            Self::Processing => &[Self::Completed, Self::Failed],
            Self::Failed => &[Self::Pending],
            Self::Completed | Self::Cancelled => &[],
        }
    }

    #[inline]
    pub fn can_transition_to(&self, target: TransferStatus) -> bool {
        self.allowed_transitions().contains(&target)
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.allowed_transitions().is_empty()
    }
}

impl std::str::FromStr for TransferStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Invalid transfer status: {}", s))
    }
}

impl std::fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Transfer beneficiary
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct Recipient {
    #[validate(length(min = 1, message = "Recipient phone is required"))]
    pub phone: String,
    #[validate(length(min = 1, message = "Recipient name is required"))]
    pub name: String,
}

impl Recipient {
    #[must_use]
    pub fn new(phone: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            phone: phone.into(),
            name: name.into(),
        }
    }
}

/// Open key-value bag attached to a transfer
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Request to create a new transfer
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateTransferRequest {
    #[validate(custom(function = "validate_amount"))]
    pub amount: Decimal,
    #[validate(length(equal = 3, message = "Currency must be a 3-letter code"))]
    pub currency: String,
    #[validate(length(min = 1, max = 50, message = "Channel must be between 1 and 50 characters"))]
    pub channel: String,
    #[validate(nested)]
    pub recipient: Recipient,
    #[serde(default)]
    pub metadata: Metadata,
    /// Caller-supplied reference; generated when absent
    #[validate(length(min = 1, max = 100, message = "Reference must be between 1 and 100 characters"))]
    #[serde(default)]
    pub reference: Option<String>,
}

impl CreateTransferRequest {
    #[must_use]
    pub fn new(amount: Decimal, currency: &str, channel: &str, recipient: Recipient) -> Self {
        Self {
            amount,
            currency: currency.to_string(),
            channel: channel.to_string(),
            recipient,
            metadata: Metadata::new(),
            reference: None,
        }
    }

    #[must_use]
    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Partial update of a transfer: status and/or amount
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateTransferRequest {
    #[serde(default)]
    pub status: Option<TransferStatus>,
    #[serde(default)]
    pub amount: Option<Decimal>,
}

/// Amounts must be positive, carry at most two decimals and stay below the cap.
pub fn validate_amount(amount: &Decimal) -> Result<(), validator::ValidationError> {
    let message = if amount.is_sign_negative() || amount.is_zero() {
        "Amount must be greater than 0"
    } else if amount.normalize().scale() > AMOUNT_SCALE {
        "Amount must have at most 2 decimal places"
    } else if *amount > MAX_AMOUNT {
        "Amount exceeds the maximum allowed"
    } else {
        return Ok(());
    };
    let mut err = validator::ValidationError::new("amount");
    err.message = Some(Cow::Borrowed(message));
    Err(err)
}

/// Same rule as [`validate_amount`], reported as an application error.
pub fn check_amount(amount: &Decimal) -> Result<(), AppError> {
    validate_amount(amount).map_err(|e| {
        AppError::Validation(ValidationError::InvalidField {
            field: "amount".to_string(),
            message: e
                .message
                .map(|m| m.into_owned())
                .unwrap_or_else(|| "Invalid amount".to_string()),
        })
    })
}

/// Typed predicate set over transfers. Every present predicate must hold.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TransferFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TransferStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_amount: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_amount: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_after: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_before: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    /// Case-insensitive substring of the reference or the recipient name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q: Option<String>,
}

impl TransferFilters {
    #[must_use]
    pub fn with_status(mut self, status: TransferStatus) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = Some(currency.into());
        self
    }

    #[must_use]
    pub fn with_amount_range(mut self, min: Option<Decimal>, max: Option<Decimal>) -> Self {
        self.min_amount = min;
        self.max_amount = max;
        self
    }

    #[must_use]
    pub fn with_query(mut self, q: impl Into<String>) -> Self {
        self.q = Some(q.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Evaluate the predicate set against one transfer.
    pub fn matches(&self, transfer: &super::Transfer) -> bool {
        let q_matches = || {
            self.q.as_deref().is_none_or(|q| {
                let needle = q.to_lowercase();
                transfer.reference().to_lowercase().contains(&needle)
                    || transfer.recipient().name.to_lowercase().contains(&needle)
            })
        };

        self.status.is_none_or(|s| transfer.status() == s)
            && self.min_amount.is_none_or(|min| transfer.amount() >= min)
            && self.max_amount.is_none_or(|max| transfer.amount() <= max)
            && self.created_after.is_none_or(|t| transfer.created_at() >= t)
            && self.created_before.is_none_or(|t| transfer.created_at() <= t)
            && self.currency.as_deref().is_none_or(|c| transfer.currency() == c)
            && self.channel.as_deref().is_none_or(|c| transfer.channel() == c)
            && self.reference.as_deref().is_none_or(|r| transfer.reference() == r)
            && q_matches()
    }
}

/// Cursor pagination options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorOptions {
    /// Resume strictly after this transfer id
    pub cursor: Option<String>,
    pub limit: usize,
}

impl CursorOptions {
    pub const DEFAULT_LIMIT: usize = 10;
    pub const MAX_LIMIT: usize = 100;

    /// Build options, clamping the limit to `1..=MAX_LIMIT`.
    #[must_use]
    pub fn new(cursor: Option<String>, limit: usize) -> Self {
        Self {
            cursor: cursor.filter(|c| !c.is_empty()),
            limit: limit.clamp(1, Self::MAX_LIMIT),
        }
    }

    #[must_use]
    pub fn first_page(limit: usize) -> Self {
        Self::new(None, limit)
    }
}

impl Default for CursorOptions {
    fn default() -> Self {
        Self::first_page(Self::DEFAULT_LIMIT)
    }
}

/// Raw list query as received from an adapter (dates and numbers still text)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransferQuery {
    pub status: Option<String>,
    pub min_amount: Option<String>,
    pub max_amount: Option<String>,
    pub created_after: Option<String>,
    pub created_before: Option<String>,
    pub currency: Option<String>,
    pub channel: Option<String>,
    pub reference: Option<String>,
    pub q: Option<String>,
    pub cursor: Option<String>,
    pub limit: Option<usize>,
}

impl TransferQuery {
    /// Translate textual predicates into typed filters.
    pub fn to_filters(&self) -> Result<TransferFilters, AppError> {
        let status = parse_field(&self.status, "status", |s| s.parse::<TransferStatus>())?;
        let min_amount = parse_field(&self.min_amount, "min_amount", |s| s.trim().parse::<Decimal>())?;
        let max_amount = parse_field(&self.max_amount, "max_amount", |s| s.trim().parse::<Decimal>())?;
        let created_after = parse_field(&self.created_after, "created_after", parse_date)?;
        let created_before = parse_field(&self.created_before, "created_before", parse_date)?;

        Ok(TransferFilters {
            status,
            min_amount,
            max_amount,
            created_after,
            created_before,
            currency: non_empty(&self.currency),
            channel: non_empty(&self.channel),
            reference: non_empty(&self.reference),
            q: non_empty(&self.q),
        })
    }

    /// Page options for the query. A zero limit is rejected; anything above
    /// `MAX_LIMIT` is capped.
    pub fn cursor_options(&self) -> Result<CursorOptions, AppError> {
        let limit = self.limit.unwrap_or(CursorOptions::DEFAULT_LIMIT);
        if limit == 0 {
            return Err(AppError::Validation(ValidationError::InvalidFilter {
                field: "limit".to_string(),
                message: "must be at least 1".to_string(),
            }));
        }
        Ok(CursorOptions::new(self.cursor.clone(), limit))
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn parse_field<T, E: std::fmt::Display>(
    value: &Option<String>,
    field: &str,
    parse: impl Fn(&str) -> Result<T, E>,
) -> Result<Option<T>, AppError> {
    match non_empty(value) {
        None => Ok(None),
        Some(raw) => parse(&raw).map(Some).map_err(|e| {
            AppError::Validation(ValidationError::InvalidFilter {
                field: field.to_string(),
                message: format!("'{}': {}", raw, e),
            })
        }),
    }
}

/// Accepts RFC 3339 timestamps or bare `YYYY-MM-DD` dates (midnight UTC).
pub fn parse_date(raw: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| "expected an RFC 3339 timestamp or YYYY-MM-DD date".to_string())
}

/// One page of a cursor-paginated listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub has_next_page: bool,
    /// Id of the last returned item, present only when more items exist
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

impl<T> PaginatedResponse<T> {
    /// Build a page from `limit + 1` fetched rows.
    pub fn from_overfetch(mut rows: Vec<T>, limit: usize, id_of: impl Fn(&T) -> String) -> Self {
        let has_next_page = rows.len() > limit;
        rows.truncate(limit);
        let next_cursor = if has_next_page {
            rows.last().map(id_of)
        } else {
            None
        };
        Self {
            data: rows,
            has_next_page,
            next_cursor,
        }
    }
}

/// Health status enum
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub database: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub version: String,
}

impl HealthResponse {
    #[must_use]
    pub fn new(database: HealthStatus) -> Self {
        Self {
            status: database,
            database,
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Error response structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

/// Error detail structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Stable error code
    pub r#type: String,
    pub message: String,
}
