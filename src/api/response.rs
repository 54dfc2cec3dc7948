//! Response views of transfers, with display fields derived from the entity.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

use crate::domain::{PaginatedResponse, Transfer, TransferStatus};

/// A transfer as returned by the API
#[derive(Debug, Clone, Serialize)]
pub struct TransferResponse {
    #[serde(flatten)]
    pub transfer: Transfer,
    /// Amount with currency symbol and grouping, e.g. `$10,000.00`
    pub formatted_amount: String,
    pub status_label: &'static str,
    /// Whole minutes between creation and the last update, at least 1.
    /// Absent while the transfer is still `PENDING`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time_minutes: Option<i64>,
}

impl From<Transfer> for TransferResponse {
    fn from(transfer: Transfer) -> Self {
        Self {
            formatted_amount: format_amount(transfer.amount(), transfer.currency()),
            status_label: transfer.status().label(),
            processing_time_minutes: processing_time_minutes(&transfer),
            transfer,
        }
    }
}

impl From<PaginatedResponse<Transfer>> for PaginatedResponse<TransferResponse> {
    fn from(page: PaginatedResponse<Transfer>) -> Self {
        Self {
            data: page.data.into_iter().map(TransferResponse::from).collect(),
            has_next_page: page.has_next_page,
            next_cursor: page.next_cursor,
        }
    }
}

fn processing_time_minutes(transfer: &Transfer) -> Option<i64> {
    if transfer.status() == TransferStatus::Pending {
        return None;
    }
    let elapsed_ms = (transfer.updated_at() - transfer.created_at())
        .num_milliseconds()
        .max(0);
    let minutes = (elapsed_ms + 30_000) / 60_000;
    Some(minutes.max(1))
}

/// Symbol and fraction digits per currency; unknown codes print the code.
fn currency_style(code: &str) -> (Option<&'static str>, u32) {
    match code {
        "USD" => (Some("$"), 2),
        "EUR" => (Some("€"), 2),
        "GBP" => (Some("£"), 2),
        "JPY" => (Some("¥"), 0),
        "XOF" => (Some("F\u{a0}CFA\u{a0}"), 0),
        "XAF" => (Some("FCFA\u{a0}"), 0),
        _ => (None, 2),
    }
}

/// Format an amount the way an en-US currency formatter does.
pub fn format_amount(amount: Decimal, currency: &str) -> String {
    let code = currency.to_ascii_uppercase();
    let (symbol, digits) = currency_style(&code);
    let rounded = amount.round_dp_with_strategy(digits, RoundingStrategy::MidpointAwayFromZero);

    let plain = format!("{:.*}", digits as usize, rounded.abs());
    let (integer, fraction) = match plain.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (plain.as_str(), None),
    };

    let mut grouped = String::with_capacity(integer.len() + integer.len() / 3);
    for (i, ch) in integer.chars().enumerate() {
        if i > 0 && (integer.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if let Some(fraction) = fraction {
        grouped.push('.');
        grouped.push_str(fraction);
    }

    let sign = if rounded.is_sign_negative() && !rounded.is_zero() {
        "-"
    } else {
        ""
    };
    match symbol {
        Some(symbol) => format!("{sign}{symbol}{grouped}"),
        None => format!("{sign}{code}\u{a0}{grouped}"),
    }
}
