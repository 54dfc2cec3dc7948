//! The API layer, containing web handlers and routing.

pub mod admin;
pub mod auth;
pub mod handlers;
pub mod response;
pub mod router;

pub use admin::{CleanupRequest, CleanupScheduledResponse};
pub use auth::API_KEY_HEADER;
pub use response::{TransferResponse, format_amount};
pub use router::create_router;
