pub mod charts;
pub mod snapshots;

use axum::http::StatusCode;
use std::fmt::Display;
use tracing::error;

/// Every failure reaches the client as "no data"; the cause is only logged.
pub(crate) fn no_data(context: &str, err: impl Display) -> (StatusCode, String) {
    error!("{}: {}", context, err);
    (StatusCode::NOT_FOUND, "no data".to_string())
}
