//! Error types for the HTTP boundary.
//!
//! `ApiError` wraps the core [`relatedness::Error`] and implements
//! [`IntoResponse`] so handlers can use `?` and still answer with a JSON
//! error body and a meaningful status code.
//!
//! ## Error Cases
//! - `Core`: mapped by the innermost core error. Invalid identifiers,
//!   malformed uploads and self-pairs with a real distance are `400`, a
//!   vanished lease is `409`, store failures are `500`.
//! - `NotFound`: the sample has no stored record, `404`.
//! - `Join`: the blocking task running the store call panicked, `500`.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Core(#[from] relatedness::Error),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Core(e) => match e.root() {
                relatedness::Error::InvalidSpecies { .. }
                | relatedness::Error::InvalidGuid { .. }
                | relatedness::Error::MalformedRecord { .. }
                | relatedness::Error::InvalidComparison { .. } => StatusCode::BAD_REQUEST,
                relatedness::Error::LeaseNotActive(_) => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Join(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("request failed: {self}");
        } else {
            tracing::debug!(%status, "request rejected: {self}");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
