//! Router assembly.
//!
//! | Route | Handler |
//! |---|---|
//! | `GET /health` | [`handler::health`] |
//! | `GET /api/relatedness/{species}/db/{guid}/check_lock` | [`handler::check_lock`] |
//! | `GET /api/relatedness/{species}/db/next_lock` | [`handler::next_lock`] |
//! | `GET /api/relatedness/{species}/db/clear_lock?lock=N` | [`handler::clear_lock`] |
//! | `GET /api/relatedness/{species}/db/get_batch` | [`handler::get_batch`] |
//! | `POST /api/relatedness/{species}/db/clear_batch` | [`handler::clear_batch`] |
//! | `POST /api/relatedness/{species}/db/add_distances` | [`handler::add_distances`] |
//! | `GET /api/relatedness/{species}/db/{guid}/neighbours` | [`handler::neighbours`] |
//! | `GET /api/relatedness/{species}/db/{guid}/nearest` | [`handler::nearest`] |

pub mod error;
pub mod handler;

use axum::Router;
use axum::routing::{get, post};
use handler::AppState;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handler::health))
        .route(
            "/api/relatedness/{species}/db/{guid}/check_lock",
            get(handler::check_lock),
        )
        .route("/api/relatedness/{species}/db/next_lock", get(handler::next_lock))
        .route("/api/relatedness/{species}/db/clear_lock", get(handler::clear_lock))
        .route("/api/relatedness/{species}/db/get_batch", get(handler::get_batch))
        .route("/api/relatedness/{species}/db/clear_batch", post(handler::clear_batch))
        .route(
            "/api/relatedness/{species}/db/add_distances",
            post(handler::add_distances),
        )
        .route(
            "/api/relatedness/{species}/db/{guid}/neighbours",
            get(handler::neighbours),
        )
        .route(
            "/api/relatedness/{species}/db/{guid}/nearest",
            get(handler::nearest),
        )
        .layer(
            ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            ),
        )
        .with_state(state)
}
