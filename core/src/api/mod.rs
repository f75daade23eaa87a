//! HTTP chat API
//!
//! - `GET /messages`: the chat log, oldest first
//! - `POST /send`: store and publish a message
//! - `GET /status`: connection state of the node
//! - `POST /reconnect`: dial the bootstrap peer again

mod error;
mod messages;
mod node;
mod state;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

pub use error::ApiError;
pub use messages::{SendRequest, SendResponse};
pub use node::{ReconnectResponse, StatusResponse};
pub use state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/messages", get(messages::list))
        .route("/send", post(messages::send))
        .route("/status", get(node::status))
        .route("/reconnect", post(node::reconnect))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
