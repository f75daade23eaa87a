use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::api::{ApiError, AppState};
use crate::network::PublishOutcome;

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    /// Missing is treated like empty
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResponse {
    pub success: bool,
    pub message: String,
    pub local_only: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl From<&PublishOutcome> for SendResponse {
    fn from(outcome: &PublishOutcome) -> Self {
        let (message, warning) = match outcome {
            PublishOutcome::Published => ("Message sent and published to P2P network", None),
            PublishOutcome::NoSubscribers => (
                "Message stored locally (no peers connected yet)",
                Some("Message will be shared once peers connect"),
            ),
            PublishOutcome::Failed(_) => (
                "Message stored locally",
                Some("P2P publish failed, but message is saved"),
            ),
        };
        Self {
            success: true,
            message: message.to_string(),
            local_only: !outcome.is_published(),
            warning: warning.map(str::to_string),
        }
    }
}

pub(super) async fn list(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.bridge.store().snapshot().await)
}

pub(super) async fn send(
    State(state): State<AppState>,
    body: Result<Json<SendRequest>, JsonRejection>,
) -> Result<Json<SendResponse>, ApiError> {
    let Json(request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let submission = state.bridge.submit(&request.message).await?;
    info!("Message stored locally: {}", submission.formatted);

    Ok(Json(SendResponse::from(&submission.outcome)))
}
