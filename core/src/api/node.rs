use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};

use crate::api::{ApiError, AppState};
use crate::orchestrator::ReconnectError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub peer_id: String,
    pub listening_addresses: Vec<String>,
    pub connected_peers: usize,
    pub connected_peer_ids: Vec<String>,
    pub known_peers: usize,
    pub messages: usize,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub message: String,
}

pub(super) async fn status(State(state): State<AppState>) -> Result<Json<StatusResponse>, ApiError> {
    let node = state.network.status().await?;
    let messages = state.bridge.store().len().await;

    Ok(Json(StatusResponse {
        peer_id: node.peer_id.to_string(),
        listening_addresses: node.listening_addresses.iter().map(|a| a.to_string()).collect(),
        connected_peers: node.connections,
        connected_peer_ids: node.connected_peer_ids.iter().map(|p| p.to_string()).collect(),
        known_peers: node.known_peers,
        messages,
        status: if node.is_connected() { "Connected" } else { "Waiting for peers" }.to_string(),
    }))
}

pub(super) async fn reconnect(State(state): State<AppState>) -> Response {
    match state.orchestrator.reconnect().await {
        Ok(_) => Json(ReconnectResponse {
            success: true,
            error: None,
            message: "Reconnected to bootstrap peer".to_string(),
        })
        .into_response(),
        Err(ReconnectError::NotConfigured) => {
            ApiError::BadRequest(ReconnectError::NotConfigured.to_string()).into_response()
        }
        Err(ReconnectError::Dial(failure)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ReconnectResponse {
                success: false,
                error: Some(failure.to_string()),
                message: format!(
                    "Reconnection failed ({}); peers can still find each other through discovery",
                    failure.hint()
                ),
            }),
        )
            .into_response(),
    }
}
