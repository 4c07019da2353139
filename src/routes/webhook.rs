//! Push notifications from Google Calendar

use axum::{
    Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
};
use tracing::{debug, info, warn};

use crate::state::AppState;

pub const WEBHOOK_PATH: &str = "/webhook/calendar";

const CHANNEL_TOKEN_HEADER: &str = "x-goog-channel-token";
const CHANNEL_ID_HEADER: &str = "x-goog-channel-id";
const RESOURCE_STATE_HEADER: &str = "x-goog-resource-state";
const MESSAGE_NUMBER_HEADER: &str = "x-goog-message-number";

pub fn router() -> Router<AppState> {
    Router::new().route(WEBHOOK_PATH, post(receive))
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

/// POST /webhook/calendar - Queue a sync when the calendar changed
async fn receive(State(state): State<AppState>, headers: HeaderMap) -> StatusCode {
    let channel_id = header(&headers, CHANNEL_ID_HEADER);
    let token = header(&headers, CHANNEL_TOKEN_HEADER);

    // An unset token never matches
    if state.webhook_token.is_empty() || token != &*state.webhook_token {
        warn!(channel_id, "Rejected notification with wrong channel token");
        return StatusCode::FORBIDDEN;
    }

    let resource_state = header(&headers, RESOURCE_STATE_HEADER);
    let message_number = header(&headers, MESSAGE_NUMBER_HEADER);

    match resource_state {
        "exists" | "not_exists" => {
            if state.coordinator.request_sync() {
                info!(channel_id, message_number, resource_state, "Calendar changed, sync queued");
            } else {
                debug!(channel_id, message_number, "Calendar changed, sync already pending");
            }
        }
        "sync" => info!(channel_id, "Channel handshake received"),
        other => debug!(channel_id, resource_state = other, "Ignoring notification"),
    }

    StatusCode::OK
}
