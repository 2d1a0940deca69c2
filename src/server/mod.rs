// WebSocket server
//
// Exposes the record stream at GET /ws. Any Origin is accepted; the
// stream is public and one-way.

pub mod session;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::hub::{FieldFilter, Hub, Sampler};

/// Per-frame write deadline
pub const WRITE_WAIT: Duration = Duration::from_secs(10);

/// Deadline for any inbound frame; pongs refresh it
pub const PONG_WAIT: Duration = Duration::from_secs(60);

/// Ping cadence, comfortably inside the pong deadline
pub const PING_PERIOD: Duration = Duration::from_secs(54);

/// Largest inbound frame accepted from a subscriber
const MAX_MESSAGE_SIZE: usize = 512;

/// Shared server state
pub struct AppState {
    pub hub: Arc<Hub>,
    pub shutdown: CancellationToken,
}

/// Query parameters accepted on the /ws endpoint
#[derive(Debug, Default, Deserialize)]
pub struct StreamParams {
    /// Comma-separated dotted field paths to project
    pub filter: Option<String>,
    /// Reservoir-sampled delivery cadence in milliseconds
    pub sample: Option<u64>,
}

/// Build the application router
pub fn router(hub: Arc<Hub>, shutdown: CancellationToken) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(Arc::new(AppState { hub, shutdown }))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<StreamParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let filter = params.filter.as_deref().and_then(FieldFilter::parse);
    let sampler = params.sample.map(Sampler::new);

    ws.max_message_size(MAX_MESSAGE_SIZE).on_upgrade(move |socket| {
        session::handle_socket(
            socket,
            state.hub.clone(),
            filter,
            sampler,
            state.shutdown.clone(),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_router_build() {
        let (hub, _rx) = Hub::new();
        let _router = router(hub, CancellationToken::new());
    }

    #[test]
    fn test_ping_period_is_inside_pong_deadline() {
        assert_eq!(PING_PERIOD, PONG_WAIT * 9 / 10);
    }

    #[test]
    fn test_stream_params_parse() {
        let params: StreamParams =
            serde_urlencoded::from_str("filter=subject.CN%2Csource&sample=500").unwrap();

        assert_eq!(params.filter.as_deref(), Some("subject.CN,source"));
        assert_eq!(params.sample, Some(500));
    }
}
