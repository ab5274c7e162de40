use axum::{
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, rejection::WebSocketUpgradeRejection},
    },
    http::{HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use std::collections::HashMap;
use tracing::{info, warn};

use crate::AppState;
use crate::ws::{self, ChatConnection, ClientSink, TerminalConnection};

/// The two socket endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// `/shell`: pseudoterminal sessions
    Terminal,
    /// `/ws`: agent chat
    Chat,
}

pub fn classify_path(path: &str) -> Option<Endpoint> {
    match path.trim_end_matches('/') {
        "/shell" => Some(Endpoint::Terminal),
        "/ws" => Some(Endpoint::Chat),
        _ => None,
    }
}

/// Routes every upgrade request by path. Authentication happens before the
/// upgrade; a refused caller never reaches session code.
pub async fn websocket_handler(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Some(endpoint) = classify_path(uri.path()) else {
        return match ws {
            Ok(ws) => {
                warn!("Closing WebSocket on unknown path {}", uri.path());
                ws.on_upgrade(|mut socket| async move {
                    let _ = socket.send(Message::Close(None)).await;
                })
            }
            Err(_) => StatusCode::NOT_FOUND.into_response(),
        };
    };

    let user = match state
        .authenticator
        .authenticate(&headers, params.get("token").map(String::as_str))
        .await
    {
        Ok(user) => user,
        Err(e) => return e.into_response(),
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let (sink, outbound) = ClientSink::new(ws::next_connection_id());
    let hub = state.hub.clone();
    let metrics = state.metrics.clone();
    let heartbeat = state.server_config.heartbeat_interval;
    info!(
        conn_id = sink.id(),
        "Accepting {:?} connection for {}", endpoint, user.username
    );

    match endpoint {
        Endpoint::Terminal => {
            let handler = TerminalConnection::new(
                sink.clone(),
                user,
                state.terminals.clone(),
                metrics.clone(),
            );
            ws.on_upgrade(move |socket| {
                ws::handle_connection(socket, sink, outbound, handler, hub, metrics, heartbeat)
            })
        }
        Endpoint::Chat => {
            let handler = ChatConnection::new(
                sink.clone(),
                user,
                state.orchestrator.clone(),
                metrics.clone(),
            );
            ws.on_upgrade(move |socket| {
                ws::handle_connection(socket, sink, outbound, handler, hub, metrics, heartbeat)
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, body::Body, http::Request};
    use tower::ServiceExt;

    fn app() -> Router {
        let (state, _spawner) = crate::test_helpers::test_app_state();
        Router::new().fallback(websocket_handler).with_state(state)
    }

    fn upgrade_request(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header("connection", "upgrade")
            .header("upgrade", "websocket")
            .header("sec-websocket-version", "13")
            .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn test_classify_path() {
        assert_eq!(classify_path("/shell"), Some(Endpoint::Terminal));
        assert_eq!(classify_path("/ws"), Some(Endpoint::Chat));
        assert_eq!(classify_path("/ws/"), Some(Endpoint::Chat));
        assert_eq!(classify_path("/"), None);
        assert_eq!(classify_path("/shells"), None);
    }

    #[tokio::test]
    async fn test_unknown_plain_request_is_not_found() {
        let resp = app()
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_handshake_without_token_is_refused() {
        let resp = app().oneshot(upgrade_request("/shell")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = app()
            .oneshot(upgrade_request("/ws?token=wrong"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_valid_token_passes_authentication() {
        // No real connection to upgrade here, so the upgrade itself is rejected
        let resp = app()
            .oneshot(upgrade_request("/ws?token=secret"))
            .await
            .unwrap();
        assert_ne!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
