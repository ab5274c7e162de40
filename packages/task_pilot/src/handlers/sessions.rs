use axum::{Json, extract::State, response::IntoResponse};
use serde::Serialize;

use crate::AppState;
use crate::registry::StreamingSessionInfo;

#[derive(Debug, Serialize)]
pub struct StreamingSessionsResponse {
    pub sessions: Vec<StreamingSessionInfo>,
}

/// Current contents of the streaming-session registry, for polling clients.
pub async fn streaming_sessions_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(StreamingSessionsResponse {
        sessions: state.registry.streaming_snapshot().await,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Router,
        body::Body,
        http::{Request, StatusCode},
        routing::get,
    };
    use tower::ServiceExt;

    use crate::auth::auth_middleware;

    fn router(state: AppState) -> Router {
        Router::new()
            .route("/api/sessions/streaming", get(streaming_sessions_handler))
            .layer(axum::middleware::from_fn_with_state(
                state.authenticator.clone(),
                auth_middleware,
            ))
            .with_state(state)
    }

    #[tokio::test]
    async fn test_lists_streaming_sessions() {
        let (state, _spawner) = crate::test_helpers::test_app_state();
        state.registry.start_streaming("abc", Some(5), Some(9)).await;
        let app = router(state);

        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/api/sessions/streaming")
                    .header("authorization", "Bearer secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let sessions = json["sessions"].as_array().unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0]["claudeSessionId"], "abc");
        assert_eq!(sessions[0]["taskId"], 5);
        assert_eq!(sessions[0]["conversationId"], 9);
    }

    #[tokio::test]
    async fn test_requires_token() {
        let (state, _spawner) = crate::test_helpers::test_app_state();
        let app = router(state);

        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/api/sessions/streaming")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
