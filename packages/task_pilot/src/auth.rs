//! Authentication: identity resolved once per connection, at handshake time.
//!
//! Two modes:
//! 1. Platform (single tenant) → every caller is the configured default user
//! 2. Tokens (multi tenant) → a bearer token from `?token=` or the
//!    `Authorization` header must resolve through a [`TokenVerifier`]

use async_trait::async_trait;
use axum::{
    Json,
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::{AuthFileConfig, AuthModeKind};

// =============================================================================
// AuthUser
// =============================================================================

/// Authenticated caller attached to a connection for attribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub user_id: String,
    pub username: String,
}

impl AuthUser {
    pub fn named(username: &str) -> Self {
        Self {
            user_id: username.to_string(),
            username: username.to_string(),
        }
    }
}

// =============================================================================
// Auth Errors
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("authentication token required")]
    MissingToken,
    #[error("invalid authentication token")]
    InvalidToken,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}

// =============================================================================
// Token verification
// =============================================================================

/// Resolves bearer tokens to users.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Option<AuthUser>;
}

/// Verifier backed by the `[auth.tokens]` table of the config file.
pub struct StaticTokenVerifier {
    tokens: HashMap<String, AuthUser>,
}

impl StaticTokenVerifier {
    pub fn new(tokens: &HashMap<String, String>) -> Self {
        Self {
            tokens: tokens
                .iter()
                .map(|(token, name)| (token.clone(), AuthUser::named(name)))
                .collect(),
        }
    }
}

#[async_trait]
impl TokenVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> Option<AuthUser> {
        self.tokens.get(token).cloned()
    }
}

enum AuthMode {
    Platform { default_user: AuthUser },
    Tokens(Arc<dyn TokenVerifier>),
}

/// Shared authenticator used by both the upgrade handler and HTTP middleware.
pub struct Authenticator {
    mode: AuthMode,
}

impl Authenticator {
    pub fn platform(default_user: &str) -> Self {
        Self {
            mode: AuthMode::Platform {
                default_user: AuthUser::named(default_user),
            },
        }
    }

    pub fn with_verifier(verifier: Arc<dyn TokenVerifier>) -> Self {
        Self {
            mode: AuthMode::Tokens(verifier),
        }
    }

    pub fn from_config(config: &AuthFileConfig) -> Self {
        match config.mode {
            AuthModeKind::Platform => Self::platform(&config.default_user),
            AuthModeKind::Tokens => {
                Self::with_verifier(Arc::new(StaticTokenVerifier::new(&config.tokens)))
            }
        }
    }

    /// Resolve the caller of a request.
    pub async fn authenticate(
        &self,
        headers: &HeaderMap,
        query_token: Option<&str>,
    ) -> Result<AuthUser, AuthError> {
        match &self.mode {
            AuthMode::Platform { default_user } => Ok(default_user.clone()),
            AuthMode::Tokens(verifier) => {
                let token = extract_token(headers, query_token).ok_or(AuthError::MissingToken)?;
                match verifier.verify(&token).await {
                    Some(user) => {
                        debug!("Authenticated {}", user.username);
                        Ok(user)
                    }
                    None => {
                        warn!("Rejected invalid token");
                        Err(AuthError::InvalidToken)
                    }
                }
            }
        }
    }
}

/// Query parameter wins over the header; browsers cannot set headers on a
/// WebSocket handshake.
pub fn extract_token(headers: &HeaderMap, query_token: Option<&str>) -> Option<String> {
    if let Some(token) = query_token.filter(|t| !t.is_empty()) {
        return Some(token.to_string());
    }
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

fn query_token(query: Option<&str>) -> Option<String> {
    query?.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == "token").then(|| value.to_string())
    })
}

// =============================================================================
// Auth Middleware
// =============================================================================

/// Auth middleware for HTTP API routes. Inserts [`AuthUser`] into request
/// extensions on success.
pub async fn auth_middleware(
    State(authenticator): State<Arc<Authenticator>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let token = query_token(request.uri().query());
    match authenticator
        .authenticate(request.headers(), token.as_deref())
        .await
    {
        Ok(user) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}
