//! Completion notifications sent when an agent run for a task finishes.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use crate::auth::AuthUser;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionNotice {
    pub task_title: String,
    pub task_id: i64,
    pub conversation_id: i64,
    pub agent_type: String,
    pub workflow_complete: bool,
}

#[async_trait]
pub trait CompletionNotifier: Send + Sync {
    async fn notify(&self, user: &AuthUser, notice: &CompletionNotice) -> Result<()>;
}

/// Posts the notice as JSON to a configured URL.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WebhookPayload<'a> {
    user_id: &'a str,
    username: &'a str,
    #[serde(flatten)]
    notice: &'a CompletionNotice,
}

#[async_trait]
impl CompletionNotifier for WebhookNotifier {
    async fn notify(&self, user: &AuthUser, notice: &CompletionNotice) -> Result<()> {
        let payload = WebhookPayload {
            user_id: &user.user_id,
            username: &user.username,
            notice,
        };
        self.client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .context("Failed to send completion webhook")?
            .error_for_status()
            .context("Completion webhook rejected")?;
        Ok(())
    }
}

/// Fallback when no webhook is configured.
pub struct LogNotifier;

#[async_trait]
impl CompletionNotifier for LogNotifier {
    async fn notify(&self, user: &AuthUser, notice: &CompletionNotice) -> Result<()> {
        info!(
            user = %user.username,
            task_id = notice.task_id,
            conversation_id = notice.conversation_id,
            agent_type = %notice.agent_type,
            workflow_complete = notice.workflow_complete,
            "Agent run complete: {}",
            notice.task_title
        );
        Ok(())
    }
}
