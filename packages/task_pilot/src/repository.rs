// Task store: the handful of reads and writes the session layer needs from
// the relational schema. Everything else (task CRUD, scheduling) lives
// outside this server.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use tracing::debug;

use crate::models::{Agent, Conversation, NewConversation, Project, Task};

/// Store operations used by the chat orchestrator.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn task(&self, id: i64) -> Result<Option<Task>>;
    async fn project(&self, id: i64) -> Result<Option<Project>>;
    async fn agent(&self, id: i64) -> Result<Option<Agent>>;
    async fn conversation(&self, id: i64) -> Result<Option<Conversation>>;
    async fn create_conversation(&self, new: &NewConversation) -> Result<Conversation>;
    async fn set_conversation_session(&self, id: i64, claude_session_id: &str) -> Result<()>;
}

#[derive(Clone)]
pub struct ConversationRepository {
    pub(crate) pool: SqlitePool,
}

impl ConversationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn conversation_from_row(r: &SqliteRow) -> Conversation {
    Conversation {
        id: r.get("id"),
        task_id: r.get("task_id"),
        agent_id: r.get("agent_id"),
        claude_session_id: r.get("claude_session_id"),
        triggered_by: r.get("triggered_by"),
        created_at: r.get("created_at"),
    }
}

#[async_trait]
impl TaskStore for ConversationRepository {
    async fn task(&self, id: i64) -> Result<Option<Task>> {
        let row = sqlx::query(
            "SELECT id, project_id, title, worktree_path, workflow_complete FROM tasks WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Task {
            id: r.get("id"),
            project_id: r.get("project_id"),
            title: r.get("title"),
            worktree_path: r.get("worktree_path"),
            workflow_complete: r.get::<i32, _>("workflow_complete") != 0,
        }))
    }

    async fn project(&self, id: i64) -> Result<Option<Project>> {
        let row = sqlx::query("SELECT id, name, repo_path FROM projects WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| Project {
            id: r.get("id"),
            name: r.get("name"),
            repo_path: r.get("repo_path"),
        }))
    }

    async fn agent(&self, id: i64) -> Result<Option<Agent>> {
        let row = sqlx::query("SELECT id, name, agent_type FROM agents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| Agent {
            id: r.get("id"),
            name: r.get("name"),
            agent_type: r.get("agent_type"),
        }))
    }

    async fn conversation(&self, id: i64) -> Result<Option<Conversation>> {
        let row = sqlx::query(
            r#"
            SELECT id, task_id, agent_id, claude_session_id, triggered_by, created_at
            FROM conversations
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(conversation_from_row))
    }

    async fn create_conversation(&self, new: &NewConversation) -> Result<Conversation> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "INSERT INTO conversations (task_id, agent_id, triggered_by) VALUES (?, ?, ?)",
        )
        .bind(new.task_id)
        .bind(new.agent_id)
        .bind(&new.triggered_by)
        .execute(&mut *tx)
        .await
        .context("Failed to create conversation")?;

        let row = sqlx::query(
            r#"
            SELECT id, task_id, agent_id, claude_session_id, triggered_by, created_at
            FROM conversations
            WHERE id = ?
            "#,
        )
        .bind(result.last_insert_rowid())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        let conversation = conversation_from_row(&row);
        debug!(
            "Created conversation {} for task {:?}",
            conversation.id, conversation.task_id
        );
        Ok(conversation)
    }

    async fn set_conversation_session(&self, id: i64, claude_session_id: &str) -> Result<()> {
        let result = sqlx::query("UPDATE conversations SET claude_session_id = ? WHERE id = ?")
            .bind(claude_session_id)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to update conversation session")?;

        if result.rows_affected() == 0 {
            anyhow::bail!("Conversation {} not found", id);
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use sqlx::sqlite::SqlitePoolOptions;

    use super::ConversationRepository;

    /// Fresh repository backed by an in-memory SQLite database.
    pub async fn test_repository() -> ConversationRepository {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create in-memory SQLite pool");

        crate::db::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&pool)
            .await
            .expect("Failed to enable foreign keys");

        ConversationRepository::new(pool)
    }

    impl ConversationRepository {
        pub async fn seed_project(&self, name: &str, repo_path: &str) -> i64 {
            sqlx::query("INSERT INTO projects (name, repo_path) VALUES (?, ?)")
                .bind(name)
                .bind(repo_path)
                .execute(&self.pool)
                .await
                .unwrap()
                .last_insert_rowid()
        }

        pub async fn seed_task(&self, project_id: i64, title: &str) -> i64 {
            sqlx::query("INSERT INTO tasks (project_id, title) VALUES (?, ?)")
                .bind(project_id)
                .bind(title)
                .execute(&self.pool)
                .await
                .unwrap()
                .last_insert_rowid()
        }

        pub async fn seed_agent(&self, name: &str, agent_type: &str) -> i64 {
            sqlx::query("INSERT INTO agents (name, agent_type) VALUES (?, ?)")
                .bind(name)
                .bind(agent_type)
                .execute(&self.pool)
                .await
                .unwrap()
                .last_insert_rowid()
        }

        pub async fn conversation_count(&self) -> i64 {
            sqlx::query_scalar("SELECT COUNT(*) FROM conversations")
                .fetch_one(&self.pool)
                .await
                .unwrap()
        }
    }
}
