use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: i64,
    pub name: String,
    /// Absolute path of the repository checkout; agent runs use it as cwd
    pub repo_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: i64,
    pub project_id: i64,
    pub title: String,
    /// Per-task git worktree, when one has been created
    pub worktree_path: Option<String>,
    pub workflow_complete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: i64,
    pub name: String,
    /// Backend family the agent runs on, e.g. "claude"
    pub agent_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: i64,
    pub task_id: Option<i64>,
    pub agent_id: Option<i64>,
    /// Backend session id; set once the backend acknowledges the first query
    pub claude_session_id: Option<String>,
    pub triggered_by: String,
    pub created_at: i64,
}

/// Insert payload for a conversation created ahead of the first query.
#[derive(Debug, Clone)]
pub struct NewConversation {
    pub task_id: Option<i64>,
    pub agent_id: Option<i64>,
    pub triggered_by: String,
}

impl NewConversation {
    pub fn for_task(task_id: i64, agent_id: Option<i64>) -> Self {
        Self {
            task_id: Some(task_id),
            agent_id,
            triggered_by: "user".to_string(),
        }
    }

    #[cfg(test)]
    pub fn into_conversation(self, id: i64) -> Conversation {
        Conversation {
            id,
            task_id: self.task_id,
            agent_id: self.agent_id,
            claude_session_id: None,
            triggered_by: self.triggered_by,
            created_at: chrono::Utc::now().timestamp(),
        }
    }
}

impl Task {
    /// Directory agent processes should run in for this task.
    pub fn working_dir<'a>(&'a self, project: &'a Project) -> &'a str {
        self.worktree_path.as_deref().unwrap_or(&project.repo_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project() -> Project {
        Project {
            id: 1,
            name: "demo".into(),
            repo_path: "/repos/demo".into(),
        }
    }

    #[test]
    fn test_working_dir_prefers_worktree() {
        let mut task = Task {
            id: 5,
            project_id: 1,
            title: "t".into(),
            worktree_path: None,
            workflow_complete: false,
        };
        assert_eq!(task.working_dir(&project()), "/repos/demo");

        task.worktree_path = Some("/worktrees/task-5".into());
        assert_eq!(task.working_dir(&project()), "/worktrees/task-5");
    }

    #[test]
    fn test_new_conversation_defaults() {
        let conv = NewConversation::for_task(5, None).into_conversation(9);
        assert_eq!(conv.id, 9);
        assert_eq!(conv.task_id, Some(5));
        assert_eq!(conv.triggered_by, "user");
        assert!(conv.claude_session_id.is_none());
    }
}
