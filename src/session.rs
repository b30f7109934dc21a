use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One coding session's shared state: intent, decisions, changes and errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDocument {
    pub session_id: String,
    pub project_root: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub project_metadata: ProjectMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<SessionContext>,
    pub current_task: CurrentTask,
    pub files_modified: Vec<FileChange>,
    #[serde(default)]
    pub decisions: Vec<String>,
    #[serde(default)]
    pub errors_encountered: Vec<ErrorRecord>,
    #[serde(default)]
    pub next_steps: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_history_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_context: Option<serde_json::Value>,
    #[serde(default)]
    pub sources: Vec<Source>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectMetadata {
    pub name: String,
    #[serde(default)]
    pub tech_stack: Vec<String>,
    #[serde(default)]
    pub entry_points: Vec<String>,
}

/// Environment facts captured at init. Unknown keys are kept as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentTask {
    pub intent: String,
    pub status: TaskStatus,
    pub started_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    NotStarted,
    InProgress,
    Blocked,
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::NotStarted => "not_started",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Done => "done",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChange {
    pub path: String,
    pub change_type: ChangeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub important: Option<bool>,
}

impl FileChange {
    pub fn new(path: impl Into<String>, change_type: ChangeType) -> Self {
        Self {
            path: path.into(),
            change_type,
            summary: None,
            important: None,
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Created,
    Modified,
    Deleted,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Created => "created",
            ChangeType::Modified => "modified",
            ChangeType::Deleted => "deleted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default)]
    pub resolved: bool,
}

impl ErrorRecord {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            file: None,
            line: None,
            resolved: false,
        }
    }
}

/// Provenance entry: which tool or process produced an update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub tool: SourceTool,
    pub note: String,
}

impl Source {
    pub fn other(note: impl Into<String>) -> Self {
        Self {
            tool: SourceTool::Other,
            note: note.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceTool {
    Cursor,
    Gemini,
    #[serde(rename = "chatgpt")]
    ChatGpt,
    Claude,
    Other,
}

/// Build a fresh document: task not started, every list empty, one provenance entry.
pub fn create_empty_session(
    session_id: impl Into<String>,
    project_root: impl Into<String>,
    metadata: ProjectMetadata,
) -> SessionDocument {
    let now = Utc::now();
    SessionDocument {
        session_id: session_id.into(),
        project_root: project_root.into(),
        created_at: now,
        updated_at: now,
        project_metadata: metadata,
        context: None,
        current_task: CurrentTask {
            intent: "Initial setup".to_string(),
            status: TaskStatus::NotStarted,
            started_at: now,
            last_updated_at: now,
        },
        files_modified: Vec::new(),
        decisions: Vec::new(),
        errors_encountered: Vec::new(),
        next_steps: Vec::new(),
        chat_history_summary: None,
        chat_context: None,
        sources: vec![Source::other("Initialized via acss")],
    }
}

/// Generate a new opaque session identifier
pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Current time, clamped so a document's `updatedAt` never moves backwards.
pub(crate) fn touch_time(doc: &SessionDocument) -> DateTime<Utc> {
    Utc::now().max(doc.updated_at)
}
