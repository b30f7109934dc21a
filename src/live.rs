//! Single-writer live session state.
//!
//! Producers only enqueue [`ContextEvent`]s through a [`LiveHandle`]; one
//! consumer task owns the [`LiveContextManager`] and folds events in arrival
//! order, one at a time, persisting after every successful fold.

use crate::config::LiveConfig;
use crate::mutate::{add_decision, add_file_change};
use crate::session::{
    touch_time, ChangeType, CurrentTask, ErrorRecord, FileChange, SessionContext, SessionDocument,
};
use crate::store;
use crate::validate::ValidationError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

const PERSIST_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum ContextEvent {
    File(FileEvent),
    Git(GitEvent),
    Chat(SessionPatch),
}

impl ContextEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ContextEvent::File(_) => "file",
            ContextEvent::Git(_) => "git",
            ContextEvent::Chat(_) => "chat",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEvent {
    pub path: String,
    pub change_type: ChangeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitEvent {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

/// Partial document sent by the chat importer. Only these fields can be
/// replaced; identity fields are not representable here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task: Option<CurrentTask>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files_modified: Option<Vec<FileChange>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decisions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors_encountered: Option<Vec<ErrorRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_steps: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_history_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_context: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<SessionContext>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PatchError {
    #[error("patch carries no fields")]
    Empty,
    #[error("currentTask.intent must not be empty")]
    EmptyIntent,
    #[error("filesModified[{0}] has an empty path")]
    EmptyPath(usize),
    #[error("errorsEncountered[{0}] has an empty message")]
    EmptyMessage(usize),
}

impl SessionPatch {
    pub fn is_empty(&self) -> bool {
        *self == SessionPatch::default()
    }

    pub fn validate(&self) -> Result<(), PatchError> {
        if self.is_empty() {
            return Err(PatchError::Empty);
        }
        if let Some(task) = &self.current_task {
            if task.intent.trim().is_empty() {
                return Err(PatchError::EmptyIntent);
            }
        }
        if let Some(files) = &self.files_modified {
            if let Some(i) = files.iter().position(|f| f.path.trim().is_empty()) {
                return Err(PatchError::EmptyPath(i));
            }
        }
        if let Some(errors) = &self.errors_encountered {
            if let Some(i) = errors.iter().position(|e| e.message.trim().is_empty()) {
                return Err(PatchError::EmptyMessage(i));
            }
        }
        Ok(())
    }

    /// Shallow merge: every present field replaces the document's field.
    fn apply(self, doc: &SessionDocument) -> SessionDocument {
        let mut next = doc.clone();
        if let Some(task) = self.current_task {
            next.current_task = task;
        }
        if let Some(files) = self.files_modified {
            next.files_modified = files;
        }
        if let Some(decisions) = self.decisions {
            next.decisions = decisions;
        }
        if let Some(errors) = self.errors_encountered {
            next.errors_encountered = errors;
        }
        if let Some(steps) = self.next_steps {
            next.next_steps = steps;
        }
        if let Some(summary) = self.chat_history_summary {
            next.chat_history_summary = Some(summary);
        }
        if let Some(chat_context) = self.chat_context {
            next.chat_context = Some(chat_context);
        }
        if let Some(context) = self.context {
            next.context = Some(context);
        }
        next.updated_at = touch_time(doc);
        next
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LiveError {
    #[error("malformed event: {0}")]
    Malformed(String),
    #[error("invalid chat patch: {0}")]
    Patch(#[from] PatchError),
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error("persisting session failed after {attempts} attempt(s): {source}")]
    Persist {
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },
    #[error("live context manager has stopped")]
    Closed,
}

/// Durable storage for folded documents.
#[async_trait]
pub trait SessionSink: Send + Sync {
    async fn persist(&self, doc: &SessionDocument) -> anyhow::Result<()>;
}

/// Writes each folded document to a session file, validated and pretty-printed.
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SessionSink for FileSink {
    async fn persist(&self, doc: &SessionDocument) -> anyhow::Result<()> {
        store::save_session(&self.path, doc)
    }
}

pub struct LiveContextManager<S> {
    session: SessionDocument,
    sink: S,
    snapshot: watch::Sender<SessionDocument>,
    config: LiveConfig,
}

impl<S: SessionSink> LiveContextManager<S> {
    pub fn new(initial: SessionDocument, sink: S, config: LiveConfig) -> Self {
        let (snapshot, _) = watch::channel(initial.clone());
        Self {
            session: initial,
            sink,
            snapshot,
            config,
        }
    }

    pub fn session(&self) -> &SessionDocument {
        &self.session
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionDocument> {
        self.snapshot.subscribe()
    }

    /// Fold one event and persist the result.
    ///
    /// A failed fold leaves the document untouched. A failed persist keeps the
    /// folded document in memory and reports the error.
    pub async fn handle_event(&mut self, event: ContextEvent) -> Result<(), LiveError> {
        log::debug!("Processing {} event", event.kind());

        let next = fold(&self.session, event)?;
        self.session = next;
        self.snapshot.send_replace(self.session.clone());

        self.persist().await
    }

    /// Parse and fold a JSON-encoded event.
    pub async fn handle_raw(&mut self, raw: &str) -> Result<(), LiveError> {
        let event: ContextEvent =
            serde_json::from_str(raw).map_err(|e| LiveError::Malformed(e.to_string()))?;
        self.handle_event(event).await
    }

    /// Retry persisting the current document, backing off linearly between attempts.
    pub async fn persist(&self) -> Result<(), LiveError> {
        let attempts = self.config.persist_retries + 1;
        let mut last_error = None;
        for attempt in 1..=attempts {
            match self.sink.persist(&self.session).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    log::warn!("Persist attempt {}/{} failed: {:#}", attempt, attempts, e);
                    last_error = Some(e);
                }
            }
            if attempt < attempts {
                tokio::time::sleep(PERSIST_BACKOFF * attempt).await;
            }
        }
        Err(LiveError::Persist {
            attempts,
            source: last_error.unwrap_or_else(|| anyhow::anyhow!("no persist attempts made")),
        })
    }
}

impl<S: SessionSink + 'static> LiveContextManager<S> {
    /// Move the manager into its own task behind a bounded queue.
    ///
    /// The task ends once every [`LiveHandle`] is dropped and yields the final
    /// document.
    pub fn spawn(self) -> (LiveHandle, JoinHandle<SessionDocument>) {
        let (tx, rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let handle = LiveHandle {
            tx,
            snapshot: self.subscribe(),
        };
        let task = tokio::spawn(self.run(rx));
        (handle, task)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<ContextEvent>) -> SessionDocument {
        while let Some(event) = rx.recv().await {
            let kind = event.kind();
            if let Err(e) = self.handle_event(event).await {
                log::error!("Failed to apply {} event: {}", kind, e);
            }
        }
        log::info!("Live context loop stopped for session {}", self.session.session_id);
        self.session
    }
}

fn fold(doc: &SessionDocument, event: ContextEvent) -> Result<SessionDocument, LiveError> {
    match event {
        ContextEvent::File(file) => {
            if file.path.trim().is_empty() {
                return Err(LiveError::Malformed("file event has an empty path".to_string()));
            }
            Ok(add_file_change(doc, FileChange::new(file.path, file.change_type))?)
        }
        ContextEvent::Git(git) => {
            if git.message.trim().is_empty() {
                return Err(LiveError::Malformed("git event has an empty message".to_string()));
            }
            Ok(add_decision(doc, format!("Git commit: {}", git.message))?)
        }
        ContextEvent::Chat(patch) => {
            patch.validate()?;
            crate::validate::validate(doc).into_result()?;
            Ok(patch.apply(doc))
        }
    }
}

/// Producer side of a spawned manager. Cheap to clone.
#[derive(Clone)]
pub struct LiveHandle {
    tx: mpsc::Sender<ContextEvent>,
    snapshot: watch::Receiver<SessionDocument>,
}

impl LiveHandle {
    /// Enqueue an event, waiting while the queue is full.
    pub async fn send(&self, event: ContextEvent) -> Result<(), LiveError> {
        self.tx.send(event).await.map_err(|_| LiveError::Closed)
    }

    /// Enqueue from a non-async thread, e.g. a file watcher callback.
    pub fn blocking_send(&self, event: ContextEvent) -> Result<(), LiveError> {
        self.tx.blocking_send(event).map_err(|_| LiveError::Closed)
    }

    pub fn snapshot(&self) -> SessionDocument {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionDocument> {
        self.snapshot.clone()
    }
}
