//! Non-destructive updates. Each takes a document by reference and returns the
//! next one with `updatedAt` refreshed; the input is never modified.
//!
//! No deduplication happens here: the live path records every event as
//! history and only the merge engine collapses entries by key.

use crate::session::{touch_time, ErrorRecord, FileChange, SessionDocument, TaskStatus};
use crate::validate::{validate, ValidationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Partial update for `currentTask`. Absent fields are left as they are.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

fn next(doc: &SessionDocument) -> Result<(SessionDocument, DateTime<Utc>), ValidationError> {
    validate(doc).into_result()?;
    let now = touch_time(doc);
    let mut updated = doc.clone();
    updated.updated_at = now;
    Ok((updated, now))
}

pub fn update_task(
    doc: &SessionDocument,
    update: TaskUpdate,
) -> Result<SessionDocument, ValidationError> {
    let (mut updated, now) = next(doc)?;
    let task = &mut updated.current_task;
    if let Some(intent) = update.intent {
        task.intent = intent;
    }
    if let Some(status) = update.status {
        task.status = status;
    }
    if let Some(started_at) = update.started_at {
        task.started_at = started_at;
    }
    task.last_updated_at = now;
    Ok(updated)
}

pub fn add_file_change(
    doc: &SessionDocument,
    change: FileChange,
) -> Result<SessionDocument, ValidationError> {
    let (mut updated, _) = next(doc)?;
    updated.files_modified.push(change);
    Ok(updated)
}

pub fn add_decision(
    doc: &SessionDocument,
    decision: impl Into<String>,
) -> Result<SessionDocument, ValidationError> {
    let (mut updated, _) = next(doc)?;
    updated.decisions.push(decision.into());
    Ok(updated)
}

pub fn add_next_step(
    doc: &SessionDocument,
    step: impl Into<String>,
) -> Result<SessionDocument, ValidationError> {
    let (mut updated, _) = next(doc)?;
    updated.next_steps.push(step.into());
    Ok(updated)
}

pub fn add_error(
    doc: &SessionDocument,
    error: ErrorRecord,
) -> Result<SessionDocument, ValidationError> {
    let (mut updated, _) = next(doc)?;
    updated.errors_encountered.push(error);
    Ok(updated)
}

/// Mark errors with exactly this message as resolved. Unknown messages are a no-op.
pub fn resolve_error(
    doc: &SessionDocument,
    message: &str,
) -> Result<SessionDocument, ValidationError> {
    let (mut updated, _) = next(doc)?;
    for error in updated
        .errors_encountered
        .iter_mut()
        .filter(|e| e.message == message)
    {
        error.resolved = true;
    }
    Ok(updated)
}
