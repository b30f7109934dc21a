use crate::session::SessionDocument;
use crate::validate::{validate, validate_value};
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub const ACSS_DIR: &str = ".acss";
pub const SESSION_FILE: &str = "session.acss.json";

/// Location of the session file for a project: `<root>/.acss/session.acss.json`
pub fn session_path(project_root: &Path) -> PathBuf {
    project_root.join(ACSS_DIR).join(SESSION_FILE)
}

/// Read a session file, reporting every missing required field before parsing
pub fn load_session(path: &Path) -> Result<SessionDocument> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read session file: {}", path.display()))?;

    let value: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse session file: {}", path.display()))?;

    validate_value(&value)
        .into_result()
        .with_context(|| format!("Invalid session file: {}", path.display()))?;

    let session: SessionDocument = serde_json::from_value(value)
        .with_context(|| format!("Failed to parse session file: {}", path.display()))?;

    Ok(session)
}

/// Validate, then write the session as 2-space indented JSON
pub fn save_session(path: &Path, session: &SessionDocument) -> Result<()> {
    validate(session).into_result()?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
    }

    let mut json = serde_json::to_string_pretty(session).context("Failed to serialize session")?;
    json.push('\n');

    fs::write(path, json)
        .with_context(|| format!("Failed to write session file: {}", path.display()))?;

    log::debug!("Wrote session to: {}", path.display());
    Ok(())
}
