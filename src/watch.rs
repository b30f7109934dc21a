use crate::live::{ContextEvent, FileEvent, LiveHandle};
use crate::session::ChangeType;
use anyhow::{Context, Result};
use chrono::Utc;
use notify::event::ModifyKind;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Component, Path, PathBuf};

/// Directory names never reported, in addition to anything starting with a dot.
const IGNORED_DIRS: [&str; 4] = ["node_modules", "target", "dist", "coverage"];

/// Whether a project-relative path should be ignored by the watcher
pub fn is_ignored(relative: &Path) -> bool {
    relative.components().any(|c| match c {
        Component::Normal(name) => {
            let name = name.to_string_lossy();
            name.starts_with('.') || IGNORED_DIRS.contains(&name.as_ref())
        }
        _ => false,
    })
}

/// Map a notify event kind to a session change type
pub fn change_type(kind: &EventKind) -> Option<ChangeType> {
    match kind {
        EventKind::Create(_) => Some(ChangeType::Created),
        EventKind::Modify(ModifyKind::Metadata(_)) => None,
        EventKind::Modify(_) => Some(ChangeType::Modified),
        EventKind::Remove(_) => Some(ChangeType::Deleted),
        _ => None,
    }
}

/// Turn one notify event into file events relative to `root`
pub fn file_events(root: &Path, event: &Event) -> Vec<FileEvent> {
    let Some(change_type) = change_type(&event.kind) else {
        return Vec::new();
    };

    event
        .paths
        .iter()
        .filter_map(|path| path.strip_prefix(root).ok())
        .filter(|relative| !relative.as_os_str().is_empty() && !is_ignored(relative))
        .map(|relative| FileEvent {
            path: relative.to_string_lossy().replace('\\', "/"),
            change_type,
            timestamp: Some(Utc::now()),
        })
        .collect()
}

/// Watch the project tree and enqueue a `file` event per change.
///
/// The returned watcher must be kept alive for events to keep flowing.
pub fn watch_files(project_root: &Path, handle: LiveHandle) -> Result<RecommendedWatcher> {
    let root: PathBuf = project_root
        .canonicalize()
        .unwrap_or_else(|_| project_root.to_path_buf());
    let callback_root = root.clone();

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for file_event in file_events(&callback_root, &event) {
                    log::debug!("{} {}", file_event.change_type.as_str(), file_event.path);
                    if handle.blocking_send(ContextEvent::File(file_event)).is_err() {
                        log::warn!("Live context manager stopped; dropping file event");
                        return;
                    }
                }
            }
            Err(e) => log::error!("File watcher error: {}", e),
        },
        Config::default(),
    )
    .context("Failed to create filesystem watcher")?;

    watcher
        .watch(&root, RecursiveMode::Recursive)
        .with_context(|| format!("Failed to watch project directory: {}", root.display()))?;

    log::info!("Watching {} for file changes", root.display());
    Ok(watcher)
}
