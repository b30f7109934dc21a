use crate::live::{ContextEvent, GitEvent, LiveHandle};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

/// One entry of `.git/logs/HEAD`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReflogEntry {
    pub old_hash: String,
    pub new_hash: String,
    pub message: String,
}

/// Get the current branch of the repository at `dir`
pub fn current_branch(dir: &Path) -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--abbrev-ref", "HEAD"])
        .current_dir(dir)
        .output()
        .ok()?;

    if output.status.success() {
        Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        None
    }
}

/// Parse a reflog line: `<old> <new> <name> <<email>> <unix-time> <tz>\t<message>`
pub fn parse_reflog_line(line: &str) -> Option<ReflogEntry> {
    let (header, message) = line.split_once('\t')?;
    let mut parts = header.split(' ');
    let old_hash = parts.next()?.to_string();
    let new_hash = parts.next()?.to_string();

    // the identity may contain spaces, so check the trailing time and zone
    let mut tail = header.rsplitn(3, ' ');
    let tz = tail.next()?;
    let time = tail.next()?;
    if !(tz.starts_with('+') || tz.starts_with('-')) || time.parse::<i64>().is_err() {
        return None;
    }

    Some(ReflogEntry {
        old_hash,
        new_hash,
        message: message.trim().to_string(),
    })
}

/// Last well-formed entry of a reflog file's contents
pub fn last_reflog_entry(contents: &str) -> Option<ReflogEntry> {
    contents
        .lines()
        .rev()
        .filter(|l| !l.trim().is_empty())
        .find_map(parse_reflog_line)
}

/// Polls `.git/logs/HEAD` and emits a `git` event for every new HEAD entry.
pub struct GitObserver {
    reflog: PathBuf,
    interval: Duration,
    last_hash: Option<String>,
}

impl GitObserver {
    pub fn new(project_root: &Path, interval: Duration) -> Self {
        Self {
            reflog: project_root.join(".git").join("logs").join("HEAD"),
            interval,
            last_hash: None,
        }
    }

    /// Check the reflog once. The first successful read only records the
    /// current HEAD so commits made before the observer started are not replayed.
    pub fn poll(&mut self) -> Option<GitEvent> {
        let contents = std::fs::read_to_string(&self.reflog).ok()?;
        let entry = last_reflog_entry(&contents)?;

        let previous = self.last_hash.replace(entry.new_hash.clone());
        match previous {
            None => None,
            Some(prev) if prev == entry.new_hash => None,
            Some(_) => Some(GitEvent {
                message: entry.message,
                hash: Some(entry.new_hash),
            }),
        }
    }

    /// Run until the live manager stops accepting events.
    pub async fn run(mut self, handle: LiveHandle) {
        if !self.reflog.exists() {
            log::info!("Waiting for git initialization at {}", self.reflog.display());
        }

        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            if let Some(event) = self.poll() {
                log::info!("Detected new commit: {}", event.message);
                if handle.send(ContextEvent::Git(event)).await.is_err() {
                    break;
                }
            }
        }
    }
}
