//! Deterministic N-way merge of independently evolved session documents.
//!
//! Input order is precedence: "later" always means a document that appears
//! later in the slice. The first document supplies identity and metadata.

use crate::session::{ChangeType, ErrorRecord, FileChange, SessionDocument};
use chrono::Utc;
use std::collections::{HashMap, HashSet};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MergeError {
    #[error("No sessions to merge")]
    EmptyInput,
}

pub fn merge(docs: &[SessionDocument]) -> Result<SessionDocument, MergeError> {
    let (base, rest) = docs.split_first().ok_or(MergeError::EmptyInput)?;
    if rest.is_empty() {
        return Ok(base.clone());
    }

    let mut current_task = &base.current_task;
    for doc in rest {
        if doc.current_task.last_updated_at > current_task.last_updated_at {
            current_task = &doc.current_task;
        }
    }

    let mut files = KeyedUnion::default();
    let mut file_doc_counts: HashMap<(String, ChangeType), usize> = HashMap::new();
    let mut errors = KeyedUnion::default();
    let mut decisions = OrderedSet::default();
    let mut next_steps = OrderedSet::default();
    let mut sources = Vec::new();

    for doc in docs {
        let mut seen_here = HashSet::new();
        for change in &doc.files_modified {
            let key = (change.path.clone(), change.change_type);
            if seen_here.insert(key.clone()) {
                *file_doc_counts.entry(key.clone()).or_insert(0) += 1;
            }
            files.insert(key, change.clone());
        }
        for error in &doc.errors_encountered {
            errors.insert(error.message.clone(), error.clone());
        }
        decisions.extend(&doc.decisions);
        next_steps.extend(&doc.next_steps);
        sources.extend(doc.sources.iter().cloned());
    }

    let files_modified: Vec<FileChange> = files
        .into_entries()
        .map(|(key, mut change)| {
            let documents = file_doc_counts.get(&key).copied().unwrap_or(0);
            change.important = (documents > 1).then_some(true);
            change
        })
        .collect();
    let errors_encountered: Vec<ErrorRecord> = errors.into_entries().map(|(_, e)| e).collect();

    let now = Utc::now();
    Ok(SessionDocument {
        session_id: base.session_id.clone(),
        project_root: base.project_root.clone(),
        created_at: base.created_at,
        updated_at: now,
        project_metadata: base.project_metadata.clone(),
        context: base.context.clone(),
        current_task: current_task.clone(),
        files_modified,
        decisions: decisions.into_vec(),
        errors_encountered,
        next_steps: next_steps.into_vec(),
        chat_history_summary: base.chat_history_summary.clone(),
        chat_context: base.chat_context.clone(),
        sources,
    })
}

/// Keeps each key at its first-seen position while the latest value wins.
struct KeyedUnion<K, V> {
    index: HashMap<K, usize>,
    entries: Vec<(K, V)>,
}

impl<K, V> Default for KeyedUnion<K, V> {
    fn default() -> Self {
        Self {
            index: HashMap::new(),
            entries: Vec::new(),
        }
    }
}

impl<K: std::hash::Hash + Eq + Clone, V> KeyedUnion<K, V> {
    fn insert(&mut self, key: K, value: V) {
        match self.index.get(&key) {
            Some(&pos) => self.entries[pos].1 = value,
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, value));
            }
        }
    }

    fn into_entries(self) -> impl Iterator<Item = (K, V)> {
        self.entries.into_iter()
    }
}

#[derive(Default)]
struct OrderedSet {
    seen: HashSet<String>,
    items: Vec<String>,
}

impl OrderedSet {
    fn extend(&mut self, items: &[String]) {
        for item in items {
            if self.seen.insert(item.clone()) {
                self.items.push(item.clone());
            }
        }
    }

    fn into_vec(self) -> Vec<String> {
        self.items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{create_empty_session, ProjectMetadata, Source};
    use chrono::{DateTime, TimeZone};

    fn session(id: &str, name: &str) -> SessionDocument {
        create_empty_session(
            id,
            "/test/project",
            ProjectMetadata {
                name: name.to_string(),
                tech_stack: vec!["TypeScript".to_string()],
                entry_points: vec!["src/index.ts".to_string()],
            },
        )
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 14, hour, 0, 0).unwrap()
    }

    #[test]
    fn empty_input_is_an_error() {
        assert_eq!(merge(&[]), Err(MergeError::EmptyInput));
    }

    #[test]
    fn single_document_is_returned_unchanged() {
        let mut doc = session("s1", "First");
        doc.decisions = vec!["D1".into(), "D1".into()];
        assert_eq!(merge(&[doc.clone()]).unwrap(), doc);
    }

    #[test]
    fn identity_and_metadata_come_from_first_document() {
        let s1 = session("s1", "First");
        let s2 = session("s2", "Second");
        let merged = merge(&[s1.clone(), s2]).unwrap();
        assert_eq!(merged.project_metadata.name, "First");
        assert_eq!(merged.session_id, "s1");
        assert_eq!(merged.created_at, s1.created_at);
    }

    #[test]
    fn most_recent_task_wins() {
        let mut s1 = session("s1", "p");
        let mut s2 = session("s2", "p");
        s1.current_task.last_updated_at = at(1);
        s1.current_task.intent = "Older Intent".into();
        s2.current_task.last_updated_at = at(2);
        s2.current_task.intent = "Newer Intent".into();

        let merged = merge(&[s1, s2]).unwrap();
        assert_eq!(merged.current_task.intent, "Newer Intent");
        assert_eq!(merged.current_task.last_updated_at, at(2));
    }

    #[test]
    fn task_ties_keep_earliest_seen() {
        let mut s1 = session("s1", "p");
        let mut s2 = session("s2", "p");
        s1.current_task.last_updated_at = at(3);
        s1.current_task.intent = "first".into();
        s2.current_task.last_updated_at = at(3);
        s2.current_task.intent = "second".into();

        assert_eq!(merge(&[s1, s2]).unwrap().current_task.intent, "first");
    }

    #[test]
    fn files_dedupe_by_path_and_change_type() {
        let mut s1 = session("s1", "p");
        let mut s2 = session("s2", "p");
        s1.files_modified
            .push(FileChange::new("file1.ts", ChangeType::Modified).with_summary("A"));
        s2.files_modified
            .push(FileChange::new("file1.ts", ChangeType::Modified).with_summary("B"));
        s2.files_modified
            .push(FileChange::new("file1.ts", ChangeType::Created).with_summary("C"));

        let merged = merge(&[s1, s2]).unwrap();
        assert_eq!(merged.files_modified.len(), 2);

        let modified = &merged.files_modified[0];
        assert_eq!(modified.change_type, ChangeType::Modified);
        assert_eq!(modified.summary.as_deref(), Some("B"));
        assert_eq!(modified.important, Some(true));

        let created = &merged.files_modified[1];
        assert_eq!(created.summary.as_deref(), Some("C"));
        assert_eq!(created.important, None);
    }

    #[test]
    fn importance_counts_documents_not_occurrences() {
        let mut s1 = session("s1", "p");
        let s2 = session("s2", "p");
        // same key twice within one document is still a single document
        s1.files_modified
            .push(FileChange::new("a.rs", ChangeType::Modified));
        s1.files_modified
            .push(FileChange::new("a.rs", ChangeType::Modified));

        let merged = merge(&[s1, s2]).unwrap();
        assert_eq!(merged.files_modified.len(), 1);
        assert_eq!(merged.files_modified[0].important, None);
    }

    #[test]
    fn importance_is_unset_for_keys_in_one_document() {
        let mut a = session("a", "p");
        let mut b = session("b", "p");
        let mut c = session("c", "p");
        a.files_modified
            .push(FileChange::new("shared.ts", ChangeType::Modified));
        b.files_modified
            .push(FileChange::new("shared.ts", ChangeType::Modified));
        let mut flagged = FileChange::new("own.ts", ChangeType::Created);
        flagged.important = Some(false);
        c.files_modified.push(flagged);

        let first = merge(&[a, b]).unwrap();
        assert_eq!(first.files_modified[0].important, Some(true));

        let again = merge(&[first, c]).unwrap();
        assert_eq!(again.files_modified.len(), 2);
        assert!(again.files_modified.iter().all(|f| f.important.is_none()));
    }

    #[test]
    fn set_fields_are_order_independent_across_three_documents() {
        let mut a = session("a", "p");
        let mut b = session("b", "p");
        let mut c = session("c", "p");
        a.decisions = vec!["D1".into(), "D2".into()];
        b.decisions = vec!["D2".into(), "D3".into()];
        c.decisions = vec!["D3".into(), "D4".into(), "D1".into()];
        a.next_steps = vec!["N1".into()];
        b.next_steps = vec!["N1".into(), "N2".into()];
        c.next_steps = vec!["N3".into()];
        a.files_modified
            .push(FileChange::new("x.rs", ChangeType::Modified));
        b.files_modified
            .push(FileChange::new("x.rs", ChangeType::Modified));
        c.files_modified
            .push(FileChange::new("x.rs", ChangeType::Deleted));

        let orders = [
            [&a, &b, &c],
            [&a, &c, &b],
            [&b, &a, &c],
            [&b, &c, &a],
            [&c, &a, &b],
            [&c, &b, &a],
        ];
        for order in orders {
            let docs: Vec<SessionDocument> = order.iter().map(|d| (*d).clone()).collect();
            let merged = merge(&docs).unwrap();

            let decisions: HashSet<&str> = merged.decisions.iter().map(String::as_str).collect();
            assert_eq!(decisions.len(), merged.decisions.len());
            assert_eq!(decisions, HashSet::from(["D1", "D2", "D3", "D4"]));

            let steps: HashSet<&str> = merged.next_steps.iter().map(String::as_str).collect();
            assert_eq!(steps.len(), merged.next_steps.len());
            assert_eq!(steps, HashSet::from(["N1", "N2", "N3"]));

            let keys: HashSet<(&str, ChangeType)> = merged
                .files_modified
                .iter()
                .map(|f| (f.path.as_str(), f.change_type))
                .collect();
            assert_eq!(keys.len(), merged.files_modified.len());
            assert_eq!(keys.len(), 2);
        }
    }

    #[test]
    fn importance_is_keyed_by_change_type() {
        let mut s1 = session("s1", "p");
        let mut s2 = session("s2", "p");
        s1.files_modified
            .push(FileChange::new("shared.ts", ChangeType::Modified));
        s2.files_modified
            .push(FileChange::new("shared.ts", ChangeType::Created));

        let merged = merge(&[s1, s2]).unwrap();
        assert!(merged.files_modified.iter().all(|f| f.important.is_none()));
    }

    #[test]
    fn set_fields_union_in_first_seen_order() {
        let mut doc1 = session("s1", "p");
        let mut doc2 = session("s2", "p");
        doc1.decisions = vec!["D1".into(), "D2".into()];
        doc2.decisions = vec!["D2".into(), "D3".into()];
        doc1.next_steps = vec!["Step 1".into()];
        doc2.next_steps = vec!["Step 1".into(), "Step 2".into()];

        let merged = merge(&[doc1, doc2]).unwrap();
        assert_eq!(merged.decisions, vec!["D1", "D2", "D3"]);
        assert_eq!(merged.next_steps, vec!["Step 1", "Step 2"]);
    }

    #[test]
    fn later_error_resolution_wins() {
        let mut s1 = session("s1", "p");
        let mut s2 = session("s2", "p");
        s1.errors_encountered.push(ErrorRecord::new("Err1"));
        let mut resolved = ErrorRecord::new("Err1");
        resolved.resolved = true;
        s2.errors_encountered.push(resolved);
        s2.errors_encountered.push(ErrorRecord::new("Err2"));

        let merged = merge(&[s1.clone(), s2.clone()]).unwrap();
        assert_eq!(merged.errors_encountered.len(), 2);
        assert_eq!(merged.errors_encountered[0].message, "Err1");
        assert!(merged.errors_encountered[0].resolved);

        let reversed = merge(&[s2, s1]).unwrap();
        assert!(!reversed.errors_encountered[0].resolved);
    }

    #[test]
    fn sources_are_concatenated_without_dedup() {
        let s1 = session("s1", "p");
        let mut s2 = session("s2", "p");
        s2.sources.push(Source::other("imported"));

        let merged = merge(&[s1, s2]).unwrap();
        let notes: Vec<&str> = merged.sources.iter().map(|s| s.note.as_str()).collect();
        assert_eq!(
            notes,
            vec!["Initialized via acss", "Initialized via acss", "imported"]
        );
    }

    #[test]
    fn inputs_are_left_untouched() {
        let mut s1 = session("s1", "p");
        let mut s2 = session("s2", "p");
        s1.files_modified
            .push(FileChange::new("x", ChangeType::Deleted));
        s2.files_modified
            .push(FileChange::new("x", ChangeType::Deleted));
        let before = (s1.clone(), s2.clone());

        let _ = merge(&[s1.clone(), s2.clone()]).unwrap();
        assert_eq!((s1, s2), before);
    }
}
