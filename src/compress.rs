//! LLM-assisted session compression with a deterministic heuristic fallback.
//!
//! `Compressor::compress` is total: any transport, timeout, extraction or
//! parse failure on the LLM path degrades to the heuristic, and the path taken
//! is recorded in `sources`.

use crate::config::CompressionConfig;
use crate::llm::{LlmClient, LlmError};
use crate::session::{touch_time, SessionDocument, Source};
use crate::validate::{validate, ValidationError};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Fields the model output is never allowed to change.
const PROTECTED_FIELDS: [&str; 5] = [
    "sessionId",
    "projectRoot",
    "createdAt",
    "projectMetadata",
    "sources",
];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("no JSON object found in model output")]
    NotFound,
    #[error("model output is not valid JSON: {0}")]
    Malformed(String),
    #[error("model output is JSON but not an object")]
    NotAnObject,
}

/// A successfully parsed model response.
#[derive(Debug, PartialEq)]
pub enum Extracted {
    Object(Map<String, Value>),
    /// Parsed fine but carried no fields.
    Empty,
}

#[derive(Debug, thiserror::Error)]
enum CompressionFailure {
    #[error("LLM request failed: {0}")]
    Transport(#[from] LlmError),
    #[error("LLM request timed out after {0}s")]
    Timeout(u64),
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error("model returned an empty object")]
    Empty,
    #[error("model output does not fit the session schema: {0}")]
    Schema(#[from] serde_json::Error),
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

pub struct Compressor {
    llm: Arc<dyn LlmClient>,
    config: CompressionConfig,
}

impl Compressor {
    pub fn new(llm: Arc<dyn LlmClient>, config: CompressionConfig) -> Self {
        Self { llm, config }
    }

    pub async fn compress(&self, doc: &SessionDocument) -> SessionDocument {
        match self.compress_with_llm(doc).await {
            Ok(compressed) => {
                log::info!("Session {} compressed via {}", doc.session_id, self.llm.name());
                compressed
            }
            Err(e) => {
                log::warn!("LLM compression failed ({}); falling back to heuristic summary", e);
                heuristic_compress(doc, &self.config, &e.to_string())
            }
        }
    }

    async fn compress_with_llm(&self, doc: &SessionDocument) -> Result<SessionDocument, CompressionFailure> {
        let prompt = build_prompt(doc)?;
        let timeout = self.config.timeout();

        let text = tokio::time::timeout(timeout, self.llm.complete(&prompt))
            .await
            .map_err(|_| CompressionFailure::Timeout(timeout.as_secs()))??;

        let fields = match extract_json(&text)? {
            Extracted::Object(fields) => fields,
            Extracted::Empty => return Err(CompressionFailure::Empty),
        };

        let mut compressed = overlay(doc, fields)?;
        compressed.updated_at = touch_time(doc);
        compressed
            .sources
            .push(Source::other(format!("Compressed via LLM ({})", self.llm.name())));

        validate(&compressed).into_result()?;
        Ok(compressed)
    }
}

/// Convenience wrapper around [`Compressor`].
pub async fn compress(
    doc: &SessionDocument,
    llm: Arc<dyn LlmClient>,
    config: &CompressionConfig,
) -> SessionDocument {
    Compressor::new(llm, config.clone()).compress(doc).await
}

fn build_prompt(doc: &SessionDocument) -> Result<String, serde_json::Error> {
    let json = serde_json::to_string_pretty(doc)?;
    Ok(format!(
        "You are compressing an AI coding session state for later handoff.\n\
         \n\
         Input JSON:\n\
         {}\n\
         \n\
         Task:\n\
         - Reduce the length by ~70% while preserving:\n\
         \x20 - currentTask.intent\n\
         \x20 - key decisions\n\
         \x20 - critical (unresolved) errors\n\
         \x20 - nextSteps\n\
         - Remove trivial details and redundant phrasing.\n\
         - Output valid JSON in the same structure and with the same field names.\n\
         \n\
         Output ONLY the compressed JSON.",
        json
    ))
}

/// Apply the model's top-level fields to the original, keeping identity and provenance.
fn overlay(doc: &SessionDocument, fields: Map<String, Value>) -> Result<SessionDocument, serde_json::Error> {
    let mut base = match serde_json::to_value(doc)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    let protected: Vec<(String, Option<Value>)> = PROTECTED_FIELDS
        .iter()
        .map(|key| (key.to_string(), base.get(*key).cloned()))
        .collect();

    for (key, value) in fields {
        base.insert(key, value);
    }
    for (key, value) in protected {
        match value {
            Some(v) => base.insert(key, v),
            None => base.remove(&key),
        };
    }

    serde_json::from_value(Value::Object(base))
}

/// Deterministic size reduction. In-memory only; cannot fail.
pub fn heuristic_compress(doc: &SessionDocument, config: &CompressionConfig, reason: &str) -> SessionDocument {
    let mut compressed = doc.clone();
    compressed.updated_at = touch_time(doc);

    let skip = compressed.decisions.len().saturating_sub(config.max_decisions);
    compressed.decisions.drain(..skip);
    compressed.errors_encountered.retain(|e| !e.resolved);
    compressed.next_steps.truncate(config.max_next_steps);

    compressed
        .sources
        .push(Source::other(format!("Compressed via heuristic fallback ({})", reason)));
    compressed
}

/// Best-effort extraction of a JSON object from free-form model output.
///
/// Tries a fenced code block first, then the first balanced `{...}` span,
/// then the whole trimmed text.
pub fn extract_json(text: &str) -> Result<Extracted, ExtractError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ExtractError::NotFound);
    }

    let candidate = match extract_from_code_fence(trimmed) {
        Some(fenced) => extract_by_brace_matching(fenced).unwrap_or(fenced),
        None => extract_by_brace_matching(trimmed).unwrap_or(trimmed),
    };

    if !candidate.trim_start().starts_with('{') && !candidate.trim_start().starts_with('[') {
        return Err(ExtractError::NotFound);
    }

    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(map)) if map.is_empty() => Ok(Extracted::Empty),
        Ok(Value::Object(map)) => Ok(Extracted::Object(map)),
        Ok(_) => Err(ExtractError::NotAnObject),
        Err(e) => Err(ExtractError::Malformed(e.to_string())),
    }
}

fn extract_from_code_fence(s: &str) -> Option<&str> {
    let open = s.find("```")?;
    let after_ticks = &s[open + 3..];
    // skip the info string (e.g. "json") up to the end of the fence line
    let body_start = after_ticks.find('\n')? + 1;
    let body = &after_ticks[body_start..];
    let close = body.find("```")?;
    Some(body[..close].trim())
}

fn extract_by_brace_matching(s: &str) -> Option<&str> {
    let bytes = s.as_bytes();
    let start = bytes.iter().position(|&b| b == b'{')?;

    let mut depth: i32 = 0;
    let mut in_string = false;
    let mut i = start;

    while i < bytes.len() {
        let b = bytes[i];

        if in_string {
            if b == b'\\' {
                i += 2;
                continue;
            }
            if b == b'"' {
                in_string = false;
            }
        } else {
            match b {
                b'"' => in_string = true,
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(&s[start..=i]);
                    }
                }
                _ => {}
            }
        }
        i += 1;
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{create_empty_session, ErrorRecord, ProjectMetadata};
    use async_trait::async_trait;
    use std::time::Duration;

    enum Behavior {
        Reply(String),
        Fail,
        Hang,
    }

    struct ScriptedLlm(Behavior);

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        fn name(&self) -> String {
            "scripted".to_string()
        }

        async fn complete(&self, _prompt: &str) -> Result<String, LlmError> {
            match &self.0 {
                Behavior::Reply(text) => Ok(text.clone()),
                Behavior::Fail => Err(LlmError::CloudNotConfigured),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok("{}".to_string())
                }
            }
        }
    }

    fn compressor(behavior: Behavior) -> Compressor {
        let config = CompressionConfig {
            max_decisions: 2,
            max_next_steps: 2,
            timeout_secs: 1,
        };
        Compressor::new(Arc::new(ScriptedLlm(behavior)), config)
    }

    fn busy_session() -> SessionDocument {
        let mut doc = create_empty_session(
            "s1",
            "/work/demo",
            ProjectMetadata {
                name: "demo".to_string(),
                tech_stack: vec!["Rust".to_string()],
                entry_points: vec![],
            },
        );
        doc.decisions = vec!["D1".into(), "D2".into(), "D3".into()];
        doc.next_steps = vec!["N1".into(), "N2".into(), "N3".into()];
        let mut fixed = ErrorRecord::new("fixed");
        fixed.resolved = true;
        doc.errors_encountered = vec![fixed, ErrorRecord::new("open")];
        doc
    }

    fn last_note(doc: &SessionDocument) -> &str {
        &doc.sources.last().unwrap().note
    }

    #[tokio::test]
    async fn llm_output_is_overlaid_with_identity_restored() {
        let reply = r#"Here you go:
```json
{
  "sessionId": "hijacked",
  "projectRoot": "/elsewhere",
  "projectMetadata": {"name": "evil"},
  "sources": [],
  "decisions": ["D3"],
  "nextSteps": ["N1"]
}
```
Hope that helps!"#;
        let doc = busy_session();
        let compressed = compressor(Behavior::Reply(reply.to_string())).compress(&doc).await;

        assert_eq!(compressed.session_id, "s1");
        assert_eq!(compressed.project_root, "/work/demo");
        assert_eq!(compressed.created_at, doc.created_at);
        assert_eq!(compressed.project_metadata, doc.project_metadata);
        assert_eq!(compressed.decisions, vec!["D3"]);
        assert_eq!(compressed.next_steps, vec!["N1"]);
        // untouched by the model
        assert_eq!(compressed.errors_encountered, doc.errors_encountered);
        assert_eq!(compressed.sources.len(), doc.sources.len() + 1);
        assert_eq!(last_note(&compressed), "Compressed via LLM (scripted)");
        assert!(compressed.updated_at >= doc.updated_at);
    }

    #[tokio::test]
    async fn transport_failure_falls_back_to_heuristic() {
        let doc = busy_session();
        let compressed = compressor(Behavior::Fail).compress(&doc).await;

        assert_eq!(compressed.decisions, vec!["D2", "D3"]);
        assert_eq!(compressed.next_steps, vec!["N1", "N2"]);
        assert_eq!(compressed.errors_encountered.len(), 1);
        assert_eq!(compressed.errors_encountered[0].message, "open");
        assert!(last_note(&compressed).starts_with("Compressed via heuristic fallback"));
        assert!(validate(&compressed).valid);
    }

    #[tokio::test]
    async fn timeout_falls_back_to_heuristic() {
        let doc = busy_session();
        let compressed = compressor(Behavior::Hang).compress(&doc).await;
        assert!(last_note(&compressed).contains("timed out"));
        assert_eq!(compressed.session_id, doc.session_id);
    }

    #[tokio::test]
    async fn unparseable_and_empty_replies_fall_back() {
        let doc = busy_session();
        for reply in ["I cannot do that.", "{\"decisions\": [", "{}", "[1, 2]", "{\"decisions\": null}"] {
            let compressed = compressor(Behavior::Reply(reply.to_string())).compress(&doc).await;
            assert!(
                last_note(&compressed).starts_with("Compressed via heuristic fallback"),
                "reply {:?} should fall back",
                reply
            );
            assert_eq!(compressed.project_root, doc.project_root);
        }
    }

    #[test]
    fn heuristic_keeps_recent_decisions_and_open_errors() {
        let doc = busy_session();
        let config = CompressionConfig {
            max_decisions: 10,
            max_next_steps: 1,
            timeout_secs: 1,
        };
        let compressed = heuristic_compress(&doc, &config, "offline");
        assert_eq!(compressed.decisions, doc.decisions);
        assert_eq!(compressed.next_steps, vec!["N1"]);
        assert_eq!(last_note(&compressed), "Compressed via heuristic fallback (offline)");
    }

    #[test]
    fn extract_distinguishes_outcomes() {
        assert_eq!(extract_json("   "), Err(ExtractError::NotFound));
        assert_eq!(extract_json("no json here"), Err(ExtractError::NotFound));
        assert_eq!(extract_json("{}"), Ok(Extracted::Empty));
        assert_eq!(extract_json("[1]"), Err(ExtractError::NotAnObject));
        assert!(matches!(extract_json("{\"a\": }"), Err(ExtractError::Malformed(_))));
    }

    #[test]
    fn extract_tolerates_prose_and_fences() {
        let fenced = "Sure!\n```json\n{\"key\": \"value\"}\n```\nDone!";
        let bare = "Here: {\"key\": \"value {with braces}\"} trailing";
        for input in [fenced, bare] {
            match extract_json(input).unwrap() {
                Extracted::Object(map) => assert!(map.contains_key("key")),
                Extracted::Empty => panic!("expected fields for {:?}", input),
            }
        }
    }
}
