//! Handoff prompts that let another assistant pick up a session.

use crate::session::SessionDocument;

const JSON_SLOT: &str = "[ACSS_JSON_HERE]";
const CHATGPT_INTRO: &str = "You are taking over an existing coding session from another AI assistant.";
const CONTEXT_MARKER: &str = "Here is the project and session context";
/// Rough characters-per-token ratio used for the length cap.
const CHARS_PER_TOKEN: usize = 4;

const CHATGPT_TEMPLATE: &str = "You are taking over an existing coding session from another AI assistant.

Here is the project and session context in ACSS format:

```json
[ACSS_JSON_HERE]
```

## Your Mission
1.  **Restate the Goal**: In 1 sentence, what are we building?
2.  **Status Check**: What is the immediate blocker or next step?
3.  **Execute**: Continue from the first unresolved item in \"nextSteps\".
    *   Do NOT deviate from the \"decisions\" listed.
    *   If you encounter the \"blocker\" listed in \"errorsEncountered\", fix that first.

Respond with your analysis and the next code block.";

const CLAUDE_TEMPLATE: &str = "You are a senior full-stack developer acting as a continuity engine.

<context>
[ACSS_JSON_HERE]
</context>

<instructions>
1.  Analyze the <currentTask> and <decisions> tags to understand the architectural constraints.
2.  Identify the first unresolved item in <nextSteps>.
3.  If there are unresolved <errorsEncountered>, formulate a fix for them immediately.
4.  Provide your response in a clear, step-by-step format, thinking through the implications of the existing stack choices.
</instructions>

Begin by briefly summarizing the project state, then provide the code for the next step.";

const GEMINI_TEMPLATE: &str = "System Context: Developer Handoff
Project State (ACSS):
[ACSS_JSON_HERE]

Task:
- Analyze the session state provided above.
- Restate the current intent of the user.
- Proceed with implementing the next steps or resolving the noted errors.
- Ensure consistency with the project's tech stack and previous architectural decisions.

Awaiting your next contribution to the codebase.";

const LOCAL_TEMPLATE: &str = "Continuing coding session...

Session Context:
[ACSS_JSON_HERE]

Rules:
- Focus on the \"currentTask\".
- Implement the \"nextSteps\" in order.
- Do not deviate from the \"decisions\" already made.

What is the next step?";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum PromptTarget {
    #[value(name = "chatgpt")]
    ChatGpt,
    Claude,
    Gemini,
    Local,
    #[default]
    Other,
}

impl PromptTarget {
    fn template(&self) -> &'static str {
        match self {
            PromptTarget::ChatGpt => CHATGPT_TEMPLATE,
            PromptTarget::Claude => CLAUDE_TEMPLATE,
            PromptTarget::Gemini => GEMINI_TEMPLATE,
            PromptTarget::Local | PromptTarget::Other => LOCAL_TEMPLATE,
        }
    }
}

/// Short markdown digest: intent, status, stack, recent decisions, open blockers, next steps.
pub fn summarize(session: &SessionDocument) -> String {
    let mut lines = vec![
        format!("## Session Summary: {}", session.project_metadata.name),
        format!("- **Current Intent**: {}", session.current_task.intent),
        format!("- **Status**: {}", session.current_task.status.as_str()),
    ];

    if !session.project_metadata.tech_stack.is_empty() {
        lines.push(format!(
            "- **Stack**: {}",
            session.project_metadata.tech_stack.join(", ")
        ));
    }

    if !session.decisions.is_empty() {
        lines.push("- **Recent Decisions**:".to_string());
        for decision in session.decisions.iter().rev().take(3) {
            lines.push(format!("  * {}", decision));
        }
    }

    let open: Vec<&str> = session
        .errors_encountered
        .iter()
        .filter(|e| !e.resolved)
        .map(|e| e.message.as_str())
        .collect();
    if !open.is_empty() {
        lines.push("- **Open Blockers**:".to_string());
        for message in &open[open.len().saturating_sub(3)..] {
            lines.push(format!("  * {}", message));
        }
    }

    lines.push("- **Next Steps**:".to_string());
    if session.next_steps.is_empty() {
        lines.push("  Internalizing details...".to_string());
    } else {
        for step in &session.next_steps {
            lines.push(format!("  * {}", step));
        }
    }

    lines.join("\n")
}

pub fn generate_prompt(
    session: &SessionDocument,
    target: PromptTarget,
    max_tokens: Option<usize>,
) -> serde_json::Result<String> {
    let json = serde_json::to_string_pretty(session)?;
    let summary = summarize(session);
    let rendered = target.template().replace(JSON_SLOT, &json);

    let mut result = if rendered.starts_with(CHATGPT_INTRO) {
        rendered.replacen(
            CHATGPT_INTRO,
            &format!("You are taking over an existing coding session.\n\n{}", summary),
            1,
        )
    } else if rendered.contains(CONTEXT_MARKER) {
        rendered.replacen(CONTEXT_MARKER, &format!("{}\n\n{}", summary, CONTEXT_MARKER), 1)
    } else {
        format!("{}\n\n{}", summary, rendered)
    };

    if let Some(max_tokens) = max_tokens {
        let limit = max_tokens * CHARS_PER_TOKEN;
        if result.chars().count() > limit {
            result = result.chars().take(limit).collect();
            result.push_str("\n\n[Prompt truncated due to length limits]");
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{create_empty_session, ErrorRecord, ProjectMetadata};

    fn session() -> SessionDocument {
        let mut doc = create_empty_session(
            "s1",
            "/work/demo",
            ProjectMetadata {
                name: "demo".to_string(),
                tech_stack: vec!["Rust".to_string(), "Tokio".to_string()],
                entry_points: vec![],
            },
        );
        doc.decisions = vec!["D1".into(), "D2".into(), "D3".into(), "D4".into()];
        let mut fixed = ErrorRecord::new("fixed");
        fixed.resolved = true;
        doc.errors_encountered = vec![fixed, ErrorRecord::new("still broken")];
        doc
    }

    #[test]
    fn summary_lists_recent_decisions_newest_first() {
        let summary = summarize(&session());
        assert!(summary.contains("- **Stack**: Rust, Tokio"));
        assert!(summary.contains("  * D4\n  * D3\n  * D2"));
        assert!(!summary.contains("* D1"));
        assert!(summary.contains("* still broken"));
        assert!(!summary.contains("* fixed"));
        assert!(summary.contains("Internalizing details..."));
    }

    #[test]
    fn chatgpt_prompt_replaces_intro_with_summary() {
        let prompt = generate_prompt(&session(), PromptTarget::ChatGpt, None).unwrap();
        assert!(prompt.starts_with("You are taking over an existing coding session.\n\n## Session Summary: demo"));
        assert!(prompt.contains("\"sessionId\": \"s1\""));
        assert!(!prompt.contains(JSON_SLOT));
    }

    #[test]
    fn other_templates_get_summary_prepended() {
        for target in [PromptTarget::Claude, PromptTarget::Gemini, PromptTarget::Local] {
            let prompt = generate_prompt(&session(), target, None).unwrap();
            assert!(prompt.starts_with("## Session Summary: demo"), "{:?}", target);
        }
    }

    #[test]
    fn long_prompts_are_truncated() {
        let prompt = generate_prompt(&session(), PromptTarget::Other, Some(10)).unwrap();
        assert!(prompt.ends_with("[Prompt truncated due to length limits]"));
        assert!(prompt.starts_with(&generate_prompt(&session(), PromptTarget::Other, None).unwrap()[..40]));
    }
}
