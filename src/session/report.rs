//! Human-readable rendering of a [`SessionOutcome`].

use std::fmt::Write as _;

use crate::session::supervisor::SessionOutcome;

/// Characters of each content item shown before truncation.
pub const PREVIEW_CHARS: usize = 500;

/// Render the outcome as the text printed by the binary.
#[must_use]
pub fn render(outcome: &SessionOutcome, tool_name: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Session: {}", outcome.session.id);

    let _ = writeln!(out, "Available tools:");
    if outcome.tools.is_empty() {
        let _ = writeln!(out, "  (none)");
    }
    for tool in &outcome.tools {
        let _ = writeln!(
            out,
            "  - {}: {}",
            tool.display_name(),
            tool.description.as_deref().unwrap_or("")
        );
    }

    match &outcome.invocation {
        Some(invocation) => {
            let status = if invocation.output.is_error {
                "reported an error"
            } else {
                "completed"
            };
            let _ = writeln!(out, "Tool call {}: {status}", invocation.tool);
            for item in &invocation.output.content {
                let _ = writeln!(out, "\n--- {} ---", item.kind);
                let _ = writeln!(out, "{}", truncate(&item.text, PREVIEW_CHARS));
            }
            if let Some(raw) = invocation.reply.result.as_ref().filter(|r| !r.is_object()) {
                let _ = writeln!(out, "\n--- raw result ---");
                let _ = writeln!(out, "{}", truncate(&raw.to_string(), PREVIEW_CHARS));
            }
        }
        None => {
            let _ = writeln!(
                out,
                "{tool_name} tool not found on server. No tool call made."
            );
        }
    }

    if !outcome.unsolicited.is_empty() {
        let _ = writeln!(
            out,
            "\n{} unclaimed message(s) received",
            outcome.unsolicited.len()
        );
    }

    out
}

/// Cut `text` to `max` characters, appending `...` when shortened.
#[must_use]
pub fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((byte_idx, _)) => format!("{}...", &text[..byte_idx]),
        None => text.to_owned(),
    }
}
