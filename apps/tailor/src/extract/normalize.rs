use std::sync::OnceLock;

use regex::Regex;

use super::links::DetectedLinks;

fn blank_runs() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{3,}").expect("blank-run pattern compiles"))
}

fn space_runs() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[ \t]{2,}").expect("space-run pattern compiles"))
}

/// CRLF to LF, 3+ newlines to one blank line, runs of spaces/tabs to one
/// space, then trim.
pub fn normalize_text(raw: &str) -> String {
    let unified = raw.replace("\r\n", "\n");
    let collapsed = blank_runs().replace_all(&unified, "\n\n");
    let spaced = space_runs().replace_all(&collapsed, " ");
    spaced.trim().to_string()
}

/// First `limit` characters of `text`.
pub fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// `=== LINKS DETECTED ===` block listing at most `max` URLs and `max` emails.
/// Empty when there is nothing to list.
pub fn links_footer(links: &DetectedLinks, max: usize) -> String {
    if links.is_empty() {
        return String::new();
    }
    let mut lines = vec!["=== LINKS DETECTED ===".to_string()];
    if !links.urls.is_empty() {
        lines.push("URLs:".to_string());
        lines.extend(links.urls.iter().take(max).map(|u| format!("- {u}")));
    }
    if !links.emails.is_empty() {
        lines.push("Emails:".to_string());
        lines.extend(links.emails.iter().take(max).map(|e| format!("- {e}")));
    }
    lines.join("\n")
}

/// Final text for `text/{jobId}.txt`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedText {
    pub text: String,
    /// Whether the normalized body alone exceeded the limit.
    pub truncated: bool,
}

/// Truncates the normalized body, optionally appends the links footer, then
/// re-truncates so the result never exceeds `limit` characters.
pub fn compose(
    normalized: &str,
    links: &DetectedLinks,
    limit: usize,
    append_links: bool,
    max_links: usize,
) -> ComposedText {
    let truncated = normalized.chars().count() > limit;
    let mut text = truncate_chars(normalized, limit).to_string();

    if append_links {
        let footer = links_footer(links, max_links);
        if !footer.is_empty() {
            text.push('\n');
            text.push_str(&footer);
            text = truncate_chars(&text, limit).to_string();
        }
    }

    ComposedText { text, truncated }
}
