use serde::{Deserialize, Serialize};

use crate::identifiers::PlatformId;

pub const REF_LINE_PREFIX: &str = "Ref: ";

/// One `Ref: <platform> <reference>` line from an item body or a node
/// description. The reference is the remote id when the line was written on
/// the source-of-truth side, or a platform canonical link when written into a
/// downstream body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceLine {
    pub platform: PlatformId,
    pub reference: String,
}

impl ReferenceLine {
    pub fn new(platform: impl Into<PlatformId>, reference: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            reference: reference.into(),
        }
    }

    pub fn render(&self) -> String {
        format!("{REF_LINE_PREFIX}{} {}", self.platform.as_str(), self.reference)
    }
}

/// Checks a tracking identifier against the `<letters>-<digits>` shape that
/// the title convention embeds.
pub fn is_valid_tracking_id(candidate: &str) -> bool {
    let Some((prefix, number)) = candidate.split_once('-') else {
        return false;
    };
    !prefix.is_empty()
        && prefix.chars().all(|ch| ch.is_ascii_alphabetic())
        && !number.is_empty()
        && number.chars().all(|ch| ch.is_ascii_digit())
}

/// Splits a downstream title into its bracketed tracking identifier and the
/// remaining name. Returns `None` when the title does not start with a
/// well-formed `[<LETTERS>-<DIGITS>]` marker.
pub fn parse_title_marker(title: &str) -> Option<(&str, &str)> {
    let inner = title.strip_prefix('[')?;
    let end = inner.find(']')?;
    let marker = &inner[..end];
    if !is_valid_tracking_id(marker) {
        return None;
    }
    let rest = inner[end + 1..].trim_start();
    Some((marker, rest))
}

/// Renders the downstream title convention: `[<TRACKING-ID>] <name>`, or the
/// bare name when no tracking identifier is available yet.
pub fn format_title(tracking_id: Option<&str>, name: &str) -> String {
    match tracking_id {
        Some(id) if is_valid_tracking_id(id) => format!("[{id}] {name}"),
        _ => name.to_owned(),
    }
}

/// Strips a leading tracking marker if present, leaving the plain name.
pub fn title_name(title: &str) -> &str {
    match parse_title_marker(title) {
        Some((_, rest)) => rest,
        None => title,
    }
}

/// Collects every well-formed `Ref: ` line in the text, in order of
/// appearance. Lines whose platform segment is empty are skipped.
pub fn parse_reference_lines(text: &str) -> Vec<ReferenceLine> {
    let mut refs = Vec::new();
    for line in text.lines() {
        let Some(rest) = line.trim_end().strip_prefix(REF_LINE_PREFIX) else {
            continue;
        };
        let Some((platform, reference)) = rest.split_once(' ') else {
            continue;
        };
        if platform.is_empty() || reference.is_empty() {
            continue;
        }
        refs.push(ReferenceLine::new(platform, reference));
    }
    refs
}

/// Renders a downstream body: the node description followed by a blank line
/// and the trailing reverse-reference section. With no references the body is
/// the description alone.
pub fn compose_body(description: &str, refs: &[ReferenceLine]) -> String {
    let trimmed = description.trim_end();
    if refs.is_empty() {
        return trimmed.to_owned();
    }

    let mut body = String::with_capacity(trimmed.len() + refs.len() * 32);
    body.push_str(trimmed);
    if !trimmed.is_empty() {
        body.push_str("\n\n");
    }
    for (index, reference) in refs.iter().enumerate() {
        if index > 0 {
            body.push('\n');
        }
        body.push_str(&reference.render());
    }
    body
}

/// The body text with every reverse-reference line removed, for comparing
/// description content independently of the reference section.
pub fn body_without_references(body: &str) -> String {
    let kept: Vec<&str> = body
        .lines()
        .filter(|line| !line.trim_end().starts_with(REF_LINE_PREFIX))
        .collect();
    kept.join("\n").trim_end().to_owned()
}

pub fn body_contains_reference(body: &str, reference: &ReferenceLine) -> bool {
    parse_reference_lines(body)
        .iter()
        .any(|found| found == reference)
}

/// Lowercases, trims, and collapses runs of whitespace; the exact-name match
/// in reconciliation compares these forms.
pub fn normalize_name(name: &str) -> String {
    let mut normalized = String::with_capacity(name.len());
    let mut pending_space = false;
    for ch in name.trim().chars() {
        if ch.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space && !normalized.is_empty() {
            normalized.push(' ');
        }
        pending_space = false;
        for lower in ch.to_lowercase() {
            normalized.push(lower);
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_marker_round_trip() {
        let title = format_title(Some("PLAT-204"), "Beta rollout");
        assert_eq!(title, "[PLAT-204] Beta rollout");

        let (marker, rest) = parse_title_marker(&title).expect("marker parses");
        assert_eq!(marker, "PLAT-204");
        assert_eq!(rest, "Beta rollout");
    }

    #[test]
    fn title_without_marker_is_left_alone() {
        assert!(parse_title_marker("Beta rollout").is_none());
        assert_eq!(title_name("Beta rollout"), "Beta rollout");
        assert_eq!(format_title(None, "Beta rollout"), "Beta rollout");
    }

    #[test]
    fn malformed_markers_are_rejected() {
        assert!(parse_title_marker("[123-ABC] x").is_none());
        assert!(parse_title_marker("[PLAT204] x").is_none());
        assert!(parse_title_marker("[-1] x").is_none());
        assert!(parse_title_marker("[PLAT-] x").is_none());
        assert!(parse_title_marker("x [PLAT-1] y").is_none());
    }

    #[test]
    fn reference_lines_round_trip_through_a_body() {
        let refs = vec![
            ReferenceLine::new("plan", "plan://scope-a/n-7"),
            ReferenceLine::new("jira", "https://jira.example.com/browse/PLAT-204"),
        ];
        let body = compose_body("Ship the beta.\nSecond line.", &refs);
        assert!(body.starts_with("Ship the beta.\nSecond line.\n\nRef: plan "));

        let parsed = parse_reference_lines(&body);
        assert_eq!(parsed, refs);
        assert!(body_contains_reference(&body, &refs[1]));
        assert_eq!(body_without_references(&body), "Ship the beta.\nSecond line.");
    }

    #[test]
    fn empty_description_composes_to_reference_section_only() {
        let refs = vec![ReferenceLine::new("plan", "plan://scope-a/n-7")];
        let body = compose_body("", &refs);
        assert_eq!(body, "Ref: plan plan://scope-a/n-7");
        assert_eq!(body_without_references(&body), "");
    }

    #[test]
    fn reference_parsing_ignores_malformed_lines() {
        let body = "Ref:\nRef: lonely\nRef: plan plan://x\nplain text";
        let parsed = parse_reference_lines(body);
        assert_eq!(parsed, vec![ReferenceLine::new("plan", "plan://x")]);
    }

    #[test]
    fn normalize_name_collapses_case_and_whitespace() {
        assert_eq!(normalize_name("  Beta   Rollout \n"), "beta rollout");
        assert_eq!(normalize_name("BETA ROLLOUT"), "beta rollout");
    }
}
