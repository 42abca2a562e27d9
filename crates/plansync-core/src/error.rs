use thiserror::Error;

const MAX_ERROR_DETAIL_LEN: usize = 200;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("source of truth unavailable: {0}")]
    SourceUnavailable(String),
    #[error("platform {platform} unavailable: {reason}")]
    PlatformUnavailable { platform: String, reason: String },
    #[error("no baseline found for scope {scope}: {detail}")]
    BaselineNotFound { scope: String, detail: String },
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error(
        "unsupported baseline schema version {found}; this binary supports up to {supported}"
    )]
    UnsupportedSchemaVersion { supported: u32, found: u32 },
}

pub fn truncate_for_error(input: &str) -> String {
    if input.len() <= MAX_ERROR_DETAIL_LEN {
        return input.to_owned();
    }

    let mut cut = MAX_ERROR_DETAIL_LEN;
    while cut > 0 && !input.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…", &input[..cut])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_keeps_short_input_intact() {
        assert_eq!(truncate_for_error("short"), "short");
    }

    #[test]
    fn truncate_clamps_long_input() {
        let long = "x".repeat(500);
        let truncated = truncate_for_error(&long);
        assert!(truncated.len() < long.len());
        assert!(truncated.ends_with('…'));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let long = "é".repeat(300);
        let truncated = truncate_for_error(&long);
        assert!(truncated.ends_with('…'));
    }
}
