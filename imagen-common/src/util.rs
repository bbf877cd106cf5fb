//! String helpers shared by reply formatting code.

/// Truncate a string to at most `max_chars` characters, appending "..." if truncated.
///
/// The result, ellipsis included, never exceeds `max_chars` characters, and
/// multi-byte characters (emoji, CJK) are never split.
pub fn truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let keep = max_chars.saturating_sub(3);
    let end = s.char_indices().nth(keep).map_or(s.len(), |(idx, _)| idx);
    format!("{}...", &s[..end])
}

/// Redact a bot token or API key for logging, keeping a short prefix.
pub fn redact_secret(secret: &str) -> String {
    let prefix: String = secret.chars().take(4).collect();
    if secret.chars().count() <= 8 {
        "***".to_string()
    } else {
        format!("{prefix}***")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_with_ellipsis() {
        assert_eq!(truncate_with_ellipsis("hello", 10), "hello");
        assert_eq!(truncate_with_ellipsis("hello world", 8), "hello...");
        assert_eq!(truncate_with_ellipsis("😀😀😀😀😀", 4), "😀...");
        assert_eq!(truncate_with_ellipsis("", 10), "");
    }

    #[test]
    fn test_truncate_respects_limit() {
        let long = "x".repeat(2000);
        let out = truncate_with_ellipsis(&long, 1024);
        assert_eq!(out.chars().count(), 1024);
        assert!(out.ends_with("..."));
    }

    #[test]
    fn test_redact_secret() {
        assert_eq!(redact_secret("short"), "***");
        assert_eq!(redact_secret("123456789:ABCDEF"), "1234***");
    }
}
