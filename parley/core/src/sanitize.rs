//! Credential Redaction
//!
//! Error text coming back from the generation service can echo request
//! headers or environment details. Every error string is passed through
//! [`sanitize`] before it reaches a sink or a log line.

use std::sync::OnceLock;

use regex::Regex;

/// Replacement text for redacted words
pub const REDACTION_MARKER: &str = "[REDACTED]";

/// Case-insensitive credential words: `api key`, `api-key`, `api_key`,
/// `apikey`, `token`, `secret`, `auth`, `bearer`
const CREDENTIAL_PATTERN: &str = r"(?i)api[\s_-]?key|token|secret|auth|bearer";

fn credential_regex() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(CREDENTIAL_PATTERN).expect("credential pattern is valid"))
}

/// Redact credential-like words from a message
///
/// Only the matched words are replaced; surrounding text is left as is.
#[must_use]
pub fn sanitize(message: &str) -> String {
    credential_regex()
        .replace_all(message, REDACTION_MARKER)
        .into_owned()
}

/// Returns true when the message contains anything [`sanitize`] would redact
#[must_use]
pub fn contains_credential(message: &str) -> bool {
    credential_regex().is_match(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_message_untouched() {
        let msg = "API rate limit exceeded";
        assert_eq!(sanitize(msg), msg);
        assert!(!contains_credential(msg));
    }

    #[test]
    fn test_api_key_variants() {
        assert_eq!(sanitize("bad api_key"), "bad [REDACTED]");
        assert_eq!(sanitize("bad API-KEY"), "bad [REDACTED]");
        assert_eq!(sanitize("bad api key"), "bad [REDACTED]");
        assert_eq!(sanitize("bad ApiKey"), "bad [REDACTED]");
    }

    #[test]
    fn test_each_credential_word() {
        let out = sanitize("Token expired; Secret missing; AUTH failed; Bearer abc");
        assert_eq!(
            out,
            "[REDACTED] expired; [REDACTED] missing; [REDACTED] failed; [REDACTED] abc"
        );
    }

    #[test]
    fn test_word_inside_longer_word() {
        // Substrings are redacted too, matching the source behaviour
        assert_eq!(sanitize("Authorization header"), "[REDACTED]orization header");
        assert_eq!(sanitize("tokens"), "[REDACTED]s");
    }

    #[test]
    fn test_output_has_no_credentials_left() {
        let raw = "401: invalid x-api-key sk-ant-123 (bearer token rejected)";
        let clean = sanitize(raw);
        assert!(!contains_credential(&clean));
        assert!(clean.contains("sk-ant-123"));
    }
}
