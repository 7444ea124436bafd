//! Normalization and fingerprinting, shared between the collector's
//! Evidence Extractor and the store's retrieval pipeline (they must
//! agree bit-for-bit: `search_similar_cases` recomputes the same
//! signature a freshly-arriving incident would have produced).

use sha2::{Digest, Sha256};

use crate::event::Frame;

struct Patterns {
    uuid: regex::Regex,
    hex_literal: regex::Regex,
    iso_timestamp: regex::Regex,
    abs_path: regex::Regex,
    digit_run: regex::Regex,
    quoted: regex::Regex,
    whitespace: regex::Regex,
}

fn patterns() -> &'static Patterns {
    use std::sync::OnceLock;
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        uuid: regex::Regex::new(
            r"(?i)\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b",
        )
        .unwrap(),
        hex_literal: regex::Regex::new(r"(?i)\b0x[0-9a-f]+\b").unwrap(),
        iso_timestamp: regex::Regex::new(
            r"\b\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:?\d{2})?\b",
        )
        .unwrap(),
        abs_path: regex::Regex::new(r"(?:/[A-Za-z0-9_.\-]+){2,}").unwrap(),
        digit_run: regex::Regex::new(r"\b\d{2,}\b").unwrap(),
        quoted: regex::Regex::new(r#"'[^']*'|"[^"]*""#).unwrap(),
        whitespace: regex::Regex::new(r"\s+").unwrap(),
    })
}

/// Applies the full redaction chain from §4.3.4, without truncation.
/// Idempotent: `normalize_text(normalize_text(x)) == normalize_text(x)`,
/// since every placeholder it introduces (`<uuid>`, `<hex>`, …) contains
/// none of the characters any rule matches on.
pub fn normalize_text(input: &str) -> String {
    let p = patterns();
    let unified = input.replace("\r\n", "\n").replace('\r', "\n");
    let s = p.uuid.replace_all(&unified, "<uuid>");
    let s = p.hex_literal.replace_all(&s, "<hex>");
    let s = p.iso_timestamp.replace_all(&s, "<ts>");
    let s = p.abs_path.replace_all(&s, "<path>");
    let s = p.digit_run.replace_all(&s, "<num>");
    let s = p.quoted.replace_all(&s, "<str>");
    p.whitespace.replace_all(s.trim(), " ").into_owned()
}

/// `message_key`: normalized text truncated to 160 characters.
pub fn message_key(raw: &str) -> String {
    normalize_text(raw).chars().take(160).collect()
}

/// SHA-256 over `lower(exception_type) \n message_key \n frames`, per
/// §4.3.5. Falls back to hashing the normalized excerpt head when the
/// basis would otherwise be empty (no exception type, no frames).
pub fn fingerprint(exception_type: &str, message_key: &str, frames: &[Frame], raw_excerpt: &str) -> String {
    let frame_basis = frames
        .iter()
        .filter(|f| !f.file.trim().is_empty())
        .map(|f| format!("{}:{}", f.file, f.function))
        .collect::<Vec<_>>()
        .join(" ");

    let basis = format!("{}\n{}\n{}", exception_type.to_lowercase(), message_key, frame_basis);
    if basis.trim().chars().filter(|c| !c.is_whitespace() && *c != '\n').count() > 0 {
        sha256_hex(&basis)
    } else {
        fallback_fingerprint(raw_excerpt)
    }
}

/// SHA-256 over the normalized first 500 characters of the excerpt —
/// used when `fingerprint` has no exception type, message key, or
/// frames to work with.
pub fn fallback_fingerprint(raw_excerpt: &str) -> String {
    let normalized = normalize_text(raw_excerpt);
    let head: String = normalized.chars().take(500).collect();
    sha256_hex(&head)
}

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Tokenizes normalized text for FTS matching: strips the redaction
/// placeholders themselves (they're not informative tokens), splits on
/// whitespace/punctuation, and caps at 16 tokens per §4.11.
pub fn tokenize(text: &str) -> Vec<String> {
    let normalized = normalize_text(text);
    let stop = ["<ts>", "<uuid>", "<hex>", "<path>", "<num>", "<str>"];
    normalized
        .split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|t| !t.is_empty() && !stop.contains(&t.as_str()))
        .take(16)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_digit_runs_and_quoted_strings() {
        let msg = "invalid literal for int() with base 10: 'abc'";
        assert_eq!(
            message_key(msg),
            "invalid literal for int() with base <num>: <str>"
        );
    }

    #[test]
    fn normalization_is_idempotent() {
        let msg = "User 123e4567-e89b-12d3-a456-426614174000 failed at /var/app/run.py with 0xFF at 2024-01-02T03:04:05Z saying \"boom\" and id 48291";
        let once = normalize_text(msg);
        let twice = normalize_text(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn fingerprint_matches_s1_scenario() {
        let frames = vec![Frame {
            file: "main.py".to_string(),
            function: "handler".to_string(),
        }];
        let key = message_key("invalid literal for int() with base 10: 'abc'");
        let fp = fingerprint("ValueError", &key, &frames, "");
        let expected = sha256_hex("valueerror\ninvalid literal for int() with base <num>: <str>\nmain.py:handler");
        assert_eq!(fp, expected);
    }

    #[test]
    fn fingerprint_falls_back_when_basis_is_empty() {
        let fp = fingerprint("", "", &[], "some raw excerpt text");
        assert_eq!(fp, fallback_fingerprint("some raw excerpt text"));
    }

    #[test]
    fn tokenize_drops_placeholders_and_caps_length() {
        let tokens = tokenize("Error 12345 at /a/b/c.py with 'value' repeated many many many many many many many many many many many many many many many times");
        assert!(tokens.len() <= 16);
        assert!(!tokens.iter().any(|t| t.starts_with('<')));
    }
}
