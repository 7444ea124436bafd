//! Language-aware stack-trace extraction (§4.3.2–3), shared between the
//! collector's Evidence Extractor and the store's `search_similar_cases`
//! / `/v1/debug/retrieval`, which must recompute the same features from
//! raw text a freshly-arriving incident would have produced.

use crate::event::Frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Python,
    Java,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterLevel {
    Strict,
    Balanced,
    Lenient,
}

impl FilterLevel {
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "strict" => FilterLevel::Strict,
            "lenient" => FilterLevel::Lenient,
            _ => FilterLevel::Balanced,
        }
    }
}

struct Patterns {
    py_header: regex::Regex,
    py_frame: regex::Regex,
    py_exc_line: regex::Regex,
    java_header: regex::Regex,
    java_caused_by: regex::Regex,
    java_frame: regex::Regex,
}

fn patterns() -> &'static Patterns {
    use std::sync::OnceLock;
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        py_header: regex::Regex::new(r"Traceback \(most recent call last\):").unwrap(),
        py_frame: regex::Regex::new(r#"File "(?P<file>[^"]+)", line \d+, in (?P<func>\S+)"#).unwrap(),
        py_exc_line: regex::Regex::new(r"^(?P<exc>[A-Za-z_][\w.]*):\s*(?P<msg>.*)$").unwrap(),
        java_header: regex::Regex::new(r#"Exception in thread "[^"]*"\s+(?P<exc>[\w.$]+)(?::\s*(?P<msg>.*))?"#).unwrap(),
        java_caused_by: regex::Regex::new(r"Caused by:\s*(?P<exc>[\w.$]+)(?::\s*(?P<msg>.*))?").unwrap(),
        java_frame: regex::Regex::new(r"at\s+(?P<func>[\w.$<>]+)\((?P<file>[^:)]+):\d+\)").unwrap(),
    })
}

fn simple_name(qualified: &str) -> String {
    qualified
        .rsplit(|c| c == '.' || c == '$')
        .next()
        .unwrap_or(qualified)
        .to_string()
}

/// Selects the informative slice of a raw chunk per §4.3.2: detect a
/// language's markers, anchor on the last occurrence (header preferred
/// over frame), take `context_lines_before` lines of preceding context,
/// and bound the result to `max_chars` characters.
pub fn select_relevant_excerpt(
    chunk: &str,
    language_hint: Option<Language>,
    context_lines_before: usize,
    max_chars: usize,
) -> (String, Option<Language>) {
    if chunk.trim().is_empty() {
        return (String::new(), None);
    }
    let p = patterns();
    let lines: Vec<&str> = chunk.lines().collect();

    let first_match_idx = |re: &regex::Regex| lines.iter().position(|l| re.is_match(l));
    let last_match_idx = |re: &regex::Regex| lines.iter().rposition(|l| re.is_match(l));

    let language = language_hint.or_else(|| {
        let py_idx = first_match_idx(&p.py_header).or_else(|| first_match_idx(&p.py_frame));
        let java_idx = first_match_idx(&p.java_header)
            .or_else(|| first_match_idx(&p.java_caused_by))
            .or_else(|| first_match_idx(&p.java_frame));
        match (py_idx, java_idx) {
            (Some(py), Some(java)) => Some(if py <= java { Language::Python } else { Language::Java }),
            (Some(_), None) => Some(Language::Python),
            (None, Some(_)) => Some(Language::Java),
            (None, None) => None,
        }
    });

    let anchor = match language {
        Some(Language::Python) => last_match_idx(&p.py_header).or_else(|| last_match_idx(&p.py_frame)),
        Some(Language::Java) => last_match_idx(&p.java_header)
            .or_else(|| last_match_idx(&p.java_caused_by))
            .or_else(|| last_match_idx(&p.java_frame)),
        None => None,
    };

    let excerpt = if let Some(idx) = anchor {
        let start = idx.saturating_sub(context_lines_before);
        lines[start..].join("\n")
    } else {
        let fallback_re = regex::Regex::new(r"^\w+(?:Error|Exception):\s*.*$").unwrap();
        if let Some(idx) = lines.iter().rposition(|l| fallback_re.is_match(l)) {
            let start = idx.saturating_sub(context_lines_before);
            lines[start..].join("\n")
        } else {
            let tail_start = lines.len().saturating_sub(200);
            lines[tail_start..].join("\n")
        }
    };

    let truncated: String = excerpt.chars().take(max_chars).collect();
    (truncated, language)
}

#[derive(Debug, Clone, Default)]
pub struct ExtractedEvidence {
    pub exception_type: String,
    pub message: String,
    pub frames: Vec<Frame>,
    pub marker_found: bool,
}

/// Extracts the exception line and up to `max_frames` stack frames from
/// an already-selected excerpt, per §4.3.3.
pub fn extract_exception_and_frames(
    excerpt: &str,
    language: Option<Language>,
    max_frames: usize,
) -> ExtractedEvidence {
    let p = patterns();
    let mut evidence = ExtractedEvidence::default();

    match language {
        Some(Language::Java) => {
            evidence.marker_found =
                p.java_header.is_match(excerpt) || p.java_caused_by.is_match(excerpt) || p.java_frame.is_match(excerpt);

            if let Some(caps) = p.java_caused_by.captures_iter(excerpt).last() {
                evidence.exception_type = simple_name(&caps["exc"]);
                evidence.message = caps.name("msg").map(|m| m.as_str().trim().to_string()).unwrap_or_default();
            } else if let Some(caps) = p.java_header.captures(excerpt) {
                evidence.exception_type = simple_name(&caps["exc"]);
                evidence.message = caps.name("msg").map(|m| m.as_str().trim().to_string()).unwrap_or_default();
            }

            for caps in p.java_frame.captures_iter(excerpt).take(max_frames) {
                evidence.frames.push(Frame {
                    file: caps["file"].to_string(),
                    function: caps["func"].to_string(),
                });
            }
        }
        Some(Language::Python) | None => {
            evidence.marker_found = p.py_header.is_match(excerpt) || p.py_frame.is_match(excerpt);

            if let Some(caps) = excerpt
                .lines()
                .rev()
                .find_map(|l| p.py_exc_line.captures(l))
            {
                evidence.exception_type = simple_name(&caps["exc"]);
                evidence.message = caps["msg"].trim().to_string();
            }

            for caps in p.py_frame.captures_iter(excerpt).take(max_frames) {
                let file = std::path::Path::new(&caps["file"])
                    .file_name()
                    .map(|f| f.to_string_lossy().to_string())
                    .unwrap_or_else(|| caps["file"].to_string());
                evidence.frames.push(Frame {
                    file,
                    function: caps["func"].to_string(),
                });
            }
        }
    }

    evidence
}

/// The filter gate of §4.3.6.
#[must_use]
pub fn should_report(level: FilterLevel, evidence: &ExtractedEvidence) -> bool {
    match level {
        FilterLevel::Lenient => true,
        FilterLevel::Strict => evidence.marker_found || !evidence.frames.is_empty(),
        FilterLevel::Balanced => {
            evidence.marker_found || !evidence.frames.is_empty() || !evidence.exception_type.is_empty()
        }
    }
}

/// Runs the full extraction → normalization → fingerprint pipeline
/// over raw text, producing the same `(signature, exception_type,
/// message_key, frames)` tuple the store needs to recompute a
/// signature for `search_similar_cases` and `/v1/debug/retrieval`
/// (§4.11 step 1).
pub fn query_features(text: &str) -> (String, String, String, Vec<Frame>) {
    let (excerpt, language) = select_relevant_excerpt(text, None, 20, 4000);
    let evidence = extract_exception_and_frames(&excerpt, language, 10);
    let message_key = crate::normalize::message_key(if evidence.message.is_empty() {
        &excerpt
    } else {
        &evidence.message
    });
    let signature = crate::normalize::fingerprint(&evidence.exception_type, &message_key, &evidence.frames, text);
    (signature, evidence.exception_type, message_key, evidence.frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s1_python_traceback() {
        let chunk = "Traceback (most recent call last):\n  File \"app/main.py\", line 42, in handler\n    x = int(v)\nValueError: invalid literal for int() with base 10: 'abc'";
        let (excerpt, lang) = select_relevant_excerpt(chunk, None, 20, 4000);
        assert_eq!(lang, Some(Language::Python));
        let evidence = extract_exception_and_frames(&excerpt, lang, 10);
        assert_eq!(evidence.exception_type, "ValueError");
        assert_eq!(evidence.frames, vec![Frame { file: "main.py".to_string(), function: "handler".to_string() }]);
        assert!(should_report(FilterLevel::Balanced, &evidence));
    }

    #[test]
    fn s2_java_caused_by() {
        let chunk = "Exception in thread \"main\" java.lang.NullPointerException: boom\n  at com.example.App.handle(App.java:42)\nCaused by: java.lang.IllegalArgumentException: bad input\n  at com.example.Parser.parse(Parser.java:7)";
        let (excerpt, lang) = select_relevant_excerpt(chunk, None, 20, 4000);
        assert_eq!(lang, Some(Language::Java));
        let evidence = extract_exception_and_frames(&excerpt, lang, 10);
        assert_eq!(evidence.exception_type, "IllegalArgumentException");
        assert_eq!(
            evidence.frames[0],
            Frame { file: "App.java".to_string(), function: "com.example.App.handle".to_string() }
        );
    }

    #[test]
    fn empty_input_yields_empty_excerpt() {
        let (excerpt, lang) = select_relevant_excerpt("", None, 20, 4000);
        assert_eq!(excerpt, "");
        assert_eq!(lang, None);
    }

    #[test]
    fn no_markers_falls_back_to_tail() {
        let chunk = (0..250).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let (excerpt, lang) = select_relevant_excerpt(&chunk, None, 20, 100_000);
        assert_eq!(lang, None);
        assert_eq!(excerpt.lines().count(), 200);
        assert!(excerpt.starts_with("line 50"));
    }

    #[test]
    fn strict_gate_rejects_markerless_evidence() {
        let evidence = ExtractedEvidence {
            exception_type: "SomeError".to_string(),
            ..Default::default()
        };
        assert!(!should_report(FilterLevel::Strict, &evidence));
        assert!(should_report(FilterLevel::Balanced, &evidence));
    }
}
