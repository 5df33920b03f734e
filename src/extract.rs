//! Multi-strategy text extraction for uploaded documents.
//!
//! Ingestion supplies raw bytes plus a declared media type; this module
//! returns plain UTF-8 text or a typed error. Plain-text formats decode
//! directly, markup formats get a minimal regex stripping pass, and PDFs go
//! through `pdf-extract` first with a byte-level heuristic fallback for the
//! malformed files that parser rejects.
//!
//! The fallback runs two independent strategies over the raw byte stream
//! ([`Strategy::Literal`] and [`Strategy::TextObject`]), scores each
//! candidate by length, and keeps the best one above a plausibility floor.
//! A readability gate then rejects candidates that are mostly binary
//! garbage, with distinct diagnostics for "scanned/encrypted" versus
//! "exotic encoding" inputs; the two need different user remediation.

use regex::Regex;

/// Supported media types.
pub const MIME_TEXT: &str = "text/plain";
pub const MIME_MARKDOWN: &str = "text/markdown";
pub const MIME_HTML: &str = "text/html";
pub const MIME_PDF: &str = "application/pdf";

/// Minimum candidate length considered plausible extracted text.
const MIN_PLAUSIBLE_LEN: usize = 10;
/// Maximum text objects processed per document (bounded latency).
const MAX_TEXT_OBJECTS: usize = 50;
/// Maximum literal strings collected per document.
const MAX_LITERAL_STRINGS: usize = 5000;
/// Readability below this is rejected outright.
const READABILITY_FLOOR: f64 = 0.5;
/// Readability below this is reported as mostly binary.
const MOSTLY_BINARY_CEILING: f64 = 0.1;

/// Extraction error. All variants are non-retryable: the input itself is
/// the problem.
#[derive(Debug)]
pub enum ExtractError {
    UnsupportedFormat(String),
    ExtractionFailed(String),
    LowReadability {
        ratio: f64,
        diagnostic: ReadabilityDiagnostic,
    },
    NoReadableText,
}

/// Why extracted text was judged unreliable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadabilityDiagnostic {
    /// Almost no readable characters; likely a scanned or encrypted file.
    /// The user needs to re-upload a text-based version.
    MostlyBinary,
    /// A mix of readable and unreadable characters; likely an exotic
    /// encoding this extractor cannot handle.
    MixedEncoding,
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::UnsupportedFormat(mt) => {
                write!(f, "unsupported media type: {}", mt)
            }
            ExtractError::ExtractionFailed(e) => write!(f, "extraction failed: {}", e),
            ExtractError::LowReadability { ratio, diagnostic } => match diagnostic {
                ReadabilityDiagnostic::MostlyBinary => write!(
                    f,
                    "extracted text is mostly binary (readability {:.2}); the document \
                     is likely scanned or encrypted, re-upload a text-based version",
                    ratio
                ),
                ReadabilityDiagnostic::MixedEncoding => write!(
                    f,
                    "extracted text is partially unreadable (readability {:.2}); the \
                     document likely uses an encoding this extractor cannot handle",
                    ratio
                ),
            },
            ExtractError::NoReadableText => write!(f, "no readable text found in document"),
        }
    }
}

impl std::error::Error for ExtractError {}

/// Extraction outcome: the text plus which fallback strategy produced it
/// (`None` for direct decode paths) and how many units the cap skipped.
#[derive(Debug)]
pub struct Extraction {
    pub text: String,
    pub strategy: Option<Strategy>,
    pub units_skipped: usize,
}

/// Byte-level fallback strategies for binary document formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Substrings inside `( … )` literal-string delimiters, unescaped and
    /// joined with spaces.
    Literal,
    /// Substrings between `BT`/`ET` markers that feed a text-show operator.
    TextObject,
}

/// A strategy's output awaiting selection.
#[derive(Debug)]
pub struct Candidate {
    pub strategy: Strategy,
    pub text: String,
    pub units_skipped: usize,
}

impl Candidate {
    /// Plausibility score: longer candidates win.
    pub fn score(&self) -> usize {
        self.text.len()
    }
}

/// Extract plain text from document bytes.
pub fn extract_text(bytes: &[u8], media_type: &str) -> Result<Extraction, ExtractError> {
    match media_type {
        MIME_TEXT | MIME_MARKDOWN => Ok(Extraction {
            text: String::from_utf8_lossy(bytes).into_owned(),
            strategy: None,
            units_skipped: 0,
        }),
        MIME_HTML => Ok(Extraction {
            text: strip_markup(&String::from_utf8_lossy(bytes)),
            strategy: None,
            units_skipped: 0,
        }),
        MIME_PDF => extract_pdf(bytes),
        other => Err(ExtractError::UnsupportedFormat(other.to_string())),
    }
}

/// Minimal markup stripping: drop script/style blocks, then tags, then
/// decode the common entities. Best effort only.
fn strip_markup(html: &str) -> String {
    let blocks = Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>").unwrap();
    let tags = Regex::new(r"(?s)<[^>]*>").unwrap();

    let without_blocks = blocks.replace_all(html, " ");
    let without_tags = tags.replace_all(&without_blocks, " ");

    without_tags
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
}

/// PDF extraction: `pdf-extract` first, byte heuristics when it fails or
/// produces nothing readable. The heuristic output goes through the
/// readability gate; the parser's output is used as-is.
fn extract_pdf(bytes: &[u8]) -> Result<Extraction, ExtractError> {
    if let Ok(text) = pdf_extract::extract_text_from_mem(bytes) {
        if text.trim().len() > MIN_PLAUSIBLE_LEN
            && readability_ratio(&text) >= READABILITY_FLOOR
        {
            return Ok(Extraction {
                text,
                strategy: None,
                units_skipped: 0,
            });
        }
    }

    let candidates = vec![literal_candidate(bytes), text_object_candidate(bytes)];

    let best = select_candidate(&candidates, MIN_PLAUSIBLE_LEN)
        .ok_or(ExtractError::NoReadableText)?;

    let ratio = readability_ratio(&best.text);
    if ratio < READABILITY_FLOOR {
        let diagnostic = if ratio < MOSTLY_BINARY_CEILING {
            ReadabilityDiagnostic::MostlyBinary
        } else {
            ReadabilityDiagnostic::MixedEncoding
        };
        return Err(ExtractError::LowReadability { ratio, diagnostic });
    }

    Ok(Extraction {
        text: best.text.clone(),
        strategy: Some(best.strategy),
        units_skipped: best.units_skipped,
    })
}

/// Pick the best-scoring candidate whose score exceeds `floor`. Pure
/// selection over the candidate list; ties keep the earlier strategy.
pub fn select_candidate(candidates: &[Candidate], floor: usize) -> Option<&Candidate> {
    candidates
        .iter()
        .filter(|c| c.score() > floor)
        .fold(None, |best: Option<&Candidate>, c| match best {
            Some(b) if b.score() >= c.score() => Some(b),
            _ => Some(c),
        })
}

/// Fraction of characters that are ASCII letters, digits, or whitespace.
pub fn readability_ratio(text: &str) -> f64 {
    let total = text.chars().count();
    if total == 0 {
        return 0.0;
    }
    let readable = text
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_ascii_whitespace())
        .count();
    readable as f64 / total as f64
}

/// Strategy a: every literal string in the byte stream, unescaped.
fn literal_candidate(bytes: &[u8]) -> Candidate {
    let (segments, skipped) = collect_literals(bytes, false, MAX_LITERAL_STRINGS);
    Candidate {
        strategy: Strategy::Literal,
        text: join_segments(&segments),
        units_skipped: skipped,
    }
}

/// Strategy b: literal strings inside `BT`..`ET` blocks that feed a show
/// operator (`Tj`, `TJ`, `'`, `"`).
fn text_object_candidate(bytes: &[u8]) -> Candidate {
    let mut segments: Vec<Vec<u8>> = Vec::new();
    let mut blocks = 0usize;
    let mut skipped = 0usize;
    let mut pos = 0usize;

    while let Some(start) = find_token(bytes, pos, b"BT") {
        let body_start = start + 2;
        let end = match find_token(bytes, body_start, b"ET") {
            Some(e) => e,
            None => bytes.len(),
        };

        blocks += 1;
        if blocks > MAX_TEXT_OBJECTS {
            skipped += 1;
        } else {
            let block = &bytes[body_start..end];
            let (mut found, _) = collect_literals(block, true, usize::MAX);
            segments.append(&mut found);
        }

        pos = end + 2;
        if pos >= bytes.len() {
            break;
        }
    }

    Candidate {
        strategy: Strategy::TextObject,
        text: join_segments(&segments),
        units_skipped: skipped,
    }
}

/// Scan for `( … )` literal strings, honoring backslash escapes and nested
/// balanced parentheses. With `require_show_op`, a literal is kept only
/// when a show operator follows it within a few bytes.
fn collect_literals(
    bytes: &[u8],
    require_show_op: bool,
    max_strings: usize,
) -> (Vec<Vec<u8>>, usize) {
    let mut segments: Vec<Vec<u8>> = Vec::new();
    let mut skipped = 0usize;
    let mut i = 0usize;

    while i < bytes.len() {
        if bytes[i] != b'(' {
            i += 1;
            continue;
        }

        let mut depth = 1usize;
        let mut segment: Vec<u8> = Vec::new();
        i += 1;

        while i < bytes.len() && depth > 0 {
            match bytes[i] {
                b'\\' if i + 1 < bytes.len() => {
                    match bytes[i + 1] {
                        b'n' => segment.push(b'\n'),
                        b'r' => segment.push(b'\r'),
                        b't' => segment.push(b'\t'),
                        b'\\' | b'(' | b')' => segment.push(bytes[i + 1]),
                        other => segment.push(other),
                    }
                    i += 2;
                }
                b'(' => {
                    depth += 1;
                    segment.push(b'(');
                    i += 1;
                }
                b')' => {
                    depth -= 1;
                    if depth > 0 {
                        segment.push(b')');
                    }
                    i += 1;
                }
                b => {
                    segment.push(b);
                    i += 1;
                }
            }
        }

        let keep = !require_show_op || show_operator_follows(bytes, i);
        if keep && !segment.is_empty() {
            if segments.len() < max_strings {
                segments.push(segment);
            } else {
                skipped += 1;
            }
        }
    }

    (segments, skipped)
}

/// True when a `Tj`/`TJ`/`'`/`"` operator follows within a short window,
/// skipping whitespace and array delimiters.
fn show_operator_follows(bytes: &[u8], from: usize) -> bool {
    let mut i = from;
    let window_end = (from + 16).min(bytes.len());
    while i < window_end {
        match bytes[i] {
            b' ' | b'\t' | b'\r' | b'\n' | b']' | b'>' => i += 1,
            b'T' if i + 1 < bytes.len() && (bytes[i + 1] == b'j' || bytes[i + 1] == b'J') => {
                return true;
            }
            b'\'' | b'"' => return true,
            _ => return false,
        }
    }
    false
}

/// Find a two-byte token at a word-ish boundary (not part of a longer
/// alphanumeric run). Best effort over a raw byte stream.
fn find_token(bytes: &[u8], from: usize, token: &[u8; 2]) -> Option<usize> {
    let mut i = from;
    while i + 2 <= bytes.len() {
        if &bytes[i..i + 2] == token {
            let before_ok = i == 0 || !bytes[i - 1].is_ascii_alphanumeric();
            let after_ok = i + 2 >= bytes.len() || !bytes[i + 2].is_ascii_alphanumeric();
            if before_ok && after_ok {
                return Some(i);
            }
        }
        i += 1;
    }
    None
}

/// Lossy-decode each segment and join with spaces.
fn join_segments(segments: &[Vec<u8>]) -> String {
    segments
        .iter()
        .map(|s| String::from_utf8_lossy(s).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_media_type_returns_error() {
        let err = extract_text(b"foo", "application/octet-stream").unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedFormat(_)));
    }

    #[test]
    fn plain_text_decodes_directly() {
        let out = extract_text(b"hello world", MIME_TEXT).unwrap();
        assert_eq!(out.text, "hello world");
        assert!(out.strategy.is_none());
    }

    #[test]
    fn markup_is_stripped() {
        let html = b"<html><head><style>body{color:red}</style></head>\
                     <body><p>Kept &amp; sound</p><script>alert(1)</script></body></html>";
        let out = extract_text(html, MIME_HTML).unwrap();
        assert!(out.text.contains("Kept & sound"));
        assert!(!out.text.contains("alert"));
        assert!(!out.text.contains("color:red"));
        assert!(!out.text.contains('<'));
    }

    #[test]
    fn literal_strategy_recovers_text_from_broken_pdf() {
        // Not parseable as a PDF, so the heuristics run over the raw bytes.
        let bytes = b"garbage \x01\x02 (Quarterly revenue rose sharply) junk (in the last period) end";
        let out = extract_text(bytes, MIME_PDF).unwrap();
        assert_eq!(out.strategy, Some(Strategy::Literal));
        assert!(out.text.contains("Quarterly revenue rose sharply"));
        assert!(out.text.contains("in the last period"));
    }

    #[test]
    fn literal_escapes_are_unescaped() {
        let bytes = b"(a \\(nested\\) literal with a\\ttab and more padding text)";
        let out = extract_text(bytes, MIME_PDF).unwrap();
        assert!(out.text.contains("a (nested) literal"));
        assert!(out.text.contains("a\ttab"));
    }

    #[test]
    fn text_object_strategy_requires_show_operator() {
        let block = b"BT /F1 12 Tf (shown text here) Tj (positioned only) Td ET";
        let candidate = text_object_candidate(block);
        assert!(candidate.text.contains("shown text here"));
        assert!(!candidate.text.contains("positioned only"));
    }

    #[test]
    fn text_object_cap_reports_skipped() {
        let mut bytes = Vec::new();
        for i in 0..60 {
            bytes.extend_from_slice(format!("BT (block number {}) Tj ET\n", i).as_bytes());
        }
        let candidate = text_object_candidate(&bytes);
        assert_eq!(candidate.units_skipped, 10);
        assert!(candidate.text.contains("block number 0"));
        assert!(!candidate.text.contains("block number 55"));
    }

    #[test]
    fn select_candidate_picks_longest_above_floor() {
        let candidates = vec![
            Candidate {
                strategy: Strategy::Literal,
                text: "short".into(),
                units_skipped: 0,
            },
            Candidate {
                strategy: Strategy::TextObject,
                text: "a much longer candidate".into(),
                units_skipped: 0,
            },
        ];
        let best = select_candidate(&candidates, MIN_PLAUSIBLE_LEN).unwrap();
        assert_eq!(best.strategy, Strategy::TextObject);
    }

    #[test]
    fn select_candidate_rejects_all_below_floor() {
        let candidates = vec![Candidate {
            strategy: Strategy::Literal,
            text: "tiny".into(),
            units_skipped: 0,
        }];
        assert!(select_candidate(&candidates, MIN_PLAUSIBLE_LEN).is_none());
    }

    #[test]
    fn no_candidates_is_no_readable_text() {
        let err = extract_text(b"\x00\x01\x02\x03 nothing here", MIME_PDF).unwrap_err();
        assert!(matches!(err, ExtractError::NoReadableText));
    }

    #[test]
    fn mostly_binary_candidate_is_rejected_with_diagnostic() {
        // A long literal of almost entirely non-ASCII bytes: readability
        // far below 0.1.
        let mut bytes: Vec<u8> = b"(".to_vec();
        bytes.extend(std::iter::repeat(0x80).take(200));
        bytes.extend_from_slice(b"ab)");
        let err = extract_text(&bytes, MIME_PDF).unwrap_err();
        match err {
            ExtractError::LowReadability { ratio, diagnostic } => {
                assert!(ratio < 0.1, "ratio {} not mostly-binary", ratio);
                assert_eq!(diagnostic, ReadabilityDiagnostic::MostlyBinary);
            }
            other => panic!("expected LowReadability, got {:?}", other),
        }
    }

    #[test]
    fn mixed_encoding_candidate_gets_its_own_diagnostic() {
        // Half readable, half not: ratio lands between 0.1 and 0.5.
        let mut bytes: Vec<u8> = b"(".to_vec();
        bytes.extend_from_slice("readable part ".as_bytes());
        bytes.extend(std::iter::repeat(0x80).take(40));
        bytes.extend_from_slice(b")");
        let err = extract_text(&bytes, MIME_PDF).unwrap_err();
        match err {
            ExtractError::LowReadability { diagnostic, .. } => {
                assert_eq!(diagnostic, ReadabilityDiagnostic::MixedEncoding);
            }
            other => panic!("expected LowReadability, got {:?}", other),
        }
    }

    #[test]
    fn readability_ratio_bounds() {
        assert_eq!(readability_ratio(""), 0.0);
        assert!((readability_ratio("abc 123") - 1.0).abs() < f64::EPSILON);
        assert!(readability_ratio("\u{FFFD}\u{FFFD}ab") < 0.51);
    }
}
