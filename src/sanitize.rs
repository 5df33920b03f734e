//! Text sanitation for extracted document text.
//!
//! Every extraction path (plain text, markup stripping, PDF heuristics,
//! caller-supplied pre-extracted text) runs through [`sanitize`] before
//! chunking. The function is idempotent: `sanitize(sanitize(x)) == sanitize(x)`.
//!
//! Newlines are preserved rather than flattened because the chunker splits
//! on blank-line boundaries; only horizontal whitespace runs collapse to a
//! single space, and runs of three or more newlines collapse to exactly two.

/// Clean extracted text: strip non-printable control characters (keeping
/// `\n`, `\t`, `\r`), drop U+FFFD replacement characters, normalize line
/// endings, collapse whitespace runs, and trim.
pub fn sanitize(text: &str) -> String {
    // Pass 1: drop control chars and replacement chars, normalize \r\n / \r.
    let mut cleaned = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\u{FFFD}' => {}
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                cleaned.push('\n');
            }
            '\n' => cleaned.push('\n'),
            '\t' => cleaned.push('\t'),
            c if c.is_control() => {}
            c => cleaned.push(c),
        }
    }

    // Pass 2: collapse horizontal whitespace runs to one space and newline
    // runs of 3+ to a blank line, trimming trailing spaces before newlines.
    let mut out = String::with_capacity(cleaned.len());
    let mut pending_newlines = 0usize;
    let mut pending_space = false;
    for c in cleaned.chars() {
        match c {
            '\n' => {
                pending_newlines += 1;
                pending_space = false;
            }
            ' ' | '\t' => {
                pending_space = true;
            }
            c => {
                if pending_newlines > 0 {
                    if !out.is_empty() {
                        out.push('\n');
                        if pending_newlines > 1 {
                            out.push('\n');
                        }
                    }
                    pending_newlines = 0;
                } else if pending_space && !out.is_empty() {
                    out.push(' ');
                }
                pending_space = false;
                out.push(c);
            }
        }
    }

    out
}
