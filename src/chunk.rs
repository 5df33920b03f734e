//! Paragraph-boundary text chunker with overlap.
//!
//! Splits sanitized document text into chunk strings that respect a
//! configurable character limit. Splitting occurs on paragraph boundaries
//! (`\n\n`) to preserve semantic coherence; when a chunk is emitted, the
//! tail words of the emitted text seed the next chunk so context survives
//! the boundary. Paragraphs that alone exceed the limit fall back to
//! sentence-boundary splitting, and sentence runs with no boundary at all
//! are hard-split at word boundaries.
//!
//! The output is non-lossy in content: every non-whitespace character of
//! the input appears in at least one chunk (overlap may duplicate some
//! across adjacent chunks). Chunk lengths never exceed
//! `max_chunk_size + overlap`.

/// Default chunk size in characters.
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 2000;
/// Default overlap budget in characters (carried as ~`overlap / 10` words).
pub const DEFAULT_OVERLAP: usize = 200;

/// Split text into chunk strings. Deterministic for identical input.
///
/// `overlap` is a character budget; the seed carried into the next chunk is
/// the last `overlap / 10` words of the emitted chunk, truncated so the
/// seeded prefix never pushes a chunk past `max_chunk_size + overlap`.
pub fn chunk_text(text: &str, max_chunk_size: usize, overlap: usize) -> Vec<String> {
    let overlap_words = overlap / 10;
    let mut chunks: Vec<String> = Vec::new();
    let mut buf = String::new();

    for para in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        // A paragraph that alone exceeds the limit is split by sentences.
        if para.len() > max_chunk_size {
            if !buf.is_empty() {
                chunks.push(std::mem::take(&mut buf));
            }
            chunk_sentences(para, max_chunk_size, &mut chunks);
            continue;
        }

        if !buf.is_empty() && buf.len() + 2 + para.len() > max_chunk_size {
            let seed = overlap_tail(&buf, overlap_words, overlap);
            chunks.push(std::mem::take(&mut buf));
            if !seed.is_empty() {
                buf.push_str(&seed);
                buf.push(' ');
            }
            buf.push_str(para);
        } else {
            if !buf.is_empty() {
                buf.push_str("\n\n");
            }
            buf.push_str(para);
        }
    }

    if !buf.is_empty() {
        chunks.push(buf);
    }

    // Guarantee at least one chunk.
    if chunks.is_empty() {
        chunks.push(text.to_string());
    }

    chunks
}

/// Accumulate the sentences of an oversized paragraph under the same size
/// rule. Sentence terminators stay attached to their sentence.
fn chunk_sentences(para: &str, max_chunk_size: usize, out: &mut Vec<String>) {
    let mut buf = String::new();

    for sentence in split_sentences(para) {
        if sentence.len() > max_chunk_size {
            if !buf.is_empty() {
                out.push(std::mem::take(&mut buf));
            }
            hard_split(sentence, max_chunk_size, out);
            continue;
        }

        if !buf.is_empty() && buf.len() + 1 + sentence.len() > max_chunk_size {
            out.push(std::mem::take(&mut buf));
        }
        if !buf.is_empty() {
            buf.push(' ');
        }
        buf.push_str(sentence);
    }

    if !buf.is_empty() {
        out.push(buf);
    }
}

/// Split on sentence boundaries (`.`, `!`, `?`), keeping the terminator
/// with its sentence.
fn split_sentences(para: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;

    for (i, c) in para.char_indices() {
        if matches!(c, '.' | '!' | '?') {
            let end = i + c.len_utf8();
            let sentence = para[start..end].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = end;
        }
    }

    let tail = para[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }

    sentences
}

/// Last-resort split for text with no sentence boundaries: cut at word
/// boundaries near the limit, falling back to a character cut.
fn hard_split(text: &str, max_chunk_size: usize, out: &mut Vec<String>) {
    let mut remaining = text;
    while !remaining.is_empty() {
        if remaining.len() <= max_chunk_size {
            out.push(remaining.to_string());
            break;
        }
        let limit = floor_char_boundary(remaining, max_chunk_size);
        let cut = remaining[..limit]
            .rfind(' ')
            .map(|pos| pos + 1)
            .unwrap_or(limit);
        let piece = remaining[..cut].trim();
        if !piece.is_empty() {
            out.push(piece.to_string());
        }
        remaining = remaining[cut..].trim_start();
    }
}

/// The last `words` whitespace-separated words of `text`, truncated from the
/// front so that the result plus a joining space fits in `budget` characters.
fn overlap_tail(text: &str, words: usize, budget: usize) -> String {
    if words == 0 || budget == 0 {
        return String::new();
    }

    let mut tail_words: Vec<&str> = text.split_whitespace().rev().take(words).collect();
    tail_words.reverse();
    let mut tail = tail_words.join(" ");

    while tail.len() + 1 > budget {
        match tail.find(' ') {
            Some(pos) => tail = tail[pos + 1..].to_string(),
            None => return String::new(),
        }
    }

    tail
}

/// Largest index `<= index` that lies on a UTF-8 character boundary.
fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}
