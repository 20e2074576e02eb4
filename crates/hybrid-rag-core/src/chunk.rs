//! Token-window text chunker with overlap and boundary snapping.
//!
//! Splits document text into [`Chunk`]s of at most `chunk_size` tokens,
//! where consecutive chunks share exactly `chunk_overlap` tokens. A token is
//! a run of non-whitespace characters plus the whitespace that follows it,
//! so concatenating the tokens of a text gives back the text byte for byte.
//!
//! # Algorithm
//!
//! 1. Split the text into tokens. Blank text produces no chunks.
//! 2. If the whole text fits in one window, emit it as a single chunk.
//! 3. Otherwise take a window of `chunk_size` tokens starting at `start`.
//! 4. Inside the last quarter of the window, look for the latest paragraph
//!    break, then the latest sentence end, then the latest line break. If
//!    none is found, cut hard at the window edge.
//! 5. The next window starts `chunk_overlap` tokens before the cut.
//!
//! Every chunk is longer than the overlap, so the loop always advances.
//! Chunk ids are UUID v5 over document id, index, and chunk hash: chunking
//! the same text twice yields the same ids.
//!
//! # Example
//!
//! ```rust
//! use hybrid_rag_core::chunk::{chunk_text, reassemble};
//! use hybrid_rag_core::settings::ChunkingSettings;
//!
//! let settings = ChunkingSettings { chunk_size: 4, chunk_overlap: 1 };
//! let text = "one two three four five six seven";
//! let chunks = chunk_text("doc-1", text, &settings, 0);
//! assert_eq!(chunks.len(), 2);
//! assert_eq!(reassemble(&chunks), text);
//! ```

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::Chunk;
use crate::settings::ChunkingSettings;

/// Boundary strength of the whitespace after a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Boundary {
    None,
    Line,
    Sentence,
    Paragraph,
}

/// Split text into whitespace-delimited tokens, keeping trailing whitespace
/// attached. Leading whitespace of the text belongs to the first token.
pub fn split_tokens(text: &str) -> Vec<&str> {
    let mut starts = Vec::new();
    let mut seen_word = false;
    let mut prev_ws = true;

    for (i, c) in text.char_indices() {
        let ws = c.is_whitespace();
        if !ws && prev_ws {
            if seen_word {
                starts.push(i);
            }
            seen_word = true;
        }
        prev_ws = ws;
    }

    if !seen_word {
        return Vec::new();
    }

    let mut tokens = Vec::with_capacity(starts.len() + 1);
    let mut begin = 0;
    for s in starts {
        tokens.push(&text[begin..s]);
        begin = s;
    }
    tokens.push(&text[begin..]);
    tokens
}

/// Number of tokens in `text`, as counted by the chunker.
pub fn count_tokens(text: &str) -> usize {
    split_tokens(text).len()
}

/// Drop the first `n` tokens of `text`.
pub fn strip_leading_tokens(text: &str, n: usize) -> &str {
    if n == 0 {
        return text;
    }
    let tokens = split_tokens(text);
    if n >= tokens.len() {
        return "";
    }
    let skipped: usize = tokens[..n].iter().map(|t| t.len()).sum();
    &text[skipped..]
}

/// Split `text` into overlapping chunks.
///
/// Settings are expected to be validated; an overlap that is not smaller
/// than the chunk size is clamped to `chunk_size - 1`.
pub fn chunk_text(
    document_id: &str,
    text: &str,
    settings: &ChunkingSettings,
    created_at: i64,
) -> Vec<Chunk> {
    let size = settings.chunk_size.max(1);
    let overlap = settings.chunk_overlap.min(size - 1);

    let tokens = split_tokens(text);
    let n = tokens.len();
    if n == 0 {
        return Vec::new();
    }
    if n <= size {
        return vec![make_chunk(document_id, 0, text, n, 0, created_at)];
    }

    let mut chunks = Vec::new();
    let mut start = 0;
    let mut overlap_tokens = 0;

    loop {
        let hard_end = (start + size).min(n);
        let end = if hard_end == n {
            n
        } else {
            natural_end(&tokens, start, hard_end, size, overlap)
        };

        let body: String = tokens[start..end].concat();
        chunks.push(make_chunk(
            document_id,
            chunks.len() as i64,
            &body,
            end - start,
            overlap_tokens,
            created_at,
        ));

        if end == n {
            break;
        }
        start = end - overlap;
        overlap_tokens = overlap;
    }

    chunks
}

/// Rebuild the source text from a document's chunks, dropping the overlap
/// each chunk shares with its predecessor.
pub fn reassemble(chunks: &[Chunk]) -> String {
    let mut ordered: Vec<&Chunk> = chunks.iter().collect();
    ordered.sort_by_key(|c| c.chunk_index);

    let mut out = String::new();
    for c in ordered {
        out.push_str(strip_leading_tokens(&c.text, c.overlap_tokens));
    }
    out
}

/// Pick the cut point for a window `[start, hard_end)`.
fn natural_end(tokens: &[&str], start: usize, hard_end: usize, size: usize, overlap: usize) -> usize {
    let lo = (start + overlap + 1).max(start + size - size / 4);

    let mut best = (Boundary::None, hard_end);
    for end in (lo..=hard_end).rev() {
        let b = boundary_after(tokens[end - 1]);
        if b > best.0 {
            best = (b, end);
            if b == Boundary::Paragraph {
                break;
            }
        }
    }
    best.1
}

fn boundary_after(token: &str) -> Boundary {
    let word = token.trim_end();
    let ws = &token[word.len()..];

    if ws.matches('\n').count() >= 2 {
        return Boundary::Paragraph;
    }
    let bare = word.trim_end_matches(['"', '\'', ')', ']']);
    if !ws.is_empty() && bare.ends_with(['.', '!', '?']) {
        return Boundary::Sentence;
    }
    if ws.contains('\n') {
        return Boundary::Line;
    }
    Boundary::None
}

/// SHA-256 hex digest of `text`.
pub fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn make_chunk(
    document_id: &str,
    index: i64,
    text: &str,
    token_count: usize,
    overlap_tokens: usize,
    created_at: i64,
) -> Chunk {
    let hash = sha256_hex(text);
    let key = format!("{}:{}:{}", document_id, index, hash);

    Chunk {
        id: Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()).to_string(),
        document_id: document_id.to_string(),
        chunk_index: index,
        token_count,
        overlap_tokens,
        text: text.to_string(),
        hash,
        created_at,
    }
}
