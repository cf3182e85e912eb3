//! Hierarchical (parent/child) chunker for legislation text.
//!
//! Small documents become a single parent chunk holding the full text.
//! Larger documents are split into coarse parent chunks, and each parent
//! is split again into fine child chunks. Children are what the search
//! legs match; parents are looked up afterwards to give the model enough
//! surrounding context to cite from.
//!
//! # Algorithm
//!
//! 1. If the document has fewer than `small_doc_chars` characters, emit one
//!    parent with the whole text and no children.
//! 2. Otherwise split the text into parents of at most `parent_tokens`
//!    tokens, then split each parent into children of at most
//!    `child_tokens` tokens.
//! 3. Splitting happens on paragraph boundaries (`\n\n`). A paragraph that
//!    is larger than the budget is hard-split at the nearest newline or
//!    space.
//!
//! Chunk ids are UUIDv5 values derived from `(document_id, role, index)`
//! so re-chunking the same text yields the same ids.
//!
//! # Example
//!
//! ```rust
//! use auslaw_core::chunk::{chunk_document, ChunkingParams};
//!
//! let tree = chunk_document("rta-2010", "Short Act text.", &ChunkingParams::default());
//! assert_eq!(tree.parents.len(), 1);
//! assert!(tree.children.is_empty());
//! ```

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::{Chunk, ChunkRole};

/// Approximate characters-per-token ratio.
///
/// A rough heuristic (4 chars ≈ 1 token). Token counts only drive chunk
/// sizing, so a real tokenizer is not required.
pub const CHARS_PER_TOKEN: usize = 4;

/// Size thresholds for [`chunk_document`].
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkingParams {
    /// Documents shorter than this (in characters) are kept whole.
    pub small_doc_chars: usize,
    pub parent_tokens: usize,
    pub child_tokens: usize,
}

impl Default for ChunkingParams {
    fn default() -> Self {
        Self {
            small_doc_chars: 10_000,
            parent_tokens: 2000,
            child_tokens: 500,
        }
    }
}

/// Output of [`chunk_document`]: parents and children as flat arenas.
///
/// Children point at parents through `parent_id`. Parents must be written
/// to the store before children.
#[derive(Debug, Clone, Default)]
pub struct ChunkTree {
    pub parents: Vec<Chunk>,
    pub children: Vec<Chunk>,
}

impl ChunkTree {
    pub fn children_of<'a>(&'a self, parent_id: &'a str) -> impl Iterator<Item = &'a Chunk> + 'a {
        self.children
            .iter()
            .filter(move |c| c.parent_id.as_deref() == Some(parent_id))
    }

    /// All chunks in insertion order (parents first).
    pub fn iter(&self) -> impl Iterator<Item = &Chunk> {
        self.parents.iter().chain(self.children.iter())
    }

    pub fn len(&self) -> usize {
        self.parents.len() + self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parents.is_empty() && self.children.is_empty()
    }
}

/// Approximate token count for `text`, rounding up.
pub fn count_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Split a document into a parent/child [`ChunkTree`].
///
/// Parent ordinals run `0..P`. Child ordinals run `0..C` across the whole
/// document, so they stay contiguous regardless of which parent a child
/// belongs to.
pub fn chunk_document(document_id: &str, text: &str, params: &ChunkingParams) -> ChunkTree {
    if text.chars().count() < params.small_doc_chars {
        return ChunkTree {
            parents: vec![make_chunk(document_id, ChunkRole::Parent, None, 0, text)],
            children: Vec::new(),
        };
    }

    let mut tree = ChunkTree::default();
    let mut child_index: i64 = 0;

    for (p, parent_text) in split_text(text, params.parent_tokens).iter().enumerate() {
        let parent = make_chunk(document_id, ChunkRole::Parent, None, p as i64, parent_text);
        for child_text in split_text(parent_text, params.child_tokens) {
            tree.children.push(make_chunk(
                document_id,
                ChunkRole::Child,
                Some(&parent.id),
                child_index,
                &child_text,
            ));
            child_index += 1;
        }
        tree.parents.push(parent);
    }

    tree
}

/// Split text into non-overlapping pieces on paragraph boundaries,
/// respecting `max_tokens`.
///
/// At least one piece is always returned, even for empty text.
pub fn split_text(text: &str, max_tokens: usize) -> Vec<String> {
    let max_chars = (max_tokens * CHARS_PER_TOKEN).max(1);

    if text.trim().is_empty() {
        return vec![text.trim().to_string()];
    }

    let mut pieces = Vec::new();
    let mut current_buf = String::new();

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        let would_be = if current_buf.is_empty() {
            trimmed.len()
        } else {
            current_buf.len() + 2 + trimmed.len()
        };

        if would_be > max_chars && !current_buf.is_empty() {
            pieces.push(std::mem::take(&mut current_buf));
        }

        if trimmed.len() > max_chars {
            hard_split(trimmed, max_chars, &mut pieces);
        } else {
            if !current_buf.is_empty() {
                current_buf.push_str("\n\n");
            }
            current_buf.push_str(trimmed);
        }
    }

    if !current_buf.is_empty() {
        pieces.push(current_buf);
    }

    if pieces.is_empty() {
        pieces.push(text.trim().to_string());
    }

    pieces
}

/// Break one oversized paragraph at newline/space boundaries.
fn hard_split(paragraph: &str, max_chars: usize, out: &mut Vec<String>) {
    let mut remaining = paragraph;
    while !remaining.is_empty() {
        let split_at = at_least_one_char(
            remaining,
            snap_to_char_boundary(remaining, remaining.len().min(max_chars)),
        );
        let actual_split = if split_at < remaining.len() {
            remaining[..split_at]
                .rfind('\n')
                .or_else(|| remaining[..split_at].rfind(' '))
                .map(|pos| pos + 1)
                .unwrap_or(split_at)
        } else {
            split_at
        };
        let actual_split = at_least_one_char(remaining, snap_to_char_boundary(remaining, actual_split));

        let piece = remaining[..actual_split].trim();
        if !piece.is_empty() {
            out.push(piece.to_string());
        }
        remaining = &remaining[actual_split..];
    }
}

/// Ensure a split index advances by at least one character.
fn at_least_one_char(s: &str, index: usize) -> usize {
    if index == 0 && !s.is_empty() {
        s.char_indices().nth(1).map(|(i, _)| i).unwrap_or(s.len())
    } else {
        index
    }
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn make_chunk(
    document_id: &str,
    role: ChunkRole,
    parent_id: Option<&str>,
    index: i64,
    text: &str,
) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    let key = format!("{}/{}/{}", document_id, role.as_str(), index);
    Chunk {
        id: Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()).to_string(),
        document_id: document_id.to_string(),
        parent_id: parent_id.map(str::to_string),
        role,
        chunk_index: index,
        text: text.to_string(),
        token_count: count_tokens(text),
        hash,
    }
}
