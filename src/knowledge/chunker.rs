//! Paragraph-aware text chunking with overlap.
//!
//! Paragraphs (separated by blank lines) are packed into chunks of at most
//! `chunk_size` characters. Each chunk after the first starts with a tail of
//! the previous chunk, cut after the first sentence boundary inside the
//! overlap window when there is one. A single paragraph longer than
//! `chunk_size` is kept whole. Sizes count characters, not bytes.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const PARAGRAPH_SEPARATOR: &str = "\n\n";

/// Chunk sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Maximum chunk length in characters
    pub chunk_size: usize,
    /// Maximum overlap carried into the next chunk
    pub overlap_size: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            overlap_size: 100,
        }
    }
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, overlap_size: usize) -> Self {
        Self {
            chunk_size,
            overlap_size,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size <= self.overlap_size {
            return Err(Error::validation(format!(
                "chunk_size ({}) must be larger than overlap_size ({})",
                self.chunk_size, self.overlap_size
            )));
        }
        Ok(())
    }
}

/// Split `text` into overlapping chunks.
pub fn chunk_text(text: &str, chunk_size: usize, overlap_size: usize) -> Result<Vec<String>> {
    ChunkingConfig::new(chunk_size, overlap_size).validate()?;

    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut overlap = String::new();
    let mut current_size = 0usize;

    for paragraph in text.split(PARAGRAPH_SEPARATOR) {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }
        let paragraph_len = paragraph.chars().count();

        if current_size + paragraph_len > chunk_size && !current.is_empty() {
            let chunk = join_chunk(&overlap, &current);
            overlap = overlap_tail(&chunk, overlap_size);
            chunks.push(chunk);

            current.clear();
            current_size = if overlap.is_empty() {
                0
            } else {
                overlap.chars().count() + PARAGRAPH_SEPARATOR.len()
            };
        }

        current.push(paragraph);
        current_size += paragraph_len + PARAGRAPH_SEPARATOR.len();
    }

    if !current.is_empty() {
        chunks.push(join_chunk(&overlap, &current));
    }

    Ok(chunks)
}

fn join_chunk(overlap: &str, paragraphs: &[&str]) -> String {
    let body = paragraphs.join(PARAGRAPH_SEPARATOR);
    if overlap.is_empty() {
        body
    } else {
        format!("{}{}{}", overlap, PARAGRAPH_SEPARATOR, body)
    }
}

/// Tail of `chunk` seeded into the next chunk.
///
/// Takes the last `overlap_size` characters and, if they contain `". "`,
/// drops everything up to and including the first one. Never empty for a
/// non-empty chunk and a non-zero overlap.
pub(crate) fn overlap_tail(chunk: &str, overlap_size: usize) -> String {
    if overlap_size == 0 {
        return String::new();
    }
    let len = chunk.chars().count();
    if len <= overlap_size {
        return chunk.to_string();
    }

    let start = chunk
        .char_indices()
        .nth(len - overlap_size)
        .map(|(i, _)| i)
        .unwrap_or(0);
    let window = &chunk[start..];

    match window.find(". ") {
        Some(pos) if pos + 2 < window.len() => window[pos + 2..].to_string(),
        _ => window.to_string(),
    }
}
