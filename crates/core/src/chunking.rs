use crate::error::IngestError;
use crate::models::{Chunk, Document};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    /// Maximum chunk length in characters.
    pub chunk_size: usize,
    /// Trailing characters of each chunk repeated at the start of the
    /// next one, so no span is fully cut off by a boundary.
    pub overlap: usize,
    /// How far back from a hard cut to look for a sentence terminator
    /// before giving up and cutting mid-sentence. Clamped at split
    /// time so a sentence cut always lands past the next chunk's
    /// start.
    pub boundary_window: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1_200,
            overlap: 120,
            boundary_window: 180,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.chunk_size == 0 {
            return Err(IngestError::InvalidConfig(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.overlap == 0 || self.overlap >= self.chunk_size {
            return Err(IngestError::InvalidConfig(format!(
                "overlap {} must be between 1 and chunk_size {} exclusive",
                self.overlap, self.chunk_size
            )));
        }
        Ok(())
    }

    /// Largest usable look-back window for this size/overlap pair.
    /// Keeping it below `chunk_size - overlap` guarantees every cut
    /// advances past the next chunk's start position.
    fn effective_boundary_window(&self) -> usize {
        self.boundary_window
            .min(self.chunk_size.saturating_sub(self.overlap).saturating_sub(1))
    }
}

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('\u{a0}', " ")
}

/// Splits normalized text into overlapping windows. Each cut prefers a
/// sentence terminator within `boundary_window` characters of the hard
/// limit; otherwise it falls back to a hard character cut. Pure and
/// deterministic over its inputs. Assumes a validated config.
pub fn split_text(normalized: &str, config: ChunkingConfig) -> Vec<String> {
    let chars: Vec<char> = normalized.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }
    if chars.len() <= config.chunk_size {
        return vec![chars.iter().collect()];
    }

    let window = config.effective_boundary_window();
    let mut pieces = Vec::new();
    let mut start = 0usize;

    loop {
        let hard_end = (start + config.chunk_size).min(chars.len());
        let end = if hard_end == chars.len() {
            hard_end
        } else {
            sentence_cut(&chars, start, hard_end, window)
        };

        pieces.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start = end - config.overlap;
    }

    pieces
}

fn sentence_cut(chars: &[char], start: usize, hard_end: usize, window: usize) -> usize {
    let floor = hard_end.saturating_sub(window).max(start + 1);
    let mut position = hard_end;
    while position > floor {
        if matches!(chars[position - 1], '.' | '!' | '?') {
            return position;
        }
        position -= 1;
    }
    hard_end
}

/// Splits a document into chunks with contiguous zero-based indices.
/// Chunk metadata inherits the document metadata plus a `source` entry.
pub fn split_document(document: &Document, config: &ChunkingConfig) -> Result<Vec<Chunk>, IngestError> {
    config.validate()?;

    let normalized = normalize_whitespace(&document.raw_text);
    let mut chunks = Vec::new();

    for (index, text) in split_text(&normalized, *config).into_iter().enumerate() {
        let mut metadata = document.metadata.clone();
        metadata.insert("source".to_string(), document.source.clone());

        chunks.push(Chunk {
            id: make_chunk_id(&document.id, index, &text),
            document_id: document.id.clone(),
            text,
            chunk_index: index,
            embedding: None,
            metadata,
        });
    }

    Ok(chunks)
}

/// Chunk ids are deterministic over (document, position, content) and
/// formatted as UUIDs so every store backend accepts them verbatim.
pub fn make_chunk_id(document_id: &str, index: usize, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update(index.to_le_bytes());
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    uuid::Uuid::from_bytes(bytes).to_string()
}
