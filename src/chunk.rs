//! Split recognised text into overlapping chunks for downstream indexing.
//!
//! Chunks are measured in characters and cut at the largest boundary that
//! fits (paragraph, line, sentence, word) by `text-splitter`. Each chunk
//! carries its byte offset into the text it was cut from, so callers can
//! map a chunk back to its position in the document.

use crate::error::OcrError;
use crate::output::DocumentResult;
use serde::Serialize;
use text_splitter::{ChunkConfig, TextSplitter};

/// Default maximum chunk size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 1700;

/// Default overlap between consecutive chunks in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 80;

/// One chunk of a document's text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextChunk {
    /// 0-based position among the document's chunks.
    pub index: usize,
    /// Byte offset of `text` in the source text.
    pub offset: usize,
    pub text: String,
}

/// Deterministic character-count text chunker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    size: usize,
    overlap: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Self {
            size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl Chunker {
    /// A chunker producing chunks of at most `size` characters, each
    /// repeating up to `overlap` characters of its predecessor.
    ///
    /// # Errors
    /// `InvalidConfig` when `size` is zero or `overlap >= size`.
    pub fn new(size: usize, overlap: usize) -> Result<Self, OcrError> {
        if size == 0 {
            return Err(OcrError::InvalidConfig("Chunk size must be > 0".into()));
        }
        if overlap >= size {
            return Err(OcrError::InvalidConfig(format!(
                "Chunk overlap ({}) must be smaller than chunk size ({})",
                overlap, size
            )));
        }
        Ok(Self { size, overlap })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Cut `text` into chunks. Whitespace-only text yields none.
    pub fn split(&self, text: &str) -> Vec<TextChunk> {
        // `new` already rejected overlap >= size, the only failure here.
        let config = ChunkConfig::new(self.size)
            .with_overlap(self.overlap)
            .unwrap_or_else(|_| ChunkConfig::new(self.size));

        TextSplitter::new(config)
            .chunk_indices(text)
            .enumerate()
            .map(|(index, (offset, chunk))| TextChunk {
                index,
                offset,
                text: chunk.to_string(),
            })
            .collect()
    }
}

impl DocumentResult {
    /// Chunk the joined document text.
    pub fn chunks(&self, chunker: &Chunker) -> Vec<TextChunk> {
        chunker.split(&self.text)
    }
}
