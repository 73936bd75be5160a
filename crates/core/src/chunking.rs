use crate::error::IngestError;
use crate::extractor::PageText;
use crate::models::{Chunk, IngestionOptions};
use regex::Regex;

// A terminator only ends a sentence when whitespace or the end of input follows,
// so decimals and dotted names stay intact.
const SENTENCE_PATTERN: &str = r"(?:[^.!?]|[.!?]+[^\s.!?])+(?:[.!?]+(?:\s|$))?|[.!?]+";

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub max_chars: usize,
}

impl From<&IngestionOptions> for ChunkingConfig {
    fn from(value: &IngestionOptions) -> Self {
        Self {
            max_chars: value.chunk_max_chars,
        }
    }
}

pub fn normalize_whitespace(text: &str) -> String {
    text.replace('\u{a0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Sentence-greedy chunker with a word-boundary fallback for oversized sentences.
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkingConfig,
    sentences: Regex,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Result<Self, IngestError> {
        if config.max_chars == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "max_chars must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            config,
            sentences: Regex::new(SENTENCE_PATTERN)?,
        })
    }

    pub fn max_chars(&self) -> usize {
        self.config.max_chars
    }

    /// Chunks one block of text; indices start at 0.
    pub fn chunk_text(&self, text: &str, page_number: Option<u32>) -> Vec<Chunk> {
        self.split(text)
            .into_iter()
            .enumerate()
            .map(|(index, piece)| Chunk::new(piece, page_number, index as u32))
            .collect()
    }

    /// Chunks every page and renumbers chunk indices across the whole document.
    pub fn chunk_pages(&self, pages: &[PageText]) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        for page in pages {
            for piece in self.split(&page.text) {
                let index = chunks.len() as u32;
                chunks.push(Chunk::new(piece, Some(page.number), index));
            }
        }
        chunks
    }

    fn split(&self, text: &str) -> Vec<String> {
        let normalized = normalize_whitespace(text);
        if normalized.is_empty() {
            return Vec::new();
        }

        let sentences = self
            .sentences
            .find_iter(&normalized)
            .map(|found| found.as_str().trim())
            .filter(|sentence| !sentence.is_empty());

        let mut pieces = Vec::new();
        for fragment in accumulate(sentences, self.config.max_chars) {
            if char_len(&fragment) > self.config.max_chars {
                pieces.extend(accumulate(
                    fragment.split_whitespace(),
                    self.config.max_chars,
                ));
            } else {
                pieces.push(fragment);
            }
        }
        pieces
    }
}

/// Greedily joins parts with single spaces while the result stays within `max_chars`.
fn accumulate<'a>(parts: impl Iterator<Item = &'a str>, max_chars: usize) -> Vec<String> {
    let mut emitted = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for part in parts {
        let part_len = char_len(part);
        if current.is_empty() {
            current.push_str(part);
            current_len = part_len;
            continue;
        }

        if current_len + 1 + part_len <= max_chars {
            current.push(' ');
            current.push_str(part);
            current_len += 1 + part_len;
        } else {
            emitted.push(std::mem::take(&mut current));
            current.push_str(part);
            current_len = part_len;
        }
    }

    if !current.is_empty() {
        emitted.push(current);
    }

    emitted
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}
