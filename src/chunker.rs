//! Overlapping fixed-size windows over page text.
//!
//! Windows are measured in characters. A window prefers to end just after a
//! paragraph break, then a line break, then a space; with none available in
//! range it is cut hard at `size`. The following window starts at most
//! `overlap` characters before the previous end, moved forward to the start
//! of a word when the overlap region contains whitespace.

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::document::Page;
use crate::error::{QaError, Result};

const SEPARATORS: [&str; 3] = ["\n\n", "\n", " "];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkConfig {
    size: usize,
    overlap: usize,
}

impl ChunkConfig {
    pub fn new(size: usize, overlap: usize) -> Result<Self> {
        if overlap >= size {
            return Err(QaError::InvalidChunkConfiguration { size, overlap });
        }
        Ok(Self { size, overlap })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: Uuid,
    pub page: u32,
    /// Position of this chunk within its page.
    pub index: usize,
    /// Character offsets `[start, end)` into the page text.
    pub start: usize,
    pub end: usize,
    pub text: String,
}

pub fn split_pages(pages: &[Page], config: &ChunkConfig) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    for page in pages {
        let chars: Vec<char> = page.text.chars().collect();
        for (index, (start, end)) in windows(&chars, config).into_iter().enumerate() {
            chunks.push(Chunk {
                id: Uuid::new_v4(),
                page: page.number,
                index,
                start,
                end,
                text: chars[start..end].iter().collect(),
            });
        }
    }
    debug!(
        pages = pages.len(),
        chunks = chunks.len(),
        size = config.size,
        overlap = config.overlap,
        "split document"
    );
    chunks
}

fn windows(chars: &[char], config: &ChunkConfig) -> Vec<(usize, usize)> {
    let n = chars.len();
    let mut spans = Vec::new();
    let mut start = 0;

    while start < n {
        let hard_end = (start + config.size).min(n);
        let end = if hard_end == n {
            n
        } else {
            // Ending past start + overlap keeps the next start strictly ahead.
            find_break(chars, start + config.overlap + 1, hard_end).unwrap_or(hard_end)
        };
        spans.push((start, end));
        if end == n {
            break;
        }

        let mut next = end - config.overlap;
        if let Some(ws) = (next..end).find(|&i| chars[i].is_whitespace()) {
            next = ws + 1;
        }
        start = next;
    }

    spans
}

/// Largest `p` in `lo..=hi` directly preceded by the highest-priority separator found.
fn find_break(chars: &[char], lo: usize, hi: usize) -> Option<usize> {
    for sep in SEPARATORS {
        let sep: Vec<char> = sep.chars().collect();
        let found = (lo.max(sep.len())..=hi)
            .rev()
            .find(|&p| chars[p - sep.len()..p] == sep[..]);
        if found.is_some() {
            return found;
        }
    }
    None
}
