//! PDF ingestion: one text unit per page, in page order.

use std::fs;
use std::path::Path;

use lazy_static::lazy_static;
use lopdf::Document;
use regex::Regex;
use tracing::{debug, info, warn};
use unicode_normalization::UnicodeNormalization;

use crate::error::{QaError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// 1-based page number.
    pub number: u32,
    pub text: String,
}

pub fn load_pdf(path: impl AsRef<Path>) -> Result<Vec<Page>> {
    let path = path.as_ref();
    let unreadable = |reason: String| QaError::DocumentUnreadable {
        path: path.to_path_buf(),
        reason,
    };

    let bytes = fs::read(path).map_err(|e| unreadable(e.to_string()))?;
    let doc = Document::load_mem(&bytes).map_err(|e| unreadable(e.to_string()))?;

    let page_numbers: Vec<u32> = doc.get_pages().keys().copied().collect();
    if page_numbers.is_empty() {
        return Err(unreadable("document has no pages".into()));
    }

    let mut pages = Vec::with_capacity(page_numbers.len());
    for number in page_numbers {
        let raw = match doc.extract_text(&[number]) {
            Ok(text) => text,
            Err(e) => {
                warn!(page = number, error = %e, "no extractable text on page");
                String::new()
            }
        };
        let text = normalize_text(&raw);
        debug!(page = number, chars = text.chars().count(), "extracted page");
        pages.push(Page { number, text });
    }

    info!(
        path = %path.display(),
        pages = pages.len(),
        chars = pages.iter().map(|p| p.text.chars().count()).sum::<usize>(),
        "loaded PDF"
    );
    Ok(pages)
}

/// Hex digest of the file contents.
pub fn fingerprint(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|e| QaError::DocumentUnreadable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

/// NFC, `\n` line endings, no trailing spaces, no surrounding blank lines.
fn normalize_text(raw: &str) -> String {
    lazy_static! {
        static ref TRAILING_SPACE: Regex = Regex::new(r"[ \t]+\n").unwrap();
    }
    let text = raw.nfc().collect::<String>().replace("\r\n", "\n").replace('\r', "\n");
    let text = TRAILING_SPACE.replace_all(&text, "\n");
    text.trim().to_string()
}
