//! Whitespace-token chunking with a character budget.
//!
//! The budget counts Unicode scalar values and stands in for a model token
//! budget; it is a heuristic, not a token counter. Chunks are built greedily
//! from whitespace-separated tokens joined by single spaces. A token longer
//! than the budget is emitted alone rather than split, so URLs and other
//! atomic tokens survive intact.

use specpress_shared::{ChunkRecord, PageRecord, Result, SpecPressError};

/// Split `text` into chunks of at most `max_size` characters.
///
/// Empty or whitespace-only text produces no chunks. The only chunks longer
/// than `max_size` are single tokens that are themselves longer.
pub fn split(text: &str, max_size: usize) -> Result<Vec<String>> {
    if max_size == 0 {
        return Err(SpecPressError::validation("chunk size must be positive"));
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for token in text.split_whitespace() {
        let token_len = token.chars().count();
        if current_len > 0 && current_len + 1 + token_len > max_size {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if current_len > 0 {
            current.push(' ');
            current_len += 1;
        }
        current.push_str(token);
        current_len += token_len;
    }

    if current_len > 0 {
        chunks.push(current);
    }
    Ok(chunks)
}

/// Chunk one page, numbering chunks from zero.
pub fn chunk_page(page: &PageRecord, max_size: usize) -> Result<Vec<ChunkRecord>> {
    Ok(split(&page.markdown, max_size)?
        .into_iter()
        .enumerate()
        .map(|(index, text)| ChunkRecord {
            parent_url: page.source_url.clone(),
            index,
            text,
        })
        .collect())
}

/// Chunk every page; the result is in run-global order (page order, then
/// chunk index).
pub fn chunk_pages(pages: &[PageRecord], max_size: usize) -> Result<Vec<ChunkRecord>> {
    let mut chunks = Vec::new();
    for page in pages {
        chunks.extend(chunk_page(page, max_size)?);
    }
    Ok(chunks)
}
