//! Overlapping word-window text chunker.
//!
//! Splits document text into fixed-size word windows with a configurable
//! overlap, the unit of embedding and retrieval. Chunking is a pure function
//! of the input text and parameters: the sequence is finite, restartable, and
//! identical on every call.
//!
//! Record ids are derived from `(document_id, chunk_index)` so they can be
//! regenerated without consulting the index.

/// Lazy iterator over word windows. Produced by [`chunk_words`].
///
/// Never materializes the full chunk list; each `next()` joins one window.
pub struct WordWindows {
    words: Vec<String>,
    window: usize,
    step: usize,
    pos: usize,
    done: bool,
}

impl Iterator for WordWindows {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        while !self.done {
            if self.pos >= self.words.len() {
                self.done = true;
                return None;
            }
            let end = (self.pos + self.window).min(self.words.len());
            let joined = self.words[self.pos..end].join(" ");
            // A window that reaches the end is the last one.
            if end == self.words.len() {
                self.done = true;
            } else {
                self.pos += self.step;
            }
            let trimmed = joined.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
        None
    }
}

/// Split `text` into overlapping word windows of `window_size` words,
/// advancing by `window_size - overlap` each step.
///
/// The advance step is clamped to at least 1 so `overlap >= window_size`
/// cannot loop forever. Empty or whitespace-only text yields zero chunks.
pub fn chunk_words(text: &str, window_size: usize, overlap: usize) -> WordWindows {
    let words: Vec<String> = text.split_whitespace().map(|w| w.to_string()).collect();
    let window = window_size.max(1);
    let step = window.saturating_sub(overlap).max(1);
    WordWindows {
        words,
        window,
        step,
        pos: 0,
        done: false,
    }
}

/// Count chunks without joining any window text.
pub fn count_chunks(word_count: usize, window_size: usize, overlap: usize) -> usize {
    if word_count == 0 {
        return 0;
    }
    let window = window_size.max(1);
    let step = window.saturating_sub(overlap).max(1);
    if word_count <= window {
        return 1;
    }
    1 + (word_count - window).div_ceil(step)
}

/// Deterministic vector-record id for a chunk.
pub fn chunk_id(document_id: &str, index: i64) -> String {
    format!("{}_{}", document_id, index)
}

/// Recover the chunk index from a record id produced by [`chunk_id`].
pub fn parse_chunk_index(id: &str) -> Option<i64> {
    id.rsplit('_').next()?.parse().ok()
}
