//! Chunk Buffer
//!
//! Re-buffers token-sized model deltas into readable units: a unit is
//! flushed at a sentence end, at the start of a markdown block, at a
//! closing code fence, or once the buffer grows past the length cap.
//! Every flushed unit is also kept so the whole reply can be persisted
//! once the stream is exhausted.

/// Buffer length (in chars) past which a flush is forced.
pub const MAX_BUFFER_CHARS: usize = 200;

const SENTENCE_ENDS: [char; 3] = ['.', '!', '?'];
const BLOCK_STARTS: [&str; 5] = ["#", "-", "*", "1.", "```"];
const CODE_FENCE: &str = "```";

#[derive(Debug, Clone)]
pub struct ChunkBuffer {
    buffer: String,
    flushed: Vec<String>,
    max_chars: usize,
}

impl Default for ChunkBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkBuffer {
    pub fn new() -> Self {
        Self::with_max_chars(MAX_BUFFER_CHARS)
    }

    pub fn with_max_chars(max_chars: usize) -> Self {
        Self {
            buffer: String::new(),
            flushed: Vec::new(),
            max_chars,
        }
    }

    /// Feed one delta. Returns a unit to deliver when this delta triggers a flush.
    pub fn push(&mut self, delta: &str) -> Option<String> {
        let delta = delta.trim();
        if delta.is_empty() {
            return None;
        }

        self.buffer.push_str(delta);

        if should_flush(delta) || self.buffer.chars().count() > self.max_chars {
            if self.buffer.ends_with(CODE_FENCE) {
                self.buffer.push('\n');
            }
            return Some(self.flush());
        }

        self.buffer.push(' ');
        None
    }

    /// Drain what is left once the source is exhausted: the trailing unit
    /// (if any) and the complete text to persist.
    pub fn finish(mut self) -> (Option<String>, String) {
        let tail = if self.buffer.is_empty() {
            None
        } else {
            Some(self.flush())
        };
        let full = self.flushed.join(" ").trim().to_string();
        (tail, full)
    }

    /// Text assembled so far, including the unflushed buffer.
    pub fn assembled(&self) -> String {
        let mut parts = self.flushed.clone();
        if !self.buffer.is_empty() {
            parts.push(self.buffer.clone());
        }
        parts.join(" ").trim().to_string()
    }

    fn flush(&mut self) -> String {
        let unit = std::mem::take(&mut self.buffer);
        self.flushed.push(unit.clone());
        unit
    }
}

fn should_flush(delta: &str) -> bool {
    delta.ends_with(SENTENCE_ENDS)
        || BLOCK_STARTS.iter().any(|start| delta.starts_with(start))
        || delta.ends_with(CODE_FENCE)
}
