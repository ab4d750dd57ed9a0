//! Append-only buffer of everything a run has produced

/// Grows monotonically until the run settles, then is consumed once by extraction.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    buffer: String,
    chunks: usize,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &str) {
        if chunk.is_empty() {
            return;
        }
        self.buffer.push_str(chunk);
        self.chunks += 1;
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Number of non-empty chunks appended
    pub fn chunk_count(&self) -> usize {
        self.chunks
    }

    pub fn as_str(&self) -> &str {
        &self.buffer
    }

    pub fn into_string(self) -> String {
        self.buffer
    }
}
