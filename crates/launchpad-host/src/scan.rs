// SPDX-License-Identifier: MIT OR Apache-2.0
//! Substring detection over a chunked byte stream.

/// Finds a needle in a stream that arrives in arbitrary chunks.
///
/// Keeps the last `needle.len() - 1` bytes seen so a match split across two
/// chunks is still found.
#[derive(Debug, Clone)]
pub(crate) struct MarkerScanner {
    needle: Vec<u8>,
    tail: Vec<u8>,
}

impl MarkerScanner {
    pub(crate) fn new(needle: impl AsRef<[u8]>) -> Self {
        Self {
            needle: needle.as_ref().to_vec(),
            tail: Vec::new(),
        }
    }

    /// Feed the next chunk; `true` if the needle occurs in the stream so far.
    pub(crate) fn feed(&mut self, chunk: &[u8]) -> bool {
        if self.needle.is_empty() {
            return true;
        }
        let mut window = std::mem::take(&mut self.tail);
        window.extend_from_slice(chunk);
        let found = window
            .windows(self.needle.len())
            .any(|w| w == self.needle.as_slice());

        let keep = self.needle.len() - 1;
        let start = window.len().saturating_sub(keep);
        window.drain(..start);
        self.tail = window;
        found
    }
}
