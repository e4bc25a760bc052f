//! Reassembles newline-terminated lines from a byte stream that arrives in
//! arbitrary chunks.
//!
//! Serial reads return whatever happens to be sitting in the hardware buffer,
//! so a read can end partway through a line, or even between the `\r` and the
//! `\n` of a terminator. The [`LineFramer`] keeps the unterminated tail around
//! and glues it onto the front of the next chunk.
//!
//! A line longer than the cap is dropped whole, no matter how the reads split
//! it: once an unterminated fragment outgrows the cap, everything up to the
//! next terminator is thrown away too.

use log::warn;

/// Default cap on the length of an unterminated fragment, in bytes.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 4096;

/// A stateful, incremental line splitter.
#[derive(Debug, Clone)]
pub struct LineFramer {
    partial: Vec<u8>,
    max_line_length: usize,
    // inside an overlong line; drop up to the next terminator
    discarding: bool,
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINE_LENGTH)
    }
}

impl LineFramer {
    /// Makes an empty framer that discards any unterminated fragment longer
    /// than `max_line_length` bytes.
    pub fn new(max_line_length: usize) -> Self {
        Self {
            partial: Vec::new(),
            max_line_length,
            discarding: false,
        }
    }

    /// Feeds a chunk of raw bytes and returns an iterator over every line
    /// completed so far, without their terminators.
    ///
    /// The iterator is lazy: lines it has not yet yielded when it is dropped
    /// stay buffered and come out of the next call.
    pub fn push(&mut self, bytes: &[u8]) -> Lines<'_> {
        self.partial.extend_from_slice(bytes);
        Lines { framer: self }
    }

    /// The bytes received since the last terminator.
    pub fn pending(&self) -> &[u8] {
        match self.partial.iter().rposition(|&b| b == b'\n') {
            Some(idx) => &self.partial[idx + 1..],
            None => &self.partial,
        }
    }

    /// Throws away any buffered bytes.
    pub fn clear(&mut self) {
        self.partial.clear();
        self.discarding = false;
    }

    fn next_line(&mut self) -> Option<String> {
        loop {
            let Some(end) = self.partial.iter().position(|&b| b == b'\n') else {
                if self.discarding {
                    self.partial.clear();
                } else if self.partial.len() > self.max_line_length {
                    warn!(
                        "Discarding {} bytes received without a line terminator",
                        self.partial.len()
                    );
                    self.partial.clear();
                    self.discarding = true;
                }
                return None;
            };

            let mut raw: Vec<u8> = self.partial.drain(..=end).collect();
            raw.pop();
            if self.discarding {
                self.discarding = false;
                continue;
            }
            if raw.len() > self.max_line_length {
                warn!("Discarding a {} byte line", raw.len());
                continue;
            }
            if raw.last() == Some(&b'\r') {
                raw.pop();
            }

            // Invalid UTF-8 is replaced rather than rejected, so one corrupted
            // byte only spoils the line it sits in.
            return Some(String::from_utf8_lossy(&raw).into_owned());
        }
    }
}

/// The lines completed by one [`LineFramer::push`].
#[derive(Debug)]
pub struct Lines<'a> {
    framer: &'a mut LineFramer,
}

impl Iterator for Lines<'_> {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        self.framer.next_line()
    }
}
