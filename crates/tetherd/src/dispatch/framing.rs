//! Newline framing over a byte stream.

/// Accumulates raw reads and yields complete `\n`-terminated lines.
///
/// A read may carry no newline, one line, several lines, or lines plus a
/// trailing fragment; fragments stay buffered until a later read completes
/// them.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    buffer: Vec<u8>,
}

impl LineBuffer {
    pub(crate) fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Removes the next complete line, without its terminator.
    pub(crate) fn next_line(&mut self) -> Option<Vec<u8>> {
        let newline = self.buffer.iter().position(|byte| *byte == b'\n')?;
        let mut line: Vec<u8> = self.buffer.drain(..=newline).collect();
        line.pop();
        Some(line)
    }

    /// Removes whatever is buffered, used at end of stream.
    pub(crate) fn take_remainder(&mut self) -> Option<Vec<u8>> {
        (!self.buffer.is_empty()).then(|| std::mem::take(&mut self.buffer))
    }

    /// Bytes held that do not yet form a complete line.
    pub(crate) fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}
