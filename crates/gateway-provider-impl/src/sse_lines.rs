use bytes::BytesMut;

/// Frame-boundary tolerant reader for vendor SSE streams: accumulates bytes
/// until a blank line, then returns the joined `data:` payload for that
/// frame. Vendors in this crate never use `event:`/`id:` lines, so unlike
/// `gateway_protocol::SseDecoder` this only tracks `data:`.
#[derive(Default)]
pub(crate) struct VendorSseLines {
    buffer: BytesMut,
    data_lines: Vec<String>,
}

impl VendorSseLines {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        self.drain()
    }

    /// Flushes a trailing partial frame once the upstream body has closed.
    pub(crate) fn finish(&mut self) -> Vec<String> {
        let mut frames = self.drain();
        if !self.buffer.is_empty() {
            let line = String::from_utf8_lossy(&self.buffer).into_owned();
            self.buffer.clear();
            self.consume_line(&line);
        }
        if let Some(frame) = self.finish_frame() {
            frames.push(frame);
        }
        frames
    }

    fn drain(&mut self) -> Vec<String> {
        let mut frames = Vec::new();
        loop {
            let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') else {
                break;
            };
            let raw = self.buffer.split_to(pos + 1);
            let mut line = String::from_utf8_lossy(&raw[..raw.len() - 1]).into_owned();
            if line.ends_with('\r') {
                line.pop();
            }
            if line.is_empty() {
                if let Some(frame) = self.finish_frame() {
                    frames.push(frame);
                }
                continue;
            }
            self.consume_line(&line);
        }
        frames
    }

    fn consume_line(&mut self, line: &str) {
        if let Some(value) = line.strip_prefix("data:") {
            self.data_lines.push(value.trim_start().to_string());
        }
        // event:/id:/comment lines: vendors in this crate don't need them.
    }

    fn finish_frame(&mut self) -> Option<String> {
        if self.data_lines.is_empty() {
            return None;
        }
        Some(self.data_lines.drain(..).collect::<Vec<_>>().join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_frame_round_trips() {
        let mut decoder = VendorSseLines::new();
        let frames = decoder.push(b"data: {\"a\":1}\n\n");
        assert_eq!(frames, vec!["{\"a\":1}".to_string()]);
    }

    #[test]
    fn tolerates_chunk_boundaries() {
        let mut decoder = VendorSseLines::new();
        assert!(decoder.push(b"data: {\"a").is_empty());
        let frames = decoder.push(b"\":1}\n\n");
        assert_eq!(frames, vec!["{\"a\":1}".to_string()]);
    }

    #[test]
    fn finish_flushes_trailing_frame_without_blank_line() {
        let mut decoder = VendorSseLines::new();
        assert!(decoder.push(b"data: {\"a\":1}\n").is_empty());
        assert_eq!(decoder.finish(), vec!["{\"a\":1}".to_string()]);
    }
}
