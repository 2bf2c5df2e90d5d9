/// Incremental extractor of top-level JSON objects from the CodeWhisperer
/// response byte stream.
///
/// The upstream wraps JSON payloads in event-stream framing; rather than
/// decode the framing, the scanner walks the bytes for balanced `{...}`
/// regions (string- and escape-aware) and yields each candidate slice.
/// Frames that fail to parse as JSON are skipped by the caller.
pub struct FrameScanner {
    buf: Vec<u8>,
}

/// Upper bound on buffered bytes between frames; protects against a
/// pathological upstream that never closes an object.
const MAX_BUFFER: usize = 1 << 20;

impl FrameScanner {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Feed a chunk; returns every complete JSON object found so far.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut consumed = 0;

        loop {
            let Some(open) = find_byte(&self.buf[consumed..], b'{') else {
                // No object start in the remainder; drop the garbage prefix.
                consumed = self.buf.len();
                break;
            };
            let start = consumed + open;

            match scan_object(&self.buf[start..]) {
                ScanResult::Complete(len) => {
                    if let Ok(text) = std::str::from_utf8(&self.buf[start..start + len]) {
                        frames.push(text.to_string());
                        consumed = start + len;
                    } else {
                        // Invalid UTF-8 inside the object; skip the opener.
                        consumed = start + 1;
                    }
                }
                ScanResult::Incomplete => {
                    consumed = start;
                    break;
                }
            }
        }

        self.buf.drain(..consumed);
        if self.buf.len() > MAX_BUFFER {
            self.buf.clear();
        }
        frames
    }
}

impl Default for FrameScanner {
    fn default() -> Self {
        Self::new()
    }
}

fn find_byte(haystack: &[u8], needle: u8) -> Option<usize> {
    haystack.iter().position(|b| *b == needle)
}

enum ScanResult {
    /// Byte length of the balanced object starting at offset 0.
    Complete(usize),
    Incomplete,
}

fn scan_object(bytes: &[u8]) -> ScanResult {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, b) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if *b == b'\\' {
                escaped = true;
            } else if *b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return ScanResult::Complete(i + 1);
                }
            }
            _ => {}
        }
    }
    ScanResult::Incomplete
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_object_between_binary_framing() {
        let mut scanner = FrameScanner::new();
        let frames = scanner.push(b"\x00\x00\x01junk{\"content\":\"hi\"}\xff\xfe");
        assert_eq!(frames, vec![r#"{"content":"hi"}"#]);
    }

    #[test]
    fn object_split_across_chunks_is_reassembled() {
        let mut scanner = FrameScanner::new();
        assert!(scanner.push(b"{\"content\":\"he").is_empty());
        let frames = scanner.push(b"llo\"}");
        assert_eq!(frames, vec![r#"{"content":"hello"}"#]);
    }

    #[test]
    fn braces_inside_strings_do_not_close_objects() {
        let mut scanner = FrameScanner::new();
        let frames = scanner.push(br#"{"input":"{\"nested\":1}"}"#);
        assert_eq!(frames.len(), 1);
        let parsed: serde_json::Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(parsed["input"], "{\"nested\":1}");
    }

    #[test]
    fn multiple_frames_in_one_chunk() {
        let mut scanner = FrameScanner::new();
        let frames = scanner.push(b"{\"a\":1}gap{\"b\":2}");
        assert_eq!(frames, vec![r#"{"a":1}"#, r#"{"b":2}"#]);
    }

    #[test]
    fn escaped_quotes_in_strings_are_handled() {
        let mut scanner = FrameScanner::new();
        let frames = scanner.push(br#"{"content":"say \"hi\" {now}"}"#);
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn nested_objects_count_as_one_frame() {
        let mut scanner = FrameScanner::new();
        let frames = scanner.push(br#"{"outer":{"inner":{"deep":true}}}"#);
        assert_eq!(frames.len(), 1);
    }
}
