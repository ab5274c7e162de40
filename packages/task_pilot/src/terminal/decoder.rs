/// Stateful UTF-8 decoder for PTY output.
///
/// A read can end in the middle of a multi-byte character. The incomplete tail
/// is held back and completed by the next chunk instead of becoming U+FFFD.
pub(crate) struct Utf8StreamDecoder {
    pending: Vec<u8>,
}

impl Utf8StreamDecoder {
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
        }
    }

    /// Decode as much of `pending + chunk` as is complete.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::new();
        let mut rest: &[u8] = &self.pending;

        loop {
            match std::str::from_utf8(rest) {
                Ok(s) => {
                    out.push_str(s);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    // from_utf8 already validated this prefix
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        None => {
                            rest = after;
                            break;
                        }
                        Some(len) => {
                            out.push('\u{FFFD}');
                            rest = &after[len..];
                        }
                    }
                }
            }
        }

        self.pending = rest.to_vec();
        out
    }
}
