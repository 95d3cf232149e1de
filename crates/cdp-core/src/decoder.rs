//! Tolerant, line-framed stream decoder: accumulates bytes, parses each
//! CR/LF-delimited line, caps total bytes read, and discards any single
//! oversize in-flight line rather than tearing down the stream.

use tracing::warn;

pub const DEFAULT_MAX_LINE_LENGTH: usize = 1024 * 1024;

/// A parser applied to each decoded line: either JSON parsing or
/// identity-as-string, selected by the caller.
pub type LineParser<T> = Box<dyn Fn(&[u8]) -> Option<T> + Send>;

pub fn json_line_parser<T>() -> LineParser<T>
where
    T: serde::de::DeserializeOwned + Send + 'static,
{
    Box::new(|bytes| serde_json::from_slice(bytes).ok())
}

pub fn text_line_parser() -> LineParser<String> {
    Box::new(|bytes| Some(String::from_utf8_lossy(bytes).into_owned()))
}

/// Incremental line decoder. Feed it chunks with [`Decoder::push_chunk`];
/// read out decoded items with the `out` vector it fills; call
/// [`Decoder::finish`] once the upstream stream has ended to reparse any
/// trailing fragment.
pub struct Decoder<T> {
    parser: LineParser<T>,
    buffer: Vec<u8>,
    max_line_length: usize,
    byte_limit: Option<u64>,
    bytes_read: u64,
    limit_reached: bool,
    // true immediately after a bare CR, so a following LF is swallowed as
    // part of the same CRLF delimiter rather than treated as an empty line.
    pending_cr: bool,
}

impl<T> Decoder<T> {
    pub fn new(parser: LineParser<T>, byte_limit: Option<u64>) -> Self {
        Self {
            parser,
            buffer: Vec::new(),
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            byte_limit,
            bytes_read: 0,
            limit_reached: false,
            pending_cr: false,
        }
    }

    pub fn with_max_line_length(mut self, max_line_length: usize) -> Self {
        self.max_line_length = max_line_length;
        self
    }

    /// Feeds one chunk, appending decoded items to `out`. Returns `true` if
    /// the configured byte-count limit has just been reached: the caller
    /// should stop pushing further chunks once this fires (a synthetic end
    /// event).
    pub fn push_chunk(&mut self, chunk: &[u8], out: &mut Vec<T>) -> bool {
        if self.limit_reached {
            return true;
        }
        for &byte in chunk {
            self.bytes_read += 1;
            match byte {
                b'\n' if self.pending_cr => {
                    // second half of a CRLF pair: already flushed on the CR.
                    self.pending_cr = false;
                }
                b'\n' => {
                    self.flush_line(out);
                    self.pending_cr = false;
                }
                b'\r' => {
                    self.flush_line(out);
                    self.pending_cr = true;
                }
                other => {
                    self.pending_cr = false;
                    self.buffer.push(other);
                    if self.buffer.len() > self.max_line_length {
                        warn!(
                            max = self.max_line_length,
                            "dropping oversize in-flight line"
                        );
                        self.buffer.clear();
                    }
                }
            }
            if let Some(limit) = self.byte_limit {
                if self.bytes_read >= limit {
                    self.limit_reached = true;
                    return true;
                }
            }
        }
        false
    }

    fn flush_line(&mut self, out: &mut Vec<T>) {
        if self.buffer.is_empty() {
            // an empty region between delimiters is silently skipped.
            return;
        }
        let line = std::mem::take(&mut self.buffer);
        match (self.parser)(&line) {
            Some(v) => out.push(v),
            None => warn!("dropping line that failed to decode"),
        }
    }

    /// Reparses any trailing fragment once the upstream stream ends.
    pub fn finish(mut self, out: &mut Vec<T>) {
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            match (self.parser)(&line) {
                Some(v) => out.push(v),
                None => warn!("dropping trailing line that failed to decode"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_json_lines_and_drops_unparseable_ones() {
        let mut decoder: Decoder<serde_json::Value> =
            Decoder::new(json_line_parser(), None).with_max_line_length(32);
        let input = b"{\"hello\":\"world\"}\n{\"goodbye\":\"world\", \"this\":\"will be dropped because it exceeds 32 bytes...\"}\n{\"what\":\"just happened?\"}";
        let mut out = Vec::new();
        decoder.push_chunk(input, &mut out);
        decoder.finish(&mut out);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["hello"], "world");
        assert_eq!(out[1]["what"], "just happened?");
    }

    #[test]
    fn crlf_counts_as_a_single_delimiter() {
        let mut decoder: Decoder<String> = Decoder::new(text_line_parser(), None);
        let mut out = Vec::new();
        decoder.push_chunk(b"a\r\nb\n\nc", &mut out);
        decoder.finish(&mut out);
        assert_eq!(out, vec!["a".to_string(), "b".to_string(), "c".to_string()]);
    }

    #[test]
    fn byte_limit_stops_decoding() {
        let mut decoder: Decoder<String> = Decoder::new(text_line_parser(), Some(4));
        let mut out = Vec::new();
        let reached = decoder.push_chunk(b"ab\ncd\nef\n", &mut out);
        assert!(reached);
    }
}
