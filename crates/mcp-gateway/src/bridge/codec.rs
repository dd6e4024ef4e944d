//! Newline-delimited JSON codec for worker stdio.
//!
//! Each frame is one line of UTF-8 JSON terminated by `\n`. The decoder keeps
//! the partial-line remainder in the `BytesMut` buffer between reads, so
//! chunks that split a line anywhere are reassembled before parsing.
//!
//! A line that fails to parse does not end the stream: it is yielded as
//! `Err(MalformedLine)` inside an `Ok` item and decoding continues with the
//! next line. Only I/O failures surface as decoder errors.

use std::io;
use std::marker::PhantomData;

use serde::{Serialize, de::DeserializeOwned};
use tokio_util::bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Lines longer than this are discarded up to the next newline.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 16 * 1024 * 1024;

/// How much of an offending line is kept for diagnostics.
const PREVIEW_LEN: usize = 200;

/// A line that could not be decoded into a message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed line ({reason}): {preview}")]
pub struct MalformedLine {
    pub preview: String,
    pub reason: String,
}

impl MalformedLine {
    fn new(line: &[u8], reason: impl Into<String>) -> Self {
        let text = String::from_utf8_lossy(line);
        let preview = match text.char_indices().nth(PREVIEW_LEN) {
            Some((idx, _)) => format!("{}...", &text[..idx]),
            None => text.into_owned(),
        };
        Self {
            preview,
            reason: reason.into(),
        }
    }
}

/// Codec that frames messages by newline and serializes with JSON.
pub struct JsonLineCodec<T> {
    /// Where to resume scanning for `\n` in the buffer.
    next_index: usize,
    max_length: usize,
    /// True while skipping the tail of an overlong line.
    discarding: bool,
    _phantom: PhantomData<T>,
}

impl<T> Default for JsonLineCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> JsonLineCodec<T> {
    pub fn new() -> Self {
        Self::with_max_length(DEFAULT_MAX_LINE_LENGTH)
    }

    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            next_index: 0,
            max_length,
            discarding: false,
            _phantom: PhantomData,
        }
    }
}

fn parse_line<T: DeserializeOwned>(line: &[u8]) -> Result<T, MalformedLine> {
    serde_json::from_slice(line).map_err(|e| MalformedLine::new(line, e.to_string()))
}

impl<T: DeserializeOwned> Decoder for JsonLineCodec<T> {
    type Item = Result<T, MalformedLine>;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let read_to = self.max_length.saturating_add(1).min(src.len());
            let newline = src[self.next_index..read_to]
                .iter()
                .position(|b| *b == b'\n');

            match (self.discarding, newline) {
                (true, Some(offset)) => {
                    src.advance(self.next_index + offset + 1);
                    self.discarding = false;
                    self.next_index = 0;
                }
                (true, None) => {
                    src.advance(read_to);
                    self.next_index = 0;
                    if src.is_empty() {
                        return Ok(None);
                    }
                }
                (false, Some(offset)) => {
                    let end = self.next_index + offset;
                    self.next_index = 0;
                    let frame = src.split_to(end + 1);
                    let line = frame[..end].trim_ascii();
                    if line.is_empty() {
                        continue;
                    }
                    return Ok(Some(parse_line(line)));
                }
                (false, None) if src.len() > self.max_length => {
                    self.discarding = true;
                    let preview = MalformedLine::new(
                        &src[..PREVIEW_LEN.min(src.len())],
                        format!("line exceeds {} bytes", self.max_length),
                    );
                    return Ok(Some(Err(preview)));
                }
                (false, None) => {
                    self.next_index = read_to;
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(item) = self.decode(src)? {
            return Ok(Some(item));
        }
        // A final line without trailing newline is still a message.
        self.next_index = 0;
        if self.discarding {
            src.clear();
            self.discarding = false;
            return Ok(None);
        }
        let rest = src.split();
        let line = rest.trim_ascii();
        if line.is_empty() {
            return Ok(None);
        }
        Ok(Some(parse_line(line)))
    }
}

impl<T, E: Serialize> Encoder<E> for JsonLineCodec<T> {
    type Error = io::Error;

    fn encode(&mut self, item: E, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json =
            serde_json::to_vec(&item).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        tracing::trace!(json_size_bytes = json.len(), "Encoding frame");
        dst.reserve(json.len() + 1);
        dst.put_slice(&json);
        dst.put_u8(b'\n');
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn decode_all(
        codec: &mut JsonLineCodec<Value>,
        buf: &mut BytesMut,
    ) -> Vec<Result<Value, MalformedLine>> {
        let mut out = Vec::new();
        while let Some(item) = codec.decode(buf).unwrap() {
            out.push(item);
        }
        out
    }

    #[test]
    fn reassembles_line_split_across_chunks() {
        let mut codec = JsonLineCodec::<Value>::new();
        let mut buf = BytesMut::new();

        buf.extend_from_slice(br#"{"jsonrpc":"2.0","id":1,"re"#);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(br#"sult":{"ok":true}}"#);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"\n");
        let msg = codec.decode(&mut buf).unwrap().unwrap().unwrap();
        assert_eq!(msg["result"]["ok"], json!(true));
        assert!(buf.is_empty());
    }

    #[test]
    fn yields_every_line_in_one_chunk() {
        let mut codec = JsonLineCodec::<Value>::new();
        let mut buf = BytesMut::from(&b"{\"id\":1}\n{\"id\":2}\n{\"id\":3"[..]);

        let items = decode_all(&mut codec, &mut buf);
        let ids: Vec<_> = items.into_iter().map(|i| i.unwrap()["id"].clone()).collect();
        assert_eq!(ids, vec![json!(1), json!(2)]);

        buf.extend_from_slice(b"}\n");
        let last = codec.decode(&mut buf).unwrap().unwrap().unwrap();
        assert_eq!(last["id"], json!(3));
    }

    #[test]
    fn malformed_line_does_not_stop_decoding() {
        let mut codec = JsonLineCodec::<Value>::new();
        let mut buf = BytesMut::from(&b"not json at all\n{\"id\":7}\n"[..]);

        let items = decode_all(&mut codec, &mut buf);
        assert_eq!(items.len(), 2);
        let bad = items[0].as_ref().unwrap_err();
        assert_eq!(bad.preview, "not json at all");
        assert_eq!(items[1].as_ref().unwrap()["id"], json!(7));
    }

    #[test]
    fn skips_blank_lines_and_crlf() {
        let mut codec = JsonLineCodec::<Value>::new();
        let mut buf = BytesMut::from(&b"\n   \r\n{\"id\":4}\r\n"[..]);

        let items = decode_all(&mut codec, &mut buf);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap()["id"], json!(4));
    }

    #[test]
    fn overlong_line_is_discarded_up_to_newline() {
        let mut codec = JsonLineCodec::<Value>::with_max_length(16);
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[b'x'; 40]);

        let first = codec.decode(&mut buf).unwrap().unwrap();
        assert!(first.unwrap_err().reason.contains("exceeds 16 bytes"));

        buf.extend_from_slice(b"xxxx\n{\"id\":9}\n");
        let next = codec.decode(&mut buf).unwrap().unwrap().unwrap();
        assert_eq!(next["id"], json!(9));
    }

    #[test]
    fn decode_eof_accepts_unterminated_final_line() {
        let mut codec = JsonLineCodec::<Value>::new();
        let mut buf = BytesMut::from(&b"{\"id\":5}"[..]);

        assert!(codec.decode(&mut buf).unwrap().is_none());
        let last = codec.decode_eof(&mut buf).unwrap().unwrap().unwrap();
        assert_eq!(last["id"], json!(5));
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
    }

    #[test]
    fn encode_appends_newline() {
        let mut codec = JsonLineCodec::<Value>::new();
        let mut buf = BytesMut::new();
        codec.encode(json!({"id": 1}), &mut buf).unwrap();
        codec.encode(json!({"id": 2}), &mut buf).unwrap();
        assert_eq!(&buf[..], b"{\"id\":1}\n{\"id\":2}\n");
    }
}
