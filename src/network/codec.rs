//! Wire codec for the chat protocol.
//!
//! Records are self-describing JSON objects written back to back on the
//! stream with no length prefix. The decoder finds record boundaries the way
//! a JSON tokenizer would: it scans for the matching close brace of one
//! top-level object, aware of strings and escape sequences, and hands the
//! slice to serde. Malformed records are yielded as `Err` items rather than
//! stream errors, so a single bad record never terminates the connection.

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use crate::network::message::Message;

/// Upper bound on a single encoded record. A buffer that grows past this
/// without completing a record is discarded to cap memory per connection.
pub const MAX_RECORD_SIZE: usize = 64 * 1024;

/// A record that could not be decoded. The offending bytes have already been
/// consumed, so the stream stays usable.
#[derive(Error, Debug)]
pub enum RecordError {
    #[error("skipped {0} bytes of non-record data")]
    Garbage(usize),
    #[error("record exceeded {MAX_RECORD_SIZE} bytes, discarded {0} buffered bytes")]
    Oversize(usize),
    #[error("invalid record: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("stream ended inside a record ({0} bytes)")]
    Truncated(usize),
}

/// Codec turning a byte stream into [`Message`] records and back.
pub struct MessageCodec;

impl Encoder<&Message> for MessageCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: &Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let data = serde_json::to_vec(item)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;

        // JSON body plus a newline; the decoder sees the newline as
        // inter-record whitespace.
        dst.reserve(data.len() + 1);
        dst.put_slice(&data);
        dst.put_u8(b'\n');

        Ok(())
    }
}

impl Decoder for MessageCodec {
    type Item = Result<Message, RecordError>;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let ws = src
            .iter()
            .take_while(|b| b.is_ascii_whitespace())
            .count();
        src.advance(ws);

        if src.is_empty() {
            return Ok(None);
        }

        // Resynchronize on anything that cannot start a record.
        if src[0] != b'{' {
            let skipped = src
                .iter()
                .position(|&b| b == b'{')
                .unwrap_or(src.len());
            src.advance(skipped);
            return Ok(Some(Err(RecordError::Garbage(skipped))));
        }

        let end = match find_record_end(src) {
            Some(end) => end,
            None => {
                if src.len() > MAX_RECORD_SIZE {
                    let discarded = src.len();
                    src.clear();
                    return Ok(Some(Err(RecordError::Oversize(discarded))));
                }
                return Ok(None);
            }
        };

        let frame = src.split_to(end);
        match serde_json::from_slice::<Message>(&frame) {
            Ok(message) => Ok(Some(Ok(message))),
            Err(e) => Ok(Some(Err(RecordError::Parse(e)))),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(item) => Ok(Some(item)),
            None => {
                // decode() consumed any whitespace; what remains is a record
                // the stream ended in the middle of.
                if src.is_empty() {
                    Ok(None)
                } else {
                    let len = src.len();
                    src.clear();
                    Ok(Some(Err(RecordError::Truncated(len))))
                }
            }
        }
    }
}

/// Index one past the close brace matching `buf[0]`, or `None` if the record
/// is still incomplete. Caller guarantees `buf[0] == b'{'`.
fn find_record_end(buf: &[u8]) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in buf.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
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
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }

    None
}
