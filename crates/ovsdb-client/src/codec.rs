//! Framing for JSON-RPC over a byte stream.
//!
//! OVSDB sends JSON texts back to back with no delimiter, so a frame ends
//! where a complete JSON value ends. The decoder tracks nesting across
//! calls and resumes where it stopped, so every byte is scanned once and
//! serde_json only sees complete frames.

use bytes::{Buf, BufMut, BytesMut};
use serde_json::Value;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::OvsDbError;

/// Upper bound on a single buffered message.
const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

#[derive(Debug, Default)]
pub(crate) struct JsonCodec {
    /// Bytes of the pending frame already scanned.
    scanned: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
}

impl JsonCodec {
    fn reset(&mut self) {
        *self = Self::default();
    }

    /// Scans `src` from the resume offset. Returns the frame length once the
    /// outermost object or array closes.
    fn scan(&mut self, src: &[u8]) -> Result<Option<usize>, OvsDbError> {
        let start = self.scanned;
        for (offset, &b) in src[start..].iter().enumerate() {
            let i = start + offset;
            if self.in_string {
                match b {
                    _ if self.escaped => self.escaped = false,
                    b'\\' => self.escaped = true,
                    b'"' => self.in_string = false,
                    _ => {}
                }
                continue;
            }

            match b {
                b'"' if self.depth > 0 => self.in_string = true,
                b'{' | b'[' => self.depth += 1,
                b'}' | b']' if self.depth > 0 => {
                    self.depth -= 1;
                    if self.depth == 0 {
                        return Ok(Some(i + 1));
                    }
                }
                _ if self.depth > 0 => {}
                // Messages are always objects; anything else at the top
                // level is a broken stream.
                _ => return Err(framing_error(&src[..=i])),
            }
        }

        self.scanned = src.len();
        Ok(None)
    }
}

fn framing_error(bytes: &[u8]) -> OvsDbError {
    match serde_json::from_slice::<Value>(bytes) {
        Err(e) => OvsDbError::Json(e),
        Ok(v) => OvsDbError::invalid_reply("message framing", &v),
    }
}

impl Decoder for JsonCodec {
    type Item = Value;
    type Error = OvsDbError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Value>, OvsDbError> {
        if self.scanned == 0 {
            let skip = src
                .iter()
                .take_while(|b| b.is_ascii_whitespace())
                .count();
            src.advance(skip);
            if src.is_empty() {
                return Ok(None);
            }
        }

        match self.scan(&src[..]) {
            Ok(Some(len)) => {
                let frame = src.split_to(len);
                self.reset();
                Ok(Some(serde_json::from_slice(&frame)?))
            }
            Ok(None) if src.len() > MAX_FRAME_SIZE => {
                self.reset();
                Err(OvsDbError::invalid_reply(
                    "message framing",
                    &Value::from(format!("frame exceeds {MAX_FRAME_SIZE} bytes")),
                ))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                self.reset();
                Err(e)
            }
        }
    }
}

impl Encoder<Value> for JsonCodec {
    type Error = OvsDbError;

    fn encode(&mut self, item: Value, dst: &mut BytesMut) -> Result<(), OvsDbError> {
        serde_json::to_writer(dst.writer(), &item)?;
        Ok(())
    }
}
