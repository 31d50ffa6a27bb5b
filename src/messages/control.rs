//! Small control-style messages: code values and plain display text.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::CodecError;
use crate::messages::WireMessage;

/// A single-byte code value.
///
/// Used as a lightweight signal to the peripheral app - subscribe/unsubscribe
/// toggles, mode switches, user-defined triggers. The message code it is sent
/// under is chosen by the app protocol, not fixed by the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxCode {
    pub value: u8,
}

impl TxCode {
    pub fn new(value: u8) -> Self {
        Self { value }
    }
}

impl WireMessage for TxCode {
    fn pack(&self) -> Bytes {
        Bytes::copy_from_slice(&[self.value])
    }

    fn unpack(bytes: &[u8]) -> Result<Self, CodecError> {
        super::expect_len("TxCode", bytes, 1)?;
        Ok(Self { value: bytes[0] })
    }
}

/// Plain text for the peripheral display.
///
/// Position and styling ride along so the peripheral app can place the text
/// without any further negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxPlainText {
    pub text: String,
    /// Display x position, 1-based.
    pub x: u16,
    /// Display y position, 1-based.
    pub y: u16,
    /// Palette index offset for the text color.
    pub palette_offset: u8,
    /// Pixels between characters.
    pub char_spacing: u8,
}

impl TxPlainText {
    /// Text at the display origin with default styling.
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), x: 1, y: 1, palette_offset: 1, char_spacing: 4 }
    }

    pub fn at(mut self, x: u16, y: u16) -> Self {
        self.x = x;
        self.y = y;
        self
    }
}

impl WireMessage for TxPlainText {
    fn pack(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(6 + self.text.len());
        buf.put_u16(self.x);
        buf.put_u16(self.y);
        buf.put_u8(self.palette_offset);
        buf.put_u8(self.char_spacing);
        buf.put_slice(self.text.as_bytes());
        buf.freeze()
    }

    fn unpack(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() < 6 {
            return Err(CodecError::malformed(
                "TxPlainText",
                format!("expected at least 6 bytes, got {}", bytes.len()),
            ));
        }
        let text = std::str::from_utf8(&bytes[6..])
            .map_err(|e| CodecError::malformed("TxPlainText", format!("invalid utf-8: {e}")))?;
        Ok(Self {
            x: u16::from_be_bytes([bytes[0], bytes[1]]),
            y: u16::from_be_bytes([bytes[2], bytes[3]]),
            palette_offset: bytes[4],
            char_spacing: bytes[5],
            text: text.to_string(),
        })
    }
}
