//! The typed message catalog.
//!
//! A small, closed set of message types multiplexed over the data
//! sub-channel, each identified by a one-byte discriminator and packed with a
//! self-describing payload. Host-to-peripheral types are prefixed `Tx`;
//! peripheral-to-host traffic is reassembled by the receivers in
//! [`crate::rx`].

mod camera;
mod control;
mod image_block;
pub(crate) mod sprite;
mod text_block;

pub use camera::{TxCaptureSettings, TxManualExpSettings};
pub use control::{TxCode, TxPlainText};
pub use image_block::{ImageBlockAssembler, TxImageSpriteBlock};
pub use sprite::{BlockCompressor, MAX_UNSLICED_BYTES, SpriteData, TxSprite};
pub use text_block::{Direction, GlyphBitmap, GlyphProvider, TextRow, TxTextSpriteBlock};

use bytes::Bytes;

use crate::error::CodecError;

/// Conventional message codes agreed with the peripheral-side apps.
///
/// Host-to-peripheral and peripheral-to-host discriminators form one shared
/// namespace; peripheral apps may additionally listen on app-defined codes
/// (e.g. a [`TxCode`] subscription toggle on `0x10` or `0x40`).
pub mod codes {
    /// Audio stream fragment, more to follow.
    pub const AUDIO_NON_FINAL: u8 = 0x05;
    /// Audio stream fragment ending the stream.
    pub const AUDIO_FINAL: u8 = 0x06;
    /// Photo fragment, more to follow.
    pub const PHOTO_NON_FINAL: u8 = 0x07;
    /// Photo fragment completing the image.
    pub const PHOTO_FINAL: u8 = 0x08;
    /// Single tap event.
    pub const TAP: u8 = 0x09;
    /// Plain text for the peripheral display.
    pub const PLAIN_TEXT: u8 = 0x0a;
    /// One motion sample (compass + accelerometer).
    pub const IMU_DATA: u8 = 0x0b;
    /// Photo capture request with auto-exposure settings.
    pub const CAPTURE_SETTINGS: u8 = 0x0d;
    /// Manual exposure and gain settings.
    pub const MANUAL_EXP_SETTINGS: u8 = 0x0e;
    /// Sprite block traffic (image or rasterized text, header then slices).
    pub const SPRITE_BLOCK: u8 = 0x20;
}

/// Uniform encode/decode contract for every catalog entry.
///
/// `pack` produces a self-describing payload - no external length prefix
/// beyond what the transport's packetization already provides. `unpack` is
/// total over well-formed input and rejects undersized or oversized payloads
/// explicitly rather than silently truncating.
pub trait WireMessage: Sized {
    fn pack(&self) -> Bytes;
    fn unpack(bytes: &[u8]) -> Result<Self, CodecError>;
}

/// Checked read of a fixed-size prefix, shared by the unpack impls.
pub(crate) fn expect_len(
    what: &'static str,
    bytes: &[u8],
    expected: usize,
) -> Result<(), CodecError> {
    if bytes.len() != expected {
        return Err(CodecError::malformed(
            what,
            format!("expected {} bytes, got {}", expected, bytes.len()),
        ));
    }
    Ok(())
}
