//! Indexed-color sprites for the peripheral display.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::CodecError;
use crate::messages::WireMessage;
use crate::quantize::{self, RawImage};

/// Largest sprite the peripheral accepts in one unsliced message.
/// Bigger rasters go through [`crate::messages::TxImageSpriteBlock`].
pub const MAX_UNSLICED_BYTES: usize = 4096;

/// Pluggable block compressor for sprite pixel data.
///
/// The peripheral firmware decides the algorithm; the codec only needs the
/// two directions. `decompress` must fail rather than return a buffer of the
/// wrong size.
pub trait BlockCompressor {
    fn compress(&self, data: &[u8]) -> Vec<u8>;
    fn decompress(&self, data: &[u8], expected_len: usize) -> Result<Vec<u8>, CodecError>;
}

/// Sprite pixel data, either as packed palette indices or as a compressed
/// block of the same.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpriteData {
    Raw(Vec<u8>),
    Compressed(Vec<u8>),
}

impl SpriteData {
    fn bytes(&self) -> &[u8] {
        match self {
            SpriteData::Raw(b) | SpriteData::Compressed(b) => b,
        }
    }
}

/// An indexed-color raster: dimensions, bits per pixel, an RGB palette of
/// exactly `2^bpp` entries, and continuously packed MSB-first pixel data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxSprite {
    pub width: u16,
    pub height: u16,
    pub bpp: u8,
    pub palette: Vec<[u8; 3]>,
    pub data: SpriteData,
}

impl TxSprite {
    /// Build a sprite from already-quantized parts, validating the structural
    /// invariants the peripheral relies on.
    pub fn new(
        width: u16,
        height: u16,
        bpp: u8,
        palette: Vec<[u8; 3]>,
        data: Vec<u8>,
    ) -> Result<Self, CodecError> {
        if width == 0 || height == 0 {
            return Err(CodecError::malformed("TxSprite", "zero dimension"));
        }
        if ![1, 2, 4, 8].contains(&bpp) {
            return Err(CodecError::out_of_range("bpp", bpp as i64, 1, 8));
        }
        let colors = 1usize << bpp;
        if palette.len() != colors {
            return Err(CodecError::malformed(
                "TxSprite",
                format!("palette has {} entries, bpp {} needs {}", palette.len(), bpp, colors),
            ));
        }
        let expected = packed_len(width, height, bpp);
        if data.len() != expected {
            return Err(CodecError::malformed(
                "TxSprite",
                format!(
                    "{}x{} at {} bpp packs to {} bytes, got {}",
                    width, height, bpp, expected, data.len()
                ),
            ));
        }
        Ok(Self { width, height, bpp, palette, data: SpriteData::Raw(data) })
    }

    /// Quantize a decoded raster down to `colors` palette entries (2, 4, 16
    /// or 256), first downscaling to at most `max_pixels` pixels.
    pub fn quantize(
        image: &RawImage,
        colors: usize,
        max_pixels: u32,
    ) -> Result<Self, CodecError> {
        let bpp: u8 = match colors {
            2 => 1,
            4 => 2,
            16 => 4,
            256 => 8,
            _ => return Err(CodecError::out_of_range("colors", colors as i64, 2, 256)),
        };

        let (w, h, pixels) = quantize::downscale(image, max_pixels);
        if w > u16::MAX as u32 || h > u16::MAX as u32 {
            return Err(CodecError::malformed(
                "TxSprite",
                format!("{}x{} exceeds sprite dimensions", w, h),
            ));
        }

        let palette = quantize::median_cut(&pixels, colors);
        let indices: Vec<u8> =
            pixels.iter().map(|&rgb| quantize::nearest_index(&palette, rgb)).collect();
        let data = quantize::pack_indices(&indices, bpp);

        Self::new(w as u16, h as u16, bpp, palette, data)
    }

    /// Length of the uncompressed pixel data for these dimensions.
    pub fn packed_len(&self) -> usize {
        packed_len(self.width, self.height, self.bpp)
    }

    /// Whether the pixel data is carried compressed.
    pub fn is_compressed(&self) -> bool {
        matches!(self.data, SpriteData::Compressed(_))
    }

    /// Compress the pixel data with `compressor`, keeping the result only
    /// when it is strictly smaller than the raw form.
    pub fn compress_with<C: BlockCompressor>(&mut self, compressor: &C) {
        if let SpriteData::Raw(raw) = &self.data {
            let compressed = compressor.compress(raw);
            if compressed.len() < raw.len() {
                self.data = SpriteData::Compressed(compressed);
            }
        }
    }

    /// Pack for single-message transfer, enforcing [`MAX_UNSLICED_BYTES`].
    pub fn pack_unsliced(&self) -> Result<Bytes, CodecError> {
        let packed = self.pack();
        if packed.len() > MAX_UNSLICED_BYTES {
            return Err(CodecError::PayloadTooLarge {
                size: packed.len(),
                max: MAX_UNSLICED_BYTES,
            });
        }
        Ok(packed)
    }

    /// Decode with a compressor available for compressed pixel data.
    pub fn unpack_with<C: BlockCompressor>(
        bytes: &[u8],
        compressor: &C,
    ) -> Result<Self, CodecError> {
        let mut sprite = Self::unpack(bytes)?;
        if let SpriteData::Compressed(block) = &sprite.data {
            let raw = compressor.decompress(block, sprite.packed_len())?;
            sprite.data = SpriteData::Raw(raw);
        }
        Ok(sprite)
    }
}

/// `ceil(width * height * bpp / 8)`, the packed-data length invariant.
pub(crate) fn packed_len(width: u16, height: u16, bpp: u8) -> usize {
    (width as usize * height as usize * bpp as usize).div_ceil(8)
}

impl WireMessage for TxSprite {
    /// `[width u16][height u16][compressed u8][bpp u8][num_colors u8]`
    /// `[palette 3n][data]`, all big-endian. `num_colors` of 0 means 256.
    fn pack(&self) -> Bytes {
        let mut buf =
            BytesMut::with_capacity(7 + self.palette.len() * 3 + self.data.bytes().len());
        buf.put_u16(self.width);
        buf.put_u16(self.height);
        buf.put_u8(self.is_compressed() as u8);
        buf.put_u8(self.bpp);
        buf.put_u8(self.palette.len() as u8); // 256 wraps to 0
        for rgb in &self.palette {
            buf.put_slice(rgb);
        }
        buf.put_slice(self.data.bytes());
        buf.freeze()
    }

    fn unpack(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() < 7 {
            return Err(CodecError::malformed(
                "TxSprite",
                format!("expected at least 7 header bytes, got {}", bytes.len()),
            ));
        }
        let width = u16::from_be_bytes([bytes[0], bytes[1]]);
        let height = u16::from_be_bytes([bytes[2], bytes[3]]);
        let compressed = bytes[4] != 0;
        let bpp = bytes[5];
        let colors = if bytes[6] == 0 { 256 } else { bytes[6] as usize };

        if width == 0 || height == 0 {
            return Err(CodecError::malformed("TxSprite", "zero dimension"));
        }
        if ![1, 2, 4, 8].contains(&bpp) {
            return Err(CodecError::out_of_range("bpp", bpp as i64, 1, 8));
        }
        if colors != 1usize << bpp {
            return Err(CodecError::malformed(
                "TxSprite",
                format!("{} colors inconsistent with bpp {}", colors, bpp),
            ));
        }

        let palette_end = 7 + colors * 3;
        if bytes.len() < palette_end {
            return Err(CodecError::malformed(
                "TxSprite",
                format!("truncated palette: {} of {} bytes", bytes.len(), palette_end),
            ));
        }
        let palette: Vec<[u8; 3]> = bytes[7..palette_end]
            .chunks_exact(3)
            .map(|c| [c[0], c[1], c[2]])
            .collect();
        let body = bytes[palette_end..].to_vec();

        if compressed {
            Ok(Self { width, height, bpp, palette, data: SpriteData::Compressed(body) })
        } else {
            let expected = packed_len(width, height, bpp);
            if body.len() != expected {
                return Err(CodecError::malformed(
                    "TxSprite",
                    format!("pixel data is {} bytes, expected {}", body.len(), expected),
                ));
            }
            Ok(Self { width, height, bpp, palette, data: SpriteData::Raw(body) })
        }
    }
}
