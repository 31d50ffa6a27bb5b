//! Progressive sprite transfer as a header plus row-band slices.
//!
//! Sprites above the unsliced ceiling are cut into bands of `line_height`
//! display rows. The peripheral can draw each band as it lands, so a large
//! image appears progressively instead of after one long transfer.

use std::collections::BTreeMap;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{CodecError, LinkError};
use crate::link::Link;
use crate::messages::codes;
use crate::messages::sprite::{BlockCompressor, SpriteData, TxSprite, packed_len};

/// A sprite prepared for sliced transfer: one header message describing the
/// whole image, then one message per band of `line_height` rows.
///
/// Slice boundaries fall on the byte containing each band's first pixel, so
/// the concatenated slices reproduce the sprite's packed data exactly even
/// when `line_height` rows do not pack to a whole number of bytes.
#[derive(Debug, Clone)]
pub struct TxImageSpriteBlock {
    sprite: TxSprite,
    line_height: u16,
    /// Per-band pixel bytes, compressed all-or-none.
    slices: Vec<Vec<u8>>,
    compressed: bool,
}

impl TxImageSpriteBlock {
    /// Slice `sprite` into bands of `line_height` rows.
    ///
    /// The sprite must still carry raw pixel data; compression applies to
    /// the slices afterwards via [`TxImageSpriteBlock::compress_with`].
    pub fn new(sprite: TxSprite, line_height: u16) -> Result<Self, CodecError> {
        if line_height == 0 {
            return Err(CodecError::out_of_range(
                "line_height",
                0,
                1,
                sprite.height as i64,
            ));
        }
        if sprite.is_compressed() {
            return Err(CodecError::malformed(
                "TxImageSpriteBlock",
                "sprite must be sliced before compression",
            ));
        }
        let SpriteData::Raw(data) = &sprite.data else { unreachable!() };

        let bounds = slice_bounds(sprite.width, sprite.height, sprite.bpp, line_height);
        let slices = bounds
            .windows(2)
            .map(|w| data[w[0]..w[1]].to_vec())
            .collect();

        Ok(Self { sprite, line_height, slices, compressed: false })
    }

    pub fn sprite(&self) -> &TxSprite {
        &self.sprite
    }

    pub fn line_height(&self) -> u16 {
        self.line_height
    }

    pub fn num_slices(&self) -> usize {
        self.slices.len()
    }

    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    /// Compress every slice with `compressor`, keeping the compressed form
    /// only when it shrinks the block overall. All-or-none: the peripheral
    /// decodes every slice the same way.
    pub fn compress_with<C: BlockCompressor>(&mut self, compressor: &C) {
        if self.compressed {
            return;
        }
        let candidates: Vec<Vec<u8>> =
            self.slices.iter().map(|s| compressor.compress(s)).collect();
        let raw_total: usize = self.slices.iter().map(Vec::len).sum();
        let compressed_total: usize = candidates.iter().map(Vec::len).sum();
        if compressed_total < raw_total {
            self.slices = candidates;
            self.compressed = true;
        }
    }

    /// Pack the header message:
    /// `[width u16][height u16][line_height u16][compressed u8][bpp u8]`
    /// `[num_colors u8][total_data_len u32][palette 3n]`, all big-endian.
    /// `num_colors` of 0 means 256.
    pub fn pack_header(&self) -> Bytes {
        let total: usize = self.slices.iter().map(Vec::len).sum();
        let mut buf = BytesMut::with_capacity(13 + self.sprite.palette.len() * 3);
        buf.put_u16(self.sprite.width);
        buf.put_u16(self.sprite.height);
        buf.put_u16(self.line_height);
        buf.put_u8(self.compressed as u8);
        buf.put_u8(self.sprite.bpp);
        buf.put_u8(self.sprite.palette.len() as u8);
        buf.put_u32(total as u32);
        for rgb in &self.sprite.palette {
            buf.put_slice(rgb);
        }
        buf.freeze()
    }

    /// Pack one slice message: `[line_index u16][pixel bytes]`, where
    /// `line_index` is the band's first display row.
    pub fn pack_slice(&self, index: usize) -> Bytes {
        let line_index = index as u16 * self.line_height;
        let slice = &self.slices[index];
        let mut buf = BytesMut::with_capacity(2 + slice.len());
        buf.put_u16(line_index);
        buf.put_slice(slice);
        buf.freeze()
    }

    /// Send the block over `link`: header first, then every slice in row
    /// order, each as its own message under [`codes::SPRITE_BLOCK`].
    pub async fn send(&self, link: &Link) -> Result<(), LinkError> {
        link.send_message(codes::SPRITE_BLOCK, &self.pack_header()).await?;
        for i in 0..self.slices.len() {
            link.send_message(codes::SPRITE_BLOCK, &self.pack_slice(i)).await?;
        }
        Ok(())
    }
}

/// Byte offsets of each band boundary in the packed pixel data, first and
/// last entries included. `bounds.len() == num_slices + 1`.
fn slice_bounds(width: u16, height: u16, bpp: u8, line_height: u16) -> Vec<usize> {
    let row_bits = width as usize * bpp as usize;
    let num_slices = (height as usize).div_ceil(line_height as usize);
    let mut bounds = Vec::with_capacity(num_slices + 1);
    for i in 0..num_slices {
        bounds.push(i * line_height as usize * row_bits / 8);
    }
    bounds.push(packed_len(width, height, bpp));
    bounds
}

struct BlockHeader {
    width: u16,
    height: u16,
    line_height: u16,
    compressed: bool,
    bpp: u8,
    total_data_len: usize,
    palette: Vec<[u8; 3]>,
}

/// Reassembles a sliced sprite from block messages, tolerating slice
/// reordering. The first payload must be the header.
#[derive(Default)]
pub struct ImageBlockAssembler {
    header: Option<BlockHeader>,
    /// Per band: decoded raw bytes plus the wire length, keyed by the band's
    /// first display row.
    slices: BTreeMap<u16, (Vec<u8>, usize)>,
}

impl ImageBlockAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one block payload; returns the finished sprite once every band
    /// has arrived. Rejects compressed blocks - use
    /// [`ImageBlockAssembler::push_with`] when a compressor is available.
    pub fn push(&mut self, payload: &[u8]) -> Result<Option<TxSprite>, CodecError> {
        self.push_inner(payload, None)
    }

    /// [`ImageBlockAssembler::push`] with per-slice decompression.
    pub fn push_with<C: BlockCompressor>(
        &mut self,
        payload: &[u8],
        compressor: &C,
    ) -> Result<Option<TxSprite>, CodecError> {
        self.push_inner(payload, Some(compressor))
    }

    fn push_inner(
        &mut self,
        payload: &[u8],
        compressor: Option<&dyn BlockCompressor>,
    ) -> Result<Option<TxSprite>, CodecError> {
        let Some(header) = &self.header else {
            self.header = Some(parse_header(payload)?);
            return Ok(None);
        };

        if payload.len() < 2 {
            return Err(CodecError::malformed("ImageBlock slice", "missing line index"));
        }
        let line_index = u16::from_be_bytes([payload[0], payload[1]]);
        if line_index >= header.height || line_index % header.line_height != 0 {
            return Err(CodecError::malformed(
                "ImageBlock slice",
                format!("line index {} not a band boundary", line_index),
            ));
        }

        let bounds =
            slice_bounds(header.width, header.height, header.bpp, header.line_height);
        let band = line_index as usize / header.line_height as usize;
        let expected_raw = bounds[band + 1] - bounds[band];

        let body = &payload[2..];
        let raw = match compressor {
            _ if !header.compressed => {
                if body.len() != expected_raw {
                    return Err(CodecError::malformed(
                        "ImageBlock slice",
                        format!("band {} is {} bytes, expected {}", band, body.len(), expected_raw),
                    ));
                }
                body.to_vec()
            }
            Some(c) => c.decompress(body, expected_raw)?,
            None => {
                return Err(CodecError::malformed(
                    "ImageBlock",
                    "compressed block but no compressor supplied",
                ));
            }
        };
        self.slices.insert(line_index, (raw, body.len()));

        let num_slices = (header.height as usize).div_ceil(header.line_height as usize);
        if self.slices.len() < num_slices {
            return Ok(None);
        }

        let wire_total: usize = self.slices.values().map(|(_, len)| len).sum();
        if wire_total != header.total_data_len {
            return Err(CodecError::malformed(
                "ImageBlock",
                format!("received {} data bytes, header declared {}", wire_total, header.total_data_len),
            ));
        }

        // BTreeMap ordering restores row order regardless of arrival order.
        let mut data = Vec::with_capacity(packed_len(header.width, header.height, header.bpp));
        for (slice, _) in self.slices.values() {
            data.extend_from_slice(slice);
        }
        let sprite = TxSprite::new(
            header.width,
            header.height,
            header.bpp,
            header.palette.clone(),
            data,
        )?;
        self.header = None;
        self.slices.clear();
        Ok(Some(sprite))
    }
}

fn parse_header(bytes: &[u8]) -> Result<BlockHeader, CodecError> {
    if bytes.len() < 13 {
        return Err(CodecError::malformed(
            "ImageBlock header",
            format!("expected at least 13 bytes, got {}", bytes.len()),
        ));
    }
    let width = u16::from_be_bytes([bytes[0], bytes[1]]);
    let height = u16::from_be_bytes([bytes[2], bytes[3]]);
    let line_height = u16::from_be_bytes([bytes[4], bytes[5]]);
    let compressed = bytes[6] != 0;
    let bpp = bytes[7];
    let colors = if bytes[8] == 0 { 256 } else { bytes[8] as usize };
    let total_data_len = u32::from_be_bytes([bytes[9], bytes[10], bytes[11], bytes[12]]) as usize;

    if width == 0 || height == 0 || line_height == 0 {
        return Err(CodecError::malformed("ImageBlock header", "zero dimension"));
    }
    if ![1, 2, 4, 8].contains(&bpp) || colors != 1usize << bpp {
        return Err(CodecError::malformed(
            "ImageBlock header",
            format!("{} colors inconsistent with bpp {}", colors, bpp),
        ));
    }
    let palette_end = 13 + colors * 3;
    if bytes.len() != palette_end {
        return Err(CodecError::malformed(
            "ImageBlock header",
            format!("expected {} bytes with palette, got {}", palette_end, bytes.len()),
        ));
    }
    let palette = bytes[13..palette_end]
        .chunks_exact(3)
        .map(|c| [c[0], c[1], c[2]])
        .collect();

    Ok(BlockHeader { width, height, line_height, compressed, bpp, total_data_len, palette })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grey_palette(colors: usize) -> Vec<[u8; 3]> {
        (0..colors)
            .map(|i| {
                let v = (i * 255 / (colors - 1)) as u8;
                [v, v, v]
            })
            .collect()
    }

    fn test_sprite(width: u16, height: u16, bpp: u8) -> TxSprite {
        let len = packed_len(width, height, bpp);
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        TxSprite::new(width, height, bpp, grey_palette(1 << bpp), data).unwrap()
    }

    #[test]
    fn dividing_line_height_produces_equal_slices() {
        let block = TxImageSpriteBlock::new(test_sprite(64, 64, 4), 8).unwrap();
        assert_eq!(block.num_slices(), 8);
        // 8 rows of 64 pixels at 4 bpp = 256 bytes per band.
        for i in 0..8 {
            assert_eq!(block.pack_slice(i).len(), 2 + 256);
        }
    }

    #[test]
    fn non_dividing_line_height_has_short_last_slice() {
        let block = TxImageSpriteBlock::new(test_sprite(64, 60, 4), 8).unwrap();
        assert_eq!(block.num_slices(), 8);
        // Last band covers 4 rows only.
        assert_eq!(block.pack_slice(7).len(), 2 + 128);
    }

    #[test]
    fn slices_partition_the_packed_data() {
        // 3 pixels per row at 1 bpp: row boundaries do not fall on bytes.
        let sprite = test_sprite(3, 10, 1);
        let SpriteData::Raw(original) = sprite.data.clone() else { unreachable!() };

        let block = TxImageSpriteBlock::new(sprite, 3).unwrap();
        let mut rebuilt = Vec::new();
        for i in 0..block.num_slices() {
            rebuilt.extend_from_slice(&block.pack_slice(i)[2..]);
        }
        assert_eq!(rebuilt, original);
    }

    #[test]
    fn zero_line_height_is_rejected() {
        assert!(TxImageSpriteBlock::new(test_sprite(8, 8, 1), 0).is_err());
    }

    #[test]
    fn header_carries_dimensions_and_palette() {
        let block = TxImageSpriteBlock::new(test_sprite(64, 64, 4), 8).unwrap();
        let header = block.pack_header();
        assert_eq!(&header[..6], &[0, 64, 0, 64, 0, 8]);
        assert_eq!(header[6], 0); // uncompressed
        assert_eq!(header[7], 4);
        assert_eq!(header[8], 16);
        let total = u32::from_be_bytes([header[9], header[10], header[11], header[12]]);
        assert_eq!(total as usize, packed_len(64, 64, 4));
        assert_eq!(header.len(), 13 + 16 * 3);
    }

    #[test]
    fn assembler_round_trips_in_order() {
        let sprite = test_sprite(64, 64, 4);
        let block = TxImageSpriteBlock::new(sprite.clone(), 8).unwrap();

        let mut assembler = ImageBlockAssembler::new();
        assert!(assembler.push(&block.pack_header()).unwrap().is_none());
        for i in 0..block.num_slices() - 1 {
            assert!(assembler.push(&block.pack_slice(i)).unwrap().is_none());
        }
        let rebuilt = assembler
            .push(&block.pack_slice(block.num_slices() - 1))
            .unwrap()
            .expect("last slice completes the image");
        assert_eq!(rebuilt, sprite);
    }

    #[test]
    fn assembler_tolerates_out_of_order_slices() {
        let sprite = test_sprite(16, 16, 2);
        let block = TxImageSpriteBlock::new(sprite.clone(), 4).unwrap();

        let mut assembler = ImageBlockAssembler::new();
        assembler.push(&block.pack_header()).unwrap();
        let mut result = None;
        for i in [3, 0, 2, 1] {
            result = assembler.push(&block.pack_slice(i)).unwrap();
        }
        assert_eq!(result.expect("complete"), sprite);
    }

    #[test]
    fn assembler_rejects_bad_line_index() {
        let block = TxImageSpriteBlock::new(test_sprite(16, 16, 2), 4).unwrap();
        let mut assembler = ImageBlockAssembler::new();
        assembler.push(&block.pack_header()).unwrap();

        let mut slice = block.pack_slice(1).to_vec();
        slice[1] = 5; // not a multiple of line_height
        assert!(assembler.push(&slice).is_err());
        slice[0] = 0xFF; // beyond the image
        assert!(assembler.push(&slice).is_err());
    }

    #[test]
    fn assembler_requires_compressor_for_compressed_blocks() {
        struct Xor;
        impl BlockCompressor for Xor {
            fn compress(&self, data: &[u8]) -> Vec<u8> {
                // Shrinks by dropping every second byte of repeated pairs;
                // here just a stub that always halves repetitive data.
                data.iter().step_by(2).map(|b| *b ^ 0x55).collect()
            }
            fn decompress(&self, data: &[u8], expected: usize) -> Result<Vec<u8>, CodecError> {
                let mut out = Vec::with_capacity(expected);
                for b in data {
                    out.push(*b ^ 0x55);
                    if out.len() < expected {
                        out.push(*b ^ 0x55);
                    }
                }
                if out.len() != expected {
                    return Err(CodecError::bad_decompression(expected, out.len()));
                }
                Ok(out)
            }
        }

        let len = packed_len(16, 16, 2);
        let sprite = TxSprite::new(16, 16, 2, grey_palette(4), vec![0x33; len]).unwrap();
        let mut block = TxImageSpriteBlock::new(sprite.clone(), 4).unwrap();
        block.compress_with(&Xor);
        assert!(block.is_compressed());

        let mut strict = ImageBlockAssembler::new();
        strict.push(&block.pack_header()).unwrap();
        assert!(strict.push(&block.pack_slice(0)).is_err());

        let mut assembler = ImageBlockAssembler::new();
        assembler.push_with(&block.pack_header(), &Xor).unwrap();
        let mut result = None;
        for i in 0..block.num_slices() {
            result = assembler.push_with(&block.pack_slice(i), &Xor).unwrap();
        }
        assert_eq!(result.expect("complete"), sprite);
    }

    #[test]
    fn compression_is_all_or_none() {
        struct Grow;
        impl BlockCompressor for Grow {
            fn compress(&self, data: &[u8]) -> Vec<u8> {
                let mut out = data.to_vec();
                out.push(0);
                out
            }
            fn decompress(&self, data: &[u8], expected: usize) -> Result<Vec<u8>, CodecError> {
                Ok(data[..expected].to_vec())
            }
        }

        let mut block = TxImageSpriteBlock::new(test_sprite(16, 16, 2), 4).unwrap();
        block.compress_with(&Grow);
        assert!(!block.is_compressed());
        // Raw slices untouched when compression does not pay.
        assert_eq!(block.pack_slice(0).len(), 2 + 16);
    }
}
