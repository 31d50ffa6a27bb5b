//! Host-side text rasterization into row sprites.
//!
//! The peripheral's own font covers a limited repertoire; arbitrary scripts
//! are shaped on the host instead and shipped as 1-bpp row sprites the
//! peripheral blits without understanding the text. Glyph rasterization is an
//! external collaborator behind [`GlyphProvider`].

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{CodecError, LinkError};
use crate::link::Link;
use crate::messages::WireMessage;
use crate::messages::codes;
use crate::messages::sprite::TxSprite;
use crate::quantize::pack_indices;

/// Horizontal writing direction of a run of text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ltr,
    Rtl,
}

/// One rasterized glyph: a coverage bitmap plus its horizontal advance.
#[derive(Debug, Clone)]
pub struct GlyphBitmap {
    pub width: u16,
    pub height: u16,
    /// Pen movement after this glyph, in pixels.
    pub advance: u16,
    /// Row-major coverage, one byte per pixel, 0 is blank.
    pub coverage: Vec<u8>,
}

/// Source of rasterized glyphs, typically backed by a font library.
///
/// Returning `None` for a character drops it from the output; substitution
/// policy belongs to the provider, not the shaper.
pub trait GlyphProvider {
    fn glyph(&self, ch: char, font_size: u8) -> Option<GlyphBitmap>;
}

/// One shaped row: a 1-bpp sprite plus its placement within the page.
#[derive(Debug, Clone)]
pub struct TextRow {
    pub row_index: u8,
    /// Vertical offset of the row's top edge within the page, in pixels.
    pub y_offset: u16,
    pub sprite: TxSprite,
}

/// A page of shaped text rows, ready for sliced transfer.
#[derive(Debug, Clone)]
pub struct TxTextSpriteBlock {
    width: u16,
    font_size: u8,
    max_rows: u8,
    rows: Vec<TextRow>,
}

impl TxTextSpriteBlock {
    /// Shape `text` into pages at most `max_rows` rows tall.
    ///
    /// Lines wrap greedily at whitespace within `width` pixels (a word wider
    /// than the page is hard-broken); explicit newlines start a new row.
    /// Right-to-left text is laid out right-aligned with glyph order
    /// reversed. Every row sprite spans the full page width at 1 bpp.
    pub fn shape<P: GlyphProvider>(
        text: &str,
        provider: &P,
        width: u16,
        font_size: u8,
        max_rows: u8,
    ) -> Result<Vec<Self>, CodecError> {
        if width == 0 {
            return Err(CodecError::out_of_range("width", 0, 1, u16::MAX as i64));
        }
        if font_size == 0 {
            return Err(CodecError::out_of_range("font_size", 0, 1, u8::MAX as i64));
        }
        if max_rows == 0 {
            return Err(CodecError::out_of_range("max_rows", 0, 1, u8::MAX as i64));
        }

        let direction = detect_direction(text);
        let mut lines: Vec<Vec<(char, GlyphBitmap)>> = Vec::new();
        for paragraph in text.split('\n') {
            wrap_paragraph(paragraph, provider, font_size, width, &mut lines);
        }

        let mut pages = Vec::new();
        for page_lines in lines.chunks(max_rows as usize) {
            let rows = page_lines
                .iter()
                .enumerate()
                .map(|(i, glyphs)| {
                    let sprite = rasterize_row(glyphs, width, font_size, direction)?;
                    Ok(TextRow {
                        row_index: i as u8,
                        y_offset: i as u16 * font_size as u16,
                        sprite,
                    })
                })
                .collect::<Result<Vec<_>, CodecError>>()?;
            pages.push(Self { width, font_size, max_rows, rows });
        }
        Ok(pages)
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn rows(&self) -> &[TextRow] {
        &self.rows
    }

    /// Pack the page header:
    /// `[width u16][font_size u8][max_rows u8][rows_in_page u8]`.
    pub fn pack_header(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(5);
        buf.put_u16(self.width);
        buf.put_u8(self.font_size);
        buf.put_u8(self.max_rows);
        buf.put_u8(self.rows.len() as u8);
        buf.freeze()
    }

    /// Pack one row message: `[row_index u8][y_offset u16][sprite bytes]`.
    pub fn pack_row(&self, index: usize) -> Bytes {
        let row = &self.rows[index];
        let sprite = row.sprite.pack();
        let mut buf = BytesMut::with_capacity(3 + sprite.len());
        buf.put_u8(row.row_index);
        buf.put_u16(row.y_offset);
        buf.put_slice(&sprite);
        buf.freeze()
    }

    /// Send the page over `link`: header first, then every row in order,
    /// each as its own message under [`codes::SPRITE_BLOCK`].
    pub async fn send(&self, link: &Link) -> Result<(), LinkError> {
        link.send_message(codes::SPRITE_BLOCK, &self.pack_header()).await?;
        for i in 0..self.rows.len() {
            link.send_message(codes::SPRITE_BLOCK, &self.pack_row(i)).await?;
        }
        Ok(())
    }
}

/// First strongly-directional character decides the run direction.
fn detect_direction(text: &str) -> Direction {
    for ch in text.chars() {
        let cp = ch as u32;
        if (0x0590..=0x08FF).contains(&cp) || (0xFB1D..=0xFDFF).contains(&cp) {
            return Direction::Rtl;
        }
        if ch.is_alphabetic() {
            return Direction::Ltr;
        }
    }
    Direction::Ltr
}

/// Greedy word wrap of one paragraph into glyph lines of at most `width`
/// pixels. An empty paragraph still yields one (blank) line.
fn wrap_paragraph<P: GlyphProvider>(
    paragraph: &str,
    provider: &P,
    font_size: u8,
    width: u16,
    lines: &mut Vec<Vec<(char, GlyphBitmap)>>,
) {
    let mut line: Vec<(char, GlyphBitmap)> = Vec::new();
    let mut pen = 0u32;
    let mut break_at: Option<(usize, u32)> = None; // (glyph index, pen after break)

    for ch in paragraph.chars() {
        let Some(glyph) = provider.glyph(ch, font_size) else { continue };
        if ch.is_whitespace() {
            break_at = Some((line.len(), pen + glyph.advance as u32));
        }
        if pen + glyph.width as u32 > width as u32 && !line.is_empty() {
            match break_at.take() {
                Some((at, _)) if at > 0 => {
                    let rest: Vec<_> = line.split_off(at);
                    while line.last().is_some_and(|(c, _)| c.is_whitespace()) {
                        line.pop();
                    }
                    lines.push(std::mem::take(&mut line));
                    line = rest
                        .into_iter()
                        .skip_while(|(c, _)| c.is_whitespace())
                        .collect();
                }
                _ => lines.push(std::mem::take(&mut line)), // hard break mid-word
            }
            pen = line.iter().map(|(_, g)| g.advance as u32).sum();
        }
        pen += glyph.advance as u32;
        line.push((ch, glyph));
    }
    lines.push(line);
}

/// Rasterize one line of glyphs into a full-width 1-bpp sprite.
fn rasterize_row(
    glyphs: &[(char, GlyphBitmap)],
    width: u16,
    font_size: u8,
    direction: Direction,
) -> Result<TxSprite, CodecError> {
    let w = width as usize;
    let h = font_size as usize;
    let mut canvas = vec![0u8; w * h];

    let used: u32 = glyphs.iter().map(|(_, g)| g.advance as u32).sum();
    let mut pen: i32 = match direction {
        Direction::Ltr => 0,
        Direction::Rtl => width as i32 - used.min(width as u32) as i32,
    };

    let ordered: Box<dyn Iterator<Item = &(char, GlyphBitmap)>> = match direction {
        Direction::Ltr => Box::new(glyphs.iter()),
        Direction::Rtl => Box::new(glyphs.iter().rev()),
    };

    for (_, glyph) in ordered {
        // Bottom-aligned within the line box, clipped at the canvas edges.
        let top = h as i32 - glyph.height as i32;
        for gy in 0..glyph.height as i32 {
            let y = top + gy;
            if !(0..h as i32).contains(&y) {
                continue;
            }
            for gx in 0..glyph.width as i32 {
                let x = pen + gx;
                if !(0..w as i32).contains(&x) {
                    continue;
                }
                let coverage = glyph.coverage[(gy * glyph.width as i32 + gx) as usize];
                if coverage >= 128 {
                    canvas[y as usize * w + x as usize] = 1;
                }
            }
        }
        pen += glyph.advance as i32;
    }

    TxSprite::new(
        width,
        font_size as u16,
        1,
        vec![[0, 0, 0], [255, 255, 255]],
        pack_indices(&canvas, 1),
    )
}
