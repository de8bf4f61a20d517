//! Per-frame sprite compositor.
//!
//! Sprite RAM is the single source of truth: every frame the table is
//! re-scanned from scratch, no sprite state persists between frames.
//! There is no z-buffer; draw order is the priority mechanism, so the
//! configured iteration direction must match the hardware exactly.

use std::rc::Rc;

use crate::types::{ClipRect, Frame};
use crate::video::gfx::GfxSet;
use crate::video::palette::{ColorLookup, Palette};
use crate::video::VideoError;

/// One decoded sprite record. `None` from the decode callback marks a
/// disabled slot (off-screen Y, sentinel byte, whatever the board uses).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpriteInfo {
    pub code: usize,
    pub x: i32,
    pub y: i32,
    pub flip_x: bool,
    pub flip_y: bool,
    pub color: u16,
    /// Priority slot, tested against the compositor's mask bit by bit.
    pub priority: u8,
}

pub type SpriteDecodeFn = Box<dyn Fn(&[u8]) -> Option<SpriteInfo>>;

pub struct SpriteTable {
    stride: usize,
    count: usize,
    /// Draw highest RAM index first so the lowest index lands on top.
    reverse_order: bool,
    transparent_pen: u8,
    gfx: Rc<GfxSet>,
    decode: SpriteDecodeFn,
}

impl SpriteTable {
    pub fn new(
        stride: usize,
        count: usize,
        reverse_order: bool,
        gfx: Rc<GfxSet>,
        decode: SpriteDecodeFn,
    ) -> Self {
        Self {
            stride: stride.max(1),
            count,
            reverse_order,
            transparent_pen: 0,
            gfx,
            decode,
        }
    }

    pub fn set_transparent_pen(&mut self, pen: u8) {
        self.transparent_pen = pen;
    }

    /// Scan `ram` and draw every enabled sprite whose priority bit is in
    /// `priority_mask`. Flips mirror the source read order and are
    /// re-evaluated here every frame, never cached.
    pub fn composite(
        &self,
        frame: &mut Frame,
        clip: ClipRect,
        ram: &[u8],
        palette: &Palette,
        lookup: &ColorLookup,
        priority_mask: u8,
    ) -> Result<(), VideoError> {
        let indices: Vec<usize> = if self.reverse_order {
            (0..self.count).rev().collect()
        } else {
            (0..self.count).collect()
        };

        for i in indices {
            let start = i * self.stride;
            let Some(record) = ram.get(start..start + self.stride) else {
                continue;
            };
            let Some(sprite) = (self.decode)(record) else {
                continue;
            };
            if priority_mask & (1 << (sprite.priority & 7)) == 0 {
                continue;
            }
            if sprite.color >= lookup.groups() {
                return Err(VideoError::ColorGroupOutOfRange {
                    group: sprite.color,
                    groups: lookup.groups(),
                });
            }
            self.draw_one(frame, clip, &sprite, palette, lookup);
        }
        Ok(())
    }

    fn draw_one(
        &self,
        frame: &mut Frame,
        clip: ClipRect,
        sprite: &SpriteInfo,
        palette: &Palette,
        lookup: &ColorLookup,
    ) {
        let w = i32::from(self.gfx.tile_w());
        let h = i32::from(self.gfx.tile_h());
        for ty in 0..h {
            let dy = sprite.y + ty;
            if dy < 0 || dy >= frame.height as i32 {
                continue;
            }
            let sy = if sprite.flip_y { h - 1 - ty } else { ty };
            for tx in 0..w {
                let dx = sprite.x + tx;
                if dx < 0 || dx >= frame.width as i32 {
                    continue;
                }
                if !clip.contains(dx as u32, dy as u32) {
                    continue;
                }
                let sx = if sprite.flip_x { w - 1 - tx } else { tx };
                let pen = self.gfx.pen(sprite.code, sx as u8, sy as u8);
                if pen == self.transparent_pen {
                    continue;
                }
                let color = palette.color(lookup.entry(sprite.color, pen) as usize);
                frame.pixels[dy as usize * frame.width as usize + dx as usize] = color;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::gfx::Planar2Bpp;

    // Tile 1 solid pen 1, tile 2 solid pen 2, tile 3 pen 3 except a
    // pen-0 hole at (0,0).
    fn test_gfx() -> Rc<GfxSet> {
        let mut rom = vec![0u8; 64];
        for row in 0..8 {
            rom[16 + row] = 0xFF; // tile 1 low plane
            rom[32 + 8 + row] = 0xFF; // tile 2 high plane
            rom[48 + row] = 0xFF;
            rom[48 + 8 + row] = 0xFF;
        }
        rom[48] = 0x7F;
        rom[48 + 8] = 0x7F;
        Rc::new(GfxSet::new(Rc::new(rom), Box::new(Planar2Bpp), 8, 8))
    }

    fn palette() -> (Palette, ColorLookup) {
        (
            Palette::from_colors(vec![0xFF000000, 0xFF0000FF, 0xFF00FF00, 0xFFFF0000]),
            ColorLookup::identity(1, 4),
        )
    }

    // Record layout: code, x, y, flags (bit0 flip_x, bit1 flip_y,
    // bit7 disable), priority.
    fn decode() -> SpriteDecodeFn {
        Box::new(|r: &[u8]| {
            if r[3] & 0x80 != 0 {
                return None;
            }
            Some(SpriteInfo {
                code: r[0] as usize,
                x: i32::from(r[1]),
                y: i32::from(r[2]),
                flip_x: r[3] & 1 != 0,
                flip_y: r[3] & 2 != 0,
                color: 0,
                priority: r[4] & 7,
            })
        })
    }

    #[test]
    fn reverse_order_puts_lower_index_on_top() {
        let table = SpriteTable::new(5, 2, true, test_gfx(), decode());
        let (pal, lut) = palette();
        let mut frame = Frame::new(32, 32);
        // Sprite 0: tile 1 at (4,4); sprite 1: tile 2 at (4,4).
        let ram = [1, 4, 4, 0, 0, 2, 4, 4, 0, 0];
        let clip = ClipRect::full(&frame);
        table
            .composite(&mut frame, clip, &ram, &pal, &lut, 0xFF)
            .unwrap();
        assert_eq!(frame.pixels[4 * 32 + 4], 0xFF0000FF); // sprite 0 wins
    }

    #[test]
    fn forward_order_puts_higher_index_on_top() {
        let table = SpriteTable::new(5, 2, false, test_gfx(), decode());
        let (pal, lut) = palette();
        let mut frame = Frame::new(32, 32);
        let ram = [1, 4, 4, 0, 0, 2, 4, 4, 0, 0];
        let clip = ClipRect::full(&frame);
        table
            .composite(&mut frame, clip, &ram, &pal, &lut, 0xFF)
            .unwrap();
        assert_eq!(frame.pixels[4 * 32 + 4], 0xFF00FF00); // sprite 1 wins
    }

    #[test]
    fn disabled_records_are_skipped() {
        let table = SpriteTable::new(5, 1, false, test_gfx(), decode());
        let (pal, lut) = palette();
        let mut frame = Frame::new(32, 32);
        let ram = [1, 4, 4, 0x80, 0];
        let clip = ClipRect::full(&frame);
        table
            .composite(&mut frame, clip, &ram, &pal, &lut, 0xFF)
            .unwrap();
        assert!(frame.pixels.iter().all(|&p| p == 0));
    }

    #[test]
    fn priority_mask_selects_slots() {
        let table = SpriteTable::new(5, 2, false, test_gfx(), decode());
        let (pal, lut) = palette();
        let mut frame = Frame::new(32, 32);
        // Sprite 0 priority 0, sprite 1 priority 1, different positions.
        let ram = [1, 0, 0, 0, 0, 2, 16, 0, 0, 1];
        let clip = ClipRect::full(&frame);
        table
            .composite(&mut frame, clip, &ram, &pal, &lut, 0x02)
            .unwrap();
        assert_eq!(frame.pixels[0], 0); // priority 0 not drawn
        assert_eq!(frame.pixels[16], 0xFF00FF00); // priority 1 drawn
    }

    #[test]
    fn transparent_pen_leaves_holes() {
        let table = SpriteTable::new(5, 1, false, test_gfx(), decode());
        let (pal, lut) = palette();
        let mut frame = Frame::new(32, 32);
        frame.pixels.fill(0xFF123456);
        let ram = [3, 0, 0, 0, 0];
        let clip = ClipRect::full(&frame);
        table
            .composite(&mut frame, clip, &ram, &pal, &lut, 0xFF)
            .unwrap();
        assert_eq!(frame.pixels[0], 0xFF123456); // the pen-0 hole
        assert_eq!(frame.pixels[1], 0xFFFF0000);
    }

    #[test]
    fn flips_mirror_source_order() {
        let table = SpriteTable::new(5, 1, false, test_gfx(), decode());
        let (pal, lut) = palette();

        // Unflipped: hole at (0,0). Both flips: hole at (7,7).
        let mut frame = Frame::new(8, 8);
        frame.pixels.fill(0xFF123456);
        let ram = [3, 0, 0, 0x03, 0];
        let clip = ClipRect::full(&frame);
        table
            .composite(&mut frame, clip, &ram, &pal, &lut, 0xFF)
            .unwrap();
        assert_eq!(frame.pixels[0], 0xFFFF0000);
        assert_eq!(frame.pixels[7 * 8 + 7], 0xFF123456);
    }

    #[test]
    fn offscreen_parts_are_clipped() {
        let table = SpriteTable::new(5, 1, false, test_gfx(), decode());
        let (pal, lut) = palette();
        let mut frame = Frame::new(8, 8);
        let mut ram = [1u8, 0, 0, 0, 0];
        ram[1] = 4; // x=4: right half clipped
        let clip = ClipRect::full(&frame);
        table
            .composite(&mut frame, clip, &ram, &pal, &lut, 0xFF)
            .unwrap();
        assert_eq!(frame.pixels[4], 0xFF0000FF);
        assert_eq!(frame.pixels[7], 0xFF0000FF);
    }
}
