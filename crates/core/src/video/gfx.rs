//! Tile pixel decode for the graphics ROM layouts arcade boards use.
//!
//! Two layouts cover the corpus: planar 2bpp (two sequential bitplanes
//! per 8x8 tile) and linear 4bpp (one nibble per pixel). Decoders are
//! stateless; a `GfxSet` binds one to a shared graphics ROM.

use std::rc::Rc;

/// Decodes one pixel of one tile out of raw graphics ROM bytes.
pub trait GfxDecoder {
    /// Pen index for pixel (x, y) of the tile starting at `tile_data`.
    /// Coordinates outside the tile decode to pen 0.
    fn decode_pixel(&self, tile_data: &[u8], x: u8, y: u8) -> u8;

    /// Bytes per tile in this layout.
    fn tile_size(&self) -> usize;
}

/// Planar 2bpp: bytes 0-7 low plane, bytes 8-15 high plane, one bit per
/// pixel per row, MSB leftmost.
#[derive(Debug, Clone, Copy)]
pub struct Planar2Bpp;

impl GfxDecoder for Planar2Bpp {
    fn decode_pixel(&self, tile_data: &[u8], x: u8, y: u8) -> u8 {
        if tile_data.len() < 16 || x > 7 || y > 7 {
            return 0;
        }
        let lo = tile_data[y as usize];
        let hi = tile_data[y as usize + 8];
        let bit = 7 - x;
        ((hi >> bit) & 1) << 1 | ((lo >> bit) & 1)
    }

    fn tile_size(&self) -> usize {
        16
    }
}

/// Linear 4bpp: 32 bytes per 8x8 tile, high nibble is the left pixel.
#[derive(Debug, Clone, Copy)]
pub struct Linear4Bpp;

impl GfxDecoder for Linear4Bpp {
    fn decode_pixel(&self, tile_data: &[u8], x: u8, y: u8) -> u8 {
        if tile_data.len() < 32 || x > 7 || y > 7 {
            return 0;
        }
        let byte = tile_data[y as usize * 4 + (x / 2) as usize];
        if x & 1 == 0 {
            byte >> 4
        } else {
            byte & 0x0F
        }
    }

    fn tile_size(&self) -> usize {
        32
    }
}

/// A decoder bound to its graphics ROM: the per-machine "gfx element".
pub struct GfxSet {
    data: Rc<Vec<u8>>,
    decoder: Box<dyn GfxDecoder>,
    tile_w: u8,
    tile_h: u8,
}

impl GfxSet {
    pub fn new(data: Rc<Vec<u8>>, decoder: Box<dyn GfxDecoder>, tile_w: u8, tile_h: u8) -> Self {
        Self {
            data,
            decoder,
            tile_w,
            tile_h,
        }
    }

    pub fn tile_w(&self) -> u8 {
        self.tile_w
    }

    pub fn tile_h(&self) -> u8 {
        self.tile_h
    }

    /// Number of whole tiles in the ROM.
    pub fn elements(&self) -> usize {
        (self.data.len() / self.decoder.tile_size()).max(1)
    }

    /// Pen for pixel (x, y) of tile `code`. Codes past the end of the ROM
    /// wrap modulo the element count, like undecoded address lines.
    pub fn pen(&self, code: usize, x: u8, y: u8) -> u8 {
        let code = code % self.elements();
        let start = code * self.decoder.tile_size();
        let end = (start + self.decoder.tile_size()).min(self.data.len());
        self.decoder.decode_pixel(&self.data[start..end], x, y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn planar_2bpp_checkerboard() {
        let mut tile = vec![0u8; 16];
        // Low plane alternates per pixel, high plane solid in the top half.
        for y in 0..8 {
            tile[y] = if y % 2 == 0 { 0b1010_1010 } else { 0b0101_0101 };
        }
        for y in 0..4 {
            tile[8 + y] = 0xFF;
        }

        let d = Planar2Bpp;
        assert_eq!(d.decode_pixel(&tile, 0, 0), 3);
        assert_eq!(d.decode_pixel(&tile, 1, 0), 2);
        assert_eq!(d.decode_pixel(&tile, 0, 4), 1);
        assert_eq!(d.decode_pixel(&tile, 1, 4), 0);
        assert_eq!(d.tile_size(), 16);
    }

    #[test]
    fn planar_2bpp_out_of_bounds_is_pen_zero() {
        let d = Planar2Bpp;
        assert_eq!(d.decode_pixel(&[0xFF; 16], 8, 0), 0);
        assert_eq!(d.decode_pixel(&[0xFF; 16], 0, 8), 0);
        assert_eq!(d.decode_pixel(&[0xFF; 4], 0, 0), 0);
    }

    #[test]
    fn linear_4bpp_nibble_order() {
        let mut tile = vec![0u8; 32];
        tile[0] = 0x1F; // row 0: pens 1, 15, ...
        tile[4] = 0xA0; // row 1: pens 10, 0, ...

        let d = Linear4Bpp;
        assert_eq!(d.decode_pixel(&tile, 0, 0), 1);
        assert_eq!(d.decode_pixel(&tile, 1, 0), 15);
        assert_eq!(d.decode_pixel(&tile, 0, 1), 10);
        assert_eq!(d.decode_pixel(&tile, 1, 1), 0);
        assert_eq!(d.tile_size(), 32);
    }

    #[test]
    fn gfx_set_wraps_out_of_range_codes() {
        // Two tiles: tile 0 all pen 0, tile 1 all pen 3.
        let mut rom = vec![0u8; 32];
        for b in &mut rom[16..32] {
            *b = 0xFF;
        }
        let gfx = GfxSet::new(Rc::new(rom), Box::new(Planar2Bpp), 8, 8);

        assert_eq!(gfx.elements(), 2);
        assert_eq!(gfx.pen(1, 0, 0), 3);
        // Code 3 wraps to tile 1.
        assert_eq!(gfx.pen(3, 0, 0), 3);
        // Code 2 wraps to tile 0.
        assert_eq!(gfx.pen(2, 0, 0), 0);
    }
}
