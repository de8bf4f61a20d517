//! Dirty-tracked tilemap layer.
//!
//! The grid caches decoded pens per pixel; a cell is re-resolved (through
//! the driver's resolve callback) only after the backing RAM byte changed.
//! Dirty tracking is an optimization with no observable effect: the
//! composited output always equals a from-scratch resolve of every cell.

use std::cell::RefCell;
use std::rc::Rc;

use crate::bus::{AddressHandler, SharedHandler, SharedRam};
use crate::types::{ClipRect, Frame};
use crate::video::gfx::GfxSet;
use crate::video::palette::{ColorLookup, Palette};
use crate::video::{Opacity, VideoError};

/// A tile cell as the driver's resolve callback reports it from raw RAM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileInfo {
    pub code: usize,
    /// Color group fed through the lookup PROM.
    pub color: u16,
    pub flip_x: bool,
    pub flip_y: bool,
}

pub type ResolveFn = Box<dyn Fn(usize) -> TileInfo>;

pub struct Tilemap {
    cols: u32,
    rows: u32,
    tile_w: u32,
    tile_h: u32,
    gfx: Rc<GfxSet>,
    resolve: ResolveFn,
    /// Pen cache, `cols*tile_w` x `rows*tile_h`, row-major.
    pens: Vec<u8>,
    /// Resolved color group per cell.
    colors: Vec<u16>,
    dirty: Vec<bool>,
    any_dirty: bool,
    scroll_x: Vec<i32>,
    scroll_y: Vec<i32>,
}

pub type SharedTilemap = Rc<RefCell<Tilemap>>;

impl Tilemap {
    pub fn new(cols: u32, rows: u32, gfx: Rc<GfxSet>, resolve: ResolveFn) -> Self {
        let tile_w = u32::from(gfx.tile_w());
        let tile_h = u32::from(gfx.tile_h());
        let cells = (cols * rows) as usize;
        Self {
            cols,
            rows,
            tile_w,
            tile_h,
            gfx,
            resolve,
            pens: vec![0; (cols * tile_w * rows * tile_h) as usize],
            colors: vec![0; cells],
            dirty: vec![true; cells],
            any_dirty: true,
            scroll_x: vec![0],
            scroll_y: vec![0],
        }
    }

    pub fn shared(cols: u32, rows: u32, gfx: Rc<GfxSet>, resolve: ResolveFn) -> SharedTilemap {
        Rc::new(RefCell::new(Self::new(cols, rows, gfx, resolve)))
    }

    pub fn width_px(&self) -> u32 {
        self.cols * self.tile_w
    }

    pub fn height_px(&self) -> u32 {
        self.rows * self.tile_h
    }

    /// O(1); the covering cell is re-resolved on the next composite.
    pub fn mark_dirty(&mut self, tile_index: usize) {
        if let Some(flag) = self.dirty.get_mut(tile_index) {
            *flag = true;
            self.any_dirty = true;
        }
    }

    pub fn mark_all_dirty(&mut self) {
        self.dirty.fill(true);
        self.any_dirty = true;
    }

    /// Use `n` independent horizontal scroll values, one per tile row
    /// (1 = whole-layer scroll).
    pub fn set_scroll_rows(&mut self, n: u32) {
        self.scroll_x = vec![0; n.max(1) as usize];
    }

    /// Use `n` independent vertical scroll values, one per tile column.
    pub fn set_scroll_cols(&mut self, n: u32) {
        self.scroll_y = vec![0; n.max(1) as usize];
    }

    pub fn set_scroll_x(&mut self, row: u32, dx: i32) {
        let len = self.scroll_x.len();
        self.scroll_x[row as usize % len] = dx;
    }

    pub fn set_scroll_y(&mut self, col: u32, dy: i32) {
        let len = self.scroll_y.len();
        self.scroll_y[col as usize % len] = dy;
    }

    /// Wrap an `AddressHandler` around `ram` that keeps this tilemap's
    /// dirty flags in step with every write. `bytes_per_tile` covers the
    /// split video/attribute RAM layouts (1 for a color RAM byte per
    /// cell, 2 for code+attribute words, ...).
    pub fn ram_handler(
        map: &SharedTilemap,
        ram: SharedRam,
        bytes_per_tile: usize,
    ) -> SharedHandler {
        Rc::new(RefCell::new(TilemapRam {
            map: Rc::clone(map),
            ram,
            bytes_per_tile: bytes_per_tile.max(1),
        }))
    }

    fn refresh_dirty(&mut self, lookup: &ColorLookup) -> Result<(), VideoError> {
        if !self.any_dirty {
            return Ok(());
        }
        for cell in 0..self.dirty.len() {
            if !self.dirty[cell] {
                continue;
            }
            let info = (self.resolve)(cell);
            if info.color >= lookup.groups() {
                return Err(VideoError::ColorGroupOutOfRange {
                    group: info.color,
                    groups: lookup.groups(),
                });
            }
            self.colors[cell] = info.color;
            let cell_x = (cell as u32 % self.cols) * self.tile_w;
            let cell_y = (cell as u32 / self.cols) * self.tile_h;
            let pitch = self.width_px() as usize;
            for ty in 0..self.tile_h {
                let src_y = if info.flip_y { self.tile_h - 1 - ty } else { ty };
                for tx in 0..self.tile_w {
                    let src_x = if info.flip_x { self.tile_w - 1 - tx } else { tx };
                    let pen = self.gfx.pen(info.code, src_x as u8, src_y as u8);
                    self.pens[(cell_y + ty) as usize * pitch + (cell_x + tx) as usize] = pen;
                }
            }
            self.dirty[cell] = false;
        }
        self.any_dirty = false;
        Ok(())
    }

    /// Composite the scrolled layer into `frame` within `clip`.
    pub fn composite(
        &mut self,
        frame: &mut Frame,
        clip: ClipRect,
        opacity: Opacity,
        palette: &Palette,
        lookup: &ColorLookup,
    ) -> Result<(), VideoError> {
        self.refresh_dirty(lookup)?;

        let w = self.width_px() as i32;
        let h = self.height_px() as i32;
        let pitch = self.width_px() as usize;
        let max_x = clip.max_x.min(frame.width);
        let max_y = clip.max_y.min(frame.height);

        for y in clip.min_y..max_y {
            let row = (y / self.tile_h) as usize % self.scroll_x.len();
            let dx = self.scroll_x[row];
            let src_y_base = y as i32;
            for x in clip.min_x..max_x {
                let col = (x / self.tile_w) as usize % self.scroll_y.len();
                let dy = self.scroll_y[col];
                let sx = (x as i32 + dx).rem_euclid(w) as usize;
                let sy = (src_y_base + dy).rem_euclid(h) as usize;
                let pen = self.pens[sy * pitch + sx];
                if let Opacity::Transparent(t) = opacity {
                    if pen == t {
                        continue;
                    }
                }
                let cell = (sy as u32 / self.tile_h * self.cols
                    + sx as u32 / self.tile_w) as usize;
                let color = palette.color(lookup.entry(self.colors[cell], pen) as usize);
                frame.pixels[(y * frame.width + x) as usize] = color;
            }
        }
        Ok(())
    }
}

struct TilemapRam {
    map: SharedTilemap,
    ram: SharedRam,
    bytes_per_tile: usize,
}

impl AddressHandler for TilemapRam {
    fn read(&self, addr: u32) -> u8 {
        let ram = self.ram.borrow();
        ram.get(addr as usize % ram.len()).copied().unwrap_or(0xFF)
    }

    fn write(&mut self, addr: u32, value: u8) {
        let offset;
        {
            let mut ram = self.ram.borrow_mut();
            let len = ram.len();
            offset = addr as usize % len;
            ram[offset] = value;
        }
        self.map.borrow_mut().mark_dirty(offset / self.bytes_per_tile);
    }
}
