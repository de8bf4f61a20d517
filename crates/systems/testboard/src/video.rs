//! Video chain: two 32x32 tilemaps and a 64-entry sprite table.
//!
//! Video RAM layout is two bytes per cell, interleaved: even byte is the
//! low 8 bits of the tile code, odd byte is the attribute
//! (`ccccffnn` = color group, flip y/x, code bits 9..8). Sprite RAM is
//! four bytes per slot: code, attribute, y, x; a slot with y >= 0xF0 is
//! parked off screen and treated as disabled.

use std::rc::Rc;

use coinop_core::bus::{shared_ram, SharedRam};
use coinop_core::video::gfx::{GfxSet, Linear4Bpp, Planar2Bpp};
use coinop_core::video::palette::{ColorLookup, Palette};
use coinop_core::video::sprite::{SpriteInfo, SpriteTable};
use coinop_core::video::tilemap::{SharedTilemap, TileInfo, Tilemap};

pub const SCREEN_W: u32 = 256;
pub const SCREEN_H: u32 = 224;

pub const MAP_COLS: u32 = 32;
pub const MAP_ROWS: u32 = 32;
pub const VRAM_SIZE: usize = (MAP_COLS * MAP_ROWS) as usize * 2;

pub const SPRITE_COUNT: usize = 64;
pub const SPRITE_STRIDE: usize = 4;
pub const SPRITE_RAM_SIZE: usize = SPRITE_COUNT * SPRITE_STRIDE;

const COLOR_GROUPS: u16 = 16;
const PENS_PER_GROUP: u16 = 16;

pub struct VideoBoard {
    pub bg: SharedTilemap,
    pub fg: SharedTilemap,
    pub bg_ram: SharedRam,
    pub fg_ram: SharedRam,
    pub sprite_ram: SharedRam,
    pub sprites: SpriteTable,
    pub palette: Palette,
    pub lookup: ColorLookup,
}

impl VideoBoard {
    pub fn new(
        bg_tiles: Vec<u8>,
        fg_tiles: Vec<u8>,
        sprite_tiles: Vec<u8>,
        palette_prom: &[u8],
        lookup_prom: Option<&[u8]>,
    ) -> Self {
        let bg_gfx = Rc::new(GfxSet::new(Rc::new(bg_tiles), Box::new(Planar2Bpp), 8, 8));
        let fg_gfx = Rc::new(GfxSet::new(Rc::new(fg_tiles), Box::new(Planar2Bpp), 8, 8));
        let spr_gfx = Rc::new(GfxSet::new(
            Rc::new(sprite_tiles),
            Box::new(Linear4Bpp),
            8,
            8,
        ));

        let bg_ram = shared_ram(VRAM_SIZE);
        let fg_ram = shared_ram(VRAM_SIZE);
        let sprite_ram = shared_ram(SPRITE_RAM_SIZE);

        let bg = Tilemap::shared(MAP_COLS, MAP_ROWS, bg_gfx, resolve_cell(&bg_ram));
        let fg = Tilemap::shared(MAP_COLS, MAP_ROWS, fg_gfx, resolve_cell(&fg_ram));
        // Columns of the foreground get independent vertical scroll.
        fg.borrow_mut().set_scroll_cols(MAP_COLS);

        let sprites = SpriteTable::new(
            SPRITE_STRIDE,
            SPRITE_COUNT,
            true, // lowest RAM slot wins ties
            spr_gfx,
            Box::new(decode_sprite),
        );

        Self {
            bg,
            fg,
            bg_ram,
            fg_ram,
            sprite_ram,
            sprites,
            palette: palette_from_prom(palette_prom),
            lookup: match lookup_prom {
                Some(prom) => ColorLookup::from_prom(COLOR_GROUPS, PENS_PER_GROUP, prom),
                None => ColorLookup::identity(COLOR_GROUPS, PENS_PER_GROUP),
            },
        }
    }
}

fn resolve_cell(ram: &SharedRam) -> Box<dyn Fn(usize) -> TileInfo> {
    let ram = Rc::clone(ram);
    Box::new(move |idx| {
        let ram = ram.borrow();
        let code = ram[idx * 2];
        let attr = ram[idx * 2 + 1];
        TileInfo {
            code: usize::from(code) | (usize::from(attr & 0x03) << 8),
            color: u16::from(attr >> 4),
            flip_x: attr & 0x04 != 0,
            flip_y: attr & 0x08 != 0,
        }
    })
}

fn decode_sprite(record: &[u8]) -> Option<SpriteInfo> {
    let [code, attr, y, x] = record else {
        return None;
    };
    if *y >= 0xF0 {
        return None;
    }
    Some(SpriteInfo {
        code: usize::from(*code),
        x: i32::from(*x),
        y: i32::from(*y),
        flip_x: attr & 0x10 != 0,
        flip_y: attr & 0x20 != 0,
        color: u16::from(attr & 0x0F),
        // Bit 6 lifts the sprite above the foreground layer.
        priority: (attr >> 6) & 1,
    })
}

/// Expand an RGB332 color PROM into ARGB8888 by bit replication.
pub fn palette_from_prom(prom: &[u8]) -> Palette {
    let colors = prom
        .iter()
        .map(|&byte| {
            let r = expand3(byte >> 5);
            let g = expand3((byte >> 2) & 0x07);
            let b = expand2(byte & 0x03);
            0xFF00_0000 | (u32::from(r) << 16) | (u32::from(g) << 8) | u32::from(b)
        })
        .collect();
    Palette::from_colors(colors)
}

fn expand3(v: u8) -> u8 {
    (v << 5) | (v << 2) | (v >> 1)
}

fn expand2(v: u8) -> u8 {
    v * 0x55
}
