//! Raster video chain: tile pixel decode, palette/color PROM lookup,
//! dirty-tracked tilemaps, per-frame sprite scan, and the layer
//! compositor that assembles the output frame.

pub mod gfx;
pub mod palette;
pub mod render;
pub mod sprite;
pub mod tilemap;

use thiserror::Error;

/// Video-chain failures. Soft hardware faults (bad tile codes, clipped
/// sprites) never show up here; these are internal invariant breaks.
#[derive(Debug, Error)]
pub enum VideoError {
    #[error("tile resolve produced color group {group} but the lookup table has {groups}")]
    ColorGroupOutOfRange { group: u16, groups: u16 },
    #[error("layer slot references tilemap {0} but the renderer has {1}")]
    UnknownLayer(usize, usize),
}

/// How a layer composites over what is already in the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opacity {
    /// Overwrite every pixel; bottom layers use this so the frame never
    /// needs a separate clear pass.
    Opaque,
    /// Skip pixels equal to the given pen.
    Transparent(u8),
}
