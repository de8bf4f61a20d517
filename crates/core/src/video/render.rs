//! Frame renderer: composites the configured layer stack into the output
//! frame once per video frame.
//!
//! Layer order is data, not code: a board describes its stack back to
//! front (some hardware interleaves sprite priority slots between tilemap
//! layers) and this module walks it. Flip-screen is applied once to the
//! finished bitmap, never threaded through the per-layer draw calls.

use std::cell::Cell;
use std::rc::Rc;

use crate::types::{ClipRect, Frame};
use crate::video::palette::{ColorLookup, Palette};
use crate::video::sprite::SpriteTable;
use crate::video::tilemap::SharedTilemap;
use crate::video::{Opacity, VideoError};

/// One entry of the back-to-front layer stack.
#[derive(Debug, Clone, Copy)]
pub enum LayerSlot {
    /// Solid fill, for boards whose bottom layer is not opaque.
    Backdrop(u32),
    Tilemap { index: usize, opacity: Opacity },
    /// Sprites whose priority bit is in the mask.
    Sprites { priority_mask: u8 },
}

pub struct FrameRenderer {
    frame: Frame,
    slots: Vec<LayerSlot>,
    /// Shared so a flip-screen port handler can drive it directly.
    flip_screen: Rc<Cell<bool>>,
}

impl FrameRenderer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            frame: Frame::new(width, height),
            slots: Vec::new(),
            flip_screen: Rc::new(Cell::new(false)),
        }
    }

    pub fn set_slots(&mut self, slots: Vec<LayerSlot>) {
        self.slots = slots;
    }

    /// Global 180-degree screen flip (cocktail-table player 2).
    pub fn set_flip_screen(&mut self, flip: bool) {
        self.flip_screen.set(flip);
    }

    pub fn flip_screen(&self) -> bool {
        self.flip_screen.get()
    }

    /// Handle for the port handler that latches flip-screen.
    pub fn flip_handle(&self) -> Rc<Cell<bool>> {
        Rc::clone(&self.flip_screen)
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    /// Walk the layer stack into the frame. The observable output is a
    /// pure function of tilemap/sprite/palette state; the only mutation
    /// is the tilemaps' internal pen caches catching up with dirty cells.
    pub fn render(
        &mut self,
        tilemaps: &[SharedTilemap],
        sprites: Option<(&SpriteTable, &[u8])>,
        palette: &Palette,
        lookup: &ColorLookup,
    ) -> Result<&Frame, VideoError> {
        let clip = ClipRect::full(&self.frame);
        for slot in &self.slots {
            match *slot {
                LayerSlot::Backdrop(color) => self.frame.pixels.fill(color),
                LayerSlot::Tilemap { index, opacity } => {
                    let map = tilemaps
                        .get(index)
                        .ok_or(VideoError::UnknownLayer(index, tilemaps.len()))?;
                    map.borrow_mut()
                        .composite(&mut self.frame, clip, opacity, palette, lookup)?;
                }
                LayerSlot::Sprites { priority_mask } => {
                    if let Some((table, ram)) = sprites {
                        table.composite(
                            &mut self.frame,
                            clip,
                            ram,
                            palette,
                            lookup,
                            priority_mask,
                        )?;
                    }
                }
            }
        }

        if self.flip_screen.get() {
            // Coordinate negation on both axes is a straight reversal of
            // the row-major pixel array.
            self.frame.pixels.reverse();
        }
        Ok(&self.frame)
    }
}
