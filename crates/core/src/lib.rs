//! Core arcade-machine emulation primitives.
//!
//! Every board in this workspace is assembled from the same pieces: a
//! device registry, per-CPU address spaces, an interrupt controller, a
//! time-slice scheduler, and a tilemap/sprite video chain. The pieces live
//! here; the `crates/systems/*` crates wire them into concrete machines.

pub mod bus;
pub mod device;
pub mod input;
pub mod irq;
pub mod machine;
pub mod state;
pub mod video;

pub mod types {
    use serde::{Deserialize, Serialize};

    /// One rendered video frame, ARGB8888, row-major.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Frame {
        pub width: u32,
        pub height: u32,
        pub pixels: Vec<u32>,
    }

    impl Frame {
        pub fn new(width: u32, height: u32) -> Self {
            Self {
                width,
                height,
                pixels: vec![0; (width * height) as usize],
            }
        }
    }

    /// Clipping rectangle in frame coordinates, `max` exclusive.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ClipRect {
        pub min_x: u32,
        pub min_y: u32,
        pub max_x: u32,
        pub max_y: u32,
    }

    impl ClipRect {
        pub fn full(frame: &Frame) -> Self {
            Self {
                min_x: 0,
                min_y: 0,
                max_x: frame.width,
                max_y: frame.height,
            }
        }

        pub fn contains(&self, x: u32, y: u32) -> bool {
            x >= self.min_x && x < self.max_x && y >= self.min_y && y < self.max_y
        }
    }

    pub type AudioSample = i16;
}

/// An opaque steppable CPU execution unit.
///
/// The core never inspects instruction semantics. A concrete core owns
/// `Rc` handles to its address spaces and to the interrupt controller and
/// polls for pending interrupts at its own instruction boundaries.
pub trait CpuCore {
    fn reset(&mut self);

    /// Run for at most `cycles`; returns the cycles actually consumed.
    /// Consuming more than asked is allowed (an instruction may straddle
    /// the slice boundary); the scheduler carries the overrun forward.
    fn run(&mut self, cycles: u32) -> u32;
}

/// A sound generator consumed as a black box: register file in, samples out.
pub trait SoundChip {
    fn reset(&mut self);
    fn write_register(&mut self, addr: u8, value: u8);
    fn read_register(&self, addr: u8) -> u8;

    /// Fill `out` with signed 16-bit samples for this frame.
    fn generate(&mut self, out: &mut [types::AudioSample]);

    /// Edge-style internal timer flag, cleared by the call. The scheduler
    /// wires this to an interrupt line when the machine asks for it.
    fn timer_expired(&mut self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::types::{ClipRect, Frame};

    #[test]
    fn frame_initialization() {
        let f = Frame::new(16, 8);
        assert_eq!(f.pixels.len(), 128);
        assert_eq!(f.width, 16);
        assert_eq!(f.height, 8);
    }

    #[test]
    fn clip_rect_containment() {
        let f = Frame::new(4, 4);
        let clip = ClipRect::full(&f);
        assert!(clip.contains(0, 0));
        assert!(clip.contains(3, 3));
        assert!(!clip.contains(4, 0));
        assert!(!clip.contains(0, 4));
    }
}
