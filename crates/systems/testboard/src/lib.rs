//! Synthetic dual-CPU arcade board.
//!
//! This board exists to exercise the whole `coinop_core` engine end to
//! end: two CPUs trading commands through a soundlatch, a banked ROM
//! window, battery RAM, two tilemap layers with sprites interleaved
//! between them, and a square-wave PSG with a timer interrupt. The CPU
//! is a deliberately tiny scripted core; instruction-set fidelity is not
//! the point here.

pub mod bus;
pub mod cpu;
pub mod psg;
pub mod system;
pub mod video;

pub use system::{BoardError, Testboard, TestboardRoms};
