//! Input ports: per-frame snapshots of switches, analog axes, and the
//! odd rotary encoder with scrambled bit wiring.
//!
//! Digital ports are active low (idle reads 0xFF), matching the pull-ups
//! on every board in the corpus. The frontend writes a snapshot once per
//! frame; bus handlers read whatever the last snapshot holds.

use std::cell::Cell;
use std::rc::Rc;

use crate::bus::{AddressHandler, SharedHandler};

/// One 8-bit switch bank, shared between the frontend and a bus handler.
#[derive(Clone)]
pub struct DigitalPort {
    value: Rc<Cell<u8>>,
}

impl DigitalPort {
    pub fn new() -> Self {
        Self {
            value: Rc::new(Cell::new(0xFF)),
        }
    }

    /// Frontend snapshot write; bits are active low.
    pub fn set(&self, value: u8) {
        self.value.set(value);
    }

    pub fn get(&self) -> u8 {
        self.value.get()
    }

    /// Read-only bus window onto this port.
    pub fn handler(&self) -> SharedHandler {
        Rc::new(std::cell::RefCell::new(PortHandler(self.clone())))
    }
}

impl Default for DigitalPort {
    fn default() -> Self {
        Self::new()
    }
}

struct PortHandler(DigitalPort);

impl AddressHandler for PortHandler {
    fn read(&self, _addr: u32) -> u8 {
        self.0.get()
    }

    fn write(&mut self, _addr: u32, _value: u8) {
        // Input latches have no write side.
    }
}

/// Signed analog axis (trackball delta, spinner, lightgun position).
#[derive(Clone)]
pub struct AnalogAxis {
    value: Rc<Cell<i16>>,
}

impl AnalogAxis {
    pub fn new() -> Self {
        Self {
            value: Rc::new(Cell::new(0)),
        }
    }

    pub fn set(&self, value: i16) {
        self.value.set(value);
    }

    pub fn get(&self) -> i16 {
        self.value.get()
    }
}

impl Default for AnalogAxis {
    fn default() -> Self {
        Self::new()
    }
}

/// Pass a raw rotary-encoder value through the board's wiring PROM.
///
/// Some boards route the encoder bits through scrambled traces; software
/// must translate through a fixed table before use. This is an explicit
/// step, not something a port read does silently, because it is a wiring
/// quirk of specific boards and the raw value is also observable.
pub fn apply_scramble(table: &[u8], raw: u8) -> u8 {
    if table.is_empty() {
        return raw;
    }
    table[raw as usize % table.len()]
}

/// A 12-position rotary joystick as several corpus boards fit.
pub struct RotaryDial {
    position: Cell<u8>,
    positions: u8,
}

impl RotaryDial {
    pub fn new(positions: u8) -> Self {
        Self {
            position: Cell::new(0),
            positions: positions.max(1),
        }
    }

    pub fn rotate(&self, steps: i8) {
        let n = i16::from(self.positions);
        let next = (i16::from(self.position.get()) + i16::from(steps)).rem_euclid(n);
        self.position.set(next as u8);
    }

    /// Raw mechanical position, before any wiring translation.
    pub fn raw(&self) -> u8 {
        self.position.get()
    }

    /// Position as the CPU sees it through the scramble table.
    pub fn scrambled(&self, table: &[u8]) -> u8 {
        apply_scramble(table, self.position.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digital_port_is_active_low_idle() {
        let port = DigitalPort::new();
        assert_eq!(port.get(), 0xFF);
        port.set(0b1111_1110); // button 0 pressed
        assert_eq!(port.get(), 0xFE);
    }

    #[test]
    fn port_handler_reflects_snapshot() {
        let port = DigitalPort::new();
        let handler = port.handler();
        port.set(0x5A);
        assert_eq!(handler.borrow().read(0), 0x5A);
        handler.borrow_mut().write(0, 0x00);
        assert_eq!(port.get(), 0x5A); // writes ignored
    }

    #[test]
    fn analog_axis_round_trip() {
        let axis = AnalogAxis::new();
        axis.set(-128);
        assert_eq!(axis.get(), -128);
    }

    #[test]
    fn rotary_wraps_both_directions() {
        let dial = RotaryDial::new(12);
        dial.rotate(-1);
        assert_eq!(dial.raw(), 11);
        dial.rotate(2);
        assert_eq!(dial.raw(), 1);
    }

    #[test]
    fn scramble_table_is_applied_explicitly() {
        // 12-position gray-ish wiring table.
        let table = [0x0, 0x1, 0x3, 0x2, 0x6, 0x7, 0x5, 0x4, 0xC, 0xD, 0xF, 0xE];
        let dial = RotaryDial::new(12);
        dial.rotate(4);
        assert_eq!(dial.raw(), 4);
        assert_eq!(dial.scrambled(&table), 0x6);
        assert_eq!(apply_scramble(&table, 10), 0xF);
        assert_eq!(apply_scramble(&[], 10), 10);
    }
}
