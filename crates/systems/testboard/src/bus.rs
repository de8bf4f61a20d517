//! I/O port handlers for the board.
//!
//! Each handler captures shared handles to the subsystem it fronts; none
//! of them hold the address space they are mapped into.

use std::cell::Cell;
use std::cell::RefCell;
use std::rc::Rc;

use log::trace;

use coinop_core::bus::{AddressHandler, BankHandle, Latch8};
use coinop_core::irq::{IrqLine, SharedIrq};
use coinop_core::machine::SharedSoundChip;
use coinop_core::video::tilemap::SharedTilemap;

/// Main-CPU side of the soundlatch: the written byte is latched and the
/// sound CPU is kicked with an NMI, the classic command handshake.
pub struct SoundLatchWrite {
    pub latch: Latch8,
    pub irq: SharedIrq,
    pub sound_cpu: usize,
}

impl AddressHandler for SoundLatchWrite {
    fn read(&self, _addr: u32) -> u8 {
        self.latch.get()
    }

    fn write(&mut self, _addr: u32, value: u8) {
        trace!("soundlatch <- {value:#04x}");
        self.latch.set(value);
        self.irq
            .borrow_mut()
            .pulse_line(self.sound_cpu, IrqLine::Nmi, None);
    }
}

/// Sound-CPU side: read-only view of the latch.
pub struct SoundLatchRead {
    pub latch: Latch8,
}

impl AddressHandler for SoundLatchRead {
    fn read(&self, _addr: u32) -> u8 {
        self.latch.get()
    }

    fn write(&mut self, _addr: u32, _value: u8) {}
}

/// ROM bank select. The written byte is the bank number.
pub struct BankSelect {
    pub bank: BankHandle,
}

impl AddressHandler for BankSelect {
    fn read(&self, _addr: u32) -> u8 {
        0xFF
    }

    fn write(&mut self, _addr: u32, value: u8) {
        self.bank.select(usize::from(value));
    }
}

/// VBlank interrupt acknowledge: any write drops the level line.
pub struct IrqAck {
    pub irq: SharedIrq,
    pub cpu: usize,
    pub line: IrqLine,
}

impl AddressHandler for IrqAck {
    fn read(&self, _addr: u32) -> u8 {
        0xFF
    }

    fn write(&mut self, _addr: u32, _value: u8) {
        self.irq.borrow_mut().clear_line(self.cpu, self.line);
    }
}

/// Whole-layer horizontal scroll register.
pub struct ScrollX {
    pub tilemap: SharedTilemap,
}

impl AddressHandler for ScrollX {
    fn read(&self, _addr: u32) -> u8 {
        0xFF
    }

    fn write(&mut self, _addr: u32, value: u8) {
        self.tilemap.borrow_mut().set_scroll_x(0, i32::from(value));
    }
}

/// Per-column vertical scroll: the port's low address bits pick the
/// column, so the register file maps as a small contiguous range.
pub struct ScrollYColumns {
    pub tilemap: SharedTilemap,
    pub base: u32,
}

impl AddressHandler for ScrollYColumns {
    fn read(&self, _addr: u32) -> u8 {
        0xFF
    }

    fn write(&mut self, addr: u32, value: u8) {
        let col = addr - self.base;
        self.tilemap.borrow_mut().set_scroll_y(col, i32::from(value));
    }
}

/// Flip-screen latch (bit 0).
pub struct FlipScreen {
    pub flip: Rc<Cell<bool>>,
}

impl AddressHandler for FlipScreen {
    fn read(&self, _addr: u32) -> u8 {
        u8::from(self.flip.get())
    }

    fn write(&mut self, _addr: u32, value: u8) {
        self.flip.set(value & 1 != 0);
    }
}

/// PSG access through a select/data port pair: even address latches the
/// register number, odd address reads or writes it.
pub struct PsgInterface {
    pub chip: SharedSoundChip,
    pub selected: Cell<u8>,
}

impl PsgInterface {
    pub fn new(chip: SharedSoundChip) -> Self {
        Self {
            chip,
            selected: Cell::new(0),
        }
    }
}

impl AddressHandler for PsgInterface {
    fn read(&self, addr: u32) -> u8 {
        if addr & 1 == 0 {
            self.selected.get()
        } else {
            self.chip.borrow().read_register(self.selected.get())
        }
    }

    fn write(&mut self, addr: u32, value: u8) {
        if addr & 1 == 0 {
            self.selected.set(value);
        } else {
            self.chip
                .borrow_mut()
                .write_register(self.selected.get(), value);
        }
    }
}

pub fn shared<H: AddressHandler + 'static>(handler: H) -> Rc<RefCell<dyn AddressHandler>> {
    Rc::new(RefCell::new(handler))
}
