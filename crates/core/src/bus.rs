//! Memory-mapped address space: routes CPU reads and writes to ROM, RAM,
//! bank windows, or device handlers.
//!
//! Range decode follows the hardware PROM model: registrations may overlap
//! and the last registration wins for its access direction. Unmapped reads
//! float to the open-bus value and unmapped (or ROM) writes are dropped;
//! neither is an error.
//!
//! Handlers capture the subsystems they touch as `Rc<RefCell<..>>` /
//! `Rc<Cell<..>>` handles. A handler must never hold the `AddressSpace`
//! it is mapped into (bank switching goes through the shared `Bank`
//! handle), which keeps dispatch free of re-entrant borrows.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use log::trace;

use crate::device::ConfigError;

/// Shared RAM region: one owner in the address space, more in the video
/// chain and the save-state registry.
pub type SharedRam = Rc<RefCell<Vec<u8>>>;

pub fn shared_ram(size: usize) -> SharedRam {
    Rc::new(RefCell::new(vec![0; size]))
}

/// Address spaces are shared between the CPU core that fetches through
/// them and the board wiring that maps them.
pub type SharedSpace = Rc<RefCell<AddressSpace>>;

pub fn shared_space(name: &str) -> SharedSpace {
    Rc::new(RefCell::new(AddressSpace::new(name)))
}

/// A port or device register window.
///
/// Reads take `&self` because hardware read side effects live behind the
/// handler's own interior mutability; writes get `&mut self`.
pub trait AddressHandler {
    fn read(&self, addr: u32) -> u8;
    fn write(&mut self, addr: u32, value: u8);
}

pub type SharedHandler = Rc<RefCell<dyn AddressHandler>>;

/// Which access direction(s) a handler mapping claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Read,
    Write,
    ReadWrite,
}

/// A bank window: fixed size, runtime-redirected base into a ROM region.
///
/// The handle is shared so a bank-select port handler can redirect it
/// without going back through the address space.
pub struct Bank {
    name: String,
    size: usize,
    source: Rc<Vec<u8>>,
    base: Cell<usize>,
}

pub type BankHandle = Rc<Bank>;

impl Bank {
    /// Redirect the window. Out-of-range bases wrap modulo the usable
    /// bank count, mirroring address lines that simply go undecoded.
    pub fn set_base(&self, base: usize) {
        let banks = (self.source.len() / self.size).max(1);
        self.base.set((base / self.size % banks) * self.size + base % self.size);
    }

    /// Select bank `n` of `size` bytes each.
    pub fn select(&self, n: usize) {
        let banks = (self.source.len() / self.size).max(1);
        self.base.set((n % banks) * self.size);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn read(&self, offset: usize, open_bus: u8) -> u8 {
        self.source
            .get(self.base.get() + offset)
            .copied()
            .unwrap_or(open_bus)
    }
}

enum Backing {
    Rom { data: Rc<Vec<u8>>, base: usize },
    Ram(SharedRam),
    Bank(BankHandle),
    Handler { handler: SharedHandler, kind: HandlerKind },
}

struct Mapping {
    start: u32,
    end: u32,
    backing: Backing,
}

impl Mapping {
    fn readable(&self) -> bool {
        match &self.backing {
            Backing::Handler { kind, .. } => !matches!(kind, HandlerKind::Write),
            _ => true,
        }
    }

    fn writable(&self) -> bool {
        match &self.backing {
            Backing::Rom { .. } | Backing::Bank(_) => false,
            Backing::Handler { kind, .. } => !matches!(kind, HandlerKind::Read),
            Backing::Ram(_) => true,
        }
    }
}

/// One CPU-visible address space (program, I/O, ...). A CPU with several
/// spaces holds one `AddressSpace` per decode, named at machine setup.
pub struct AddressSpace {
    name: String,
    mappings: Vec<Mapping>,
    banks: Vec<BankHandle>,
    open_bus: u8,
}

impl AddressSpace {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            mappings: Vec::new(),
            banks: Vec::new(),
            open_bus: 0xFF,
        }
    }

    /// Override the floating-bus value (a few boards pull to 0x00).
    pub fn set_open_bus(&mut self, value: u8) {
        self.open_bus = value;
    }

    /// Map `start..=end` onto `data` starting at `base`. Fails if the
    /// declared window reaches past the ROM image.
    pub fn map_rom(
        &mut self,
        start: u32,
        end: u32,
        data: Rc<Vec<u8>>,
        base: usize,
    ) -> Result<(), ConfigError> {
        let window = (end - start + 1) as usize;
        if base + window > data.len() {
            return Err(ConfigError::BankWindowTooLarge {
                name: format!("{}:rom@{start:#x}", self.name),
                window,
                source_len: data.len(),
            });
        }
        self.mappings.push(Mapping {
            start,
            end,
            backing: Backing::Rom { data, base },
        });
        Ok(())
    }

    pub fn map_ram(&mut self, start: u32, end: u32, ram: SharedRam) {
        self.mappings.push(Mapping {
            start,
            end,
            backing: Backing::Ram(ram),
        });
    }

    /// Create and map a bank window in one step; the window size is fixed
    /// as `end - start + 1` for the machine's lifetime.
    pub fn map_bank(
        &mut self,
        start: u32,
        end: u32,
        name: &str,
        source: Rc<Vec<u8>>,
    ) -> Result<BankHandle, ConfigError> {
        let size = (end - start + 1) as usize;
        if size > source.len() {
            return Err(ConfigError::BankWindowTooLarge {
                name: name.to_string(),
                window: size,
                source_len: source.len(),
            });
        }
        let bank = Rc::new(Bank {
            name: name.to_string(),
            size,
            source,
            base: Cell::new(0),
        });
        self.banks.push(Rc::clone(&bank));
        self.mappings.push(Mapping {
            start,
            end,
            backing: Backing::Bank(Rc::clone(&bank)),
        });
        Ok(bank)
    }

    /// Redirect a bank by name; the next read through the window sees the
    /// new base immediately.
    pub fn set_bank(&self, name: &str, base: usize) -> Result<(), ConfigError> {
        let bank = self
            .banks
            .iter()
            .find(|b| b.name == name)
            .ok_or_else(|| ConfigError::UnknownBank(name.to_string()))?;
        bank.set_base(base);
        Ok(())
    }

    pub fn bank(&self, name: &str) -> Result<BankHandle, ConfigError> {
        self.banks
            .iter()
            .find(|b| b.name == name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownBank(name.to_string()))
    }

    pub fn map_handler(&mut self, start: u32, end: u32, kind: HandlerKind, handler: SharedHandler) {
        self.mappings.push(Mapping {
            start,
            end,
            backing: Backing::Handler { handler, kind },
        });
    }

    pub fn read(&self, addr: u32) -> u8 {
        // Reverse scan: last registration wins for its direction.
        for m in self.mappings.iter().rev() {
            if addr < m.start || addr > m.end || !m.readable() {
                continue;
            }
            let offset = (addr - m.start) as usize;
            return match &m.backing {
                Backing::Rom { data, base } => {
                    data.get(base + offset).copied().unwrap_or(self.open_bus)
                }
                Backing::Ram(ram) => {
                    let ram = ram.borrow();
                    ram.get(offset).copied().unwrap_or(self.open_bus)
                }
                Backing::Bank(bank) => bank.read(offset, self.open_bus),
                Backing::Handler { handler, .. } => handler.borrow().read(addr),
            };
        }
        trace!("{}: open-bus read at {addr:#06x}", self.name);
        self.open_bus
    }

    pub fn write(&mut self, addr: u32, value: u8) {
        for m in self.mappings.iter().rev() {
            if addr < m.start || addr > m.end || !m.writable() {
                continue;
            }
            let offset = (addr - m.start) as usize;
            match &m.backing {
                Backing::Ram(ram) => {
                    let mut ram = ram.borrow_mut();
                    if let Some(slot) = ram.get_mut(offset) {
                        *slot = value;
                    }
                }
                Backing::Handler { handler, .. } => handler.borrow_mut().write(addr, value),
                Backing::Rom { .. } | Backing::Bank(_) => unreachable!(),
            }
            return;
        }
        // No pull-down on real hardware: the write just vanishes.
        trace!("{}: dropped write {value:#04x} at {addr:#06x}", self.name);
    }
}

/// Shared one-byte latch, usable from several handlers at once.
#[derive(Clone, Default)]
pub struct Latch8(pub Rc<Cell<u8>>);

impl Latch8 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> u8 {
        self.0.get()
    }

    pub fn set(&self, value: u8) {
        self.0.set(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Port {
        last: Cell<u8>,
        reads: Cell<u32>,
    }

    impl AddressHandler for Port {
        fn read(&self, _addr: u32) -> u8 {
            self.reads.set(self.reads.get() + 1);
            self.last.get()
        }

        fn write(&mut self, _addr: u32, value: u8) {
            self.last.set(value);
        }
    }

    #[test]
    fn ram_ranges_are_isolated() {
        let mut space = AddressSpace::new("prog");
        let a = shared_ram(0x100);
        let b = shared_ram(0x100);
        space.map_ram(0x0000, 0x00FF, Rc::clone(&a));
        space.map_ram(0x0100, 0x01FF, Rc::clone(&b));

        space.write(0x0010, 0xAA);
        assert_eq!(space.read(0x0010), 0xAA);
        assert_eq!(space.read(0x0110), 0x00);

        space.write(0x0110, 0x55);
        assert_eq!(space.read(0x0010), 0xAA);
        assert_eq!(space.read(0x0110), 0x55);
    }

    #[test]
    fn unmapped_read_is_open_bus() {
        let mut space = AddressSpace::new("prog");
        assert_eq!(space.read(0x4000), 0xFF);
        space.set_open_bus(0x00);
        assert_eq!(space.read(0x4000), 0x00);
    }

    #[test]
    fn rom_write_is_dropped() {
        let mut space = AddressSpace::new("prog");
        let rom = Rc::new(vec![0x12; 0x100]);
        space.map_rom(0x0000, 0x00FF, rom, 0).unwrap();

        space.write(0x0040, 0x99);
        assert_eq!(space.read(0x0040), 0x12);
    }

    #[test]
    fn rom_window_past_image_is_config_error() {
        let mut space = AddressSpace::new("prog");
        let rom = Rc::new(vec![0; 0x80]);
        let err = space.map_rom(0x0000, 0x00FF, rom, 0);
        assert!(matches!(err, Err(ConfigError::BankWindowTooLarge { .. })));
    }

    #[test]
    fn last_registered_range_wins_per_direction() {
        let mut space = AddressSpace::new("prog");
        let rom = Rc::new(vec![0x12; 0x100]);
        let ram = shared_ram(0x100);
        space.map_ram(0x0000, 0x00FF, Rc::clone(&ram));
        space.map_rom(0x0000, 0x00FF, rom, 0).unwrap();

        // ROM shadows the RAM for reads; writes still land in the RAM
        // underneath (ROM claims no write direction).
        assert_eq!(space.read(0x0010), 0x12);
        space.write(0x0010, 0x77);
        assert_eq!(ram.borrow()[0x10], 0x77);
    }

    #[test]
    fn bank_redirection_is_immediate() {
        let mut space = AddressSpace::new("prog");
        let mut rom = vec![0u8; 0x8000];
        for (i, chunk) in rom.chunks_mut(0x2000).enumerate() {
            chunk[0] = i as u8;
        }
        let bank = space.map_bank(0x8000, 0x9FFF, "bank1", Rc::new(rom)).unwrap();

        assert_eq!(space.read(0x8000), 0);
        bank.select(2);
        assert_eq!(space.read(0x8000), 2);
        space.set_bank("bank1", 0x6000).unwrap();
        assert_eq!(space.read(0x8000), 3);
        // Out of range wraps modulo the bank count.
        bank.select(5);
        assert_eq!(space.read(0x8000), 1);
    }

    #[test]
    fn unknown_bank_is_config_error() {
        let space = AddressSpace::new("prog");
        assert!(matches!(
            space.set_bank("bank9", 0),
            Err(ConfigError::UnknownBank(_))
        ));
    }

    #[test]
    fn handler_directions() {
        let mut space = AddressSpace::new("io");
        let port = Rc::new(RefCell::new(Port {
            last: Cell::new(0x5A),
            reads: Cell::new(0),
        }));
        space.map_handler(0x00, 0x00, HandlerKind::ReadWrite, port.clone());

        assert_eq!(space.read(0x00), 0x5A);
        space.write(0x00, 0xA5);
        assert_eq!(space.read(0x00), 0xA5);
        assert_eq!(port.borrow().reads.get(), 2);

        // A write-only handler never answers reads.
        let mut space = AddressSpace::new("io");
        let port = Rc::new(RefCell::new(Port {
            last: Cell::new(0x5A),
            reads: Cell::new(0),
        }));
        space.map_handler(0x10, 0x10, HandlerKind::Write, port.clone());
        assert_eq!(space.read(0x10), 0xFF);
        space.write(0x10, 0x01);
        assert_eq!(port.borrow().last.get(), 0x01);
    }
}
