//! Minimal scripted control CPU ("LC8").
//!
//! Just enough of an instruction set to drive the bus, the I/O ports,
//! and the interrupt machinery from test programs:
//!
//! - 0x00       NOP
//! - 0x10 nn    LDA #nn
//! - 0x11 ll hh LDA (hhll)
//! - 0x12 ll hh STA (hhll)
//! - 0x13 nn    LDB #nn
//! - 0x20 pp    OUT pp       (I/O space write of A)
//! - 0x21 pp    IN  pp       (A = I/O space read)
//! - 0x30 ll hh JMP hhll
//! - 0x33 ll hh DJNZ hhll    (decrement B, jump while nonzero)
//! - 0x40       EI
//! - 0x41       DI
//! - 0x42       RETI         (resume + re-enable)
//! - 0x60 nn    ADD #nn
//! - 0x50       HLT          (sleep until an interrupt)
//!
//! NMI is taken regardless of the enable flag and enters 0x0008; a
//! vectored IRQ enters the RST target carried on the bus at acknowledge
//! (0x0010 when the daisy chain drives nothing).

use coinop_core::bus::SharedSpace;
use coinop_core::irq::{IrqLine, SharedIrq};
use coinop_core::CpuCore;

const NMI_ENTRY: u16 = 0x0008;
const IRQ_ENTRY: u16 = 0x0010;
const INT_CYCLES: u32 = 6;

pub struct Lc8 {
    program: SharedSpace,
    io: SharedSpace,
    irq: SharedIrq,
    cpu_index: usize,
    pc: u16,
    a: u8,
    b: u8,
    resume_pc: u16,
    int_enabled: bool,
    halted: bool,
}

impl Lc8 {
    pub fn new(program: SharedSpace, io: SharedSpace, irq: SharedIrq, cpu_index: usize) -> Self {
        Self {
            program,
            io,
            irq,
            cpu_index,
            pc: 0,
            a: 0,
            b: 0,
            resume_pc: 0,
            int_enabled: false,
            halted: false,
        }
    }

    pub fn a(&self) -> u8 {
        self.a
    }

    pub fn pc(&self) -> u16 {
        self.pc
    }

    fn fetch(&mut self) -> u8 {
        let v = self.program.borrow().read(u32::from(self.pc));
        self.pc = self.pc.wrapping_add(1);
        v
    }

    fn fetch_addr(&mut self) -> u16 {
        let lo = self.fetch();
        let hi = self.fetch();
        u16::from_le_bytes([lo, hi])
    }

    /// Interrupt poll at the instruction boundary. NMI is unmaskable.
    fn service_interrupts(&mut self) -> bool {
        let ack = {
            let mut irq = self.irq.borrow_mut();
            if !self.int_enabled && !irq.is_raised(self.cpu_index, IrqLine::Nmi) {
                return false;
            }
            match irq.acknowledge(self.cpu_index) {
                Some(ack) => ack,
                None => return false,
            }
        };
        self.resume_pc = self.pc;
        self.int_enabled = false;
        self.halted = false;
        self.pc = match (ack.line, ack.vector) {
            (IrqLine::Nmi, _) => NMI_ENTRY,
            // RST opcode on the bus: target is its embedded slot.
            (_, Some(v)) => u16::from(v & 0x38),
            (_, None) => IRQ_ENTRY,
        };
        true
    }
}

impl CpuCore for Lc8 {
    fn reset(&mut self) {
        self.pc = 0;
        self.a = 0;
        self.b = 0;
        self.resume_pc = 0;
        self.int_enabled = false;
        self.halted = false;
    }

    fn run(&mut self, cycles: u32) -> u32 {
        let mut consumed = 0;
        while consumed < cycles {
            if self.service_interrupts() {
                consumed += INT_CYCLES;
                continue;
            }
            if self.halted {
                // Burn the rest of the slice waiting for a line.
                return cycles.max(consumed);
            }
            consumed += match self.fetch() {
                0x10 => {
                    self.a = self.fetch();
                    6
                }
                0x11 => {
                    let addr = self.fetch_addr();
                    self.a = self.program.borrow().read(u32::from(addr));
                    10
                }
                0x12 => {
                    let addr = self.fetch_addr();
                    self.program.borrow_mut().write(u32::from(addr), self.a);
                    10
                }
                0x13 => {
                    self.b = self.fetch();
                    6
                }
                0x20 => {
                    let port = self.fetch();
                    self.io.borrow_mut().write(u32::from(port), self.a);
                    8
                }
                0x21 => {
                    let port = self.fetch();
                    self.a = self.io.borrow().read(u32::from(port));
                    8
                }
                0x30 => {
                    self.pc = self.fetch_addr();
                    10
                }
                0x33 => {
                    let addr = self.fetch_addr();
                    self.b = self.b.wrapping_sub(1);
                    if self.b != 0 {
                        self.pc = addr;
                        10
                    } else {
                        6
                    }
                }
                0x40 => {
                    self.int_enabled = true;
                    4
                }
                0x41 => {
                    self.int_enabled = false;
                    4
                }
                0x42 => {
                    self.pc = self.resume_pc;
                    self.int_enabled = true;
                    8
                }
                0x50 => {
                    self.halted = true;
                    4
                }
                0x60 => {
                    let v = self.fetch();
                    self.a = self.a.wrapping_add(v);
                    6
                }
                // Unknown opcodes (including open-bus 0xFF) fall through
                // as NOPs so a runaway PC keeps consuming time.
                _ => 4,
            };
        }
        consumed
    }
}
