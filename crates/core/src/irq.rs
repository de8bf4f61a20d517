//! Interrupt controller: per-CPU line state and acknowledge-time vectors.
//!
//! Edge lines (VBlank pulses, FM timer ticks) follow
//! Idle -> Pending -> Idle: a second pulse before the acknowledge
//! coalesces into the same pending level, it is never a counted queue.
//! Level lines stay asserted until software clears them through an
//! ack port.

use std::cell::RefCell;
use std::rc::Rc;

use log::trace;

/// One interrupt input of a CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqLine {
    Nmi,
    Irq(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineState {
    Idle,
    /// Edge-triggered, waiting for the acknowledge cycle.
    Pending,
    /// Level-triggered, held until `clear_line`.
    Asserted,
}

#[derive(Debug, Clone, Copy)]
struct Line {
    line: IrqLine,
    state: LineState,
    vector: Option<u8>,
}

/// What the CPU sees on its interrupt-acknowledge cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub line: IrqLine,
    /// Byte the daisy chain drives onto the data bus, if any
    /// (typically an RST opcode or a vector-table index).
    pub vector: Option<u8>,
}

/// Per-machine controller; shared with CPU cores and port handlers as
/// `Rc<RefCell<InterruptController>>`.
pub struct InterruptController {
    cpus: Vec<Vec<Line>>,
}

pub type SharedIrq = Rc<RefCell<InterruptController>>;

impl InterruptController {
    pub fn new(num_cpus: usize) -> Self {
        Self {
            cpus: vec![Vec::new(); num_cpus],
        }
    }

    pub fn shared(num_cpus: usize) -> SharedIrq {
        Rc::new(RefCell::new(Self::new(num_cpus)))
    }

    /// Make room for another CPU (used while a machine is being wired).
    pub fn attach_cpu(&mut self) -> usize {
        self.cpus.push(Vec::new());
        self.cpus.len() - 1
    }

    fn line_mut(&mut self, cpu: usize, line: IrqLine) -> &mut Line {
        if cpu >= self.cpus.len() {
            self.cpus.resize(cpu + 1, Vec::new());
        }
        let lines = &mut self.cpus[cpu];
        if let Some(i) = lines.iter().position(|l| l.line == line) {
            return &mut lines[i];
        }
        lines.push(Line {
            line,
            state: LineState::Idle,
            vector: None,
        });
        lines.last_mut().unwrap()
    }

    /// Level-assert a line; `vector` is what the acknowledge cycle will
    /// carry on the data bus.
    pub fn assert_line(&mut self, cpu: usize, line: IrqLine, vector: Option<u8>) {
        let l = self.line_mut(cpu, line);
        l.state = LineState::Asserted;
        l.vector = vector;
    }

    /// Deassert (IRQ-ack port writes). Also discards a pending edge.
    pub fn clear_line(&mut self, cpu: usize, line: IrqLine) {
        let l = self.line_mut(cpu, line);
        l.state = LineState::Idle;
        l.vector = None;
    }

    /// Edge-trigger a line; coalesces with an already-pending edge.
    pub fn pulse_line(&mut self, cpu: usize, line: IrqLine, vector: Option<u8>) {
        let l = self.line_mut(cpu, line);
        if l.state == LineState::Idle {
            l.state = LineState::Pending;
            l.vector = vector;
        } else {
            trace!("cpu{cpu} {line:?}: pulse coalesced while still pending");
        }
    }

    pub fn is_raised(&self, cpu: usize, line: IrqLine) -> bool {
        self.cpus
            .get(cpu)
            .is_some_and(|lines| lines.iter().any(|l| l.line == line && l.state != LineState::Idle))
    }

    /// Called by the CPU core on its interrupt-acknowledge cycle.
    ///
    /// NMI wins, then the lowest-numbered IRQ (daisy-chain order). Edge
    /// lines return to Idle here; level lines stay up until software
    /// clears them.
    pub fn acknowledge(&mut self, cpu: usize) -> Option<Ack> {
        let lines = self.cpus.get_mut(cpu)?;
        let mut best: Option<usize> = None;
        for (i, l) in lines.iter().enumerate() {
            if l.state == LineState::Idle {
                continue;
            }
            best = match best {
                None => Some(i),
                Some(b) if line_rank(l.line) < line_rank(lines[b].line) => Some(i),
                keep => keep,
            };
        }
        let i = best?;
        let ack = Ack {
            line: lines[i].line,
            vector: lines[i].vector,
        };
        if lines[i].state == LineState::Pending {
            lines[i].state = LineState::Idle;
            lines[i].vector = None;
        }
        Some(ack)
    }

    /// Drop every line back to Idle (machine reset).
    pub fn reset(&mut self) {
        for lines in &mut self.cpus {
            lines.clear();
        }
    }
}

fn line_rank(line: IrqLine) -> u16 {
    match line {
        IrqLine::Nmi => 0,
        IrqLine::Irq(n) => 1 + u16::from(n),
    }
}

/// RST opcode for vector slot `n` (RST 00h..38h), the byte a priority
/// encoder drives during the acknowledge cycle on 8080/Z80-family boards.
pub fn rst_opcode(n: u8) -> u8 {
    0xC7 | ((n & 7) << 3)
}

/// Combine pending-source flags into the acknowledge vector the encoder
/// PROM would produce: the lowest set bit selects the RST slot.
///
/// Pure function so boards with multi-source IRQ mixers can unit-test
/// their wiring without a scheduler.
pub fn compose_vector(pending_flags: u8) -> Option<u8> {
    (0..8)
        .find(|bit| pending_flags & (1 << bit) != 0)
        .map(rst_opcode)
}
