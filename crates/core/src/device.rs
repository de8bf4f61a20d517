//! Device registry: every independently clocked unit on the board.
//!
//! The registry owns nothing but identity and clock rate; the scheduler
//! keeps the execution state. Tags follow the corpus convention of short
//! lowercase names ("maincpu", "audiocpu", "psg").

use thiserror::Error;

/// Configuration-time errors. A machine that produces one never starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("duplicate device tag: {0}")]
    DuplicateTag(String),
    #[error("unknown device tag: {0}")]
    UnknownDevice(String),
    #[error("unknown bank: {0}")]
    UnknownBank(String),
    // Field cannot be called `source`: thiserror reserves that name for
    // the error cause.
    #[error("bank '{name}' window of {window:#x} bytes does not fit source of {source_len:#x} bytes")]
    BankWindowTooLarge {
        name: String,
        window: usize,
        source_len: usize,
    },
    #[error("machine has no CPU devices")]
    NoCpus,
    #[error("slices_per_frame must be nonzero")]
    ZeroSlices,
    #[error("frame rate must be positive, got {0}")]
    BadFrameRate(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Cpu,
    Sound,
    Peripheral,
}

/// Cheap copyable handle; the index is stable for the machine's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceHandle {
    pub index: usize,
    pub kind: DeviceKind,
}

struct Entry {
    tag: String,
    kind: DeviceKind,
    clock_hz: u32,
}

/// Owns the identity and clock of every device on one machine.
#[derive(Default)]
pub struct DeviceRegistry {
    entries: Vec<Entry>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        tag: &str,
        kind: DeviceKind,
        clock_hz: u32,
    ) -> Result<DeviceHandle, ConfigError> {
        if self.entries.iter().any(|e| e.tag == tag) {
            return Err(ConfigError::DuplicateTag(tag.to_string()));
        }
        self.entries.push(Entry {
            tag: tag.to_string(),
            kind,
            clock_hz,
        });
        Ok(DeviceHandle {
            index: self.entries.len() - 1,
            kind,
        })
    }

    pub fn lookup(&self, tag: &str) -> Result<DeviceHandle, ConfigError> {
        self.entries
            .iter()
            .position(|e| e.tag == tag)
            .map(|index| DeviceHandle {
                index,
                kind: self.entries[index].kind,
            })
            .ok_or_else(|| ConfigError::UnknownDevice(tag.to_string()))
    }

    pub fn clock_hz(&self, handle: DeviceHandle) -> u32 {
        self.entries[handle.index].clock_hz
    }

    pub fn tag(&self, handle: DeviceHandle) -> &str {
        &self.entries[handle.index].tag
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
