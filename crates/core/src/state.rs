//! Save-state registry.
//!
//! Only explicitly registered state survives a snapshot: battery-backed
//! RAM regions and individually flagged latches, mirroring boards where
//! everything else loses its contents at power-off. Restore is strict:
//! a snapshot from a different machine shape is rejected, never half
//! applied.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bus::SharedRam;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("snapshot is missing entry '{0}'")]
    MissingEntry(String),
    #[error("snapshot entry '{name}' has {got} bytes, expected {expected}")]
    SizeMismatch {
        name: String,
        got: usize,
        expected: usize,
    },
}

enum Source {
    Region(SharedRam),
    Latch(Rc<Cell<u8>>),
}

struct EntryDef {
    name: String,
    source: Source,
}

/// Flat named byte blobs; serializes through serde for the machine-level
/// JSON save state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Snapshot {
    pub entries: BTreeMap<String, Vec<u8>>,
}

#[derive(Default)]
pub struct SaveRegistry {
    defs: Vec<EntryDef>,
}

impl SaveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a battery-backed RAM region.
    pub fn register_region(&mut self, name: &str, ram: SharedRam) {
        self.defs.push(EntryDef {
            name: name.to_string(),
            source: Source::Region(ram),
        });
    }

    /// Register a single flagged latch byte.
    pub fn register_latch(&mut self, name: &str, latch: Rc<Cell<u8>>) {
        self.defs.push(EntryDef {
            name: name.to_string(),
            source: Source::Latch(latch),
        });
    }

    pub fn snapshot(&self) -> Snapshot {
        let mut entries = BTreeMap::new();
        for def in &self.defs {
            let bytes = match &def.source {
                Source::Region(ram) => ram.borrow().clone(),
                Source::Latch(latch) => vec![latch.get()],
            };
            entries.insert(def.name.clone(), bytes);
        }
        Snapshot { entries }
    }

    /// Validates every entry before touching any state.
    pub fn restore(&self, snapshot: &Snapshot) -> Result<(), StateError> {
        for def in &self.defs {
            let bytes = snapshot
                .entries
                .get(&def.name)
                .ok_or_else(|| StateError::MissingEntry(def.name.clone()))?;
            let expected = match &def.source {
                Source::Region(ram) => ram.borrow().len(),
                Source::Latch(_) => 1,
            };
            if bytes.len() != expected {
                return Err(StateError::SizeMismatch {
                    name: def.name.clone(),
                    got: bytes.len(),
                    expected,
                });
            }
        }
        for def in &self.defs {
            let bytes = &snapshot.entries[&def.name];
            match &def.source {
                Source::Region(ram) => ram.borrow_mut().copy_from_slice(bytes),
                Source::Latch(latch) => latch.set(bytes[0]),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::shared_ram;

    #[test]
    fn snapshot_restore_round_trip() {
        let mut reg = SaveRegistry::new();
        let nvram = shared_ram(4);
        let latch = Rc::new(Cell::new(0x42u8));
        reg.register_region("nvram", Rc::clone(&nvram));
        reg.register_latch("bank_select", Rc::clone(&latch));

        nvram.borrow_mut().copy_from_slice(&[1, 2, 3, 4]);
        let snap = reg.snapshot();

        nvram.borrow_mut().fill(0);
        latch.set(0);
        reg.restore(&snap).unwrap();

        assert_eq!(&*nvram.borrow(), &[1, 2, 3, 4]);
        assert_eq!(latch.get(), 0x42);
    }

    #[test]
    fn snapshot_serializes_through_serde() {
        let mut reg = SaveRegistry::new();
        let nvram = shared_ram(2);
        nvram.borrow_mut().copy_from_slice(&[0xAB, 0xCD]);
        reg.register_region("nvram", nvram);

        let snap = reg.snapshot();
        let json = serde_json::to_string(&snap).unwrap();
        let back: Snapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snap);
    }

    #[test]
    fn restore_rejects_missing_entry() {
        let mut reg = SaveRegistry::new();
        reg.register_region("nvram", shared_ram(2));
        let empty = Snapshot {
            entries: BTreeMap::new(),
        };
        assert!(matches!(
            reg.restore(&empty),
            Err(StateError::MissingEntry(_))
        ));
    }

    #[test]
    fn restore_rejects_size_mismatch_without_partial_apply() {
        let mut reg = SaveRegistry::new();
        let a = shared_ram(2);
        let b = shared_ram(2);
        reg.register_region("a", Rc::clone(&a));
        reg.register_region("b", Rc::clone(&b));

        let mut entries = BTreeMap::new();
        entries.insert("a".to_string(), vec![9, 9]);
        entries.insert("b".to_string(), vec![1]); // wrong length
        let snap = Snapshot { entries };

        assert!(matches!(
            reg.restore(&snap),
            Err(StateError::SizeMismatch { .. })
        ));
        // 'a' untouched even though it validated.
        assert_eq!(&*a.borrow(), &[0, 0]);
    }

    #[test]
    fn unregistered_state_is_not_saved() {
        let reg = SaveRegistry::new();
        assert!(reg.snapshot().entries.is_empty());
    }
}
