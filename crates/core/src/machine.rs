//! Machine assembly and the time-slice scheduler.
//!
//! One `Machine` is one PCB: a device registry, CPU cores, sound chips,
//! a timer wheel, the interrupt controller, and the video chain, all
//! advanced by a single cooperative loop. There are no OS threads and no
//! locks anywhere in here: slices interleave the CPUs deterministically,
//! which is what the shared-RAM handshakes between CPUs rely on.
//!
//! Within one slice every CPU runs to the same proportional point in
//! emulated time before any timer due at the slice boundary fires; a CPU
//! instruction that overruns its slice has the overrun deducted from its
//! next budget, never dropped.
//!
//! Correctness precondition (not enforceable in the type system): device
//! handlers run with exclusive access to machine state and must never
//! re-enter the scheduler. Handlers cannot reach the `Machine` through
//! any `Rc` the configuration hands out, which makes the obvious
//! violation unrepresentable; keep it that way when adding handles.

use std::cell::RefCell;
use std::rc::Rc;

use log::debug;
use serde_json::Value;
use thiserror::Error;

use crate::device::{ConfigError, DeviceHandle, DeviceKind, DeviceRegistry};
use crate::irq::{InterruptController, IrqLine, SharedIrq};
use crate::state::{SaveRegistry, Snapshot, StateError};
use crate::types::{AudioSample, Frame};
use crate::video::palette::{ColorLookup, Palette};
use crate::video::render::{FrameRenderer, LayerSlot};
use crate::video::sprite::SpriteTable;
use crate::video::tilemap::SharedTilemap;
use crate::video::VideoError;
use crate::bus::SharedRam;
use crate::{CpuCore, SoundChip};

pub type SharedPalette = Rc<RefCell<Palette>>;
pub type SharedLookup = Rc<RefCell<ColorLookup>>;

/// Fatal machine-instance errors: the core's own invariants, never the
/// emulated software's behavior.
#[derive(Debug, Error)]
pub enum MachineError {
    #[error("scheduler produced a negative time slice at slice {0}")]
    NegativeSlice(u32),
    #[error(transparent)]
    Video(#[from] VideoError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error("malformed save state: {0}")]
    BadSaveState(#[from] serde_json::Error),
}

/// What a timer does when its deadline passes.
#[derive(Debug, Clone, Copy)]
pub enum TimerAction {
    PulseLine {
        cpu: usize,
        line: IrqLine,
        vector: Option<u8>,
    },
    AssertLine {
        cpu: usize,
        line: IrqLine,
        vector: Option<u8>,
    },
    ClearLine {
        cpu: usize,
        line: IrqLine,
    },
}

/// Periodic timer-wheel entry, expressed in emulated nanoseconds.
#[derive(Debug, Clone, Copy)]
pub struct Timer {
    period_ns: u64,
    next_ns: u64,
    action: TimerAction,
}

impl Timer {
    pub fn periodic_hz(hz: f64, action: TimerAction) -> Self {
        let period_ns = (1_000_000_000.0 / hz).round().max(1.0) as u64;
        Self {
            period_ns,
            next_ns: period_ns,
            action,
        }
    }
}

struct CpuSlot {
    handle: DeviceHandle,
    core: Box<dyn CpuCore>,
    clock_hz: u32,
    /// Total cycles executed since reset; the per-slice budget is the
    /// gap between this and the clock's proportional target, so slice
    /// overruns self-correct.
    executed: u64,
}

/// Sound chips are shared with the bus handlers that drive their
/// register files, so the scheduler holds them behind `Rc<RefCell<..>>`.
pub type SharedSoundChip = Rc<RefCell<dyn SoundChip>>;

struct SoundSlot {
    handle: DeviceHandle,
    chip: SharedSoundChip,
    /// Internal-timer output wired to an interrupt line, if any.
    timer_irq: Option<(usize, IrqLine, Option<u8>)>,
    buffer: Vec<AudioSample>,
}

struct SpriteBinding {
    table: SpriteTable,
    ram: SharedRam,
}

/// Per-chip audio hand-off; mixing and resampling are the frontend's
/// problem, not this core's.
pub type AudioSink = Box<dyn FnMut(&str, &[AudioSample])>;

/// Builder for one machine instance. Configuration errors fail the build;
/// a machine that builds is internally consistent.
pub struct MachineConfig {
    name: String,
    registry: DeviceRegistry,
    irq: SharedIrq,
    cpus: Vec<CpuSlot>,
    sound: Vec<SoundSlot>,
    timers: Vec<Timer>,
    frame_rate: f64,
    slices_per_frame: u32,
    sample_rate: u32,
    renderer: FrameRenderer,
    tilemaps: Vec<SharedTilemap>,
    sprites: Option<SpriteBinding>,
    palette: SharedPalette,
    lookup: SharedLookup,
    save: SaveRegistry,
    audio_sink: Option<AudioSink>,
}

impl MachineConfig {
    pub fn new(name: &str, width: u32, height: u32, frame_rate: f64) -> Self {
        Self {
            name: name.to_string(),
            registry: DeviceRegistry::new(),
            irq: InterruptController::shared(0),
            cpus: Vec::new(),
            sound: Vec::new(),
            timers: Vec::new(),
            frame_rate,
            slices_per_frame: 60,
            sample_rate: 44_100,
            renderer: FrameRenderer::new(width, height),
            tilemaps: Vec::new(),
            sprites: None,
            palette: Rc::new(RefCell::new(Palette::new(0))),
            lookup: Rc::new(RefCell::new(ColorLookup::identity(1, 1))),
            save: SaveRegistry::new(),
            audio_sink: None,
        }
    }

    /// Shared interrupt controller handle; CPU cores and ack-port
    /// handlers capture clones of this.
    pub fn irq(&self) -> SharedIrq {
        Rc::clone(&self.irq)
    }

    /// Finer slices buy tighter inter-CPU synchronization; boards with a
    /// busy soundlatch handshake usually want scanline-rate slices.
    pub fn set_slices_per_frame(&mut self, slices: u32) {
        self.slices_per_frame = slices;
    }

    pub fn set_sample_rate(&mut self, rate: u32) {
        self.sample_rate = rate;
    }

    /// Register a CPU. The returned index is both the registry index and
    /// the interrupt controller's CPU number.
    pub fn add_cpu(
        &mut self,
        tag: &str,
        clock_hz: u32,
        core: Box<dyn CpuCore>,
    ) -> Result<usize, ConfigError> {
        let handle = self.registry.register(tag, DeviceKind::Cpu, clock_hz)?;
        let cpu_index = self.irq.borrow_mut().attach_cpu();
        self.cpus.push(CpuSlot {
            handle,
            core,
            clock_hz,
            executed: 0,
        });
        Ok(cpu_index)
    }

    /// Register a sound chip, optionally wiring its internal timer to an
    /// interrupt line (the FM-timer convention).
    pub fn add_sound(
        &mut self,
        tag: &str,
        clock_hz: u32,
        chip: SharedSoundChip,
        timer_irq: Option<(usize, IrqLine, Option<u8>)>,
    ) -> Result<DeviceHandle, ConfigError> {
        let handle = self.registry.register(tag, DeviceKind::Sound, clock_hz)?;
        self.sound.push(SoundSlot {
            handle,
            chip,
            timer_irq,
            buffer: Vec::new(),
        });
        Ok(handle)
    }

    pub fn add_timer(&mut self, timer: Timer) {
        self.timers.push(timer);
    }

    /// The conventional once-per-frame VBlank interrupt.
    pub fn add_vblank_int(&mut self, cpu: usize, line: IrqLine, vector: Option<u8>) {
        self.timers.push(Timer::periodic_hz(
            self.frame_rate,
            TimerAction::PulseLine { cpu, line, vector },
        ));
    }

    pub fn add_tilemap(&mut self, map: SharedTilemap) -> usize {
        self.tilemaps.push(map);
        self.tilemaps.len() - 1
    }

    pub fn set_sprites(&mut self, table: SpriteTable, ram: SharedRam) {
        self.sprites = Some(SpriteBinding { table, ram });
    }

    pub fn set_layers(&mut self, slots: Vec<LayerSlot>) {
        self.renderer.set_slots(slots);
    }

    pub fn renderer(&self) -> &FrameRenderer {
        &self.renderer
    }

    pub fn set_palette(&mut self, palette: Palette, lookup: ColorLookup) {
        *self.palette.borrow_mut() = palette;
        *self.lookup.borrow_mut() = lookup;
    }

    pub fn palette(&self) -> SharedPalette {
        Rc::clone(&self.palette)
    }

    pub fn lookup(&self) -> SharedLookup {
        Rc::clone(&self.lookup)
    }

    pub fn save_registry(&mut self) -> &mut SaveRegistry {
        &mut self.save
    }

    pub fn set_audio_sink(&mut self, sink: AudioSink) {
        self.audio_sink = Some(sink);
    }

    pub fn build(mut self) -> Result<Machine, ConfigError> {
        if self.cpus.is_empty() {
            return Err(ConfigError::NoCpus);
        }
        if self.slices_per_frame == 0 {
            return Err(ConfigError::ZeroSlices);
        }
        if !self.frame_rate.is_finite() || self.frame_rate <= 0.0 {
            return Err(ConfigError::BadFrameRate(self.frame_rate));
        }
        let frame_ns = (1_000_000_000.0 / self.frame_rate).round() as u64;
        let samples_per_frame = (f64::from(self.sample_rate) / self.frame_rate).round() as usize;
        for slot in &mut self.sound {
            slot.buffer = vec![0; samples_per_frame];
        }
        Ok(Machine {
            name: self.name,
            registry: self.registry,
            irq: self.irq,
            cpus: self.cpus,
            sound: self.sound,
            timers: self.timers,
            frame_ns,
            slices_per_frame: self.slices_per_frame,
            now_ns: 0,
            renderer: self.renderer,
            tilemaps: self.tilemaps,
            sprites: self.sprites,
            palette: self.palette,
            lookup: self.lookup,
            save: self.save,
            audio_sink: self.audio_sink,
        })
    }
}

/// One running machine instance. Single-threaded by construction.
pub struct Machine {
    name: String,
    registry: DeviceRegistry,
    irq: SharedIrq,
    cpus: Vec<CpuSlot>,
    sound: Vec<SoundSlot>,
    timers: Vec<Timer>,
    frame_ns: u64,
    slices_per_frame: u32,
    now_ns: u64,
    renderer: FrameRenderer,
    tilemaps: Vec<SharedTilemap>,
    sprites: Option<SpriteBinding>,
    palette: SharedPalette,
    lookup: SharedLookup,
    save: SaveRegistry,
    audio_sink: Option<AudioSink>,
}

impl Machine {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn irq(&self) -> SharedIrq {
        Rc::clone(&self.irq)
    }

    pub fn renderer_mut(&mut self) -> &mut FrameRenderer {
        &mut self.renderer
    }

    pub fn frame(&self) -> &Frame {
        self.renderer.frame()
    }

    /// Power-on / reset. Registered save-state regions are deliberately
    /// left alone (battery backing); everything else restarts cold.
    pub fn reset(&mut self) {
        for slot in &mut self.cpus {
            slot.core.reset();
            slot.executed = 0;
        }
        for slot in &mut self.sound {
            slot.chip.borrow_mut().reset();
        }
        self.irq.borrow_mut().reset();
        self.now_ns = 0;
        for timer in &mut self.timers {
            timer.next_ns = timer.period_ns;
        }
        for map in &self.tilemaps {
            map.borrow_mut().mark_all_dirty();
        }
    }

    /// Advance emulation by exactly one video frame, then render it and
    /// hand each sound chip's samples to the audio sink. A frame always
    /// runs to completion; there is no partial-frame path.
    pub fn run_frame(&mut self) -> Result<(), MachineError> {
        let frame_start = self.now_ns;
        for slice in 0..self.slices_per_frame {
            let slice_end = frame_start
                + self.frame_ns * u64::from(slice + 1) / u64::from(self.slices_per_frame);
            if slice_end < self.now_ns {
                return Err(MachineError::NegativeSlice(slice));
            }

            // Every CPU reaches the slice boundary first...
            for slot in &mut self.cpus {
                let target = u64::try_from(
                    u128::from(slot.clock_hz) * u128::from(slice_end) / 1_000_000_000,
                )
                .unwrap_or(u64::MAX);
                if target > slot.executed {
                    let budget = (target - slot.executed).min(u64::from(u32::MAX)) as u32;
                    slot.executed += u64::from(slot.core.run(budget));
                } else {
                    // Previous slice's overrun still covers this one.
                    debug!(
                        "{}: '{}' overrun absorbs slice {slice}",
                        self.name,
                        self.registry.tag(slot.handle)
                    );
                }
            }

            // ...then the timers due inside it fire, in deadline order.
            loop {
                let due = self
                    .timers
                    .iter()
                    .enumerate()
                    .filter(|(_, t)| t.next_ns <= slice_end)
                    .min_by_key(|(_, t)| t.next_ns)
                    .map(|(i, _)| i);
                let Some(i) = due else { break };
                let action = self.timers[i].action;
                self.timers[i].next_ns += self.timers[i].period_ns;
                self.apply_timer(action);
            }

            // Sound-chip internal timers (FM-style) are sampled at slice
            // granularity.
            for slot in &mut self.sound {
                if let Some((cpu, line, vector)) = slot.timer_irq {
                    if slot.chip.borrow_mut().timer_expired() {
                        self.irq.borrow_mut().pulse_line(cpu, line, vector);
                    }
                }
            }

            self.now_ns = slice_end;
        }

        self.render()?;

        for slot in &mut self.sound {
            slot.chip.borrow_mut().generate(&mut slot.buffer);
            if let Some(sink) = &mut self.audio_sink {
                sink(self.registry.tag(slot.handle), &slot.buffer);
            }
        }
        Ok(())
    }

    fn apply_timer(&self, action: TimerAction) {
        let mut irq = self.irq.borrow_mut();
        match action {
            TimerAction::PulseLine { cpu, line, vector } => irq.pulse_line(cpu, line, vector),
            TimerAction::AssertLine { cpu, line, vector } => irq.assert_line(cpu, line, vector),
            TimerAction::ClearLine { cpu, line } => irq.clear_line(cpu, line),
        }
    }

    /// Re-render from current video state without advancing time.
    pub fn render(&mut self) -> Result<(), MachineError> {
        let palette = self.palette.borrow();
        let lookup = self.lookup.borrow();
        if let Some(binding) = &self.sprites {
            let ram = binding.ram.borrow();
            self.renderer
                .render(&self.tilemaps, Some((&binding.table, &ram)), &palette, &lookup)?;
        } else {
            self.renderer.render(&self.tilemaps, None, &palette, &lookup)?;
        }
        Ok(())
    }

    /// Snapshot of the explicitly registered state-save variables.
    pub fn save_state(&self) -> Value {
        serde_json::json!({
            "machine": self.name,
            "state": self.save.snapshot(),
        })
    }

    pub fn load_state(&mut self, value: &Value) -> Result<(), MachineError> {
        let snapshot: Snapshot = serde_json::from_value(value["state"].clone())?;
        self.save.restore(&snapshot)?;
        // Restored RAM may back a tilemap; force a full re-resolve.
        for map in &self.tilemaps {
            map.borrow_mut().mark_all_dirty();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Counts the cycles it is asked to run; optionally acknowledges one
    /// pending interrupt per slice.
    struct CountingCpu {
        irq: SharedIrq,
        cpu_index: usize,
        total: Rc<RefCell<u64>>,
        acks: Rc<RefCell<u32>>,
    }

    impl CpuCore for CountingCpu {
        fn reset(&mut self) {}

        fn run(&mut self, cycles: u32) -> u32 {
            *self.total.borrow_mut() += u64::from(cycles);
            if self.irq.borrow_mut().acknowledge(self.cpu_index).is_some() {
                *self.acks.borrow_mut() += 1;
            }
            cycles
        }
    }

    fn one_cpu_machine(frame_rate: f64, slices: u32) -> (Machine, Rc<RefCell<u64>>, Rc<RefCell<u32>>) {
        let mut cfg = MachineConfig::new("test", 8, 8, frame_rate);
        cfg.set_slices_per_frame(slices);
        let total = Rc::new(RefCell::new(0));
        let acks = Rc::new(RefCell::new(0));
        let cpu = CountingCpu {
            irq: cfg.irq(),
            cpu_index: 0,
            total: Rc::clone(&total),
            acks: Rc::clone(&acks),
        };
        cfg.add_cpu("maincpu", 1_000_000, Box::new(cpu)).unwrap();
        (cfg.build().unwrap(), total, acks)
    }

    #[test]
    fn frame_runs_proportional_cycles() {
        let (mut m, total, _) = one_cpu_machine(60.0, 4);
        m.run_frame().unwrap();
        // 1 MHz over one 60 Hz frame is ~16667 cycles.
        let t = *total.borrow();
        assert!((16_660..=16_670).contains(&t), "cycles {t}");

        // Ten frames stay cycle-accurate in the long run, no drift.
        for _ in 0..9 {
            m.run_frame().unwrap();
        }
        let t = *total.borrow();
        assert!((166_660..=166_670).contains(&t), "cycles {t}");
    }

    #[test]
    fn vblank_timer_pulses_once_per_frame() {
        let mut cfg = MachineConfig::new("test", 8, 8, 60.0);
        cfg.set_slices_per_frame(4);
        let total = Rc::new(RefCell::new(0));
        let acks = Rc::new(RefCell::new(0));
        let cpu = CountingCpu {
            irq: cfg.irq(),
            cpu_index: 0,
            total,
            acks: Rc::clone(&acks),
        };
        cfg.add_cpu("maincpu", 1_000_000, Box::new(cpu)).unwrap();
        cfg.add_vblank_int(0, IrqLine::Nmi, None);
        let mut m = cfg.build().unwrap();

        for _ in 0..5 {
            m.run_frame().unwrap();
        }
        // Each frame-end pulse is acknowledged on the next frame's first
        // slice, so the fifth is still pending here.
        assert_eq!(*acks.borrow(), 4);
        assert!(m.irq().borrow().is_raised(0, IrqLine::Nmi));
    }

    #[test]
    fn overrunning_cpu_is_debited_next_slice() {
        struct OverrunCpu {
            total: Rc<RefCell<u64>>,
        }
        impl CpuCore for OverrunCpu {
            fn reset(&mut self) {}
            fn run(&mut self, cycles: u32) -> u32 {
                // Always finishes a 100-cycle "instruction" past the end.
                let consumed = cycles + 100;
                *self.total.borrow_mut() += u64::from(consumed);
                consumed
            }
        }
        let mut cfg = MachineConfig::new("test", 8, 8, 60.0);
        cfg.set_slices_per_frame(10);
        let total = Rc::new(RefCell::new(0));
        cfg.add_cpu(
            "maincpu",
            1_000_000,
            Box::new(OverrunCpu {
                total: Rc::clone(&total),
            }),
        )
        .unwrap();
        let mut m = cfg.build().unwrap();
        m.run_frame().unwrap();
        // Overruns are deducted from later budgets: the total can only
        // exceed the frame budget by the final overrun.
        let t = *total.borrow();
        assert!((16_660..=16_780).contains(&t), "cycles {t}");
    }

    #[test]
    fn build_rejects_empty_and_bad_config() {
        let cfg = MachineConfig::new("test", 8, 8, 60.0);
        assert!(matches!(cfg.build(), Err(ConfigError::NoCpus)));

        let mut cfg = MachineConfig::new("test", 8, 8, 60.0);
        let total = Rc::new(RefCell::new(0));
        let acks = Rc::new(RefCell::new(0));
        let cpu = CountingCpu {
            irq: cfg.irq(),
            cpu_index: 0,
            total,
            acks,
        };
        cfg.add_cpu("maincpu", 1, Box::new(cpu)).unwrap();
        cfg.set_slices_per_frame(0);
        assert!(matches!(cfg.build(), Err(ConfigError::ZeroSlices)));

        let mut cfg = MachineConfig::new("test", 8, 8, 0.0);
        struct Idle;
        impl CpuCore for Idle {
            fn reset(&mut self) {}
            fn run(&mut self, c: u32) -> u32 {
                c
            }
        }
        cfg.add_cpu("maincpu", 1, Box::new(Idle)).unwrap();
        assert!(matches!(cfg.build(), Err(ConfigError::BadFrameRate(_))));
    }

    #[test]
    fn duplicate_cpu_tag_fails_configuration() {
        struct Idle;
        impl CpuCore for Idle {
            fn reset(&mut self) {}
            fn run(&mut self, c: u32) -> u32 {
                c
            }
        }
        let mut cfg = MachineConfig::new("test", 8, 8, 60.0);
        cfg.add_cpu("maincpu", 1_000_000, Box::new(Idle)).unwrap();
        let err = cfg.add_cpu("maincpu", 1_000_000, Box::new(Idle));
        assert!(matches!(err, Err(ConfigError::DuplicateTag(_))));
    }

    #[test]
    fn sound_timer_wiring_pulses_irq() {
        struct TickChip {
            fired: bool,
        }
        impl crate::SoundChip for TickChip {
            fn reset(&mut self) {}
            fn write_register(&mut self, _a: u8, _v: u8) {}
            fn read_register(&self, _a: u8) -> u8 {
                0
            }
            fn generate(&mut self, out: &mut [AudioSample]) {
                out.fill(0);
            }
            fn timer_expired(&mut self) -> bool {
                std::mem::take(&mut self.fired)
            }
        }

        let mut cfg = MachineConfig::new("test", 8, 8, 60.0);
        cfg.set_slices_per_frame(1);
        let total = Rc::new(RefCell::new(0));
        let acks = Rc::new(RefCell::new(0));
        let cpu = CountingCpu {
            irq: cfg.irq(),
            cpu_index: 0,
            total,
            acks: Rc::clone(&acks),
        };
        cfg.add_cpu("maincpu", 1_000, Box::new(cpu)).unwrap();
        cfg.add_sound(
            "fm",
            1_000,
            Rc::new(RefCell::new(TickChip { fired: true })),
            Some((0, IrqLine::Irq(0), Some(0xD7))),
        )
        .unwrap();
        let mut m = cfg.build().unwrap();

        // Frame 1 latches the pulse; the CPU sees it on its next slice.
        m.run_frame().unwrap();
        m.run_frame().unwrap();
        assert_eq!(*acks.borrow(), 1);
    }

    #[test]
    fn audio_sink_gets_per_chip_buffers() {
        struct Saw(u8);
        impl crate::SoundChip for Saw {
            fn reset(&mut self) {}
            fn write_register(&mut self, _a: u8, _v: u8) {}
            fn read_register(&self, _a: u8) -> u8 {
                0
            }
            fn generate(&mut self, out: &mut [AudioSample]) {
                for (i, s) in out.iter_mut().enumerate() {
                    *s = i as AudioSample;
                }
                self.0 += 1;
            }
        }
        struct Idle;
        impl CpuCore for Idle {
            fn reset(&mut self) {}
            fn run(&mut self, c: u32) -> u32 {
                c
            }
        }

        let mut cfg = MachineConfig::new("test", 8, 8, 60.0);
        cfg.add_cpu("maincpu", 1_000, Box::new(Idle)).unwrap();
        cfg.add_sound("psg", 1_000, Rc::new(RefCell::new(Saw(0))), None)
            .unwrap();
        let seen: Rc<RefCell<Vec<(String, usize)>>> = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        cfg.set_audio_sink(Box::new(move |tag, buf| {
            s.borrow_mut().push((tag.to_string(), buf.len()));
        }));
        let mut m = cfg.build().unwrap();
        m.run_frame().unwrap();

        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "psg");
        assert_eq!(seen[0].1, 735); // 44100 / 60
    }
}
