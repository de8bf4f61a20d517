//! Board wiring: memory maps, port decode, interrupt plumbing, and the
//! demo ROM set.
//!
//! Main CPU map:
//!   0x0000-0x3FFF  program ROM
//!   0x4000-0x5FFF  banked ROM window
//!   0x6000-0x67FF  work RAM
//!   0x6800-0x6FFF  battery-backed RAM
//!   0x7000-0x77FF  background VRAM
//!   0x7800-0x7FFF  foreground VRAM
//!   0x8000-0x80FF  sprite RAM
//!
//! Main I/O: 0x00 soundlatch, 0x01 VBlank ack, 0x02 bank select, 0x03
//! flip screen, 0x04 background x-scroll, 0x10-0x2F foreground column
//! y-scroll, 0x40/0x41/0x42 player 1 / player 2 / dip switches.
//!
//! Sound CPU map: ROM at 0x0000, RAM at 0x2000; I/O 0x00 soundlatch
//! (read), 0x10/0x11 PSG select/data.

use std::rc::Rc;

use serde_json::Value;
use thiserror::Error;

use coinop_core::bus::{shared_space, HandlerKind, Latch8, SharedRam, SharedSpace};
use coinop_core::device::ConfigError;
use coinop_core::input::DigitalPort;
use coinop_core::irq::{rst_opcode, IrqLine};
use coinop_core::machine::{
    Machine, MachineConfig, MachineError, SharedSoundChip, Timer, TimerAction,
};
use coinop_core::types::Frame;
use coinop_core::video::render::LayerSlot;
use coinop_core::video::tilemap::Tilemap;
use coinop_core::video::Opacity;

use crate::bus::{
    shared, BankSelect, FlipScreen, IrqAck, PsgInterface, ScrollX, ScrollYColumns, SoundLatchRead,
    SoundLatchWrite,
};
use crate::cpu::Lc8;
use crate::psg::TestPsg;
use crate::video::{VideoBoard, SCREEN_H, SCREEN_W};

const MAIN_CLOCK_HZ: u32 = 3_000_000;
const SOUND_CLOCK_HZ: u32 = 1_500_000;
const PSG_CLOCK_HZ: u32 = 1_789_772;
const FRAME_RATE: f64 = 60.0;
const SLICES_PER_FRAME: u32 = 8;

pub const WORK_RAM_BASE: u32 = 0x6000;
pub const NVRAM_BASE: u32 = 0x6800;
pub const BG_VRAM_BASE: u32 = 0x7000;
pub const FG_VRAM_BASE: u32 = 0x7800;
pub const SPRITE_RAM_BASE: u32 = 0x8000;
pub const SOUND_RAM_BASE: u32 = 0x2000;

#[derive(Debug, Error)]
pub enum BoardError {
    #[error("board configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Machine(#[from] MachineError),
}

pub struct TestboardRoms {
    pub main_prog: Vec<u8>,
    pub banked: Vec<u8>,
    pub sound_prog: Vec<u8>,
    pub bg_tiles: Vec<u8>,
    pub fg_tiles: Vec<u8>,
    pub sprite_tiles: Vec<u8>,
    pub palette_prom: Vec<u8>,
    pub lookup_prom: Option<Vec<u8>>,
}

impl TestboardRoms {
    /// Built-in ROM set: the main program switches to bank 1, sends a
    /// soundlatch command, then counts VBlanks into work RAM and mirrors
    /// the count into the first background cell. The sound program
    /// programs the PSG from the latched command and counts its timer
    /// interrupts into sound RAM.
    pub fn demo() -> Self {
        Self {
            main_prog: demo_main_prog(),
            banked: demo_banked_rom(),
            sound_prog: demo_sound_prog(),
            bg_tiles: solid_2bpp_tiles(1024),
            fg_tiles: solid_2bpp_tiles(1024),
            sprite_tiles: solid_4bpp_tiles(256),
            palette_prom: (0..=255).collect(),
            lookup_prom: None,
        }
    }
}

pub struct Testboard {
    machine: Machine,
    main_prog: SharedSpace,
    main_io: SharedSpace,
    sound_prog: SharedSpace,
    psg: SharedSoundChip,
    soundlatch: Latch8,
    nvram: SharedRam,
    p1: DigitalPort,
    p2: DigitalPort,
    dsw: DigitalPort,
}

impl Testboard {
    pub fn new(roms: TestboardRoms) -> Result<Self, BoardError> {
        let mut cfg = MachineConfig::new("testboard", SCREEN_W, SCREEN_H, FRAME_RATE);
        cfg.set_slices_per_frame(SLICES_PER_FRAME);
        let irq = cfg.irq();

        let main_prog = shared_space("main");
        let main_io = shared_space("main-io");
        let sound_prog = shared_space("sound");
        let sound_io = shared_space("sound-io");

        let main_cpu = cfg.add_cpu(
            "maincpu",
            MAIN_CLOCK_HZ,
            Box::new(Lc8::new(
                Rc::clone(&main_prog),
                Rc::clone(&main_io),
                Rc::clone(&irq),
                0,
            )),
        )?;
        let sound_cpu = cfg.add_cpu(
            "audiocpu",
            SOUND_CLOCK_HZ,
            Box::new(Lc8::new(
                Rc::clone(&sound_prog),
                Rc::clone(&sound_io),
                Rc::clone(&irq),
                1,
            )),
        )?;

        let psg: SharedSoundChip = Rc::new(std::cell::RefCell::new(TestPsg::new()));
        cfg.add_sound(
            "psg",
            PSG_CLOCK_HZ,
            Rc::clone(&psg),
            Some((sound_cpu, IrqLine::Irq(0), Some(rst_opcode(7)))),
        )?;

        // Level-triggered VBlank interrupt; the ack port drops the line.
        cfg.add_timer(Timer::periodic_hz(
            FRAME_RATE,
            TimerAction::AssertLine {
                cpu: main_cpu,
                line: IrqLine::Irq(0),
                vector: Some(rst_opcode(7)),
            },
        ));

        let video = VideoBoard::new(
            roms.bg_tiles,
            roms.fg_tiles,
            roms.sprite_tiles,
            &roms.palette_prom,
            roms.lookup_prom.as_deref(),
        );

        // Main program space.
        let work_ram = coinop_core::bus::shared_ram(0x800);
        let nvram = coinop_core::bus::shared_ram(0x800);
        {
            let mut space = main_prog.borrow_mut();
            space.map_rom(0x0000, 0x3FFF, Rc::new(roms.main_prog), 0)?;
            space.map_bank(0x4000, 0x5FFF, "mainbank", Rc::new(roms.banked))?;
            space.map_ram(WORK_RAM_BASE, WORK_RAM_BASE + 0x7FF, Rc::clone(&work_ram));
            space.map_ram(NVRAM_BASE, NVRAM_BASE + 0x7FF, Rc::clone(&nvram));
            space.map_handler(
                BG_VRAM_BASE,
                BG_VRAM_BASE + 0x7FF,
                HandlerKind::ReadWrite,
                Tilemap::ram_handler(&video.bg, Rc::clone(&video.bg_ram), 2),
            );
            space.map_handler(
                FG_VRAM_BASE,
                FG_VRAM_BASE + 0x7FF,
                HandlerKind::ReadWrite,
                Tilemap::ram_handler(&video.fg, Rc::clone(&video.fg_ram), 2),
            );
            space.map_ram(
                SPRITE_RAM_BASE,
                SPRITE_RAM_BASE + 0xFF,
                Rc::clone(&video.sprite_ram),
            );
        }

        // Main I/O ports.
        let soundlatch = Latch8::new();
        let p1 = DigitalPort::new();
        let p2 = DigitalPort::new();
        let dsw = DigitalPort::new();
        {
            let mut io = main_io.borrow_mut();
            io.map_handler(
                0x00,
                0x00,
                HandlerKind::ReadWrite,
                shared(SoundLatchWrite {
                    latch: soundlatch.clone(),
                    irq: Rc::clone(&irq),
                    sound_cpu,
                }),
            );
            io.map_handler(
                0x01,
                0x01,
                HandlerKind::Write,
                shared(IrqAck {
                    irq: Rc::clone(&irq),
                    cpu: main_cpu,
                    line: IrqLine::Irq(0),
                }),
            );
            io.map_handler(
                0x02,
                0x02,
                HandlerKind::Write,
                shared(BankSelect {
                    bank: main_prog.borrow().bank("mainbank")?,
                }),
            );
            io.map_handler(
                0x03,
                0x03,
                HandlerKind::ReadWrite,
                shared(FlipScreen {
                    flip: cfg.renderer().flip_handle(),
                }),
            );
            io.map_handler(
                0x04,
                0x04,
                HandlerKind::Write,
                shared(ScrollX {
                    tilemap: Rc::clone(&video.bg),
                }),
            );
            io.map_handler(
                0x10,
                0x2F,
                HandlerKind::Write,
                shared(ScrollYColumns {
                    tilemap: Rc::clone(&video.fg),
                    base: 0x10,
                }),
            );
            io.map_handler(0x40, 0x40, HandlerKind::Read, p1.handler());
            io.map_handler(0x41, 0x41, HandlerKind::Read, p2.handler());
            io.map_handler(0x42, 0x42, HandlerKind::Read, dsw.handler());
        }

        // Sound CPU spaces.
        let sound_ram = coinop_core::bus::shared_ram(0x400);
        {
            let mut space = sound_prog.borrow_mut();
            space.map_rom(0x0000, 0x0FFF, Rc::new(roms.sound_prog), 0)?;
            space.map_ram(SOUND_RAM_BASE, SOUND_RAM_BASE + 0x3FF, Rc::clone(&sound_ram));
        }
        {
            let mut io = sound_io.borrow_mut();
            io.map_handler(
                0x00,
                0x00,
                HandlerKind::Read,
                shared(SoundLatchRead {
                    latch: soundlatch.clone(),
                }),
            );
            io.map_handler(
                0x10,
                0x11,
                HandlerKind::ReadWrite,
                shared(PsgInterface::new(Rc::clone(&psg))),
            );
        }

        // Video stack, back to front: opaque background, low sprites,
        // transparent foreground, high sprites.
        let bg_index = cfg.add_tilemap(Rc::clone(&video.bg));
        let fg_index = cfg.add_tilemap(Rc::clone(&video.fg));
        cfg.set_layers(vec![
            LayerSlot::Tilemap {
                index: bg_index,
                opacity: Opacity::Opaque,
            },
            LayerSlot::Sprites {
                priority_mask: 0b01,
            },
            LayerSlot::Tilemap {
                index: fg_index,
                opacity: Opacity::Transparent(0),
            },
            LayerSlot::Sprites {
                priority_mask: 0b10,
            },
        ]);
        cfg.set_sprites(video.sprites, Rc::clone(&video.sprite_ram));
        cfg.set_palette(video.palette, video.lookup);

        {
            let save = cfg.save_registry();
            save.register_region("nvram", Rc::clone(&nvram));
            save.register_region("work", Rc::clone(&work_ram));
            save.register_region("bg_vram", Rc::clone(&video.bg_ram));
            save.register_region("fg_vram", Rc::clone(&video.fg_ram));
            save.register_region("sprite_ram", Rc::clone(&video.sprite_ram));
            save.register_latch("soundlatch", Rc::clone(&soundlatch.0));
        }

        let mut machine = cfg.build()?;
        machine.reset();

        Ok(Self {
            machine,
            main_prog,
            main_io,
            sound_prog,
            psg,
            soundlatch,
            nvram,
            p1,
            p2,
            dsw,
        })
    }

    pub fn run_frame(&mut self) -> Result<(), BoardError> {
        Ok(self.machine.run_frame()?)
    }

    pub fn save_state(&self) -> Value {
        self.machine.save_state()
    }

    pub fn load_state(&mut self, state: &Value) -> Result<(), BoardError> {
        Ok(self.machine.load_state(state)?)
    }

    pub fn frame(&self) -> &Frame {
        self.machine.frame()
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    pub fn machine_mut(&mut self) -> &mut Machine {
        &mut self.machine
    }

    pub fn main_space(&self) -> SharedSpace {
        Rc::clone(&self.main_prog)
    }

    pub fn main_io(&self) -> SharedSpace {
        Rc::clone(&self.main_io)
    }

    pub fn sound_space(&self) -> SharedSpace {
        Rc::clone(&self.sound_prog)
    }

    pub fn psg(&self) -> SharedSoundChip {
        Rc::clone(&self.psg)
    }

    pub fn soundlatch(&self) -> &Latch8 {
        &self.soundlatch
    }

    pub fn nvram(&self) -> SharedRam {
        Rc::clone(&self.nvram)
    }

    pub fn p1(&self) -> &DigitalPort {
        &self.p1
    }

    pub fn p2(&self) -> &DigitalPort {
        &self.p2
    }

    pub fn dsw(&self) -> &DigitalPort {
        &self.dsw
    }
}

fn demo_main_prog() -> Vec<u8> {
    let mut rom = vec![0u8; 0x4000];
    // Reset: jump past the vectors.
    rom[0x0000..0x0003].copy_from_slice(&[0x30, 0x00, 0x01]);
    // 0x0038 VBlank: bump the frame counter, mirror it into background
    // cell 0, acknowledge, return.
    rom[0x0038..0x0045].copy_from_slice(&[
        0x11, 0x00, 0x60, // LDA 0x6000
        0x60, 0x01, //       ADD #1
        0x12, 0x00, 0x60, // STA 0x6000
        0x12, 0x00, 0x70, // STA 0x7000
        0x20, 0x01, //       OUT 0x01 (ack)
    ]);
    rom[0x0045] = 0x42; // RETI
    // 0x0100 init: background attribute, soundlatch command, bank 1,
    // enable interrupts, idle.
    rom[0x0100..0x010E].copy_from_slice(&[
        0x10, 0x20, //       LDA #0x20 (color group 2)
        0x12, 0x01, 0x70, // STA 0x7001
        0x10, 0x55, //       LDA #0x55
        0x20, 0x00, //       OUT 0x00 (soundlatch)
        0x10, 0x01, //       LDA #0x01
        0x20, 0x02, //       OUT 0x02 (bank select)
        0x40, //             EI
    ]);
    rom[0x010E] = 0x50; // HLT
    rom[0x010F..0x0112].copy_from_slice(&[0x30, 0x0E, 0x01]); // JMP 0x010E
    rom
}

fn demo_banked_rom() -> Vec<u8> {
    // Four 8K banks, each tagged by its first byte.
    let mut rom = vec![0u8; 4 * 0x2000];
    for bank in 0..4 {
        rom[bank * 0x2000] = 0x10 + bank as u8;
    }
    rom
}

fn demo_sound_prog() -> Vec<u8> {
    let mut rom = vec![0u8; 0x1000];
    rom[0x0000..0x0003].copy_from_slice(&[0x30, 0x30, 0x00]);
    // 0x0008 NMI: program the PSG from the latched command.
    rom[0x0008..0x0021].copy_from_slice(&[
        0x10, 0x00, // LDA #0 (select period low)
        0x20, 0x10, // OUT select
        0x21, 0x00, // IN soundlatch
        0x20, 0x11, // OUT data
        0x10, 0x02, // LDA #2 (select volume)
        0x20, 0x10, // OUT select
        0x10, 0x0F, // LDA #0x0F
        0x20, 0x11, // OUT data
        0x10, 0x03, // LDA #3 (select timer)
        0x20, 0x10, // OUT select
        0x10, 0x04, // LDA #4 (reload every 4 polls)
        0x20, 0x11, // OUT data
        0x42, //       RETI
    ]);
    // 0x0030 main: enable interrupts, idle.
    rom[0x0030] = 0x40; // EI
    rom[0x0031] = 0x50; // HLT
    rom[0x0032..0x0035].copy_from_slice(&[0x30, 0x31, 0x00]); // JMP 0x0031
    // 0x0038 timer IRQ: count expirations into sound RAM.
    rom[0x0038..0x0040].copy_from_slice(&[
        0x11, 0x00, 0x20, // LDA 0x2000
        0x60, 0x01, //       ADD #1
        0x12, 0x00, 0x20, // STA 0x2000
    ]);
    rom[0x0040] = 0x42; // RETI
    rom
}

fn solid_2bpp_tiles(tiles: usize) -> Vec<u8> {
    // Tile n decodes to solid pen n & 3.
    let mut rom = vec![0u8; tiles * 16];
    for n in 0..tiles {
        for row in 0..8 {
            rom[n * 16 + row] = if n & 1 != 0 { 0xFF } else { 0 };
            rom[n * 16 + 8 + row] = if n & 2 != 0 { 0xFF } else { 0 };
        }
    }
    rom
}

fn solid_4bpp_tiles(tiles: usize) -> Vec<u8> {
    // Tile n decodes to solid pen n & 15.
    let mut rom = vec![0u8; tiles * 32];
    for n in 0..tiles {
        let pen = (n & 0x0F) as u8;
        for byte in &mut rom[n * 32..(n + 1) * 32] {
            *byte = pen << 4 | pen;
        }
    }
    rom
}
