//! Single-channel square-wave PSG with a programmable timer.
//!
//! Register map (as seen through the select/data port pair):
//!
//! - 0: tone period, low byte (in output samples per half-wave)
//! - 1: tone period, high byte
//! - 2: volume (0 silences the channel)
//! - 3: timer reload (in scheduler polls; 0 disables the timer)

use coinop_core::types::AudioSample;
use coinop_core::SoundChip;

const NUM_REGS: usize = 4;

pub struct TestPsg {
    regs: [u8; NUM_REGS],
    phase: u32,
    level: bool,
    timer_count: u32,
}

impl TestPsg {
    pub fn new() -> Self {
        Self {
            regs: [0; NUM_REGS],
            phase: 0,
            level: false,
            timer_count: 0,
        }
    }

    fn period(&self) -> u32 {
        let p = u32::from(self.regs[0]) | (u32::from(self.regs[1]) << 8);
        p.max(1)
    }

    fn amplitude(&self) -> AudioSample {
        // 4-bit style volume scaled into i16 range.
        AudioSample::from(self.regs[2] & 0x0F).saturating_mul(0x07FF)
    }
}

impl Default for TestPsg {
    fn default() -> Self {
        Self::new()
    }
}

impl SoundChip for TestPsg {
    fn reset(&mut self) {
        self.regs = [0; NUM_REGS];
        self.phase = 0;
        self.level = false;
        self.timer_count = 0;
    }

    fn write_register(&mut self, addr: u8, value: u8) {
        let idx = usize::from(addr) % NUM_REGS;
        self.regs[idx] = value;
        if idx == 3 {
            self.timer_count = u32::from(value);
        }
    }

    fn read_register(&self, addr: u8) -> u8 {
        self.regs[usize::from(addr) % NUM_REGS]
    }

    fn generate(&mut self, out: &mut [AudioSample]) {
        let period = self.period();
        let amp = self.amplitude();
        for sample in out.iter_mut() {
            self.phase += 1;
            if self.phase >= period {
                self.phase = 0;
                self.level = !self.level;
            }
            *sample = if self.level { amp } else { -amp };
        }
    }

    fn timer_expired(&mut self) -> bool {
        if self.regs[3] == 0 {
            return false;
        }
        self.timer_count = self.timer_count.saturating_sub(1);
        if self.timer_count == 0 {
            self.timer_count = u32::from(self.regs[3]);
            true
        } else {
            false
        }
    }
}
