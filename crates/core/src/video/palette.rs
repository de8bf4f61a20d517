//! Indexed palette plus the color-PROM lookup layer.
//!
//! The displayed color for a pixel is `palette[lookup[(group, pen)]]`.
//! The lookup table is a burned PROM on the original boards and stays
//! fixed, except for pens the driver designates as "live" for palette
//! animation (one pen swapped at runtime, everything else stable).

/// ARGB8888 palette. Out-of-range reads resolve to opaque black rather
/// than failing, same as an undriven DAC input.
#[derive(Debug, Clone)]
pub struct Palette {
    colors: Vec<u32>,
}

impl Palette {
    pub fn new(size: usize) -> Self {
        Self {
            colors: vec![0xFF00_0000; size],
        }
    }

    pub fn from_colors(colors: Vec<u32>) -> Self {
        Self { colors }
    }

    pub fn color(&self, index: usize) -> u32 {
        self.colors.get(index).copied().unwrap_or(0xFF00_0000)
    }

    pub fn set_color(&mut self, index: usize, argb: u32) {
        if let Some(slot) = self.colors.get_mut(index) {
            *slot = argb;
        }
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }
}

/// `(color group, pen) -> palette index` PROM.
#[derive(Debug, Clone)]
pub struct ColorLookup {
    pens_per_group: u16,
    groups: u16,
    table: Vec<u16>,
}

impl ColorLookup {
    /// Identity table: group g, pen p maps to `g * pens + p`.
    pub fn identity(groups: u16, pens_per_group: u16) -> Self {
        let table = (0..groups * pens_per_group).collect();
        Self {
            pens_per_group,
            groups,
            table,
        }
    }

    pub fn from_prom(groups: u16, pens_per_group: u16, prom: &[u8]) -> Self {
        let mut lut = Self::identity(groups, pens_per_group);
        for (i, &v) in prom.iter().enumerate().take(lut.table.len()) {
            lut.table[i] = u16::from(v);
        }
        lut
    }

    pub fn groups(&self) -> u16 {
        self.groups
    }

    pub fn pens_per_group(&self) -> u16 {
        self.pens_per_group
    }

    pub fn entry(&self, group: u16, pen: u8) -> u16 {
        let idx = usize::from(group) * usize::from(self.pens_per_group)
            + usize::from(pen) % usize::from(self.pens_per_group);
        self.table.get(idx).copied().unwrap_or(0)
    }

    /// Retarget one pen at runtime (palette animation). The rest of the
    /// table never moves.
    pub fn set_live_pen(&mut self, group: u16, pen: u8, palette_index: u16) {
        let idx =
            usize::from(group) * usize::from(self.pens_per_group) + usize::from(pen);
        if let Some(slot) = self.table.get_mut(idx) {
            *slot = palette_index;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn palette_set_get() {
        let mut pal = Palette::new(4);
        pal.set_color(1, 0xFF00_FF00);
        assert_eq!(pal.color(1), 0xFF00_FF00);
        assert_eq!(pal.color(0), 0xFF00_0000);
    }

    #[test]
    fn palette_out_of_range_is_black() {
        let mut pal = Palette::new(4);
        assert_eq!(pal.color(99), 0xFF00_0000);
        pal.set_color(99, 0xFFFF_FFFF); // silently dropped
        assert_eq!(pal.len(), 4);
    }

    #[test]
    fn identity_lookup() {
        let lut = ColorLookup::identity(4, 4);
        assert_eq!(lut.entry(0, 0), 0);
        assert_eq!(lut.entry(2, 3), 11);
    }

    #[test]
    fn prom_lookup_and_live_pen() {
        let lut_prom = [3u8, 2, 1, 0, 7, 6, 5, 4];
        let mut lut = ColorLookup::from_prom(2, 4, &lut_prom);
        assert_eq!(lut.entry(0, 0), 3);
        assert_eq!(lut.entry(1, 2), 5);

        // Animate pen 2 of group 1; neighbors stay put.
        lut.set_live_pen(1, 2, 9);
        assert_eq!(lut.entry(1, 2), 9);
        assert_eq!(lut.entry(1, 1), 6);
        assert_eq!(lut.entry(1, 3), 4);
    }
}
