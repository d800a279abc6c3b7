//! Background and sprite palettes
//!
//! # Overview
//!
//! Every tile pixel decodes to a 2-bit index; palettes turn that index into
//! a displayable color. The two console variants feed this differently:
//!
//! * On DMG, the BGP/OBP0/OBP1 registers remap indices through a 4-shade
//!   table. The shades themselves come from a compatibility table selected
//!   by the cartridge header checksum, the same trick the color hardware
//!   uses to colorize monochrome games.
//! * On CGB, palette RAM holds 8 background and 8 sprite palettes of 4
//!   colors each, 2 bytes per color in RGB555 little-endian. Writes land in
//!   RAM and the affected color is re-resolved immediately.
//!
//! Resolved colors are kept in `0x00RRGGBB` form so the compositor never
//! has to expand channels per pixel.

use crate::bus::HardwareMode;

/// A resolved color in `0x00RRGGBB` form. The top byte is always zero.
pub type Color = u32;

/// One bank of color palette RAM: 8 palettes x 4 colors x 2 bytes.
pub const PALETTE_RAM_SIZE: usize = 64;

/// Shade tables applied to DMG software, indexed by the cartridge header
/// checksum. Each entry holds bright-to-dark quadruples for the background,
/// OBP0, and OBP1. The colors are taken from the compatibility palettes the
/// color hardware assigns to monochrome cartridges.
const DMG_COMPAT: [[[Color; 4]; 3]; 6] = [
    // Grayscale
    [
        [0x00FFFFFF, 0x00AAAAAA, 0x00555555, 0x00000000],
        [0x00FFFFFF, 0x00AAAAAA, 0x00555555, 0x00000000],
        [0x00FFFFFF, 0x00AAAAAA, 0x00555555, 0x00000000],
    ],
    // Original pea-green LCD
    [
        [0x00E0F8D0, 0x0088C070, 0x00346856, 0x00081820],
        [0x00E0F8D0, 0x0088C070, 0x00346856, 0x00081820],
        [0x00E0F8D0, 0x0088C070, 0x00346856, 0x00081820],
    ],
    // Brown background, red sprites
    [
        [0x00FFFFFF, 0x00FFAD63, 0x00833100, 0x00000000],
        [0x00FFFFFF, 0x00FF8584, 0x00943A3A, 0x00000000],
        [0x00FFFFFF, 0x00FF8584, 0x00943A3A, 0x00000000],
    ],
    // Pastel background, red and green sprites
    [
        [0x00FFFFA5, 0x00FE9494, 0x009394FE, 0x00000000],
        [0x00FFFFFF, 0x00FF8584, 0x00943A3A, 0x00000000],
        [0x00FFFFFF, 0x007BFF31, 0x00008400, 0x00000000],
    ],
    // Blue background
    [
        [0x00FFFFFF, 0x0065A49B, 0x000000FE, 0x00000000],
        [0x00FFFFFF, 0x00FF8584, 0x00943A3A, 0x00000000],
        [0x00FFFFFF, 0x0065A49B, 0x000000FE, 0x00000000],
    ],
    // Green background, blue sprites
    [
        [0x00FFFFFF, 0x007BFF31, 0x000063C5, 0x00000000],
        [0x00FFFFFF, 0x00FF8584, 0x00943A3A, 0x00000000],
        [0x00FFFFFF, 0x0063A5FF, 0x000000FF, 0x00000000],
    ],
];

/// Expand a packed RGB555 word (`xbbbbbgggggrrrrr`) to `0x00RRGGBB`.
fn expand_rgb555(word: u16) -> Color {
    let red = scale_channel(word & 0x1F);
    let green = scale_channel((word >> 5) & 0x1F);
    let blue = scale_channel((word >> 10) & 0x1F);

    red << 16 | green << 8 | blue
}

/// Scale a 5-bit channel to 8 bits, rounding to nearest.
#[inline]
fn scale_channel(channel: u16) -> u32 {
    (channel as u32 * 255 + 15) / 31
}

/// Four resolved colors.
///
/// Index 0 is logically "transparent" for sprites; the compositor skips
/// sprite pixels before ever looking it up.
#[derive(Clone, Copy, Default)]
pub struct Palette {
    colors: [Color; 4],
}

impl Palette {
    /// Color for a 2-bit tile index.
    #[inline]
    pub fn color(&self, index: u8) -> Color {
        self.colors[(index & 0x3) as usize]
    }

    pub fn colors(&self) -> &[Color; 4] {
        &self.colors
    }
}

/// All palette state for one console.
///
/// The resolved `bg`/`obj` palettes are recomputed on every register or
/// palette RAM write, so lookups during compositing are plain array reads.
pub struct PaletteStore {
    bg: [Palette; 8],
    obj: [Palette; 8],

    /// Background palette RAM (CGB)
    bg_ram: [u8; PALETTE_RAM_SIZE],

    /// Sprite palette RAM (CGB)
    obj_ram: [u8; PALETTE_RAM_SIZE],

    /// DMG shade tables for BGP, OBP0, and OBP1
    shades: [[Color; 4]; 3],
}

impl PaletteStore {
    pub fn new(mode: HardwareMode, header_checksum: u8) -> Self {
        let shades = DMG_COMPAT[header_checksum as usize % DMG_COMPAT.len()];

        let mut store = Self {
            bg: [Palette::default(); 8],
            obj: [Palette::default(); 8],
            bg_ram: [0u8; PALETTE_RAM_SIZE],
            obj_ram: [0u8; PALETTE_RAM_SIZE],
            shades,
        };

        match mode {
            HardwareMode::Cgb => {
                // Background palette RAM powers up white
                store.bg_ram = [0x1F; PALETTE_RAM_SIZE];
                Self::refresh(&store.bg_ram, &mut store.bg);
                Self::refresh(&store.obj_ram, &mut store.obj);
            }
            HardwareMode::Dmg => {
                // Identity-mapped seed; the boot code rewrites BGP/OBPx anyway
                store.bg[0].colors = shades[0];
                store.obj[0].colors = shades[1];
                store.obj[1].colors = shades[2];
            }
        }

        store
    }

    /// Handle a BGP write: remap all 4 background shades.
    pub fn set_dmg_bg(&mut self, value: u8) {
        self.bg[0] = Self::map_dmg(&self.shades[0], value);
    }

    /// Handle an OBP0 write.
    pub fn set_dmg_obj0(&mut self, value: u8) {
        self.obj[0] = Self::map_dmg(&self.shades[1], value);
    }

    /// Handle an OBP1 write.
    pub fn set_dmg_obj1(&mut self, value: u8) {
        self.obj[1] = Self::map_dmg(&self.shades[2], value);
    }

    /// Handle a background palette RAM write (BCPD).
    pub fn write_cgb_bg(&mut self, offset: usize, value: u8) {
        Self::write_cgb(&mut self.bg_ram, &mut self.bg, offset, value);
    }

    /// Handle a sprite palette RAM write (OCPD).
    pub fn write_cgb_obj(&mut self, offset: usize, value: u8) {
        Self::write_cgb(&mut self.obj_ram, &mut self.obj, offset, value);
    }

    #[inline]
    pub fn bg(&self, index: u8) -> &Palette {
        &self.bg[(index & 0x7) as usize]
    }

    #[inline]
    pub fn obj(&self, index: u8) -> &Palette {
        &self.obj[(index & 0x7) as usize]
    }

    /// Map each 2-bit group of a DMG palette register through a shade table.
    fn map_dmg(shades: &[Color; 4], value: u8) -> Palette {
        let mut palette = Palette::default();
        for (index, color) in palette.colors.iter_mut().enumerate() {
            let shade = (value >> (index * 2)) & 0x3;
            *color = shades[shade as usize];
        }

        palette
    }

    fn write_cgb(
        ram: &mut [u8; PALETTE_RAM_SIZE],
        palettes: &mut [Palette; 8],
        offset: usize,
        value: u8,
    ) {
        debug_assert!(offset < PALETTE_RAM_SIZE, "palette RAM offset {}", offset);
        if offset >= PALETTE_RAM_SIZE {
            log::warn!("ignoring out-of-range palette RAM write: {}", offset);
            return;
        }

        ram[offset] = value;

        // Re-resolve the color whose 2-byte word just changed
        let palette = offset / 8;
        let color = (offset % 8) / 2;
        let base = palette * 8 + color * 2;
        let word = u16::from_le_bytes([ram[base], ram[base + 1]]);

        palettes[palette].colors[color] = expand_rgb555(word);
    }

    /// Re-resolve every color from palette RAM.
    fn refresh(ram: &[u8; PALETTE_RAM_SIZE], palettes: &mut [Palette; 8]) {
        for (palette, colors) in palettes.iter_mut().enumerate() {
            for color in 0..4 {
                let base = palette * 8 + color * 2;
                let word = u16::from_le_bytes([ram[base], ram[base + 1]]);
                colors.colors[color] = expand_rgb555(word);
            }
        }
    }
}
