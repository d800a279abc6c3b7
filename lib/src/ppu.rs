//! Scanline compositor and LCD timing driver
//!
//! # Overview
//!
//! ## Background
//!
//! The background is a 256x256 pixel plane, or 32x32 tiles, of which the
//! LCD shows a 160x144 cutout positioned by `SCY`/`SCX` (it wraps around
//! the plane edges). The *tile map* at 0x1800 or 0x1C00 within VRAM names
//! the tile for each cell; the tile data itself lives in one of two pattern
//! tables selected by LCDC bit 4 (the low table uses signed indices based
//! at 0x1000). On color hardware, the same offset in VRAM bank 1 carries a
//! per-tile attribute byte: palette number, data bank, and flip flags.
//!
//! ## Window
//!
//! The window is a second, non-scrolling tile plane overlaid from position
//! (`WX - 7`, `WY`). It shares the tile data selection with the background
//! but has its own map select bit. It wins over everything composited
//! before it.
//!
//! ## Sprites
//!
//! OAM holds 40 entries of (Y, X, tile, attributes). At most 10 sprites
//! are drawn per scanline, scanned and drawn in OAM order. In 8x16 mode
//! the tile index's low bit is ignored: the even tile is the top half and
//! the odd tile the bottom, swapped under vertical flip.
//!
//! ## Timing
//!
//! A scanline lasts 456 CPU cycles and a frame is 154 scanlines: 144
//! visible plus the 10-line VBlank. The driver accumulates the cycles the
//! CPU reports, finishes whole scanlines, advances `LY`, fires the VBlank
//! and STAT interrupts, and steps HBlank DMA on each non-VBlank line. Modes
//! 2 and 3 are not modeled; STAT only ever reports HBlank or VBlank.

use crate::bus::{self, HardwareMode, Interrupt, PpuBus};
use crate::frame::{self, Display, FrameBuffer, LCD_HEIGHT, LCD_WIDTH};
use crate::palette::{Palette, PaletteStore};
use crate::tile;

pub struct Ppu {
    /// Resolved background and sprite palettes
    palettes: PaletteStore,

    /// Buffer for the frame being composited
    frame: FrameBuffer,

    /// Sprites composited so far on each visible scanline
    sprites_drawn: [u8; LCD_HEIGHT],

    /// Cycle accumulator; stays below one scanline between ticks
    lcd_cycles: u32,

    /// Frames completed since power-on
    vblank_count: u64,

    /// Presentation target, if the host attached one
    display: Option<Box<dyn Display>>,

    /// Console variant, sampled from the bus at construction
    mode: HardwareMode,
}

impl Ppu {
    pub const DOTS_PER_LINE: u32 = 456;
    pub const LINES_PER_FRAME: u8 = 154;
    pub const VBLANK_START_LINE: u8 = 144;
    pub const SPRITES_PER_LINE: u8 = 10;

    /// CPU cycles in a full frame
    pub const CYCLES_PER_FRAME: u32 = Self::DOTS_PER_LINE * Self::LINES_PER_FRAME as u32;

    const FRAME_FREQUENCY: f64 = 59.7; // Hz

    /// Frame duration, in ns
    pub const FRAME_DURATION: u64 = ((1f64 / Self::FRAME_FREQUENCY) * 1e9) as u64;

    pub fn new<B: PpuBus>(bus: &B) -> Self {
        let mode = bus.hardware_mode();

        Self {
            palettes: PaletteStore::new(mode, bus.header_checksum()),
            frame: FrameBuffer::new(),
            sprites_drawn: [0u8; LCD_HEIGHT],
            lcd_cycles: 0,
            vblank_count: 0,
            display: None,
            mode,
        }
    }

    /// Attach or detach the presentation surface.
    ///
    /// Without a surface, compositing still runs; only presentation is
    /// skipped.
    pub fn set_display(&mut self, display: Option<Box<dyn Display>>) {
        self.display = display;
    }

    pub fn palettes(&self) -> &PaletteStore {
        &self.palettes
    }

    /// Mutable palette access, for the host's palette register writes.
    pub fn palettes_mut(&mut self) -> &mut PaletteStore {
        &mut self.palettes
    }

    pub fn frame_buffer(&self) -> &FrameBuffer {
        &self.frame
    }

    /// Frames completed (VBlank entries) since power-on.
    pub fn vblank_count(&self) -> u64 {
        self.vblank_count
    }

    /// Sprites composited on `line` in the current frame.
    pub fn sprites_drawn(&self, line: u8) -> u8 {
        self.sprites_drawn[line as usize]
    }

    /// Advance the PPU by `cycles` CPU cycles.
    ///
    /// Scanlines are completed one at a time whenever the accumulator
    /// crosses a line boundary; a call covering several lines processes
    /// them in increasing `LY` order.
    pub fn tick<B: PpuBus>(&mut self, cycles: u32, bus: &mut B) {
        self.lcd_cycles += cycles;

        while self.lcd_cycles >= Self::DOTS_PER_LINE {
            self.lcd_cycles -= Self::DOTS_PER_LINE;
            self.finish_scanline(bus);
        }
    }

    /// Wrap up the scanline the CPU just spent a line's worth of cycles on.
    fn finish_scanline<B: PpuBus>(&mut self, bus: &mut B) {
        let ly = bus.read_register(bus::LY_ADDR);
        let lcd_on = bus.read_register(bus::LCDC_ADDR) & bus::LCDC_DISPLAY_ENABLE != 0;

        if lcd_on {
            self.draw(ly, bus);
        }

        let next = (ly + 1) % Self::LINES_PER_FRAME;
        bus.write_register(bus::LY_ADDR, next);

        // "In VBlank" refers to the line that just finished
        let vblank = ly >= Self::VBLANK_START_LINE;

        if !vblank {
            bus.hdma_tick();
        }

        // With the LCD off, LY keeps counting but STAT is left alone and no
        // interrupts fire
        if lcd_on {
            let mut stat = bus.read_register(bus::STAT_ADDR) & !bus::STAT_MODE_MASK;
            if vblank {
                stat |= bus::STAT_MODE_VBLANK;
            }

            if !vblank {
                if stat & bus::STAT_LYC_INT_ENABLE != 0 {
                    if bus.read_register(bus::LYC_ADDR) == next {
                        stat |= bus::STAT_LYC_FLAG;
                        bus.raise_interrupt(Interrupt::LcdStat);
                    } else {
                        stat &= !bus::STAT_LYC_FLAG;
                    }
                }

                if stat & bus::STAT_HBLANK_INT_ENABLE != 0 {
                    bus.raise_interrupt(Interrupt::LcdStat);
                }
            }

            bus.write_register(bus::STAT_ADDR, stat);
        }

        if ly == Self::VBLANK_START_LINE - 1 {
            // Just finished the last visible line: the frame is complete
            self.present();

            if lcd_on {
                self.vblank_count += 1;
                bus.raise_interrupt(Interrupt::Vblank);

                if bus.read_register(bus::STAT_ADDR) & bus::STAT_VBLANK_INT_ENABLE != 0 {
                    bus.raise_interrupt(Interrupt::LcdStat);
                }
            }
        }
    }

    fn present(&mut self) {
        log::trace!("frame {} complete", self.vblank_count);

        if let Some(display) = self.display.as_mut() {
            display.present(&self.frame);
        }
    }

    /// Composite one scanline into the frame buffer.
    ///
    /// Layers are drawn background, then sprites, then window; the priority
    /// tags stored with each pixel arbitrate between them. Calls outside
    /// the visible range or with the LCD disabled are no-ops.
    pub fn draw<B: PpuBus>(&mut self, ly: u8, bus: &B) {
        if ly as usize >= LCD_HEIGHT {
            return;
        }

        let lcdc = bus.read_register(bus::LCDC_ADDR);
        if lcdc & bus::LCDC_DISPLAY_ENABLE == 0 {
            return;
        }

        if ly == 0 {
            self.frame.clear();
        }

        self.sprites_drawn[ly as usize] = 0;

        if lcdc & bus::LCDC_BG_ENABLE != 0 {
            self.draw_background(ly, lcdc, bus);
        }

        if lcdc & bus::LCDC_OBJ_ENABLE != 0 {
            self.draw_sprites(ly, lcdc, bus);
        }

        if lcdc & bus::LCDC_WINDOW_ENABLE != 0 {
            self.draw_window(ly, lcdc, bus);
        }
    }

    /// Render a scanline worth of background tiles.
    fn draw_background<B: PpuBus>(&mut self, ly: u8, lcdc: u8, bus: &B) {
        let signed_indexing = lcdc & bus::LCDC_TILE_DATA_SELECT == 0;
        let map_offset: usize = if lcdc & bus::LCDC_BG_TILE_MAP_SELECT != 0 {
            0x1C00
        } else {
            0x1800
        };

        let scy = bus.read_register(bus::SCY_ADDR) as usize;
        let scx = bus.read_register(bus::SCX_ADDR) as usize;
        let vram = bus.vram();

        let tile_y = ((ly as usize + scy) / 8) % 32;
        let row = (ly as usize + scy) % 8;

        // 21 tile columns cover the screen at any horizontal scroll offset
        for x in 0..=20 {
            let tile_x = (x + scx / 8) % 32;
            let map_index = map_offset + tile_y * 32 + tile_x;
            let (tile_index, attr) = self.map_entry(vram, map_index, signed_indexing);

            let screen_x = (x * 8) as i32 - (scx % 8) as i32;
            self.blit_map_row(vram, ly, screen_x, row, tile_index, attr, 0);
        }
    }

    /// Render a scanline worth of window tiles.
    fn draw_window<B: PpuBus>(&mut self, ly: u8, lcdc: u8, bus: &B) {
        let wy = bus.read_register(bus::WY_ADDR);
        let wx = bus.read_register(bus::WX_ADDR) as i32 - 7;

        if wy > ly || wx >= LCD_WIDTH as i32 {
            return;
        }

        let signed_indexing = lcdc & bus::LCDC_TILE_DATA_SELECT == 0;
        let map_offset: usize = if lcdc & bus::LCDC_WINDOW_TILE_MAP_SELECT != 0 {
            0x1C00
        } else {
            0x1800
        };

        let vram = bus.vram();

        let y = ((ly - wy) / 8) as usize;
        let row = ((ly - wy) % 8) as usize;
        let start = (wx / 8).max(0) as usize;

        for x in start..=20 {
            let map_index = map_offset + y * 32 + x;
            let (tile_index, attr) = self.map_entry(vram, map_index, signed_indexing);

            let screen_x = wx + (x * 8) as i32;
            self.blit_map_row(vram, ly, screen_x, row, tile_index, attr, frame::PRIORITY_WINDOW);
        }
    }

    /// Render a scanline worth of sprites, capped at 10 per line.
    fn draw_sprites<B: PpuBus>(&mut self, ly: u8, lcdc: u8, bus: &B) {
        let tall = lcdc & bus::LCDC_OBJ_SIZE != 0;
        let height = if tall { 16 } else { 8 };

        let vram = bus.vram();
        let oam = bus.oam();
        let line = ly as i32;

        for entry in oam.chunks_exact(4) {
            if self.sprites_drawn[ly as usize] >= Self::SPRITES_PER_LINE {
                break;
            }

            // OAM coordinates are offset so sprites can hang off the
            // top-left edge
            let y = entry[0] as i32 - 16;
            let x = entry[1] as i32 - 8;
            let tile = entry[2];
            let attr = entry[3];

            if line < y || line >= y + height {
                continue;
            }

            let flip_x = attr & (1 << 5) != 0;
            let flip_y = attr & (1 << 6) != 0;
            let behind_bg = attr & (1 << 7) != 0;

            let (bank, palette) = match self.mode {
                HardwareMode::Cgb => ((attr >> 3) & 1, *self.palettes.obj(attr & 0x7)),
                HardwareMode::Dmg => (0, *self.palettes.obj((attr >> 4) & 1)),
            };

            let priority = if behind_bg {
                // Behind background colors 1-3, but over background color 0
                frame::PRIORITY_OBJ_BEHIND_BG
            } else {
                frame::PRIORITY_OBJ
            };

            if tall {
                // Low tile index bit is ignored; vertical flip swaps which
                // tile is the top half
                let (top, bottom) = if flip_y {
                    (tile | 0x01, tile & 0xFE)
                } else {
                    (tile & 0xFE, tile | 0x01)
                };

                let (half, row) = if line < y + 8 {
                    (top, (line - y) as usize)
                } else {
                    (bottom, (line - y - 8) as usize)
                };

                self.blit_sprite_row(vram, ly, x, row, bank, half, flip_x, flip_y, palette, priority);
            } else {
                let row = (line - y) as usize;
                self.blit_sprite_row(vram, ly, x, row, bank, tile, flip_x, flip_y, palette, priority);
            }

            self.sprites_drawn[ly as usize] += 1;
        }
    }

    /// Read a tile map entry plus, on color hardware, its attribute byte
    /// from the same offset in VRAM bank 1.
    fn map_entry(&self, vram: &[u8], map_index: usize, signed_indexing: bool) -> (usize, u8) {
        let raw = vram[map_index];

        let tile_index = if signed_indexing {
            // Rebase into the second pattern table at 0x1000
            (256 + raw as i8 as i16) as usize
        } else {
            raw as usize
        };

        let attr = match self.mode {
            HardwareMode::Cgb => vram[tile::VRAM_BANK_SIZE + map_index],
            HardwareMode::Dmg => 0,
        };

        (tile_index, attr)
    }

    /// Draw one row of a background or window tile.
    ///
    /// `base_priority` 0 selects the background rule: opaque color 0 sits
    /// below everything a sprite may cover, other colors above
    /// behind-background sprites. Any other value is used as-is.
    fn blit_map_row(
        &mut self,
        vram: &[u8],
        ly: u8,
        screen_x: i32,
        row: usize,
        tile_index: usize,
        attr: u8,
        base_priority: u8,
    ) {
        let palette_index = attr & 0x7;
        let bank = (attr >> 3) & 1;
        let flip_x = attr & (1 << 5) != 0;
        let flip_y = attr & (1 << 6) != 0;

        let palette = *self.palettes.bg(palette_index);
        let pixels = tile::tile_row(vram, bank, tile_index, row, flip_x, flip_y);

        for (px, &index) in pixels.iter().enumerate() {
            let x = screen_x + px as i32;
            if x < 0 || x >= LCD_WIDTH as i32 {
                continue;
            }

            let priority = if base_priority != 0 {
                base_priority
            } else if index == 0 {
                frame::PRIORITY_BG_COLOR0
            } else {
                frame::PRIORITY_BG
            };

            self.frame.set(x as usize, ly as usize, priority, palette.color(index));
        }
    }

    /// Draw one row of a sprite tile. Color index 0 is transparent.
    #[allow(clippy::too_many_arguments)]
    fn blit_sprite_row(
        &mut self,
        vram: &[u8],
        ly: u8,
        screen_x: i32,
        row: usize,
        bank: u8,
        tile_index: u8,
        flip_x: bool,
        flip_y: bool,
        palette: Palette,
        priority: u8,
    ) {
        let pixels = tile::tile_row(vram, bank, tile_index as usize, row, flip_x, flip_y);

        for (px, &index) in pixels.iter().enumerate() {
            let x = screen_x + px as i32;
            if x < 0 || x >= LCD_WIDTH as i32 {
                continue;
            }

            if index == 0 {
                continue;
            }

            self.frame.set(x as usize, ly as usize, priority, palette.color(index));
        }
    }
}
