use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use dotmatrix::bus::{self, PpuBus};
use dotmatrix::tile::VRAM_BANK_SIZE;
use dotmatrix::{
    Error, FrameBuffer, HardwareMode, Interrupt, Ppu, Result, LCD_HEIGHT, LCD_WIDTH,
};

use sdl2::event::Event;
use sdl2::keyboard::Keycode;
use sdl2::pixels::Color;
use sdl2::render::{Canvas, Texture, TextureAccess};
use sdl2::video::Window;

use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(about = "Demo harness for the dotmatrix PPU")]
struct Args {
    #[structopt(default_value = "4", long)]
    scale: u32,

    #[structopt(default_value = "1", long)]
    speed: u8,

    /// Run the monochrome pipeline instead of the color one
    #[structopt(long)]
    dmg: bool,

    /// Preload VRAM from a raw dump instead of the built-in scene
    #[structopt(parse(from_os_str), long)]
    vram: Option<PathBuf>,
}

/// Array-backed host: the VRAM, OAM, and register file the PPU borrows.
///
/// A real console would put an MMU here; the demo just owns the memory
/// directly and collects interrupt requests into a flag byte.
struct Machine {
    vram: Vec<u8>,
    oam: [u8; 160],
    registers: [u8; 0x80],
    mode: HardwareMode,

    /// Pending interrupt-request bits: bit 0 VBlank, bit 1 LCD status
    int_flags: u8,
}

impl Machine {
    fn new(mode: HardwareMode) -> Self {
        Self {
            vram: vec![0u8; VRAM_BANK_SIZE * 2],
            oam: [0u8; 160],
            registers: [0u8; 0x80],
            mode,
            int_flags: 0,
        }
    }

    fn set_register(&mut self, addr: u16, value: u8) {
        self.registers[(addr - 0xFF00) as usize] = value;
    }

    fn register(&self, addr: u16) -> u8 {
        self.registers[(addr - 0xFF00) as usize]
    }
}

impl PpuBus for Machine {
    fn read_register(&self, addr: u16) -> u8 {
        match addr {
            0xFF00..=0xFF7F => self.registers[(addr - 0xFF00) as usize],
            _ => 0,
        }
    }

    fn write_register(&mut self, addr: u16, value: u8) {
        if let 0xFF00..=0xFF7F = addr {
            self.registers[(addr - 0xFF00) as usize] = value;
        }
    }

    fn vram(&self) -> &[u8] {
        &self.vram
    }

    fn oam(&self) -> &[u8] {
        &self.oam
    }

    fn hardware_mode(&self) -> HardwareMode {
        self.mode
    }

    fn header_checksum(&self) -> u8 {
        // Picks the grayscale compatibility palette in DMG mode
        0
    }

    fn raise_interrupt(&mut self, interrupt: Interrupt) {
        match interrupt {
            Interrupt::Vblank => self.int_flags |= 1 << 0,
            Interrupt::LcdStat => self.int_flags |= 1 << 1,
        }
    }
}

/// Load a raw VRAM image (at most 16 KiB) over the scene.
fn load_vram_dump(path: &PathBuf, vram: &mut [u8]) -> Result<()> {
    let mut file = File::open(path)?;
    let mut data = Vec::new();
    file.read_to_end(&mut data)?;

    if data.len() > vram.len() {
        return Err(Error::InvalidValue(format!(
            "VRAM dump is {} bytes; expected at most {}",
            data.len(),
            vram.len()
        )));
    }

    vram[..data.len()].copy_from_slice(&data);

    Ok(())
}

/// Write one tile's 16 bytes into VRAM bank 0.
fn set_tile(vram: &mut [u8], tile_index: usize, rows: &[[u8; 2]; 8]) {
    let base = tile_index * 16;
    for (i, row) in rows.iter().enumerate() {
        vram[base + i * 2] = row[0];
        vram[base + i * 2 + 1] = row[1];
    }
}

/// Build the deterministic demo scene: a scrolling checkerboard, a window
/// banner along the bottom, and two sprites.
fn build_scene(machine: &mut Machine) {
    // Tile 1: checkerboard of colors 1 and 2
    set_tile(
        &mut machine.vram,
        1,
        &[
            [0xF0, 0x0F],
            [0xF0, 0x0F],
            [0xF0, 0x0F],
            [0xF0, 0x0F],
            [0x0F, 0xF0],
            [0x0F, 0xF0],
            [0x0F, 0xF0],
            [0x0F, 0xF0],
        ],
    );

    // Tile 2: solid color 3 with a color-0 border, used by the window
    set_tile(
        &mut machine.vram,
        2,
        &[
            [0x00, 0x00],
            [0x7E, 0x7E],
            [0x7E, 0x7E],
            [0x7E, 0x7E],
            [0x7E, 0x7E],
            [0x7E, 0x7E],
            [0x7E, 0x7E],
            [0x00, 0x00],
        ],
    );

    // Tile 3: filled circle-ish blob for the sprites
    set_tile(
        &mut machine.vram,
        3,
        &[
            [0x3C, 0x3C],
            [0x7E, 0x7E],
            [0xFF, 0xFF],
            [0xFF, 0xFF],
            [0xFF, 0xFF],
            [0xFF, 0xFF],
            [0x7E, 0x7E],
            [0x3C, 0x3C],
        ],
    );

    // Background map: checkerboard tiles on even cells
    for y in 0..32 {
        for x in 0..32 {
            machine.vram[0x1800 + y * 32 + x] = ((x + y) % 2) as u8;
        }
    }

    // Window map: banner tiles everywhere
    for i in 0..32 * 32 {
        machine.vram[0x1C00 + i] = 2;
    }

    // Two sprites, the second behind the background
    machine.oam[0..4].copy_from_slice(&[40, 40, 3, 0]);
    machine.oam[4..8].copy_from_slice(&[60, 80, 3, 1 << 7]);

    machine.set_register(
        bus::LCDC_ADDR,
        bus::LCDC_DISPLAY_ENABLE
            | bus::LCDC_WINDOW_TILE_MAP_SELECT
            | bus::LCDC_WINDOW_ENABLE
            | bus::LCDC_TILE_DATA_SELECT
            | bus::LCDC_OBJ_ENABLE
            | bus::LCDC_BG_ENABLE,
    );
    machine.set_register(bus::WY_ADDR, 128);
    machine.set_register(bus::WX_ADDR, 7);
}

/// Seed the palettes for whichever pipeline is running.
fn set_palettes(ppu: &mut Ppu, mode: HardwareMode) {
    match mode {
        HardwareMode::Dmg => {
            ppu.palettes_mut().set_dmg_bg(0xE4);
            ppu.palettes_mut().set_dmg_obj0(0xE4);
            ppu.palettes_mut().set_dmg_obj1(0xE4);
        }
        HardwareMode::Cgb => {
            // Background palette 0: white, teal, navy, black
            let bg: [u16; 4] = [0x7FFF, 0x5EC5, 0x2C41, 0x0000];
            // Sprite palette 0: unused, amber ramp
            let obj: [u16; 4] = [0x0000, 0x1E7F, 0x0DF1, 0x0000];

            for (i, word) in bg.iter().enumerate() {
                let [lo, hi] = word.to_le_bytes();
                ppu.palettes_mut().write_cgb_bg(i * 2, lo);
                ppu.palettes_mut().write_cgb_bg(i * 2 + 1, hi);
            }

            for (i, word) in obj.iter().enumerate() {
                let [lo, hi] = word.to_le_bytes();
                ppu.palettes_mut().write_cgb_obj(i * 2, lo);
                ppu.palettes_mut().write_cgb_obj(i * 2 + 1, hi);
            }
        }
    }
}

/// Renders a completed frame to the SDL canvas using a texture as the
/// render target, then presents the canvas.
fn render_frame(frame: &FrameBuffer, canvas: &mut Canvas<Window>, texture: &mut Texture) {
    canvas
        .with_texture_canvas(texture, |canvas| {
            canvas.set_draw_color(Color::BLACK);
            canvas.clear();

            for y in 0..LCD_HEIGHT {
                for x in 0..LCD_WIDTH {
                    // The top byte of each cell is a compositor artifact;
                    // color_at masks it off
                    let color = frame.color_at(x, y);
                    let red = (color >> 16) as u8;
                    let green = (color >> 8) as u8;
                    let blue = color as u8;

                    canvas.set_draw_color(Color::RGB(red, green, blue));
                    canvas.draw_point((x as i32, y as i32)).unwrap();
                }
            }
        })
        .unwrap();

    canvas.copy(&texture, None, None).unwrap();
    canvas.present();
}

fn run(args: Args) -> Result<()> {
    let mode = if args.dmg {
        HardwareMode::Dmg
    } else {
        HardwareMode::Cgb
    };

    let mut machine = Machine::new(mode);
    build_scene(&mut machine);

    if let Some(path) = &args.vram {
        load_vram_dump(path, &mut machine.vram)?;
    }

    let mut ppu = Ppu::new(&machine);
    set_palettes(&mut ppu, mode);

    let sdl_context = sdl2::init().unwrap();
    let video_subsystem = sdl_context.video().unwrap();

    let width = LCD_WIDTH as u32 * args.scale;
    let height = LCD_HEIGHT as u32 * args.scale;

    let window = video_subsystem
        .window("dotmatrix", width, height)
        .position_centered()
        .allow_highdpi()
        .build()
        .unwrap();

    let mut canvas = window.into_canvas().software().build().unwrap();
    canvas.set_logical_size(width, height).unwrap();

    let texture_creator = canvas.texture_creator();
    let mut texture = texture_creator
        .create_texture(
            None,
            TextureAccess::Target,
            LCD_WIDTH as u32,
            LCD_HEIGHT as u32,
        )
        .unwrap();

    let mut paused = false;

    // More accurate sleep, especially on Windows
    let sleeper = spin_sleep::SpinSleeper::default();
    let frame_duration = Duration::from_nanos(Ppu::FRAME_DURATION / args.speed as u64);

    let mut event_pump = sdl_context.event_pump().unwrap();
    'running: loop {
        let frame_start = Instant::now();

        for event in event_pump.poll_iter() {
            match event {
                Event::Quit { .. }
                | Event::KeyDown {
                    keycode: Some(Keycode::Escape),
                    ..
                } => break 'running,
                Event::KeyDown {
                    keycode: Some(Keycode::P),
                    ..
                } => {
                    paused = !paused;
                }
                _ => (),
            }
        }

        if !paused {
            // A frame's worth of scanlines; the PPU reads LY back from the
            // register file, so this picks up exactly where it left off
            ppu.tick(Ppu::CYCLES_PER_FRAME, &mut machine);

            // Drift the background so the scroll path gets exercised
            let scx = machine.register(bus::SCX_ADDR).wrapping_add(1);
            machine.set_register(bus::SCX_ADDR, scx);
            if scx % 4 == 0 {
                let scy = machine.register(bus::SCY_ADDR).wrapping_add(1);
                machine.set_register(bus::SCY_ADDR, scy);
            }

            if machine.int_flags & 0x1 != 0 {
                render_frame(ppu.frame_buffer(), &mut canvas, &mut texture);
            }
            machine.int_flags = 0;
        }

        let elapsed = frame_start.elapsed();

        log::debug!("Frame duration: {:?}", elapsed);

        if elapsed < frame_duration {
            sleeper.sleep(frame_duration - elapsed);
        }
    }

    Ok(())
}

fn main() {
    env_logger::init();

    let args = Args::from_args();

    if args.speed == 0 || args.speed > 5 {
        eprintln!("Error: supported speed range is 1-5x");
        return;
    }

    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
