pub mod bus;
pub mod error;
pub mod frame;
pub mod palette;
pub mod ppu;
pub mod tile;

pub use bus::{HardwareMode, Interrupt, PpuBus};
pub use error::{Error, Result};
pub use frame::{Display, FrameBuffer, LCD_HEIGHT, LCD_WIDTH};
pub use palette::{Color, Palette, PaletteStore};
pub use ppu::Ppu;
