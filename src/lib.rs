pub mod colorspace;
pub mod converter;
pub mod decoder;
pub mod dither;
pub mod encoder;
pub mod error;
pub mod palette;
pub mod platform;
pub mod resize;

pub use colorspace::Colorspace;
pub use converter::{Cell, Conversion, ConvertOptions, Converter};
pub use decoder::{decode, Decoded};
pub use dither::{DitherMatrix, DitherMode};
pub use encoder::{CtifEncoder, Header};
pub use error::{CtifError, Result};
pub use palette::{GeneratedPalette, PaletteGenerator, PaletteOptions};
pub use platform::{Platform, PlatformSpec, Quirk};
pub use resize::SizeRequest;
