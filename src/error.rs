use thiserror::Error;

pub type Result<T> = std::result::Result<T, CtifError>;

#[derive(Debug, Error)]
pub enum CtifError {
    #[error("Image is empty")]
    EmptyImage,

    #[error("Image size {width}x{height} is not a multiple of the {cell_width}x{cell_height} cell")]
    UnalignedImage {
        width: u32,
        height: u32,
        cell_width: u32,
        cell_height: u32,
    },

    #[error("Cell has no pixels")]
    EmptyCell,

    #[error("Cell has {pixels} pixels (max 64)")]
    CellTooLarge { pixels: usize },

    #[error("Palette has {len} colors (min 2)")]
    PaletteTooSmall { len: usize },

    #[error("Palette has {len} colors (max 256)")]
    PaletteTooLarge { len: usize },

    #[error("Palette has {len} colors but {free} free slots were requested")]
    FreeSlots { free: usize, len: usize },

    #[error("Palette generation needs at least one trial")]
    NoTrials,

    #[error("Dither matrix of size {size} cannot hold {len} elements")]
    DitherMatrix { size: usize, len: usize },

    #[error("Image of {width}x{height} cells does not fit the header")]
    TooManyCells { width: u32, height: u32 },

    #[error("Size too large: {width}x{height}")]
    SizeTooLarge { width: u32, height: u32 },

    #[error("Malformed CTIF stream: {0}")]
    Format(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}
