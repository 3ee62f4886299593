use crate::converter::{Cell, Conversion};
use crate::error::{CtifError, Result};
use crate::platform::PlatformSpec;
use image::{Rgb, RgbImage};
use log::info;
use std::io::Write;
use std::time::Instant;

pub const MAGIC: &[u8; 4] = b"CTIF";
pub const VERSION: u8 = 1;
/// Number of leading palette entries stored by custom-color platforms.
pub const PALETTE_TABLE_LEN: usize = 16;

/// Fixed-size stream header. Multi-byte fields are little-endian.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    pub platform_id: u16,
    /// Width in cells.
    pub width: u16,
    /// Height in cells.
    pub height: u16,
    pub cell_width: u8,
    pub cell_height: u8,
    /// 4 for palettes of up to 16 colors, 8 otherwise.
    pub index_bits: u8,
    /// 3 when a palette table follows the header, 0 otherwise.
    pub entry_size: u8,
    pub palette_len: u8,
}

impl Header {
    pub const LEN: usize = 18;

    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut bytes = [0u8; Self::LEN];
        bytes[..4].copy_from_slice(MAGIC);
        bytes[4] = VERSION;
        bytes[5] = 0;
        bytes[6..8].copy_from_slice(&self.platform_id.to_le_bytes());
        bytes[8..10].copy_from_slice(&self.width.to_le_bytes());
        bytes[10..12].copy_from_slice(&self.height.to_le_bytes());
        bytes[12] = self.cell_width;
        bytes[13] = self.cell_height;
        bytes[14] = self.index_bits;
        bytes[15] = self.entry_size;
        bytes[16] = self.palette_len;
        bytes
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::LEN {
            return Err(CtifError::Format(format!(
                "header needs {} bytes, got {}",
                Self::LEN,
                bytes.len()
            )));
        }
        if &bytes[..4] != MAGIC {
            return Err(CtifError::Format("bad magic".into()));
        }
        if bytes[4] != VERSION {
            return Err(CtifError::Format(format!("unsupported version {}", bytes[4])));
        }
        let header = Self {
            platform_id: u16::from_le_bytes([bytes[6], bytes[7]]),
            width: u16::from_le_bytes([bytes[8], bytes[9]]),
            height: u16::from_le_bytes([bytes[10], bytes[11]]),
            cell_width: bytes[12],
            cell_height: bytes[13],
            index_bits: bytes[14],
            entry_size: bytes[15],
            palette_len: bytes[16],
        };
        if !matches!(header.index_bits, 4 | 8) {
            return Err(CtifError::Format(format!(
                "invalid index size {}",
                header.index_bits
            )));
        }
        if header.palette_len > 0 && header.entry_size != 3 {
            return Err(CtifError::Format(format!(
                "invalid palette entry size {}",
                header.entry_size
            )));
        }
        Ok(header)
    }

    pub fn pixels_per_cell(&self) -> usize {
        self.cell_width as usize * self.cell_height as usize
    }
}

/// Number of bytes a cell mask of `pixels` bits occupies.
#[inline]
pub fn mask_len(pixels: usize) -> usize {
    pixels.div_ceil(8)
}

/// Serializes conversions for one platform and palette.
#[derive(Debug)]
pub struct CtifEncoder<'a> {
    spec: &'a PlatformSpec,
    palette: &'a [Rgb<u8>],
}

impl<'a> CtifEncoder<'a> {
    pub fn new(spec: &'a PlatformSpec, palette: &'a [Rgb<u8>]) -> Self {
        Self { spec, palette }
    }

    pub fn header(&self, conversion: &Conversion) -> Result<Header> {
        let (width, height) = (conversion.width, conversion.height);
        let (Ok(w), Ok(h)) = (u16::try_from(width), u16::try_from(height)) else {
            return Err(CtifError::TooManyCells { width, height });
        };
        let custom = self.spec.custom_colors > 0;
        Ok(Header {
            platform_id: self.spec.id,
            width: w,
            height: h,
            cell_width: self.spec.cell_width as u8,
            cell_height: self.spec.cell_height as u8,
            index_bits: if self.palette.len() <= 16 { 4 } else { 8 },
            entry_size: if custom { 3 } else { 0 },
            palette_len: if custom { PALETTE_TABLE_LEN as u8 } else { 0 },
        })
    }

    pub fn encode<W: Write>(&self, conversion: &Conversion, w: &mut W) -> Result<()> {
        let start_time = Instant::now();
        let header = self.header(conversion)?;
        w.write_all(&header.to_bytes())?;

        if header.palette_len > 0 {
            let table = self
                .palette
                .get(..PALETTE_TABLE_LEN)
                .ok_or(CtifError::PaletteTooSmall {
                    len: self.palette.len(),
                })?;
            for color in table {
                w.write_all(&color.0)?;
            }
        }

        let pixels = self.spec.pixels_per_cell();
        let mut record = Vec::with_capacity(2 + mask_len(pixels));
        for cell in &conversion.cells {
            record.clear();
            self.write_cell(cell, pixels, &mut record);
            w.write_all(&record)?;
        }

        info!(
            "Encoded CTIF: {}x{} cells, {}ms",
            header.width,
            header.height,
            start_time.elapsed().as_millis()
        );
        Ok(())
    }

    fn write_cell(&self, cell: &Cell, pixels: usize, out: &mut Vec<u8>) {
        if self.palette.len() > 2 {
            if pixels == 1 {
                out.push(cell.fg);
            } else if self.palette.len() <= 16 {
                out.push((cell.bg << 4) | cell.fg);
            } else {
                out.extend_from_slice(&[cell.bg, cell.fg]);
            }
            if pixels <= 2 {
                return;
            }
        }
        out.extend_from_slice(&cell.mask.to_le_bytes()[..mask_len(pixels)]);
    }

    /// What a decoder shows for `conversion`, at the source pixel size.
    pub fn preview(&self, conversion: &Conversion) -> RgbImage {
        render(
            conversion,
            self.spec.cell_width,
            self.spec.cell_height,
            self.palette,
        )
    }
}

pub(crate) fn render(
    conversion: &Conversion,
    cell_width: u32,
    cell_height: u32,
    palette: &[Rgb<u8>],
) -> RgbImage {
    let pixels = (cell_width * cell_height) as usize;
    RgbImage::from_fn(
        conversion.width * cell_width,
        conversion.height * cell_height,
        |x, y| {
            let cell = conversion.cell(x / cell_width, y / cell_height);
            let pixel = ((y % cell_height) * cell_width + x % cell_width) as usize;
            let index = if cell.uses_fg(pixel, pixels) {
                cell.fg
            } else {
                cell.bg
            };
            palette[index as usize]
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::{ConvertOptions, Converter};
    use crate::platform::Platform;

    const BLACK: Rgb<u8> = Rgb([0, 0, 0]);
    const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
    const RED: Rgb<u8> = Rgb([255, 0, 0]);
    const BLUE: Rgb<u8> = Rgb([0, 0, 255]);

    fn encode(spec: &PlatformSpec, palette: &[Rgb<u8>], img: &RgbImage) -> Vec<u8> {
        let converter = Converter::new(spec, palette, ConvertOptions::default()).unwrap();
        let conversion = converter.convert(img).unwrap();
        let mut out = Vec::new();
        CtifEncoder::new(spec, palette)
            .encode(&conversion, &mut out)
            .unwrap();
        out
    }

    #[test]
    fn solid_quadrants() {
        let palette = [BLACK, WHITE, RED, BLUE];
        let spec = PlatformSpec::custom(2, 2, palette.to_vec());
        let img = RgbImage::from_fn(4, 4, |x, y| if (x < 2) == (y < 2) { RED } else { BLUE });
        let out = encode(&spec, &palette, &img);

        let mut expected = vec![
            b'C', b'T', b'I', b'F', 1, 0, 0, 0, 2, 0, 2, 0, 2, 2, 4, 0, 0, 0,
        ];
        expected.extend_from_slice(&[0x22, 0x00, 0x33, 0x00, 0x33, 0x00, 0x22, 0x00]);
        assert_eq!(out, expected);
    }

    #[test]
    fn single_pixel_cells_have_no_mask() {
        let palette = [BLACK, WHITE, RED];
        let spec = PlatformSpec::custom(1, 1, palette.to_vec());
        let img = RgbImage::from_fn(3, 1, |x, _| palette[2 - x as usize]);
        let out = encode(&spec, &palette, &img);
        assert_eq!(&out[Header::LEN..], &[2, 1, 0]);
    }

    #[test]
    fn two_color_palette_writes_mask_only() {
        let palette = [BLACK, WHITE];
        let spec = PlatformSpec::custom(3, 3, palette.to_vec());
        // white everywhere except the last pixel of the cell
        let mut img = RgbImage::from_pixel(3, 3, WHITE);
        img.put_pixel(2, 2, BLACK);
        let out = encode(&spec, &palette, &img);
        assert_eq!(out.len(), Header::LEN + 2);
        assert_eq!(&out[Header::LEN..], &[0b1111_1110, 0b1]);
    }

    #[test]
    fn wide_palette_uses_two_index_bytes() {
        let spec = Platform::OpenComputersTier3.spec();
        let orange = spec.palette[236];
        let img = RgbImage::from_pixel(2, 4, orange);
        let out = encode(&spec, &spec.palette, &img);
        let header = Header::parse(&out).unwrap();
        assert_eq!(header.index_bits, 8);
        assert_eq!(header.palette_len, 16);
        let cells = &out[Header::LEN + 48..];
        assert_eq!(cells, &[236, 236, 0]);
    }

    #[test]
    fn custom_palette_table_is_rgb() {
        let spec = Platform::ComputerCraftPaletted.spec();
        let mut palette = spec.palette.clone();
        palette[0] = Rgb([1, 2, 3]);
        let img = RgbImage::from_pixel(2, 3, Rgb([1, 2, 3]));
        let out = encode(&spec, &palette, &img);
        let header = Header::parse(&out).unwrap();
        assert_eq!(header.platform_id, 2);
        assert_eq!((header.entry_size, header.palette_len), (3, 16));
        assert_eq!(&out[Header::LEN..Header::LEN + 3], &[1, 2, 3]);
        assert_eq!(out.len(), Header::LEN + 48 + 2);
    }

    #[test]
    fn preview_matches_cells() {
        let palette = [BLACK, WHITE, RED, BLUE];
        let spec = PlatformSpec::custom(2, 2, palette.to_vec());
        let img = RgbImage::from_fn(4, 2, |x, y| if (x + y) % 2 == 0 { RED } else { WHITE });
        let converter = Converter::new(&spec, &palette, ConvertOptions::default()).unwrap();
        let conversion = converter.convert(&img).unwrap();
        assert_eq!(CtifEncoder::new(&spec, &palette).preview(&conversion), img);
    }

    #[test]
    fn header_rejects_bad_magic() {
        let mut bytes = Header {
            platform_id: 1,
            width: 1,
            height: 1,
            cell_width: 2,
            cell_height: 4,
            index_bits: 4,
            entry_size: 0,
            palette_len: 0,
        }
        .to_bytes();
        assert!(Header::parse(&bytes).is_ok());
        bytes[0] = b'X';
        assert!(matches!(Header::parse(&bytes), Err(CtifError::Format(_))));
        assert!(Header::parse(&bytes[..10]).is_err());
    }
}
