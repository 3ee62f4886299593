use crate::converter::{Cell, Conversion, MAX_CELL_PIXELS, MAX_PALETTE_COLORS};
use crate::encoder::{mask_len, render, Header};
use crate::error::{CtifError, Result};
use image::{Rgb, RgbImage};

#[derive(Debug)]
pub struct Decoded {
    pub header: Header,
    pub palette: Vec<Rgb<u8>>,
    pub conversion: Conversion,
    pub image: RgbImage,
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let chunk = self
            .bytes
            .get(self.pos..self.pos + len)
            .ok_or_else(|| CtifError::Format(format!("unexpected end of stream at {}", self.pos)))?;
        self.pos += len;
        Ok(chunk)
    }

    fn byte(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }
}

/// Parses a CTIF stream and renders it.
///
/// The stream does not carry the palette length, so `base_palette` must be
/// the platform palette the stream was encoded for. A palette table in the
/// stream replaces its leading entries.
pub fn decode(bytes: &[u8], base_palette: &[Rgb<u8>]) -> Result<Decoded> {
    if base_palette.len() < 2 {
        return Err(CtifError::PaletteTooSmall {
            len: base_palette.len(),
        });
    }
    if base_palette.len() > MAX_PALETTE_COLORS {
        return Err(CtifError::PaletteTooLarge {
            len: base_palette.len(),
        });
    }
    let header = Header::parse(bytes)?;
    let pixels = header.pixels_per_cell();
    if pixels == 0 {
        return Err(CtifError::EmptyCell);
    }
    if pixels > MAX_CELL_PIXELS {
        return Err(CtifError::CellTooLarge { pixels });
    }

    let mut reader = Reader {
        bytes,
        pos: Header::LEN,
    };
    let mut palette = base_palette.to_vec();
    for i in 0..header.palette_len as usize {
        let entry = reader.take(header.entry_size as usize)?;
        if let Some(slot) = palette.get_mut(i) {
            *slot = Rgb([entry[0], entry[1], entry[2]]);
        }
    }

    let count = header.width as usize * header.height as usize;
    let mut cells = Vec::with_capacity(count);
    for _ in 0..count {
        let cell = read_cell(&mut reader, &header, palette.len(), pixels)?;
        for index in [cell.bg, cell.fg] {
            if index as usize >= palette.len() {
                return Err(CtifError::Format(format!(
                    "palette index {index} out of range"
                )));
            }
        }
        cells.push(cell);
    }
    if reader.pos != bytes.len() {
        return Err(CtifError::Format(format!(
            "{} trailing bytes",
            bytes.len() - reader.pos
        )));
    }

    let conversion = Conversion {
        width: header.width as u32,
        height: header.height as u32,
        cells,
    };
    let image = render(
        &conversion,
        header.cell_width as u32,
        header.cell_height as u32,
        &palette,
    );
    Ok(Decoded {
        header,
        palette,
        conversion,
        image,
    })
}

fn read_mask(reader: &mut Reader, pixels: usize) -> Result<u64> {
    let mut bytes = [0u8; 8];
    bytes[..mask_len(pixels)].copy_from_slice(reader.take(mask_len(pixels))?);
    Ok(u64::from_le_bytes(bytes) & (u64::MAX >> (64 - pixels)))
}

/// Cells of one or two pixels carry no mask; it follows from the indices.
fn read_cell(reader: &mut Reader, header: &Header, colors: usize, pixels: usize) -> Result<Cell> {
    if colors == 2 {
        return Ok(Cell {
            bg: 0,
            fg: 1,
            mask: read_mask(reader, pixels)?,
        });
    }

    let (bg, fg) = if pixels == 1 {
        let fg = reader.byte()?;
        (fg, fg)
    } else if header.index_bits == 4 {
        let byte = reader.byte()?;
        (byte >> 4, byte & 0x0f)
    } else {
        (reader.byte()?, reader.byte()?)
    };

    let mask = match pixels {
        1 => 0,
        2 => 0b10,
        _ => read_mask(reader, pixels)?,
    };
    let mask = if bg == fg { 0 } else { mask };
    Ok(Cell { bg, fg, mask })
}
