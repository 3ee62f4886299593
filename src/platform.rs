use image::Rgb;
use std::fmt;
use std::str::FromStr;

const COMPUTERCRAFT_PALETTE: [u32; 16] = [
    0xf0f0f0, 0xf2b233, 0xe57fd8, 0x99b2f2, 0xdede6c, 0x7fcc19, 0xf2b2cc, 0x4c4c4c, //
    0x999999, 0x4c99b2, 0xb266e5, 0x3366cc, 0x7f664c, 0x57a64e, 0xcc4c4c, 0x0c0c0c,
];

const ZX_SPECTRUM_PALETTE: [u32; 8] = [
    0x000000, 0x0000ff, 0xff0000, 0xff00ff, 0x00ff00, 0x00ffff, 0xffff00, 0xffffff,
];

const ZX_SPECTRUM_DARK_MASK: u32 = 0xd7d7d7;

fn rgb(value: u32) -> Rgb<u8> {
    Rgb([(value >> 16) as u8, (value >> 8) as u8, value as u8])
}

/// How a platform wants equivalent (bg, fg, mask) triples written.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Quirk {
    /// The last pixel of a cell must be background: a set low mask bit swaps
    /// the colors and complements the mask.
    LowBitSwap,
    /// Cells with more than two pixels keep `bg <= fg`.
    SortedIndices,
}

/// Coarse RGB grid of palette entries used to pick per-cell candidate colors.
///
/// Entry `offset + (r * g_levels + g) * b_levels + b` holds the color at level
/// `(r, g, b)`; every entry below `offset` is always a candidate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ColorCube {
    pub offset: usize,
    pub levels: [usize; 3],
}

impl ColorCube {
    pub fn len(&self) -> usize {
        self.levels.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Marks the entries bracketing `color` on every channel.
    pub fn mark_candidates(&self, color: Rgb<u8>, marks: &mut [bool]) {
        let fixed = self.offset.min(marks.len());
        marks[..fixed].fill(true);
        let bounds: [(usize, usize); 3] = std::array::from_fn(|i| {
            let steps = self.levels[i].saturating_sub(1);
            let lo = color.0[i] as usize * steps / 255;
            let hi = (color.0[i] as usize * steps).div_ceil(255);
            (lo, hi)
        });
        for r in [bounds[0].0, bounds[0].1] {
            for g in [bounds[1].0, bounds[1].1] {
                for b in [bounds[2].0, bounds[2].1] {
                    let index =
                        self.offset + (r * self.levels[1] + g) * self.levels[2] + b;
                    if let Some(mark) = marks.get_mut(index) {
                        *mark = true;
                    }
                }
            }
        }
    }
}

/// Everything the converter needs to know about a target.
#[derive(Clone, Debug, PartialEq)]
pub struct PlatformSpec {
    pub id: u16,
    pub cell_width: u32,
    pub cell_height: u32,
    /// Screen width in cells.
    pub width: u32,
    /// Largest accepted height in cells.
    pub height: u32,
    /// Physical screen height in cells, used for the aspect ratio and pixel budget.
    pub real_height: u32,
    pub palette: Vec<Rgb<u8>>,
    /// Leading palette entries that may be replaced by generated colors.
    pub custom_colors: usize,
    pub quirk: Quirk,
    /// Pairs with one index at or above the split and one below it are forbidden.
    pub pair_split: Option<usize>,
    pub color_cube: Option<ColorCube>,
}

impl PlatformSpec {
    /// A platform without screen limits, handy for library use and tests.
    pub fn custom(cell_width: u32, cell_height: u32, palette: Vec<Rgb<u8>>) -> Self {
        Self {
            id: 0,
            cell_width,
            cell_height,
            width: u16::MAX as u32,
            height: u16::MAX as u32,
            real_height: u16::MAX as u32,
            palette,
            custom_colors: 0,
            quirk: Quirk::SortedIndices,
            pair_split: None,
            color_cube: None,
        }
    }

    #[inline]
    pub fn pixels_per_cell(&self) -> usize {
        (self.cell_width * self.cell_height) as usize
    }

    pub fn max_width_px(&self) -> u32 {
        self.width * self.cell_width
    }

    pub fn max_height_px(&self) -> u32 {
        self.height * self.cell_height
    }

    pub fn max_pixels(&self) -> u64 {
        self.width as u64 * self.real_height as u64 * self.pixels_per_cell() as u64
    }

    pub fn default_aspect_ratio(&self) -> f32 {
        self.width as f32 / self.real_height as f32
    }

    #[inline]
    pub fn pair_allowed(&self, c1: usize, c2: usize) -> bool {
        match self.pair_split {
            Some(split) => (c1 >= split) == (c2 >= split),
            None => true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Platform {
    ComputerCraft,
    ComputerCraftPaletted,
    OpenComputersTier2,
    OpenComputersTier3,
    ZxSpectrum,
    ZxSpectrumDark,
    ZxSpectrumBright,
}

impl Platform {
    pub const ALL: [Platform; 7] = [
        Platform::ComputerCraft,
        Platform::ComputerCraftPaletted,
        Platform::OpenComputersTier2,
        Platform::OpenComputersTier3,
        Platform::ZxSpectrum,
        Platform::ZxSpectrumDark,
        Platform::ZxSpectrumBright,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Platform::ComputerCraft => "cc",
            Platform::ComputerCraftPaletted => "cc-paletted",
            Platform::OpenComputersTier2 => "oc-tier2",
            Platform::OpenComputersTier3 => "oc-tier3",
            Platform::ZxSpectrum => "zxspectrum",
            Platform::ZxSpectrumDark => "zxspectrum-dark",
            Platform::ZxSpectrumBright => "zxspectrum-bright",
        }
    }

    pub fn spec(&self) -> PlatformSpec {
        match self {
            Platform::ComputerCraft | Platform::ComputerCraftPaletted => PlatformSpec {
                id: 2,
                cell_width: 2,
                cell_height: 3,
                width: 164,
                height: 81,
                real_height: 81,
                palette: COMPUTERCRAFT_PALETTE.map(rgb).to_vec(),
                custom_colors: if *self == Platform::ComputerCraftPaletted {
                    16
                } else {
                    0
                },
                quirk: Quirk::LowBitSwap,
                pair_split: None,
                color_cube: None,
            },
            Platform::OpenComputersTier2 | Platform::OpenComputersTier3 => {
                let tier3 = *self == Platform::OpenComputersTier3;
                let width = if tier3 { 160 } else { 80 };
                PlatformSpec {
                    id: 1,
                    cell_width: 2,
                    cell_height: 4,
                    width,
                    height: width,
                    real_height: if tier3 { 50 } else { 25 },
                    palette: open_computers_palette(tier3),
                    custom_colors: 16,
                    quirk: Quirk::SortedIndices,
                    pair_split: None,
                    color_cube: tier3.then_some(ColorCube {
                        offset: 16,
                        levels: [6, 8, 5],
                    }),
                }
            }
            Platform::ZxSpectrum | Platform::ZxSpectrumDark | Platform::ZxSpectrumBright => {
                let bright = ZX_SPECTRUM_PALETTE.map(rgb);
                let dark = ZX_SPECTRUM_PALETTE.map(|c| rgb(c & ZX_SPECTRUM_DARK_MASK));
                let (palette, pair_split) = match self {
                    Platform::ZxSpectrum => (bright.to_vec(), None),
                    Platform::ZxSpectrumDark => (dark.to_vec(), None),
                    _ => ([dark, bright].concat(), Some(8)),
                };
                PlatformSpec {
                    id: 3,
                    cell_width: 8,
                    cell_height: 8,
                    width: 32,
                    height: 24,
                    real_height: 24,
                    palette,
                    custom_colors: 0,
                    quirk: Quirk::SortedIndices,
                    pair_split,
                    color_cube: None,
                }
            }
        }
    }
}

fn open_computers_palette(tier3: bool) -> Vec<Rgb<u8>> {
    let greys = (0..16u8).map(|i| Rgb([17 * i, 17 * i, 17 * i]));
    let cube = (0..240usize).map(|i| {
        Rgb([
            ((i / 40) % 6 * 255 / 5) as u8,
            ((i / 5) % 8 * 255 / 7) as u8,
            (i % 5 * 255 / 4) as u8,
        ])
    });
    if tier3 {
        greys.chain(cube).collect()
    } else {
        greys.collect()
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Platform::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("invalid mode: {s}"))
    }
}
