use crate::colorspace::{distance_sq, Colorspace, Vec3};
use crate::dither::{DitherMatrix, DitherMode};
use crate::error::{CtifError, Result};
use crate::platform::{PlatformSpec, Quirk};
use image::{Rgb, RgbImage};
use log::{info, trace};
use rayon::prelude::*;
use std::time::Instant;

pub const MAX_CELL_PIXELS: usize = 64;
pub const MAX_PALETTE_COLORS: usize = 256;

/// Ordered dithering cost added per pixel for the squared distance between
/// the two colors of a pair.
const ORDERED_CONTRAST_PENALTY: f32 = 1.0 / 16.0;

#[derive(Clone, Debug, Default)]
pub struct ConvertOptions {
    pub colorspace: Colorspace,
    pub dither: DitherMode,
    /// 0 searches every palette pair, 1 adds the two-color vote shortcut for
    /// undithered output, 2 also narrows platforms with a color cube down to
    /// nearby colors.
    pub optimization: u8,
    /// Quantize cells on the rayon pool. Ignored for error diffusion.
    pub parallel: bool,
}

/// Final decision for one cell.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Cell {
    pub bg: u8,
    pub fg: u8,
    /// Bit `n - 1 - i` set means pixel `i` (row-major inside the cell) uses `fg`.
    pub mask: u64,
}

impl Cell {
    #[inline]
    pub fn uses_fg(&self, pixel: usize, pixels: usize) -> bool {
        self.mask & (1 << (pixels - 1 - pixel)) != 0
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Conversion {
    /// Width in cells.
    pub width: u32,
    /// Height in cells.
    pub height: u32,
    /// Row-major cell decisions.
    pub cells: Vec<Cell>,
}

impl Conversion {
    pub fn cell(&self, cx: u32, cy: u32) -> Cell {
        self.cells[(cy * self.width + cx) as usize]
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Candidate {
    c1: usize,
    c2: usize,
    mask: u64,
    error: f32,
}

/// Working buffers reused from cell to cell so the search does not allocate.
#[derive(Default)]
struct Scratch {
    pixels: Vec<Vec3>,
    work: Vec<Vec3>,
    errors: Vec<Vec3>,
    best_errors: Vec<Vec3>,
    candidates: Vec<usize>,
    marks: Vec<bool>,
    /// Pairs scored for the current cell.
    scored: usize,
}

pub struct Converter<'a> {
    spec: &'a PlatformSpec,
    palette: &'a [Rgb<u8>],
    colors: Vec<Vec3>,
    options: ConvertOptions,
}

impl<'a> Converter<'a> {
    pub fn new(
        spec: &'a PlatformSpec,
        palette: &'a [Rgb<u8>],
        options: ConvertOptions,
    ) -> Result<Self> {
        let pixels = spec.pixels_per_cell();
        if pixels == 0 {
            return Err(CtifError::EmptyCell);
        }
        if pixels > MAX_CELL_PIXELS {
            return Err(CtifError::CellTooLarge { pixels });
        }
        if palette.len() < 2 {
            return Err(CtifError::PaletteTooSmall { len: palette.len() });
        }
        if palette.len() > MAX_PALETTE_COLORS {
            return Err(CtifError::PaletteTooLarge { len: palette.len() });
        }
        let colors = palette
            .iter()
            .map(|c| options.colorspace.from_rgb(*c))
            .collect();
        Ok(Self {
            spec,
            palette,
            colors,
            options,
        })
    }

    #[inline]
    fn cell_size(&self) -> (usize, usize) {
        (self.spec.cell_width as usize, self.spec.cell_height as usize)
    }

    /// Picks a background/foreground pair and mask for every cell of `img`.
    pub fn convert(&self, img: &RgbImage) -> Result<Conversion> {
        let (width, height) = self.check_dimensions(img)?;
        let start_time = Instant::now();
        let colorspace = self.options.colorspace;
        let source: Vec<Vec3> = img.pixels().map(|p| colorspace.from_rgb(*p)).collect();

        let cells = match &self.options.dither {
            DitherMode::Diffusion(kernel) => {
                self.convert_diffused(img, source, kernel, width as usize, height as usize)
            }
            _ => self.convert_independent(img, &source, width as usize, height as usize),
        };

        info!(
            "Converted image: {width}x{height} cells, {}ms",
            start_time.elapsed().as_millis()
        );
        Ok(Conversion {
            width,
            height,
            cells,
        })
    }

    fn check_dimensions(&self, img: &RgbImage) -> Result<(u32, u32)> {
        let (cell_width, cell_height) = (self.spec.cell_width, self.spec.cell_height);
        if img.width() == 0 || img.height() == 0 {
            return Err(CtifError::EmptyImage);
        }
        if img.width() % cell_width != 0 || img.height() % cell_height != 0 {
            return Err(CtifError::UnalignedImage {
                width: img.width(),
                height: img.height(),
                cell_width,
                cell_height,
            });
        }
        let (width, height) = (img.width() / cell_width, img.height() / cell_height);
        if width > u16::MAX as u32 || height > u16::MAX as u32 {
            return Err(CtifError::TooManyCells { width, height });
        }
        Ok((width, height))
    }

    fn scratch(&self) -> Scratch {
        Scratch {
            marks: vec![false; self.colors.len()],
            ..Default::default()
        }
    }

    /// Cells do not influence each other, so they may be processed in any order.
    fn convert_independent(
        &self,
        img: &RgbImage,
        source: &[Vec3],
        width: usize,
        height: usize,
    ) -> Vec<Cell> {
        let quantize = |scratch: &mut Scratch, index: usize| {
            let (cx, cy) = ((index % width) as u32, (index / width) as u32);
            let mut pixels = std::mem::take(&mut scratch.pixels);
            self.gather(source, img.width() as usize, cx, cy, &mut pixels);
            let best = self.quantize(img, cx, cy, &pixels, scratch);
            scratch.pixels = pixels;
            self.finish(cx, cy, best)
        };
        if self.options.parallel {
            (0..width * height)
                .into_par_iter()
                .map_init(|| self.scratch(), quantize)
                .collect()
        } else {
            let mut scratch = self.scratch();
            (0..width * height)
                .map(|index| quantize(&mut scratch, index))
                .collect()
        }
    }

    /// Cells are visited strictly in row-major order: each one reads the
    /// error left by the cells above and to its left, then spreads its own
    /// error into `source` for the cells after it.
    fn convert_diffused(
        &self,
        img: &RgbImage,
        mut source: Vec<Vec3>,
        kernel: &DitherMatrix,
        width: usize,
        height: usize,
    ) -> Vec<Cell> {
        let mut scratch = self.scratch();
        let mut cells = Vec::with_capacity(width * height);
        let mut pixels = Vec::new();
        for cy in 0..height as u32 {
            for cx in 0..width as u32 {
                self.gather(&source, img.width() as usize, cx, cy, &mut pixels);
                let best = self.quantize(img, cx, cy, &pixels, &mut scratch);
                self.commit_errors(&mut source, img, cx, cy, kernel, &scratch.best_errors);
                cells.push(self.finish(cx, cy, best));
            }
        }
        cells
    }

    fn gather(&self, source: &[Vec3], img_width: usize, cx: u32, cy: u32, out: &mut Vec<Vec3>) {
        let (pw, ph) = self.cell_size();
        out.clear();
        for py in 0..ph {
            let row = (cy as usize * ph + py) * img_width + cx as usize * pw;
            out.extend_from_slice(&source[row..row + pw]);
        }
    }

    fn quantize(
        &self,
        img: &RgbImage,
        cx: u32,
        cy: u32,
        pixels: &[Vec3],
        scratch: &mut Scratch,
    ) -> Candidate {
        let mut candidates = std::mem::take(&mut scratch.candidates);
        self.collect_candidates(img, cx, cy, &mut candidates, &mut scratch.marks);

        let shortcut = if self.options.optimization >= 1 && self.options.dither == DitherMode::None
        {
            self.two_color_vote(pixels, &candidates)
        } else {
            None
        };
        let best = match shortcut {
            Some(best) => best,
            None => {
                scratch.scored = 0;
                let best = self.search(cx, cy, pixels, &candidates, scratch);
                trace!("{cx} {cy}: {} pairs scored", scratch.scored);
                best
            }
        };

        scratch.candidates = candidates;
        best
    }

    fn collect_candidates(
        &self,
        img: &RgbImage,
        cx: u32,
        cy: u32,
        candidates: &mut Vec<usize>,
        marks: &mut [bool],
    ) {
        candidates.clear();
        if let Some(cube) = self.spec.color_cube.filter(|_| self.options.optimization >= 2) {
            let (pw, ph) = (self.spec.cell_width, self.spec.cell_height);
            marks.fill(false);
            for py in 0..ph {
                for px in 0..pw {
                    cube.mark_candidates(*img.get_pixel(cx * pw + px, cy * ph + py), marks);
                }
            }
            candidates.extend(
                marks
                    .iter()
                    .enumerate()
                    .filter_map(|(i, &marked)| marked.then_some(i)),
            );
        }
        if candidates.is_empty() {
            candidates.extend(0..self.colors.len());
        }
    }

    /// Exhaustive pair search with branch-and-bound pruning. Candidate
    /// indices are ascending.
    fn search(
        &self,
        cx: u32,
        cy: u32,
        pixels: &[Vec3],
        candidates: &[usize],
        scratch: &mut Scratch,
    ) -> Candidate {
        let mut best = Candidate {
            c1: candidates[0],
            c2: candidates[0],
            mask: 0,
            error: f32::INFINITY,
        };

        // Solid cells only make sense when the indices are transmitted.
        if self.colors.len() > 2 {
            for &c in candidates {
                self.try_pair(c, c, cx, cy, pixels, &mut best, scratch);
                if best.error == 0.0 {
                    return best;
                }
            }
        }

        for (i1, &c1) in candidates.iter().enumerate().skip(1) {
            let start = candidates[..i1].partition_point(|&c2| !self.spec.pair_allowed(c1, c2));
            for &c2 in &candidates[start..i1] {
                self.try_pair(c1, c2, cx, cy, pixels, &mut best, scratch);
                if best.error == 0.0 {
                    return best;
                }
            }
        }
        best
    }

    #[allow(clippy::too_many_arguments)]
    fn try_pair(
        &self,
        c1: usize,
        c2: usize,
        cx: u32,
        cy: u32,
        pixels: &[Vec3],
        best: &mut Candidate,
        scratch: &mut Scratch,
    ) {
        scratch.scored += 1;
        let bound = best.error;
        let scored = match &self.options.dither {
            DitherMode::None => self.score_nearest(c1, c2, pixels, bound),
            DitherMode::Diffusion(kernel) => {
                self.score_diffused(c1, c2, pixels, kernel, bound, scratch)
            }
            DitherMode::Ordered { matrix, level } => {
                self.score_ordered(c1, c2, cx, cy, pixels, matrix, *level, bound)
            }
        };
        if let Some((error, mask)) = scored {
            *best = Candidate {
                c1,
                c2,
                mask,
                error,
            };
            if self.options.dither.is_diffusion() {
                std::mem::swap(&mut scratch.errors, &mut scratch.best_errors);
            }
        }
    }

    /// Each pixel takes the closer of the two colors. Returns `None` once the
    /// running error reaches `bound`.
    fn score_nearest(&self, c1: usize, c2: usize, pixels: &[Vec3], bound: f32) -> Option<(f32, u64)> {
        let (a, b) = (&self.colors[c1], &self.colors[c2]);
        let top = pixels.len() - 1;
        let mut error = 0.0;
        let mut mask = 0u64;
        for (i, p) in pixels.iter().enumerate() {
            let d1 = distance_sq(p, a);
            let d2 = distance_sq(p, b);
            if d2 < d1 {
                mask |= 1 << (top - i);
                error += d2;
            } else {
                error += d1;
            }
            if error >= bound {
                return None;
            }
        }
        Some((error, mask))
    }

    /// Like [`Self::score_nearest`], but every decision pushes its residual
    /// into the pixels still ahead in the cell and into `scratch.errors`, a
    /// cell-sized window with a border of `size - 1` pixels.
    fn score_diffused(
        &self,
        c1: usize,
        c2: usize,
        pixels: &[Vec3],
        kernel: &DitherMatrix,
        bound: f32,
        scratch: &mut Scratch,
    ) -> Option<(f32, u64)> {
        let (pw, ph) = self.cell_size();
        let (size, offset) = (kernel.size(), kernel.offset());
        let ew = pw + size - 1;
        let (a, b) = (&self.colors[c1], &self.colors[c2]);

        scratch.work.clear();
        scratch.work.extend_from_slice(pixels);
        scratch.errors.clear();
        scratch.errors.resize(ew * (ph + size - 1), [0.0; 3]);

        let top = pixels.len() - 1;
        let mut error = 0.0;
        let mut mask = 0u64;
        for i in 0..pixels.len() {
            let p = scratch.work[i];
            let d1 = distance_sq(&p, a);
            let d2 = distance_sq(&p, b);
            let chosen = if d2 < d1 {
                mask |= 1 << (top - i);
                error += d2;
                b
            } else {
                error += d1;
                a
            };
            if error >= bound {
                return None;
            }

            let residual = [p[0] - chosen[0], p[1] - chosen[1], p[2] - chosen[2]];
            let (qx, qy) = (i % pw, i / pw);
            for ky in offset..size {
                let ty = qy + ky - offset;
                for kx in 0..size {
                    let weight = kernel.get(kx, ky);
                    if weight == 0.0 {
                        continue;
                    }
                    // window coordinates, shifted right and down by `offset`
                    let ex = qx + kx;
                    add_scaled(&mut scratch.errors[(ty + offset) * ew + ex], &residual, weight);
                    if ex >= offset && ex - offset < pw && ty < ph {
                        add_scaled(&mut scratch.work[ty * pw + ex - offset], &residual, weight);
                    }
                }
            }
        }
        Some((error, mask))
    }

    fn commit_errors(
        &self,
        source: &mut [Vec3],
        img: &RgbImage,
        cx: u32,
        cy: u32,
        kernel: &DitherMatrix,
        errors: &[Vec3],
    ) {
        let (pw, ph) = self.cell_size();
        let (size, offset) = (kernel.size(), kernel.offset());
        let (img_width, img_height) = (img.width() as usize, img.height() as usize);
        let ew = pw + size - 1;
        for ey in 0..ph + size - 1 {
            let y = (cy as usize * ph + ey).wrapping_sub(offset);
            if y >= img_height {
                continue;
            }
            for ex in 0..ew {
                let x = (cx as usize * pw + ex).wrapping_sub(offset);
                if x >= img_width {
                    continue;
                }
                add_scaled(&mut source[y * img_width + x], &errors[ey * ew + ex], 1.0);
            }
        }
    }

    /// Projects each pixel onto the segment between the two colors and
    /// thresholds the blend ratio with the tiled matrix.
    #[allow(clippy::too_many_arguments)]
    fn score_ordered(
        &self,
        c1: usize,
        c2: usize,
        cx: u32,
        cy: u32,
        pixels: &[Vec3],
        matrix: &DitherMatrix,
        level: f32,
        bound: f32,
    ) -> Option<(f32, u64)> {
        let (pw, ph) = (self.spec.cell_width, self.spec.cell_height);
        let (a, b) = (&self.colors[c1], &self.colors[c2]);
        let ab = [b[0] - a[0], b[1] - a[1], b[2] - a[2]];
        let span = dot(&ab, &ab);

        let mut error = span * pixels.len() as f32 * ORDERED_CONTRAST_PENALTY;
        if error >= bound {
            return None;
        }
        let top = pixels.len() - 1;
        let mut mask = 0u64;
        for (i, p) in pixels.iter().enumerate() {
            let ratio = if span > 0.0 {
                let ap = [p[0] - a[0], p[1] - a[1], p[2] - a[2]];
                (dot(&ap, &ab) / span).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let blend = [
                a[0] + ab[0] * ratio,
                a[1] + ab[1] * ratio,
                a[2] + ab[2] * ratio,
            ];
            error += distance_sq(p, &blend);
            if error >= bound {
                return None;
            }
            let x = cx * pw + i as u32 % pw;
            let y = cy * ph + i as u32 / pw;
            if ratio > DitherMode::threshold(matrix, level, x, y) {
                mask |= 1 << (top - i);
            }
        }
        Some((error, mask))
    }

    /// Shortcut for undithered output: when every pixel's nearest color is one
    /// of at most two entries, that pair is optimal.
    fn two_color_vote(&self, pixels: &[Vec3], candidates: &[usize]) -> Option<Candidate> {
        let mut first = None;
        let mut second = None;
        for p in pixels {
            let mut nearest = (f32::INFINITY, candidates[0]);
            for &c in candidates {
                let d = distance_sq(p, &self.colors[c]);
                if d < nearest.0 {
                    nearest = (d, c);
                }
            }
            let c = nearest.1;
            match (first, second) {
                (None, _) => first = Some(c),
                (Some(f), _) if f == c => {}
                (_, None) => second = Some(c),
                (_, Some(s)) if s == c => {}
                _ => return None,
            }
        }
        let first = first?;
        let second = second.unwrap_or(first);
        let (c1, c2) = (first.max(second), first.min(second));
        if !self.spec.pair_allowed(c1, c2) || (c1 == c2 && self.colors.len() == 2) {
            return None;
        }
        let (error, mask) = self.score_nearest(c1, c2, pixels, f32::INFINITY)?;
        Some(Candidate {
            c1,
            c2,
            mask,
            error,
        })
    }

    fn finish(&self, cx: u32, cy: u32, best: Candidate) -> Cell {
        let cell = self.canonicalize(best.c1 as u8, best.c2 as u8, best.mask);
        trace!(
            "{cx} {cy}: {}/{} -> {} (error {})",
            cell.bg,
            cell.fg,
            cell.mask,
            best.error
        );
        cell
    }

    /// Rewrites a decision into the single form the platform expects among
    /// the equivalent ones.
    fn canonicalize(&self, mut bg: u8, mut fg: u8, mut mask: u64) -> Cell {
        let pixels = self.spec.pixels_per_cell();
        let full = u64::MAX >> (64 - pixels);
        if bg == fg {
            mask = 0;
        }

        match self.spec.quirk {
            Quirk::LowBitSwap => {
                if mask & 1 != 0 {
                    std::mem::swap(&mut bg, &mut fg);
                    mask ^= full;
                }
            }
            Quirk::SortedIndices => {
                if pixels > 2 && bg > fg {
                    std::mem::swap(&mut bg, &mut fg);
                    mask ^= full;
                }
            }
        }

        if pixels == 2 && mask == 1 {
            std::mem::swap(&mut bg, &mut fg);
            mask = 0;
        }

        if self.palette.len() == 2 {
            // only the mask is stored: background is entry 0
            if bg != 0 {
                std::mem::swap(&mut bg, &mut fg);
                mask ^= full;
            }
        } else if pixels <= 2 {
            // no mask is stored: it follows from the indices
            match (pixels, mask) {
                (1, 1) => bg = fg,
                (1, _) => fg = bg,
                (_, 0b11) => bg = fg,
                (_, 0) => fg = bg,
                _ => {}
            }
            if bg == fg {
                mask = 0;
            }
        }

        Cell { bg, fg, mask }
    }
}

#[inline(always)]
fn add_scaled(target: &mut Vec3, value: &Vec3, weight: f32) {
    target[0] += value[0] * weight;
    target[1] += value[1] * weight;
    target[2] += value[2] * weight;
}

#[inline(always)]
fn dot(a: &Vec3, b: &Vec3) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}
