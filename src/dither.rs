use crate::error::{CtifError, Result};

const BAYER_BASE: [u32; 4] = [0, 2, 3, 1];

/// Square matrix of weights, either an error diffusion kernel centered on
/// its middle element or an ordered dither threshold map.
#[derive(Clone, Debug, PartialEq)]
pub struct DitherMatrix {
    size: usize,
    values: Vec<f32>,
}

impl DitherMatrix {
    pub fn new(size: usize, values: Vec<f32>) -> Result<Self> {
        if size == 0 || size * size != values.len() {
            return Err(CtifError::DitherMatrix {
                size,
                len: values.len(),
            });
        }
        Ok(Self { size, values })
    }

    /// ```text
    ///        X   7
    ///    3   5   1
    /// ```
    pub fn floyd_steinberg() -> Self {
        Self {
            size: 3,
            values: vec![
                0.0,
                0.0,
                0.0,
                0.0,
                0.0,
                7.0 / 16.0,
                3.0 / 16.0,
                5.0 / 16.0,
                1.0 / 16.0,
            ],
        }
    }

    /// Bayer threshold map with values spread evenly over `(0, 1)`.
    /// `size` must be a power of two.
    pub fn bayer(size: usize) -> Result<Self> {
        if !size.is_power_of_two() {
            return Err(CtifError::DitherMatrix {
                size,
                len: size * size,
            });
        }
        let mut levels = vec![0u32];
        let mut n = 1;
        while n < size {
            let mut next = vec![0u32; 4 * n * n];
            for y in 0..2 * n {
                for x in 0..2 * n {
                    next[y * 2 * n + x] =
                        4 * levels[(y % n) * n + x % n] + BAYER_BASE[(y / n) * 2 + x / n];
                }
            }
            levels = next;
            n *= 2;
        }
        let count = (size * size) as f32;
        let values = levels
            .into_iter()
            .map(|v| (v as f32 + 0.5) / count)
            .collect();
        Ok(Self { size, values })
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Distance from the top-left corner to the kernel origin.
    #[inline]
    pub fn offset(&self) -> usize {
        (self.size - 1) / 2
    }

    #[inline(always)]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.values[y * self.size + x]
    }

    pub fn scaled(&self, level: f32) -> Self {
        Self {
            size: self.size,
            values: self.values.iter().map(|v| v * level).collect(),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.values.iter().all(|&v| v == 0.0)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub enum DitherMode {
    #[default]
    None,
    /// Error diffusion with the given kernel. Cells are processed strictly in
    /// row-major order.
    Diffusion(DitherMatrix),
    /// Ordered dithering with a threshold map tiled over the image.
    Ordered { matrix: DitherMatrix, level: f32 },
}

impl DitherMode {
    /// Builds a diffusion mode whose kernel weights are scaled by `level`,
    /// falling back to no dithering when nothing would be diffused.
    pub fn diffusion(kernel: DitherMatrix, level: f32) -> Self {
        let kernel = if level == 1.0 {
            kernel
        } else {
            kernel.scaled(level)
        };
        if kernel.is_zero() {
            DitherMode::None
        } else {
            DitherMode::Diffusion(kernel)
        }
    }

    pub fn ordered(matrix: DitherMatrix, level: f32) -> Self {
        if level == 0.0 {
            DitherMode::None
        } else {
            DitherMode::Ordered { matrix, level }
        }
    }

    pub fn is_diffusion(&self) -> bool {
        matches!(self, DitherMode::Diffusion(_))
    }

    /// Threshold the blend ratio between two colors is compared with at
    /// absolute pixel `(x, y)`.
    #[inline(always)]
    pub(crate) fn threshold(matrix: &DitherMatrix, level: f32, x: u32, y: u32) -> f32 {
        let size = matrix.size() as u32;
        let m = matrix.get((x % size) as usize, (y % size) as usize);
        0.5 + (m - 0.5) * level
    }
}
