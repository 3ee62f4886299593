use crate::colorspace::{distance_sq, Colorspace, Vec3};
use crate::error::{CtifError, Result};
use image::{Rgb, RgbImage};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use std::collections::HashMap;
use std::time::Instant;

#[derive(Clone, Debug)]
pub struct PaletteOptions {
    pub trials: usize,
    pub max_iterations: usize,
    /// One seed per trial. When set, overrides `trials` and makes the result
    /// reproducible.
    pub seeds: Option<Vec<u64>>,
}

impl Default for PaletteOptions {
    fn default() -> Self {
        Self {
            trials: 10,
            max_iterations: 128,
            seeds: None,
        }
    }
}

/// A unique image color with its occurrence count and the closest fixed
/// palette entry, which a free centroid has to beat.
#[derive(Debug)]
struct WeightedPoint {
    value: Vec3,
    weight: u32,
    fixed_error: f32,
}

#[derive(Debug)]
struct Trial {
    centroids: Vec<Vec3>,
    error: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedPalette {
    pub colors: Vec<Rgb<u8>>,
    /// Total weighted squared error of the winning trial.
    pub error: f64,
}

/// Replaces the leading `free` entries of a base palette with colors fitted
/// to an image by weighted k-means.
#[derive(Debug)]
pub struct PaletteGenerator<'a> {
    colorspace: Colorspace,
    base: &'a [Rgb<u8>],
    free: usize,
    points: Vec<WeightedPoint>,
    pixel_points: Vec<u32>,
}

impl<'a> PaletteGenerator<'a> {
    pub fn new(
        img: &RgbImage,
        base: &'a [Rgb<u8>],
        free: usize,
        colorspace: Colorspace,
    ) -> Result<Self> {
        if img.width() == 0 || img.height() == 0 {
            return Err(CtifError::EmptyImage);
        }
        if free > base.len() {
            return Err(CtifError::FreeSlots {
                free,
                len: base.len(),
            });
        }

        let fixed: Vec<Vec3> = base[free..]
            .iter()
            .map(|c| colorspace.from_rgb(*c))
            .collect();
        let mut seen: HashMap<[u8; 3], u32> = HashMap::new();
        let mut points: Vec<WeightedPoint> = Vec::new();
        let mut pixel_points = Vec::with_capacity((img.width() * img.height()) as usize);
        for pixel in img.pixels() {
            let id = *seen.entry(pixel.0).or_insert_with(|| {
                let value = colorspace.from_rgb(*pixel);
                let fixed_error = nearest(&value, &fixed).0;
                points.push(WeightedPoint {
                    value,
                    weight: 0,
                    fixed_error,
                });
                (points.len() - 1) as u32
            });
            points[id as usize].weight += 1;
            pixel_points.push(id);
        }
        debug!(
            "Palette generator: {} unique colors, {} fixed entries",
            points.len(),
            fixed.len()
        );

        Ok(Self {
            colorspace,
            base,
            free,
            points,
            pixel_points,
        })
    }

    /// Runs every trial and keeps the one with the lowest error. Fails when
    /// the options ask for no trials at all.
    pub fn generate(&self, options: &PaletteOptions) -> Result<GeneratedPalette> {
        let seeds = match &options.seeds {
            Some(seeds) => seeds.clone(),
            None => (0..options.trials).map(|_| rand::random()).collect(),
        };
        if seeds.is_empty() {
            return Err(CtifError::NoTrials);
        }
        if self.free == 0 {
            return Ok(GeneratedPalette {
                colors: self.base.to_vec(),
                error: self.points_error(&[]),
            });
        }

        let start_time = Instant::now();
        let trials: Vec<Trial> = seeds
            .par_iter()
            .map(|&seed| self.run_trial(seed, options.max_iterations))
            .collect();

        let mut best = &trials[0];
        for (i, trial) in trials.iter().enumerate() {
            debug!("Palette generator try {} error = {}", i + 1, trial.error);
            if trial.error < best.error {
                best = trial;
            }
        }

        let mut colors = self.base.to_vec();
        for (slot, centroid) in colors.iter_mut().zip(&best.centroids) {
            *slot = self.colorspace.to_rgb(*centroid);
        }
        info!(
            "Generated palette: {} custom colors, error = {}, {}ms",
            self.free,
            best.error,
            start_time.elapsed().as_millis()
        );
        Ok(GeneratedPalette {
            colors,
            error: best.error,
        })
    }

    fn run_trial(&self, seed: u64, max_iterations: usize) -> Trial {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut centroids: Vec<Vec3> = (0..self.free)
            .map(|_| {
                let pixel = rng.gen_range(0..self.pixel_points.len());
                self.points[self.pixel_points[pixel] as usize].value
            })
            .collect();

        let mut sums = vec![[0f64; 3]; self.free];
        let mut weights = vec![0u64; self.free];
        for _ in 0..max_iterations {
            sums.fill([0.0; 3]);
            weights.fill(0);
            let mut error = 0.0;
            for point in &self.points {
                let (point_error, centroid) = self.assign(point, &centroids);
                error += point_error as f64 * point.weight as f64;
                if let Some(i) = centroid {
                    for (sum, v) in sums[i].iter_mut().zip(point.value) {
                        *sum += v as f64 * point.weight as f64;
                    }
                    weights[i] += point.weight as u64;
                }
            }

            let mut changed = false;
            for ((centroid, sum), &weight) in centroids.iter_mut().zip(&sums).zip(&weights) {
                if weight > 0 {
                    let mean = sum.map(|s| (s / weight as f64) as f32);
                    if mean != *centroid {
                        *centroid = mean;
                        changed = true;
                    }
                }
            }
            if !changed {
                return Trial { centroids, error };
            }
        }
        // iteration cap reached: score the final centroids
        let error = self.points_error(&centroids);
        Trial { centroids, error }
    }

    /// Nearest free centroid if it is at least as close as the nearest fixed
    /// entry; free slots come first in the palette so they win ties.
    #[inline]
    fn assign(&self, point: &WeightedPoint, centroids: &[Vec3]) -> (f32, Option<usize>) {
        let (error, index) = nearest(&point.value, centroids);
        if error <= point.fixed_error {
            (error, Some(index))
        } else {
            (point.fixed_error, None)
        }
    }

    fn points_error(&self, centroids: &[Vec3]) -> f64 {
        self.points
            .iter()
            .map(|p| self.assign(p, centroids).0 as f64 * p.weight as f64)
            .sum()
    }
}

/// Closest color and its squared distance; the lowest index wins ties.
fn nearest(value: &Vec3, colors: &[Vec3]) -> (f32, usize) {
    let mut best = (f32::INFINITY, 0);
    for (i, color) in colors.iter().enumerate() {
        let error = distance_sq(value, color);
        if error < best.0 {
            best = (error, i);
            if error == 0.0 {
                break;
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Rgb<u8> = Rgb([200, 0, 0]);
    const BLUE: Rgb<u8> = Rgb([0, 0, 200]);
    const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

    fn seeded(seeds: &[u64]) -> PaletteOptions {
        PaletteOptions {
            seeds: Some(seeds.to_vec()),
            ..Default::default()
        }
    }

    #[test]
    fn empty_image_fails() {
        let img = RgbImage::new(0, 0);
        let base = [WHITE, RED];
        assert!(matches!(
            PaletteGenerator::new(&img, &base, 1, Colorspace::Yiq),
            Err(CtifError::EmptyImage)
        ));
    }

    #[test]
    fn too_many_free_slots_fails() {
        let img = RgbImage::from_pixel(2, 2, RED);
        let base = [WHITE];
        assert!(matches!(
            PaletteGenerator::new(&img, &base, 2, Colorspace::Yiq),
            Err(CtifError::FreeSlots { free: 2, len: 1 })
        ));
    }

    #[test]
    fn weights_sum_to_pixel_count() {
        let mut img = RgbImage::from_pixel(5, 4, RED);
        img.put_pixel(3, 3, BLUE);
        let base = [WHITE];
        let generator = PaletteGenerator::new(&img, &base, 1, Colorspace::Yiq).unwrap();
        assert_eq!(generator.points.len(), 2);
        assert_eq!(generator.points.iter().map(|p| p.weight).sum::<u32>(), 20);
    }

    #[test]
    fn majority_color_dominates_centroid() {
        let mut img = RgbImage::from_pixel(10, 10, RED);
        img.put_pixel(9, 9, BLUE);
        let base = [Rgb([0, 0, 0])];
        let generator = PaletteGenerator::new(&img, &base, 1, Colorspace::Yiq).unwrap();
        let palette = generator.generate(&seeded(&[1, 2, 3])).unwrap();
        let color = palette.colors[0];
        // weighted mean of 99 red and 1 blue pixels, far from the (100, 0, 100) midpoint
        assert!(color[0] >= 195, "{color:?}");
        assert!(color[2] <= 5, "{color:?}");
    }

    #[test]
    fn fixed_entries_keep_their_pixels() {
        let mut img = RgbImage::from_pixel(4, 4, WHITE);
        for x in 0..4 {
            for y in 0..2 {
                img.put_pixel(x, y, RED);
            }
        }
        let base = [Rgb([0, 0, 0]), WHITE];
        let generator = PaletteGenerator::new(&img, &base, 1, Colorspace::Yiq).unwrap();
        let palette = generator.generate(&seeded(&[7, 8])).unwrap();
        assert_eq!(palette.colors, vec![RED, WHITE]);
        assert!(palette.error < 1e-9);
    }

    #[test]
    fn fixed_seeds_are_reproducible() {
        let img = RgbImage::from_fn(16, 16, |x, y| Rgb([(x * 16) as u8, (y * 16) as u8, 128]));
        let base = crate::platform::Platform::OpenComputersTier2.spec().palette;
        let generator = PaletteGenerator::new(&img, &base, 4, Colorspace::Yiq).unwrap();
        let options = seeded(&[11, 22, 33, 44]);
        let first = generator.generate(&options).unwrap();
        let second = generator.generate(&options).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.colors[4..], base[4..]);
    }

    #[test]
    fn no_free_slots_returns_base() {
        let img = RgbImage::from_pixel(2, 2, RED);
        let base = [WHITE, BLUE];
        let generator = PaletteGenerator::new(&img, &base, 0, Colorspace::Rgb).unwrap();
        assert_eq!(
            generator.generate(&PaletteOptions::default()).unwrap().colors,
            base
        );
    }

    #[test]
    fn empty_trial_set_fails() {
        let img = RgbImage::from_pixel(2, 2, RED);
        let base = [Rgb([0, 0, 0]), WHITE];
        let generator = PaletteGenerator::new(&img, &base, 1, Colorspace::Yiq).unwrap();
        assert!(matches!(
            generator.generate(&seeded(&[])),
            Err(CtifError::NoTrials)
        ));
        let none = PaletteOptions {
            trials: 0,
            ..Default::default()
        };
        assert!(matches!(generator.generate(&none), Err(CtifError::NoTrials)));
    }

    #[test]
    fn capped_trial_reports_final_error() {
        let img = RgbImage::from_fn(8, 8, |x, y| Rgb([(x * 32) as u8, (y * 32) as u8, 64]));
        let base = [Rgb([0, 0, 0]); 3];
        let generator = PaletteGenerator::new(&img, &base, 3, Colorspace::Rgb).unwrap();
        let trial = generator.run_trial(5, 1);
        let expected = generator.points_error(&trial.centroids);
        assert_eq!(trial.error, expected);
    }

    #[test]
    fn nearest_prefers_lowest_index() {
        let colors = [[0.0, 0.0, 1.0], [0.0, 0.0, -1.0], [0.0, 0.0, 0.0]];
        assert_eq!(nearest(&[0.0, 0.0, 0.0], &colors), (0.0, 2));
        assert_eq!(nearest(&[0.0, 0.0, 0.5], &colors[..2]), (0.25, 0));
        assert_eq!(nearest(&[0.0, 0.0, 0.0], &colors[..2]), (1.0, 0));
    }
}
