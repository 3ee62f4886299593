use crate::error::{CtifError, Result};
use crate::platform::PlatformSpec;
use image::imageops::{self, FilterType};
use image::RgbImage;
use log::debug;

/// Rounds `x` up to a multiple of `step`.
#[inline]
fn round_up(x: u32, step: u32) -> u32 {
    x.div_ceil(step) * step
}

/// Requested output size in pixels. Missing dimensions are derived.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SizeRequest {
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Fill the screen's aspect ratio instead of the source image's.
    pub ignore_aspect: bool,
}

/// Picks the pixel size an image of `src_width`x`src_height` is converted at.
///
/// Explicit dimensions are rounded up to whole cells and checked against the
/// platform limits. A single given dimension derives the other from the
/// source aspect ratio. With neither, the largest size fitting the screen and
/// its pixel budget is used.
pub fn target_size(
    spec: &PlatformSpec,
    src_width: u32,
    src_height: u32,
    request: SizeRequest,
) -> Result<(u32, u32)> {
    if src_width == 0 || src_height == 0 {
        return Err(CtifError::EmptyImage);
    }
    let (cw, ch) = (spec.cell_width, spec.cell_height);
    let width = request.width.filter(|&w| w > 0).map(|w| round_up(w, cw));
    let height = request.height.filter(|&h| h > 0).map(|h| round_up(h, ch));

    let derived = |given: u32, num: u32, den: u32, step: u32| {
        let value = (given as u64 * num as u64 / den as u64).clamp(1, u32::MAX as u64 / 2);
        round_up(value as u32, step)
    };
    let (width, height) = match (width, height) {
        (Some(w), Some(h)) => (w, h),
        (Some(w), None) => (w, derived(w, src_height, src_width, ch)),
        (None, Some(h)) => (derived(h, src_width, src_height, cw), h),
        (None, None) => {
            let size = fit_screen(spec, src_width, src_height, request.ignore_aspect);
            debug!("Fitted size: {}x{}", size.0, size.1);
            return Ok(size);
        }
    };

    if width as u64 * height as u64 > spec.max_pixels()
        || width > spec.max_width_px()
        || height > spec.max_height_px()
    {
        return Err(CtifError::SizeTooLarge { width, height });
    }
    Ok((width, height))
}

fn fit_screen(spec: &PlatformSpec, src_width: u32, src_height: u32, ignore_aspect: bool) -> (u32, u32) {
    let x = if ignore_aspect {
        spec.default_aspect_ratio()
    } else {
        src_width as f32 / src_height as f32
    };
    let scale = (spec.max_width_px() as f32 / x)
        .min(spec.max_height_px() as f32)
        .min((spec.max_pixels() as f32 / x).sqrt());
    (
        round_up(((x * scale).floor() as u32).max(1), spec.cell_width),
        round_up((scale.floor() as u32).max(1), spec.cell_height),
    )
}

/// Resamples `img` to `width`x`height`, returning it untouched when the size
/// already matches.
pub fn resize(img: RgbImage, width: u32, height: u32) -> RgbImage {
    if img.dimensions() == (width, height) {
        return img;
    }
    debug!(
        "Resizing {}x{} to {width}x{height}",
        img.width(),
        img.height()
    );
    imageops::resize(&img, width, height, FilterType::Lanczos3)
}

/// Enlarges a preview 2x without blending cell edges.
pub fn enlarge_preview(preview: &RgbImage) -> RgbImage {
    imageops::resize(
        preview,
        preview.width() * 2,
        preview.height() * 2,
        FilterType::Nearest,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::Platform;
    use image::Rgb;

    fn request(width: Option<u32>, height: Option<u32>) -> SizeRequest {
        SizeRequest {
            width,
            height,
            ignore_aspect: false,
        }
    }

    #[test]
    fn explicit_size_rounds_up_to_cells() {
        let spec = Platform::ComputerCraft.spec();
        assert_eq!(
            target_size(&spec, 100, 100, request(Some(101), Some(50))).unwrap(),
            (102, 51)
        );
    }

    #[test]
    fn one_dimension_keeps_source_aspect() {
        let spec = Platform::OpenComputersTier2.spec();
        assert_eq!(
            target_size(&spec, 200, 100, request(Some(80), None)).unwrap(),
            (80, 40)
        );
        assert_eq!(
            target_size(&spec, 200, 100, request(None, Some(30))).unwrap(),
            (64, 32)
        );
    }

    #[test]
    fn oversized_request_fails() {
        let spec = Platform::OpenComputersTier2.spec();
        assert!(matches!(
            target_size(&spec, 10, 10, request(Some(162), Some(8))),
            Err(CtifError::SizeTooLarge { width: 162, .. })
        ));
        // within both bounds but over the pixel budget
        assert!(matches!(
            target_size(&spec, 10, 10, request(Some(160), Some(200))),
            Err(CtifError::SizeTooLarge { .. })
        ));
    }

    #[test]
    fn fits_screen_by_default() {
        let spec = Platform::ComputerCraft.spec();
        // square source on a 328x243 pixel screen
        assert_eq!(
            target_size(&spec, 500, 500, SizeRequest::default()).unwrap(),
            (244, 243)
        );
        let wide = SizeRequest {
            ignore_aspect: true,
            ..Default::default()
        };
        assert_eq!(target_size(&spec, 500, 500, wide).unwrap(), (328, 162));
    }

    #[test]
    fn fitted_size_rounds_up_to_cells() {
        let spec = Platform::OpenComputersTier2.spec();
        let (w, h) = target_size(&spec, 100, 100, SizeRequest::default()).unwrap();
        assert_eq!((w % 2, h % 4), (0, 0));
        // floor(sqrt(16000)) = 126, then 128 after rounding up to the cell
        // height; the result may overshoot the budget by less than one cell
        // row or column
        assert_eq!((w, h), (126, 128));
        assert!(w as u64 * h as u64 > spec.max_pixels());
        assert!((w as u64) * (h as u64 - 4) <= spec.max_pixels());
    }

    #[test]
    fn resize_keeps_matching_image() {
        let img = RgbImage::from_pixel(4, 4, Rgb([1, 2, 3]));
        let same = resize(img.clone(), 4, 4);
        assert_eq!(same, img);
        assert_eq!(resize(img, 2, 6).dimensions(), (2, 6));
    }

    #[test]
    fn preview_doubles_pixels() {
        let mut img = RgbImage::new(2, 1);
        img.put_pixel(1, 0, Rgb([255, 0, 0]));
        let big = enlarge_preview(&img);
        assert_eq!(big.dimensions(), (4, 2));
        assert_eq!(*big.get_pixel(3, 1), Rgb([255, 0, 0]));
        assert_eq!(*big.get_pixel(1, 1), Rgb([0, 0, 0]));
    }
}
