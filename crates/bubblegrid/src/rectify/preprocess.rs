//! Image preparation ahead of fiducial detection: contrast normalization,
//! noise suppression, and dark-foreground binarization.

use image::{GrayImage, ImageBuffer, Luma};

/// Percentile-based linear contrast stretch.
///
/// Maps the [p1, p99] intensity window onto the full range; already
/// well-exposed scans pass through nearly unchanged.
pub(crate) fn normalize_contrast(gray: &GrayImage) -> GrayImage {
    let mut histogram = [0u64; 256];
    for pixel in gray.pixels() {
        histogram[pixel[0] as usize] += 1;
    }

    let total: u64 = histogram.iter().sum();
    if total == 0 {
        return gray.clone();
    }
    let low_count = total / 100;
    let high_count = total - total / 100;

    let mut low = 0u8;
    let mut high = 255u8;
    let mut cumulative = 0u64;
    for (value, &count) in histogram.iter().enumerate() {
        let next = cumulative + count;
        if cumulative <= low_count && next > low_count {
            low = value as u8;
        }
        if cumulative <= high_count && next > high_count {
            high = value as u8;
        }
        cumulative = next;
    }

    if high <= low {
        return gray.clone();
    }

    let span = (high - low) as f32;
    let mut out = GrayImage::new(gray.width(), gray.height());
    for (src, dst) in gray.pixels().zip(out.pixels_mut()) {
        let v = (src[0].saturating_sub(low)) as f32 * 255.0 / span;
        dst[0] = v.round().clamp(0.0, 255.0) as u8;
    }
    out
}

/// Gaussian-blur a `GrayImage` through `imageproc`'s f32 kernel.
pub(crate) fn blur(gray: &GrayImage, sigma: f32) -> GrayImage {
    if sigma <= 0.0 {
        return gray.clone();
    }
    let (w, h) = gray.dimensions();
    let mut f = ImageBuffer::<Luma<f32>, Vec<f32>>::new(w, h);
    for y in 0..h {
        for x in 0..w {
            f.put_pixel(x, y, Luma([gray.get_pixel(x, y)[0] as f32 / 255.0]));
        }
    }
    let blurred = imageproc::filter::gaussian_blur_f32(&f, sigma);
    let mut out = GrayImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let v = blurred.get_pixel(x, y)[0].clamp(0.0, 1.0);
            out.put_pixel(x, y, Luma([(v * 255.0).round() as u8]));
        }
    }
    out
}

/// Binarize with dark pixels as foreground (255) at the Otsu level.
pub(crate) fn binarize_dark(gray: &GrayImage) -> GrayImage {
    let cutoff = imageproc::contrast::otsu_level(gray);
    let mut out = GrayImage::new(gray.width(), gray.height());
    for (src, dst) in gray.pixels().zip(out.pixels_mut()) {
        dst[0] = if src[0] <= cutoff { 255 } else { 0 };
    }
    out
}

/// Full preprocessing chain: stretch → blur → dark-foreground binary image.
pub(crate) fn preprocess(gray: &GrayImage, blur_sigma: f32) -> GrayImage {
    let stretched = normalize_contrast(gray);
    let smoothed = blur(&stretched, blur_sigma);
    binarize_dark(&smoothed)
}
