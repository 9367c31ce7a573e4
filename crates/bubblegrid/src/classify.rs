//! Bubble classifier: fill-ratio measurement and mark classification.
//!
//! Each region is classified independently from the immutable canonical
//! image, so the per-region loop fans out over a rayon thread pool with no
//! shared mutable state. Results are indexed by `(question, option)` and the
//! completion order is irrelevant.

use image::GrayImage;
use rayon::prelude::*;

use crate::grid::BubbleRegion;

/// How the global foreground threshold is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum BinarizeMode {
    /// Otsu level estimated from the canonical image.
    Auto,
    /// Fixed dark-pixel cutoff; pixels at or below the value are foreground.
    Fixed(u8),
}

/// Classifier thresholds.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ClassifyConfig {
    /// Fill ratio at or above which a bubble counts as a confident mark.
    pub mark_threshold: f32,
    /// Fill ratio below which a bubble is unmarked; ratios between the two
    /// thresholds classify as marked with the low-confidence flag set.
    pub low_threshold: f32,
    /// Global foreground threshold selection.
    pub binarize: BinarizeMode,
}

impl Default for ClassifyConfig {
    fn default() -> Self {
        Self {
            mark_threshold: 0.45,
            low_threshold: 0.18,
            binarize: BinarizeMode::Auto,
        }
    }
}

/// Classification outcome for one bubble region.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BubbleState {
    pub question: usize,
    pub option: usize,
    /// Fraction of foreground pixels inside the sampled disk, in [0, 1].
    pub fill_ratio: f32,
    pub marked: bool,
    /// Set when the fill ratio falls between the two thresholds.
    pub low_confidence: bool,
    /// Monotonic distance-from-threshold confidence, clamped to [0, 1].
    /// Confident marks map to [0.5, 1], the low band to [0, 0.5).
    pub confidence: f32,
}

/// Resolve the configured binarization mode against a canonical image.
pub fn foreground_cutoff(canonical: &GrayImage, mode: BinarizeMode) -> u8 {
    match mode {
        BinarizeMode::Auto => imageproc::contrast::otsu_level(canonical),
        BinarizeMode::Fixed(level) => level,
    }
}

/// Classify every region of a canonical image.
pub fn classify_regions(
    canonical: &GrayImage,
    regions: &[BubbleRegion],
    config: &ClassifyConfig,
) -> Vec<BubbleState> {
    let cutoff = foreground_cutoff(canonical, config.binarize);
    regions
        .par_iter()
        .map(|region| classify_region(canonical, region, cutoff, config))
        .collect()
}

/// Classify a single region. Pure read of the canonical pixels.
pub fn classify_region(
    canonical: &GrayImage,
    region: &BubbleRegion,
    cutoff: u8,
    config: &ClassifyConfig,
) -> BubbleState {
    let (w, h) = canonical.dimensions();
    let [x0, y0, x1, y1] = region.bounds_px;

    let mut total = 0u32;
    let mut dark = 0u32;
    for y in y0.max(0)..=y1.min(h as i64 - 1) {
        for x in x0.max(0)..=x1.min(w as i64 - 1) {
            if !region.contains(x, y) {
                continue;
            }
            total += 1;
            if canonical.get_pixel(x as u32, y as u32)[0] <= cutoff {
                dark += 1;
            }
        }
    }

    let fill_ratio = if total == 0 {
        0.0
    } else {
        dark as f32 / total as f32
    };
    let (marked, low_confidence, confidence) = grade_fill(fill_ratio, config);

    BubbleState {
        question: region.question,
        option: region.option,
        fill_ratio,
        marked,
        low_confidence,
        confidence,
    }
}

fn grade_fill(fill: f32, config: &ClassifyConfig) -> (bool, bool, f32) {
    let mark = config.mark_threshold;
    let low = config.low_threshold.min(mark);

    if fill >= mark {
        let span = (1.0 - mark).max(f32::EPSILON);
        let confidence = (0.5 + 0.5 * (fill - mark) / span).clamp(0.0, 1.0);
        (true, false, confidence)
    } else if fill < low {
        let span = low.max(f32::EPSILON);
        let confidence = ((low - fill) / span).clamp(0.0, 1.0);
        (false, false, confidence)
    } else {
        let span = (mark - low).max(f32::EPSILON);
        let confidence = (0.5 * (fill - low) / span).clamp(0.0, 0.5 - f32::EPSILON);
        (true, true, confidence)
    }
}
