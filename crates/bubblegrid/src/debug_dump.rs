//! Versioned debug dump and audit overlay.
//!
//! The dump reuses production pipeline structures wherever possible; debug
//! artifacts are side outputs for human audit and never part of the grading
//! contract.

use image::{GrayImage, Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_circle_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

use crate::classify::BubbleState;
use crate::grid::BubbleRegion;
use crate::pipeline::ScanConfig;
use crate::rectify::{FiducialStats, MarkerCandidate};
use crate::template::{SheetTemplate, TemplateSpecV1};

pub const DEBUG_SCHEMA_V1: &str = "bubblegrid.debug.v1";

const MARKED: Rgb<u8> = Rgb([0, 170, 0]);
const LOW_CONFIDENCE: Rgb<u8> = Rgb([230, 140, 0]);
const UNMARKED: Rgb<u8> = Rgb([200, 40, 40]);
const FIDUCIAL: Rgb<u8> = Rgb([40, 90, 220]);

/// Serializable per-run diagnostics (`bubblegrid.debug.v1`).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DebugDump {
    pub schema_version: String,
    pub image: ImageDebug,
    pub config: ScanConfig,
    pub template: TemplateSpecV1,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fiducials: Option<FiducialStats>,
    /// Every blob that survived the candidate filters, matched or not.
    pub candidates: Vec<MarkerCandidate>,
    /// Per-bubble classification results in `(question, option)` order.
    pub bubbles: Vec<BubbleState>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ImageDebug {
    pub width: u32,
    pub height: u32,
}

/// Debug side outputs of one scan.
#[derive(Debug, Clone)]
pub struct DebugArtifacts {
    /// The rectified canonical frame.
    pub canonical: GrayImage,
    /// Canonical frame with classification overlay.
    pub overlay: RgbImage,
    pub dump: DebugDump,
}

/// Draw classification results over the canonical image.
///
/// Bubble circles are color-coded: green marked, orange low-confidence,
/// red unmarked; template fiducial outlines are drawn in blue.
pub fn render_overlay(
    canonical: &GrayImage,
    regions: &[BubbleRegion],
    states: &[BubbleState],
    template: &SheetTemplate,
) -> RgbImage {
    let mut overlay = image::DynamicImage::ImageLuma8(canonical.clone()).to_rgb8();

    let radius = template.bubble_radius_px.round() as i32 + 2;
    for (region, state) in regions.iter().zip(states.iter()) {
        let color = if state.marked {
            if state.low_confidence {
                LOW_CONFIDENCE
            } else {
                MARKED
            }
        } else {
            UNMARKED
        };
        draw_hollow_circle_mut(
            &mut overlay,
            (
                region.center_px[0].round() as i32,
                region.center_px[1].round() as i32,
            ),
            radius,
            color,
        );
    }

    for fid in template.fiducials() {
        let side = (fid.size_px.round() as u32 + 8).max(1);
        let x0 = (fid.center_px[0] - side as f64 * 0.5).round() as i32;
        let y0 = (fid.center_px[1] - side as f64 * 0.5).round() as i32;
        draw_hollow_rect_mut(&mut overlay, Rect::at(x0, y0).of_size(side, side), FIDUCIAL);
    }

    overlay
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{classify_regions, ClassifyConfig};
    use crate::grid::bubble_regions;
    use crate::render::render_sheet;
    use crate::synth::fill_marks;

    #[test]
    fn overlay_matches_canonical_dimensions() {
        let tpl = SheetTemplate::default();
        let mut sheet = render_sheet(&tpl);
        fill_marks(&mut sheet, &tpl, &[(0, 0)], 1.0);
        let regions = bubble_regions(&tpl);
        let states = classify_regions(&sheet, &regions, &ClassifyConfig::default());

        let overlay = render_overlay(&sheet, &regions, &states, &tpl);
        assert_eq!(overlay.dimensions(), sheet.dimensions());
    }

    #[test]
    fn marked_bubble_ring_is_green() {
        let tpl = SheetTemplate::default();
        let mut sheet = render_sheet(&tpl);
        fill_marks(&mut sheet, &tpl, &[(0, 0)], 1.0);
        let regions = bubble_regions(&tpl);
        let states = classify_regions(&sheet, &regions, &ClassifyConfig::default());
        let overlay = render_overlay(&sheet, &regions, &states, &tpl);

        let c = tpl.bubble_center(0, 0);
        let ring_x = (c[0].round() as i32 + tpl.bubble_radius_px.round() as i32 + 2) as u32;
        assert_eq!(*overlay.get_pixel(ring_x, c[1].round() as u32), MARKED);
    }

    #[test]
    fn dump_serializes_to_versioned_json() {
        let tpl = SheetTemplate::default();
        let dump = DebugDump {
            schema_version: DEBUG_SCHEMA_V1.to_string(),
            image: ImageDebug {
                width: 850,
                height: 1100,
            },
            config: ScanConfig::default(),
            template: tpl.to_spec(),
            fiducials: None,
            candidates: Vec::new(),
            bubbles: Vec::new(),
        };
        let json = serde_json::to_string(&dump).expect("serialize");
        assert!(json.contains(DEBUG_SCHEMA_V1));
        let back: DebugDump = serde_json::from_str(&json).expect("parse");
        assert_eq!(back.schema_version, DEBUG_SCHEMA_V1);
    }
}
