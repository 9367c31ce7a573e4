//! Fiducial candidate detection on the binarized image.
//!
//! Connected components stand in for contour tracing; candidates are filtered
//! by the expected marker geometry (area range, bounding-box aspect,
//! solidity). Solidity is kept permissive enough for squares rotated up to a
//! quarter turn, whose bounding boxes grow by up to sqrt(2).

use std::collections::BTreeMap;

use image::{GrayImage, Luma};
use imageproc::region_labelling::{connected_components, Connectivity};

use super::RectifyConfig;

/// A connected blob that passed the marker-geometry filters.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MarkerCandidate {
    /// Centroid in raw-image pixels.
    pub center_px: [f64; 2],
    /// Foreground pixel count of the component.
    pub area_px: f64,
    /// Bounding box `[x0, y0, x1, y1]` (inclusive).
    pub bbox_px: [u32; 4],
    /// Component area over bounding-box area.
    pub solidity: f32,
    /// Bounding-box width over height.
    pub aspect: f32,
}

#[derive(Default)]
struct ComponentAcc {
    count: u64,
    sum_x: f64,
    sum_y: f64,
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
}

/// Detect marker candidates in a dark-foreground binary image.
pub(crate) fn find_candidates(binary: &GrayImage, config: &RectifyConfig) -> Vec<MarkerCandidate> {
    let labels = connected_components(binary, Connectivity::Eight, Luma([0u8]));
    let (w, h) = binary.dimensions();

    let mut components: BTreeMap<u32, ComponentAcc> = BTreeMap::new();
    for y in 0..h {
        for x in 0..w {
            let label = labels.get_pixel(x, y)[0];
            if label == 0 {
                continue;
            }
            let acc = components.entry(label).or_insert_with(|| ComponentAcc {
                min_x: x,
                min_y: y,
                max_x: x,
                max_y: y,
                ..ComponentAcc::default()
            });
            acc.count += 1;
            acc.sum_x += x as f64;
            acc.sum_y += y as f64;
            acc.min_x = acc.min_x.min(x);
            acc.min_y = acc.min_y.min(y);
            acc.max_x = acc.max_x.max(x);
            acc.max_y = acc.max_y.max(y);
        }
    }

    let image_area = w as f64 * h as f64;
    let min_area = config.min_area_frac * image_area;
    let max_area = config.max_area_frac * image_area;

    let mut candidates = Vec::new();
    for acc in components.values() {
        let area = acc.count as f64;
        if area < min_area || area > max_area {
            continue;
        }

        let bw = (acc.max_x - acc.min_x + 1) as f32;
        let bh = (acc.max_y - acc.min_y + 1) as f32;
        let aspect = bw / bh;
        if aspect > config.max_aspect || aspect < 1.0 / config.max_aspect {
            continue;
        }

        let solidity = (area / (bw as f64 * bh as f64)) as f32;
        if solidity < config.min_solidity {
            continue;
        }

        candidates.push(MarkerCandidate {
            center_px: [acc.sum_x / area, acc.sum_y / area],
            area_px: area,
            bbox_px: [acc.min_x, acc.min_y, acc.max_x, acc.max_y],
            solidity,
            aspect,
        });
    }

    candidates
}
