//! Perspective rectifier: raw sheet photo → canonical top-down frame.
//!
//! Pipeline stages: preprocess (contrast, blur, binarize) → candidate blob
//! detection → fiducial matching → homography fit → bilinear resample. Any
//! geometric failure aborts the run; a wrong transform would silently corrupt
//! every downstream answer, so there is no best-effort fallback.

mod fiducials;
mod matching;
mod preprocess;
mod warp;

use image::GrayImage;
use nalgebra::Matrix3;

use crate::template::SheetTemplate;

pub use fiducials::MarkerCandidate;
pub(crate) use matching::FiducialMatch;

/// Rectifier tuning knobs.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RectifyConfig {
    /// Gaussian blur sigma applied before binarization.
    pub blur_sigma: f32,
    /// Candidate area bounds as fractions of the image area (scale invariant).
    pub min_area_frac: f64,
    pub max_area_frac: f64,
    /// Maximum candidate bounding-box aspect ratio (and its reciprocal).
    pub max_aspect: f32,
    /// Minimum component-area over bbox-area; rotated squares reach ~0.5.
    pub min_solidity: f32,
    /// Candidates considered per image quadrant, nearest-to-corner first.
    pub max_per_quadrant: usize,
    /// Maximum normalized side/diagonal deviation from the template quad.
    pub layout_tolerance: f64,
    /// Minimum score separation below which two assignments are ambiguous.
    pub ambiguity_margin: f64,
}

impl Default for RectifyConfig {
    fn default() -> Self {
        Self {
            blur_sigma: 1.0,
            min_area_frac: 2.0e-4,
            max_area_frac: 2.0e-2,
            max_aspect: 2.0,
            min_solidity: 0.4,
            max_per_quadrant: 4,
            layout_tolerance: 0.12,
            ambiguity_margin: 0.05,
        }
    }
}

/// Fatal geometric failures of the rectification stage.
#[derive(Debug, Clone, PartialEq)]
pub enum GeometryError {
    /// Fewer usable fiducials than the template requires.
    InsufficientMarkers { needed: usize, got: usize },
    /// Multiple near-equally plausible marker assignments.
    AmbiguousMarkers { candidates: usize },
    /// The detected layout only matches the template mirror-imaged.
    MirroredLayout,
    /// Markers found, but their relative geometry deviates beyond tolerance.
    LayoutMismatch { deviation: f64, tolerance: f64 },
    /// The fitted perspective transform is unusable.
    DegenerateTransform,
}

impl std::fmt::Display for GeometryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InsufficientMarkers { needed, got } => {
                write!(f, "{} of {} required fiducials detected", got, needed)
            }
            Self::AmbiguousMarkers { candidates } => write!(
                f,
                "ambiguous fiducial configuration: no single alignment preferred among {} candidates",
                candidates
            ),
            Self::MirroredLayout => {
                write!(f, "fiducial layout matches the template only mirror-imaged")
            }
            Self::LayoutMismatch {
                deviation,
                tolerance,
            } => write!(
                f,
                "fiducial geometry deviates from the template by {:.3} (tolerance {:.3})",
                deviation, tolerance
            ),
            Self::DegenerateTransform => {
                write!(f, "fiducial correspondences yield a degenerate transform")
            }
        }
    }
}

impl std::error::Error for GeometryError {}

/// Fiducial-stage summary carried into the scan report and debug dump.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FiducialStats {
    /// Blobs that survived the geometry filters.
    pub n_candidates: usize,
    pub n_required: usize,
    /// Matched marker centers in raw-image pixels, template order.
    pub corners_px: [[f64; 2]; 4],
    /// Worst normalized deviation of the matched quad from the template.
    pub layout_deviation: f64,
    /// Quarter-turns applied to re-orient the sheet (0 = upright capture).
    pub rotation_steps: usize,
}

/// Successful rectification output.
#[derive(Debug, Clone)]
pub struct Rectified {
    /// Canonical top-down image at the template's page size.
    pub canonical: GrayImage,
    /// Canonical → raw homography.
    pub homography: Matrix3<f64>,
    pub stats: FiducialStats,
    /// All filtered candidates, retained for debug dumps.
    pub candidates: Vec<MarkerCandidate>,
}

/// Locate the template's fiducials in a raw image and resample it into the
/// canonical frame.
pub fn rectify(
    raw: &GrayImage,
    template: &SheetTemplate,
    config: &RectifyConfig,
) -> Result<Rectified, GeometryError> {
    let binary = preprocess::preprocess(raw, config.blur_sigma);
    let candidates = fiducials::find_candidates(&binary, config);
    tracing::debug!("{} fiducial candidates after filtering", candidates.len());

    let matched = match matching::match_fiducials(
        &candidates,
        template,
        [raw.width(), raw.height()],
        config,
    ) {
        FiducialMatch::Found(found) => found,
        FiducialMatch::Insufficient { needed, got } => {
            return Err(GeometryError::InsufficientMarkers { needed, got })
        }
        FiducialMatch::Ambiguous { candidates } => {
            return Err(GeometryError::AmbiguousMarkers { candidates })
        }
        FiducialMatch::Mirrored => return Err(GeometryError::MirroredLayout),
        FiducialMatch::LayoutMismatch { deviation } => {
            return Err(GeometryError::LayoutMismatch {
                deviation,
                tolerance: config.layout_tolerance,
            })
        }
    };

    if matched.rotation_steps != 0 {
        tracing::info!(
            rotation_steps = matched.rotation_steps,
            "sheet re-oriented by the anchor marker"
        );
    }

    let template_corners: Vec<[f64; 2]> = template
        .fiducials()
        .iter()
        .map(|fid| fid.center_px)
        .collect();
    let homography = warp::fit_homography(&template_corners, &matched.corners_px)
        .ok_or(GeometryError::DegenerateTransform)?;

    let canonical = warp::warp_to_canonical(raw, &homography, template.page_size_px);
    tracing::debug!(
        deviation = matched.layout_deviation,
        "rectified into {}x{} canonical frame",
        canonical.width(),
        canonical.height()
    );

    Ok(Rectified {
        canonical,
        homography,
        stats: FiducialStats {
            n_candidates: candidates.len(),
            n_required: template.required_fiducials(),
            corners_px: matched.corners_px,
            layout_deviation: matched.layout_deviation,
            rotation_steps: matched.rotation_steps,
        },
        candidates,
    })
}

/// Row-major array form of a homography, for serialized reports.
pub(crate) fn matrix3_to_array(m: &Matrix3<f64>) -> [[f64; 3]; 3] {
    [
        [m[(0, 0)], m[(0, 1)], m[(0, 2)]],
        [m[(1, 0)], m[(1, 1)], m[(1, 2)]],
        [m[(2, 0)], m[(2, 1)], m[(2, 2)]],
    ]
}
