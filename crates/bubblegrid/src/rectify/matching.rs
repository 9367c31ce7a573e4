//! Fiducial correspondence: assign detected candidates to template corners.
//!
//! Matching is an explicit tagged result rather than exception-driven control
//! flow. Candidates are grouped by image quadrant, combinations are scored by
//! how well their relative geometry reproduces the template quad, the anchor
//! marker (uniquely smaller) fixes the sheet orientation across quarter-turn
//! rotations, and reflected assignments are detected and rejected.

use crate::template::SheetTemplate;

use super::fiducials::MarkerCandidate;
use super::RectifyConfig;

/// Outcome of fiducial matching.
#[derive(Debug, Clone)]
pub(crate) enum FiducialMatch {
    Found(MatchedFiducials),
    /// Fewer usable markers than the template requires.
    Insufficient { needed: usize, got: usize },
    /// More than one near-equally plausible assignment.
    Ambiguous { candidates: usize },
    /// Only a mirror-image assignment explains the detected layout.
    Mirrored,
    /// No assignment reproduces the template geometry within tolerance.
    LayoutMismatch { deviation: f64 },
}

/// A successful assignment of one candidate per template fiducial.
#[derive(Debug, Clone)]
pub(crate) struct MatchedFiducials {
    /// Image-space marker centers, ordered like `template.fiducials()`.
    pub corners_px: [[f64; 2]; 4],
    /// Worst normalized side/diagonal deviation from the template quad.
    pub layout_deviation: f64,
    /// Quarter-turns applied to re-orient the sheet (0 = upright).
    pub rotation_steps: usize,
}

struct ScoredAssignment {
    score: f64,
    deviation: f64,
    rotation: usize,
    reflected: bool,
    corners_px: [[f64; 2]; 4],
    /// Candidate identity per quadrant, to tell distinct assignments apart.
    picks: [usize; 4],
}

/// Match candidates against the template's fiducial layout.
pub(crate) fn match_fiducials(
    candidates: &[MarkerCandidate],
    template: &SheetTemplate,
    image_size: [u32; 2],
    config: &RectifyConfig,
) -> FiducialMatch {
    let needed = template.required_fiducials();
    if candidates.len() < needed {
        return FiducialMatch::Insufficient {
            needed,
            got: candidates.len(),
        };
    }

    // One group per image quadrant, nearest-to-corner candidates first.
    let quadrants = partition_by_quadrant(candidates, image_size, config.max_per_quadrant);
    let occupied = quadrants.iter().filter(|q| !q.is_empty()).count();
    if occupied < 4 {
        return FiducialMatch::Insufficient {
            needed,
            got: occupied,
        };
    }

    let template_quad: Vec<[f64; 2]> = template
        .fiducials()
        .iter()
        .map(|f| f.center_px)
        .collect();
    let template_shape = quad_shape(&template_quad);
    let anchor_idx = template.anchor_cycle_index();
    let expected_anchor_ratio = template.anchor_ratio * template.anchor_ratio;

    let mut passing: Vec<ScoredAssignment> = Vec::new();
    let mut best_rejected_deviation = f64::INFINITY;
    let mut size_rejections = 0usize;

    for (pick_tl, tl) in quadrants[0].iter().enumerate() {
        for (pick_tr, tr) in quadrants[1].iter().enumerate() {
            for (pick_br, br) in quadrants[2].iter().enumerate() {
                for (pick_bl, bl) in quadrants[3].iter().enumerate() {
                    let quad = [*tl, *tr, *br, *bl];
                    let picks = [pick_tl, pick_tr, pick_br, pick_bl];
                    for reflected in [false, true] {
                        for rotation in 0..4 {
                            match score_assignment(
                                candidates,
                                &quad,
                                rotation,
                                reflected,
                                anchor_idx,
                                expected_anchor_ratio,
                                &template_shape,
                                config,
                            ) {
                                Ok(mut scored) => {
                                    scored.picks = picks;
                                    passing.push(scored);
                                }
                                Err(Rejection::Size) => size_rejections += 1,
                                Err(Rejection::Geometry(deviation)) => {
                                    best_rejected_deviation =
                                        best_rejected_deviation.min(deviation);
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    if passing.is_empty() {
        if best_rejected_deviation.is_finite() {
            return FiducialMatch::LayoutMismatch {
                deviation: best_rejected_deviation,
            };
        }
        // Every assignment died on the size pattern: the markers carry no
        // usable orientation asymmetry, so no single alignment is preferred.
        debug_assert!(size_rejections > 0);
        return FiducialMatch::Ambiguous {
            candidates: candidates.len(),
        };
    }

    passing.sort_by(|a, b| a.score.total_cmp(&b.score));
    let best = &passing[0];

    if best.reflected {
        return FiducialMatch::Mirrored;
    }

    // A close runner-up that names a different candidate set (or a different
    // orientation) means the alignment cannot be trusted.
    if let Some(second) = passing
        .iter()
        .skip(1)
        .find(|s| s.picks != best.picks || s.rotation != best.rotation || s.reflected)
    {
        if second.score - best.score < config.ambiguity_margin {
            return FiducialMatch::Ambiguous {
                candidates: passing.len(),
            };
        }
    }

    FiducialMatch::Found(MatchedFiducials {
        corners_px: best.corners_px,
        layout_deviation: best.deviation,
        rotation_steps: best.rotation,
    })
}

/// Group candidates by image quadrant; within each quadrant keep the
/// `cap` candidates nearest the respective image corner.
fn partition_by_quadrant(
    candidates: &[MarkerCandidate],
    image_size: [u32; 2],
    cap: usize,
) -> [Vec<usize>; 4] {
    let cx = image_size[0] as f64 * 0.5;
    let cy = image_size[1] as f64 * 0.5;
    let corners = [
        [0.0, 0.0],
        [image_size[0] as f64, 0.0],
        [image_size[0] as f64, image_size[1] as f64],
        [0.0, image_size[1] as f64],
    ];

    let mut groups: [Vec<usize>; 4] = Default::default();
    for (idx, cand) in candidates.iter().enumerate() {
        let [x, y] = cand.center_px;
        let quadrant = match (x < cx, y < cy) {
            (true, true) => 0,
            (false, true) => 1,
            (false, false) => 2,
            (true, false) => 3,
        };
        groups[quadrant].push(idx);
    }

    for (quadrant, group) in groups.iter_mut().enumerate() {
        let corner = corners[quadrant];
        group.sort_by(|&a, &b| {
            let da = dist2(candidates[a].center_px, corner);
            let db = dist2(candidates[b].center_px, corner);
            da.total_cmp(&db)
        });
        group.truncate(cap);
    }
    groups
}

enum Rejection {
    /// Marker sizes do not fit the three-large-one-anchor pattern.
    Size,
    /// Relative geometry deviated beyond tolerance; carries the deviation.
    Geometry(f64),
}

/// Score one (combination, rotation, reflection) assignment.
#[allow(clippy::too_many_arguments)]
fn score_assignment(
    candidates: &[MarkerCandidate],
    quad: &[usize; 4],
    rotation: usize,
    reflected: bool,
    anchor_idx: usize,
    expected_anchor_ratio: f64,
    template_shape: &QuadShape,
    config: &RectifyConfig,
) -> Result<ScoredAssignment, Rejection> {
    // Template fiducial j maps to the candidate at quadrant-cycle position
    // (j + rotation); reflection probes traverse the cycle in reverse.
    let assigned: Vec<&MarkerCandidate> = (0..4)
        .map(|j| {
            let pos = if reflected {
                (4 + rotation - j) % 4
            } else {
                (j + rotation) % 4
            };
            &candidates[quad[pos]]
        })
        .collect();

    // Size consistency: three like-sized markers plus one smaller anchor.
    let mut others: Vec<f64> = (0..4)
        .filter(|&j| j != anchor_idx)
        .map(|j| assigned[j].area_px)
        .collect();
    others.sort_by(f64::total_cmp);
    let median = others[1];
    if median <= 0.0 {
        return Err(Rejection::Size);
    }
    for &area in &others {
        let ratio = area / median;
        if !(0.55..=1.8).contains(&ratio) {
            return Err(Rejection::Size);
        }
    }
    let anchor_ratio = assigned[anchor_idx].area_px / median;
    if anchor_ratio < expected_anchor_ratio * 0.5
        || anchor_ratio > expected_anchor_ratio * 1.9
        || anchor_ratio > 0.85
    {
        return Err(Rejection::Size);
    }

    // Relative geometry: perimeter-normalized sides and diagonals.
    let points: Vec<[f64; 2]> = assigned.iter().map(|c| c.center_px).collect();
    let shape = quad_shape(&points);
    let deviation = template_shape.max_relative_deviation(&shape);
    if deviation > config.layout_tolerance {
        return Err(Rejection::Geometry(deviation));
    }

    let ratio_err = (anchor_ratio - expected_anchor_ratio).abs() / expected_anchor_ratio;
    Ok(ScoredAssignment {
        score: deviation + 0.5 * ratio_err,
        deviation,
        rotation,
        reflected,
        corners_px: [points[0], points[1], points[2], points[3]],
        picks: [0; 4],
    })
}

/// Perimeter-normalized side and diagonal lengths of a corner quad.
struct QuadShape {
    lengths: [f64; 6],
}

fn quad_shape(points: &[[f64; 2]]) -> QuadShape {
    debug_assert_eq!(points.len(), 4);
    let d = |a: usize, b: usize| dist2(points[a], points[b]).sqrt();
    let sides = [d(0, 1), d(1, 2), d(2, 3), d(3, 0)];
    let perimeter: f64 = sides.iter().sum();
    let norm = if perimeter > 0.0 { perimeter } else { 1.0 };
    QuadShape {
        lengths: [
            sides[0] / norm,
            sides[1] / norm,
            sides[2] / norm,
            sides[3] / norm,
            d(0, 2) / norm,
            d(1, 3) / norm,
        ],
    }
}

impl QuadShape {
    fn max_relative_deviation(&self, other: &QuadShape) -> f64 {
        self.lengths
            .iter()
            .zip(other.lengths.iter())
            .map(|(t, c)| (c - t).abs() / t.max(1e-12))
            .fold(0.0, f64::max)
    }
}

fn dist2(a: [f64; 2], b: [f64; 2]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    dx * dx + dy * dy
}
