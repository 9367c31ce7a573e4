//! Mark simulation for testing: fill bubbles on a rendered sheet, generate
//! random answer plans, and distort the result geometrically the way a
//! camera capture would.

use image::{GrayImage, Luma};
use imageproc::drawing::draw_filled_circle_mut;
use rand::rngs::StdRng;
use rand::Rng;

use crate::template::SheetTemplate;

/// One optional selected option per question.
pub type AnswerPlan = Vec<Option<usize>>;

/// Gray level simulating a pencil mark of the given darkness.
///
/// `intensity` 1.0 is fully black, 0.0 leaves the paper untouched.
pub fn mark_value(intensity: f32) -> u8 {
    ((1.0 - intensity.clamp(0.0, 1.0)) * 255.0).round() as u8
}

/// Fill the listed `(question, option)` bubbles at a uniform intensity.
///
/// The mark disk is drawn slightly inside the printed outline, matching how
/// respondents are instructed to fill bubbles.
pub fn fill_marks(
    sheet: &mut GrayImage,
    template: &SheetTemplate,
    marks: &[(usize, usize)],
    intensity: f32,
) {
    let radius = (template.bubble_radius_px - 2.0).max(1.0).round() as i32;
    let value = mark_value(intensity);
    for &(question, option) in marks {
        let center = template.bubble_center(question, option);
        draw_filled_circle_mut(
            sheet,
            (center[0].round() as i32, center[1].round() as i32),
            radius,
            Luma([value]),
        );
    }
}

/// Fill marks with per-mark darkness jitter and pencil-texture speckles.
pub fn fill_marks_noisy(
    sheet: &mut GrayImage,
    template: &SheetTemplate,
    marks: &[(usize, usize)],
    intensity: f32,
    rng: &mut StdRng,
) {
    let radius = (template.bubble_radius_px - 2.0).max(1.0).round() as i32;
    for &(question, option) in marks {
        let center = template.bubble_center(question, option);
        let cx = center[0].round() as i32;
        let cy = center[1].round() as i32;

        let jitter: i16 = rng.gen_range(-20..=20);
        let value = (mark_value(intensity) as i16 + jitter).clamp(0, 255) as u8;
        draw_filled_circle_mut(sheet, (cx, cy), radius, Luma([value]));

        // Darker speckles inside the mark.
        for _ in 0..rng.gen_range(5..15) {
            let dx = rng.gen_range(-(radius / 2)..=(radius / 2));
            let dy = rng.gen_range(-(radius / 2)..=(radius / 2));
            let dot = rng.gen_range(1..=3);
            let darker = value.saturating_sub(rng.gen_range(10..=30));
            draw_filled_circle_mut(sheet, (cx + dx, cy + dy), dot, Luma([darker]));
        }
    }
}

/// Fill a whole answer plan; skipped questions stay blank.
pub fn fill_plan(
    sheet: &mut GrayImage,
    template: &SheetTemplate,
    plan: &AnswerPlan,
    intensity: f32,
) {
    let marks: Vec<(usize, usize)> = plan
        .iter()
        .enumerate()
        .filter_map(|(q, choice)| choice.map(|k| (q, k)))
        .collect();
    fill_marks(sheet, template, &marks, intensity);
}

/// Generate a random answer plan; each question is skipped with
/// `skip_probability` and answered uniformly otherwise.
pub fn random_answers(
    questions: usize,
    options: usize,
    skip_probability: f64,
    rng: &mut StdRng,
) -> AnswerPlan {
    (0..questions)
        .map(|_| {
            if rng.gen_bool(skip_probability.clamp(0.0, 1.0)) {
                None
            } else {
                Some(rng.gen_range(0..options))
            }
        })
        .collect()
}

/// Rotate (degrees, clockwise) and scale a sheet image onto an expanded
/// canvas, the way a skewed camera capture frames a page.
///
/// The output canvas is sized to the transformed sheet bounds plus a small
/// margin; uncovered pixels read `background`.
pub fn distort(img: &GrayImage, angle_deg: f64, scale: f64, background: u8) -> GrayImage {
    let (w, h) = img.dimensions();
    let theta = angle_deg.to_radians();
    let (sin, cos) = theta.sin_cos();
    let s = if scale.is_finite() && scale > 0.0 { scale } else { 1.0 };

    let half_w = w as f64 * 0.5;
    let half_h = h as f64 * 0.5;
    let out_half_w = s * (half_w * cos.abs() + half_h * sin.abs());
    let out_half_h = s * (half_w * sin.abs() + half_h * cos.abs());
    let margin = 4.0;
    let out_w = (2.0 * (out_half_w + margin)).ceil() as u32;
    let out_h = (2.0 * (out_half_h + margin)).ceil() as u32;

    let out_cx = out_w as f64 * 0.5;
    let out_cy = out_h as f64 * 0.5;

    let mut out = GrayImage::from_pixel(out_w, out_h, Luma([background]));
    for y in 0..out_h {
        for x in 0..out_w {
            // Inverse transform: undo scale, then the rotation.
            let dx = (x as f64 - out_cx) / s;
            let dy = (y as f64 - out_cy) / s;
            let src_x = dx * cos + dy * sin + half_w;
            let src_y = -dx * sin + dy * cos + half_h;
            if let Some(v) = bilinear(img, src_x, src_y) {
                out.put_pixel(x, y, Luma([v.round().clamp(0.0, 255.0) as u8]));
            }
        }
    }
    out
}

/// Paint a filled rectangle; used to occlude a fiducial in failure tests.
pub fn occlude(img: &mut GrayImage, x0: u32, y0: u32, w: u32, h: u32, value: u8) {
    for y in y0..(y0 + h).min(img.height()) {
        for x in x0..(x0 + w).min(img.width()) {
            img.put_pixel(x, y, Luma([value]));
        }
    }
}

fn bilinear(img: &GrayImage, x: f64, y: f64) -> Option<f64> {
    let (w, h) = img.dimensions();
    if x < 0.0 || y < 0.0 || x > (w - 1) as f64 || y > (h - 1) as f64 {
        return None;
    }
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = x - x0 as f64;
    let fy = y - y0 as f64;

    let p00 = img.get_pixel(x0, y0)[0] as f64;
    let p10 = img.get_pixel(x1, y0)[0] as f64;
    let p01 = img.get_pixel(x0, y1)[0] as f64;
    let p11 = img.get_pixel(x1, y1)[0] as f64;
    Some((p00 * (1.0 - fx) + p10 * fx) * (1.0 - fy) + (p01 * (1.0 - fx) + p11 * fx) * fy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::render_sheet;
    use rand::SeedableRng;

    #[test]
    fn mark_value_maps_intensity_to_darkness() {
        assert_eq!(mark_value(1.0), 0);
        assert_eq!(mark_value(0.0), 255);
        assert!(mark_value(0.5) > 100 && mark_value(0.5) < 160);
    }

    #[test]
    fn filled_bubble_darkens_its_center() {
        let tpl = SheetTemplate::default();
        let mut sheet = render_sheet(&tpl);
        fill_marks(&mut sheet, &tpl, &[(0, 2)], 1.0);
        let c = tpl.bubble_center(0, 2);
        assert_eq!(sheet.get_pixel(c[0] as u32, c[1] as u32)[0], 0);
        // Neighboring option untouched.
        let n = tpl.bubble_center(0, 1);
        assert_eq!(sheet.get_pixel(n[0] as u32, n[1] as u32)[0], 255);
    }

    #[test]
    fn random_answers_respect_bounds_and_seed() {
        let mut rng = StdRng::seed_from_u64(7);
        let plan = random_answers(50, 4, 0.1, &mut rng);
        assert_eq!(plan.len(), 50);
        assert!(plan.iter().flatten().all(|&k| k < 4));

        let mut rng2 = StdRng::seed_from_u64(7);
        assert_eq!(plan, random_answers(50, 4, 0.1, &mut rng2));
    }

    #[test]
    fn zero_rotation_unit_scale_preserves_content() {
        let tpl = SheetTemplate::default();
        let sheet = render_sheet(&tpl);
        let out = distort(&sheet, 0.0, 1.0, 255);
        // Canvas grew by the margin only.
        assert!(out.width() >= sheet.width() && out.width() <= sheet.width() + 16);
        // A fiducial center is still ink after the shift.
        let fid = &tpl.fiducials()[0];
        let off_x = (out.width() - sheet.width()) / 2;
        let off_y = (out.height() - sheet.height()) / 2;
        let px = out.get_pixel(fid.center_px[0] as u32 + off_x, fid.center_px[1] as u32 + off_y)[0];
        assert!(px < 64);
    }

    #[test]
    fn quarter_turn_swaps_canvas_dimensions() {
        let tpl = SheetTemplate::default();
        let sheet = render_sheet(&tpl);
        let out = distort(&sheet, 90.0, 1.0, 255);
        assert!(out.width() > out.height());
    }

    #[test]
    fn occlude_paints_the_region() {
        let mut img = GrayImage::from_pixel(32, 32, Luma([0]));
        occlude(&mut img, 4, 4, 8, 8, 255);
        assert_eq!(img.get_pixel(5, 5)[0], 255);
        assert_eq!(img.get_pixel(20, 20)[0], 0);
    }
}
