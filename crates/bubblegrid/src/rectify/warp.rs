//! Perspective transform estimation and canonical-frame resampling.

use image::GrayImage;
use nalgebra::{DMatrix, Matrix3, Vector3};

/// Estimate H such that `image ~ H * canonical` via DLT.
///
/// Solves `A h = 0` with the smallest-singular-value right vector and
/// normalizes `H[2,2]` to one.
pub(crate) fn fit_homography(
    canonical: &[[f64; 2]],
    image: &[[f64; 2]],
) -> Option<Matrix3<f64>> {
    let n = canonical.len();
    if n < 4 || image.len() != n {
        return None;
    }

    // Pad to at least 9 rows so the thin SVD carries all nine right singular
    // vectors, including the null-space solution.
    let mut a = DMatrix::<f64>::zeros((2 * n).max(9), 9);
    for (i, (pc, pi)) in canonical.iter().zip(image.iter()).enumerate() {
        let [x, y] = *pc;
        let [u, v] = *pi;

        let r0 = 2 * i;
        let r1 = 2 * i + 1;

        a[(r0, 0)] = -x;
        a[(r0, 1)] = -y;
        a[(r0, 2)] = -1.0;
        a[(r0, 6)] = u * x;
        a[(r0, 7)] = u * y;
        a[(r0, 8)] = u;

        a[(r1, 3)] = -x;
        a[(r1, 4)] = -y;
        a[(r1, 5)] = -1.0;
        a[(r1, 6)] = v * x;
        a[(r1, 7)] = v * y;
        a[(r1, 8)] = v;
    }

    let svd = a.svd(false, true);
    let v_t = svd.v_t?;

    // The solution is the right singular vector of the smallest singular
    // value; nalgebra does not guarantee ordering, so locate it explicitly.
    let sv = &svd.singular_values;
    let min_idx = (0..sv.len()).min_by(|&i, &j| sv[i].total_cmp(&sv[j]))?;
    let max_sv = sv.iter().fold(0.0f64, |m, &v| m.max(v));

    // Degenerate configurations (e.g. collinear points) leave a null space of
    // dimension > 1: more than one vanishing singular value.
    let near_zero = sv.iter().filter(|&&v| v <= 1e-10 * max_sv.max(1.0)).count();
    if near_zero > 1 {
        return None;
    }

    let h = v_t.row(min_idx);
    let mut h_mat = Matrix3::zeros();
    for r in 0..3 {
        for c in 0..3 {
            h_mat[(r, c)] = h[3 * r + c];
        }
    }

    let scale = h_mat[(2, 2)];
    if !scale.is_finite() || scale.abs() <= f64::EPSILON {
        return None;
    }
    h_mat /= scale;

    if h_mat.iter().any(|v| !v.is_finite()) || h_mat.determinant().abs() <= 1e-12 {
        return None;
    }
    Some(h_mat)
}

/// Project a point through a homography. `None` on a vanishing denominator.
pub(crate) fn project(h: &Matrix3<f64>, pt: [f64; 2]) -> Option<[f64; 2]> {
    let v = h * Vector3::new(pt[0], pt[1], 1.0);
    let w = v[2];
    if !w.is_finite() || w.abs() <= 1e-12 {
        return None;
    }
    let x = v[0] / w;
    let y = v[1] / w;
    if !x.is_finite() || !y.is_finite() {
        return None;
    }
    Some([x, y])
}

/// Bilinear sample; `None` outside the image.
pub(crate) fn sample_bilinear(img: &GrayImage, x: f64, y: f64) -> Option<f64> {
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

    let top = p00 * (1.0 - fx) + p10 * fx;
    let bottom = p01 * (1.0 - fx) + p11 * fx;
    Some(top * (1.0 - fy) + bottom * fy)
}

/// Resample the raw image into the template's canonical frame.
///
/// Every canonical pixel is mapped through `h` (canonical → raw) and sampled
/// bilinearly; pixels falling outside the raw image read as paper white.
pub(crate) fn warp_to_canonical(
    raw: &GrayImage,
    h: &Matrix3<f64>,
    canonical_size: [u32; 2],
) -> GrayImage {
    let [cw, ch] = canonical_size;
    let mut out = GrayImage::new(cw, ch);
    for y in 0..ch {
        for x in 0..cw {
            let value = project(h, [x as f64, y as f64])
                .and_then(|p| sample_bilinear(raw, p[0], p[1]))
                .unwrap_or(255.0);
            out.put_pixel(x, y, image::Luma([value.round().clamp(0.0, 255.0) as u8]));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use image::Luma;

    #[test]
    fn scaling_homography_is_recovered() {
        let canonical = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];
        let img = [[0.0, 0.0], [2.0, 0.0], [2.0, 2.0], [0.0, 2.0]];
        let h = fit_homography(&canonical, &img).expect("homography");
        assert_relative_eq!(h[(0, 0)], 2.0, epsilon = 1e-6);
        assert_relative_eq!(h[(1, 1)], 2.0, epsilon = 1e-6);
    }

    #[test]
    fn projection_round_trips_the_fit_points() {
        let canonical = [[50.0, 50.0], [800.0, 50.0], [800.0, 1050.0], [50.0, 1050.0]];
        let img = [[80.0, 40.0], [790.0, 90.0], [760.0, 1010.0], [40.0, 1000.0]];
        let h = fit_homography(&canonical, &img).expect("homography");
        for (pc, pi) in canonical.iter().zip(img.iter()) {
            let p = project(&h, *pc).expect("finite");
            assert_relative_eq!(p[0], pi[0], epsilon = 1e-6);
            assert_relative_eq!(p[1], pi[1], epsilon = 1e-6);
        }
    }

    #[test]
    fn collinear_points_are_degenerate() {
        let canonical = [[0.0, 0.0], [1.0, 0.0], [2.0, 0.0], [3.0, 0.0]];
        let img = [[0.0, 0.0], [1.0, 0.0], [2.0, 0.0], [3.0, 0.0]];
        assert!(fit_homography(&canonical, &img).is_none());
    }

    #[test]
    fn identity_warp_preserves_pixels() {
        let mut img = GrayImage::from_pixel(32, 32, Luma([200]));
        img.put_pixel(10, 12, Luma([20]));
        let warped = warp_to_canonical(&img, &Matrix3::identity(), [32, 32]);
        assert_eq!(warped.get_pixel(10, 12)[0], 20);
        assert_eq!(warped.get_pixel(0, 0)[0], 200);
    }

    #[test]
    fn out_of_bounds_reads_paper_white() {
        let img = GrayImage::from_pixel(8, 8, Luma([0]));
        let shift = Matrix3::new(1.0, 0.0, 100.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0);
        let warped = warp_to_canonical(&img, &shift, [8, 8]);
        assert_eq!(warped.get_pixel(4, 4)[0], 255);
    }

    #[test]
    fn bilinear_interpolates_between_neighbors() {
        let mut img = GrayImage::new(2, 1);
        img.put_pixel(0, 0, Luma([0]));
        img.put_pixel(1, 0, Luma([100]));
        let v = sample_bilinear(&img, 0.5, 0.0).expect("inside");
        assert_relative_eq!(v, 50.0, epsilon = 1e-9);
    }
}
