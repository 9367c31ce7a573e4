//! Blank-sheet renderer.
//!
//! Produces a printable page matching a template: fiducial squares at the
//! corners and hollow bubble outlines for the answer grid. Typography and
//! print styling are out of scope; the output only needs to close the
//! detection round-trip.

use image::{GrayImage, Luma};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_circle_mut};
use imageproc::rect::Rect;

use crate::grid::bubble_regions;
use crate::template::SheetTemplate;

const PAPER: Luma<u8> = Luma([255]);
const INK: Luma<u8> = Luma([0]);

/// Render a blank answer sheet in the canonical frame.
pub fn render_sheet(template: &SheetTemplate) -> GrayImage {
    let [w, h] = template.page_size_px;
    let mut page = GrayImage::from_pixel(w, h, PAPER);

    for fid in template.fiducials() {
        let side = fid.size_px.round().max(1.0) as u32;
        let x0 = (fid.center_px[0] - fid.size_px * 0.5).round() as i32;
        let y0 = (fid.center_px[1] - fid.size_px * 0.5).round() as i32;
        draw_filled_rect_mut(&mut page, Rect::at(x0, y0).of_size(side, side), INK);
    }

    let radius = template.bubble_radius_px.round() as i32;
    for region in bubble_regions(template) {
        let center = (
            region.center_px[0].round() as i32,
            region.center_px[1].round() as i32,
        );
        draw_hollow_circle_mut(&mut page, center, radius, INK);
    }

    page
}
