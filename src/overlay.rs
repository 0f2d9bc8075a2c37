//! Detection overlays for the live view.
//!
//! Boxes are drawn in place on the detection image: a 2px border in the
//! label's colour and a filled tab above the top-left corner.

use image::{Rgb, RgbImage};

const BOX_THICKNESS: u32 = 2;
const TAB_HEIGHT: u32 = 12;
const TAB_CHAR_WIDTH: u32 = 7;

pub const PURPLE: Rgb<u8> = Rgb([145, 61, 136]);
pub const GREEN: Rgb<u8> = Rgb([30, 130, 76]);
pub const RED: Rgb<u8> = Rgb([231, 76, 60]);
pub const BLUE: Rgb<u8> = Rgb([36, 122, 208]);
/// Used for labels without an assigned colour.
pub const NEUTRAL: Rgb<u8> = Rgb([0, 0, 0]);

/// Colour assigned to a product label.
pub fn label_color(label: &str) -> Rgb<u8> {
    match label {
        "pringles" => PURPLE,
        "sprite" => GREEN,
        "gatorade" => RED,
        "ruffles" => BLUE,
        _ => NEUTRAL,
    }
}

/// Map a normalized box into pixel coordinates, clamped to the image.
///
/// Returns `None` for degenerate boxes.
pub fn normalize_box(bbox_norm: [f32; 4], dims: (u32, u32)) -> Option<[u32; 4]> {
    let (w, h) = dims;
    if w == 0 || h == 0 {
        return None;
    }
    let clamp = |v: f32, max: u32| -> u32 { (v.max(0.0) as u32).min(max - 1) };
    let x0 = clamp(bbox_norm[0] * w as f32, w);
    let y0 = clamp(bbox_norm[1] * h as f32, h);
    let x1 = clamp(bbox_norm[2] * w as f32, w);
    let y1 = clamp(bbox_norm[3] * h as f32, h);
    if x0 > x1 || y0 > y1 {
        return None;
    }
    Some([x0, y0, x1, y1])
}

/// Draw a rectangle border with given thickness.
pub fn draw_rect(img: &mut RgbImage, bbox_px: [u32; 4], color: Rgb<u8>, thickness: u32) {
    let (w, h) = img.dimensions();
    let [x0, y0, x1, y1] = bbox_px;
    for t in 0..thickness {
        let xx0 = x0.saturating_add(t);
        let yy0 = y0.saturating_add(t);
        let xx1 = x1.saturating_sub(t);
        let yy1 = y1.saturating_sub(t);
        if xx0 >= w || yy0 >= h || xx1 >= w || yy1 >= h || xx0 > xx1 || yy0 > yy1 {
            continue;
        }
        for x in xx0..=xx1 {
            img.put_pixel(x, yy0, color);
            img.put_pixel(x, yy1, color);
        }
        for y in yy0..=yy1 {
            img.put_pixel(xx0, y, color);
            img.put_pixel(xx1, y, color);
        }
    }
}

/// Fill a rectangle, clipped to the image.
pub fn fill_rect(img: &mut RgbImage, bbox_px: [u32; 4], color: Rgb<u8>) {
    let (w, h) = img.dimensions();
    let [x0, y0, x1, y1] = bbox_px;
    for y in y0..=y1.min(h.saturating_sub(1)) {
        for x in x0..=x1.min(w.saturating_sub(1)) {
            img.put_pixel(x, y, color);
        }
    }
}

/// Draw a labelled detection box.
pub fn draw_detection(img: &mut RgbImage, label: &str, bbox_norm: [f32; 4]) {
    let Some(bbox) = normalize_box(bbox_norm, img.dimensions()) else {
        return;
    };
    let color = label_color(label);
    draw_rect(img, bbox, color, BOX_THICKNESS);

    let [x0, y0, _, _] = bbox;
    let tab_width = TAB_CHAR_WIDTH * label.len() as u32 + 2;
    let tab = [x0, y0.saturating_sub(TAB_HEIGHT), x0 + tab_width, y0];
    fill_rect(img, tab, color);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_box_clamps_to_image() {
        assert_eq!(
            normalize_box([0.0, 0.0, 1.0, 1.0], (100, 50)),
            Some([0, 0, 99, 49])
        );
        assert_eq!(
            normalize_box([-0.5, 0.25, 0.5, 2.0], (100, 40)),
            Some([0, 10, 50, 39])
        );
        assert_eq!(normalize_box([0.6, 0.1, 0.5, 0.2], (100, 50)), None);
        assert_eq!(normalize_box([0.1, 0.1, 0.5, 0.2], (0, 50)), None);
    }

    #[test]
    fn draw_detection_paints_border_in_label_color() {
        let mut img = RgbImage::new(100, 100);
        draw_detection(&mut img, "sprite", [0.25, 0.5, 0.75, 0.75]);
        assert_eq!(*img.get_pixel(25, 50), GREEN);
        assert_eq!(*img.get_pixel(75, 75), GREEN);
        // interior untouched
        assert_eq!(*img.get_pixel(50, 62), Rgb([0, 0, 0]));
        // tab above the box
        assert_eq!(*img.get_pixel(27, 45), GREEN);
    }

    #[test]
    fn unmapped_labels_use_neutral_color() {
        assert_eq!(label_color("heinz"), NEUTRAL);
        assert_eq!(label_color("ruffles"), BLUE);
    }

    #[test]
    fn box_at_top_edge_is_clipped() {
        let mut img = RgbImage::new(10, 10);
        draw_detection(&mut img, "gatorade", [0.0, 0.0, 1.0, 1.0]);
        assert_eq!(*img.get_pixel(0, 0), RED);
        assert_eq!(*img.get_pixel(9, 9), RED);
    }
}
