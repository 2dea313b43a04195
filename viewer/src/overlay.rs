//! Draws the last known detections over the current video frame.

use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;
use live_detect_common::detection::{BoundingBox, DetectionSet};

use crate::font;

const BOX_THICKNESS: i32 = 3;
const TEXT_SCALE: u32 = 2;
const LABEL_PAD_X: u32 = 5;
const LABEL_PAD_Y: u32 = 4;
const TEXT_COLOR: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Compose `frame` with `detections`. Boxes are fractions of the frame.
pub fn render(frame: &RgbaImage, detections: &DetectionSet) -> RgbaImage {
    let mut out = frame.clone();
    for detection in detections {
        let Some([x0, y0, x1, y1]) = to_pixels(&detection.bbox, out.dimensions()) else {
            continue;
        };
        let color = label_color(&detection.label);
        draw_box(&mut out, [x0, y0, x1, y1], color);
        draw_label(&mut out, &detection.caption(), x0, y0, color);
    }
    out
}

/// Scale a normalized box to pixel corners, clamped to the image.
/// `None` for boxes that are empty or entirely off-frame.
pub fn to_pixels(bbox: &BoundingBox, (w, h): (u32, u32)) -> Option<[i32; 4]> {
    if w == 0 || h == 0 {
        return None;
    }
    let clamp = |v: f32, max: u32| (v * max as f32).round().clamp(0.0, (max - 1) as f32) as i32;
    let x0 = clamp(bbox.xmin, w);
    let y0 = clamp(bbox.ymin, h);
    let x1 = clamp(bbox.xmax, w);
    let y1 = clamp(bbox.ymax, h);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some([x0, y0, x1, y1])
}

fn draw_box(img: &mut RgbaImage, [x0, y0, x1, y1]: [i32; 4], color: Rgba<u8>) {
    for inset in 0..BOX_THICKNESS {
        let w = x1 - x0 - 2 * inset;
        let h = y1 - y0 - 2 * inset;
        if w <= 0 || h <= 0 {
            break;
        }
        let rect = Rect::at(x0 + inset, y0 + inset).of_size(w as u32 + 1, h as u32 + 1);
        draw_hollow_rect_mut(img, rect, color);
    }
}

/// Filled caption background sized to the text, sitting on the box's top
/// edge; moved inside the box when there is no room above it.
fn draw_label(img: &mut RgbaImage, caption: &str, x: i32, y: i32, color: Rgba<u8>) {
    let (text_w, text_h) = font::measure(caption, TEXT_SCALE);
    let bg_w = text_w + 2 * LABEL_PAD_X;
    let bg_h = text_h + 2 * LABEL_PAD_Y;
    let bg_y = if y >= bg_h as i32 { y - bg_h as i32 } else { y };

    draw_filled_rect_mut(img, Rect::at(x, bg_y).of_size(bg_w, bg_h), color);
    font::draw_text(
        img,
        caption,
        x + LABEL_PAD_X as i32,
        bg_y + LABEL_PAD_Y as i32,
        TEXT_SCALE,
        TEXT_COLOR,
    );
}

/// Stable colour for a class label: a string hash mapped onto the hue wheel
/// at full saturation and half lightness.
pub fn label_color(label: &str) -> Rgba<u8> {
    let [r, g, b] = hsl_to_rgb(label_hue(label));
    Rgba([r, g, b, 255])
}

/// `hash = c + (hash << 5) - hash` over UTF-16 code units, where the shift
/// wraps to 32 bits but the running sum does not. Hue is `|hash % 360|`.
fn label_hue(label: &str) -> u32 {
    let mut hash: i64 = 0;
    for unit in label.encode_utf16() {
        let shifted = (hash as i32).wrapping_shl(5) as i64;
        hash = unit as i64 + (shifted - hash);
    }
    (hash % 360).unsigned_abs() as u32
}

fn hsl_to_rgb(hue: u32) -> [u8; 3] {
    // Saturation 1, lightness 0.5: chroma is 1 and there is no offset.
    let h = hue as f64 / 60.0;
    let x = 1.0 - ((h % 2.0) - 1.0).abs();
    let (r, g, b) = match h as u32 {
        0 => (1.0, x, 0.0),
        1 => (x, 1.0, 0.0),
        2 => (0.0, 1.0, x),
        3 => (0.0, x, 1.0),
        4 => (x, 0.0, 1.0),
        _ => (1.0, 0.0, x),
    };
    let to_u8 = |v: f64| (v * 255.0).round() as u8;
    [to_u8(r), to_u8(g), to_u8(b)]
}
