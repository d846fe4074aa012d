//! Overlays drawn on frames before they are published.

use anyhow::{Result, anyhow};
use image::{ImageBuffer, Rgb, RgbImage, imageops::FilterType};
use video_ingest::Frame;

use crate::filter::{BestCandidate, DetectionSignal};

const FIRE_RED: Rgb<u8> = Rgb([255, 0, 0]);
const LABEL_BG: Rgb<u8> = Rgb([0, 0, 0]);
const INFO_FG: Rgb<u8> = Rgb([255, 255, 255]);
const GLYPH_ADVANCE: i32 = 6;

/// Draw the frame's best candidate, the confirmation banner and a frame counter,
/// then scale the result for display.
pub(crate) fn annotate_frame(
    frame: &Frame,
    signal: &DetectionSignal,
    confirmed: bool,
    frame_number: u64,
    display_scale: f32,
) -> Result<RgbImage> {
    let width = frame.width as u32;
    let height = frame.height as u32;
    let mut image = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_vec(width, height, bgr_to_rgb(&frame.data))
        .ok_or_else(|| anyhow!("failed to convert frame into image buffer"))?;

    if let Some(best) = signal.best.as_ref() {
        draw_best_candidate(&mut image, best);
    }

    if confirmed {
        let scale = (height as i32 / 240).clamp(1, 4);
        let text = "REAL FIRE CONFIRMED";
        let text_width = text.len() as i32 * GLYPH_ADVANCE * scale;
        fill_rect(&mut image, 16, 16, 24 + text_width, 24 + 7 * scale, LABEL_BG);
        draw_label(&mut image, 20, 20, text, FIRE_RED, scale);
    }

    let info = format!("FRAME {:06}", frame_number);
    let info_width = (info.len() as i32 * GLYPH_ADVANCE).min(width as i32);
    let info_x = (width as i32 - info_width - 4).max(0);
    let info_y = (height as i32 - 12).max(0);
    fill_rect(&mut image, info_x, info_y, info_x + info_width + 4, info_y + 8, LABEL_BG);
    draw_label(&mut image, info_x + 2, info_y, &info, INFO_FG, 1);

    Ok(scale_for_display(image, display_scale))
}

fn draw_best_candidate(image: &mut RgbImage, best: &BestCandidate) {
    let b = best.bbox;
    draw_rectangle(image, b.x1, b.y1, b.x2, b.y2, FIRE_RED);
    draw_rectangle(image, b.x1 + 1, b.y1 + 1, b.x2 - 1, b.y2 - 1, FIRE_RED);

    let label = format!("FIRE {:.2}", best.confidence);
    let label_x = b.x1.max(0);
    let label_y = (b.y1 - 12).max(0);
    let text_width = label.len() as i32 * GLYPH_ADVANCE;
    fill_rect(image, label_x, label_y, label_x + text_width, label_y + 8, LABEL_BG);
    draw_label(image, label_x, label_y, &label, FIRE_RED, 1);
}

fn scale_for_display(image: RgbImage, display_scale: f32) -> RgbImage {
    if (display_scale - 1.0).abs() < f32::EPSILON {
        return image;
    }
    let width = ((image.width() as f32 * display_scale).round() as u32).max(1);
    let height = ((image.height() as f32 * display_scale).round() as u32).max(1);
    image::imageops::resize(&image, width, height, FilterType::Triangle)
}

fn bgr_to_rgb(input: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(input.len());
    for chunk in input.chunks_exact(3) {
        output.extend_from_slice(&[chunk[2], chunk[1], chunk[0]]);
    }
    output
}

fn draw_rectangle(image: &mut RgbImage, left: i32, top: i32, right: i32, bottom: i32, color: Rgb<u8>) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    if width == 0 || height == 0 || right < left || bottom < top {
        return;
    }
    let left = left.clamp(0, width - 1);
    let right = right.clamp(0, width - 1);
    let top = top.clamp(0, height - 1);
    let bottom = bottom.clamp(0, height - 1);

    for x in left..=right {
        image.put_pixel(x as u32, top as u32, color);
        image.put_pixel(x as u32, bottom as u32, color);
    }
    for y in top..=bottom {
        image.put_pixel(left as u32, y as u32, color);
        image.put_pixel(right as u32, y as u32, color);
    }
}

fn fill_rect(image: &mut RgbImage, left: i32, top: i32, right: i32, bottom: i32, color: Rgb<u8>) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    if width == 0 || height == 0 {
        return;
    }
    let left = left.clamp(0, width - 1);
    let right = right.clamp(0, width - 1);
    let top = top.clamp(0, height - 1);
    let bottom = bottom.clamp(0, height - 1);

    for y in top..=bottom {
        for x in left..=right {
            image.put_pixel(x as u32, y as u32, color);
        }
    }
}

fn draw_label(image: &mut RgbImage, mut x: i32, y: i32, text: &str, color: Rgb<u8>, scale: i32) {
    let (width, height) = (image.width() as i32, image.height() as i32);
    for ch in text.chars().flat_map(|c| c.to_uppercase()) {
        if let Some(glyph) = glyph_bits(ch) {
            for (row, pattern) in glyph.iter().enumerate() {
                for col in 0..5 {
                    if (pattern >> (4 - col)) & 1 == 0 {
                        continue;
                    }
                    for dy in 0..scale {
                        for dx in 0..scale {
                            let px = x + col * scale + dx;
                            let py = y + row as i32 * scale + dy;
                            if (0..width).contains(&px) && (0..height).contains(&py) {
                                image.put_pixel(px as u32, py as u32, color);
                            }
                        }
                    }
                }
            }
        }
        x += GLYPH_ADVANCE * scale;
    }
}

fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    match ch {
        'A' => Some([0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001]),
        'C' => Some([0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110]),
        'D' => Some([0b11110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11110]),
        'E' => Some([0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b11111]),
        'F' => Some([0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b10000]),
        'I' => Some([0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110]),
        'L' => Some([0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111]),
        'M' => Some([0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001]),
        'N' => Some([0b10001, 0b11001, 0b10101, 0b10101, 0b10011, 0b10001, 0b10001]),
        'O' => Some([0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110]),
        'R' => Some([0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001]),
        '0' => Some([0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110]),
        '1' => Some([0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110]),
        '2' => Some([0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111]),
        '3' => Some([0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110]),
        '4' => Some([0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010]),
        '5' => Some([0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110]),
        '6' => Some([0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110]),
        '7' => Some([0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000]),
        '8' => Some([0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110]),
        '9' => Some([0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100]),
        '.' => Some([0, 0, 0, 0, 0, 0b00110, 0b00110]),
        ' ' => Some([0; 7]),
        _ => None,
    }
}
