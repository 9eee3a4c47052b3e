//! Draws detection boxes and labels onto a copy of a frame.

use image::{Rgb, RgbImage};

use crate::{
    detection::{BoundingBox, Detection},
    font,
};

#[derive(Debug, Clone)]
pub struct OverlayStyle {
    pub stroke_width: u32,
    pub box_color: Rgb<u8>,
    pub text_color: Rgb<u8>,
    pub label_background: Rgb<u8>,
    /// Pixels per font dot.
    pub text_scale: u32,
    /// Padding added around the measured label text.
    pub label_margin: u32,
    /// Move label backgrounds that would leave the frame back inside it.
    /// Off by default: labels near the top edge are clipped instead.
    pub clamp_labels: bool,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            stroke_width: 8,
            box_color: Rgb([255, 0, 0]),
            text_color: Rgb([255, 255, 255]),
            label_background: Rgb([255, 0, 0]),
            text_scale: 4,
            label_margin: 20,
            clamp_labels: false,
        }
    }
}

/// Integer pixel rectangle, `left..right` x `top..bottom`. May extend past
/// the image on any side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub left: i64,
    pub top: i64,
    pub right: i64,
    pub bottom: i64,
}

impl Rect {
    fn from_f64(left: f64, top: f64, right: f64, bottom: f64) -> Self {
        Self {
            left: left.round() as i64,
            top: top.round() as i64,
            right: right.round() as i64,
            bottom: bottom.round() as i64,
        }
    }

    fn contains(&self, x: i64, y: i64) -> bool {
        x >= self.left && x < self.right && y >= self.top && y < self.bottom
    }

    fn translate(&mut self, dx: i64, dy: i64) {
        self.left = self.left.saturating_add(dx);
        self.right = self.right.saturating_add(dx);
        self.top = self.top.saturating_add(dy);
        self.bottom = self.bottom.saturating_add(dy);
    }

    /// Part of the rectangle inside a `width` x `height` image.
    fn clip(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let left = self.left.max(0);
        let top = self.top.max(0);
        let right = self.right.min(width as i64);
        let bottom = self.bottom.min(height as i64);
        if left >= right || top >= bottom {
            return None;
        }
        Some((left as u32, top as u32, right as u32, bottom as u32))
    }
}

/// Where one detection's label goes.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelLayout {
    pub text: String,
    pub background: Rect,
    /// Top-left corner of the first glyph.
    pub text_origin: (i64, i64),
}

/// Output of the overlay stage, always a separate buffer from its source.
#[derive(Debug, Clone)]
pub struct AnnotatedImage {
    pub image: RgbImage,
    /// Detections drawn onto the image.
    pub detections: usize,
    /// False when the frame is shown as captured because no result was
    /// available for it.
    pub annotated: bool,
}

impl AnnotatedImage {
    pub fn passthrough(image: RgbImage) -> Self {
        Self {
            image,
            detections: 0,
            annotated: false,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

#[derive(Debug, Clone, Default)]
pub struct OverlayRenderer {
    style: OverlayStyle,
}

impl OverlayRenderer {
    pub fn new(style: OverlayStyle) -> Self {
        Self { style }
    }

    /// Draws every detection in order, later ones over earlier ones.
    pub fn render(&self, frame: &RgbImage, detections: &[Detection]) -> AnnotatedImage {
        let mut image = frame.clone();
        let (width, height) = image.dimensions();

        for detection in detections {
            self.stroke_box(&mut image, &detection.bbox);

            let layout = self.label_layout(detection, width, height);
            fill_rect(&mut image, &layout.background, self.style.label_background);
            draw_text(
                &mut image,
                &layout.text,
                layout.text_origin,
                self.style.text_scale,
                self.style.text_color,
            );
        }

        AnnotatedImage {
            image,
            detections: detections.len(),
            annotated: true,
        }
    }

    /// Label text and geometry: the background sits on the box's top-left
    /// corner, sized to the text plus the margin.
    pub fn label_layout(&self, detection: &Detection, frame_width: u32, frame_height: u32) -> LabelLayout {
        let text = detection.label();
        let scale = self.style.text_scale.max(1) as i64;
        let (text_width, text_height) = font::measure(&text);
        let text_width = text_width as i64 * scale;
        let text_height = text_height as i64 * scale;
        let margin = self.style.label_margin as i64;

        let left = detection.bbox.left.round() as i64;
        let top = detection.bbox.top.round() as i64;
        let mut background = Rect {
            left,
            top: top.saturating_sub(text_height + margin),
            right: left.saturating_add(text_width + margin),
            bottom: top,
        };
        let mut text_origin = (
            left.saturating_add(margin / 2),
            top.saturating_sub(margin / 2 + text_height),
        );

        if self.style.clamp_labels {
            let dx = clamp_shift(background.left, background.right, frame_width as i64);
            let dy = clamp_shift(background.top, background.bottom, frame_height as i64);
            background.translate(dx, dy);
            text_origin.0 = text_origin.0.saturating_add(dx);
            text_origin.1 = text_origin.1.saturating_add(dy);
        }

        LabelLayout {
            text,
            background,
            text_origin,
        }
    }

    /// Outline centred on the box edges, `stroke_width` wide.
    fn stroke_box(&self, image: &mut RgbImage, bbox: &BoundingBox) {
        let left = bbox.left.min(bbox.right);
        let right = bbox.left.max(bbox.right);
        let top = bbox.top.min(bbox.bottom);
        let bottom = bbox.top.max(bbox.bottom);
        let half = self.style.stroke_width as f64 / 2.0;

        let outer = Rect::from_f64(left - half, top - half, right + half, bottom + half);
        let inner = Rect::from_f64(left + half, top + half, right - half, bottom - half);
        let Some((x0, y0, x1, y1)) = outer.clip(image.width(), image.height()) else {
            return;
        };

        for y in y0..y1 {
            for x in x0..x1 {
                if !inner.contains(x as i64, y as i64) {
                    image.put_pixel(x, y, self.style.box_color);
                }
            }
        }
    }
}

/// Offset that moves `start..end` inside `0..limit`. When the span is longer
/// than the limit the start edge wins.
fn clamp_shift(start: i64, end: i64, limit: i64) -> i64 {
    if start < 0 {
        0i64.saturating_sub(start)
    } else if end > limit {
        limit.saturating_sub(end).max(-start)
    } else {
        0
    }
}

fn fill_rect(image: &mut RgbImage, rect: &Rect, color: Rgb<u8>) {
    let Some((x0, y0, x1, y1)) = rect.clip(image.width(), image.height()) else {
        return;
    };
    for y in y0..y1 {
        for x in x0..x1 {
            image.put_pixel(x, y, color);
        }
    }
}

fn draw_text(image: &mut RgbImage, text: &str, origin: (i64, i64), scale: u32, color: Rgb<u8>) {
    let scale = scale.max(1) as i64;
    let advance = font::ADVANCE as i64 * scale;
    for (i, ch) in text.chars().enumerate() {
        let glyph_x = origin.0.saturating_add(i as i64 * advance);
        for (row, bits) in font::glyph(ch).iter().enumerate() {
            for col in 0..font::GLYPH_WIDTH {
                if (bits >> (font::GLYPH_WIDTH - 1 - col)) & 1 == 0 {
                    continue;
                }
                let x = glyph_x.saturating_add(col as i64 * scale);
                let y = origin.1.saturating_add(row as i64 * scale);
                let dot = Rect {
                    left: x,
                    top: y,
                    right: x.saturating_add(scale),
                    bottom: y.saturating_add(scale),
                };
                fill_rect(image, &dot, color);
            }
        }
    }
}

#[cfg(test)]
#[path = "overlay_test.rs"]
mod overlay_test;
