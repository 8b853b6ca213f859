//! Per-frame CPU composition.
//!
//! Each decoded frame goes through: crop, placement into the stage,
//! the zoom/pan camera transform, optional directional motion blur,
//! timed annotations, and backdrop decoration (background fill,
//! padding, rounded corners, drop shadow). Deterministic: the same
//! (frame, time, config, playing) input produces identical pixels.

use crate::config::{
    Annotation, AnnotationKind, BackgroundStyle, Bitmap, Color, ExportConfig, ZoomRegion,
};
use crate::error::{ReelError, ReelResult};
use crate::source::RawFrame;

/// Minimum camera movement (normalized units per frame) before motion
/// blur engages.
const MOTION_BLUR_THRESHOLD: f32 = 0.0005;
/// Pixels of blur per unit of camera motion intensity.
const MOTION_BLUR_GAIN: f32 = 1200.0;
const MOTION_BLUR_MAX_RADIUS: f32 = 16.0;
const MOTION_BLUR_TAPS: i32 = 5;

#[derive(Debug, Clone, Copy, PartialEq)]
struct RectF {
    x: f32,
    y: f32,
    w: f32,
    h: f32,
}

/// Camera state in stage pixel coordinates: the point placed at the
/// stage center, and the magnification around it. The identity camera
/// focuses the stage center at scale 1.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Camera {
    focus_x: f32,
    focus_y: f32,
    scale: f32,
}

pub struct FrameCompositor {
    config: ExportConfig,
    /// Cached stage-sized background fill
    cached_background: Option<Vec<u8>>,
}

impl FrameCompositor {
    pub fn new(config: ExportConfig) -> Self {
        Self {
            config,
            cached_background: None,
        }
    }

    /// Compose one output frame for the given output-timeline time.
    /// `playing` gates motion blur: scrub/preview renders never smear.
    pub fn render(
        &mut self,
        frame: &RawFrame,
        time_ms: f64,
        playing: bool,
    ) -> ReelResult<RawFrame> {
        let expected = (frame.width * frame.height * 4) as usize;
        if frame.data.len() != expected {
            return Err(ReelError::SourceError(format!(
                "frame buffer is {} bytes, expected {}",
                frame.data.len(),
                expected
            )));
        }

        let stage_w = self.config.width;
        let stage_h = self.config.height;
        let mut out = self.stage_background(stage_w, stage_h);

        let crop = self.crop_rect_px(frame.width, frame.height);
        let content = self.content_rect(stage_w, stage_h, crop.w, crop.h);
        let camera = self.camera_at(time_ms, content, stage_w, stage_h);

        // Content rectangle as actually displayed under the camera
        let center_x = stage_w as f32 / 2.0;
        let center_y = stage_h as f32 / 2.0;
        let displayed = RectF {
            x: center_x + (content.x - camera.focus_x) * camera.scale,
            y: center_y + (content.y - camera.focus_y) * camera.scale,
            w: content.w * camera.scale,
            h: content.h * camera.scale,
        };
        let corner_radius = self.config.background.corner_radius * camera.scale;

        if self.config.shadow.enabled {
            draw_shadow(
                &mut out,
                stage_w,
                stage_h,
                displayed,
                corner_radius,
                &self.config.shadow,
            );
        }

        let blur = self.motion_blur_vector(time_ms, content, stage_w, stage_h, playing, &camera);

        for y in 0..stage_h {
            for x in 0..stage_w {
                let px = x as f32 + 0.5;
                let py = y as f32 + 0.5;
                let qx = camera.focus_x + (px - center_x) / camera.scale;
                let qy = camera.focus_y + (py - center_y) / camera.scale;

                let u = (qx - content.x) / content.w;
                let v = (qy - content.y) / content.h;
                if !(0.0..1.0).contains(&u) || !(0.0..1.0).contains(&v) {
                    continue;
                }

                let mask = corner_alpha(px - displayed.x, py - displayed.y, displayed.w, displayed.h, corner_radius);
                if mask < 0.01 {
                    continue;
                }

                let color = match blur {
                    Some((dir_x, dir_y, radius_px)) => {
                        let step = radius_px / camera.scale;
                        let mut acc = [0.0f32; 4];
                        for tap in 0..MOTION_BLUR_TAPS {
                            let offset = (tap - MOTION_BLUR_TAPS / 2) as f32
                                / (MOTION_BLUR_TAPS / 2) as f32;
                            let tu = ((qx + dir_x * offset * step - content.x) / content.w)
                                .clamp(0.0, 0.999_99);
                            let tv = ((qy + dir_y * offset * step - content.y) / content.h)
                                .clamp(0.0, 0.999_99);
                            let c = sample_content(frame, crop, tu, tv);
                            for i in 0..4 {
                                acc[i] += c[i] as f32;
                            }
                        }
                        let n = MOTION_BLUR_TAPS as f32;
                        [
                            (acc[0] / n) as u8,
                            (acc[1] / n) as u8,
                            (acc[2] / n) as u8,
                            (acc[3] / n) as u8,
                        ]
                    }
                    None => sample_content(frame, crop, u, v),
                };

                let idx = ((y * stage_w + x) * 4) as usize;
                blend_px(&mut out, idx, color, mask);
            }
        }

        for annotation in &self.config.annotations {
            if time_ms >= annotation.start_ms && time_ms <= annotation.end_ms {
                self.draw_annotation(&mut out, stage_w, stage_h, annotation);
            }
        }

        Ok(RawFrame {
            data: out,
            width: stage_w,
            height: stage_h,
            timestamp: frame.timestamp,
        })
    }

    /// Crop region in source pixel coordinates (full frame when unset).
    fn crop_rect_px(&self, src_w: u32, src_h: u32) -> RectF {
        let full = RectF {
            x: 0.0,
            y: 0.0,
            w: src_w as f32,
            h: src_h as f32,
        };
        match &self.config.crop {
            None => full,
            Some(c) => {
                let x = (c.x.clamp(0.0, 1.0)) * full.w;
                let y = (c.y.clamp(0.0, 1.0)) * full.h;
                let w = (c.width * full.w).min(full.w - x).max(1.0);
                let h = (c.height * full.h).min(full.h - y).max(1.0);
                RectF { x, y, w, h }
            }
        }
    }

    /// Where the (cropped) content sits on the stage at unit scale:
    /// aspect-preserving fit into the padded inner area, centered.
    fn content_rect(&self, stage_w: u32, stage_h: u32, src_w: f32, src_h: f32) -> RectF {
        let pad = &self.config.background.padding;
        let inner_x = pad.left;
        let inner_y = pad.top;
        let inner_w = (stage_w as f32 - pad.left - pad.right).max(1.0);
        let inner_h = (stage_h as f32 - pad.top - pad.bottom).max(1.0);

        let scale = (inner_w / src_w).min(inner_h / src_h);
        let w = src_w * scale;
        let h = src_h * scale;
        RectF {
            x: inner_x + (inner_w - w) / 2.0,
            y: inner_y + (inner_h - h) / 2.0,
            w,
            h,
        }
    }

    /// Camera for a given output time. Inside a zoom region the focus
    /// (normalized within the content rectangle) is placed at the stage
    /// center at the region's scale; position and scale blend linearly
    /// over the transition window at both region edges.
    fn camera_at(&self, time_ms: f64, content: RectF, stage_w: u32, stage_h: u32) -> Camera {
        let identity = Camera {
            focus_x: stage_w as f32 / 2.0,
            focus_y: stage_h as f32 / 2.0,
            scale: 1.0,
        };

        let region = self
            .config
            .zooms
            .iter()
            .find(|z| time_ms >= z.start_ms && time_ms <= z.end_ms);
        let Some(region) = region else {
            return identity;
        };

        let target = Camera {
            focus_x: content.x + region.focus_x * content.w,
            focus_y: content.y + region.focus_y * content.h,
            scale: region.scale.max(0.01),
        };

        let blend = zoom_blend(time_ms, region);
        Camera {
            focus_x: lerp(identity.focus_x, target.focus_x, blend),
            focus_y: lerp(identity.focus_y, target.focus_y, blend),
            scale: lerp(identity.scale, target.scale, blend),
        }
    }

    /// Blur direction and radius when the camera moved enough since the
    /// previous frame, `None` otherwise.
    fn motion_blur_vector(
        &self,
        time_ms: f64,
        content: RectF,
        stage_w: u32,
        stage_h: u32,
        playing: bool,
        camera: &Camera,
    ) -> Option<(f32, f32, f32)> {
        if !playing || !self.config.motion_blur {
            return None;
        }
        let frame_ms = 1000.0 / self.config.frame_rate as f64;
        let prev = self.camera_at((time_ms - frame_ms).max(0.0), content, stage_w, stage_h);

        let dx = camera.focus_x - prev.focus_x;
        let dy = camera.focus_y - prev.focus_y;
        let pan = (dx * dx + dy * dy).sqrt();
        let intensity = pan / stage_w as f32 + (camera.scale - prev.scale).abs();
        if intensity <= MOTION_BLUR_THRESHOLD || pan <= f32::EPSILON {
            return None;
        }

        let radius = (intensity * MOTION_BLUR_GAIN).min(MOTION_BLUR_MAX_RADIUS);
        Some((dx / pan, dy / pan, radius))
    }

    fn stage_background(&mut self, width: u32, height: u32) -> Vec<u8> {
        if let Some(cached) = &self.cached_background {
            return cached.clone();
        }
        let mut data = vec![0u8; (width * height * 4) as usize];
        match &self.config.background.style {
            BackgroundStyle::Transparent => {}
            BackgroundStyle::Solid(color) => fill_solid(&mut data, color),
            BackgroundStyle::Gradient { start, end, angle } => {
                fill_gradient(&mut data, width, height, start, end, *angle)
            }
        }
        self.cached_background = Some(data.clone());
        data
    }

    fn draw_annotation(&self, out: &mut [u8], stage_w: u32, stage_h: u32, annotation: &Annotation) {
        let rect = RectF {
            x: annotation.rect.x * stage_w as f32,
            y: annotation.rect.y * stage_h as f32,
            w: annotation.rect.width * stage_w as f32,
            h: annotation.rect.height * stage_h as f32,
        };
        match &annotation.kind {
            AnnotationKind::Label { bitmap } | AnnotationKind::Image { bitmap } => {
                draw_bitmap(out, stage_w, stage_h, rect, bitmap);
            }
            AnnotationKind::Arrow { color, thickness } => {
                draw_arrow(out, stage_w, stage_h, rect, color, *thickness);
            }
        }
    }
}

/// Linear ramp into and out of a zoom region. 1.0 = fully applied.
fn zoom_blend(time_ms: f64, region: &ZoomRegion) -> f32 {
    if region.transition_ms <= 0.0 {
        return 1.0;
    }
    let ramp_in = ((time_ms - region.start_ms) / region.transition_ms).clamp(0.0, 1.0);
    let ramp_out = ((region.end_ms - time_ms) / region.transition_ms).clamp(0.0, 1.0);
    ramp_in.min(ramp_out) as f32
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Bilinear sample of the cropped content at normalized (u, v).
fn sample_content(frame: &RawFrame, crop: RectF, u: f32, v: f32) -> [u8; 4] {
    let sx = crop.x + u * crop.w;
    let sy = crop.y + v * crop.h;
    bilinear_bgra(&frame.data, frame.width, frame.height, sx, sy)
}

/// Bilinear sample at a continuous pixel-space coordinate (pixel i
/// covers [i, i+1), center at i + 0.5). Clamps at the edges.
fn bilinear_bgra(data: &[u8], width: u32, height: u32, x: f32, y: f32) -> [u8; 4] {
    let fx = (x - 0.5).max(0.0);
    let fy = (y - 0.5).max(0.0);
    let x0 = (fx as u32).min(width - 1);
    let y0 = (fy as u32).min(height - 1);
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let tx = fx - x0 as f32;
    let ty = fy - y0 as f32;

    let mut result = [0u8; 4];
    for i in 0..4 {
        let p00 = data[((y0 * width + x0) * 4) as usize + i] as f32;
        let p10 = data[((y0 * width + x1) * 4) as usize + i] as f32;
        let p01 = data[((y1 * width + x0) * 4) as usize + i] as f32;
        let p11 = data[((y1 * width + x1) * 4) as usize + i] as f32;
        let top = p00 + (p10 - p00) * tx;
        let bottom = p01 + (p11 - p01) * tx;
        result[i] = (top + (bottom - top) * ty).round().clamp(0.0, 255.0) as u8;
    }
    result
}

/// Alpha-blend a BGRA pixel over the destination with an extra mask.
fn blend_px(dest: &mut [u8], idx: usize, src: [u8; 4], mask: f32) {
    if idx + 3 >= dest.len() {
        return;
    }
    let src_a = src[3] as f32 / 255.0 * mask;
    if src_a >= 0.999 {
        dest[idx..idx + 4].copy_from_slice(&src);
        return;
    }
    let dest_a = dest[idx + 3] as f32 / 255.0;
    let out_a = src_a + dest_a * (1.0 - src_a);
    if out_a <= 0.0 {
        return;
    }
    for i in 0..3 {
        let s = src[i] as f32 / 255.0;
        let d = dest[idx + i] as f32 / 255.0;
        let c = (s * src_a + d * dest_a * (1.0 - src_a)) / out_a;
        dest[idx + i] = (c * 255.0) as u8;
    }
    dest[idx + 3] = (out_a * 255.0) as u8;
}

/// Anti-aliased rounded-corner mask for a point in rect-local
/// coordinates.
fn corner_alpha(x: f32, y: f32, width: f32, height: f32, radius: f32) -> f32 {
    if radius <= 0.0 {
        return 1.0;
    }
    let r = radius.min(width / 2.0).min(height / 2.0);

    let cx = x.clamp(r, width - r);
    let cy = y.clamp(r, height - r);
    let dx = x - cx;
    let dy = y - cy;
    let dist = (dx * dx + dy * dy).sqrt();

    if dist > r {
        0.0
    } else if dist > r - 1.0 {
        r - dist
    } else {
        1.0
    }
}

fn fill_solid(data: &mut [u8], color: &Color) {
    let b = (color.b * 255.0) as u8;
    let g = (color.g * 255.0) as u8;
    let r = (color.r * 255.0) as u8;
    let a = (color.a * 255.0) as u8;
    for chunk in data.chunks_exact_mut(4) {
        chunk[0] = b;
        chunk[1] = g;
        chunk[2] = r;
        chunk[3] = a;
    }
}

fn fill_gradient(data: &mut [u8], width: u32, height: u32, start: &Color, end: &Color, angle: f32) {
    let angle_rad = angle.to_radians();
    let cos_a = angle_rad.cos();
    let sin_a = angle_rad.sin();

    for y in 0..height {
        for x in 0..width {
            let nx = x as f32 / width as f32 - 0.5;
            let ny = y as f32 / height as f32 - 0.5;
            let t = (nx * cos_a + ny * sin_a + 0.5).clamp(0.0, 1.0);

            let idx = ((y * width + x) * 4) as usize;
            data[idx] = ((start.b + (end.b - start.b) * t) * 255.0) as u8;
            data[idx + 1] = ((start.g + (end.g - start.g) * t) * 255.0) as u8;
            data[idx + 2] = ((start.r + (end.r - start.r) * t) * 255.0) as u8;
            data[idx + 3] = ((start.a + (end.a - start.a) * t) * 255.0) as u8;
        }
    }
}

/// Soft rounded-rect shadow under the displayed content.
fn draw_shadow(
    out: &mut [u8],
    stage_w: u32,
    stage_h: u32,
    content: RectF,
    corner_radius: f32,
    shadow: &crate::config::ShadowConfig,
) {
    let rect = RectF {
        x: content.x + shadow.offset_x,
        y: content.y + shadow.offset_y,
        w: content.w,
        h: content.h,
    };
    let blur = shadow.blur_radius.max(1.0);

    let x0 = (rect.x - blur).floor().max(0.0) as u32;
    let y0 = (rect.y - blur).floor().max(0.0) as u32;
    let x1 = ((rect.x + rect.w + blur).ceil() as u32).min(stage_w);
    let y1 = ((rect.y + rect.h + blur).ceil() as u32).min(stage_h);

    let src = [
        (shadow.color.b * 255.0) as u8,
        (shadow.color.g * 255.0) as u8,
        (shadow.color.r * 255.0) as u8,
        255,
    ];

    for y in y0..y1 {
        for x in x0..x1 {
            let d = rounded_rect_distance(x as f32 + 0.5, y as f32 + 0.5, rect, corner_radius);
            let coverage = if d <= 0.0 {
                1.0
            } else if d < blur {
                1.0 - d / blur
            } else {
                continue;
            };
            let idx = ((y * stage_w + x) * 4) as usize;
            blend_px(out, idx, src, coverage * shadow.opacity.clamp(0.0, 1.0));
        }
    }
}

/// Signed distance from a point to a rounded rectangle edge.
fn rounded_rect_distance(px: f32, py: f32, rect: RectF, radius: f32) -> f32 {
    let r = radius.min(rect.w / 2.0).min(rect.h / 2.0).max(0.0);
    let cx = rect.x + rect.w / 2.0;
    let cy = rect.y + rect.h / 2.0;
    let dx = (px - cx).abs() - (rect.w / 2.0 - r);
    let dy = (py - cy).abs() - (rect.h / 2.0 - r);
    let ox = dx.max(0.0);
    let oy = dy.max(0.0);
    (ox * ox + oy * oy).sqrt() + dx.max(dy).min(0.0) - r
}

/// Scale an RGBA bitmap into a stage rect with alpha blending.
fn draw_bitmap(out: &mut [u8], stage_w: u32, stage_h: u32, rect: RectF, bitmap: &Bitmap) {
    if bitmap.width == 0 || bitmap.height == 0 || rect.w <= 0.0 || rect.h <= 0.0 {
        return;
    }
    let expected = (bitmap.width * bitmap.height * 4) as usize;
    if bitmap.data.len() != expected {
        tracing::warn!(
            "annotation bitmap is {} bytes, expected {}; skipping",
            bitmap.data.len(),
            expected
        );
        return;
    }

    let x0 = rect.x.floor().max(0.0) as u32;
    let y0 = rect.y.floor().max(0.0) as u32;
    let x1 = ((rect.x + rect.w).ceil() as u32).min(stage_w);
    let y1 = ((rect.y + rect.h).ceil() as u32).min(stage_h);

    for y in y0..y1 {
        for x in x0..x1 {
            let u = ((x as f32 + 0.5 - rect.x) / rect.w).clamp(0.0, 1.0);
            let v = ((y as f32 + 0.5 - rect.y) / rect.h).clamp(0.0, 1.0);
            let rgba = bilinear_bgra(
                &bitmap.data,
                bitmap.width,
                bitmap.height,
                u * bitmap.width as f32,
                v * bitmap.height as f32,
            );
            // Bitmap is RGBA, stage is BGRA
            let src = [rgba[2], rgba[1], rgba[0], rgba[3]];
            let idx = ((y * stage_w + x) * 4) as usize;
            blend_px(out, idx, src, 1.0);
        }
    }
}

/// Arrow from the rect origin to its opposite corner, with a two-wing
/// head at the tip.
fn draw_arrow(out: &mut [u8], stage_w: u32, stage_h: u32, rect: RectF, color: &Color, thickness: f32) {
    let start = (rect.x, rect.y);
    let tip = (rect.x + rect.w, rect.y + rect.h);
    let len = ((tip.0 - start.0).powi(2) + (tip.1 - start.1).powi(2)).sqrt();
    if len < 1.0 {
        return;
    }
    let dir = ((tip.0 - start.0) / len, (tip.1 - start.1) / len);
    let head_len = (thickness * 3.0).max(8.0).min(len);
    let wing_angle = std::f32::consts::PI * 5.0 / 6.0;
    let wings = [wing_angle, -wing_angle].map(|a| {
        let (sin, cos) = a.sin_cos();
        (
            tip.0 + (dir.0 * cos - dir.1 * sin) * head_len,
            tip.1 + (dir.0 * sin + dir.1 * cos) * head_len,
        )
    });

    let segments = [(start, tip), (tip, wings[0]), (tip, wings[1])];
    let half = thickness.max(1.0) / 2.0;
    let margin = half + 1.0;

    let min_x = segments
        .iter()
        .flat_map(|(a, b)| [a.0, b.0])
        .fold(f32::MAX, f32::min);
    let max_x = segments
        .iter()
        .flat_map(|(a, b)| [a.0, b.0])
        .fold(f32::MIN, f32::max);
    let min_y = segments
        .iter()
        .flat_map(|(a, b)| [a.1, b.1])
        .fold(f32::MAX, f32::min);
    let max_y = segments
        .iter()
        .flat_map(|(a, b)| [a.1, b.1])
        .fold(f32::MIN, f32::max);

    let x0 = (min_x - margin).floor().max(0.0) as u32;
    let y0 = (min_y - margin).floor().max(0.0) as u32;
    let x1 = ((max_x + margin).ceil() as u32).min(stage_w);
    let y1 = ((max_y + margin).ceil() as u32).min(stage_h);

    let src = [
        (color.b * 255.0) as u8,
        (color.g * 255.0) as u8,
        (color.r * 255.0) as u8,
        (color.a * 255.0) as u8,
    ];

    for y in y0..y1 {
        for x in x0..x1 {
            let p = (x as f32 + 0.5, y as f32 + 0.5);
            let d = segments
                .iter()
                .map(|(a, b)| segment_distance(p, *a, *b))
                .fold(f32::MAX, f32::min);
            let coverage = (half + 0.5 - d).clamp(0.0, 1.0);
            if coverage > 0.0 {
                let idx = ((y * stage_w + x) * 4) as usize;
                blend_px(out, idx, src, coverage);
            }
        }
    }
}

fn segment_distance(p: (f32, f32), a: (f32, f32), b: (f32, f32)) -> f32 {
    let ab = (b.0 - a.0, b.1 - a.1);
    let ap = (p.0 - a.0, p.1 - a.1);
    let len_sq = ab.0 * ab.0 + ab.1 * ab.1;
    let t = if len_sq > 0.0 {
        ((ap.0 * ab.0 + ap.1 * ab.1) / len_sq).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let closest = (a.0 + ab.0 * t, a.1 + ab.1 * t);
    ((p.0 - closest.0).powi(2) + (p.1 - closest.1).powi(2)).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        Background, Color, CropRegion, ExportConfig, ShadowConfig, StageRect, VideoCodec,
    };
    use std::time::Duration;

    fn solid_frame(width: u32, height: u32, bgra: [u8; 4]) -> RawFrame {
        let mut data = Vec::with_capacity((width * height * 4) as usize);
        for _ in 0..width * height {
            data.extend_from_slice(&bgra);
        }
        RawFrame {
            data,
            width,
            height,
            timestamp: Duration::ZERO,
        }
    }

    fn paint_block(frame: &mut RawFrame, cx: u32, cy: u32, half: u32, bgra: [u8; 4]) {
        for y in cy.saturating_sub(half)..(cy + half).min(frame.height) {
            for x in cx.saturating_sub(half)..(cx + half).min(frame.width) {
                let idx = ((y * frame.width + x) * 4) as usize;
                frame.data[idx..idx + 4].copy_from_slice(&bgra);
            }
        }
    }

    fn px(frame: &RawFrame, x: u32, y: u32) -> [u8; 4] {
        let idx = ((y * frame.width + x) * 4) as usize;
        [
            frame.data[idx],
            frame.data[idx + 1],
            frame.data[idx + 2],
            frame.data[idx + 3],
        ]
    }

    fn base_config(width: u32, height: u32) -> ExportConfig {
        ExportConfig {
            width,
            height,
            frame_rate: 30,
            video_codec: VideoCodec::H264,
            background: Background {
                style: BackgroundStyle::Solid(Color::BLACK),
                ..Default::default()
            },
            shadow: ShadowConfig {
                enabled: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_identity_render_passes_content_through() {
        let mut comp = FrameCompositor::new(base_config(100, 100));
        let mut frame = solid_frame(100, 100, [40, 40, 40, 255]);
        paint_block(&mut frame, 10, 10, 2, [0, 255, 0, 255]);

        let out = comp.render(&frame, 0.0, true).unwrap();
        assert_eq!(px(&out, 10, 10), [0, 255, 0, 255]);
        assert_eq!(px(&out, 90, 90), [40, 40, 40, 255]);
    }

    #[test]
    fn test_zoom_places_focus_at_stage_center() {
        let mut config = base_config(100, 100);
        config.zooms = vec![crate::config::ZoomRegion {
            start_ms: 0.0,
            end_ms: 10_000.0,
            focus_x: 0.25,
            focus_y: 0.75,
            scale: 2.0,
            transition_ms: 0.0,
        }];
        let mut comp = FrameCompositor::new(config);

        let mut frame = solid_frame(100, 100, [40, 40, 40, 255]);
        // marker around the focus point (0.25, 0.75) of the content
        paint_block(&mut frame, 25, 75, 3, [0, 0, 255, 255]);

        let out = comp.render(&frame, 5000.0, true).unwrap();
        assert_eq!(px(&out, 50, 50), [0, 0, 255, 255]);
        // away from the marker the zoomed content is still the base gray
        assert_eq!(px(&out, 90, 10), [40, 40, 40, 255]);
    }

    #[test]
    fn test_zoom_transition_blends_linearly() {
        let mut config = base_config(100, 100);
        config.zooms = vec![crate::config::ZoomRegion {
            start_ms: 1000.0,
            end_ms: 2000.0,
            focus_x: 0.25,
            focus_y: 0.75,
            scale: 2.0,
            transition_ms: 300.0,
        }];
        let comp = FrameCompositor::new(config);
        let content = RectF {
            x: 0.0,
            y: 0.0,
            w: 100.0,
            h: 100.0,
        };

        // halfway through the entry transition
        let cam = comp.camera_at(1150.0, content, 100, 100);
        assert!((cam.scale - 1.5).abs() < 1e-4);
        assert!((cam.focus_x - (50.0 + (25.0 - 50.0) * 0.5)).abs() < 1e-3);

        // fully applied in the middle
        let cam = comp.camera_at(1500.0, content, 100, 100);
        assert!((cam.scale - 2.0).abs() < 1e-4);

        // outside the region
        let cam = comp.camera_at(3000.0, content, 100, 100);
        assert_eq!(cam.scale, 1.0);
    }

    #[test]
    fn test_crop_limits_visible_content() {
        let mut config = base_config(100, 100);
        config.crop = Some(CropRegion {
            x: 0.5,
            y: 0.0,
            width: 0.5,
            height: 1.0,
        });
        let mut comp = FrameCompositor::new(config);

        // left half blue, right half green
        let mut frame = solid_frame(100, 100, [255, 0, 0, 255]);
        for y in 0..100 {
            for x in 50..100 {
                let idx = ((y * 100 + x) * 4) as usize;
                frame.data[idx..idx + 4].copy_from_slice(&[0, 255, 0, 255]);
            }
        }

        let out = comp.render(&frame, 0.0, true).unwrap();
        // cropped 50x100 content is centered: x in [25, 75)
        assert_eq!(px(&out, 50, 50), [0, 255, 0, 255]);
        // outside the content rect the background shows
        assert_eq!(px(&out, 10, 50), [0, 0, 0, 255]);
        assert_eq!(px(&out, 90, 50), [0, 0, 0, 255]);
    }

    #[test]
    fn test_render_is_deterministic() {
        let mut config = base_config(64, 64);
        config.zooms = vec![crate::config::ZoomRegion {
            start_ms: 0.0,
            end_ms: 5000.0,
            focus_x: 0.3,
            focus_y: 0.6,
            scale: 1.8,
            transition_ms: 300.0,
        }];
        config.motion_blur = true;
        let mut comp = FrameCompositor::new(config);

        let mut frame = solid_frame(64, 64, [10, 120, 200, 255]);
        paint_block(&mut frame, 20, 40, 4, [255, 255, 255, 255]);

        let a = comp.render(&frame, 150.0, true).unwrap();
        let b = comp.render(&frame, 150.0, true).unwrap();
        assert_eq!(a.data, b.data);
    }

    #[test]
    fn test_motion_blur_only_while_playing() {
        let mut config = base_config(64, 64);
        config.zooms = vec![crate::config::ZoomRegion {
            start_ms: 0.0,
            end_ms: 5000.0,
            focus_x: 0.1,
            focus_y: 0.1,
            scale: 2.0,
            transition_ms: 300.0,
        }];
        config.motion_blur = true;
        let mut comp = FrameCompositor::new(config);

        let mut frame = solid_frame(64, 64, [0, 0, 0, 255]);
        paint_block(&mut frame, 10, 10, 2, [255, 255, 255, 255]);

        // mid-transition the camera is moving fast
        let playing = comp.render(&frame, 150.0, true).unwrap();
        let scrubbing = comp.render(&frame, 150.0, false).unwrap();
        assert_ne!(playing.data, scrubbing.data);
    }

    #[test]
    fn test_annotation_only_within_time_range() {
        let mut config = base_config(100, 100);
        config.annotations = vec![Annotation {
            start_ms: 1000.0,
            end_ms: 2000.0,
            rect: StageRect {
                x: 0.1,
                y: 0.1,
                width: 0.3,
                height: 0.3,
            },
            kind: AnnotationKind::Arrow {
                color: Color::rgb(1.0, 0.0, 0.0),
                thickness: 4.0,
            },
        }];
        let mut comp = FrameCompositor::new(config);
        let frame = solid_frame(100, 100, [0, 0, 0, 255]);

        let before = comp.render(&frame, 500.0, true).unwrap();
        let during = comp.render(&frame, 1500.0, true).unwrap();
        assert_eq!(before.data, comp.render(&frame, 2500.0, true).unwrap().data);
        assert_ne!(before.data, during.data);

        // somewhere along the shaft the arrow color shows (red in BGRA)
        let mid = px(&during, 25, 25);
        assert!(mid[2] > 200 && mid[0] < 60);
    }

    #[test]
    fn test_label_bitmap_is_composited() {
        let mut config = base_config(100, 100);
        let bitmap = Bitmap {
            // 2x2 opaque white RGBA
            data: vec![255u8; 2 * 2 * 4],
            width: 2,
            height: 2,
        };
        config.annotations = vec![Annotation {
            start_ms: 0.0,
            end_ms: 1000.0,
            rect: StageRect {
                x: 0.5,
                y: 0.5,
                width: 0.2,
                height: 0.2,
            },
            kind: AnnotationKind::Label { bitmap },
        }];
        let mut comp = FrameCompositor::new(config);
        let frame = solid_frame(100, 100, [0, 0, 0, 255]);

        let out = comp.render(&frame, 100.0, true).unwrap();
        assert_eq!(px(&out, 60, 60), [255, 255, 255, 255]);
        assert_eq!(px(&out, 30, 30), [0, 0, 0, 255]);
    }

    #[test]
    fn test_rejects_wrong_buffer_size() {
        let mut comp = FrameCompositor::new(base_config(100, 100));
        let frame = RawFrame {
            data: vec![0u8; 16],
            width: 100,
            height: 100,
            timestamp: Duration::ZERO,
        };
        assert!(comp.render(&frame, 0.0, true).is_err());
    }

    #[test]
    fn test_corner_alpha() {
        // center fully opaque, extreme corner masked out
        assert!((corner_alpha(50.0, 50.0, 100.0, 100.0, 10.0) - 1.0).abs() < 0.01);
        assert!(corner_alpha(0.5, 0.5, 100.0, 100.0, 10.0) < 0.5);
        // radius zero disables masking
        assert_eq!(corner_alpha(0.0, 0.0, 100.0, 100.0, 0.0), 1.0);
    }
}
