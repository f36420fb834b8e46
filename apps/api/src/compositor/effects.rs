//! EffectChain Engine: pixel transforms applied to the overlay before placement.
//!
//! Every transform takes the current RGBA buffer by reference and returns a new
//! buffer; nothing is mutated in place, so a failing step leaves the previous
//! buffer intact and the chain can carry on with it.
//!
//! All work here is synchronous CPU work on straight-alpha `RgbaImage`s.

use image::{imageops, Rgba, RgbaImage};
use thiserror::Error;
use tracing::warn;

use crate::compositor::spec::{Color, Effect};

/// Largest width or height any intermediate canvas may reach.
pub const MAX_CANVAS_EXTENT: u32 = 8192;

/// Upper bound for border width, glow radius and shadow blur. Per-pixel cost of
/// these effects grows with the radius, well before the canvas limit is hit.
pub const MAX_EFFECT_RADIUS: u32 = 256;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EffectError {
    #[error("invalid {effect} parameter: {message}")]
    InvalidParameter {
        effect: &'static str,
        message: String,
    },

    #[error("canvas {width}x{height} exceeds the {MAX_CANVAS_EXTENT}px limit")]
    CanvasTooLarge { width: u64, height: u64 },

    #[error("empty buffer")]
    EmptyBuffer,
}

/// A step that failed and was left out. `index` is the position in the effect
/// list; shape and rotation steps have none.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedEffect {
    pub index: Option<usize>,
    pub effect: &'static str,
    pub error: EffectError,
}

// ────────────────────────────────────────────────────────────────────────────
// Chain
// ────────────────────────────────────────────────────────────────────────────

/// Applies `effects` in declared order. A failing effect is skipped and the
/// chain continues from the buffer it was given.
pub fn apply_chain(overlay: RgbaImage, effects: &[Effect]) -> (RgbaImage, Vec<SkippedEffect>) {
    let mut current = overlay;
    let mut skipped = Vec::new();

    for (index, effect) in effects.iter().enumerate() {
        match apply(&current, effect) {
            Ok(next) => current = next,
            Err(error) => {
                warn!(
                    effect = effect.name(),
                    index,
                    "Skipping overlay effect: {error}"
                );
                skipped.push(SkippedEffect {
                    index: Some(index),
                    effect: effect.name(),
                    error,
                });
            }
        }
    }

    (current, skipped)
}

/// Single dispatch point for every effect variant.
pub fn apply(buffer: &RgbaImage, effect: &Effect) -> Result<RgbaImage, EffectError> {
    if buffer.width() == 0 || buffer.height() == 0 {
        return Err(EffectError::EmptyBuffer);
    }

    match *effect {
        Effect::Background {
            color,
            padding,
            corner_radius,
        } => background(buffer, color, padding, corner_radius),
        Effect::Border { color, width } => border(buffer, color, width),
        Effect::Shadow {
            color,
            offset_x,
            offset_y,
            blur,
        } => shadow(buffer, color, offset_x, offset_y, blur),
        Effect::Glow {
            color,
            radius,
            intensity,
        } => glow(buffer, color, radius, intensity),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Effects
// ────────────────────────────────────────────────────────────────────────────

fn background(
    src: &RgbaImage,
    color: Color,
    padding: u32,
    corner_radius: u32,
) -> Result<RgbaImage, EffectError> {
    let (w, h) = checked_canvas(
        u64::from(src.width()) + 2 * u64::from(padding),
        u64::from(src.height()) + 2 * u64::from(padding),
    )?;

    let radius = corner_radius.min(w / 2).min(h / 2) as f32;
    let mut out = RgbaImage::from_fn(w, h, |x, y| {
        let coverage = rounded_rect_coverage(x, y, w, h, radius);
        Rgba([color[0], color[1], color[2], scale_alpha(color[3], coverage)])
    });

    imageops::overlay(&mut out, src, i64::from(padding), i64::from(padding));
    Ok(out)
}

fn border(src: &RgbaImage, color: Color, width: u32) -> Result<RgbaImage, EffectError> {
    if width == 0 {
        return Ok(src.clone());
    }
    check_radius("border", "width", width as f32)?;
    let expanded = expand_canvas(src, width, width, width, width)?;
    let (w, h) = expanded.dimensions();

    let r = width as i32;
    let offsets: Vec<(i32, i32)> = (-r..=r)
        .flat_map(|dy| (-r..=r).map(move |dx| (dx, dy)))
        .filter(|(dx, dy)| dx * dx + dy * dy <= r * r)
        .collect();

    let mut out = RgbaImage::from_pixel(w, h, Rgba([color[0], color[1], color[2], 0]));
    for y in 0..h as i32 {
        for x in 0..w as i32 {
            let mut max_alpha = 0u8;
            for &(dx, dy) in &offsets {
                let (sx, sy) = (x + dx, y + dy);
                if sx < 0 || sy < 0 || sx >= w as i32 || sy >= h as i32 {
                    continue;
                }
                max_alpha = max_alpha.max(expanded.get_pixel(sx as u32, sy as u32)[3]);
                if max_alpha == u8::MAX {
                    break;
                }
            }
            out.get_pixel_mut(x as u32, y as u32)[3] = mul_u8(max_alpha, color[3]);
        }
    }

    imageops::overlay(&mut out, &expanded, 0, 0);
    Ok(out)
}

fn shadow(
    src: &RgbaImage,
    color: Color,
    offset_x: i32,
    offset_y: i32,
    blur: f32,
) -> Result<RgbaImage, EffectError> {
    if !blur.is_finite() || blur < 0.0 {
        return Err(EffectError::InvalidParameter {
            effect: "shadow",
            message: format!("blur must be finite and >= 0, got {blur}"),
        });
    }
    check_radius("shadow", "blur", blur)?;

    let extent = (blur * 3.0).ceil() as i64;
    let (w, h) = (i64::from(src.width()), i64::from(src.height()));
    let (dx, dy) = (i64::from(offset_x), i64::from(offset_y));

    // Union of the overlay box and the blurred, offset shadow box.
    let left = (extent - dx).max(0);
    let top = (extent - dy).max(0);
    let right = (dx + extent).max(0);
    let bottom = (dy + extent).max(0);
    let (cw, ch) = checked_canvas((w + left + right) as u64, (h + top + bottom) as u64)?;

    let mut layer = RgbaImage::from_pixel(cw, ch, Rgba([color[0], color[1], color[2], 0]));
    stamp_silhouette(&mut layer, src, left + dx, top + dy, color[3]);
    let mut out = if blur > 0.0 {
        imageops::blur(&layer, blur)
    } else {
        layer
    };

    imageops::overlay(&mut out, src, left, top);
    Ok(out)
}

fn glow(src: &RgbaImage, color: Color, radius: u32, intensity: f32) -> Result<RgbaImage, EffectError> {
    if !intensity.is_finite() || intensity < 0.0 {
        return Err(EffectError::InvalidParameter {
            effect: "glow",
            message: format!("intensity must be finite and >= 0, got {intensity}"),
        });
    }
    if radius == 0 {
        return Err(EffectError::InvalidParameter {
            effect: "glow",
            message: "radius must be > 0".to_string(),
        });
    }
    check_radius("glow", "radius", radius as f32)?;

    let (cw, ch) = checked_canvas(
        u64::from(src.width()) + 2 * u64::from(radius),
        u64::from(src.height()) + 2 * u64::from(radius),
    )?;

    let mut layer = RgbaImage::from_pixel(cw, ch, Rgba([color[0], color[1], color[2], 0]));
    stamp_silhouette(&mut layer, src, i64::from(radius), i64::from(radius), color[3]);
    let mut out = imageops::blur(&layer, radius as f32 / 2.0);
    if intensity != 1.0 {
        for px in out.pixels_mut() {
            px[3] = (f32::from(px[3]) * intensity).round().min(255.0) as u8;
        }
    }

    imageops::overlay(&mut out, src, i64::from(radius), i64::from(radius));
    Ok(out)
}

// ────────────────────────────────────────────────────────────────────────────
// Shape transforms (run before the effect list)
// ────────────────────────────────────────────────────────────────────────────

/// Pads the overlay to a centred square and cuts it to an anti-aliased circle.
pub fn circle_mask(src: &RgbaImage) -> Result<RgbaImage, EffectError> {
    if src.width() == 0 || src.height() == 0 {
        return Err(EffectError::EmptyBuffer);
    }
    let side = src.width().max(src.height());
    let pad_x = side - src.width();
    let pad_y = side - src.height();
    let mut square = expand_canvas(src, pad_x / 2, pad_y / 2, pad_x - pad_x / 2, pad_y - pad_y / 2)?;

    let r = side as f32 / 2.0;
    for (x, y, px) in square.enumerate_pixels_mut() {
        let cx = x as f32 + 0.5 - r;
        let cy = y as f32 + 0.5 - r;
        let d = (cx * cx + cy * cy).sqrt();
        let coverage = (r - d + 0.5).clamp(0.0, 1.0);
        px[3] = scale_alpha(px[3], coverage);
    }
    Ok(square)
}

/// Rotates clockwise by `degrees`, growing the canvas to the rotated bounding box.
pub fn rotate_expand(src: &RgbaImage, degrees: f32) -> Result<RgbaImage, EffectError> {
    if !degrees.is_finite() {
        return Err(EffectError::InvalidParameter {
            effect: "rotation",
            message: format!("degrees must be finite, got {degrees}"),
        });
    }
    if src.width() == 0 || src.height() == 0 {
        return Err(EffectError::EmptyBuffer);
    }
    if degrees.rem_euclid(360.0) == 0.0 {
        return Ok(src.clone());
    }

    let theta = f64::from(degrees).to_radians();
    let (sin, cos) = theta.sin_cos();
    let (w, h) = (f64::from(src.width()), f64::from(src.height()));
    let nw = (w * cos.abs() + h * sin.abs() - 1e-6).ceil().max(1.0);
    let nh = (w * sin.abs() + h * cos.abs() - 1e-6).ceil().max(1.0);
    let (out_w, out_h) = checked_canvas(nw as u64, nh as u64)?;

    let (scx, scy) = (w / 2.0, h / 2.0);
    let (dcx, dcy) = (f64::from(out_w) / 2.0, f64::from(out_h) / 2.0);

    Ok(RgbaImage::from_fn(out_w, out_h, |x, y| {
        // Inverse map destination pixel centre back into the source.
        let px = f64::from(x) + 0.5 - dcx;
        let py = f64::from(y) + 0.5 - dcy;
        let sx = px * cos + py * sin + scx - 0.5;
        let sy = -px * sin + py * cos + scy - 0.5;
        sample_bilinear(src, sx, sy)
    }))
}

/// Width-bound, aspect-preserving resize. Never enlarges.
pub fn fit_width(src: &RgbaImage, max_width: u32) -> RgbaImage {
    let max_width = max_width.max(1);
    if src.width() <= max_width {
        return src.clone();
    }
    let height = ((u64::from(src.height()) * u64::from(max_width)) as f64 / f64::from(src.width()))
        .round()
        .max(1.0) as u32;
    imageops::resize(src, max_width, height, imageops::FilterType::Lanczos3)
}

// ────────────────────────────────────────────────────────────────────────────
// Helpers
// ────────────────────────────────────────────────────────────────────────────

fn checked_canvas(width: u64, height: u64) -> Result<(u32, u32), EffectError> {
    if width == 0 || height == 0 {
        return Err(EffectError::EmptyBuffer);
    }
    if width > u64::from(MAX_CANVAS_EXTENT) || height > u64::from(MAX_CANVAS_EXTENT) {
        return Err(EffectError::CanvasTooLarge { width, height });
    }
    Ok((width as u32, height as u32))
}

fn check_radius(effect: &'static str, name: &str, value: f32) -> Result<(), EffectError> {
    if value > MAX_EFFECT_RADIUS as f32 {
        return Err(EffectError::InvalidParameter {
            effect,
            message: format!("{name} must be <= {MAX_EFFECT_RADIUS}, got {value}"),
        });
    }
    Ok(())
}

/// Copies `src` into a transparent canvas with the given margins (no blending).
fn expand_canvas(
    src: &RgbaImage,
    left: u32,
    top: u32,
    right: u32,
    bottom: u32,
) -> Result<RgbaImage, EffectError> {
    let (w, h) = checked_canvas(
        u64::from(src.width()) + u64::from(left) + u64::from(right),
        u64::from(src.height()) + u64::from(top) + u64::from(bottom),
    )?;
    let mut out = RgbaImage::new(w, h);
    imageops::replace(&mut out, src, i64::from(left), i64::from(top));
    Ok(out)
}

/// Writes `src`'s alpha, scaled by `opacity`, into `layer`'s alpha at (ox, oy).
fn stamp_silhouette(layer: &mut RgbaImage, src: &RgbaImage, ox: i64, oy: i64, opacity: u8) {
    let (lw, lh) = (i64::from(layer.width()), i64::from(layer.height()));
    for (x, y, px) in src.enumerate_pixels() {
        let (tx, ty) = (ox + i64::from(x), oy + i64::from(y));
        if tx < 0 || ty < 0 || tx >= lw || ty >= lh {
            continue;
        }
        layer.get_pixel_mut(tx as u32, ty as u32)[3] = mul_u8(px[3], opacity);
    }
}

fn rounded_rect_coverage(x: u32, y: u32, w: u32, h: u32, radius: f32) -> f32 {
    if radius <= 0.0 {
        return 1.0;
    }
    let fx = x as f32 + 0.5;
    let fy = y as f32 + 0.5;
    let cx = fx.clamp(radius, w as f32 - radius);
    let cy = fy.clamp(radius, h as f32 - radius);
    let (dx, dy) = (fx - cx, fy - cy);
    let d = (dx * dx + dy * dy).sqrt();
    (radius - d + 0.5).clamp(0.0, 1.0)
}

fn sample_bilinear(src: &RgbaImage, sx: f64, sy: f64) -> Rgba<u8> {
    let x0 = sx.floor();
    let y0 = sy.floor();
    let fx = sx - x0;
    let fy = sy - y0;

    // Premultiplied accumulation so transparent neighbours do not bleed colour.
    let mut acc = [0.0f64; 4];
    for (ox, oy, weight) in [
        (0.0, 0.0, (1.0 - fx) * (1.0 - fy)),
        (1.0, 0.0, fx * (1.0 - fy)),
        (0.0, 1.0, (1.0 - fx) * fy),
        (1.0, 1.0, fx * fy),
    ] {
        let (px, py) = (x0 + ox, y0 + oy);
        if weight == 0.0
            || px < 0.0
            || py < 0.0
            || px >= f64::from(src.width())
            || py >= f64::from(src.height())
        {
            continue;
        }
        let p = src.get_pixel(px as u32, py as u32);
        let a = f64::from(p[3]) / 255.0;
        for c in 0..3 {
            acc[c] += f64::from(p[c]) * a * weight;
        }
        acc[3] += a * weight;
    }

    if acc[3] <= 0.0 {
        return Rgba([0, 0, 0, 0]);
    }
    let unpremul = |v: f64| (v / acc[3]).round().clamp(0.0, 255.0) as u8;
    Rgba([
        unpremul(acc[0]),
        unpremul(acc[1]),
        unpremul(acc[2]),
        (acc[3] * 255.0).round().clamp(0.0, 255.0) as u8,
    ])
}

fn scale_alpha(alpha: u8, coverage: f32) -> u8 {
    (f32::from(alpha) * coverage).round().clamp(0.0, 255.0) as u8
}

fn mul_u8(a: u8, b: u8) -> u8 {
    ((u32::from(a) * u32::from(b) + 127) / 255) as u8
}
