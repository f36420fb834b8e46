//! Compositor: lays a treated logo onto a generated image.
//!
//! Flow: scale (width-bound) → shape mask → rotation → effect chain →
//! placement → alpha-over.
//!
//! Individual steps degrade: a failing shape, rotation or effect is skipped.
//! If the composite cannot be produced at all the caller gets the base image
//! back untouched together with the failure, never an error.

use std::io::Cursor;

use image::{imageops, ImageFormat, RgbaImage};
use thiserror::Error;
use tracing::{debug, warn};

use crate::compositor::effects::{apply_chain, circle_mask, fit_width, rotate_expand, SkippedEffect};
use crate::compositor::placement::place;
use crate::compositor::spec::{CompositionSpec, OverlayShape};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CompositeError {
    #[error("failed to decode {which} image: {message}")]
    Decode { which: &'static str, message: String },

    #[error("{which} image has no pixels")]
    EmptyImage { which: &'static str },

    #[error("overlay scale must be finite and > 0, got {0}")]
    InvalidScale(f64),

    #[error("failed to encode composited image: {0}")]
    Encode(String),
}

/// Result of a composite call. `failure` is set when the logo could not be
/// applied; `image` is then the untouched base.
#[derive(Debug, Clone)]
pub struct CompositedImage {
    pub image: RgbaImage,
    pub placement: Option<(u32, u32)>,
    pub skipped_effects: Vec<SkippedEffect>,
    pub failure: Option<CompositeError>,
}

impl CompositedImage {
    pub fn logo_applied(&self) -> bool {
        self.failure.is_none()
    }
}

/// Encoded counterpart of [`CompositedImage`], PNG bytes on success.
#[derive(Debug, Clone)]
pub struct EncodedComposite {
    pub bytes: Vec<u8>,
    pub skipped_effects: Vec<SkippedEffect>,
    pub failure: Option<CompositeError>,
}

impl EncodedComposite {
    pub fn logo_applied(&self) -> bool {
        self.failure.is_none()
    }
}

pub fn composite(base: &RgbaImage, overlay: &RgbaImage, spec: &CompositionSpec) -> CompositedImage {
    match try_composite(base, overlay, spec) {
        Ok((image, placement, skipped_effects)) => CompositedImage {
            image,
            placement: Some(placement),
            skipped_effects,
            failure: None,
        },
        Err(e) => {
            warn!("Logo composite failed, returning base image unchanged: {e}");
            CompositedImage {
                image: base.clone(),
                placement: None,
                skipped_effects: Vec::new(),
                failure: Some(e),
            }
        }
    }
}

/// Decodes both images, composites, and encodes the result as PNG.
/// On any failure the original `base` bytes come back unchanged.
pub fn composite_encoded(base: &[u8], overlay: &[u8], spec: &CompositionSpec) -> EncodedComposite {
    let untouched = |failure: CompositeError| {
        warn!("Logo composite failed, keeping original image bytes: {failure}");
        EncodedComposite {
            bytes: base.to_vec(),
            skipped_effects: Vec::new(),
            failure: Some(failure),
        }
    };

    let base_img = match decode_rgba(base, "base") {
        Ok(img) => img,
        Err(e) => return untouched(e),
    };
    let overlay_img = match decode_rgba(overlay, "overlay") {
        Ok(img) => img,
        Err(e) => return untouched(e),
    };

    let composited = composite(&base_img, &overlay_img, spec);
    if let Some(failure) = composited.failure {
        return EncodedComposite {
            bytes: base.to_vec(),
            skipped_effects: Vec::new(),
            failure: Some(failure),
        };
    }

    match encode_png(&composited.image) {
        Ok(bytes) => EncodedComposite {
            bytes,
            skipped_effects: composited.skipped_effects,
            failure: None,
        },
        Err(e) => untouched(e),
    }
}

pub fn decode_rgba(bytes: &[u8], which: &'static str) -> Result<RgbaImage, CompositeError> {
    image::load_from_memory(bytes)
        .map(|img| img.to_rgba8())
        .map_err(|e| CompositeError::Decode {
            which,
            message: e.to_string(),
        })
}

pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, CompositeError> {
    let mut buf = Cursor::new(Vec::new());
    image
        .write_to(&mut buf, ImageFormat::Png)
        .map_err(|e| CompositeError::Encode(e.to_string()))?;
    Ok(buf.into_inner())
}

fn try_composite(
    base: &RgbaImage,
    overlay: &RgbaImage,
    spec: &CompositionSpec,
) -> Result<(RgbaImage, (u32, u32), Vec<SkippedEffect>), CompositeError> {
    let (base_w, base_h) = base.dimensions();
    if base_w == 0 || base_h == 0 {
        return Err(CompositeError::EmptyImage { which: "base" });
    }
    if overlay.width() == 0 || overlay.height() == 0 {
        return Err(CompositeError::EmptyImage { which: "overlay" });
    }

    let scale = spec.transform.scale;
    if !scale.is_finite() || scale <= 0.0 {
        return Err(CompositeError::InvalidScale(scale));
    }

    let target_w = (f64::from(base_w) * scale).round().clamp(1.0, f64::from(u32::MAX)) as u32;
    let mut logo = fit_width(overlay, target_w);
    let mut skipped = Vec::new();

    if spec.transform.shape == OverlayShape::Circle {
        match circle_mask(&logo) {
            Ok(masked) => logo = masked,
            Err(error) => {
                warn!("Skipping circle mask: {error}");
                skipped.push(SkippedEffect {
                    index: None,
                    effect: "circle_mask",
                    error,
                });
            }
        }
    }

    if let Some(degrees) = spec.transform.rotation {
        match rotate_expand(&logo, degrees) {
            Ok(rotated) => logo = rotated,
            Err(error) => {
                warn!("Skipping rotation: {error}");
                skipped.push(SkippedEffect {
                    index: None,
                    effect: "rotation",
                    error,
                });
            }
        }
    }

    let (logo, chain_skipped) = apply_chain(logo, &spec.effects);
    skipped.extend(chain_skipped);

    let (logo_w, logo_h) = logo.dimensions();
    let (x, y) = place(base_w, base_h, logo_w, logo_h, spec.anchor);
    debug!(
        logo_w,
        logo_h,
        x,
        y,
        anchor = ?spec.anchor,
        "Placing logo"
    );

    let mut out = base.clone();
    imageops::overlay(&mut out, &logo, i64::from(x), i64::from(y));
    Ok((out, (x, y), skipped))
}
