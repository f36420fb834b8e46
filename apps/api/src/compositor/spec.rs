//! Composition data: how a logo is treated before it is laid onto a generated image.
//!
//! A `CompositionSpec` is immutable catalog data: each style carries one and the
//! compositor reads it once per placement call.

use serde::{Deserialize, Serialize};

use crate::compositor::placement::Anchor;

/// Straight (non-premultiplied) RGBA colour.
pub type Color = [u8; 4];

/// Shape applied to the overlay before effects run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlayShape {
    #[default]
    Original,
    Circle,
}

/// Geometric treatment of the overlay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayTransform {
    /// Upper bound on overlay width as a fraction of the base image width.
    pub scale: f64,
    /// Clockwise rotation in degrees; the canvas grows so nothing is clipped.
    #[serde(default)]
    pub rotation: Option<f32>,
    #[serde(default)]
    pub shape: OverlayShape,
}

impl Default for OverlayTransform {
    fn default() -> Self {
        Self {
            scale: 0.15,
            rotation: None,
            shape: OverlayShape::Original,
        }
    }
}

/// One step of the effect chain. Each variant consumes the current overlay
/// buffer and produces a new, generally larger one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Effect {
    /// Rounded plate behind the overlay, `padding` pixels on every side.
    Background {
        color: Color,
        padding: u32,
        #[serde(default)]
        corner_radius: u32,
    },
    /// Outline that follows the overlay's alpha silhouette.
    Border { color: Color, width: u32 },
    /// Offset, blurred silhouette drawn behind the overlay. `color[3]` is the opacity.
    Shadow {
        color: Color,
        offset_x: i32,
        offset_y: i32,
        blur: f32,
    },
    /// Blurred silhouette on all sides, alpha scaled by `intensity`.
    Glow {
        color: Color,
        radius: u32,
        intensity: f32,
    },
}

impl Effect {
    pub fn name(&self) -> &'static str {
        match self {
            Effect::Background { .. } => "background",
            Effect::Border { .. } => "border",
            Effect::Shadow { .. } => "shadow",
            Effect::Glow { .. } => "glow",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositionSpec {
    #[serde(default)]
    pub transform: OverlayTransform,
    /// Applied strictly in list order.
    #[serde(default)]
    pub effects: Vec<Effect>,
    pub anchor: Anchor,
}

impl CompositionSpec {
    /// Same treatment, different anchor. Used when a request pins the logo position.
    pub fn with_anchor(&self, anchor: Anchor) -> Self {
        Self {
            anchor,
            ..self.clone()
        }
    }
}

impl Default for CompositionSpec {
    fn default() -> Self {
        Self {
            transform: OverlayTransform::default(),
            effects: Vec::new(),
            anchor: Anchor::BottomRight,
        }
    }
}
