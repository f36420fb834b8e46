//! Placement Calculator: maps a symbolic anchor to absolute overlay coordinates.
//!
//! Pure function, no image access. All nine anchors share one padding constant.
//! When the overlay does not fit inside `base - 2 * padding` the computed
//! coordinate is clamped to 0 on that axis (the overlay then hangs off the
//! right/bottom edge and is clipped by the final overlay operation).

use serde::{Deserialize, Serialize};

/// Distance in pixels kept between the overlay and the base image edge.
pub const PLACEMENT_PADDING: i64 = 35;

/// One of the nine symbolic positions an overlay can be pinned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Anchor {
    TopLeft,
    TopCenter,
    TopRight,
    CenterLeft,
    Center,
    CenterRight,
    BottomLeft,
    BottomCenter,
    BottomRight,
}

impl Anchor {
    pub const ALL: [Anchor; 9] = [
        Anchor::TopLeft,
        Anchor::TopCenter,
        Anchor::TopRight,
        Anchor::CenterLeft,
        Anchor::Center,
        Anchor::CenterRight,
        Anchor::BottomLeft,
        Anchor::BottomCenter,
        Anchor::BottomRight,
    ];
}

/// Computes the top-left pixel at which an `overlay_w × overlay_h` overlay is drawn
/// on a `base_w × base_h` base for the given anchor.
pub fn place(base_w: u32, base_h: u32, overlay_w: u32, overlay_h: u32, anchor: Anchor) -> (u32, u32) {
    let (bw, bh) = (i64::from(base_w), i64::from(base_h));
    let (ow, oh) = (i64::from(overlay_w), i64::from(overlay_h));
    let p = PLACEMENT_PADDING;

    let left = p;
    let h_center = (bw - ow) / 2;
    let right = bw - ow - p;
    let top = p;
    let v_center = (bh - oh) / 2;
    let bottom = bh - oh - p;

    let (x, y) = match anchor {
        Anchor::TopLeft => (left, top),
        Anchor::TopCenter => (h_center, top),
        Anchor::TopRight => (right, top),
        Anchor::CenterLeft => (left, v_center),
        Anchor::Center => (h_center, v_center),
        Anchor::CenterRight => (right, v_center),
        Anchor::BottomLeft => (left, bottom),
        Anchor::BottomCenter => (h_center, bottom),
        Anchor::BottomRight => (right, bottom),
    };

    (clamp_axis(x), clamp_axis(y))
}

fn clamp_axis(v: i64) -> u32 {
    v.clamp(0, i64::from(u32::MAX)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bottom_right_uses_padding() {
        assert_eq!(place(1000, 1000, 100, 100, Anchor::BottomRight), (865, 865));
    }

    #[test]
    fn test_all_corners_and_edges() {
        let cases = [
            (Anchor::TopLeft, (35, 35)),
            (Anchor::TopCenter, (450, 35)),
            (Anchor::TopRight, (865, 35)),
            (Anchor::CenterLeft, (35, 350)),
            (Anchor::Center, (450, 350)),
            (Anchor::CenterRight, (865, 350)),
            (Anchor::BottomLeft, (35, 665)),
            (Anchor::BottomCenter, (450, 665)),
            (Anchor::BottomRight, (865, 665)),
        ];
        for (anchor, expected) in cases {
            assert_eq!(
                place(1000, 800, 100, 100, anchor),
                expected,
                "wrong placement for {anchor:?}"
            );
        }
    }

    #[test]
    fn test_never_negative_when_overlay_fits() {
        // overlay exactly base - 2 * padding on both axes
        for anchor in Anchor::ALL {
            let (x, y) = place(500, 400, 430, 330, anchor);
            assert!(x + 430 <= 500, "{anchor:?} overflows horizontally");
            assert!(y + 330 <= 400, "{anchor:?} overflows vertically");
        }
    }

    #[test]
    fn test_oversized_overlay_clamps_to_zero() {
        assert_eq!(place(200, 200, 400, 400, Anchor::BottomRight), (0, 0));
        assert_eq!(place(200, 200, 400, 400, Anchor::Center), (0, 0));
        // only the overflowing axis clamps
        assert_eq!(place(1000, 200, 100, 400, Anchor::BottomRight), (865, 0));
    }

    #[test]
    fn test_anchor_serde_is_kebab_case() {
        let json = serde_json::to_string(&Anchor::BottomRight).unwrap();
        assert_eq!(json, "\"bottom-right\"");
        let parsed: Anchor = serde_json::from_str("\"center-left\"").unwrap();
        assert_eq!(parsed, Anchor::CenterLeft);
    }
}
