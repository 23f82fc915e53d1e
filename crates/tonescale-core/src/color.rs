//! Colour-space conversions and distances over 8-bit sRGB.

use crate::types::Rgb;
use palette::{FromColor, Hsv, Lab, Srgb};
use serde::{Deserialize, Serialize};

/// Largest Euclidean distance between two 8-bit RGB colours (black to white).
pub const MAX_RGB_DISTANCE: f32 = 441.672_96;

/// CIE76 ΔE between black and white. Saturated colours can exceed it.
pub const MAX_LAB_DISTANCE: f32 = 100.0;

pub fn to_srgb(rgb: Rgb) -> Srgb {
    Srgb::new(rgb[0], rgb[1], rgb[2]).into_format()
}

/// Convert 8-bit sRGB to CIE L*a*b* (D65).
pub fn rgb_to_lab(rgb: Rgb) -> Lab {
    Lab::from_color(to_srgb(rgb))
}

/// Convert CIE L*a*b* back to 8-bit sRGB, clamping out-of-gamut values.
pub fn lab_to_rgb(lab: Lab) -> Rgb {
    let srgb: Srgb = Srgb::from_color(lab);
    [
        unit_to_u8(srgb.red),
        unit_to_u8(srgb.green),
        unit_to_u8(srgb.blue),
    ]
}

fn unit_to_u8(v: f32) -> u8 {
    if !v.is_finite() {
        return 0;
    }
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Hue in degrees [0, 360), saturation and value in [0, 1].
pub fn rgb_to_hsv(rgb: Rgb) -> (f32, f32, f32) {
    let hsv: Hsv = Hsv::from_color(to_srgb(rgb));
    (hsv.hue.into_positive_degrees(), hsv.saturation, hsv.value)
}

/// Full-range BT.601 YCbCr, each channel on 0–255.
pub fn rgb_to_ycbcr(rgb: Rgb) -> (f32, f32, f32) {
    let r = rgb[0] as f32;
    let g = rgb[1] as f32;
    let b = rgb[2] as f32;
    let y = 0.299 * r + 0.587 * g + 0.114 * b;
    let cr = (r - y) * 0.713 + 128.0;
    let cb = (b - y) * 0.564 + 128.0;
    (y, cb, cr)
}

/// Mean of the three channels (0.0–255.0).
pub fn brightness(rgb: Rgb) -> f32 {
    (rgb[0] as f32 + rgb[1] as f32 + rgb[2] as f32) / 3.0
}

/// Lowercase `#rrggbb`.
pub fn to_hex(rgb: Rgb) -> String {
    format!("#{:02x}{:02x}{:02x}", rgb[0], rgb[1], rgb[2])
}

/// Parse `#rrggbb` or `rrggbb`, either case.
pub fn parse_hex(hex: &str) -> Option<Rgb> {
    let hex = hex.trim().trim_start_matches('#');
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
    let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
    let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
    Some([r, g, b])
}

/// Round a floating-point colour to 8-bit channels.
pub fn quantize(rgb: [f32; 3]) -> Rgb {
    rgb.map(|c| {
        if c.is_finite() {
            c.round().clamp(0.0, 255.0) as u8
        } else {
            0
        }
    })
}

/// Distance used by the nearest-reference classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Euclidean distance over 8-bit RGB.
    #[default]
    Rgb,
    /// CIE76 ΔE over L*a*b*.
    Lab,
}

impl DistanceMetric {
    pub fn distance(self, a: Rgb, b: Rgb) -> f32 {
        match self {
            DistanceMetric::Rgb => a
                .iter()
                .zip(b.iter())
                .map(|(&x, &y)| (x as f32 - y as f32).powi(2))
                .sum::<f32>()
                .sqrt(),
            DistanceMetric::Lab => {
                let la = rgb_to_lab(a);
                let lb = rgb_to_lab(b);
                ((la.l - lb.l).powi(2) + (la.a - lb.a).powi(2) + (la.b - lb.b).powi(2)).sqrt()
            }
        }
    }

    pub fn max_distance(self) -> f32 {
        match self {
            DistanceMetric::Rgb => MAX_RGB_DISTANCE,
            DistanceMetric::Lab => MAX_LAB_DISTANCE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lab_of_reference_skin() {
        let lab = rgb_to_lab([215, 189, 150]);
        assert!((lab.l - 77.9).abs() < 0.3, "L = {}", lab.l);
        assert!((lab.b - 23.1).abs() < 0.5, "b = {}", lab.b);
    }

    #[test]
    fn test_lab_roundtrip() {
        for rgb in [[246, 237, 228], [41, 36, 32], [160, 126, 86], [0, 0, 0], [255, 255, 255]] {
            let back = lab_to_rgb(rgb_to_lab(rgb));
            for c in 0..3 {
                assert!((back[c] as i32 - rgb[c] as i32).abs() <= 1, "{rgb:?} -> {back:?}");
            }
        }
    }

    #[test]
    fn test_hsv_hue_wraps() {
        let (h, s, v) = rgb_to_hsv([255, 0, 0]);
        assert!(h.abs() < 1e-3);
        assert!((s - 1.0).abs() < 1e-6);
        assert!((v - 1.0).abs() < 1e-6);

        let (h, _, _) = rgb_to_hsv([255, 0, 40]);
        assert!(h > 340.0 && h < 360.0, "hue = {h}");
    }

    #[test]
    fn test_ycbcr_neutral_grey() {
        let (y, cb, cr) = rgb_to_ycbcr([128, 128, 128]);
        assert!((y - 128.0).abs() < 0.01);
        assert!((cb - 128.0).abs() < 0.01);
        assert!((cr - 128.0).abs() < 0.01);
    }

    #[test]
    fn test_hex_roundtrip() {
        assert_eq!(to_hex([215, 189, 150]), "#d7bd96");
        assert_eq!(parse_hex("#D7BD96"), Some([215, 189, 150]));
        assert_eq!(parse_hex("d7bd96"), Some([215, 189, 150]));
        assert_eq!(parse_hex("#d7bd9"), None);
        assert_eq!(parse_hex("#zzbd96"), None);
    }

    #[test]
    fn test_rgb_distance_extremes() {
        let d = DistanceMetric::Rgb.distance([0, 0, 0], [255, 255, 255]);
        assert!((d - MAX_RGB_DISTANCE).abs() < 1e-2);
        assert_eq!(DistanceMetric::Rgb.distance([1, 2, 3], [1, 2, 3]), 0.0);
    }

    #[test]
    fn test_lab_distance_black_white() {
        let d = DistanceMetric::Lab.distance([0, 0, 0], [255, 255, 255]);
        assert!((d - MAX_LAB_DISTANCE).abs() < 0.5, "ΔE = {d}");
    }

    #[test]
    fn test_quantize_clamps() {
        assert_eq!(quantize([-3.0, 127.6, 300.0]), [0, 128, 255]);
        assert_eq!(quantize([f32::NAN, 1.0, 2.4]), [0, 1, 2]);
    }
}
