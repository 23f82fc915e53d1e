use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// 8-bit sRGB triple.
pub type Rgb = [u8; 3];

/// Detector output: a scored face box in source-image pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32, confidence: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            confidence,
        }
    }
}

/// Integer pixel rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Sub-rectangle given as fractions of this rectangle's size, relative to
    /// its own origin. Never empty and never extends past `width`×`height`.
    pub fn fraction(&self, fx: f32, fy: f32, fw: f32, fh: f32) -> PixelRect {
        let w = self.width.max(1);
        let h = self.height.max(1);
        let scaled = |f: f32, size: u32| (f.max(0.0) * size as f32).round() as u32;
        let x = scaled(fx, w).min(w - 1);
        let y = scaled(fy, h).min(h - 1);
        let width = scaled(fw, w).clamp(1, w - x);
        let height = scaled(fh, h).clamp(1, h - y);
        PixelRect::new(x, y, width, height)
    }
}

/// A located face crop, ephemeral per request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceRegion {
    /// Crop in source-image pixels, padded and clipped to the image.
    pub rect: PixelRect,
    /// Detector confidence; 0.0 for the centre-crop fallback.
    pub detector_confidence: f32,
    /// False when the region is the centre-crop fallback.
    pub detected: bool,
}

/// Anatomical source of a skin sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionTag {
    Forehead,
    LeftCheek,
    RightCheek,
    NoseBridge,
    Chin,
    /// Unfiltered centre of the face crop, used when no region qualifies.
    Center,
}

impl RegionTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegionTag::Forehead => "forehead",
            RegionTag::LeftCheek => "left_cheek",
            RegionTag::RightCheek => "right_cheek",
            RegionTag::NoseBridge => "nose_bridge",
            RegionTag::Chin => "chin",
            RegionTag::Center => "center",
        }
    }
}

impl fmt::Display for RegionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pixels accepted as skin inside one region.
#[derive(Debug, Clone)]
pub struct RegionSample {
    pub tag: RegionTag,
    pub pixels: Vec<Rgb>,
}

impl RegionSample {
    /// Per-channel mean. Zero for an empty sample.
    pub fn mean(&self) -> [f32; 3] {
        if self.pixels.is_empty() {
            return [0.0; 3];
        }
        let mut sum = [0.0f64; 3];
        for px in &self.pixels {
            for c in 0..3 {
                sum[c] += px[c] as f64;
            }
        }
        let n = self.pixels.len() as f64;
        [(sum[0] / n) as f32, (sum[1] / n) as f32, (sum[2] / n) as f32]
    }
}

/// Representative colour fused from all region samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedColor {
    pub rgb: Rgb,
    pub regions_contributing: usize,
    /// Mean per-channel variance of the pooled pixels.
    pub variance: f32,
    /// Colour-confidence in [0, 1] from sample tightness and region agreement.
    pub confidence: f32,
    /// True when the colour came from the unfiltered centre crop.
    pub fallback: bool,
}

/// Identifier of a classification method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    /// Individual Typology Angle over CIE L*a*b*.
    Angle,
    /// Mean RGB against a descending threshold ladder.
    Brightness,
    /// Nearest reference tone.
    Distance,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Angle => "angle",
            Method::Brightness => "brightness",
            Method::Distance => "distance",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One method's opinion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationVote {
    pub method: Method,
    pub tone_index: u8,
    pub confidence: f32,
    /// Method-specific numbers (angle, brightness, distance...) kept for threshold tuning.
    pub diagnostics: BTreeMap<String, f32>,
}

/// Per-region report carried on the result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionReport {
    pub tag: RegionTag,
    pub pixels: usize,
    pub mean_rgb: Rgb,
}

/// Final answer for one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    /// e.g. "Monk 4".
    pub tone_label: String,
    /// e.g. "Monk04".
    pub tone_id: String,
    pub tone_index: u8,
    /// "#rrggbb" of the reference tone.
    pub reference_hex: String,
    /// "#rrggbb" of the aggregate colour.
    pub derived_hex: String,
    pub dominant_rgb: Rgb,
    /// Winning vote's confidence, two decimals.
    pub confidence: f32,
    pub color_confidence: f32,
    pub success: bool,
    pub analysis_method: String,
    pub regions_analyzed: usize,
    pub face_detected: bool,
    pub votes: Vec<ClassificationVote>,
    pub regions: Vec<RegionReport>,
    /// Why the result is degraded, if it is.
    pub degraded: Option<String>,
}

/// Round to two decimals and clamp to [0, 1].
pub fn round_confidence(value: f32) -> f32 {
    if !value.is_finite() {
        return 0.0;
    }
    ((value.clamp(0.0, 1.0) * 100.0).round() / 100.0).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fraction_stays_inside() {
        let rect = PixelRect::new(0, 0, 240, 240);
        let sub = rect.fraction(0.30, 0.10, 0.40, 0.15);
        assert_eq!(sub, PixelRect::new(72, 24, 96, 36));

        let edge = rect.fraction(0.95, 0.95, 0.5, 0.5);
        assert!(edge.x + edge.width <= 240);
        assert!(edge.y + edge.height <= 240);
    }

    #[test]
    fn test_fraction_never_empty() {
        let rect = PixelRect::new(5, 5, 3, 3);
        let sub = rect.fraction(0.5, 0.5, 0.01, 0.01);
        assert_eq!(sub.width, 1);
        assert_eq!(sub.height, 1);
    }

    #[test]
    fn test_region_mean() {
        let sample = RegionSample {
            tag: RegionTag::Chin,
            pixels: vec![[10, 20, 30], [30, 40, 50]],
        };
        assert_eq!(sample.mean(), [20.0, 30.0, 40.0]);
    }

    #[test]
    fn test_region_mean_empty() {
        let sample = RegionSample {
            tag: RegionTag::Center,
            pixels: vec![],
        };
        assert_eq!(sample.mean(), [0.0; 3]);
    }

    #[test]
    fn test_round_confidence() {
        assert_eq!(round_confidence(0.956), 0.96);
        assert_eq!(round_confidence(1.7), 1.0);
        assert_eq!(round_confidence(-0.3), 0.0);
        assert_eq!(round_confidence(f32::NAN), 0.0);
    }

    #[test]
    fn test_method_serde_names() {
        let json = serde_json::to_string(&Method::Distance).unwrap();
        assert_eq!(json, "\"distance\"");
        let tag: RegionTag = serde_json::from_str("\"left_cheek\"").unwrap();
        assert_eq!(tag, RegionTag::LeftCheek);
    }
}
