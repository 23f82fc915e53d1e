//! Skin sampling from fixed facial regions.
//!
//! Each region is a fraction of the normalized face crop. Pixels inside a
//! region are kept when any of three colour-space skin rules accepts them;
//! a region with too few skin pixels is dropped. When no region survives,
//! the unfiltered centre of the crop is used instead and the sample set is
//! flagged as a fallback.

use crate::color;
use crate::config::SamplerConfig;
use crate::lighting::NormalizedCrop;
use crate::types::{PixelRect, RegionSample, RegionTag, Rgb};

/// Facial regions as `(tag, x, y, width, height)` fractions of the face crop.
pub const FACE_REGIONS: [(RegionTag, f32, f32, f32, f32); 5] = [
    (RegionTag::Forehead, 0.30, 0.10, 0.40, 0.15),
    (RegionTag::LeftCheek, 0.15, 0.45, 0.20, 0.20),
    (RegionTag::RightCheek, 0.65, 0.45, 0.20, 0.20),
    (RegionTag::NoseBridge, 0.42, 0.35, 0.16, 0.15),
    (RegionTag::Chin, 0.35, 0.80, 0.30, 0.12),
];

/// Centre of the crop sampled without skin filtering when every region fails.
const CENTER_REGION: (f32, f32, f32, f32) = (0.25, 0.25, 0.5, 0.5);

/// Samples for one face.
#[derive(Debug, Clone)]
pub struct SampleSet {
    /// Contributing regions in [`FACE_REGIONS`] order, or a single
    /// [`RegionTag::Center`] sample on fallback.
    pub regions: Vec<RegionSample>,
    pub fallback: bool,
}

impl SampleSet {
    pub fn pixel_count(&self) -> usize {
        self.regions.iter().map(|r| r.pixels.len()).sum()
    }
}

/// Explicit RGB rule: warm ordering with minimum channel levels.
pub fn is_skin_rgb(rgb: Rgb) -> bool {
    let [r, g, b] = rgb;
    r >= g
        && g >= b
        && r > 40
        && g > 25
        && b > 15
        && r as u16 + g as u16 + b as u16 >= 120
}

/// Chrominance box in YCbCr, with a luma floor.
pub fn is_skin_ycbcr(rgb: Rgb) -> bool {
    let (y, cb, cr) = color::rgb_to_ycbcr(rgb);
    y > 80.0 && (77.0..=127.0).contains(&cb) && (133.0..=173.0).contains(&cr)
}

/// Red-to-orange hue band with moderate saturation.
pub fn is_skin_hsv(rgb: Rgb) -> bool {
    let (hue, s, v) = color::rgb_to_hsv(rgb);
    (hue <= 50.0 || hue >= 340.0) && (0.05..=0.70).contains(&s) && v >= 0.35
}

/// A pixel is skin if any rule accepts it.
pub fn is_skin(rgb: Rgb) -> bool {
    is_skin_rgb(rgb) || is_skin_ycbcr(rgb) || is_skin_hsv(rgb)
}

/// Sample skin pixels from the facial regions of a normalized crop.
pub fn sample_regions(crop: &NormalizedCrop, config: &SamplerConfig) -> SampleSet {
    let image = crop.image();
    let bounds = PixelRect::new(0, 0, crop.width(), crop.height());

    let mut regions = Vec::with_capacity(FACE_REGIONS.len());
    for &(tag, fx, fy, fw, fh) in &FACE_REGIONS {
        let rect = bounds.fraction(fx, fy, fw, fh);
        let pixels: Vec<Rgb> = region_pixels(image, rect).filter(|&p| is_skin(p)).collect();
        if pixels.len() < config.min_region_pixels {
            tracing::debug!(
                region = %tag,
                skin = pixels.len(),
                min = config.min_region_pixels,
                "region skipped"
            );
            continue;
        }
        regions.push(RegionSample { tag, pixels });
    }

    if !regions.is_empty() {
        tracing::debug!(regions = regions.len(), "skin regions sampled");
        return SampleSet {
            regions,
            fallback: false,
        };
    }

    let (fx, fy, fw, fh) = CENTER_REGION;
    let rect = bounds.fraction(fx, fy, fw, fh);
    let pixels: Vec<Rgb> = region_pixels(image, rect).collect();
    tracing::warn!(pixels = pixels.len(), "no skin region qualified; sampling crop centre");
    SampleSet {
        regions: vec![RegionSample {
            tag: RegionTag::Center,
            pixels,
        }],
        fallback: true,
    }
}

fn region_pixels(image: &image::RgbImage, rect: PixelRect) -> impl Iterator<Item = Rgb> + '_ {
    (rect.y..rect.y + rect.height).flat_map(move |y| {
        (rect.x..rect.x + rect.width).filter_map(move |x| image.get_pixel_checked(x, y).map(|p| p.0))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LightingConfig, LightingMethod};
    use crate::lighting::normalize_lighting;
    use image::RgbImage;

    fn crop_of(img: RgbImage) -> NormalizedCrop {
        let off = LightingConfig {
            method: LightingMethod::Off,
            ..LightingConfig::default()
        };
        normalize_lighting(img, &off)
    }

    #[test]
    fn test_reference_skin_is_skin() {
        for rgb in [
            [246, 237, 228],
            [215, 189, 150],
            [160, 126, 86],
            [96, 65, 52],
            [58, 49, 42],
        ] {
            assert!(is_skin(rgb), "{rgb:?}");
        }
    }

    #[test]
    fn test_non_skin_rejected() {
        for rgb in [[20, 60, 200], [110, 60, 90], [30, 160, 40], [10, 10, 10]] {
            assert!(!is_skin(rgb), "{rgb:?}");
        }
    }

    #[test]
    fn test_rgb_rule_needs_warm_order() {
        assert!(is_skin_rgb([200, 150, 120]));
        assert!(!is_skin_rgb([120, 150, 200]));
        assert!(!is_skin_rgb([40, 30, 20]));
    }

    #[test]
    fn test_uniform_skin_fills_every_region() {
        let img = RgbImage::from_pixel(240, 240, image::Rgb([215, 189, 150]));
        let set = sample_regions(&crop_of(img), &SamplerConfig::default());
        assert!(!set.fallback);
        let tags: Vec<RegionTag> = set.regions.iter().map(|r| r.tag).collect();
        assert_eq!(tags, FACE_REGIONS.map(|r| r.0).to_vec());
        assert_eq!(set.regions[0].pixels.len(), 96 * 36);
    }

    #[test]
    fn test_no_skin_uses_centre() {
        let img = RgbImage::from_pixel(200, 200, image::Rgb([20, 60, 200]));
        let set = sample_regions(&crop_of(img), &SamplerConfig::default());
        assert!(set.fallback);
        assert_eq!(set.regions.len(), 1);
        assert_eq!(set.regions[0].tag, RegionTag::Center);
        assert_eq!(set.pixel_count(), 100 * 100);
        assert_eq!(set.regions[0].mean(), [20.0, 60.0, 200.0]);
    }

    #[test]
    fn test_region_below_minimum_is_dropped() {
        // Skin only in the lower half: forehead and nose bridge lose out.
        let mut img = RgbImage::from_pixel(200, 200, image::Rgb([20, 60, 200]));
        for y in 100..200 {
            for x in 0..200 {
                img.put_pixel(x, y, image::Rgb([200, 160, 130]));
            }
        }
        let set = sample_regions(&crop_of(img), &SamplerConfig::default());
        assert!(!set.fallback);
        let tags: Vec<RegionTag> = set.regions.iter().map(|r| r.tag).collect();
        assert!(!tags.contains(&RegionTag::Forehead));
        assert!(!tags.contains(&RegionTag::NoseBridge));
        assert!(tags.contains(&RegionTag::Chin));
    }

    #[test]
    fn test_tiny_crop_falls_back() {
        let img = RgbImage::from_pixel(4, 4, image::Rgb([215, 189, 150]));
        let set = sample_regions(&crop_of(img), &SamplerConfig::default());
        assert!(set.fallback);
        assert!(set.pixel_count() > 0);
    }
}
