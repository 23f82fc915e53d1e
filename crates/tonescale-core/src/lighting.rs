//! Lighting normalization for face crops.
//!
//! Equalizes L* with contrast-limited adaptive histogram equalization (CLAHE)
//! while keeping a* and b* untouched, so chroma (and with it the skin hue)
//! survives the correction. The clip limit adapts to the crop's mean
//! lightness: bright crops are barely touched, dim ones are stretched harder.

use crate::color;
use crate::config::{LightingConfig, LightingMethod};
use image::RgbImage;
use palette::Lab;

/// Smallest CLAHE tile side in pixels. Smaller tiles turn flat skin into noise.
const MIN_TILE_SIDE: u32 = 16;

/// A face crop that has been through lighting normalization exactly once.
///
/// The sampler only accepts this type, so a crop cannot skip normalization
/// or be normalized twice.
#[derive(Debug, Clone)]
pub struct NormalizedCrop(RgbImage);

impl NormalizedCrop {
    pub fn image(&self) -> &RgbImage {
        &self.0
    }

    pub fn width(&self) -> u32 {
        self.0.width()
    }

    pub fn height(&self) -> u32 {
        self.0.height()
    }

    pub fn into_inner(self) -> RgbImage {
        self.0
    }
}

/// CLAHE clip limit (in multiples of a uniform histogram bin) for a crop
/// whose mean L* on a 0–255 scale is `mean_l`.
pub fn adaptive_clip_limit(mean_l: f32) -> f32 {
    if mean_l >= 170.0 {
        1.2
    } else if mean_l >= 90.0 {
        2.0
    } else {
        3.0
    }
}

/// Gamma applied to L* before equalization, if any.
pub fn adaptive_gamma(mean_l: f32) -> Option<f32> {
    if mean_l < 80.0 {
        Some(0.8)
    } else if mean_l > 245.0 {
        Some(1.1)
    } else {
        None
    }
}

/// Normalize lighting of a face crop.
///
/// A crop too small for a 2×2 tile grid passes through unchanged.
pub fn normalize_lighting(crop: RgbImage, config: &LightingConfig) -> NormalizedCrop {
    if config.method == LightingMethod::Off || crop.width() == 0 || crop.height() == 0 {
        return NormalizedCrop(crop);
    }

    let (width, height) = crop.dimensions();
    let labs: Vec<Lab> = crop.pixels().map(|p| color::rgb_to_lab(p.0)).collect();
    let mut luma: Vec<u8> = labs
        .iter()
        .map(|lab| (lab.l * 255.0 / 100.0).round().clamp(0.0, 255.0) as u8)
        .collect();

    let mean_l = luma.iter().map(|&v| v as f64).sum::<f64>() / luma.len() as f64;
    let mean_l = mean_l as f32;
    let clip_limit = adaptive_clip_limit(mean_l);

    let gamma = if config.gamma {
        adaptive_gamma(mean_l)
    } else {
        None
    };
    if let Some(g) = gamma {
        apply_gamma(&mut luma, g);
    }

    let tiles = effective_tiles(width, height, config.tiles);
    tracing::debug!(
        width,
        height,
        mean_l,
        clip_limit,
        ?gamma,
        tiles,
        "normalizing lighting"
    );
    if tiles < 2 && gamma.is_none() {
        return NormalizedCrop(crop);
    }
    clahe_enhance(&mut luma, width, height, tiles, clip_limit);

    let mut out = crop;
    for ((pixel, lab), &l) in out.pixels_mut().zip(&labs).zip(&luma) {
        let corrected = Lab::new(l as f32 * 100.0 / 255.0, lab.a, lab.b);
        pixel.0 = color::lab_to_rgb(corrected);
    }
    NormalizedCrop(out)
}

/// Tile grid side for a `width`×`height` crop, capped so that every tile is
/// at least [`MIN_TILE_SIDE`] pixels on each side.
pub fn effective_tiles(width: u32, height: u32, requested: u32) -> u32 {
    requested
        .min(width / MIN_TILE_SIDE)
        .min(height / MIN_TILE_SIDE)
}

fn apply_gamma(luma: &mut [u8], gamma: f32) {
    let mut lut = [0u8; 256];
    for (i, v) in lut.iter_mut().enumerate() {
        *v = (255.0 * (i as f32 / 255.0).powf(gamma)).round().clamp(0.0, 255.0) as u8;
    }
    for v in luma.iter_mut() {
        *v = lut[*v as usize];
    }
}

/// Apply CLAHE in place to a single-channel 8-bit plane.
///
/// `tiles` is the side of a square tile grid; below 2 the plane is left
/// alone. `clip_limit` is in multiples of the mean bin height of a tile
/// histogram. Clipped counts are spread evenly over all bins and the
/// mapping is not stretched to the tile minimum, so a flat tile maps close
/// to itself instead of being pushed toward white.
pub fn clahe_enhance(luma: &mut [u8], width: u32, height: u32, tiles: u32, clip_limit: f32) {
    let w = width as usize;
    let h = height as usize;
    if w == 0 || h == 0 || luma.len() < w * h || tiles < 2 {
        return;
    }

    let tx = tiles as usize;
    let ty = tiles as usize; // square grid
    let tile_w = w / tx;
    let tile_h = h / ty;
    if tile_w == 0 || tile_h == 0 {
        return;
    }
    let tile_pixels = (tile_w * tile_h) as f32;
    let clip = (clip_limit * tile_pixels / 256.0).max(1.0);

    let mut cdfs: Vec<[f32; 256]> = Vec::with_capacity(tx * ty);
    for row in 0..ty {
        for col in 0..tx {
            let mut hist = [0f32; 256];
            let y0 = row * tile_h;
            let x0 = col * tile_w;
            for y in y0..y0 + tile_h {
                for x in x0..x0 + tile_w {
                    hist[luma[y * w + x] as usize] += 1.0;
                }
            }

            let mut excess = 0f32;
            for bin in hist.iter_mut() {
                if *bin > clip {
                    excess += *bin - clip;
                    *bin = clip;
                }
            }
            let redist = excess / 256.0;

            let mut cdf = [0f32; 256];
            let mut acc = 0f32;
            for (i, bin) in hist.iter().enumerate() {
                acc += bin + redist;
                cdf[i] = (acc * 255.0 / tile_pixels).clamp(0.0, 255.0);
            }
            cdfs.push(cdf);
        }
    }

    // Bilinear interpolation between the four nearest tile mappings.
    for y in 0..h {
        for x in 0..w {
            let pixel = luma[y * w + x] as usize;

            let fy = ((y as f32 / tile_h as f32) - 0.5).clamp(0.0, (ty - 1) as f32);
            let fx = ((x as f32 / tile_w as f32) - 0.5).clamp(0.0, (tx - 1) as f32);

            let r0 = fy as usize;
            let c0 = fx as usize;
            let r1 = (r0 + 1).min(ty - 1);
            let c1 = (c0 + 1).min(tx - 1);

            let dy = fy - r0 as f32;
            let dx = fx - c0 as f32;

            let tl = cdfs[r0 * tx + c0][pixel];
            let tr = cdfs[r0 * tx + c1][pixel];
            let bl = cdfs[r1 * tx + c0][pixel];
            let br = cdfs[r1 * tx + c1][pixel];

            let top = tl * (1.0 - dx) + tr * dx;
            let bottom = bl * (1.0 - dx) + br * dx;
            let val = top * (1.0 - dy) + bottom * dy;

            luma[y * w + x] = val.round().clamp(0.0, 255.0) as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform(width: u32, height: u32, rgb: [u8; 3]) -> RgbImage {
        RgbImage::from_pixel(width, height, image::Rgb(rgb))
    }

    fn max_channel_delta(a: [u8; 3], b: [u8; 3]) -> i32 {
        (0..3)
            .map(|c| (a[c] as i32 - b[c] as i32).abs())
            .max()
            .unwrap_or(0)
    }

    #[test]
    fn test_clip_limit_buckets() {
        assert_eq!(adaptive_clip_limit(200.0), 1.2);
        assert_eq!(adaptive_clip_limit(170.0), 1.2);
        assert_eq!(adaptive_clip_limit(120.0), 2.0);
        assert_eq!(adaptive_clip_limit(40.0), 3.0);
    }

    #[test]
    fn test_gamma_buckets() {
        assert_eq!(adaptive_gamma(50.0), Some(0.8));
        assert_eq!(adaptive_gamma(150.0), None);
        assert_eq!(adaptive_gamma(250.0), Some(1.1));
    }

    #[test]
    fn test_effective_tiles() {
        assert_eq!(effective_tiles(240, 240, 8), 8);
        assert_eq!(effective_tiles(60, 60, 8), 3);
        assert_eq!(effective_tiles(20, 200, 8), 1);
    }

    #[test]
    fn test_uniform_skin_is_near_identity() {
        for rgb in [[215, 189, 150], [246, 237, 228], [160, 126, 86], [41, 36, 32]] {
            let crop = normalize_lighting(uniform(240, 240, rgb), &LightingConfig::default());
            let px = crop.image().get_pixel(120, 120).0;
            assert!(max_channel_delta(px, rgb) <= 4, "{rgb:?} -> {px:?}");
        }
    }

    #[test]
    fn test_small_crop_is_untouched() {
        let crop = normalize_lighting(uniform(20, 20, [200, 150, 120]), &LightingConfig::default());
        assert_eq!(crop.image().get_pixel(10, 10).0, [200, 150, 120]);
    }

    #[test]
    fn test_off_is_untouched() {
        let config = LightingConfig {
            method: LightingMethod::Off,
            ..LightingConfig::default()
        };
        let mut img = uniform(64, 64, [90, 60, 40]);
        img.put_pixel(3, 3, image::Rgb([250, 250, 250]));
        let crop = normalize_lighting(img.clone(), &config);
        assert_eq!(crop.into_inner(), img);
    }

    #[test]
    fn test_dimensions_preserved() {
        let crop = normalize_lighting(uniform(123, 77, [180, 140, 110]), &LightingConfig::default());
        assert_eq!((crop.width(), crop.height()), (123, 77));
    }

    #[test]
    fn test_gamma_lifts_dark_crop() {
        let config = LightingConfig {
            gamma: true,
            ..LightingConfig::default()
        };
        let rgb = [60, 45, 35];
        let plain = normalize_lighting(uniform(64, 64, rgb), &LightingConfig::default());
        let lifted = normalize_lighting(uniform(64, 64, rgb), &config);
        let b_plain = color::brightness(plain.image().get_pixel(32, 32).0);
        let b_lifted = color::brightness(lifted.image().get_pixel(32, 32).0);
        assert!(b_lifted > b_plain, "{b_lifted} <= {b_plain}");
    }

    #[test]
    fn test_clahe_increases_contrast() {
        // Low-contrast 32x32 plane: all values between 100 and 110
        let w = 32u32;
        let h = 32u32;
        let mut luma: Vec<u8> = (0..(w * h) as usize).map(|i| 100 + (i % 11) as u8).collect();

        let orig_stddev = stddev(&luma);
        clahe_enhance(&mut luma, w, h, 2, 3.0);
        let new_stddev = stddev(&luma);

        assert!(
            new_stddev > orig_stddev,
            "CLAHE should increase contrast: orig={orig_stddev:.2}, new={new_stddev:.2}"
        );
    }

    #[test]
    fn test_clahe_single_tile_is_noop() {
        let mut luma = vec![7u8; 100];
        clahe_enhance(&mut luma, 10, 10, 1, 2.0);
        assert!(luma.iter().all(|&v| v == 7));
    }

    fn stddev(data: &[u8]) -> f32 {
        let n = data.len() as f32;
        let mean = data.iter().map(|&b| b as f32).sum::<f32>() / n;
        let variance = data.iter().map(|&b| (b as f32 - mean).powi(2)).sum::<f32>() / n;
        variance.sqrt()
    }
}
