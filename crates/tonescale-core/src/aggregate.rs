//! Colour aggregation: fuse region samples into one representative colour.
//!
//! Two strategies:
//!
//! - **Median-weighted** (default): each region's mean is weighted by its
//!   closeness to the per-channel median of all region means, so a region
//!   polluted by hair, a shadow or a highlight pulls the result less.
//! - **K-means**: pooled pixels are clustered in L*a*b* with a fixed seed and
//!   the largest cluster's centroid wins. Needs enough pixels to be
//!   meaningful; below `kmeans_min_pixels` it falls back to median weighting.
//!
//! Both attach a colour-confidence built from sample tightness and region
//! agreement, halved when the samples came from the unfiltered centre crop.

use crate::color;
use crate::config::{AggregationStrategy, AggregatorConfig};
use crate::sampler::SampleSet;
use crate::types::{AggregatedColor, Rgb};
use kmeans_colors::get_kmeans;
use palette::Lab;
use std::collections::BTreeSet;

/// Upper bound on pixels fed to k-means. Larger pools are stride-sampled.
const KMEANS_MAX_SAMPLES: usize = 4096;
const KMEANS_MAX_ITER: usize = 20;
const KMEANS_CONVERGE: f32 = 1e-4;

/// Spread (RGB units) at which tightness and agreement drop to one half.
const SPREAD_SCALE: f32 = 16.0;
/// Cluster RMS (ΔE units) at which cluster tightness drops to one half.
const CLUSTER_SCALE: f32 = 8.0;

/// Fuse a sample set into one colour. `None` when there is nothing to fuse.
pub fn aggregate(samples: &SampleSet, config: &AggregatorConfig) -> Option<AggregatedColor> {
    if samples.pixel_count() == 0 {
        tracing::warn!("no pixels to aggregate");
        return None;
    }

    let result = match config.strategy {
        AggregationStrategy::MedianWeighted => median_weighted(samples),
        AggregationStrategy::Kmeans => {
            if samples.pixel_count() < config.kmeans_min_pixels {
                tracing::debug!(
                    pixels = samples.pixel_count(),
                    min = config.kmeans_min_pixels,
                    "too few pixels for k-means; using median weighting"
                );
                median_weighted(samples)
            } else {
                kmeans(samples, config)
            }
        }
    }?;

    tracing::debug!(
        rgb = %color::to_hex(result.rgb),
        regions = result.regions_contributing,
        variance = result.variance,
        confidence = result.confidence,
        fallback = result.fallback,
        "colour aggregated"
    );
    Some(result)
}

/// Inverse-distance-to-median weighting of region means.
pub fn median_weighted(samples: &SampleSet) -> Option<AggregatedColor> {
    let means: Vec<[f32; 3]> = samples
        .regions
        .iter()
        .filter(|r| !r.pixels.is_empty())
        .map(|r| r.mean())
        .collect();
    if means.is_empty() {
        return None;
    }

    let median = [0, 1, 2].map(|c| median(means.iter().map(|m| m[c]).collect()));
    let distances: Vec<f32> = means.iter().map(|m| euclidean(*m, median)).collect();
    let weights: Vec<f32> = distances.iter().map(|d| 1.0 / (1.0 + d)).collect();
    let total: f32 = weights.iter().sum();

    let mut fused = [0f32; 3];
    for (m, w) in means.iter().zip(&weights) {
        for c in 0..3 {
            fused[c] += m[c] * w;
        }
    }
    let fused = fused.map(|v| v / total);
    let spread = distances.iter().zip(&weights).map(|(d, w)| d * w).sum::<f32>() / total;

    let variance = pooled_variance(samples);
    let tightness = 1.0 / (1.0 + variance.sqrt() / SPREAD_SCALE);
    let agreement = 1.0 / (1.0 + spread / SPREAD_SCALE);
    let confidence = finish_confidence(0.6 * tightness + 0.4 * agreement, samples.fallback);

    Some(AggregatedColor {
        rgb: color::quantize(fused),
        regions_contributing: means.len(),
        variance,
        confidence,
        fallback: samples.fallback,
    })
}

/// Dominant cluster of a seeded k-means over pooled pixels in L*a*b*.
pub fn kmeans(samples: &SampleSet, config: &AggregatorConfig) -> Option<AggregatedColor> {
    let pooled: Vec<Rgb> = samples
        .regions
        .iter()
        .flat_map(|r| r.pixels.iter().copied())
        .collect();
    if pooled.is_empty() {
        return None;
    }
    let stride = pooled.len().div_ceil(KMEANS_MAX_SAMPLES);
    let subset: Vec<Rgb> = pooled.iter().step_by(stride).copied().collect();

    // k-means++ seeding needs at least k distinct points.
    let distinct = subset.iter().collect::<BTreeSet<_>>().len();
    let k = config.max_clusters.min(distinct).max(1);
    let labs: Vec<Lab> = subset.iter().map(|&p| color::rgb_to_lab(p)).collect();

    let (centroid, members, rms) = if k == 1 {
        let centroid = mean_lab(&labs);
        let rms = rms_distance(labs.iter(), centroid);
        (centroid, labs.len(), rms)
    } else {
        let result = get_kmeans(
            k,
            KMEANS_MAX_ITER,
            KMEANS_CONVERGE,
            false,
            &labs,
            config.seed,
        );
        let mut counts = vec![0usize; result.centroids.len()];
        for &i in &result.indices {
            if let Some(slot) = counts.get_mut(i as usize) {
                *slot += 1;
            }
        }
        // Largest cluster; ties go to the lower cluster index.
        let (best, &members) = counts
            .iter()
            .enumerate()
            .rev()
            .max_by_key(|&(_, n)| n)?;
        let centroid = *result.centroids.get(best)?;
        let rms = rms_distance(
            labs.iter()
                .zip(&result.indices)
                .filter(|&(_, &i)| i as usize == best)
                .map(|(lab, _)| lab),
            centroid,
        );
        (centroid, members, rms)
    };

    let share = members as f32 / labs.len() as f32;
    let confidence = finish_confidence(
        0.6 / (1.0 + rms / CLUSTER_SCALE) + 0.4 * share,
        samples.fallback,
    );
    tracing::trace!(k, share, rms, samples = labs.len(), "k-means clustered");

    Some(AggregatedColor {
        rgb: color::lab_to_rgb(centroid),
        regions_contributing: samples.regions.len(),
        variance: pooled_variance(samples),
        confidence,
        fallback: samples.fallback,
    })
}

fn finish_confidence(raw: f32, fallback: bool) -> f32 {
    let c = if fallback { raw * 0.5 } else { raw };
    if c.is_finite() {
        c.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Mean over channels of the per-channel variance of all pooled pixels.
fn pooled_variance(samples: &SampleSet) -> f32 {
    let mut n = 0f64;
    let mut sum = [0f64; 3];
    let mut sum_sq = [0f64; 3];
    for px in samples.regions.iter().flat_map(|r| r.pixels.iter()) {
        n += 1.0;
        for c in 0..3 {
            let v = px[c] as f64;
            sum[c] += v;
            sum_sq[c] += v * v;
        }
    }
    if n == 0.0 {
        return 0.0;
    }
    let var: f64 = (0..3)
        .map(|c| {
            let mean = sum[c] / n;
            (sum_sq[c] / n - mean * mean).max(0.0)
        })
        .sum::<f64>()
        / 3.0;
    var as f32
}

fn median(mut values: Vec<f32>) -> f32 {
    values.sort_by(|a, b| a.total_cmp(b));
    let n = values.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    }
}

fn euclidean(a: [f32; 3], b: [f32; 3]) -> f32 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)).sqrt()
}

fn mean_lab(labs: &[Lab]) -> Lab {
    let n = labs.len().max(1) as f32;
    let (l, a, b) = labs
        .iter()
        .fold((0.0, 0.0, 0.0), |(l, a, b), lab| (l + lab.l, a + lab.a, b + lab.b));
    Lab::new(l / n, a / n, b / n)
}

fn rms_distance<'a>(labs: impl Iterator<Item = &'a Lab>, centroid: Lab) -> f32 {
    let mut n = 0usize;
    let mut sum = 0f32;
    for lab in labs {
        n += 1;
        sum += (lab.l - centroid.l).powi(2) + (lab.a - centroid.a).powi(2) + (lab.b - centroid.b).powi(2);
    }
    if n == 0 {
        return 0.0;
    }
    (sum / n as f32).sqrt()
}
