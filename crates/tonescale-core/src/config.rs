//! Analyzer configuration: strategy selection and calibration constants.
//!
//! Every section defaults independently, so a TOML file only needs to name
//! the values it overrides:
//!
//! ```toml
//! [locator]
//! detector = "scrfd"
//! model_path = "/usr/share/tonescale/det_10g.onnx"
//!
//! [aggregator]
//! strategy = "kmeans"
//! ```
//!
//! The thresholds here were tuned by hand. Change them only against a
//! labelled dataset.

use crate::color::DistanceMetric;
use crate::types::Method;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Complete analyzer configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub locator: LocatorConfig,
    pub lighting: LightingConfig,
    pub sampler: SamplerConfig,
    pub aggregator: AggregatorConfig,
    pub classifier: ClassifierConfig,
    pub arbiter: ArbiterConfig,
}

/// Face detector backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorBackend {
    /// No detector: always use the centre-crop fallback.
    #[default]
    None,
    /// SCRFD via ONNX Runtime (cargo feature `scrfd`).
    Scrfd,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorConfig {
    pub detector: DetectorBackend,
    /// ONNX model file for the `scrfd` backend.
    pub model_path: Option<PathBuf>,
    /// Fraction of the box size added on every side before clipping.
    pub padding: f32,
    /// Padded boxes smaller than this many pixels count as a miss.
    pub min_face_area: u32,
    /// Detections below this score are ignored.
    pub min_detector_confidence: f32,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            detector: DetectorBackend::None,
            model_path: None,
            padding: 0.15,
            min_face_area: 1024,
            min_detector_confidence: 0.5,
        }
    }
}

/// Lighting correction method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LightingMethod {
    /// Brightness-adaptive CLAHE on L*, optional gamma.
    #[default]
    Adaptive,
    /// Leave the crop untouched.
    Off,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LightingConfig {
    pub method: LightingMethod,
    /// CLAHE tile grid (square). Reduced automatically for small crops.
    pub tiles: u32,
    /// Brightness-bucketed gamma before equalization. Off by default: it
    /// cannot tell an underexposed photo from dark skin.
    pub gamma: bool,
}

impl Default for LightingConfig {
    fn default() -> Self {
        Self {
            method: LightingMethod::Adaptive,
            tiles: 8,
            gamma: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// A region contributes only with at least this many skin pixels.
    pub min_region_pixels: usize,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            min_region_pixels: 25,
        }
    }
}

/// How region samples are fused into one colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationStrategy {
    /// Region means weighted by inverse distance to their median.
    #[default]
    MedianWeighted,
    /// Largest cluster of a seeded k-means over pooled pixels in L*a*b*.
    Kmeans,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    pub strategy: AggregationStrategy,
    /// Below this many pooled pixels k-means falls back to median weighting.
    pub kmeans_min_pixels: usize,
    pub max_clusters: usize,
    pub seed: u64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            strategy: AggregationStrategy::MedianWeighted,
            kmeans_min_pixels: 200,
            max_clusters: 5,
            seed: 0x5eed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Methods to run, in vote order. Ties in arbitration go to the earlier one.
    pub methods: Vec<Method>,
    pub distance_metric: DistanceMetric,
    /// Run methods on separate threads and wait at most `method_timeout_ms`.
    pub parallel: bool,
    pub method_timeout_ms: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            methods: vec![Method::Angle, Method::Brightness, Method::Distance],
            distance_metric: DistanceMetric::Rgb,
            parallel: false,
            method_timeout_ms: 250,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbiterConfig {
    /// Mean-RGB brightness above which the angle vote wins outright.
    /// Midpoint between Monk 1 (237.0) and Monk 2 (231.0).
    pub very_light_threshold: f32,
    /// Tone reported when nothing could be classified.
    pub default_tone: u8,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            very_light_threshold: 234.0,
            default_tone: 5,
        }
    }
}

impl AnalyzerConfig {
    pub fn from_toml_str(src: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(src)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let src = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&src)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &'static str, reason: String| Err(ConfigError::Invalid { field, reason });

        if !(0.0..1.0).contains(&self.locator.padding) {
            return invalid("locator.padding", format!("{} not in [0, 1)", self.locator.padding));
        }
        if !(0.0..=1.0).contains(&self.locator.min_detector_confidence) {
            return invalid(
                "locator.min_detector_confidence",
                format!("{} not in [0, 1]", self.locator.min_detector_confidence),
            );
        }
        if self.lighting.tiles == 0 {
            return invalid("lighting.tiles", "must be at least 1".into());
        }
        if self.sampler.min_region_pixels == 0 {
            return invalid("sampler.min_region_pixels", "must be at least 1".into());
        }
        if self.aggregator.max_clusters == 0 {
            return invalid("aggregator.max_clusters", "must be at least 1".into());
        }
        if self.aggregator.kmeans_min_pixels < self.aggregator.max_clusters {
            return invalid(
                "aggregator.kmeans_min_pixels",
                format!(
                    "{} is fewer than max_clusters ({})",
                    self.aggregator.kmeans_min_pixels, self.aggregator.max_clusters
                ),
            );
        }
        if self.classifier.methods.is_empty() {
            return invalid("classifier.methods", "at least one method is required".into());
        }
        for (i, m) in self.classifier.methods.iter().enumerate() {
            if self.classifier.methods[..i].contains(m) {
                return invalid("classifier.methods", format!("{m} listed twice"));
            }
        }
        if self.classifier.parallel && self.classifier.method_timeout_ms == 0 {
            return invalid("classifier.method_timeout_ms", "must be positive when parallel".into());
        }
        if !(1..=10).contains(&self.arbiter.default_tone) {
            return invalid(
                "arbiter.default_tone",
                format!("{} not in 1..=10", self.arbiter.default_tone),
            );
        }
        Ok(())
    }
}
