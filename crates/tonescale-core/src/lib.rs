//! tonescale-core: skin-tone classification against a fixed ordinal scale.
//!
//! Locates a face (pluggable detector with a centre-crop fallback), normalizes
//! lighting, samples skin from fixed facial regions, fuses the samples into one
//! colour and classifies it with three independent methods whose votes are
//! arbitrated into a single result.

pub mod aggregate;
pub mod arbiter;
pub mod classify;
pub mod color;
pub mod config;
pub mod detector;
pub mod lighting;
pub mod locator;
pub mod pipeline;
pub mod sampler;
pub mod scale;
#[cfg(feature = "scrfd")]
pub mod scrfd;
pub mod types;

pub use classify::{Classifier, MethodError, ToneMethod};
pub use config::{AnalyzerConfig, ConfigError};
pub use detector::{DetectorError, FaceDetector, NoDetector};
pub use pipeline::{buffer_to_rgb, decode_rgb, load_rgb, AnalysisError, SkinToneAnalyzer};
pub use scale::{ReferenceTone, ScaleError, ScaleRegistry};
pub use types::{
    AggregatedColor, BoundingBox, ClassificationResult, ClassificationVote, FaceRegion, Method,
    PixelRect, RegionTag, Rgb,
};
