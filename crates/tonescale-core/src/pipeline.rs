//! The end-to-end analyzer.
//!
//! ```text
//! image ─► locate faces ─► crop ─► normalize lighting ─► sample regions
//!        ─► aggregate colour ─► classify (angle, brightness, distance)
//!        ─► arbitrate ─► ClassificationResult
//! ```
//!
//! Only malformed input is an error. Detector failures, missing skin and
//! failed methods all degrade into fields of the result.

use crate::aggregate;
use crate::arbiter::{self, Decision};
use crate::classify::Classifier;
use crate::color;
use crate::config::{AnalyzerConfig, ConfigError};
use crate::detector::{self, FaceDetector};
use crate::lighting;
use crate::locator;
use crate::sampler;
use crate::scale::ScaleRegistry;
use crate::types::{round_confidence, ClassificationResult, FaceRegion, RegionReport};
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("image is empty ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },
    #[error("buffer holds {actual} bytes, expected {expected}")]
    BufferLength { expected: usize, actual: usize },
    #[error("unsupported channel count {0} (expected 1, 3 or 4)")]
    UnsupportedChannels(u8),
    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Decode an encoded image (PNG, JPEG...) into 8-bit RGB.
pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage, AnalysisError> {
    Ok(image::load_from_memory(bytes)?.to_rgb8())
}

/// Read and decode an image file into 8-bit RGB.
pub fn load_rgb(path: &Path) -> Result<RgbImage, AnalysisError> {
    let bytes = std::fs::read(path).map_err(|source| AnalysisError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    decode_rgb(&bytes)
}

/// Interpret a raw interleaved pixel buffer as RGB. Accepts grey (1), RGB (3)
/// and RGBA (4, alpha dropped).
pub fn buffer_to_rgb(
    bytes: &[u8],
    width: u32,
    height: u32,
    channels: u8,
) -> Result<RgbImage, AnalysisError> {
    if !matches!(channels, 1 | 3 | 4) {
        return Err(AnalysisError::UnsupportedChannels(channels));
    }
    if width == 0 || height == 0 {
        return Err(AnalysisError::EmptyImage { width, height });
    }
    let expected = (width as usize)
        .checked_mul(height as usize)
        .and_then(|n| n.checked_mul(channels as usize))
        .ok_or(AnalysisError::BufferLength {
            expected: usize::MAX,
            actual: bytes.len(),
        })?;
    if bytes.len() != expected {
        return Err(AnalysisError::BufferLength {
            expected,
            actual: bytes.len(),
        });
    }

    let rgb: Vec<u8> = match channels {
        3 => bytes.to_vec(),
        1 => bytes.iter().flat_map(|&v| [v, v, v]).collect(),
        _ => bytes
            .chunks_exact(4)
            .flat_map(|px| [px[0], px[1], px[2]])
            .collect(),
    };
    RgbImage::from_raw(width, height, rgb).ok_or(AnalysisError::BufferLength {
        expected,
        actual: bytes.len(),
    })
}

/// Skin-tone analyzer. Immutable after construction and safe to share
/// across threads.
pub struct SkinToneAnalyzer {
    config: AnalyzerConfig,
    scale: Arc<ScaleRegistry>,
    detector: Arc<dyn FaceDetector>,
    classifier: Classifier,
}

/// One face carried through the pipeline.
struct FaceOutcome {
    result: ClassificationResult,
    skin_sampled: bool,
}

impl Default for SkinToneAnalyzer {
    fn default() -> Self {
        Self::build(AnalyzerConfig::default())
    }
}

impl SkinToneAnalyzer {
    /// Validate `config` and build the configured detector, methods and the
    /// built-in Monk scale.
    pub fn new(config: AnalyzerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: AnalyzerConfig) -> Self {
        let detector = detector::from_config(&config.locator);
        let classifier = Classifier::from_config(&config.classifier);
        Self {
            scale: ScaleRegistry::monk_shared(),
            detector,
            classifier,
            config,
        }
    }

    /// Replace the face detector.
    pub fn with_detector(mut self, detector: Arc<dyn FaceDetector>) -> Self {
        self.detector = detector;
        self
    }

    /// Replace the reference scale.
    pub fn with_registry(mut self, scale: ScaleRegistry) -> Self {
        self.scale = Arc::new(scale);
        self
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    pub fn scale(&self) -> &ScaleRegistry {
        &self.scale
    }

    pub fn detector_name(&self) -> &str {
        self.detector.name()
    }

    pub fn analyze_path(&self, path: &Path) -> Result<ClassificationResult, AnalysisError> {
        let image = load_rgb(path)?;
        self.analyze_image(&image)
    }

    pub fn analyze_encoded(&self, bytes: &[u8]) -> Result<ClassificationResult, AnalysisError> {
        let image = decode_rgb(bytes)?;
        self.analyze_image(&image)
    }

    pub fn analyze_buffer(
        &self,
        bytes: &[u8],
        width: u32,
        height: u32,
        channels: u8,
    ) -> Result<ClassificationResult, AnalysisError> {
        let image = buffer_to_rgb(bytes, width, height, channels)?;
        self.analyze_image(&image)
    }

    /// Classify the skin tone of the most reliable face in `image`.
    ///
    /// Every located face is analyzed and the one with the highest
    /// post-arbitration confidence is reported. Successful results beat
    /// degraded ones; on equal confidence a face with sampled skin beats a
    /// centre-sample fallback, then the earlier face wins.
    pub fn analyze_image(&self, image: &RgbImage) -> Result<ClassificationResult, AnalysisError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(AnalysisError::EmptyImage { width, height });
        }

        let faces = locator::locate_faces(image, self.detector.as_ref(), &self.config.locator);
        let mut best: Option<FaceOutcome> = None;
        for face in &faces {
            let outcome = self.analyze_face(image, face);
            let better = match &best {
                None => true,
                Some(b) => rank(&outcome) > rank(b),
            };
            if better {
                best = Some(outcome);
            }
        }

        // `locate_faces` never returns an empty list.
        let result = match best {
            Some(outcome) => outcome.result,
            None => self.degraded_result(false, "no face region to analyze"),
        };

        tracing::info!(
            tone = %result.tone_label,
            confidence = result.confidence,
            method = %result.analysis_method,
            face_detected = result.face_detected,
            faces = faces.len(),
            success = result.success,
            "skin tone classified"
        );
        Ok(result)
    }

    fn analyze_face(&self, image: &RgbImage, face: &FaceRegion) -> FaceOutcome {
        let rect = face.rect;
        let crop = image::imageops::crop_imm(image, rect.x, rect.y, rect.width, rect.height).to_image();
        let crop = lighting::normalize_lighting(crop, &self.config.lighting);
        let samples = sampler::sample_regions(&crop, &self.config.sampler);

        let Some(aggregated) = aggregate::aggregate(&samples, &self.config.aggregator) else {
            return FaceOutcome {
                result: self.degraded_result(face.detected, "aggregate colour undefined"),
                skin_sampled: false,
            };
        };

        let votes = self.classifier.classify(aggregated.rgb, &self.scale);
        let decision = arbiter::arbitrate(
            &votes,
            color::brightness(aggregated.rgb),
            &self.config.arbiter,
        );
        let degraded = if !decision.success() {
            Some("no classification method produced a vote".to_string())
        } else if aggregated.fallback {
            Some("no skin region qualified; centre sample used".to_string())
        } else {
            None
        };

        let tone = self.scale.clamped(decision.tone_index);
        let regions = samples
            .regions
            .iter()
            .map(|r| RegionReport {
                tag: r.tag,
                pixels: r.pixels.len(),
                mean_rgb: color::quantize(r.mean()),
            })
            .collect();

        tracing::debug!(
            ?rect,
            detected = face.detected,
            rgb = %color::to_hex(aggregated.rgb),
            tone = tone.index,
            rule = ?decision.rule,
            "face analyzed"
        );

        FaceOutcome {
            result: ClassificationResult {
                tone_label: tone.name.clone(),
                tone_id: tone.id.clone(),
                tone_index: tone.index,
                reference_hex: tone.hex(),
                derived_hex: color::to_hex(aggregated.rgb),
                dominant_rgb: aggregated.rgb,
                confidence: round_confidence(decision.confidence),
                color_confidence: round_confidence(aggregated.confidence),
                success: decision.success(),
                analysis_method: decision.method_name().to_string(),
                regions_analyzed: samples.regions.len(),
                face_detected: face.detected,
                votes,
                regions,
                degraded,
            },
            skin_sampled: !aggregated.fallback,
        }
    }

    /// The safe default reported when nothing could be classified.
    fn degraded_result(&self, face_detected: bool, reason: &str) -> ClassificationResult {
        tracing::warn!(reason, "analysis degraded to default tone");
        let decision = Decision::default_tone(&self.config.arbiter);
        let tone = self.scale.clamped(decision.tone_index);
        ClassificationResult {
            tone_label: tone.name.clone(),
            tone_id: tone.id.clone(),
            tone_index: tone.index,
            reference_hex: tone.hex(),
            derived_hex: color::to_hex([0, 0, 0]),
            dominant_rgb: [0, 0, 0],
            confidence: 0.0,
            color_confidence: 0.0,
            success: false,
            analysis_method: decision.method_name().to_string(),
            regions_analyzed: 0,
            face_detected,
            votes: Vec::new(),
            regions: Vec::new(),
            degraded: Some(reason.to_string()),
        }
    }
}

fn rank(outcome: &FaceOutcome) -> (bool, f32, bool) {
    (
        outcome.result.success,
        outcome.result.confidence,
        outcome.skin_sampled,
    )
}
