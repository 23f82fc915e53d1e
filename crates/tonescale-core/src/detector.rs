//! Pluggable face detector interface.
//!
//! A detector maps an RGB image to zero or more scored boxes. The backend is
//! chosen once from configuration. Fallback order: the configured backend,
//! then [`NoDetector`] (centre crop) if the backend cannot be constructed.

use crate::config::{DetectorBackend, LocatorConfig};
use crate::types::BoundingBox;
use image::RgbImage;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} (download SCRFD det_10g.onnx from insightface)")]
    ModelNotFound(String),
    #[error("detector backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[cfg(feature = "scrfd")]
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Face detector strategy.
pub trait FaceDetector: Send + Sync {
    /// Short backend name used in logs.
    fn name(&self) -> &str;

    /// Detect faces, in source-image pixel coordinates.
    fn detect(&self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError>;
}

/// Detector that never finds a face, forcing the centre-crop fallback.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDetector;

impl FaceDetector for NoDetector {
    fn name(&self) -> &str {
        "none"
    }

    fn detect(&self, _image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        Ok(Vec::new())
    }
}

/// Build the configured detector, degrading to [`NoDetector`] on failure.
pub fn from_config(config: &LocatorConfig) -> Arc<dyn FaceDetector> {
    match try_from_config(config) {
        Ok(detector) => {
            tracing::info!(backend = detector.name(), "face detector ready");
            detector
        }
        Err(e) => {
            tracing::warn!(
                backend = ?config.detector,
                error = %e,
                "face detector unavailable; using centre-crop fallback"
            );
            Arc::new(NoDetector)
        }
    }
}

/// Build the configured detector, reporting why it cannot be constructed.
pub fn try_from_config(config: &LocatorConfig) -> Result<Arc<dyn FaceDetector>, DetectorError> {
    match config.detector {
        DetectorBackend::None => Ok(Arc::new(NoDetector)),
        DetectorBackend::Scrfd => scrfd_from_config(config),
    }
}

#[cfg(feature = "scrfd")]
fn scrfd_from_config(config: &LocatorConfig) -> Result<Arc<dyn FaceDetector>, DetectorError> {
    let path = config.model_path.as_ref().ok_or_else(|| {
        DetectorError::BackendUnavailable("scrfd backend needs locator.model_path".into())
    })?;
    Ok(Arc::new(crate::scrfd::ScrfdDetector::load(path)?))
}

#[cfg(not(feature = "scrfd"))]
fn scrfd_from_config(_config: &LocatorConfig) -> Result<Arc<dyn FaceDetector>, DetectorError> {
    Err(DetectorError::BackendUnavailable(
        "built without the `scrfd` feature".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_detector_finds_nothing() {
        let img = RgbImage::new(32, 32);
        assert!(NoDetector.detect(&img).unwrap().is_empty());
    }

    #[test]
    fn test_none_backend() {
        let detector = from_config(&LocatorConfig::default());
        assert_eq!(detector.name(), "none");
    }

    #[test]
    fn test_scrfd_without_model_falls_back() {
        let config = LocatorConfig {
            detector: DetectorBackend::Scrfd,
            model_path: None,
            ..LocatorConfig::default()
        };
        assert!(try_from_config(&config).is_err());
        assert_eq!(from_config(&config).name(), "none");
    }
}
