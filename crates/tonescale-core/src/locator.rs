//! Face locator: detector boxes to padded face crops, with a centre-crop fallback.

use crate::config::LocatorConfig;
use crate::detector::FaceDetector;
use crate::types::{BoundingBox, FaceRegion, PixelRect};
use image::RgbImage;

/// Fraction of each image dimension covered by the centre-crop fallback.
pub const FALLBACK_FRACTION: f32 = 0.6;
const FALLBACK_MARGIN: f32 = (1.0 - FALLBACK_FRACTION) / 2.0;

/// Locate face regions in `image`. Never returns an empty list.
///
/// Detector errors, zero detections, and boxes that are too small after
/// padding and clipping all degrade to a single centre-crop region.
pub fn locate_faces(
    image: &RgbImage,
    detector: &dyn FaceDetector,
    config: &LocatorConfig,
) -> Vec<FaceRegion> {
    let boxes = match detector.detect(image) {
        Ok(boxes) => boxes,
        Err(e) => {
            tracing::warn!(
                detector = detector.name(),
                error = %e,
                "face detection failed; using centre crop"
            );
            Vec::new()
        }
    };
    let detected = boxes.len();

    let faces: Vec<FaceRegion> = boxes
        .iter()
        .filter(|b| b.confidence.is_finite() && b.confidence >= config.min_detector_confidence)
        .filter_map(|b| {
            let rect = expand_and_clip(b, config.padding, image.width(), image.height())?;
            if rect.area() < config.min_face_area as u64 {
                tracing::debug!(?rect, min_area = config.min_face_area, "face box too small");
                return None;
            }
            Some(FaceRegion {
                rect,
                detector_confidence: b.confidence.clamp(0.0, 1.0),
                detected: true,
            })
        })
        .collect();

    if faces.is_empty() {
        tracing::debug!(
            detector = detector.name(),
            detected,
            "no usable face; using centre crop"
        );
        return vec![center_region(image.width(), image.height())];
    }

    tracing::debug!(faces = faces.len(), detected, "faces located");
    faces
}

/// Heuristic crop assuming the subject fills the central part of the frame.
pub fn center_region(width: u32, height: u32) -> FaceRegion {
    let rect = PixelRect::new(0, 0, width, height).fraction(
        FALLBACK_MARGIN,
        FALLBACK_MARGIN,
        FALLBACK_FRACTION,
        FALLBACK_FRACTION,
    );
    FaceRegion {
        rect,
        detector_confidence: 0.0,
        detected: false,
    }
}

/// Grow a detector box by `padding` of its size on every side and clip it to
/// the image. `None` if nothing of it lies inside the image.
fn expand_and_clip(b: &BoundingBox, padding: f32, width: u32, height: u32) -> Option<PixelRect> {
    if ![b.x, b.y, b.width, b.height].iter().all(|v| v.is_finite())
        || b.width <= 0.0
        || b.height <= 0.0
    {
        return None;
    }
    let pad_x = b.width * padding;
    let pad_y = b.height * padding;

    let x0 = (b.x - pad_x).round().max(0.0);
    let y0 = (b.y - pad_y).round().max(0.0);
    let x1 = (b.x + b.width + pad_x).round().min(width as f32);
    let y1 = (b.y + b.height + pad_y).round().min(height as f32);

    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some(PixelRect::new(
        x0 as u32,
        y0 as u32,
        (x1 - x0) as u32,
        (y1 - y0) as u32,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{DetectorError, NoDetector};

    struct FixedDetector(Vec<BoundingBox>);

    impl FaceDetector for FixedDetector {
        fn name(&self) -> &str {
            "fixed"
        }

        fn detect(&self, _image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
            Ok(self.0.clone())
        }
    }

    struct FailingDetector;

    impl FaceDetector for FailingDetector {
        fn name(&self) -> &str {
            "failing"
        }

        fn detect(&self, _image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
            Err(DetectorError::InferenceFailed("boom".into()))
        }
    }

    #[test]
    fn test_center_region() {
        let region = center_region(400, 400);
        assert_eq!(region.rect, PixelRect::new(80, 80, 240, 240));
        assert!(!region.detected);
        assert_eq!(region.detector_confidence, 0.0);
    }

    #[test]
    fn test_center_region_tiny_image() {
        let region = center_region(1, 1);
        assert_eq!(region.rect, PixelRect::new(0, 0, 1, 1));
    }

    #[test]
    fn test_zero_faces_falls_back() {
        let img = RgbImage::new(400, 300);
        let faces = locate_faces(&img, &NoDetector, &LocatorConfig::default());
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0], center_region(400, 300));
    }

    #[test]
    fn test_detector_error_falls_back() {
        let img = RgbImage::new(400, 300);
        let faces = locate_faces(&img, &FailingDetector, &LocatorConfig::default());
        assert_eq!(faces, vec![center_region(400, 300)]);
    }

    #[test]
    fn test_box_is_padded() {
        let img = RgbImage::new(400, 400);
        let detector = FixedDetector(vec![BoundingBox::new(100.0, 90.0, 200.0, 240.0, 0.9)]);
        let faces = locate_faces(&img, &detector, &LocatorConfig::default());
        assert_eq!(faces.len(), 1);
        assert!(faces[0].detected);
        assert_eq!(faces[0].rect, PixelRect::new(70, 54, 260, 312));
    }

    #[test]
    fn test_box_is_clipped() {
        let img = RgbImage::new(200, 200);
        let detector = FixedDetector(vec![BoundingBox::new(-20.0, 150.0, 100.0, 100.0, 0.9)]);
        let faces = locate_faces(&img, &detector, &LocatorConfig::default());
        let rect = faces[0].rect;
        assert_eq!(rect.x, 0);
        assert!(rect.x + rect.width <= 200);
        assert!(rect.y + rect.height <= 200);
    }

    #[test]
    fn test_small_box_is_a_miss() {
        let img = RgbImage::new(400, 400);
        let detector = FixedDetector(vec![BoundingBox::new(10.0, 10.0, 12.0, 12.0, 0.99)]);
        let faces = locate_faces(&img, &detector, &LocatorConfig::default());
        assert_eq!(faces, vec![center_region(400, 400)]);
    }

    #[test]
    fn test_low_confidence_is_ignored() {
        let img = RgbImage::new(400, 400);
        let detector = FixedDetector(vec![BoundingBox::new(100.0, 100.0, 150.0, 150.0, 0.2)]);
        let faces = locate_faces(&img, &detector, &LocatorConfig::default());
        assert!(!faces[0].detected);
    }

    #[test]
    fn test_every_face_is_kept() {
        let img = RgbImage::new(600, 300);
        let detector = FixedDetector(vec![
            BoundingBox::new(20.0, 20.0, 150.0, 150.0, 0.95),
            BoundingBox::new(350.0, 40.0, 150.0, 150.0, 0.7),
        ]);
        let faces = locate_faces(&img, &detector, &LocatorConfig::default());
        assert_eq!(faces.len(), 2);
        assert!(faces.iter().all(|f| f.detected));
    }
}
