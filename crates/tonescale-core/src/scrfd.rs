//! SCRFD face detector backend via ONNX Runtime.
//!
//! The image is letterboxed into a 640×640 tensor, each of the three stride
//! heads (8, 16, 32) is decoded from its anchor grid, and overlapping boxes
//! are merged with NMS. Only score and box heads are read; keypoint heads,
//! if the export has them, are ignored. Enabled by the `scrfd` cargo feature.

use crate::detector::{DetectorError, FaceDetector};
use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::sync::Mutex;

const INPUT_SIZE: u32 = 640;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 128.0;
const SCORE_THRESHOLD: f32 = 0.5;
const NMS_IOU: f32 = 0.4;
const STRIDES: [u32; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;

/// Placement of the source image inside the square input tensor.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
    scale: f32,
    pad_x: u32,
    pad_y: u32,
}

impl Letterbox {
    fn fit(width: u32, height: u32) -> Self {
        let scale = (INPUT_SIZE as f32 / width as f32).min(INPUT_SIZE as f32 / height as f32);
        let (new_w, new_h) = scaled_size(width, height, scale);
        Self {
            scale,
            pad_x: (INPUT_SIZE - new_w) / 2,
            pad_y: (INPUT_SIZE - new_h) / 2,
        }
    }

    /// Tensor coordinates back to source-image pixels.
    fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.pad_x as f32) / self.scale,
            (y - self.pad_y as f32) / self.scale,
        )
    }
}

fn scaled_size(width: u32, height: u32, scale: f32) -> (u32, u32) {
    let w = ((width as f32 * scale).round() as u32).clamp(1, INPUT_SIZE);
    let h = ((height as f32 * scale).round() as u32).clamp(1, INPUT_SIZE);
    (w, h)
}

/// Output tensor positions of one stride head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HeadOutputs {
    score: usize,
    bbox: usize,
}

/// SCRFD-based face detector.
pub struct ScrfdDetector {
    /// `Session::run` needs exclusive access; requests share the detector.
    session: Mutex<Session>,
    heads: [HeadOutputs; 3],
}

impl ScrfdDetector {
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if names.len() < 6 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD needs score and bbox outputs for 3 strides, model has {} outputs",
                names.len()
            )));
        }
        let heads = head_outputs(&names);
        tracing::info!(path = %model_path.display(), outputs = ?names, ?heads, "loaded SCRFD model");

        Ok(Self {
            session: Mutex::new(session),
            heads,
        })
    }

    fn run(&self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        let (input, letterbox) = letterbox_tensor(image);

        let mut session = self
            .session
            .lock()
            .map_err(|_| DetectorError::InferenceFailed("session lock poisoned".into()))?;
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (head, &stride) in self.heads.iter().zip(STRIDES.iter()) {
            let extract = |index: usize, what: &str| {
                outputs[index]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}")))
            };
            let scores = extract(head.score, "scores")?;
            let boxes = extract(head.bbox, "boxes")?;
            candidates.extend(decode_stride(scores, boxes, stride, &letterbox, SCORE_THRESHOLD));
        }

        let faces = non_max_suppression(candidates, NMS_IOU);
        tracing::debug!(faces = faces.len(), "SCRFD inference done");
        Ok(faces)
    }
}

impl FaceDetector for ScrfdDetector {
    fn name(&self) -> &str {
        "scrfd"
    }

    fn detect(&self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }
        self.run(image)
    }
}

/// Resize `image` into the centre of a mean-padded NCHW tensor, normalized
/// to the SCRFD input distribution.
fn letterbox_tensor(image: &RgbImage) -> (Array4<f32>, Letterbox) {
    let letterbox = Letterbox::fit(image.width(), image.height());
    let (new_w, new_h) = scaled_size(image.width(), image.height(), letterbox.scale);
    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let side = INPUT_SIZE as usize;
    // Padding normalizes to exactly zero.
    let mut tensor = Array4::<f32>::zeros((1, 3, side, side));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let tx = (x + letterbox.pad_x) as usize;
        let ty = (y + letterbox.pad_y) as usize;
        for (c, &v) in pixel.0.iter().enumerate() {
            tensor[[0, c, ty, tx]] = (v as f32 - PIXEL_MEAN) / PIXEL_STD;
        }
    }
    (tensor, letterbox)
}

/// Map stride heads to output positions, by name (`score_8`, `bbox_16`...)
/// when the export names them, else by the usual positional layout
/// (scores at 0..3, boxes at 3..6).
fn head_outputs(names: &[String]) -> [HeadOutputs; 3] {
    let find = |prefix: &str, stride: u32| names.iter().position(|n| *n == format!("{prefix}_{stride}"));
    let by_name = |i: usize| -> Option<HeadOutputs> {
        Some(HeadOutputs {
            score: find("score", STRIDES[i])?,
            bbox: find("bbox", STRIDES[i])?,
        })
    };
    match (by_name(0), by_name(1), by_name(2)) {
        (Some(a), Some(b), Some(c)) => [a, b, c],
        _ => [0, 1, 2].map(|i| HeadOutputs {
            score: i,
            bbox: i + 3,
        }),
    }
}

/// Decode one stride head into source-image boxes scoring above `threshold`.
///
/// Box regressions are (left, top, right, bottom) distances from the anchor
/// centre in units of the stride.
fn decode_stride(
    scores: &[f32],
    boxes: &[f32],
    stride: u32,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<BoundingBox> {
    let grid = (INPUT_SIZE / stride) as usize;
    let step = stride as f32;

    scores
        .iter()
        .take(grid * grid * ANCHORS_PER_CELL)
        .enumerate()
        .filter(|&(_, &score)| score > threshold)
        .filter_map(|(anchor, &score)| {
            let d = boxes.get(anchor * 4..anchor * 4 + 4)?;
            let cell = anchor / ANCHORS_PER_CELL;
            let cx = (cell % grid) as f32 * step;
            let cy = (cell / grid) as f32 * step;
            let (x1, y1) = letterbox.to_source(cx - d[0] * step, cy - d[1] * step);
            let (x2, y2) = letterbox.to_source(cx + d[2] * step, cy + d[3] * step);
            Some(BoundingBox::new(x1, y1, x2 - x1, y2 - y1, score))
        })
        .collect()
}

/// Greedy NMS; the result is ordered by descending confidence.
fn non_max_suppression(mut boxes: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<BoundingBox> = Vec::with_capacity(boxes.len());
    for candidate in boxes {
        if kept.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = w * h;
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
