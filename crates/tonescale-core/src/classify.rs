//! Multi-method tone classification.
//!
//! Each method maps the aggregated colour to a (tone, confidence) vote
//! independently of the others:
//!
//! - [`AngleMethod`]: Individual Typology Angle over L*a*b*, with a bias
//!   toward lighter buckets for very bright colours.
//! - [`BrightnessMethod`]: mean RGB against a fixed threshold ladder.
//! - [`DistanceMethod`]: nearest reference tone in RGB or L*a*b*.
//!
//! Methods are pure, so they can run on separate threads. A method that
//! fails or misses the deadline is left out of the votes.

use crate::color::{self, DistanceMetric};
use crate::config::ClassifierConfig;
use crate::scale::ScaleRegistry;
use crate::types::{ClassificationVote, Method, Rgb};
use std::collections::BTreeMap;
use std::io;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Corrected angle thresholds, lightest first: `(above, tone, confidence)`.
const ANGLE_TABLE: [(f32, u8, f32); 9] = [
    (60.0, 1, 0.95),
    (45.0, 2, 0.90),
    (30.0, 3, 0.85),
    (15.0, 4, 0.80),
    (-20.0, 5, 0.75),
    (-30.0, 6, 0.70),
    (-50.0, 7, 0.70),
    (-65.0, 8, 0.70),
    (-80.0, 9, 0.70),
];
const ANGLE_DARKEST: (u8, f32) = (10, 0.70);

/// Mean-RGB thresholds, brightest first: `(above, tone, confidence)`.
/// Each threshold sits between neighbouring Monk references.
const BRIGHTNESS_LADDER: [(f32, u8, f32); 9] = [
    (234.0, 1, 0.80),
    (230.3, 2, 0.70),
    (221.0, 3, 0.70),
    (199.0, 4, 0.75),
    (155.0, 5, 0.75),
    (110.0, 6, 0.75),
    (84.0, 7, 0.75),
    (60.0, 8, 0.75),
    (43.0, 9, 0.75),
];
const BRIGHTNESS_DARKEST: (u8, f32) = (10, 0.80);

/// Floor for the distance method's confidence.
const DISTANCE_MIN_CONFIDENCE: f32 = 0.5;

#[derive(Error, Debug)]
pub enum MethodError {
    #[error("{quantity} is not finite")]
    NonFinite { quantity: &'static str },
    #[error("{method} did not answer within {timeout_ms} ms")]
    Timeout { method: Method, timeout_ms: u64 },
    #[error("reference scale is empty")]
    EmptyScale,
}

/// One classification method.
pub trait ToneMethod: Send + Sync {
    fn method(&self) -> Method;

    fn classify(&self, rgb: Rgb, scale: &ScaleRegistry) -> Result<ClassificationVote, MethodError>;
}

/// ITA in degrees: `atan2(L* - 50, b*)`.
pub fn individual_typology_angle(l: f32, b: f32) -> f32 {
    (l - 50.0).atan2(b).to_degrees()
}

/// Degrees added to the angle of very bright colours, whose chroma
/// collapses toward white and would otherwise read as a darker bucket.
pub fn brightness_bias(brightness: f32) -> f32 {
    if brightness > 230.0 {
        10.0
    } else if brightness > 215.0 {
        5.0
    } else {
        0.0
    }
}

fn vote(method: Method, tone_index: u8, confidence: f32, diagnostics: &[(&str, f32)]) -> ClassificationVote {
    ClassificationVote {
        method,
        tone_index,
        confidence: confidence.clamp(0.0, 1.0),
        diagnostics: diagnostics
            .iter()
            .map(|&(k, v)| (k.to_string(), v))
            .collect::<BTreeMap<_, _>>(),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AngleMethod;

impl ToneMethod for AngleMethod {
    fn method(&self) -> Method {
        Method::Angle
    }

    fn classify(&self, rgb: Rgb, _scale: &ScaleRegistry) -> Result<ClassificationVote, MethodError> {
        let lab = color::rgb_to_lab(rgb);
        if !(lab.l.is_finite() && lab.b.is_finite()) {
            return Err(MethodError::NonFinite { quantity: "L*a*b*" });
        }
        let ita = individual_typology_angle(lab.l, lab.b);
        if !ita.is_finite() {
            return Err(MethodError::NonFinite { quantity: "ITA" });
        }
        let brightness = color::brightness(rgb);
        let corrected = ita + brightness_bias(brightness);

        let (tone, confidence) = ANGLE_TABLE
            .iter()
            .find(|&&(above, _, _)| corrected > above)
            .map(|&(_, tone, conf)| (tone, conf))
            .unwrap_or(ANGLE_DARKEST);

        Ok(vote(
            Method::Angle,
            tone,
            confidence,
            &[
                ("ita", ita),
                ("ita_corrected", corrected),
                ("l", lab.l),
                ("b", lab.b),
                ("brightness", brightness),
            ],
        ))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BrightnessMethod;

impl ToneMethod for BrightnessMethod {
    fn method(&self) -> Method {
        Method::Brightness
    }

    fn classify(&self, rgb: Rgb, _scale: &ScaleRegistry) -> Result<ClassificationVote, MethodError> {
        let brightness = color::brightness(rgb);
        let (tone, confidence) = BRIGHTNESS_LADDER
            .iter()
            .find(|&&(above, _, _)| brightness > above)
            .map(|&(_, tone, conf)| (tone, conf))
            .unwrap_or(BRIGHTNESS_DARKEST);
        Ok(vote(
            Method::Brightness,
            tone,
            confidence,
            &[("brightness", brightness)],
        ))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DistanceMethod {
    pub metric: DistanceMetric,
}

impl ToneMethod for DistanceMethod {
    fn method(&self) -> Method {
        Method::Distance
    }

    fn classify(&self, rgb: Rgb, scale: &ScaleRegistry) -> Result<ClassificationVote, MethodError> {
        let (tone, distance) = scale.nearest(rgb, self.metric).ok_or(MethodError::EmptyScale)?;
        if !distance.is_finite() {
            return Err(MethodError::NonFinite { quantity: "distance" });
        }
        let confidence = (1.0 - distance / self.metric.max_distance()).max(DISTANCE_MIN_CONFIDENCE);
        Ok(vote(
            Method::Distance,
            tone.index,
            confidence,
            &[("distance", distance)],
        ))
    }
}

/// Instantiate the configured methods, in vote order.
pub fn methods_from_config(config: &ClassifierConfig) -> Vec<Arc<dyn ToneMethod>> {
    config
        .methods
        .iter()
        .map(|m| -> Arc<dyn ToneMethod> {
            match m {
                Method::Angle => Arc::new(AngleMethod),
                Method::Brightness => Arc::new(BrightnessMethod),
                Method::Distance => Arc::new(DistanceMethod {
                    metric: config.distance_metric,
                }),
            }
        })
        .collect()
}

type Job = Box<dyn FnOnce() + Send>;

/// Starts one method's job off the calling thread.
type Spawner = fn(String, Job) -> io::Result<()>;

fn spawn_thread(name: String, job: Job) -> io::Result<()> {
    std::thread::Builder::new().name(name).spawn(job).map(|_| ())
}

/// Runs a set of methods over one colour and collects their votes.
pub struct Classifier {
    methods: Vec<Arc<dyn ToneMethod>>,
    parallel: bool,
    timeout: Duration,
    spawn: Spawner,
}

impl Classifier {
    pub fn from_config(config: &ClassifierConfig) -> Self {
        Self::with_methods(
            methods_from_config(config),
            config.parallel,
            Duration::from_millis(config.method_timeout_ms),
        )
    }

    pub fn with_methods(methods: Vec<Arc<dyn ToneMethod>>, parallel: bool, timeout: Duration) -> Self {
        Self {
            methods,
            parallel,
            timeout,
            spawn: spawn_thread,
        }
    }

    pub fn methods(&self) -> impl Iterator<Item = Method> + '_ {
        self.methods.iter().map(|m| m.method())
    }

    /// Votes of every method that answered, in configured method order.
    pub fn classify(&self, rgb: Rgb, scale: &Arc<ScaleRegistry>) -> Vec<ClassificationVote> {
        if self.parallel && self.methods.len() > 1 {
            self.classify_parallel(rgb, scale)
        } else {
            self.methods
                .iter()
                .filter_map(|m| accept(m.method(), m.classify(rgb, scale)))
                .collect()
        }
    }

    fn classify_parallel(&self, rgb: Rgb, scale: &Arc<ScaleRegistry>) -> Vec<ClassificationVote> {
        let (tx, rx) = mpsc::channel();
        let mut votes: Vec<(usize, ClassificationVote)> = Vec::with_capacity(self.methods.len());
        let mut pending = vec![false; self.methods.len()];

        for (order, method) in self.methods.iter().enumerate() {
            let tx = tx.clone();
            let worker = Arc::clone(method);
            let shared = Arc::clone(scale);
            let job: Job = Box::new(move || {
                // The receiver is gone once the deadline passed.
                let _ = tx.send((order, worker.classify(rgb, &shared)));
            });
            match (self.spawn)(format!("tonescale-{}", method.method()), job) {
                Ok(_) => pending[order] = true,
                Err(e) => {
                    tracing::warn!(
                        method = %method.method(),
                        error = %e,
                        "failed to spawn method thread; running inline"
                    );
                    if let Some(v) = accept(method.method(), method.classify(rgb, scale)) {
                        votes.push((order, v));
                    }
                }
            }
        }
        drop(tx);

        let deadline = Instant::now() + self.timeout;
        while pending.iter().any(|&p| p) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok((order, result)) => {
                    pending[order] = false;
                    if let Some(v) = accept(self.methods[order].method(), result) {
                        votes.push((order, v));
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    for (order, _) in pending.iter().enumerate().filter(|(_, &p)| p) {
                        let method = self.methods[order].method();
                        let e = MethodError::Timeout {
                            method,
                            timeout_ms: self.timeout.as_millis() as u64,
                        };
                        tracing::warn!(method = %method, error = %e, "method excluded");
                    }
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        votes.sort_by_key(|(order, _)| *order);
        votes.into_iter().map(|(_, v)| v).collect()
    }
}

fn accept(method: Method, result: Result<ClassificationVote, MethodError>) -> Option<ClassificationVote> {
    match result {
        Ok(v) => {
            tracing::trace!(
                method = %method,
                tone = v.tone_index,
                confidence = v.confidence,
                "method voted"
            );
            Some(v)
        }
        Err(e) => {
            tracing::warn!(method = %method, error = %e, "method failed");
            None
        }
    }
}
