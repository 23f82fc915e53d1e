//! Confidence arbiter: pick one tone from the method votes.
//!
//! Rules, in order:
//! 1. Very light colours (mean RGB above `very_light_threshold`) take the
//!    angle vote when there is one. The other methods drift toward the
//!    middle of the scale on near-white input.
//! 2. Otherwise the most confident vote wins; ties go to the earlier method.
//! 3. No votes at all yields the configured default tone with confidence 0
//!    and `success = false`.

use crate::config::ArbiterConfig;
use crate::types::{ClassificationVote, Method};
use serde::Serialize;

/// Which rule decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    VeryLight,
    HighestConfidence,
    Default,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub tone_index: u8,
    pub confidence: f32,
    /// Method of the winning vote; `None` for the default.
    pub method: Option<Method>,
    pub rule: Rule,
}

impl Decision {
    pub fn success(&self) -> bool {
        self.method.is_some()
    }

    /// Method name reported on the result, "none" for the default.
    pub fn method_name(&self) -> &'static str {
        self.method.map(|m| m.as_str()).unwrap_or("none")
    }

    pub fn default_tone(config: &ArbiterConfig) -> Self {
        Self {
            tone_index: config.default_tone,
            confidence: 0.0,
            method: None,
            rule: Rule::Default,
        }
    }
}

/// Arbitrate `votes` for a colour of mean-RGB `brightness`.
pub fn arbitrate(votes: &[ClassificationVote], brightness: f32, config: &ArbiterConfig) -> Decision {
    let decide = |v: &ClassificationVote, rule: Rule| Decision {
        tone_index: v.tone_index,
        confidence: sanitize(v.confidence),
        method: Some(v.method),
        rule,
    };

    if brightness > config.very_light_threshold {
        if let Some(angle) = votes.iter().find(|v| v.method == Method::Angle) {
            tracing::debug!(
                brightness,
                threshold = config.very_light_threshold,
                tone = angle.tone_index,
                "very light colour; angle vote preferred"
            );
            return decide(angle, Rule::VeryLight);
        }
    }

    let mut best: Option<&ClassificationVote> = None;
    for v in votes {
        match best {
            Some(b) if sanitize(v.confidence) <= sanitize(b.confidence) => {}
            _ => best = Some(v),
        }
    }

    match best {
        Some(v) => decide(v, Rule::HighestConfidence),
        None => {
            tracing::warn!(
                default_tone = config.default_tone,
                "no method produced a vote; reporting default tone"
            );
            Decision::default_tone(config)
        }
    }
}

fn sanitize(confidence: f32) -> f32 {
    if confidence.is_finite() {
        confidence.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn vote(method: Method, tone_index: u8, confidence: f32) -> ClassificationVote {
        ClassificationVote {
            method,
            tone_index,
            confidence,
            diagnostics: BTreeMap::new(),
        }
    }

    #[test]
    fn test_highest_confidence_wins() {
        let votes = [
            vote(Method::Angle, 2, 0.90),
            vote(Method::Brightness, 5, 0.75),
            vote(Method::Distance, 5, 0.99),
        ];
        let d = arbitrate(&votes, 184.7, &ArbiterConfig::default());
        assert_eq!(d.tone_index, 5);
        assert_eq!(d.method, Some(Method::Distance));
        assert_eq!(d.rule, Rule::HighestConfidence);
        assert!(d.success());
    }

    #[test]
    fn test_tie_goes_to_earlier_method() {
        let votes = [
            vote(Method::Brightness, 4, 0.75),
            vote(Method::Angle, 3, 0.75),
        ];
        let d = arbitrate(&votes, 200.0, &ArbiterConfig::default());
        assert_eq!(d.method, Some(Method::Brightness));
    }

    #[test]
    fn test_very_light_prefers_angle() {
        let votes = [
            vote(Method::Angle, 1, 0.95),
            vote(Method::Brightness, 2, 0.70),
            vote(Method::Distance, 2, 0.99),
        ];
        let d = arbitrate(&votes, 237.0, &ArbiterConfig::default());
        assert_eq!(d.tone_index, 1);
        assert_eq!(d.method, Some(Method::Angle));
        assert_eq!(d.rule, Rule::VeryLight);
    }

    #[test]
    fn test_very_light_without_angle_vote() {
        let votes = [vote(Method::Distance, 2, 0.99)];
        let d = arbitrate(&votes, 240.0, &ArbiterConfig::default());
        assert_eq!(d.method, Some(Method::Distance));
    }

    #[test]
    fn test_no_votes_is_default() {
        let d = arbitrate(&[], 120.0, &ArbiterConfig::default());
        assert_eq!(d.tone_index, 5);
        assert_eq!(d.confidence, 0.0);
        assert!(!d.success());
        assert_eq!(d.method_name(), "none");
    }

    #[test]
    fn test_non_finite_confidence_loses() {
        let votes = [
            vote(Method::Angle, 3, f32::NAN),
            vote(Method::Brightness, 4, 0.7),
        ];
        let d = arbitrate(&votes, 200.0, &ArbiterConfig::default());
        assert_eq!(d.method, Some(Method::Brightness));
        assert_eq!(d.confidence, 0.7);
    }
}
