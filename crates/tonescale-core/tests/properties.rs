use image::RgbImage;
use proptest::prelude::*;
use std::sync::Arc;
use tonescale_core::arbiter::arbitrate;
use tonescale_core::classify::{AngleMethod, BrightnessMethod, DistanceMethod, ToneMethod};
use tonescale_core::color::{self, DistanceMetric};
use tonescale_core::config::ArbiterConfig;
use tonescale_core::{Classifier, ScaleRegistry, SkinToneAnalyzer};

fn methods() -> Vec<Arc<dyn ToneMethod>> {
    vec![
        Arc::new(AngleMethod),
        Arc::new(BrightnessMethod),
        Arc::new(DistanceMethod {
            metric: DistanceMetric::Rgb,
        }),
        Arc::new(DistanceMethod {
            metric: DistanceMetric::Lab,
        }),
    ]
}

proptest! {
    #[test]
    fn every_method_confidence_is_a_probability(r in 0u8..=255, g in 0u8..=255, b in 0u8..=255) {
        let scale = ScaleRegistry::monk();
        for method in methods() {
            let vote = method.classify([r, g, b], scale).unwrap();
            prop_assert!((0.0..=1.0).contains(&vote.confidence), "{:?}", vote);
            prop_assert!((1..=10).contains(&vote.tone_index));
        }
    }

    #[test]
    fn arbitration_confidence_is_a_probability(r in 0u8..=255, g in 0u8..=255, b in 0u8..=255) {
        let scale = Arc::new(ScaleRegistry::monk().clone());
        let classifier = Classifier::with_methods(methods(), false, std::time::Duration::from_millis(100));
        let votes = classifier.classify([r, g, b], &scale);
        let decision = arbitrate(&votes, color::brightness([r, g, b]), &ArbiterConfig::default());
        prop_assert!((0.0..=1.0).contains(&decision.confidence));
        prop_assert!(decision.success());
    }

    #[test]
    fn hex_round_trips(r in 0u8..=255, g in 0u8..=255, b in 0u8..=255) {
        prop_assert_eq!(color::parse_hex(&color::to_hex([r, g, b])), Some([r, g, b]));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn pipeline_confidences_are_probabilities(
        r in 0u8..=255,
        g in 0u8..=255,
        b in 0u8..=255,
        size in 8u32..96,
    ) {
        let analyzer = SkinToneAnalyzer::default();
        let img = RgbImage::from_pixel(size, size, image::Rgb([r, g, b]));
        let result = analyzer.analyze_image(&img).unwrap();
        prop_assert!((0.0..=1.0).contains(&result.confidence));
        prop_assert!((0.0..=1.0).contains(&result.color_confidence));
        prop_assert!(result.votes.iter().all(|v| (0.0..=1.0).contains(&v.confidence)));
        prop_assert!(result.success);
        prop_assert!(result.regions_analyzed >= 1);
    }
}
