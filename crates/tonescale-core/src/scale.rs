//! Scale registry: the fixed, ordered set of reference skin tones.
//!
//! The built-in registry is the 10-point Monk Skin Tone scale. Alternate
//! scales can be loaded from TOML; they must satisfy the same invariants:
//! exactly ten entries, indices 1..=10 in order, brightness strictly
//! decreasing from lightest to darkest.

use crate::color::{self, DistanceMetric};
use crate::types::Rgb;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use thiserror::Error;

pub const SCALE_SIZE: usize = 10;

const MONK_FAMILY: &str = "Monk";

/// Monk Skin Tone scale, lightest (1) to darkest (10).
const MONK_TONES: [Rgb; SCALE_SIZE] = [
    [0xf6, 0xed, 0xe4],
    [0xf3, 0xe7, 0xdb],
    [0xf7, 0xea, 0xd0],
    [0xea, 0xda, 0xba],
    [0xd7, 0xbd, 0x96],
    [0xa0, 0x7e, 0x56],
    [0x82, 0x5c, 0x43],
    [0x60, 0x41, 0x34],
    [0x3a, 0x31, 0x2a],
    [0x29, 0x24, 0x20],
];

static MONK_SCALE: OnceLock<Arc<ScaleRegistry>> = OnceLock::new();

#[derive(Error, Debug)]
pub enum ScaleError {
    #[error("scale must have exactly {SCALE_SIZE} tones, got {0}")]
    WrongSize(usize),
    #[error("tone at position {position} has index {index}, expected {expected}")]
    BadIndex {
        position: usize,
        index: u8,
        expected: u8,
    },
    #[error("tone {index}: invalid hex colour {hex:?}")]
    BadHex { index: u8, hex: String },
    #[error("tone {index} is not darker than tone {previous} (brightness {brightness:.1} >= {previous_brightness:.1})")]
    NotMonotonic {
        index: u8,
        previous: u8,
        brightness: f32,
        previous_brightness: f32,
    },
    #[error("toml: {0}")]
    Toml(#[from] toml::de::Error),
}

/// One point on the ordinal scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceTone {
    /// 1 = lightest, 10 = darkest.
    pub index: u8,
    /// Display label, e.g. "Monk 4".
    pub name: String,
    /// Stable identifier, e.g. "Monk04".
    pub id: String,
    pub rgb: Rgb,
}

impl ReferenceTone {
    fn new(family: &str, index: u8, rgb: Rgb) -> Self {
        Self {
            index,
            name: format!("{family} {index}"),
            id: format!("{family}{index:02}"),
            rgb,
        }
    }

    /// Lowercase `#rrggbb`.
    pub fn hex(&self) -> String {
        color::to_hex(self.rgb)
    }

    pub fn brightness(&self) -> f32 {
        color::brightness(self.rgb)
    }
}

/// Immutable, ordered reference scale. Shared read-only across requests.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScaleRegistry {
    family: String,
    tones: Vec<ReferenceTone>,
}

/// On-disk TOML layout for an alternate scale.
#[derive(Debug, Deserialize)]
struct ScaleFile {
    family: String,
    #[serde(rename = "tone")]
    tones: Vec<ToneEntry>,
}

#[derive(Debug, Deserialize)]
struct ToneEntry {
    index: u8,
    hex: String,
}

impl ScaleRegistry {
    /// The built-in Monk scale, initialized once.
    pub fn monk() -> &'static ScaleRegistry {
        Self::monk_shared_ref().as_ref()
    }

    /// Shared handle to the built-in Monk scale; every caller gets the same instance.
    pub fn monk_shared() -> Arc<ScaleRegistry> {
        Arc::clone(Self::monk_shared_ref())
    }

    fn monk_shared_ref() -> &'static Arc<ScaleRegistry> {
        MONK_SCALE.get_or_init(|| {
            Arc::new(ScaleRegistry {
                family: MONK_FAMILY.to_string(),
                tones: MONK_TONES
                    .iter()
                    .enumerate()
                    .map(|(i, &rgb)| ReferenceTone::new(MONK_FAMILY, i as u8 + 1, rgb))
                    .collect(),
            })
        })
    }

    /// Build a registry from `(index, rgb)` pairs, enforcing the scale invariants.
    pub fn from_entries(family: &str, entries: &[(u8, Rgb)]) -> Result<Self, ScaleError> {
        let tones = entries
            .iter()
            .map(|&(index, rgb)| ReferenceTone::new(family, index, rgb))
            .collect();
        let registry = Self {
            family: family.to_string(),
            tones,
        };
        registry.validate()?;
        Ok(registry)
    }

    /// Parse an alternate scale:
    ///
    /// ```toml
    /// family = "Monk"
    /// [[tone]]
    /// index = 1
    /// hex = "#f6ede4"
    /// ```
    pub fn from_toml_str(src: &str) -> Result<Self, ScaleError> {
        let file: ScaleFile = toml::from_str(src)?;
        let mut entries = Vec::with_capacity(file.tones.len());
        for tone in &file.tones {
            let rgb = color::parse_hex(&tone.hex).ok_or_else(|| ScaleError::BadHex {
                index: tone.index,
                hex: tone.hex.clone(),
            })?;
            entries.push((tone.index, rgb));
        }
        Self::from_entries(&file.family, &entries)
    }

    /// Check size, index contiguity and brightness ordering.
    pub fn validate(&self) -> Result<(), ScaleError> {
        if self.tones.len() != SCALE_SIZE {
            return Err(ScaleError::WrongSize(self.tones.len()));
        }
        for (position, tone) in self.tones.iter().enumerate() {
            let expected = position as u8 + 1;
            if tone.index != expected {
                return Err(ScaleError::BadIndex {
                    position,
                    index: tone.index,
                    expected,
                });
            }
        }
        for pair in self.tones.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            if next.brightness() >= prev.brightness() {
                return Err(ScaleError::NotMonotonic {
                    index: next.index,
                    previous: prev.index,
                    brightness: next.brightness(),
                    previous_brightness: prev.brightness(),
                });
            }
        }
        Ok(())
    }

    pub fn family(&self) -> &str {
        &self.family
    }

    pub fn tones(&self) -> &[ReferenceTone] {
        &self.tones
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReferenceTone> {
        self.tones.iter()
    }

    pub fn len(&self) -> usize {
        self.tones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tones.is_empty()
    }

    /// Look up by ordinal index (1-based).
    pub fn get(&self, index: u8) -> Option<&ReferenceTone> {
        index
            .checked_sub(1)
            .and_then(|i| self.tones.get(i as usize))
    }

    /// Look up by index, clamped into the scale. A registry is never empty:
    /// every constructor validates its size.
    pub fn clamped(&self, index: u8) -> &ReferenceTone {
        let last = self.tones.len().saturating_sub(1);
        &self.tones[(index as usize).saturating_sub(1).min(last)]
    }

    pub fn by_id(&self, id: &str) -> Option<&ReferenceTone> {
        self.tones.iter().find(|t| t.id == id)
    }

    /// Closest reference tone and its distance. Ties resolve to the lighter tone.
    pub fn nearest(&self, rgb: Rgb, metric: DistanceMetric) -> Option<(&ReferenceTone, f32)> {
        let mut best: Option<(&ReferenceTone, f32)> = None;
        for tone in &self.tones {
            let d = metric.distance(rgb, tone.rgb);
            let better = match best {
                None => true,
                Some((_, best_d)) => d < best_d,
            };
            if better {
                best = Some((tone, d));
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monk_scale_is_valid() {
        let scale = ScaleRegistry::monk();
        scale.validate().unwrap();
        assert_eq!(scale.len(), SCALE_SIZE);
        assert_eq!(scale.family(), "Monk");
    }

    #[test]
    fn test_monk_labels() {
        let scale = ScaleRegistry::monk();
        let tone = scale.get(4).unwrap();
        assert_eq!(tone.name, "Monk 4");
        assert_eq!(tone.id, "Monk04");
        assert_eq!(tone.hex(), "#eadaba");
        assert_eq!(scale.get(10).unwrap().id, "Monk10");
    }

    #[test]
    fn test_get_out_of_range() {
        let scale = ScaleRegistry::monk();
        assert!(scale.get(0).is_none());
        assert!(scale.get(11).is_none());
    }

    #[test]
    fn test_monk_is_loaded_once() {
        let a = ScaleRegistry::monk_shared();
        let b = ScaleRegistry::monk_shared();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(std::ptr::eq(a.as_ref(), ScaleRegistry::monk()));
    }

    #[test]
    fn test_clamped() {
        let scale = ScaleRegistry::monk();
        assert_eq!(scale.clamped(0).index, 1);
        assert_eq!(scale.clamped(7).index, 7);
        assert_eq!(scale.clamped(200).index, 10);
    }

    #[test]
    fn test_by_id() {
        let scale = ScaleRegistry::monk();
        assert_eq!(scale.by_id("Monk05").unwrap().hex(), "#d7bd96");
        assert!(scale.by_id("Fitz05").is_none());
    }

    #[test]
    fn test_nearest_exact() {
        let scale = ScaleRegistry::monk();
        for tone in scale.iter() {
            let (hit, d) = scale.nearest(tone.rgb, DistanceMetric::Rgb).unwrap();
            assert_eq!(hit.index, tone.index);
            assert_eq!(d, 0.0);
        }
    }

    #[test]
    fn test_from_toml() {
        let mut src = String::from("family = \"Test\"\n");
        for (i, rgb) in MONK_TONES.iter().enumerate() {
            src.push_str(&format!(
                "[[tone]]\nindex = {}\nhex = \"{}\"\n",
                i + 1,
                color::to_hex(*rgb)
            ));
        }
        let scale = ScaleRegistry::from_toml_str(&src).unwrap();
        assert_eq!(scale.get(3).unwrap().name, "Test 3");
        assert_eq!(scale.get(3).unwrap().rgb, MONK_TONES[2]);
    }

    #[test]
    fn test_rejects_wrong_size() {
        let entries: Vec<(u8, Rgb)> = MONK_TONES[..9]
            .iter()
            .enumerate()
            .map(|(i, &rgb)| (i as u8 + 1, rgb))
            .collect();
        let err = ScaleRegistry::from_entries("Short", &entries).unwrap_err();
        assert!(matches!(err, ScaleError::WrongSize(9)));
    }

    #[test]
    fn test_rejects_non_monotonic() {
        let mut entries: Vec<(u8, Rgb)> = MONK_TONES
            .iter()
            .enumerate()
            .map(|(i, &rgb)| (i as u8 + 1, rgb))
            .collect();
        entries.swap(3, 6);
        entries[3].0 = 4;
        entries[6].0 = 7;
        let err = ScaleRegistry::from_entries("Shuffled", &entries).unwrap_err();
        assert!(matches!(err, ScaleError::NotMonotonic { .. }));
    }

    #[test]
    fn test_rejects_bad_index() {
        let mut entries: Vec<(u8, Rgb)> = MONK_TONES
            .iter()
            .enumerate()
            .map(|(i, &rgb)| (i as u8 + 1, rgb))
            .collect();
        entries[0].0 = 0;
        let err = ScaleRegistry::from_entries("Zero", &entries).unwrap_err();
        assert!(matches!(err, ScaleError::BadIndex { position: 0, .. }));
    }

    #[test]
    fn test_rejects_bad_hex() {
        let src = "family = \"X\"\n[[tone]]\nindex = 1\nhex = \"#nothex\"\n";
        let err = ScaleRegistry::from_toml_str(src).unwrap_err();
        assert!(matches!(err, ScaleError::BadHex { index: 1, .. }));
    }
}
