//! Engine settings from `TONESCALE_*` environment variables.

use std::path::PathBuf;
use std::time::Duration;
use tonescale_core::config::DetectorBackend;
use tonescale_core::{AnalyzerConfig, ConfigError};

/// Engine configuration, loaded from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Number of analysis worker threads.
    pub workers: usize,
    /// Requests buffered per worker before callers wait.
    pub queue_depth: usize,
    /// How long a cached result stays valid.
    pub cache_ttl: Duration,
    /// Maximum cached results; 0 disables the cache.
    pub cache_capacity: usize,
    /// Analyzer calibration file (TOML). Defaults apply when unset.
    pub analyzer_config: Option<PathBuf>,
    /// SCRFD model; setting it selects the `scrfd` detector backend.
    pub model_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_depth: 8,
            cache_ttl: Duration::from_secs(300),
            cache_capacity: 256,
            analyzer_config: None,
            model_path: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from `TONESCALE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            workers: parse(&lookup, "TONESCALE_WORKERS", defaults.workers).max(1),
            queue_depth: parse(&lookup, "TONESCALE_QUEUE_DEPTH", defaults.queue_depth).max(1),
            cache_ttl: Duration::from_secs(parse(
                &lookup,
                "TONESCALE_CACHE_TTL_SECS",
                defaults.cache_ttl.as_secs(),
            )),
            cache_capacity: parse(&lookup, "TONESCALE_CACHE_CAPACITY", defaults.cache_capacity),
            analyzer_config: lookup("TONESCALE_CONFIG")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            model_path: lookup("TONESCALE_MODEL_PATH")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
        }
    }

    /// Analyzer configuration: the configured file (or defaults) with the
    /// model path override applied.
    pub fn analyzer_config(&self) -> Result<AnalyzerConfig, ConfigError> {
        let mut config = match &self.analyzer_config {
            Some(path) => AnalyzerConfig::from_toml_file(path)?,
            None => AnalyzerConfig::default(),
        };
        if let Some(model) = &self.model_path {
            config.locator.detector = DetectorBackend::Scrfd;
            config.locator.model_path = Some(model.clone());
        }
        Ok(config)
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().min(4))
        .unwrap_or(2)
}

fn parse<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "ignoring unparsable environment value");
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::from_lookup(lookup(&[]));
        assert_eq!(config, EngineConfig::default());
        assert!(config.workers >= 1);
        assert_eq!(config.cache_ttl, Duration::from_secs(300));
    }

    #[test]
    fn test_overrides() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("TONESCALE_WORKERS", "3"),
            ("TONESCALE_CACHE_TTL_SECS", "5"),
            ("TONESCALE_CACHE_CAPACITY", "0"),
            ("TONESCALE_MODEL_PATH", "/models/det_10g.onnx"),
        ]));
        assert_eq!(config.workers, 3);
        assert_eq!(config.cache_ttl, Duration::from_secs(5));
        assert_eq!(config.cache_capacity, 0);
        assert_eq!(config.model_path, Some(PathBuf::from("/models/det_10g.onnx")));
    }

    #[test]
    fn test_bad_values_fall_back() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("TONESCALE_WORKERS", "many"),
            ("TONESCALE_QUEUE_DEPTH", "0"),
        ]));
        assert_eq!(config.workers, EngineConfig::default().workers);
        assert_eq!(config.queue_depth, 1);
    }

    #[test]
    fn test_model_path_selects_scrfd() {
        let config = EngineConfig {
            model_path: Some(PathBuf::from("/models/det_10g.onnx")),
            ..EngineConfig::default()
        };
        let analyzer = config.analyzer_config().unwrap();
        assert_eq!(analyzer.locator.detector, DetectorBackend::Scrfd);
    }

    #[test]
    fn test_missing_config_file() {
        let config = EngineConfig {
            analyzer_config: Some(PathBuf::from("/nonexistent/tonescale.toml")),
            ..EngineConfig::default()
        };
        assert!(matches!(config.analyzer_config(), Err(ConfigError::Io { .. })));
    }
}
