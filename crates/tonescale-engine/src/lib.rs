//! tonescale-engine: serve skin-tone analyses off the async runtime.
//!
//! A fixed pool of worker threads shares one [`SkinToneAnalyzer`]; async
//! callers talk to it through [`EngineHandle`]. Identical images are
//! computed once and served from a TTL cache.
//!
//! [`SkinToneAnalyzer`]: tonescale_core::SkinToneAnalyzer

pub mod cache;
pub mod config;
pub mod engine;

pub use cache::{ContentKey, ResultCache};
pub use config::EngineConfig;
pub use engine::{spawn_engine, EngineError, EngineHandle};
