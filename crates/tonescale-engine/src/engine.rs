//! Worker pool that runs analyses on dedicated threads for async callers.

use crate::cache::{ContentKey, ResultCache};
use crate::config::EngineConfig;
use image::RgbImage;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tonescale_core::{AnalysisError, ClassificationResult, SkinToneAnalyzer};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("analysis failed: {0}")]
    Analysis(#[from] AnalysisError),
    #[error("engine worker exited")]
    ChannelClosed,
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Messages sent from async callers to a worker thread.
enum EngineRequest {
    Analyze {
        image: Arc<RgbImage>,
        reply: oneshot::Sender<Result<ClassificationResult, AnalysisError>>,
    },
    Decode {
        bytes: Vec<u8>,
        reply: oneshot::Sender<Result<RgbImage, AnalysisError>>,
    },
}

/// Clone-safe handle to the worker pool.
///
/// Dropping a returned future abandons the request; the worker finishes it
/// and discards the reply.
#[derive(Clone)]
pub struct EngineHandle {
    workers: Arc<[mpsc::Sender<EngineRequest>]>,
    next: Arc<AtomicUsize>,
    cache: Option<Arc<ResultCache>>,
}

impl EngineHandle {
    /// Classify a decoded image, served from the cache when possible.
    pub async fn analyze_image(&self, image: RgbImage) -> Result<ClassificationResult, EngineError> {
        let image = Arc::new(image);
        match &self.cache {
            Some(cache) => {
                let key = ContentKey::of_image(&image);
                cache
                    .get_or_try_insert_with(key, || self.run_analysis(Arc::clone(&image)))
                    .await
            }
            None => self.run_analysis(image).await,
        }
    }

    /// Classify a raw interleaved pixel buffer (1, 3 or 4 channels).
    pub async fn analyze_buffer(
        &self,
        bytes: &[u8],
        width: u32,
        height: u32,
        channels: u8,
    ) -> Result<ClassificationResult, EngineError> {
        let image = tonescale_core::buffer_to_rgb(bytes, width, height, channels)?;
        self.analyze_image(image).await
    }

    /// Decode an encoded image on a worker, then classify it.
    pub async fn analyze_encoded(&self, bytes: Vec<u8>) -> Result<ClassificationResult, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.dispatch(EngineRequest::Decode {
            bytes,
            reply: reply_tx,
        })
        .await?;
        let image = reply_rx.await.map_err(|_| EngineError::ChannelClosed)??;
        self.analyze_image(image).await
    }

    /// Number of worker threads.
    pub fn workers(&self) -> usize {
        self.workers.len()
    }

    pub fn cache(&self) -> Option<&ResultCache> {
        self.cache.as_deref()
    }

    async fn run_analysis(&self, image: Arc<RgbImage>) -> Result<ClassificationResult, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.dispatch(EngineRequest::Analyze {
            image,
            reply: reply_tx,
        })
        .await?;
        Ok(reply_rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }

    async fn dispatch(&self, request: EngineRequest) -> Result<(), EngineError> {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        self.workers[index]
            .send(request)
            .await
            .map_err(|_| EngineError::ChannelClosed)
    }
}

/// Spawn `config.workers` dedicated OS threads sharing one analyzer.
///
/// Analysis (face detection in particular) is CPU-bound and must not run on
/// the async runtime. Requests are dealt out round-robin.
pub fn spawn_engine(
    analyzer: Arc<SkinToneAnalyzer>,
    config: &EngineConfig,
) -> Result<EngineHandle, EngineError> {
    let count = config.workers.max(1);
    let mut workers = Vec::with_capacity(count);

    for id in 0..count {
        let (tx, mut rx) = mpsc::channel::<EngineRequest>(config.queue_depth.max(1));
        let analyzer = Arc::clone(&analyzer);
        std::thread::Builder::new()
            .name(format!("tonescale-worker-{id}"))
            .spawn(move || {
                tracing::debug!(worker = id, "worker thread started");
                while let Some(req) = rx.blocking_recv() {
                    match req {
                        EngineRequest::Analyze { image, reply } => {
                            let result = analyzer.analyze_image(&image);
                            if let Err(e) = &result {
                                tracing::warn!(worker = id, error = %e, "analysis rejected input");
                            }
                            let _ = reply.send(result);
                        }
                        EngineRequest::Decode { bytes, reply } => {
                            let _ = reply.send(tonescale_core::decode_rgb(&bytes));
                        }
                    }
                }
                tracing::debug!(worker = id, "worker thread exiting");
            })
            .map_err(EngineError::Spawn)?;
        workers.push(tx);
    }

    let cache = (config.cache_capacity > 0)
        .then(|| Arc::new(ResultCache::new(config.cache_ttl, config.cache_capacity)));

    tracing::info!(
        workers = count,
        detector = analyzer.detector_name(),
        cache_capacity = config.cache_capacity,
        cache_ttl_secs = config.cache_ttl.as_secs(),
        "engine started"
    );

    Ok(EngineHandle {
        workers: workers.into(),
        next: Arc::new(AtomicUsize::new(0)),
        cache,
    })
}
