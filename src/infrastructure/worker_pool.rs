//! Enrichment worker pool (C7): a fixed-size pool of cooperative
//! workers draining a bounded job queue. Used for the color and
//! metadata work that the feed pipeline submits fire-and-forget so
//! a single request's response doesn't wait on every item's
//! enrichment. Shutdown drains the bounded mpsc channel rather
//! than cancelling workers mid-job.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::domain::color::ColorExtractor;
use crate::domain::metadata::MetadataExtractor;
use crate::domain::models::{PageMetadata, RgbColor};
use crate::infrastructure::cache::{Cache, CacheExt};

const SUBMIT_TIMEOUT: Duration = Duration::from_secs(5);

pub type ColorSink = Arc<Mutex<HashMap<String, RgbColor>>>;
pub type MetadataSink = Arc<Mutex<HashMap<String, PageMetadata>>>;

pub enum Job {
    ColorBatch {
        urls: Vec<String>,
        sink: Option<ColorSink>,
    },
    MetadataBatch {
        urls: Vec<String>,
        sink: Option<MetadataSink>,
    },
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum SubmitError {
    #[error("worker pool is not running")]
    NotRunning,
    #[error("worker pool queue is full")]
    QueueFull,
}

pub struct WorkerPool {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
    worker_count: usize,
    queue_size: usize,
    cache: Arc<dyn Cache>,
    color: Arc<ColorExtractor>,
    metadata: Arc<MetadataExtractor>,
}

impl WorkerPool {
    pub fn new(
        worker_count: usize,
        queue_size: usize,
        cache: Arc<dyn Cache>,
        color: Arc<ColorExtractor>,
        metadata: Arc<MetadataExtractor>,
    ) -> Self {
        Self {
            sender: Mutex::new(None),
            workers: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            worker_count: worker_count.max(1),
            queue_size: queue_size.max(1),
            cache,
            color,
            metadata,
        }
    }

    /// Idempotent: calling `start` twice while already running is a no-op.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let (tx, rx) = mpsc::channel(self.queue_size);
        let rx = Arc::new(Mutex::new(rx));

        let mut workers = Vec::with_capacity(self.worker_count);
        for id in 0..self.worker_count {
            let rx = rx.clone();
            let cache = self.cache.clone();
            let color = self.color.clone();
            let metadata = self.metadata.clone();
            workers.push(tokio::spawn(async move {
                loop {
                    let job = { rx.lock().await.recv().await };
                    let Some(job) = job else {
                        tracing::debug!(worker = id, "worker pool channel closed, exiting");
                        break;
                    };
                    run_job(job, cache.as_ref(), &color, &metadata).await;
                }
            }));
        }

        *self.sender.lock().await = Some(tx);
        *self.workers.lock().await = workers;
    }

    /// Submits `job`, waiting up to 5s for queue space before giving up
    /// with `QueueFull`.
    pub async fn submit(&self, job: Job) -> Result<(), SubmitError> {
        let sender = self.sender.lock().await.clone();
        let Some(sender) = sender else {
            return Err(SubmitError::NotRunning);
        };
        match tokio::time::timeout(SUBMIT_TIMEOUT, sender.send(job)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(SubmitError::NotRunning),
            Err(_) => Err(SubmitError::QueueFull),
        }
    }

    /// Closes the queue and waits for every in-flight job to finish.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.sender.lock().await.take();
        let workers = self.workers.lock().await.drain(..).collect::<Vec<_>>();
        for worker in workers {
            let _ = worker.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

async fn run_job(
    job: Job,
    cache: &dyn Cache,
    color: &ColorExtractor,
    metadata: &MetadataExtractor,
) {
    match job {
        Job::ColorBatch { urls, sink } => {
            for url in urls {
                let result = color.extract(cache, &url).await;
                if let Some(sink) = &sink {
                    sink.lock().await.insert(url, result);
                }
            }
        }
        Job::MetadataBatch { urls, sink } => {
            for url in urls {
                if let Ok(result) = metadata.extract(cache, &url).await {
                    if let Some(sink) = &sink {
                        sink.lock().await.insert(url, result);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::cache::memory::MemoryCache;

    fn test_pool() -> WorkerPool {
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
        let color = Arc::new(ColorExtractor::new(7));
        let metadata = Arc::new(MetadataExtractor::new(Arc::new(
            crate::infrastructure::http_client::FetchClient::new().unwrap(),
        )));
        WorkerPool::new(2, 8, cache, color, metadata)
    }

    #[tokio::test]
    async fn submit_before_start_returns_not_running() {
        let pool = test_pool();
        let result = pool
            .submit(Job::ColorBatch {
                urls: vec!["https://example.com/a.png".into()],
                sink: None,
            })
            .await;
        assert_eq!(result, Err(SubmitError::NotRunning));
    }

    #[tokio::test]
    async fn start_is_idempotent_and_stop_drains_workers() {
        let pool = test_pool();
        pool.start().await;
        pool.start().await;
        assert!(pool.is_running());
        pool.stop().await;
        assert!(!pool.is_running());
    }

    #[tokio::test]
    async fn submit_after_stop_returns_not_running() {
        let pool = test_pool();
        pool.start().await;
        pool.stop().await;
        let result = pool
            .submit(Job::ColorBatch {
                urls: vec![],
                sink: None,
            })
            .await;
        assert_eq!(result, Err(SubmitError::NotRunning));
    }
}
