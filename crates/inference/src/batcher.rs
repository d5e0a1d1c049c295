//! Dynamic request batching scheduler.
//!
//! Ported from `original_source/src/inference/api/batcher.py`'s
//! `_batch_collector`: a FIFO queue feeds a fixed pool of collector tasks,
//! each forming a batch up to `max_batch_size` or until `batch_timeout`
//! elapses, then handing the batch to a single-worker model executor so
//! exactly one forward pass runs at a time.
//!
//! The request-handling plane here is the async runtime (collectors poll
//! the queue and await completion slots); the model itself runs on a
//! dedicated OS thread, because a `spawn_blocking` pool offers no
//! exclusivity guarantee and the batcher needs exactly one concurrent
//! forward pass to protect a single GPU/CPU-bound model instance.

use crate::error::InferenceError;
use crate::model::{EmbeddingModel, ModelError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, Mutex, Notify};

/// Interface shared by the dynamic and singleton batchers so the HTTP
/// server wires up either one identically.
#[async_trait]
pub trait Batcher: Send + Sync {
    async fn predict(&self, text: String) -> Result<Vec<f32>, InferenceError>;
    fn queue_size(&self) -> usize;
    fn inflight_batches(&self) -> usize;
    async fn shutdown(&self);
}

#[derive(Debug, Clone, Copy)]
pub struct BatcherConfig {
    pub max_batch_size: usize,
    pub batch_timeout: Duration,
    pub num_workers: usize,
}

struct PendingRequest {
    text: String,
    reply: oneshot::Sender<Result<Vec<f32>, InferenceError>>,
    enqueued_at: Instant,
}

enum QueueItem {
    Request(PendingRequest),
    Sentinel,
}

struct ExecutorJob {
    inputs: Vec<String>,
    reply: oneshot::Sender<Result<Vec<Vec<f32>>, ModelError>>,
}

#[derive(Default)]
struct Shared {
    queue_size: AtomicUsize,
    inflight_batches: AtomicUsize,
    started: AtomicBool,
    shutting_down: AtomicBool,
}

/// Worker pool + single-slot executor implementing the batching scheduler
/// described in the spec's "Dynamic batching scheduler" section.
pub struct DynamicBatcher {
    shared: Arc<Shared>,
    queue_tx: mpsc::UnboundedSender<QueueItem>,
    executor_tx: std::sync::mpsc::Sender<ExecutorJob>,
    num_workers: usize,
    worker_handles: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    executor_handle: Mutex<Option<std::thread::JoinHandle<()>>>,
    ticker_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
    shutdown_started: Mutex<bool>,
    shutdown_done: Notify,
}

impl DynamicBatcher {
    /// Builds the batcher and immediately spawns its collector tasks and
    /// executor thread. Mirrors the original's `start()` being called
    /// right after construction in `server.py`'s lifespan handler.
    pub fn start(model: Arc<dyn EmbeddingModel>, config: BatcherConfig) -> Arc<Self> {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel::<QueueItem>();
        let queue_rx = Arc::new(Mutex::new(queue_rx));
        let (executor_tx, executor_rx) = std::sync::mpsc::channel::<ExecutorJob>();

        let shared = Arc::new(Shared::default());
        shared.started.store(true, Ordering::SeqCst);

        let executor_handle = {
            let shared = shared.clone();
            std::thread::Builder::new()
                .name("embedding-model-executor".to_string())
                .spawn(move || run_executor(model, executor_rx, shared))
                .expect("failed to spawn model executor thread")
        };

        let this = Arc::new(Self {
            shared: shared.clone(),
            queue_tx,
            executor_tx,
            num_workers: config.num_workers,
            worker_handles: Mutex::new(Vec::with_capacity(config.num_workers)),
            executor_handle: Mutex::new(Some(executor_handle)),
            ticker_handle: Mutex::new(None),
            shutdown_started: Mutex::new(false),
            shutdown_done: Notify::new(),
        });

        let mut handles = Vec::with_capacity(config.num_workers);
        for id in 0..config.num_workers {
            let queue_rx = queue_rx.clone();
            let executor_tx = this.executor_tx.clone();
            let shared = shared.clone();
            handles.push(tokio::spawn(run_collector(
                id, queue_rx, executor_tx, shared, config,
            )));
        }
        // Can't hold the async mutex here (constructor is sync); stash via
        // try_lock, which always succeeds since no other task has a handle yet.
        *this
            .worker_handles
            .try_lock()
            .expect("no contention during construction") = handles;

        let ticker = {
            let shared = shared.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(1));
                loop {
                    interval.tick().await;
                    metrics::gauge!("batcher_queue_size")
                        .set(shared.queue_size.load(Ordering::Relaxed) as f64);
                    metrics::gauge!("batcher_inflight_batches")
                        .set(shared.inflight_batches.load(Ordering::Relaxed) as f64);
                }
            })
        };
        *this
            .ticker_handle
            .try_lock()
            .expect("no contention during construction") = Some(ticker);

        this
    }

    fn fail_fast(&self) -> Result<(), InferenceError> {
        if self.shared.shutting_down.load(Ordering::SeqCst) {
            return Err(InferenceError::BatcherShuttingDown);
        }
        if !self.shared.started.load(Ordering::SeqCst) {
            return Err(InferenceError::BatcherNotStarted);
        }
        Ok(())
    }
}

#[async_trait]
impl Batcher for DynamicBatcher {
    async fn predict(&self, text: String) -> Result<Vec<f32>, InferenceError> {
        self.fail_fast()?;

        let (reply_tx, reply_rx) = oneshot::channel();
        let request = PendingRequest {
            text,
            reply: reply_tx,
            enqueued_at: Instant::now(),
        };

        self.shared.queue_size.fetch_add(1, Ordering::Relaxed);
        if self.queue_tx.send(QueueItem::Request(request)).is_err() {
            self.shared.queue_size.fetch_sub(1, Ordering::Relaxed);
            return Err(InferenceError::BatcherShuttingDown);
        }

        reply_rx
            .await
            .unwrap_or(Err(InferenceError::BatcherShuttingDown))
    }

    fn queue_size(&self) -> usize {
        self.shared.queue_size.load(Ordering::Relaxed)
    }

    fn inflight_batches(&self) -> usize {
        self.shared.inflight_batches.load(Ordering::Relaxed)
    }

    /// Idempotent. Enqueues N sentinels, waits for every collector to
    /// drain its in-flight batch and exit, then joins the executor thread.
    async fn shutdown(&self) {
        {
            let mut started = self.shutdown_started.lock().await;
            if *started {
                drop(started);
                self.shutdown_done.notified().await;
                return;
            }
            *started = true;
        }

        self.shared.shutting_down.store(true, Ordering::SeqCst);

        for _ in 0..self.num_workers {
            let _ = self.queue_tx.send(QueueItem::Sentinel);
        }

        let handles = std::mem::take(&mut *self.worker_handles.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!("batcher: collector task panicked: {}", e);
            }
        }

        if let Some(ticker) = self.ticker_handle.lock().await.take() {
            ticker.abort();
        }

        // Dropping the sender closes the executor's channel; its recv
        // loop returns and the thread exits on its own.
        let executor = self.executor_handle.lock().await.take();
        if let Some(handle) = executor {
            let join = tokio::task::spawn_blocking(move || handle.join());
            if let Err(e) = join.await {
                tracing::error!("batcher: executor join task failed: {}", e);
            }
        }

        self.shared.started.store(false, Ordering::SeqCst);
        self.shutdown_done.notify_waiters();
    }
}

/// One collector: blocks for the first request, then accumulates more
/// until `max_batch_size` is hit or `batch_timeout` elapses, matching
/// spec's "Batch formation" steps 1-4.
async fn run_collector(
    _id: usize,
    queue_rx: Arc<Mutex<mpsc::UnboundedReceiver<QueueItem>>>,
    executor_tx: std::sync::mpsc::Sender<ExecutorJob>,
    shared: Arc<Shared>,
    config: BatcherConfig,
) {
    loop {
        let first = { queue_rx.lock().await.recv().await };
        let mut requests = match first {
            None => return,
            Some(QueueItem::Sentinel) => return,
            Some(QueueItem::Request(req)) => {
                shared.queue_size.fetch_sub(1, Ordering::Relaxed);
                vec![req]
            }
        };

        let formation_start = Instant::now();
        let deadline = formation_start + config.batch_timeout;
        let mut sentinel_received = false;

        while requests.len() < config.max_batch_size {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            let next = {
                let mut rx = queue_rx.lock().await;
                tokio::time::timeout(remaining, rx.recv()).await
            };

            match next {
                Ok(Some(QueueItem::Request(req))) => {
                    shared.queue_size.fetch_sub(1, Ordering::Relaxed);
                    requests.push(req);
                }
                Ok(Some(QueueItem::Sentinel)) => {
                    sentinel_received = true;
                    break;
                }
                Ok(None) => break,
                Err(_elapsed) => break,
            }
        }

        dispatch_batch(requests, formation_start, &executor_tx).await;

        if sentinel_received {
            return;
        }
    }
}

/// Hands a formed batch to the executor thread and fans its result (or
/// error) back out to each request's completion slot, in input order.
async fn dispatch_batch(
    requests: Vec<PendingRequest>,
    formation_start: Instant,
    executor_tx: &std::sync::mpsc::Sender<ExecutorJob>,
) {
    let batch_size = requests.len();
    metrics::histogram!("batcher_batch_size").record(batch_size as f64);

    let wait_time = formation_start.elapsed().as_secs_f64();
    metrics::histogram!("batcher_batch_wait_time_seconds").record(wait_time);

    let inputs: Vec<String> = requests.iter().map(|r| r.text.clone()).collect();
    let enqueue_times: Vec<Instant> = requests.iter().map(|r| r.enqueued_at).collect();

    let (reply_tx, reply_rx) = oneshot::channel();
    let job = ExecutorJob {
        inputs,
        reply: reply_tx,
    };

    if executor_tx.send(job).is_err() {
        fail_all(requests, InferenceError::BatcherShuttingDown);
        return;
    }

    let result = reply_rx.await;

    match result {
        Ok(Ok(vectors)) if vectors.len() == batch_size => {
            for ((request, vector), enqueued_at) in
                requests.into_iter().zip(vectors.into_iter()).zip(enqueue_times)
            {
                metrics::counter!("batcher_requests_total", "status" => "success").increment(1);
                metrics::histogram!("batcher_request_latency_seconds")
                    .record(enqueued_at.elapsed().as_secs_f64());
                let _ = request.reply.send(Ok(vector));
            }
        }
        Ok(Ok(vectors)) => {
            tracing::error!(
                "batcher: model returned {} vectors for a batch of {}",
                vectors.len(),
                batch_size
            );
            fail_all(
                requests,
                InferenceError::ModelFailure("model returned wrong number of vectors".to_string()),
            );
        }
        Ok(Err(ModelError(msg))) => {
            fail_all(requests, InferenceError::ModelFailure(msg));
        }
        Err(_canceled) => {
            fail_all(requests, InferenceError::BatcherShuttingDown);
        }
    }
}

fn fail_all(requests: Vec<PendingRequest>, err: InferenceError) {
    for request in requests {
        metrics::counter!("batcher_requests_total", "status" => "error").increment(1);
        metrics::histogram!("batcher_request_latency_seconds")
            .record(request.enqueued_at.elapsed().as_secs_f64());
        let _ = request.reply.send(Err(err.clone()));
    }
}

/// Single-worker model executor. Equivalent to the original's
/// `ThreadPoolExecutor(max_workers=1)`: exactly one batch runs at a time,
/// protecting a single model instance's GPU/CPU memory.
fn run_executor(
    model: Arc<dyn EmbeddingModel>,
    jobs: std::sync::mpsc::Receiver<ExecutorJob>,
    shared: Arc<Shared>,
) {
    while let Ok(job) = jobs.recv() {
        shared.inflight_batches.fetch_add(1, Ordering::Relaxed);
        let start = Instant::now();
        let result = model.predict(&job.inputs);
        metrics::histogram!("batcher_inference_time_seconds").record(start.elapsed().as_secs_f64());
        shared.inflight_batches.fetch_sub(1, Ordering::Relaxed);
        let _ = job.reply.send(result);
    }
}

/// `no_batching` mode: every request becomes its own singleton batch,
/// through the same collector/executor discipline. The Rust port of
/// `original_source/.../batcher.py`'s `NoBatchingWrapper`, provided for
/// benchmarking and degenerate low-load operation.
pub struct SingletonBatcher(Arc<DynamicBatcher>);

impl SingletonBatcher {
    pub fn start(model: Arc<dyn EmbeddingModel>, num_workers: usize) -> Arc<Self> {
        let inner = DynamicBatcher::start(
            model,
            BatcherConfig {
                max_batch_size: 1,
                batch_timeout: Duration::ZERO,
                num_workers,
            },
        );
        Arc::new(Self(inner))
    }
}

#[async_trait]
impl Batcher for SingletonBatcher {
    async fn predict(&self, text: String) -> Result<Vec<f32>, InferenceError> {
        self.0.predict(text).await
    }

    fn queue_size(&self) -> usize {
        self.0.queue_size()
    }

    fn inflight_batches(&self) -> usize {
        self.0.inflight_batches()
    }

    async fn shutdown(&self) {
        self.0.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::HashEmbeddingModel;

    fn fast_model() -> Arc<dyn EmbeddingModel> {
        Arc::new(HashEmbeddingModel::new("test-model"))
    }

    #[tokio::test]
    async fn predict_before_start_is_unreachable_via_trait() {
        // DynamicBatcher::start always starts immediately; this documents
        // that `fail_fast` only trips via shutdown in this implementation.
        let batcher = DynamicBatcher::start(
            fast_model(),
            BatcherConfig {
                max_batch_size: 8,
                batch_timeout: Duration::from_millis(10),
                num_workers: 1,
            },
        );
        let result = batcher.predict("hello".to_string()).await;
        assert!(result.is_ok());
        batcher.shutdown().await;
    }

    #[tokio::test]
    async fn single_request_returns_a_vector() {
        let batcher = DynamicBatcher::start(
            fast_model(),
            BatcherConfig {
                max_batch_size: 8,
                batch_timeout: Duration::from_millis(10),
                num_workers: 1,
            },
        );
        let out = batcher.predict("hello world".to_string()).await.unwrap();
        assert!(!out.is_empty());
        batcher.shutdown().await;
    }

    #[tokio::test]
    async fn concurrent_requests_coalesce_into_one_batch() {
        let batcher = DynamicBatcher::start(
            fast_model(),
            BatcherConfig {
                max_batch_size: 8,
                batch_timeout: Duration::from_millis(50),
                num_workers: 1,
            },
        );

        let mut handles = Vec::new();
        for i in 0..8 {
            let batcher = batcher.clone();
            handles.push(tokio::spawn(async move {
                batcher.predict(format!("text {i}")).await
            }));
        }

        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        batcher.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_and_fails_fast_afterwards() {
        let batcher = DynamicBatcher::start(
            fast_model(),
            BatcherConfig {
                max_batch_size: 8,
                batch_timeout: Duration::from_millis(10),
                num_workers: 2,
            },
        );

        batcher.shutdown().await;
        batcher.shutdown().await; // must not hang or panic

        let result = batcher.predict("late".to_string()).await;
        assert!(matches!(result, Err(InferenceError::BatcherShuttingDown)));
    }

    #[tokio::test]
    async fn partial_batch_dispatches_after_timeout() {
        let batcher = DynamicBatcher::start(
            fast_model(),
            BatcherConfig {
                max_batch_size: 8,
                batch_timeout: Duration::from_millis(20),
                num_workers: 1,
            },
        );

        let mut handles = Vec::new();
        for i in 0..3 {
            let batcher = batcher.clone();
            handles.push(tokio::spawn(async move {
                batcher.predict(format!("text {i}")).await
            }));
        }

        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        batcher.shutdown().await;
    }

    #[tokio::test]
    async fn zero_timeout_forms_singleton_batches() {
        let batcher = SingletonBatcher::start(fast_model(), 1);
        let out = batcher.predict("solo".to_string()).await.unwrap();
        assert!(!out.is_empty());
        batcher.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_drains_pending_batch_before_exit() {
        let batcher = DynamicBatcher::start(
            fast_model(),
            BatcherConfig {
                max_batch_size: 8,
                batch_timeout: Duration::from_secs(5),
                num_workers: 1,
            },
        );

        let batcher_clone = batcher.clone();
        let in_flight = tokio::spawn(async move { batcher_clone.predict("draining".to_string()).await });

        // Give the request a moment to be picked up by the collector
        // before the shutdown sentinel arrives behind it.
        tokio::time::sleep(Duration::from_millis(5)).await;
        batcher.shutdown().await;

        let result = in_flight.await.unwrap();
        assert!(result.is_ok());
    }
}
