use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

const BATCH_SIZE_BUCKETS: &[f64] = &[1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 64.0, 128.0];
const REQUEST_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
];
const BATCH_WAIT_BUCKETS: &[f64] = &[0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1];
const INFERENCE_TIME_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5];

/// Thin handle around the global Prometheus recorder, installed once at
/// startup, mirroring the bucket layout the batching scheduler's original
/// implementation used for its own instrumentation.
#[derive(Clone)]
pub struct Metrics {
    handle: PrometheusHandle,
}

impl Metrics {
    pub fn install() -> Self {
        let handle = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Full("batcher_batch_size".to_string()),
                BATCH_SIZE_BUCKETS,
            )
            .expect("valid matcher")
            .set_buckets_for_metric(
                Matcher::Full("batcher_request_latency_seconds".to_string()),
                REQUEST_LATENCY_BUCKETS,
            )
            .expect("valid matcher")
            .set_buckets_for_metric(
                Matcher::Full("batcher_batch_wait_time_seconds".to_string()),
                BATCH_WAIT_BUCKETS,
            )
            .expect("valid matcher")
            .set_buckets_for_metric(
                Matcher::Full("batcher_inference_time_seconds".to_string()),
                INFERENCE_TIME_BUCKETS,
            )
            .expect("valid matcher")
            .install_recorder()
            .expect("failed to install metrics recorder");

        describe_counter!(
            "batcher_requests_total",
            Unit::Count,
            "Total embedding requests processed by the batcher, by status"
        );
        describe_histogram!(
            "batcher_batch_size",
            Unit::Count,
            "Distribution of the number of requests grouped into each batch"
        );
        describe_histogram!(
            "batcher_request_latency_seconds",
            Unit::Seconds,
            "End-to-end latency for a single request, from enqueue to reply"
        );
        describe_histogram!(
            "batcher_batch_wait_time_seconds",
            Unit::Seconds,
            "Time a batch spent accumulating requests before being dispatched"
        );
        describe_histogram!(
            "batcher_inference_time_seconds",
            Unit::Seconds,
            "Time spent running the model over a single batch"
        );
        describe_gauge!(
            "batcher_queue_size",
            Unit::Count,
            "Number of requests currently waiting to be batched"
        );
        describe_gauge!(
            "batcher_inflight_batches",
            Unit::Count,
            "Number of batches currently executing on the model"
        );
        describe_counter!(
            "inference_http_requests_total",
            Unit::Count,
            "Total HTTP requests processed by the inference service"
        );
        describe_histogram!(
            "inference_http_request_duration_seconds",
            Unit::Seconds,
            "Total request duration from the inference HTTP layer"
        );

        Self { handle }
    }

    pub fn render(&self) -> String {
        self.handle.render()
    }
}
