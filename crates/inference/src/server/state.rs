use crate::batcher::Batcher;
use crate::config::InferenceConfig;
use crate::metrics::Metrics;
use crate::model::EmbeddingModel;
use std::sync::Arc;

/// Shared inference-service state, cheaply cloneable — one instance per
/// process, handed to every connection's `service_fn` closure.
#[derive(Clone)]
pub struct InferenceState {
    pub config: Arc<InferenceConfig>,
    pub metrics: Metrics,
    pub model: Arc<dyn EmbeddingModel>,
    pub batcher: Arc<dyn Batcher>,
}

impl InferenceState {
    pub fn new(config: InferenceConfig, model: Arc<dyn EmbeddingModel>, batcher: Arc<dyn Batcher>) -> Self {
        let metrics = Metrics::install();
        Self {
            config: Arc::new(config),
            metrics,
            model,
            batcher,
        }
    }
}
