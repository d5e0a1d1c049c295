use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

#[derive(Debug)]
pub struct ModelError(pub String);

impl std::fmt::Display for ModelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ModelError {}

/// A model that turns a batch of input strings into a batch of embedding
/// vectors. Implementations run on a dedicated blocking thread managed by
/// the batcher, so `predict` is a plain synchronous call.
pub trait EmbeddingModel: Send + Sync {
    fn predict(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ModelError>;
    fn name(&self) -> &str;
    fn device(&self) -> &str;
}

const EMBEDDING_DIM: usize = 32;
const BASE_LATENCY: Duration = Duration::from_millis(50);
const PER_ITEM_LATENCY_MICROS: u64 = 5_000;

/// A dependency-free stand-in embedding model. It hashes whitespace tokens
/// into a fixed-width vector, mean-pools across tokens, and L2-normalizes
/// the result, simulating the latency profile of a real batched model so
/// the scheduler around it behaves the same as it would with a real one.
pub struct HashEmbeddingModel {
    name: String,
    device: String,
}

impl HashEmbeddingModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            device: "cpu".to_string(),
        }
    }

    fn embed_one(text: &str) -> Vec<f32> {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        if tokens.is_empty() {
            return vec![0.0; EMBEDDING_DIM];
        }

        let mut accum = vec![0.0f32; EMBEDDING_DIM];
        for token in &tokens {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let mut seed = hasher.finish();
            for slot in accum.iter_mut() {
                // xorshift64 to spread the hash across the vector's width.
                seed ^= seed << 13;
                seed ^= seed >> 7;
                seed ^= seed << 17;
                let unit = (seed >> 11) as f32 / (1u64 << 53) as f32;
                *slot += unit * 2.0 - 1.0;
            }
        }

        let count = tokens.len() as f32;
        for slot in accum.iter_mut() {
            *slot /= count;
        }

        let norm = accum.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for slot in accum.iter_mut() {
                *slot /= norm;
            }
        }
        accum
    }
}

impl EmbeddingModel for HashEmbeddingModel {
    fn predict(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ModelError> {
        let jitter_micros = (inputs.len() as u64 * 137) % 2_000;
        let simulated = BASE_LATENCY
            + Duration::from_micros(PER_ITEM_LATENCY_MICROS * inputs.len() as u64 * 3 / 10)
            + Duration::from_micros(jitter_micros);
        std::thread::sleep(simulated);

        Ok(inputs.iter().map(|text| Self::embed_one(text)).collect())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn device(&self) -> &str {
        &self.device
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embeddings_are_l2_normalized() {
        let model = HashEmbeddingModel::new("test-model");
        let out = model.predict(&["hello world".to_string()]).unwrap();
        let norm = out[0].iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn identical_inputs_produce_identical_vectors() {
        let model = HashEmbeddingModel::new("test-model");
        let a = model.predict(&["some text".to_string()]).unwrap();
        let b = model.predict(&["some text".to_string()]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn empty_input_yields_zero_vector() {
        let model = HashEmbeddingModel::new("test-model");
        let out = model.predict(&["".to_string()]).unwrap();
        assert!(out[0].iter().all(|&v| v == 0.0));
    }
}
