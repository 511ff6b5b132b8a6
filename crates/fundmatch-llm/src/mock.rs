//! Deterministic mock clients for tests
//!
//! The embedder derives vectors from word hashes, so the same text always
//! produces the same normalized vector and related texts land near each
//! other often enough for retrieval tests. The generator replays canned
//! responses.

use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{Embedder, GenerateOptions, LlmError, TaskHint, TextGenerator};

/// Hash-seeded embedding client.
#[derive(Debug, Clone)]
pub struct MockEmbedder {
    dim: usize,
}

impl MockEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dim];

        for (i, word) in text.split_whitespace().enumerate() {
            let mut hasher = DefaultHasher::new();
            word.hash(&mut hasher);
            i.hash(&mut hasher);
            let hash = hasher.finish();

            for (j, slot) in embedding.iter_mut().enumerate() {
                let byte_idx = (hash as usize + j) % 8;
                let value = ((hash >> (byte_idx * 8)) & 0xFF) as f32 / 255.0;
                *slot += value;
            }
        }

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut embedding {
                *v /= norm;
            }
        }

        embedding
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str, _hint: TaskHint) -> Result<Vec<f32>, LlmError> {
        Ok(self.vector_for(text))
    }

    async fn embed_batch(
        &self,
        texts: &[String],
        _hint: TaskHint,
    ) -> Result<Vec<Vec<f32>>, LlmError> {
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dim
    }
}

/// Replays canned responses, or fails every call.
pub struct MockGenerator {
    responses: Mutex<VecDeque<String>>,
    fail: bool,
}

impl MockGenerator {
    /// Always returns `response`.
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::from([response.into()])),
            fail: false,
        }
    }

    /// Returns the given responses in order, repeating the last one.
    pub fn with_responses(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            fail: false,
        }
    }

    /// Errors on every call.
    pub fn failing() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            fail: true,
        }
    }
}

#[async_trait]
impl TextGenerator for MockGenerator {
    async fn generate(&self, _prompt: &str, _opts: &GenerateOptions) -> Result<String, LlmError> {
        if self.fail {
            return Err(LlmError::Api {
                status: 500,
                message: "mock failure".to_string(),
            });
        }

        let mut responses = self.responses.lock().expect("mock lock poisoned");
        match responses.len() {
            0 => Err(LlmError::EmptyResponse),
            1 => Ok(responses[0].clone()),
            _ => Ok(responses.pop_front().expect("non-empty checked above")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_embedder_deterministic() {
        let embedder = MockEmbedder::new(64);
        let a = embedder.embed("machine learning", TaskHint::RetrievalDocument).await.unwrap();
        let b = embedder.embed("machine learning", TaskHint::RetrievalDocument).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn test_mock_embedder_normalized() {
        let embedder = MockEmbedder::new(64);
        let v = embedder.embed("quantum sensing", TaskHint::RetrievalQuery).await.unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_mock_generator_sequence() {
        let generator = MockGenerator::with_responses(vec!["one".into(), "two".into()]);
        let opts = GenerateOptions::default();
        assert_eq!(generator.generate("p", &opts).await.unwrap(), "one");
        assert_eq!(generator.generate("p", &opts).await.unwrap(), "two");
        // Last response repeats
        assert_eq!(generator.generate("p", &opts).await.unwrap(), "two");
    }
}
