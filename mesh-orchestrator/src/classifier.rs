//! Process-wide zero-shot label classifier backed by embeddings.

use std::fmt;
use std::sync::Arc;

use mesh_adapters::embeddings::EmbeddingAdapter;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::error::{OrchestratorError, OrchestratorResult};

/// Default softmax temperature applied to cosine similarities.
pub const DEFAULT_TEMPERATURE: f32 = 0.1;

/// Facts learned while warming the classifier up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifierInfo {
    dimensions: usize,
}

impl ClassifierInfo {
    /// Returns the embedding dimensionality reported by the backend.
    #[must_use]
    pub const fn dimensions(self) -> usize {
        self.dimensions
    }
}

/// Embedding classifier shared by every request.
///
/// The message and all candidate labels are embedded in one batch; cosine
/// similarities are turned into a distribution over the labels with a
/// temperature-scaled softmax. Initialisation happens once, either eagerly via
/// [`SharedClassifier::warm_up`] or on first use. A failed initialisation is
/// not cached.
pub struct SharedClassifier {
    embedder: Arc<dyn EmbeddingAdapter>,
    temperature: f32,
    ready: OnceCell<ClassifierInfo>,
}

impl fmt::Debug for SharedClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedClassifier")
            .field("model", &self.embedder.metadata().model())
            .field("temperature", &self.temperature)
            .field("ready", &self.ready.get())
            .finish()
    }
}

impl SharedClassifier {
    /// Creates a classifier with the default temperature.
    #[must_use]
    pub fn new(embedder: Arc<dyn EmbeddingAdapter>) -> Self {
        Self {
            embedder,
            temperature: DEFAULT_TEMPERATURE,
            ready: OnceCell::new(),
        }
    }

    /// Overrides the softmax temperature.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::InvalidConfig`] unless the temperature is a
    /// positive finite number.
    pub fn with_temperature(mut self, temperature: f32) -> OrchestratorResult<Self> {
        if !temperature.is_finite() || temperature <= 0.0 {
            return Err(OrchestratorError::InvalidConfig(
                "classifier temperature must be positive",
            ));
        }
        self.temperature = temperature;
        Ok(self)
    }

    /// Returns `true` once initialisation has succeeded.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.initialized()
    }

    /// Initialises the backend if that has not happened yet.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Matching`] when the embedding backend is
    /// unreachable; a later call tries again.
    pub async fn warm_up(&self) -> OrchestratorResult<ClassifierInfo> {
        self.ready
            .get_or_try_init(|| async {
                let probe = self
                    .embedder
                    .embed(&["warm up".to_owned()])
                    .await
                    .map_err(|err| OrchestratorError::matching(err.to_string()))?;
                let dimensions = probe.first().map_or(0, |vector| vector.len());
                info!(
                    model = self.embedder.metadata().model(),
                    dimensions, "classifier initialised"
                );
                Ok(ClassifierInfo { dimensions })
            })
            .await
            .copied()
    }

    /// Scores `text` against every label; scores sum to one.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Matching`] on backend failure or when the
    /// backend returns the wrong number of vectors.
    pub async fn classify(&self, text: &str, labels: &[String]) -> OrchestratorResult<Vec<f32>> {
        self.warm_up().await?;
        if labels.is_empty() {
            return Ok(Vec::new());
        }

        let mut inputs = Vec::with_capacity(labels.len() + 1);
        inputs.push(text.to_owned());
        inputs.extend(labels.iter().cloned());

        let vectors = self
            .embedder
            .embed(&inputs)
            .await
            .map_err(|err| OrchestratorError::matching(err.to_string()))?;
        if vectors.len() != inputs.len() {
            return Err(OrchestratorError::matching(format!(
                "expected {} embeddings, got {}",
                inputs.len(),
                vectors.len()
            )));
        }

        let query = &vectors[0];
        let similarities: Vec<f32> = vectors[1..]
            .iter()
            .map(|label| query.cosine(label))
            .collect();
        debug!(labels = labels.len(), "classified message against labels");
        Ok(softmax(&similarities, self.temperature))
    }
}

/// Numerically stable softmax of `values / temperature`.
#[must_use]
pub fn softmax(values: &[f32], temperature: f32) -> Vec<f32> {
    if values.is_empty() {
        return Vec::new();
    }
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = values
        .iter()
        .map(|value| ((value - max) / temperature).exp())
        .collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|value| value / sum).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use mesh_adapters::embeddings::{EmbeddingVector, HashingEmbedder};
    use mesh_adapters::traits::{AdapterError, AdapterMetadata, AdapterResult};

    struct FlakyEmbedder {
        metadata: AdapterMetadata,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingAdapter for FlakyEmbedder {
        fn metadata(&self) -> &AdapterMetadata {
            &self.metadata
        }

        async fn embed(&self, inputs: &[String]) -> AdapterResult<Vec<EmbeddingVector>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(AdapterError::transport("model loading"));
            }
            inputs
                .iter()
                .map(|_| EmbeddingVector::new(vec![1.0, 0.0]))
                .collect()
        }
    }

    #[test]
    fn softmax_sums_to_one_and_preserves_order() {
        let scores = softmax(&[0.9, 0.1, -0.2], 0.1);
        let sum: f32 = scores.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(scores[0] > scores[1] && scores[1] > scores[2]);
    }

    #[test]
    fn rejects_non_positive_temperature() {
        let classifier = SharedClassifier::new(Arc::new(HashingEmbedder::default()));
        assert!(classifier.with_temperature(0.0).is_err());
    }

    #[tokio::test]
    async fn ranks_related_label_first() {
        let classifier = SharedClassifier::new(Arc::new(HashingEmbedder::default()));
        let labels = vec![
            "weather forecast".to_owned(),
            "arithmetic".to_owned(),
            "Search: searches the web".to_owned(),
        ];
        let scores = classifier
            .classify("what is the weather forecast for tomorrow", &labels)
            .await
            .unwrap();

        assert_eq!(scores.len(), 3);
        assert!(scores[0] > scores[1]);
        assert!(scores[0] > scores[2]);
        assert!(classifier.is_ready());
    }

    #[tokio::test]
    async fn failed_initialisation_is_retried() {
        let classifier = SharedClassifier::new(Arc::new(FlakyEmbedder {
            metadata: AdapterMetadata::new("test", "flaky"),
            calls: AtomicUsize::new(0),
        }));

        let err = classifier.warm_up().await.expect_err("first load fails");
        assert!(matches!(err, OrchestratorError::Matching { .. }));
        assert!(!classifier.is_ready());

        let info = classifier.warm_up().await.unwrap();
        assert_eq!(info.dimensions(), 2);
        assert!(classifier.is_ready());
    }
}
