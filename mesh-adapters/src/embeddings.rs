//! Embedding vectors and the adapters that produce them.

use std::sync::Arc;
use std::time::Duration;
use std::{env, fmt};

use async_trait::async_trait;
use hyper::Uri;
use serde::{Deserialize, Serialize};

use crate::http_client::{HyperClient, build_https_client, post_json, sanitize_base_url};
use crate::openai::{OPENAI_API_KEY_ENV, OPENAI_DEFAULT_BASE_URL};
use crate::traits::{AdapterError, AdapterMetadata, AdapterResult};

/// Immutable floating-point embedding.
#[derive(Clone, PartialEq)]
pub struct EmbeddingVector {
    values: Arc<[f32]>,
}

impl EmbeddingVector {
    /// Creates a new embedding from owned values.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::InvalidRequest`] when the supplied vector is
    /// empty or contains non-finite values.
    pub fn new(values: Vec<f32>) -> AdapterResult<Self> {
        if values.is_empty() {
            return Err(AdapterError::invalid_request(
                "embedding vector must not be empty",
            ));
        }
        if !values.iter().all(|value| value.is_finite()) {
            return Err(AdapterError::invalid_request(
                "embedding vector contains non-finite values",
            ));
        }
        Ok(Self {
            values: Arc::<[f32]>::from(values.into_boxed_slice()),
        })
    }

    /// Returns an immutable view of the embedding data.
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    /// Returns the dimensionality of the embedding.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Always `false`; construction rejects empty inputs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Cosine similarity in `[-1, 1]`; zero when either side has no magnitude
    /// or the dimensions differ.
    #[must_use]
    pub fn cosine(&self, other: &Self) -> f32 {
        if self.len() != other.len() {
            return 0.0;
        }
        let denom = self.magnitude() * other.magnitude();
        if denom == 0.0 {
            return 0.0;
        }
        (self.dot(other) / denom).clamp(-1.0, 1.0)
    }

    fn dot(&self, other: &Self) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| a * b)
            .sum()
    }

    fn magnitude(&self) -> f32 {
        self.values
            .iter()
            .map(|value| value * value)
            .sum::<f32>()
            .sqrt()
    }
}

impl fmt::Debug for EmbeddingVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddingVector")
            .field("dimensions", &self.len())
            .finish()
    }
}

/// Trait implemented by embedding providers.
#[async_trait]
pub trait EmbeddingAdapter: Send + Sync {
    /// Returns metadata describing the provider.
    fn metadata(&self) -> &AdapterMetadata;

    /// Embeds every input, returning vectors in input order.
    async fn embed(&self, inputs: &[String]) -> AdapterResult<Vec<EmbeddingVector>>;
}

/// Offline embedder using signed feature hashing of words and character trigrams.
///
/// Deterministic and dependency free; good enough to rank short capability
/// labels against a message without a model server.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    metadata: AdapterMetadata,
    dimensions: usize,
}

impl HashingEmbedder {
    /// Default vector width.
    pub const DEFAULT_DIMENSIONS: usize = 512;

    /// Creates an embedder producing vectors of the given width.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Configuration`] when `dimensions` is zero.
    pub fn new(dimensions: usize) -> AdapterResult<Self> {
        if dimensions == 0 {
            return Err(AdapterError::configuration(
                "hashing embedder requires at least one dimension",
            ));
        }
        Ok(Self {
            metadata: AdapterMetadata::new("local", format!("hashing-{dimensions}")),
            dimensions,
        })
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut values = vec![0.0_f32; self.dimensions];
        let lowered = text.to_lowercase();

        for word in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|word| !word.is_empty())
        {
            self.accumulate(&mut values, word.as_bytes(), 1.0);

            let padded: Vec<char> = format!(" {word} ").chars().collect();
            for window in padded.windows(3) {
                let gram: String = window.iter().collect();
                self.accumulate(&mut values, gram.as_bytes(), 0.5);
            }
        }

        values
    }

    #[allow(clippy::cast_possible_truncation)]
    fn accumulate(&self, values: &mut [f32], feature: &[u8], weight: f32) {
        let hash = fnv1a(feature);
        let index = (hash % self.dimensions as u64) as usize;
        let sign = if (hash >> 63) == 0 { 1.0 } else { -1.0 };
        values[index] += sign * weight;
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self {
            metadata: AdapterMetadata::new(
                "local",
                format!("hashing-{}", Self::DEFAULT_DIMENSIONS),
            ),
            dimensions: Self::DEFAULT_DIMENSIONS,
        }
    }
}

#[async_trait]
impl EmbeddingAdapter for HashingEmbedder {
    fn metadata(&self) -> &AdapterMetadata {
        &self.metadata
    }

    async fn embed(&self, inputs: &[String]) -> AdapterResult<Vec<EmbeddingVector>> {
        let mut vectors = Vec::with_capacity(inputs.len());
        for input in inputs {
            let mut values = self.embed_one(input);
            // Keep the vector non-degenerate for inputs with no tokens.
            if values.iter().all(|value| *value == 0.0) {
                values[0] = f32::EPSILON;
            }
            vectors.push(EmbeddingVector::new(values)?);
        }
        Ok(vectors)
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes.iter().fold(OFFSET, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(PRIME)
    })
}

/// Configuration for [`OpenAiEmbeddings`].
#[derive(Clone, Debug)]
pub struct OpenAiEmbeddingsConfig {
    api_key: Option<String>,
    model: String,
    base_url: String,
    timeout: Duration,
}

impl OpenAiEmbeddingsConfig {
    /// Creates a configuration for the given embedding model, reading the key
    /// from `OPENAI_API_KEY` when present.
    #[must_use]
    pub fn from_env(model: impl Into<String>) -> Self {
        Self {
            api_key: env::var(OPENAI_API_KEY_ENV).ok(),
            model: model.into(),
            base_url: OPENAI_DEFAULT_BASE_URL.to_owned(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Overrides the base URL.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Configuration`] if the supplied URL is invalid.
    pub fn with_base_url(mut self, base_url: impl AsRef<str>) -> AdapterResult<Self> {
        self.base_url = sanitize_base_url(base_url.as_ref(), "OpenAI embeddings")?;
        Ok(self)
    }

    /// Supplies an explicit API key.
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets the HTTP request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Remote embedder calling an `OpenAI`-compatible `v1/embeddings` endpoint.
pub struct OpenAiEmbeddings {
    client: HyperClient,
    endpoint: Uri,
    metadata: AdapterMetadata,
    api_key: Option<String>,
    timeout: Duration,
}

impl fmt::Debug for OpenAiEmbeddings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiEmbeddings")
            .field("model", &self.metadata.model())
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl OpenAiEmbeddings {
    /// Constructs the embedder.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Configuration`] when the endpoint is invalid.
    pub fn new(config: OpenAiEmbeddingsConfig) -> AdapterResult<Self> {
        let endpoint = format!("{}v1/embeddings", config.base_url)
            .parse::<Uri>()
            .map_err(|err| {
                AdapterError::configuration(format!("invalid embeddings endpoint: {err}"))
            })?;

        Ok(Self {
            client: build_https_client()?,
            endpoint,
            metadata: AdapterMetadata::new("openai", config.model),
            api_key: config.api_key,
            timeout: config.timeout,
        })
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    #[serde(default)]
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingAdapter for OpenAiEmbeddings {
    fn metadata(&self) -> &AdapterMetadata {
        &self.metadata
    }

    async fn embed(&self, inputs: &[String]) -> AdapterResult<Vec<EmbeddingVector>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let body = serde_json::to_vec(&EmbeddingsRequest {
            model: self.metadata.model(),
            input: inputs,
        })
        .map_err(|err| {
            AdapterError::invalid_request(format!("failed to encode embeddings request: {err}"))
        })?;

        let raw = post_json(
            &self.client,
            &self.endpoint,
            self.api_key.as_deref(),
            body,
            self.timeout,
            "OpenAI embeddings",
        )
        .await?;

        if !raw.status.is_success() {
            return Err(AdapterError::response(format!(
                "embeddings endpoint returned {}",
                raw.status
            )));
        }

        let response: EmbeddingsResponse = serde_json::from_slice(&raw.body).map_err(|err| {
            AdapterError::response(format!("failed to decode embeddings response: {err}"))
        })?;

        order_embeddings(response, inputs.len())
    }
}

fn order_embeddings(
    mut response: EmbeddingsResponse,
    expected: usize,
) -> AdapterResult<Vec<EmbeddingVector>> {
    if response.data.len() != expected {
        return Err(AdapterError::response(format!(
            "expected {expected} embeddings, received {}",
            response.data.len()
        )));
    }
    response.data.sort_by_key(|datum| datum.index);
    response
        .data
        .into_iter()
        .map(|datum| EmbeddingVector::new(datum.embedding))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_vectors() {
        let err = EmbeddingVector::new(vec![]).expect_err("empty vector should error");
        assert!(matches!(err, AdapterError::InvalidRequest { .. }));
    }

    #[test]
    fn rejects_non_finite_values() {
        let err = EmbeddingVector::new(vec![1.0, f32::NAN]).expect_err("nan not allowed");
        assert!(matches!(err, AdapterError::InvalidRequest { .. }));
    }

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = EmbeddingVector::new(vec![0.3, 0.4]).unwrap();
        assert!((v.cosine(&v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_of_mismatched_dimensions_is_zero() {
        let a = EmbeddingVector::new(vec![1.0]).unwrap();
        let b = EmbeddingVector::new(vec![1.0, 0.0]).unwrap();
        assert_eq!(a.cosine(&b), 0.0);
    }

    #[tokio::test]
    async fn hashing_embedder_prefers_shared_vocabulary() {
        let embedder = HashingEmbedder::default();
        let inputs = vec![
            "please search the web for rust news".to_owned(),
            "web search".to_owned(),
            "arithmetic".to_owned(),
        ];
        let vectors = embedder.embed(&inputs).await.unwrap();

        let related = vectors[0].cosine(&vectors[1]);
        let unrelated = vectors[0].cosine(&vectors[2]);
        assert!(related > unrelated);
    }

    #[tokio::test]
    async fn hashing_embedder_handles_blank_input() {
        let embedder = HashingEmbedder::new(16).unwrap();
        let vectors = embedder.embed(&["   ".to_owned()]).await.unwrap();
        assert_eq!(vectors[0].len(), 16);
    }

    #[test]
    fn embeddings_are_reordered_by_index() {
        let json = r#"{"data": [
            {"index": 1, "embedding": [0.0, 1.0]},
            {"index": 0, "embedding": [1.0, 0.0]}
        ]}"#;
        let parsed: EmbeddingsResponse = serde_json::from_str(json).unwrap();
        let ordered = order_embeddings(parsed, 2).unwrap();
        assert_eq!(ordered[0].as_slice(), &[1.0, 0.0]);
    }

    #[test]
    fn embedding_count_mismatch_errors() {
        let parsed: EmbeddingsResponse = serde_json::from_str(r#"{"data": []}"#).unwrap();
        let err = order_embeddings(parsed, 1).expect_err("count mismatch");
        assert!(matches!(err, AdapterError::Response { .. }));
    }
}
