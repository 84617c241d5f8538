use std::{sync::Arc, time::Duration};

use async_openai::{config::OpenAIConfig, types::CreateEmbeddingRequestArgs, Client};
#[cfg(any(test, feature = "test-utils"))]
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    RetryIf,
};
use tracing::debug;

use crate::{error::AppError, utils::config::AppConfig};

/// Base delay for the provider retry schedule.
const RETRY_BASE_MS: u64 = 500;

enum EmbeddingBackend {
    OpenAi(Client<OpenAIConfig>),
    /// Stable hash-derived vectors so pipelines can run without a provider.
    /// Texts sharing words get similar vectors, which is all the resolution
    /// and retrieval tests need.
    #[cfg(any(test, feature = "test-utils"))]
    Deterministic,
}

/// Dense-vector provider shared by ingest, the worker and recall. All calls
/// pass through a process-wide semaphore so concurrent pipelines respect the
/// provider's rate limits, and through a bounded retry schedule.
pub struct EmbeddingProvider {
    backend: EmbeddingBackend,
    model: String,
    dimensions: u32,
    batch_size: usize,
    max_retries: usize,
    timeout: Duration,
    limiter: Arc<Semaphore>,
}

impl EmbeddingProvider {
    pub fn from_config(config: &AppConfig) -> Self {
        let client = Client::with_config(
            OpenAIConfig::new()
                .with_api_key(&config.openai_api_key)
                .with_api_base(&config.openai_base_url),
        );

        Self {
            backend: EmbeddingBackend::OpenAi(client),
            model: config.embedding_model.clone(),
            dimensions: config.embedding_dimensions,
            batch_size: config.embedding_batch_size.min(2048),
            max_retries: config.embedding_max_retries,
            timeout: Duration::from_secs(config.embedding_timeout_s),
            limiter: Arc::new(Semaphore::new(config.embedding_max_concurrency)),
        }
    }

    #[cfg(any(test, feature = "test-utils"))]
    pub fn deterministic(dimensions: u32) -> Self {
        Self {
            backend: EmbeddingBackend::Deterministic,
            model: "deterministic".to_string(),
            dimensions,
            batch_size: 64,
            max_retries: 0,
            timeout: Duration::from_secs(1),
            limiter: Arc::new(Semaphore::new(4)),
        }
    }

    pub fn dimensions(&self) -> u32 {
        self.dimensions
    }

    pub async fn embed(&self, input: &str) -> Result<Vec<f32>, AppError> {
        let embeddings = self.embed_batch(&[input.to_owned()]).await?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Embedding("no embedding data received".into()))
    }

    /// Embed many texts, preserving order. Splits into provider-sized
    /// batches; each batch is retried on transient failure.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        for (index, text) in texts.iter().enumerate() {
            if text.trim().is_empty() {
                return Err(AppError::Validation(format!(
                    "text at index {index} is empty"
                )));
            }
        }

        let mut all = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let embeddings = self.embed_batch_once(batch).await?;
            all.extend(embeddings);
        }

        Ok(all)
    }

    /// Connectivity probe for `status()`.
    pub async fn ping(&self) -> Result<(), AppError> {
        self.embed("ping").await.map(|_| ())
    }

    async fn embed_batch_once(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        match &self.backend {
            #[cfg(any(test, feature = "test-utils"))]
            EmbeddingBackend::Deterministic => Ok(batch
                .iter()
                .map(|text| deterministic_embedding(text, self.dimensions as usize))
                .collect()),
            EmbeddingBackend::OpenAi(client) => {
                let _permit = self
                    .limiter
                    .acquire()
                    .await
                    .map_err(|_| AppError::InternalError("embedding limiter closed".into()))?;

                let strategy = ExponentialBackoff::from_millis(RETRY_BASE_MS)
                    .map(jitter)
                    .take(self.max_retries);

                let embeddings = RetryIf::spawn(
                    strategy,
                    || self.call_provider(client, batch),
                    AppError::retryable,
                )
                .await?;

                debug!(
                    batch = batch.len(),
                    model = %self.model,
                    dimensions = self.dimensions,
                    "generated embeddings"
                );

                Ok(embeddings)
            }
        }
    }

    async fn call_provider(
        &self,
        client: &Client<OpenAIConfig>,
        batch: &[String],
    ) -> Result<Vec<Vec<f32>>, AppError> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .dimensions(self.dimensions)
            .input(batch.to_vec())
            .build()
            .map_err(|e| AppError::Embedding(e.to_string()))?;

        let response = tokio::time::timeout(self.timeout, client.embeddings().create(request))
            .await
            .map_err(|_| {
                AppError::Timeout(format!(
                    "embedding call exceeded {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(classify_provider_error)?;

        if response.data.len() != batch.len() {
            return Err(AppError::Embedding(format!(
                "provider returned {} embeddings for {} inputs",
                response.data.len(),
                batch.len()
            )));
        }

        let mut embeddings = vec![Vec::new(); batch.len()];
        for item in response.data {
            let slot = embeddings
                .get_mut(item.index as usize)
                .ok_or_else(|| AppError::Embedding("embedding index out of range".into()))?;
            *slot = item.embedding;
        }

        Ok(embeddings)
    }
}

/// Sort a provider failure into the retry taxonomy: throttling and timeouts
/// are retried with backoff, everything else surfaces as an embedding error.
fn classify_provider_error(err: async_openai::error::OpenAIError) -> AppError {
    let message = err.to_string();
    let lowered = message.to_lowercase();
    if lowered.contains("rate limit") || lowered.contains("429") {
        AppError::RateLimit(message)
    } else if lowered.contains("timeout") || lowered.contains("timed out") {
        AppError::Timeout(message)
    } else {
        AppError::Embedding(message)
    }
}

/// Cosine similarity between two vectors; 0.0 when either has no magnitude
/// or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(any(test, feature = "test-utils"))]
fn deterministic_embedding(text: &str, dimensions: usize) -> Vec<f32> {
    let mut vector = vec![0.0f32; dimensions.max(1)];

    for word in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let digest = Sha256::digest(word.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        let index = (u64::from_le_bytes(bytes) as usize) % vector.len();
        vector[index] += 1.0;
    }

    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm <= f32::EPSILON {
        vector[0] = 1.0;
    } else {
        for v in &mut vector {
            *v /= norm;
        }
    }

    vector
}
