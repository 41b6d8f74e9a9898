use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::LlmError;

/// Whether an embedding call is for a search query or stored documents;
/// some providers encode the two differently, and the phase is always
/// logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingPhase {
    Query,
    Document,
}

impl EmbeddingPhase {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Document => "document",
        }
    }
}

/// Trait for embedding providers — convert text to fixed-dimension vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider name
    fn name(&self) -> &str;

    /// Embedding dimensions
    fn dimensions(&self) -> usize;

    /// Embed a batch of texts into vectors
    async fn embed(
        &self,
        texts: &[&str],
        phase: EmbeddingPhase,
    ) -> Result<Vec<Vec<f32>>, LlmError>;

    /// Embed a single text
    async fn embed_one(&self, text: &str, phase: EmbeddingPhase) -> Result<Vec<f32>, LlmError> {
        let mut results = self.embed(&[text], phase).await?;
        results
            .pop()
            .ok_or_else(|| LlmError::Embedding("empty embedding result".into()))
    }
}

// ── Noop provider (similarity search disabled) ───────────────────

pub struct NoopEmbedding;

#[async_trait]
impl EmbeddingProvider for NoopEmbedding {
    fn name(&self) -> &str {
        "none"
    }

    fn dimensions(&self) -> usize {
        0
    }

    async fn embed(
        &self,
        _texts: &[&str],
        _phase: EmbeddingPhase,
    ) -> Result<Vec<Vec<f32>>, LlmError> {
        Ok(Vec::new())
    }
}

// ── OpenAI-compatible embedding provider ─────────────────────────

pub struct OpenAiEmbedding {
    client: reqwest::Client,
    embeddings_url: String,
    auth_header: String,
    model: String,
    dims: usize,
}

impl OpenAiEmbedding {
    pub fn new(
        base_url: &str,
        api_key: &str,
        model: &str,
        dims: usize,
        timeout: Duration,
    ) -> Self {
        let base = base_url.trim_end_matches('/');
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            embeddings_url: format!("{base}/v1/embeddings"),
            auth_header: format!("Bearer {api_key}"),
            model: model.to_string(),
            dims,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedding {
    fn name(&self) -> &str {
        "openai"
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    async fn embed(
        &self,
        texts: &[&str],
        phase: EmbeddingPhase,
    ) -> Result<Vec<Vec<f32>>, LlmError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
            "encoding_format": "float",
            "dimensions": self.dims,
        });

        let resp = self
            .client
            .post(&self.embeddings_url)
            .header("Authorization", &self.auth_header)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Embedding(format!("embedding HTTP request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            return Err(LlmError::Embedding(format!("embedding API error {status}")));
        }

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| LlmError::Embedding(e.to_string()))?;
        let data = json
            .get("data")
            .and_then(|d| d.as_array())
            .ok_or_else(|| LlmError::Embedding("invalid embedding response: missing 'data'".into()))?;

        let mut embeddings = Vec::with_capacity(data.len());
        for item in data {
            let embedding = item
                .get("embedding")
                .and_then(|e| e.as_array())
                .ok_or_else(|| LlmError::Embedding("invalid embedding item".into()))?;

            #[allow(clippy::cast_possible_truncation)]
            let vec: Vec<f32> = embedding
                .iter()
                .filter_map(|v| v.as_f64().map(|f| f as f32))
                .collect();

            embeddings.push(vec);
        }

        tracing::info!(
            model = %self.model,
            phase = phase.as_str(),
            batch = texts.len(),
            "embedding batch complete"
        );
        Ok(embeddings)
    }
}

// ── Deterministic embedder (test double) ─────────────────────────

/// Hash-seeded embedder: stable vectors per input, no network. Used by
/// similarity-search tests and wherever a real provider is unavailable.
pub struct DeterministicEmbedding {
    dims: usize,
    seed: u64,
}

impl DeterministicEmbedding {
    pub fn new(dims: usize) -> Self {
        Self { dims, seed: 0 }
    }

    pub fn with_seed(dims: usize, seed: u64) -> Self {
        Self { dims, seed }
    }

    fn fnv1a64(seed: u64, bytes: &[u8]) -> u64 {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325 ^ seed;
        for &b in bytes {
            hash ^= u64::from(b);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        hash
    }

    fn splitmix64(x: u64) -> u64 {
        let mut z = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^ (z >> 31)
    }

    #[allow(clippy::cast_precision_loss)]
    fn u64_to_unit_f32(x: u64) -> f32 {
        const U24_MAX: f32 = ((1u32 << 24) - 1) as f32;
        let top_u24: u32 = (x >> 40) as u32;
        (top_u24 as f32 / U24_MAX) * 2.0 - 1.0
    }
}

#[async_trait]
impl EmbeddingProvider for DeterministicEmbedding {
    fn name(&self) -> &str {
        "deterministic"
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    async fn embed(
        &self,
        texts: &[&str],
        _phase: EmbeddingPhase,
    ) -> Result<Vec<Vec<f32>>, LlmError> {
        let mut out = Vec::with_capacity(texts.len());
        for &t in texts {
            let base = Self::fnv1a64(self.seed, t.as_bytes());
            let mut v = Vec::with_capacity(self.dims);
            for i in 0..self.dims {
                let mixed = Self::splitmix64(base ^ (i as u64));
                v.push(Self::u64_to_unit_f32(mixed));
            }
            out.push(v);
        }
        Ok(out)
    }
}

// ── Factory ──────────────────────────────────────────────────────

pub fn create_embedding_provider(config: &EmbeddingConfig) -> Arc<dyn EmbeddingProvider> {
    match config.provider.as_str() {
        "openai" => {
            let base_url = config
                .base_url
                .as_deref()
                .unwrap_or("https://api.openai.com");
            let api_key = config.api_key.as_deref().unwrap_or("");
            Arc::new(OpenAiEmbedding::new(
                base_url,
                api_key,
                &config.model,
                config.dim,
                Duration::from_secs(config.timeout_secs),
            ))
        }
        "none" | "noop" => Arc::new(NoopEmbedding),
        other => {
            tracing::warn!("unknown embedding provider '{other}', similarity search disabled");
            Arc::new(NoopEmbedding)
        }
    }
}
