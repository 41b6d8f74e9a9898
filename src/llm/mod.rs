//! LLM completion and embedding providers.
//!
//! Both are replaceable capabilities behind stable traits; concrete
//! selection is configuration, not logic the pipeline depends on.

pub mod embeddings;
pub mod provider;

pub use embeddings::{
    DeterministicEmbedding, EmbeddingPhase, EmbeddingProvider, NoopEmbedding, OpenAiEmbedding,
    create_embedding_provider,
};
pub use provider::{
    CompletionProvider, OpenAiCompletion, ScriptedCompletion, create_completion_provider,
};
