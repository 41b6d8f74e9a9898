use thiserror::Error;

// ─── Top-level error hierarchy ───────────────────────────────────────────────

/// Structured error hierarchy for `memoloom`.
///
/// Each subsystem defines its own error variant. Library callers can match on
/// these (or on [`ErrorCode`]) to decide recovery strategy; internal code
/// continues to use `anyhow::Result` for ad-hoc context chains inside
/// provider implementations.
#[derive(Debug, Error)]
pub enum MemoloomError {
    // ── Config ───────────────────────────────────────────────────────────
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    // ── Relational store / cache ────────────────────────────────────────
    #[error("store: {0}")]
    Store(#[from] StoreError),

    // ── Buffering / flush pipeline ──────────────────────────────────────
    #[error("buffer: {0}")]
    Buffer(#[from] BufferError),

    // ── LLM / embedding providers ───────────────────────────────────────
    #[error("llm: {0}")]
    Llm(#[from] LlmError),

    // ── Distributed locking ─────────────────────────────────────────────
    #[error("lock: {0}")]
    Lock(#[from] LockError),

    // ── Generic fallthrough (wraps anyhow for interop) ──────────────────
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Stable error codes surfaced to API callers in the error envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    NotFound,
    BadRequest,
    Timeout,
    ExternalProvider,
    Internal,
}

impl MemoloomError {
    /// Map this error onto the stable code taxonomy.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Config(_) => ErrorCode::BadRequest,
            Self::Store(err) => match err {
                StoreError::NotFound { .. } => ErrorCode::NotFound,
                StoreError::Invalid(_) => ErrorCode::BadRequest,
                StoreError::Sqlx(_) | StoreError::Serialization(_) | StoreError::Transaction(_) => {
                    ErrorCode::Internal
                }
            },
            Self::Buffer(err) => match err {
                BufferError::UnsupportedBlobType(_) | BufferError::MixedBatch(_) => {
                    ErrorCode::BadRequest
                }
            },
            Self::Llm(_) => ErrorCode::ExternalProvider,
            Self::Lock(err) => match err {
                LockError::AcquireTimeout { .. } => ErrorCode::Timeout,
                LockError::Backend(_) => ErrorCode::Internal,
            },
            Self::Other(_) => ErrorCode::Internal,
        }
    }
}

// ─── Config errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    Load(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

// ─── Store errors ────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("invalid payload: {0}")]
    Invalid(String),

    #[error("sqlx: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("transaction failed during {0}")]
    Transaction(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }
}

// ─── Buffer / pipeline errors ───────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum BufferError {
    #[error("blob type {0} not supported for flush")]
    UnsupportedBlobType(String),

    #[error("invalid flush batch: {0}")]
    MixedBatch(String),
}

// ─── LLM / provider errors ──────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("provider {provider} request failed: {message}")]
    Request { provider: String, message: String },

    #[error("provider {provider} returned unparseable output: {message}")]
    Unparseable { provider: String, message: String },

    #[error("embedding failed: {0}")]
    Embedding(String),
}

// ─── Lock errors ────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum LockError {
    #[error("could not acquire lock {key} within {waited_secs}s")]
    AcquireTimeout { key: String, waited_secs: u64 },

    #[error("lock backend: {0}")]
    Backend(String),
}

// ─── Convenience re-exports ─────────────────────────────────────────────────

/// Shorthand result type for the crate.
pub type Result<T> = std::result::Result<T, MemoloomError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_not_found_code() {
        let err = MemoloomError::Store(StoreError::not_found("profile", "p-1"));
        assert_eq!(err.code(), ErrorCode::NotFound);
        assert!(err.to_string().contains("profile not found"));
    }

    #[test]
    fn lock_timeout_maps_to_timeout_code() {
        let err = MemoloomError::Lock(LockError::AcquireTimeout {
            key: "lock::proj::insert_blob::u1".into(),
            waited_secs: 32,
        });
        assert_eq!(err.code(), ErrorCode::Timeout);
        assert!(err.to_string().contains("32s"));
    }

    #[test]
    fn llm_errors_map_to_external_provider() {
        let err = MemoloomError::Llm(LlmError::Request {
            provider: "openai".into(),
            message: "503".into(),
        });
        assert_eq!(err.code(), ErrorCode::ExternalProvider);
    }

    #[test]
    fn unsupported_blob_type_is_bad_request() {
        let err = MemoloomError::Buffer(BufferError::UnsupportedBlobType("doc".into()));
        assert_eq!(err.code(), ErrorCode::BadRequest);
    }

    #[test]
    fn anyhow_interop() {
        let anyhow_err = anyhow::anyhow!("something went wrong");
        let err: MemoloomError = anyhow_err.into();
        assert_eq!(err.code(), ErrorCode::Internal);
        assert!(err.to_string().contains("something went wrong"));
    }
}
