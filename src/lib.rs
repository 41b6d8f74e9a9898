//! memoloom — long-term memory backend for LLM applications.
//!
//! Clients append raw interaction blobs (chat transcripts, documents) per
//! user; memoloom buffers them, distills them asynchronously into a
//! structured, deduplicated profile (topic/sub_topic facts) plus a
//! chronological event log, and serves the result back as ranked,
//! token-budgeted context for prompting.
//!
//! The heart of the crate is the buffering-and-extraction pipeline:
//! - [`pipeline::BufferManager`] decides *when* accumulated blobs flush
//!   (size and idle-time triggers) and guarantees one flush at a time per
//!   (user, blob type);
//! - [`pipeline::ExtractionEngine`] turns a flushed batch into candidate
//!   facts via LLM calls, strict-mode filtering and per-fact validation;
//! - [`pipeline::MergeEngine`] reconciles new facts against the existing
//!   profile (UPDATE vs. KEEP), bounds content growth, and records one
//!   event per flush.
//!
//! HTTP routing, auth, billing and metric exporters are external
//! collaborators; their interface boundary is [`service::Memoloom`] plus the
//! [`telemetry::Telemetry`] trait.

#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::struct_field_names,
    clippy::must_use_candidate,
    clippy::new_without_default,
    clippy::return_self_not_must_use
)]

pub mod blob;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod llm;
pub mod lock;
pub mod pipeline;
pub mod prompts;
pub mod service;
pub mod store;
pub mod telemetry;
pub mod tokens;

pub use blob::{BlobPayload, BlobType, ChatMessage};
pub use config::{Config, ProfileConfig};
pub use error::{ErrorCode, MemoloomError, Result};
pub use pipeline::{BufferManager, ExtractionEngine, FlushResult, MergeEngine};
pub use service::Memoloom;
