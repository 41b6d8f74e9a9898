//! The buffering-and-extraction pipeline.
//!
//! [`BufferManager`] owns admission triggers and the locked flush path;
//! [`ExtractionEngine`] turns a claimed batch into validated facts;
//! [`MergeEngine`] reconciles facts against existing profile rows and
//! persists the outcome. Extraction strictly precedes merge, and nothing
//! is persisted until every LLM-dependent decision has resolved.

mod buffer;
mod extract;
mod merge;

pub use buffer::BufferManager;
pub use extract::{Extraction, ExtractionEngine};
pub use merge::MergeEngine;

/// Outcome of one flush attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushResult {
    /// No idle entries were waiting; nothing changed.
    NothingToDo,
    /// A batch was processed to completion.
    Flushed {
        /// Buffer entries consumed.
        entries: usize,
        /// Profile rows inserted or updated.
        delta: usize,
        /// Event recorded for the change, absent when the batch produced
        /// no facts and no tip.
        event_id: Option<String>,
    },
}
