//! Concurrency-bounded, priority-ordered scheduling of analytic lookups.
//!
//! Handlers enqueue lookups keyed by the entity they profile; the queue keeps
//! the analytic engine from being overwhelmed by running at most `C` lookups
//! at once and always starting the most urgent ready task next. Tasks still
//! queued can be cancelled by owner; running tasks are never interrupted, and
//! their late results are discarded by the caller when the owner has been
//! superseded.

#![warn(missing_docs)]

pub mod engine;
pub mod queue;

pub use engine::{AnalyticsEngine, EngineError};
pub use queue::{Priority, PriorityQueue, QueueError, TaskTicket};
