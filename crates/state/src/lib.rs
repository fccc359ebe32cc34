//! State dispatch: routes typed actions to registered handlers, mutates the
//! target entity store, and fans the resulting patch out to subscribers.
//!
//! Bursty mutations (per-column profiling results) are routed through the
//! [`batch::UpdateBatcher`], which coalesces every mutator scheduled inside
//! one quiet window into a single emitted patch.

#![warn(missing_docs)]

pub mod action;
pub mod batch;
pub mod emit;
pub mod handlers;
pub mod service;

pub use action::{ActionKind, ApplyError, StateAction};
pub use batch::UpdateBatcher;
pub use emit::{PatchReceiver, StorePatch, Subscribers};
pub use service::{StateService, StoreSet};
