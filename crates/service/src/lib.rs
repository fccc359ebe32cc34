//! Higher-order modeler actions.
//!
//! Where the state dispatcher applies one atomic mutation, this layer
//! implements the compound actions an interface actually takes: it validates
//! input, issues analytic lookups through the priority queue, and feeds the
//! results back into the dispatcher as further state actions. Every action
//! settles with a structured [`ActionResult`] a remote caller can branch on
//! without string inspection.

#![warn(missing_docs)]

pub mod actions;
pub mod profile;
pub mod result;
pub mod service;

pub use actions::ServiceAction;
pub use result::{ActionMessage, ActionResult, ActionStatus, FailureKind};
pub use service::{MODEL_FILE_SUFFIX, ModelerService, ServiceConfig, with_model_suffix};
