//! Typed entity stores with snapshot diffing and patch replay.
//!
//! Each store holds every record for one `(EntityType, StateType)` pair and
//! exposes an atomic mutate-and-diff operation: mutations run against a
//! writable draft of the current snapshot, and the structural difference
//! between the old and new snapshots is emitted as an ordered [`Patch`].
//! Replaying a store's full patch history from the empty initial state
//! reproduces the current snapshot exactly.

#![warn(missing_docs)]

pub mod entity;
pub mod patch;
pub mod store;

pub use entity::{
	ActiveEntity, ApplicationRecord, AppStatus, ColumnSummary, DerivedModel, DerivedTable,
	EntityRecord, EntityType, HistogramBin, NumericStatistics, PersistentModel, PersistentTable,
	ProfileColumn, StateType, StoreKey, TopKEntry, unix_millis,
};
pub use patch::{Patch, PatchError, PatchOp};
pub use store::{EntityState, EntityStore, StoreError};
