//! Handlers for per-column profiling results.
//!
//! These fire once per (column, lookup) and arrive in tight bursts, so the
//! dispatcher routes them through the update batcher. The same handler logic
//! serves both derived stores.

use quarry_store::{ColumnSummary, DerivedModel, DerivedTable, EntityRecord, EntityState, ProfileColumn};

use crate::action::{ActionKind, ApplyError, StateAction};
use crate::handlers::{Handler, HandlerRegistry};

/// Registers this module's handlers for both derived stores.
pub fn register(registry: &mut HandlerRegistry) {
	registry.insert(ActionKind::UpdateColumnSummary, Handler::DerivedTable(apply::<DerivedTable>));
	registry.insert(ActionKind::UpdateColumnSummary, Handler::DerivedModel(apply::<DerivedModel>));
	registry.insert(ActionKind::UpdateNullCount, Handler::DerivedTable(apply::<DerivedTable>));
	registry.insert(ActionKind::UpdateNullCount, Handler::DerivedModel(apply::<DerivedModel>));
	registry.insert(ActionKind::UpdateCardinality, Handler::DerivedTable(apply::<DerivedTable>));
	registry.insert(ActionKind::UpdateCardinality, Handler::DerivedModel(apply::<DerivedModel>));
	registry.insert(ActionKind::MarkProfiled, Handler::DerivedTable(apply::<DerivedTable>));
	registry.insert(ActionKind::MarkProfiled, Handler::DerivedModel(apply::<DerivedModel>));
}

/// A derived record carrying per-column profiling state.
pub trait ProfiledRecord: EntityRecord {
	/// Mutable access to the column list.
	fn profile_mut(&mut self) -> &mut Vec<ProfileColumn>;
	/// Stores the row count.
	fn set_cardinality(&mut self, cardinality: u64);
	/// Marks profiling as settled.
	fn set_profiled(&mut self);
	/// Current profile revision, `None` for records that do not track one.
	fn profile_revision(&self) -> Option<u64>;
}

impl ProfiledRecord for DerivedTable {
	fn profile_mut(&mut self) -> &mut Vec<ProfileColumn> {
		&mut self.profile
	}

	fn set_cardinality(&mut self, cardinality: u64) {
		self.cardinality = Some(cardinality);
	}

	fn set_profiled(&mut self) {
		self.profiled = true;
	}

	fn profile_revision(&self) -> Option<u64> {
		None
	}
}

impl ProfiledRecord for DerivedModel {
	fn profile_mut(&mut self) -> &mut Vec<ProfileColumn> {
		&mut self.profile
	}

	fn set_cardinality(&mut self, cardinality: u64) {
		self.cardinality = Some(cardinality);
	}

	fn set_profiled(&mut self) {
		self.profiled = true;
	}

	fn profile_revision(&self) -> Option<u64> {
		Some(self.profile_revision)
	}
}

fn apply<R: ProfiledRecord>(state: &mut EntityState<R>, action: &StateAction) -> Result<(), ApplyError> {
	match action {
		StateAction::UpdateColumnSummary { id, column, summary, revision, .. } => {
			let record = record_mut(state, id)?;
			if superseded(record, *revision) {
				return Ok(());
			}
			column_mut(record, id, column)?.summary = Some(summary.clone());
		}
		StateAction::UpdateNullCount { id, column, null_count, revision, .. } => {
			let record = record_mut(state, id)?;
			if superseded(record, *revision) {
				return Ok(());
			}
			column_mut(record, id, column)?.null_count = Some(*null_count);
		}
		StateAction::UpdateCardinality { id, cardinality, .. } => {
			record_mut(state, id)?.set_cardinality(*cardinality);
		}
		StateAction::MarkProfiled { id, .. } => {
			record_mut(state, id)?.set_profiled();
		}
		_ => {}
	}
	Ok(())
}

// A throttled update can sit in the batcher while a reset lands; the run
// that collected it must still match the record's revision at apply time.
fn superseded<R: ProfiledRecord>(record: &R, revision: Option<u64>) -> bool {
	revision.is_some_and(|run| record.profile_revision() != Some(run))
}

fn record_mut<'a, R: ProfiledRecord>(
	state: &'a mut EntityState<R>,
	id: &str,
) -> Result<&'a mut R, ApplyError> {
	state.by_id_mut(id).ok_or_else(|| ApplyError::EntityNotFound(id.to_owned()))
}

fn column_mut<'a, R: ProfiledRecord>(
	record: &'a mut R,
	id: &str,
	column: &str,
) -> Result<&'a mut ProfileColumn, ApplyError> {
	record
		.profile_mut()
		.iter_mut()
		.find(|c| c.name == column)
		.ok_or_else(|| ApplyError::EntityNotFound(format!("{id}/{column}")))
}
