//! Handlers for imported source records.

use quarry_store::{DerivedTable, EntityState, PersistentTable};

use crate::action::{ActionKind, ApplyError, StateAction};
use crate::handlers::{Handler, HandlerRegistry};

/// Registers this module's handlers.
pub fn register(registry: &mut HandlerRegistry) {
	registry.insert(ActionKind::AddTable, Handler::PersistentTable(add_table));
	registry.insert(ActionKind::DeleteTable, Handler::PersistentTable(delete_table));
	registry.insert(ActionKind::AddDerivedTable, Handler::DerivedTable(add_derived));
	registry.insert(ActionKind::DeleteDerivedTable, Handler::DerivedTable(delete_derived));
	registry.insert(ActionKind::SetTableProfile, Handler::DerivedTable(set_profile));
}

fn add_table(state: &mut EntityState<PersistentTable>, action: &StateAction) -> Result<(), ApplyError> {
	let StateAction::AddTable { id, name, path } = action else {
		return Ok(());
	};
	match state.by_id_mut(id) {
		// Re-import of the same source refreshes it in place.
		Some(existing) => {
			existing.name = name.clone();
			existing.path = path.clone();
		}
		None => state.entities.push(PersistentTable {
			id: id.clone(),
			name: name.clone(),
			path: path.clone(),
			last_updated: 0,
		}),
	}
	Ok(())
}

fn delete_table(state: &mut EntityState<PersistentTable>, action: &StateAction) -> Result<(), ApplyError> {
	let StateAction::DeleteTable { id } = action else {
		return Ok(());
	};
	state.remove(id).map(|_| ()).ok_or_else(|| ApplyError::EntityNotFound(id.clone()))
}

fn add_derived(state: &mut EntityState<DerivedTable>, action: &StateAction) -> Result<(), ApplyError> {
	let StateAction::AddDerivedTable { id } = action else {
		return Ok(());
	};
	if state.by_id(id).is_none() {
		state.entities.push(DerivedTable {
			id: id.clone(),
			profile: Vec::new(),
			cardinality: None,
			profiled: false,
			last_updated: 0,
		});
	}
	Ok(())
}

fn delete_derived(state: &mut EntityState<DerivedTable>, action: &StateAction) -> Result<(), ApplyError> {
	let StateAction::DeleteDerivedTable { id } = action else {
		return Ok(());
	};
	state.remove(id).map(|_| ()).ok_or_else(|| ApplyError::EntityNotFound(id.clone()))
}

fn set_profile(state: &mut EntityState<DerivedTable>, action: &StateAction) -> Result<(), ApplyError> {
	let StateAction::SetTableProfile { id, profile, cardinality } = action else {
		return Ok(());
	};
	let record = state.by_id_mut(id).ok_or_else(|| ApplyError::EntityNotFound(id.clone()))?;
	record.profile = profile.clone();
	record.cardinality = *cardinality;
	record.profiled = false;
	Ok(())
}
