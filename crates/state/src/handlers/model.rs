//! Handlers for SQL model records.

use quarry_store::{DerivedModel, EntityState, PersistentModel};

use crate::action::{ActionKind, ApplyError, StateAction};
use crate::handlers::{Handler, HandlerRegistry};

/// Registers this module's handlers.
pub fn register(registry: &mut HandlerRegistry) {
	registry.insert(ActionKind::AddModel, Handler::PersistentModel(add_model));
	registry.insert(ActionKind::UpdateModelQuery, Handler::PersistentModel(update_query));
	registry.insert(ActionKind::RenameModel, Handler::PersistentModel(rename_model));
	registry.insert(ActionKind::DeleteModel, Handler::PersistentModel(delete_model));
	registry.insert(ActionKind::AddDerivedModel, Handler::DerivedModel(add_derived));
	registry.insert(ActionKind::DeleteDerivedModel, Handler::DerivedModel(delete_derived));
	registry.insert(ActionKind::SetModelProfile, Handler::DerivedModel(set_profile));
	registry.insert(ActionKind::SetModelError, Handler::DerivedModel(set_error));
	registry.insert(ActionKind::ResetModelProfile, Handler::DerivedModel(reset_profile));
}

fn add_model(state: &mut EntityState<PersistentModel>, action: &StateAction) -> Result<(), ApplyError> {
	let StateAction::AddModel { id, name, query } = action else {
		return Ok(());
	};
	if state.by_id(id).is_none() {
		state.entities.push(PersistentModel {
			id: id.clone(),
			name: name.clone(),
			query: query.clone(),
			last_updated: 0,
		});
	}
	Ok(())
}

fn update_query(state: &mut EntityState<PersistentModel>, action: &StateAction) -> Result<(), ApplyError> {
	let StateAction::UpdateModelQuery { id, query } = action else {
		return Ok(());
	};
	let record = state.by_id_mut(id).ok_or_else(|| ApplyError::EntityNotFound(id.clone()))?;
	record.query = query.clone();
	Ok(())
}

fn rename_model(state: &mut EntityState<PersistentModel>, action: &StateAction) -> Result<(), ApplyError> {
	let StateAction::RenameModel { id, name } = action else {
		return Ok(());
	};
	let record = state.by_id_mut(id).ok_or_else(|| ApplyError::EntityNotFound(id.clone()))?;
	record.name = name.clone();
	Ok(())
}

fn delete_model(state: &mut EntityState<PersistentModel>, action: &StateAction) -> Result<(), ApplyError> {
	let StateAction::DeleteModel { id } = action else {
		return Ok(());
	};
	state.remove(id).map(|_| ()).ok_or_else(|| ApplyError::EntityNotFound(id.clone()))
}

fn add_derived(state: &mut EntityState<DerivedModel>, action: &StateAction) -> Result<(), ApplyError> {
	let StateAction::AddDerivedModel { id } = action else {
		return Ok(());
	};
	if state.by_id(id).is_none() {
		state.entities.push(DerivedModel {
			id: id.clone(),
			profile: Vec::new(),
			cardinality: None,
			error: None,
			profiled: false,
			profile_revision: 0,
			last_updated: 0,
		});
	}
	Ok(())
}

fn delete_derived(state: &mut EntityState<DerivedModel>, action: &StateAction) -> Result<(), ApplyError> {
	let StateAction::DeleteDerivedModel { id } = action else {
		return Ok(());
	};
	state.remove(id).map(|_| ()).ok_or_else(|| ApplyError::EntityNotFound(id.clone()))
}

fn set_profile(state: &mut EntityState<DerivedModel>, action: &StateAction) -> Result<(), ApplyError> {
	let StateAction::SetModelProfile { id, profile, cardinality } = action else {
		return Ok(());
	};
	let record = state.by_id_mut(id).ok_or_else(|| ApplyError::EntityNotFound(id.clone()))?;
	record.profile = profile.clone();
	record.cardinality = *cardinality;
	record.error = None;
	record.profiled = false;
	Ok(())
}

fn set_error(state: &mut EntityState<DerivedModel>, action: &StateAction) -> Result<(), ApplyError> {
	let StateAction::SetModelError { id, error } = action else {
		return Ok(());
	};
	let record = state.by_id_mut(id).ok_or_else(|| ApplyError::EntityNotFound(id.clone()))?;
	record.error = error.clone();
	Ok(())
}

fn reset_profile(state: &mut EntityState<DerivedModel>, action: &StateAction) -> Result<(), ApplyError> {
	let StateAction::ResetModelProfile { id } = action else {
		return Ok(());
	};
	let record = state.by_id_mut(id).ok_or_else(|| ApplyError::EntityNotFound(id.clone()))?;
	record.profile.clear();
	record.cardinality = None;
	record.profiled = false;
	record.profile_revision += 1;
	Ok(())
}
