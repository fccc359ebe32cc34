//! Handlers for the application singleton.

use quarry_store::{ApplicationRecord, EntityState};

use crate::action::{ActionKind, ApplyError, StateAction};
use crate::handlers::{Handler, HandlerRegistry};

/// Registers this module's handlers.
pub fn register(registry: &mut HandlerRegistry) {
	registry.insert(ActionKind::SetActiveEntity, Handler::Application(set_active));
	registry.insert(ActionKind::SetAppStatus, Handler::Application(set_status));
}

/// The singleton is created lazily on first mutation, keeping the
/// replay-from-empty invariant intact.
fn singleton(state: &mut EntityState<ApplicationRecord>) -> &mut ApplicationRecord {
	if state.entities.is_empty() {
		state.entities.push(ApplicationRecord::default());
	}
	&mut state.entities[0]
}

fn set_active(state: &mut EntityState<ApplicationRecord>, action: &StateAction) -> Result<(), ApplyError> {
	if let StateAction::SetActiveEntity { active } = action {
		singleton(state).active_entity = active.clone();
	}
	Ok(())
}

fn set_status(state: &mut EntityState<ApplicationRecord>, action: &StateAction) -> Result<(), ApplyError> {
	if let StateAction::SetAppStatus { status } = action {
		singleton(state).status = *status;
	}
	Ok(())
}
