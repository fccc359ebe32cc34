//! Handler modules and the dispatch table built from them at startup.
//!
//! Each module registers plain function handlers for the action kinds it
//! owns. A handler mutates the draft of exactly one store; cross-store
//! orchestration lives above the dispatcher, in the service layer.

pub mod application;
pub mod model;
pub mod profile;
pub mod table;

use std::collections::HashMap;

use quarry_store::{
	ApplicationRecord, DerivedModel, DerivedTable, EntityState, EntityType, PersistentModel,
	PersistentTable, StateType, StoreKey,
};

use crate::action::{ActionKind, ApplyError, StateAction};

/// A registered handler function for one store type.
pub type ApplyFn<R> = fn(&mut EntityState<R>, &StateAction) -> Result<(), ApplyError>;

/// Handler bound to the store it mutates.
pub enum Handler {
	/// Mutates the persistent table store.
	PersistentTable(ApplyFn<PersistentTable>),
	/// Mutates the derived table store.
	DerivedTable(ApplyFn<DerivedTable>),
	/// Mutates the persistent model store.
	PersistentModel(ApplyFn<PersistentModel>),
	/// Mutates the derived model store.
	DerivedModel(ApplyFn<DerivedModel>),
	/// Mutates the application store.
	Application(ApplyFn<ApplicationRecord>),
}

impl Handler {
	/// The store this handler mutates.
	#[must_use]
	pub fn target(&self) -> StoreKey {
		match self {
			Self::PersistentTable(_) => StoreKey::new(EntityType::Table, StateType::Persistent),
			Self::DerivedTable(_) => StoreKey::new(EntityType::Table, StateType::Derived),
			Self::PersistentModel(_) => StoreKey::new(EntityType::Model, StateType::Persistent),
			Self::DerivedModel(_) => StoreKey::new(EntityType::Model, StateType::Derived),
			Self::Application(_) => StoreKey::new(EntityType::Application, StateType::Persistent),
		}
	}
}

/// Lookup table from `(action kind, target store)` to handler.
///
/// Built once at startup from the independently registered handler modules.
#[derive(Default)]
pub struct HandlerRegistry {
	entries: HashMap<(ActionKind, StoreKey), Handler>,
}

impl HandlerRegistry {
	/// Builds the full table from every built-in handler module.
	#[must_use]
	pub fn builtin() -> Self {
		let mut registry = Self::default();
		table::register(&mut registry);
		model::register(&mut registry);
		profile::register(&mut registry);
		application::register(&mut registry);
		registry
	}

	/// Registers one handler, warning on collisions (last registration wins).
	pub fn insert(&mut self, kind: ActionKind, handler: Handler) {
		let key = (kind, handler.target());
		if self.entries.insert(key, handler).is_some() {
			tracing::warn!(action = %kind, store = %key.1, "state.handlers.collision");
		}
	}

	/// The handler registered for this kind and target store.
	#[must_use]
	pub fn get(&self, kind: ActionKind, target: StoreKey) -> Option<&Handler> {
		self.entries.get(&(kind, target))
	}
}
