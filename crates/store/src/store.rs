//! The typed, keyed entity store.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::entity::{EntityRecord, StoreKey, unix_millis};
use crate::patch::{self, Patch, PatchError};

/// Errors from store snapshot plumbing.
///
/// The store raises nothing for domain-level misses: a non-existent id yields
/// `None`, never an error.
#[derive(Debug, Error)]
pub enum StoreError {
	/// Snapshot (de)serialization failed.
	#[error("snapshot serialization failed: {0}")]
	Snapshot(#[from] serde_json::Error),

	/// An externally-received patch did not apply cleanly.
	#[error(transparent)]
	Patch(#[from] PatchError),
}

/// Snapshot of every record in one store.
#[derive(Debug, Clone, PartialEq, Serialize, serde::Deserialize)]
pub struct EntityState<R> {
	/// All records, in insertion order.
	pub entities: Vec<R>,
	/// Time of the last mutation that changed anything (Unix ms).
	pub last_updated: u64,
}

impl<R> Default for EntityState<R> {
	fn default() -> Self {
		Self {
			entities: Vec::new(),
			last_updated: 0,
		}
	}
}

impl<R: EntityRecord> EntityState<R> {
	/// First record with the given id.
	pub fn by_id(&self, id: &str) -> Option<&R> {
		self.entities.iter().find(|r| r.id() == id)
	}

	/// Mutable access to the record with the given id.
	pub fn by_id_mut(&mut self, id: &str) -> Option<&mut R> {
		self.entities.iter_mut().find(|r| r.id() == id)
	}

	/// Removes the record with the given id, returning it.
	pub fn remove(&mut self, id: &str) -> Option<R> {
		let idx = self.entities.iter().position(|r| r.id() == id)?;
		Some(self.entities.remove(idx))
	}
}

/// A typed, keyed collection of records for one `(entity, state)` pair.
///
/// Mutations run against a writable draft cloned from the current snapshot;
/// the swap to the new snapshot is atomic, so readers never observe a
/// partially-applied draft. All writes to one store are serialized.
pub struct EntityStore<R> {
	key: StoreKey,
	current: Mutex<Arc<EntityState<R>>>,
}

impl<R> EntityStore<R>
where
	R: EntityRecord + Clone + PartialEq + Serialize + DeserializeOwned,
{
	/// Creates an empty store.
	#[must_use]
	pub fn new(key: StoreKey) -> Self {
		Self {
			key,
			current: Mutex::new(Arc::new(EntityState::default())),
		}
	}

	/// The store's `(entity, state)` key.
	#[must_use]
	pub fn key(&self) -> StoreKey {
		self.key
	}

	/// Immutable snapshot of the current state.
	#[must_use]
	pub fn current(&self) -> Arc<EntityState<R>> {
		Arc::clone(&self.current.lock())
	}

	/// Record with the given id, if present.
	#[must_use]
	pub fn get_by_id(&self, id: &str) -> Option<R> {
		self.current().by_id(id).cloned()
	}

	/// First record whose declared name matches.
	#[must_use]
	pub fn get_by_name(&self, name: &str) -> Option<R> {
		self.current().entities.iter().find(|r| r.name() == Some(name)).cloned()
	}

	/// Applies `f` to a writable draft and returns the resulting edit list.
	///
	/// Changed records the mutator did not itself re-stamp get `last_updated`
	/// set to the current time; an explicitly-stamped record keeps the
	/// mutator's value (the reconciliation pull path relies on this).
	pub fn mutate(&self, f: impl FnOnce(&mut EntityState<R>)) -> Result<Patch, StoreError> {
		let mut current = self.current.lock();
		let old = Arc::clone(&current);
		let mut draft = (*old).clone();
		f(&mut draft);

		if draft == *old {
			return Ok(Patch::new());
		}

		let now = unix_millis();
		for record in &mut draft.entities {
			match old.by_id(record.id()) {
				Some(prev) => {
					if prev != record && prev.last_updated() == record.last_updated() {
						record.touch(now);
					}
				}
				None => {
					if record.last_updated() == 0 {
						record.touch(now);
					}
				}
			}
		}
		draft.last_updated = now;

		let old_tree = serde_json::to_value(&*old)?;
		let new_tree = serde_json::to_value(&draft)?;
		let patch = patch::diff(&old_tree, &new_tree);
		tracing::trace!(store = %self.key, ops = patch.len(), "store.mutate");
		*current = Arc::new(draft);
		Ok(patch)
	}

	/// Replays a remotely-received patch without invoking any handler.
	///
	/// Used by non-authoritative mirrors fed from the push channel.
	pub fn apply_patch(&self, patch: &Patch) -> Result<(), StoreError> {
		let mut current = self.current.lock();
		let mut tree = serde_json::to_value(&**current)?;
		patch::apply(&mut tree, patch)?;
		let state: EntityState<R> = serde_json::from_value(tree)?;
		*current = Arc::new(state);
		Ok(())
	}

	/// Replaces the whole snapshot (bootstrap of a mirror).
	pub fn reset(&self, state: EntityState<R>) {
		*self.current.lock() = Arc::new(state);
	}

	/// Current snapshot as a JSON tree (subscriber bootstrap).
	pub fn snapshot_value(&self) -> Result<Value, StoreError> {
		Ok(serde_json::to_value(&*self.current())?)
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;
	use crate::entity::{EntityType, PersistentModel, StateType};

	fn model_store() -> EntityStore<PersistentModel> {
		EntityStore::new(StoreKey::new(EntityType::Model, StateType::Persistent))
	}

	fn add_model(store: &EntityStore<PersistentModel>, id: &str, name: &str, query: &str) -> Patch {
		store
			.mutate(|draft| {
				draft.entities.push(PersistentModel {
					id: id.to_owned(),
					name: name.to_owned(),
					query: query.to_owned(),
					last_updated: 0,
				});
			})
			.unwrap()
	}

	#[test]
	fn mutate_is_atomic_for_readers() {
		let store = model_store();
		let before = store.current();
		add_model(&store, "m0", "a.sql", "select 1");
		assert!(before.entities.is_empty());
		assert_eq!(store.current().entities.len(), 1);
	}

	#[test]
	fn missing_id_yields_none() {
		let store = model_store();
		assert_eq!(store.get_by_id("nope"), None);
		assert_eq!(store.get_by_name("nope"), None);
	}

	#[test]
	fn changed_records_are_stamped() {
		let store = model_store();
		add_model(&store, "m0", "a.sql", "select 1");
		let created = store.get_by_id("m0").unwrap().last_updated;
		assert!(created > 0);

		store
			.mutate(|draft| {
				draft.by_id_mut("m0").unwrap().query = "select 2".to_owned();
			})
			.unwrap();
		assert!(store.get_by_id("m0").unwrap().last_updated >= created);
	}

	#[test]
	fn explicit_stamp_wins() {
		let store = model_store();
		add_model(&store, "m0", "a.sql", "select 1");
		store
			.mutate(|draft| {
				let record = draft.by_id_mut("m0").unwrap();
				record.query = "select 2".to_owned();
				record.last_updated = 42;
			})
			.unwrap();
		assert_eq!(store.get_by_id("m0").unwrap().last_updated, 42);
	}

	#[test]
	fn noop_mutation_emits_empty_patch() {
		let store = model_store();
		add_model(&store, "m0", "a.sql", "select 1");
		let snapshot = store.current();
		let patch = store.mutate(|_| {}).unwrap();
		assert!(patch.is_empty());
		assert!(Arc::ptr_eq(&snapshot, &store.current()));
	}

	#[test]
	fn patch_history_replays_to_current_snapshot() {
		let store = model_store();
		let mirror = model_store();
		let mut history = Vec::new();

		history.push(add_model(&store, "m0", "a.sql", "select 1"));
		history.push(add_model(&store, "m1", "b.sql", "select 2"));
		history.push(
			store
				.mutate(|draft| {
					draft.by_id_mut("m0").unwrap().query = "select 10".to_owned();
				})
				.unwrap(),
		);
		history.push(
			store
				.mutate(|draft| {
					draft.remove("m1");
				})
				.unwrap(),
		);

		for patch in &history {
			mirror.apply_patch(patch).unwrap();
		}
		assert_eq!(*mirror.current(), *store.current());
	}
}
