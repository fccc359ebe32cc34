//! The state dispatcher: action in, patch out.

use std::sync::Arc;
use std::time::Duration;

use quarry_store::{
	ApplicationRecord, DerivedModel, DerivedTable, EntityRecord, EntityState, EntityStore,
	EntityType, Patch, PersistentModel, PersistentTable, StateType, StoreKey,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::action::StateAction;
use crate::batch::UpdateBatcher;
use crate::emit::{Emitter, PatchReceiver, StorePatch, Subscribers};
use crate::handlers::{ApplyFn, Handler, HandlerRegistry};

/// Every entity store, one per `(entity, state)` pair.
pub struct StoreSet {
	/// Imported sources, durable.
	pub persistent_tables: Arc<EntityStore<PersistentTable>>,
	/// Imported sources, profiling results.
	pub derived_tables: Arc<EntityStore<DerivedTable>>,
	/// SQL models, durable (file-backed).
	pub persistent_models: Arc<EntityStore<PersistentModel>>,
	/// SQL models, profiling results.
	pub derived_models: Arc<EntityStore<DerivedModel>>,
	/// Application singleton.
	pub application: Arc<EntityStore<ApplicationRecord>>,
}

impl Default for StoreSet {
	fn default() -> Self {
		Self::new()
	}
}

impl StoreSet {
	/// Creates empty stores.
	#[must_use]
	pub fn new() -> Self {
		Self {
			persistent_tables: Arc::new(EntityStore::new(StoreKey::new(EntityType::Table, StateType::Persistent))),
			derived_tables: Arc::new(EntityStore::new(StoreKey::new(EntityType::Table, StateType::Derived))),
			persistent_models: Arc::new(EntityStore::new(StoreKey::new(EntityType::Model, StateType::Persistent))),
			derived_models: Arc::new(EntityStore::new(StoreKey::new(EntityType::Model, StateType::Derived))),
			application: Arc::new(EntityStore::new(StoreKey::new(EntityType::Application, StateType::Persistent))),
		}
	}

	/// Store keys in bootstrap order.
	#[must_use]
	pub fn keys() -> [StoreKey; 5] {
		[
			StoreKey::new(EntityType::Table, StateType::Persistent),
			StoreKey::new(EntityType::Table, StateType::Derived),
			StoreKey::new(EntityType::Model, StateType::Persistent),
			StoreKey::new(EntityType::Model, StateType::Derived),
			StoreKey::new(EntityType::Application, StateType::Persistent),
		]
	}
}

/// Routes actions to registered handlers and emits the resulting patches.
///
/// Routing failures (unregistered action kind, unresolved target store,
/// unresolved entity id) are logged and dropped; `dispatch` never panics and
/// never surfaces an error to the caller.
pub struct StateService {
	stores: StoreSet,
	registry: HandlerRegistry,
	subscribers: Arc<Subscribers>,
	persistent_tables: Arc<Emitter<PersistentTable>>,
	derived_tables: Arc<Emitter<DerivedTable>>,
	persistent_models: Arc<Emitter<PersistentModel>>,
	derived_models: Arc<Emitter<DerivedModel>>,
	application: Arc<Emitter<ApplicationRecord>>,
	derived_tables_batch: UpdateBatcher<DerivedTable>,
	derived_models_batch: UpdateBatcher<DerivedModel>,
}

impl StateService {
	/// Creates a service with the built-in handler table and the given
	/// quiet window for throttled actions.
	#[must_use]
	pub fn new(window: Duration) -> Self {
		Self::with_registry(HandlerRegistry::builtin(), window)
	}

	/// Creates a service with a custom handler table.
	#[must_use]
	pub fn with_registry(registry: HandlerRegistry, window: Duration) -> Self {
		let stores = StoreSet::new();
		let subscribers = Arc::new(Subscribers::new());
		let persistent_tables = Arc::new(Emitter::new(Arc::clone(&stores.persistent_tables), Arc::clone(&subscribers)));
		let derived_tables = Arc::new(Emitter::new(Arc::clone(&stores.derived_tables), Arc::clone(&subscribers)));
		let persistent_models = Arc::new(Emitter::new(Arc::clone(&stores.persistent_models), Arc::clone(&subscribers)));
		let derived_models = Arc::new(Emitter::new(Arc::clone(&stores.derived_models), Arc::clone(&subscribers)));
		let application = Arc::new(Emitter::new(Arc::clone(&stores.application), Arc::clone(&subscribers)));
		let derived_tables_batch = UpdateBatcher::new(Arc::clone(&derived_tables), window);
		let derived_models_batch = UpdateBatcher::new(Arc::clone(&derived_models), window);
		Self {
			stores,
			registry,
			subscribers,
			persistent_tables,
			derived_tables,
			persistent_models,
			derived_models,
			application,
			derived_tables_batch,
			derived_models_batch,
		}
	}

	/// The entity stores.
	#[must_use]
	pub fn stores(&self) -> &StoreSet {
		&self.stores
	}

	/// Registers a patch subscriber.
	pub fn subscribe(&self) -> PatchReceiver {
		self.subscribers.subscribe()
	}

	/// Routes one action to its handler and emits the resulting patch.
	pub fn dispatch(&self, action: StateAction) {
		let kind = action.kind();
		let target = action.target();
		let Some(handler) = self.registry.get(kind, target) else {
			tracing::error!(action = %kind, store = %target, "state.dispatch.handler_not_found");
			return;
		};
		match handler {
			Handler::PersistentTable(f) => run(&self.persistent_tables, None, *f, action),
			Handler::DerivedTable(f) => run(&self.derived_tables, Some(&self.derived_tables_batch), *f, action),
			Handler::PersistentModel(f) => run(&self.persistent_models, None, *f, action),
			Handler::DerivedModel(f) => run(&self.derived_models, Some(&self.derived_models_batch), *f, action),
			Handler::Application(f) => run(&self.application, None, *f, action),
		}
	}

	/// Every store's current snapshot, for bootstrapping new subscribers.
	#[must_use]
	pub fn snapshots(&self) -> Vec<(StoreKey, Value)> {
		let mut out = Vec::with_capacity(5);
		push_snapshot(&mut out, &self.stores.persistent_tables);
		push_snapshot(&mut out, &self.stores.derived_tables);
		push_snapshot(&mut out, &self.stores.persistent_models);
		push_snapshot(&mut out, &self.stores.derived_models);
		push_snapshot(&mut out, &self.stores.application);
		out
	}

	/// Applies a remotely-received patch to the local store without invoking
	/// any handler (non-authoritative replica path).
	pub fn apply_external_patch(&self, key: StoreKey, ops: &Patch) {
		let result = match (key.entity_type, key.state_type) {
			(EntityType::Table, StateType::Persistent) => self.stores.persistent_tables.apply_patch(ops),
			(EntityType::Table, StateType::Derived) => self.stores.derived_tables.apply_patch(ops),
			(EntityType::Model, StateType::Persistent) => self.stores.persistent_models.apply_patch(ops),
			(EntityType::Model, StateType::Derived) => self.stores.derived_models.apply_patch(ops),
			(EntityType::Application, StateType::Persistent) => self.stores.application.apply_patch(ops),
			_ => {
				tracing::error!(store = %key, "state.dispatch.unknown_store");
				return;
			}
		};
		if let Err(error) = result {
			tracing::error!(store = %key, %error, "state.dispatch.external_patch_failed");
		}
	}

	/// Replaces local snapshots from a full bootstrap (mirror connect).
	pub fn reset_from_snapshots(&self, snapshots: &[(StoreKey, Value)]) {
		for (key, value) in snapshots {
			let result = match (key.entity_type, key.state_type) {
				(EntityType::Table, StateType::Persistent) => reset(&self.stores.persistent_tables, value),
				(EntityType::Table, StateType::Derived) => reset(&self.stores.derived_tables, value),
				(EntityType::Model, StateType::Persistent) => reset(&self.stores.persistent_models, value),
				(EntityType::Model, StateType::Derived) => reset(&self.stores.derived_models, value),
				(EntityType::Application, StateType::Persistent) => reset(&self.stores.application, value),
				_ => {
					tracing::error!(store = %key, "state.dispatch.unknown_store");
					continue;
				}
			};
			if let Err(error) = result {
				tracing::error!(store = %key, %error, "state.dispatch.snapshot_reset_failed");
			}
		}
	}

	/// Force-flushes any coalesced mutations pending for the store.
	pub fn flush_pending(&self, key: StoreKey) {
		match (key.entity_type, key.state_type) {
			(EntityType::Table, StateType::Derived) => self.derived_tables_batch.flush_now(),
			(EntityType::Model, StateType::Derived) => self.derived_models_batch.flush_now(),
			_ => {}
		}
	}

	/// Resolves after the next coalesced flush for the store. Stores without
	/// a batcher resolve immediately.
	pub async fn next_flush(&self, key: StoreKey) {
		match (key.entity_type, key.state_type) {
			(EntityType::Table, StateType::Derived) => self.derived_tables_batch.next_flush().await,
			(EntityType::Model, StateType::Derived) => self.derived_models_batch.next_flush().await,
			_ => {}
		}
	}
}

fn reset<R>(store: &EntityStore<R>, value: &Value) -> Result<(), quarry_store::StoreError>
where
	R: EntityRecord + Clone + PartialEq + Serialize + DeserializeOwned,
{
	let state: EntityState<R> = serde_json::from_value(value.clone())?;
	store.reset(state);
	Ok(())
}

fn push_snapshot<R>(out: &mut Vec<(StoreKey, Value)>, store: &EntityStore<R>)
where
	R: EntityRecord + Clone + PartialEq + Serialize + DeserializeOwned,
{
	match store.snapshot_value() {
		Ok(value) => out.push((store.key(), value)),
		Err(error) => tracing::error!(store = %store.key(), %error, "state.dispatch.snapshot_failed"),
	}
}

/// Applies one action through the batcher or directly, preserving order: an
/// unthrottled mutation first force-flushes the batch pending for its store.
fn run<R>(emitter: &Arc<Emitter<R>>, batcher: Option<&UpdateBatcher<R>>, f: ApplyFn<R>, action: StateAction)
where
	R: EntityRecord + Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static,
{
	let kind = action.kind();
	let throttled = action.throttled();
	let mutator = Box::new(move |state: &mut EntityState<R>| {
		if let Err(error) = f(state, &action) {
			tracing::error!(action = %kind, %error, "state.dispatch.apply_failed");
		}
	});

	match batcher {
		Some(batcher) if throttled => batcher.schedule(mutator),
		Some(batcher) => {
			batcher.flush_now();
			emitter.apply(vec![mutator]);
		}
		None => emitter.apply(vec![mutator]),
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;
	use quarry_store::ColumnSummary;
	use quarry_store::ProfileColumn;

	use super::*;
	use crate::action::StateAction;

	const WINDOW: Duration = Duration::from_millis(250);

	fn service() -> StateService {
		StateService::new(WINDOW)
	}

	fn drain(rx: &mut PatchReceiver) -> Vec<StorePatch> {
		let mut out = Vec::new();
		while let Ok(patch) = rx.try_recv() {
			out.push(patch);
		}
		out
	}

	#[tokio::test]
	async fn add_model_emits_tagged_patch() {
		let service = service();
		let mut rx = service.subscribe();
		service.dispatch(StateAction::AddModel {
			id: "m0".into(),
			name: "a.sql".into(),
			query: "select 1".into(),
		});

		let patches = drain(&mut rx);
		assert_eq!(patches.len(), 1);
		assert_eq!(patches[0].key, StoreKey::new(EntityType::Model, StateType::Persistent));
		assert_eq!(service.stores().persistent_models.get_by_id("m0").unwrap().query, "select 1");
	}

	#[tokio::test]
	async fn unknown_entity_id_is_dropped_not_fatal() {
		let service = service();
		let mut rx = service.subscribe();
		service.dispatch(StateAction::UpdateModelQuery {
			id: "missing".into(),
			query: "select 2".into(),
		});
		assert!(drain(&mut rx).is_empty());
	}

	#[tokio::test]
	async fn unregistered_handler_is_dropped_not_fatal() {
		let service = StateService::with_registry(HandlerRegistry::default(), WINDOW);
		let mut rx = service.subscribe();
		service.dispatch(StateAction::AddModel {
			id: "m0".into(),
			name: "a.sql".into(),
			query: "select 1".into(),
		});
		assert!(drain(&mut rx).is_empty());
	}

	#[tokio::test]
	async fn unresolved_target_store_is_dropped() {
		let service = service();
		let mut rx = service.subscribe();
		// Application has no derived store, so this target cannot resolve.
		service.dispatch(StateAction::MarkProfiled {
			entity_type: EntityType::Application,
			id: "application".into(),
		});
		assert!(drain(&mut rx).is_empty());
	}

	#[tokio::test(start_paused = true)]
	async fn throttled_burst_emits_single_patch() {
		let service = service();
		service.dispatch(StateAction::AddDerivedModel { id: "m0".into() });
		service.dispatch(StateAction::SetModelProfile {
			id: "m0".into(),
			profile: vec![ProfileColumn::new("a", "BIGINT"), ProfileColumn::new("b", "VARCHAR")],
			cardinality: None,
		});

		let mut rx = service.subscribe();
		service.dispatch(StateAction::UpdateNullCount {
			entity_type: EntityType::Model,
			id: "m0".into(),
			column: "a".into(),
			null_count: 1,
			revision: None,
		});
		service.dispatch(StateAction::UpdateNullCount {
			entity_type: EntityType::Model,
			id: "m0".into(),
			column: "b".into(),
			null_count: 2,
			revision: None,
		});
		service.dispatch(StateAction::UpdateColumnSummary {
			entity_type: EntityType::Model,
			id: "m0".into(),
			column: "b".into(),
			summary: ColumnSummary::Categorical {
				top_k: Vec::new(),
				cardinality: 7,
			},
			revision: None,
		});
		tokio::time::sleep(WINDOW * 2).await;

		let patches = drain(&mut rx);
		assert_eq!(patches.len(), 1, "one coalesced patch for the burst");
		let record = service.stores().derived_models.get_by_id("m0").unwrap();
		assert_eq!(record.profile[0].null_count, Some(1));
		assert_eq!(record.profile[1].null_count, Some(2));
		assert!(record.profile[1].summary.is_some());
	}

	#[tokio::test(start_paused = true)]
	async fn unthrottled_action_flushes_pending_batch_first() {
		let service = service();
		service.dispatch(StateAction::AddDerivedModel { id: "m0".into() });
		service.dispatch(StateAction::SetModelProfile {
			id: "m0".into(),
			profile: vec![ProfileColumn::new("a", "BIGINT")],
			cardinality: None,
		});

		let mut rx = service.subscribe();
		service.dispatch(StateAction::UpdateNullCount {
			entity_type: EntityType::Model,
			id: "m0".into(),
			column: "a".into(),
			null_count: 3,
			revision: None,
		});
		// Unthrottled mutation of the same store: the batch must land first.
		service.dispatch(StateAction::SetModelError {
			id: "m0".into(),
			error: Some("boom".into()),
		});

		let patches = drain(&mut rx);
		assert_eq!(patches.len(), 2);
		assert!(patches[0].ops.iter().any(|op| op.path().contains("null_count")));
		assert!(patches[1].ops.iter().any(|op| op.path().contains("error")));
	}

	#[tokio::test(start_paused = true)]
	async fn summary_from_superseded_run_is_dropped_at_apply() {
		let service = service();
		service.dispatch(StateAction::AddDerivedModel { id: "m0".into() });
		service.dispatch(StateAction::SetModelProfile {
			id: "m0".into(),
			profile: vec![ProfileColumn::new("a", "BIGINT")],
			cardinality: None,
		});
		// The profile resets and refills with a same-named column; a summary
		// collected under the old revision arrives afterwards.
		service.dispatch(StateAction::ResetModelProfile { id: "m0".into() });
		service.dispatch(StateAction::SetModelProfile {
			id: "m0".into(),
			profile: vec![ProfileColumn::new("a", "BIGINT")],
			cardinality: None,
		});
		service.dispatch(StateAction::UpdateColumnSummary {
			entity_type: EntityType::Model,
			id: "m0".into(),
			column: "a".into(),
			summary: ColumnSummary::Categorical {
				top_k: Vec::new(),
				cardinality: 7,
			},
			revision: Some(0),
		});
		service.dispatch(StateAction::UpdateNullCount {
			entity_type: EntityType::Model,
			id: "m0".into(),
			column: "a".into(),
			null_count: 5,
			revision: Some(1),
		});
		tokio::time::sleep(WINDOW * 2).await;

		let record = service.stores().derived_models.get_by_id("m0").unwrap();
		assert_eq!(record.profile_revision, 1);
		assert!(record.profile[0].summary.is_none(), "stale summary must not attach to the new profile");
		assert_eq!(record.profile[0].null_count, Some(5), "matching revision still applies");
	}

	#[tokio::test]
	async fn external_patch_mirrors_without_handlers() {
		let primary = service();
		let mirror = service();
		let mut rx = primary.subscribe();
		primary.dispatch(StateAction::AddModel {
			id: "m0".into(),
			name: "a.sql".into(),
			query: "select 1".into(),
		});

		for patch in drain(&mut rx) {
			mirror.apply_external_patch(patch.key, &patch.ops);
		}
		assert_eq!(
			*mirror.stores().persistent_models.current(),
			*primary.stores().persistent_models.current(),
		);
	}
}
