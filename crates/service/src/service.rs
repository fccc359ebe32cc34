//! Compound action orchestration over the dispatcher and the queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use quarry_queue::{Priority, PriorityQueue, QueueError, TaskTicket};
use quarry_state::{StateAction, StateService};
use quarry_store::{ActiveEntity, AppStatus, EntityType, ProfileColumn};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::actions::ServiceAction;
use crate::profile::{self, TypeClass};
use crate::result::{ActionResult, FailureKind};

/// File suffix carried by every model name.
pub const MODEL_FILE_SUFFIX: &str = ".sql";

/// Behavior toggles for the modeler service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
	/// Re-run the profiling fan-out automatically after a successful query
	/// update. Off, the interface asks for profiles explicitly.
	pub profile_with_update: bool,
}

impl Default for ServiceConfig {
	fn default() -> Self {
		Self { profile_with_update: true }
	}
}

struct Inner {
	state: Arc<StateService>,
	queue: PriorityQueue,
	config: ServiceConfig,
	in_flight: AtomicUsize,
}

/// Executes compound actions: validates input, schedules analytic lookups,
/// and feeds results back into the state dispatcher.
///
/// Cheap to clone; clones share the dispatcher and the queue.
#[derive(Clone)]
pub struct ModelerService {
	inner: Arc<Inner>,
}

impl ModelerService {
	/// Creates a service over the given dispatcher and queue.
	#[must_use]
	pub fn new(state: Arc<StateService>, queue: PriorityQueue) -> Self {
		Self::with_config(state, queue, ServiceConfig::default())
	}

	/// Creates a service with explicit behavior toggles.
	#[must_use]
	pub fn with_config(state: Arc<StateService>, queue: PriorityQueue, config: ServiceConfig) -> Self {
		Self {
			inner: Arc::new(Inner {
				state,
				queue,
				config,
				in_flight: AtomicUsize::new(0),
			}),
		}
	}

	/// The underlying state dispatcher.
	#[must_use]
	pub fn state(&self) -> &Arc<StateService> {
		&self.inner.state
	}

	/// The underlying lookup queue.
	#[must_use]
	pub fn queue(&self) -> &PriorityQueue {
		&self.inner.queue
	}

	/// Executes one compound action to completion and returns its outcome.
	///
	/// Background work the action schedules (profiling fan-outs) settles
	/// after the result; the outcome covers the action itself.
	pub async fn dispatch(&self, action: ServiceAction) -> ActionResult {
		tracing::debug!(action = action.name(), "service.action.dispatch");
		match action {
			ServiceAction::AddTable { name, path } => self.add_table(name, path).await,
			ServiceAction::AddModel { name, query } => self.add_model(name, query).await,
			ServiceAction::CreateModelFromFile { name, query } => self.create_model_from_file(name, query),
			ServiceAction::UpdateModelQuery { id, query } => self.update_model_query(id, query).await,
			ServiceAction::RenameModel { id, name } => self.rename_model(&id, name),
			ServiceAction::DeleteModel { id } => self.delete_model(&id),
			ServiceAction::SetActiveEntity { entity_type, id } => self.set_active_entity(entity_type, id),
			ServiceAction::ProfileModel { id } => self.profile_model(&id).await,
			ServiceAction::ProfileTable { id } => self.profile_table(&id).await,
		}
	}

	async fn add_table(&self, name: String, path: String) -> ActionResult {
		let stores = self.inner.state.stores();
		// Re-importing an existing source refreshes it under the same id.
		let id = stores
			.persistent_tables
			.get_by_name(&name)
			.map_or_else(|| Uuid::new_v4().to_string(), |existing| existing.id);

		let ticket = self.inner.queue.enqueue(
			id.clone(),
			Priority::TableImport,
			"import_file",
			json!({ "path": path, "name": name }),
		);
		if let Err(error) = ticket.outcome().await {
			return match error {
				QueueError::Cancelled => ActionResult::failure(FailureKind::Cancelled, "import cancelled"),
				QueueError::Failed(error) => ActionResult::failure(FailureKind::ImportFailed, error.to_string()),
			};
		}

		self.inner.state.dispatch(StateAction::AddTable {
			id: id.clone(),
			name,
			path,
		});
		self.inner.state.dispatch(StateAction::AddDerivedTable { id: id.clone() });
		self.spawn_profile(EntityType::Table, id);
		ActionResult::success()
	}

	async fn add_model(&self, name: String, query: String) -> ActionResult {
		let name = with_model_suffix(&name);
		let stores = self.inner.state.stores();
		if stores.persistent_models.get_by_name(&name).is_some() {
			return ActionResult::failure(FailureKind::DuplicateEntity, format!("model {name} already exists"));
		}

		let id = Uuid::new_v4().to_string();
		self.inner.state.dispatch(StateAction::AddModel {
			id: id.clone(),
			name,
			query: query.clone(),
		});
		self.inner.state.dispatch(StateAction::AddDerivedModel { id: id.clone() });
		self.inner.state.dispatch(StateAction::SetActiveEntity {
			active: Some(ActiveEntity {
				entity_type: EntityType::Model,
				id: id.clone(),
			}),
		});
		if self.inner.config.profile_with_update && !query.trim().is_empty() {
			self.spawn_profile(EntityType::Model, id);
		}
		ActionResult::success()
	}

	/// Creation path for models discovered on disk: the name is already exact
	/// and focus does not move. Idempotent under reconciliation re-runs.
	fn create_model_from_file(&self, name: String, query: String) -> ActionResult {
		let stores = self.inner.state.stores();
		if stores.persistent_models.get_by_name(&name).is_some() {
			return ActionResult::success();
		}

		let id = Uuid::new_v4().to_string();
		self.inner.state.dispatch(StateAction::AddModel {
			id: id.clone(),
			name,
			query: query.clone(),
		});
		self.inner.state.dispatch(StateAction::AddDerivedModel { id: id.clone() });
		if self.inner.config.profile_with_update && !query.trim().is_empty() {
			self.spawn_profile(EntityType::Model, id);
		}
		ActionResult::success()
	}

	async fn update_model_query(&self, id: String, query: String) -> ActionResult {
		let stores = self.inner.state.stores();
		let Some(model) = stores.persistent_models.get_by_id(&id) else {
			return ActionResult::failure(FailureKind::EntityNotFound, format!("no model {id}"));
		};
		if model.query == query {
			return ActionResult::success();
		}

		// Lookups for the previous query are moot the moment the text changes.
		self.inner.queue.cancel_for(&id);
		self.inner.state.dispatch(StateAction::UpdateModelQuery {
			id: id.clone(),
			query: query.clone(),
		});
		self.inner.state.dispatch(StateAction::ResetModelProfile { id: id.clone() });

		let ticket = self.inner.queue.enqueue(
			id.clone(),
			Priority::ActiveModel,
			"validate_query",
			json!({ "query": query }),
		);
		match ticket.outcome().await {
			Ok(_) => {
				self.inner.state.dispatch(StateAction::SetModelError { id: id.clone(), error: None });
				if self.inner.config.profile_with_update {
					self.spawn_profile(EntityType::Model, id);
				}
				ActionResult::success()
			}
			Err(QueueError::Cancelled) => ActionResult::failure(FailureKind::Cancelled, "validation cancelled"),
			Err(QueueError::Failed(error)) => {
				let message = error.to_string();
				self.inner.state.dispatch(StateAction::SetModelError {
					id,
					error: Some(message.clone()),
				});
				ActionResult::failure(FailureKind::QueryFailed, message)
			}
		}
	}

	fn rename_model(&self, id: &str, name: String) -> ActionResult {
		let name = with_model_suffix(&name);
		let stores = self.inner.state.stores();
		if stores.persistent_models.get_by_id(id).is_none() {
			return ActionResult::failure(FailureKind::EntityNotFound, format!("no model {id}"));
		}
		if stores.persistent_models.get_by_name(&name).is_some_and(|other| other.id != id) {
			return ActionResult::failure(FailureKind::DuplicateEntity, format!("model {name} already exists"));
		}
		self.inner.state.dispatch(StateAction::RenameModel { id: id.to_owned(), name });
		ActionResult::success()
	}

	fn delete_model(&self, id: &str) -> ActionResult {
		let stores = self.inner.state.stores();
		if stores.persistent_models.get_by_id(id).is_none() {
			return ActionResult::failure(FailureKind::EntityNotFound, format!("no model {id}"));
		}
		self.inner.queue.cancel_for(id);
		self.inner.state.dispatch(StateAction::DeleteModel { id: id.to_owned() });
		self.inner.state.dispatch(StateAction::DeleteDerivedModel { id: id.to_owned() });
		if self.is_active(EntityType::Model, id) {
			self.inner.state.dispatch(StateAction::SetActiveEntity { active: None });
		}
		ActionResult::success()
	}

	fn set_active_entity(&self, entity_type: EntityType, id: String) -> ActionResult {
		let stores = self.inner.state.stores();
		let exists = match entity_type {
			EntityType::Table => stores.persistent_tables.get_by_id(&id).is_some(),
			EntityType::Model => stores.persistent_models.get_by_id(&id).is_some(),
			EntityType::Application => false,
		};
		if !exists {
			return ActionResult::failure(FailureKind::EntityNotFound, format!("no {entity_type:?} {id}"));
		}
		self.inner.state.dispatch(StateAction::SetActiveEntity {
			active: Some(ActiveEntity { entity_type, id }),
		});
		ActionResult::success()
	}

	async fn profile_model(&self, id: &str) -> ActionResult {
		let stores = self.inner.state.stores();
		let Some(model) = stores.persistent_models.get_by_id(id) else {
			return ActionResult::failure(FailureKind::EntityNotFound, format!("no model {id}"));
		};
		let revision = stores.derived_models.get_by_id(id).map_or(0, |d| d.profile_revision);
		let _guard = self.begin_run();
		self.profile_source(EntityType::Model, id, &model.name, revision).await
	}

	async fn profile_table(&self, id: &str) -> ActionResult {
		let stores = self.inner.state.stores();
		let Some(table) = stores.persistent_tables.get_by_id(id) else {
			return ActionResult::failure(FailureKind::EntityNotFound, format!("no table {id}"));
		};
		let _guard = self.begin_run();
		self.profile_source(EntityType::Table, id, &table.name, 0).await
	}

	/// Profiles one source end to end: schema, row count, then one summary
	/// and one null-count lookup per column. Every lookup is enqueued up
	/// front so the queue orders the whole burst by priority; results are
	/// collected in enqueue order.
	async fn profile_source(&self, entity_type: EntityType, id: &str, source: &str, revision: u64) -> ActionResult {
		let priority = match entity_type {
			EntityType::Model => Priority::ActiveModelProfile,
			_ => Priority::TableProfile,
		};

		let schema = self
			.inner
			.queue
			.enqueue(id.to_owned(), priority, "get_schema", json!({ "source": source }));
		let columns = match schema.outcome().await {
			Ok(value) => match profile::decode_schema(value) {
				Ok(columns) => columns,
				Err(error) => {
					tracing::error!(%id, %error, "service.profile.schema_malformed");
					return ActionResult::failure(FailureKind::Unknown, error.to_string());
				}
			},
			Err(QueueError::Cancelled) => {
				return ActionResult::failure(FailureKind::Cancelled, "profiling cancelled");
			}
			Err(QueueError::Failed(error)) => {
				let message = error.to_string();
				if entity_type == EntityType::Model {
					self.inner.state.dispatch(StateAction::SetModelError {
						id: id.to_owned(),
						error: Some(message.clone()),
					});
					return ActionResult::failure(FailureKind::QueryFailed, message);
				}
				return ActionResult::failure(FailureKind::Unknown, message);
			}
		};

		if self.is_stale(entity_type, id, revision) {
			return ActionResult::info("profile superseded");
		}
		match entity_type {
			EntityType::Model => self.inner.state.dispatch(StateAction::SetModelProfile {
				id: id.to_owned(),
				profile: columns.clone(),
				cardinality: None,
			}),
			_ => self.inner.state.dispatch(StateAction::SetTableProfile {
				id: id.to_owned(),
				profile: columns.clone(),
				cardinality: None,
			}),
		}

		let row_count = self
			.inner
			.queue
			.enqueue(id.to_owned(), priority, "row_count", json!({ "source": source }));
		let jobs = self.enqueue_column_jobs(id, source, priority, &columns);

		if let Ok(value) = row_count.outcome().await
			&& let Some(cardinality) = log_decode(id, profile::decode_count("row_count", value))
			&& !self.is_stale(entity_type, id, revision)
		{
			self.inner.state.dispatch(StateAction::UpdateCardinality {
				entity_type,
				id: id.to_owned(),
				cardinality,
			});
		}

		// Column updates carry the run's revision so the handler re-checks it
		// at apply time; a reset can land after the pre-check below while the
		// update is still coalescing.
		let run_revision = (entity_type == EntityType::Model).then_some(revision);
		for job in jobs {
			let Some(update) = job.settle(id).await else {
				continue;
			};
			if self.is_stale(entity_type, id, revision) {
				return ActionResult::info("profile superseded");
			}
			match update {
				ColumnUpdate::Summary { column, summary } => {
					self.inner.state.dispatch(StateAction::UpdateColumnSummary {
						entity_type,
						id: id.to_owned(),
						column,
						summary,
						revision: run_revision,
					});
				}
				ColumnUpdate::NullCount { column, null_count } => {
					self.inner.state.dispatch(StateAction::UpdateNullCount {
						entity_type,
						id: id.to_owned(),
						column,
						null_count,
						revision: run_revision,
					});
				}
			}
		}

		if self.is_stale(entity_type, id, revision) {
			return ActionResult::info("profile superseded");
		}
		self.inner.state.dispatch(StateAction::MarkProfiled {
			entity_type,
			id: id.to_owned(),
		});
		ActionResult::success()
	}

	/// One summary job and one null-count job per column, enqueued in column
	/// order.
	fn enqueue_column_jobs(&self, id: &str, source: &str, priority: Priority, columns: &[ProfileColumn]) -> Vec<ColumnJob> {
		let mut jobs = Vec::with_capacity(columns.len() * 2);
		for column in columns {
			let args = json!({ "source": source, "column": column.name });
			let enqueue = |operation: &str| {
				self.inner
					.queue
					.enqueue(id.to_owned(), priority, operation, args.clone())
			};
			match profile::classify(&column.col_type) {
				TypeClass::Categorical => jobs.push(ColumnJob::Categorical {
					column: column.name.clone(),
					ticket: enqueue("top_k_and_cardinality"),
				}),
				TypeClass::Numeric => jobs.push(ColumnJob::Numeric {
					column: column.name.clone(),
					histogram: enqueue("numeric_histogram"),
					statistics: enqueue("descriptive_statistics"),
				}),
				TypeClass::Timestamp => jobs.push(ColumnJob::TimeRange {
					column: column.name.clone(),
					ticket: enqueue("time_range"),
				}),
				TypeClass::Other => {}
			}
			jobs.push(ColumnJob::NullCount {
				column: column.name.clone(),
				ticket: enqueue("null_count"),
			});
		}
		jobs
	}

	fn spawn_profile(&self, entity_type: EntityType, id: String) {
		let service = self.clone();
		tokio::spawn(async move {
			let result = match entity_type {
				EntityType::Model => service.profile_model(&id).await,
				_ => service.profile_table(&id).await,
			};
			if result.is_failure() {
				tracing::debug!(%id, ?result, "service.profile.background_failed");
			}
		});
	}

	/// True when the profiling run these results belong to has been
	/// superseded: the derived record is gone, or (models) its revision moved.
	fn is_stale(&self, entity_type: EntityType, id: &str, revision: u64) -> bool {
		let stores = self.inner.state.stores();
		match entity_type {
			EntityType::Model => stores
				.derived_models
				.get_by_id(id)
				.is_none_or(|d| d.profile_revision != revision),
			_ => stores.derived_tables.get_by_id(id).is_none(),
		}
	}

	fn is_active(&self, entity_type: EntityType, id: &str) -> bool {
		self.inner
			.state
			.stores()
			.application
			.get_by_id("application")
			.and_then(|app| app.active_entity)
			.is_some_and(|active| active.entity_type == entity_type && active.id == id)
	}

	/// Tracks in-flight compound work and mirrors it into the application
	/// status record.
	fn begin_run(&self) -> RunGuard {
		if self.inner.in_flight.fetch_add(1, Ordering::SeqCst) == 0 {
			self.inner.state.dispatch(StateAction::SetAppStatus { status: AppStatus::Running });
		}
		RunGuard { inner: Arc::clone(&self.inner) }
	}
}

struct RunGuard {
	inner: Arc<Inner>,
}

impl Drop for RunGuard {
	fn drop(&mut self) {
		if self.inner.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
			self.inner.state.dispatch(StateAction::SetAppStatus { status: AppStatus::Idle });
		}
	}
}

enum ColumnUpdate {
	Summary { column: String, summary: quarry_store::ColumnSummary },
	NullCount { column: String, null_count: u64 },
}

enum ColumnJob {
	Categorical { column: String, ticket: TaskTicket },
	Numeric { column: String, histogram: TaskTicket, statistics: TaskTicket },
	TimeRange { column: String, ticket: TaskTicket },
	NullCount { column: String, ticket: TaskTicket },
}

impl ColumnJob {
	/// Waits for the job's lookups and folds them into one update. Failed
	/// lookups drop the update for this column only.
	async fn settle(self, id: &str) -> Option<ColumnUpdate> {
		match self {
			Self::Categorical { column, ticket } => {
				let value = log_outcome(id, &column, ticket.outcome().await)?;
				let summary = log_decode(id, profile::decode_top_k(value))?;
				Some(ColumnUpdate::Summary { column, summary })
			}
			Self::Numeric { column, histogram, statistics } => {
				let value = log_outcome(id, &column, histogram.outcome().await)?;
				let mut summary = log_decode(id, profile::decode_histogram(value))?;
				// Statistics ride the same summary; a failure there still
				// leaves the histogram usable.
				if let Ok(value) = statistics.outcome().await
					&& let Some(stats) = log_decode(id, profile::decode_statistics(value))
					&& let quarry_store::ColumnSummary::Numeric { statistics, .. } = &mut summary
				{
					*statistics = Some(stats);
				}
				Some(ColumnUpdate::Summary { column, summary })
			}
			Self::TimeRange { column, ticket } => {
				let value = log_outcome(id, &column, ticket.outcome().await)?;
				let summary = log_decode(id, profile::decode_time_range(value))?;
				Some(ColumnUpdate::Summary { column, summary })
			}
			Self::NullCount { column, ticket } => {
				let value = log_outcome(id, &column, ticket.outcome().await)?;
				let null_count = log_decode(id, profile::decode_count("null_count", value))?;
				Some(ColumnUpdate::NullCount { column, null_count })
			}
		}
	}
}

fn log_outcome(id: &str, column: &str, outcome: Result<Value, QueueError>) -> Option<Value> {
	match outcome {
		Ok(value) => Some(value),
		Err(error) => {
			tracing::debug!(%id, %column, %error, "service.profile.lookup_failed");
			None
		}
	}
}

fn log_decode<T>(id: &str, result: Result<T, profile::DecodeError>) -> Option<T> {
	match result {
		Ok(value) => Some(value),
		Err(error) => {
			tracing::debug!(%id, %error, "service.profile.result_malformed");
			None
		}
	}
}

/// Appends the model file suffix when the caller left it off.
#[must_use]
pub fn with_model_suffix(name: &str) -> String {
	if name.ends_with(MODEL_FILE_SUFFIX) {
		name.to_owned()
	} else {
		format!("{name}{MODEL_FILE_SUFFIX}")
	}
}

#[cfg(test)]
mod tests {
	use std::collections::{HashMap, HashSet};
	use std::time::Duration;

	use async_trait::async_trait;
	use parking_lot::Mutex;
	use pretty_assertions::assert_eq;
	use quarry_queue::AnalyticsEngine;
	use quarry_queue::EngineError;
	use quarry_store::ColumnSummary;
	use tokio::sync::Semaphore;

	use super::*;
	use crate::result::ActionStatus;

	/// Engine fake with canned per-operation responses. Operations listed in
	/// `fail` error out; `"get_schema"` can be gated behind a semaphore.
	struct FakeEngine {
		responses: Mutex<HashMap<String, Value>>,
		fail: Mutex<HashSet<String>>,
		gate_schema: bool,
		gate: Semaphore,
	}

	impl FakeEngine {
		fn new() -> Arc<Self> {
			let mut responses = HashMap::new();
			responses.insert("validate_query".into(), Value::Null);
			responses.insert("import_file".into(), Value::Null);
			responses.insert(
				"get_schema".into(),
				json!([
					{"name": "amount", "type": "DOUBLE"},
					{"name": "label", "type": "VARCHAR"},
					{"name": "at", "type": "TIMESTAMP"},
				]),
			);
			responses.insert("row_count".into(), json!(42));
			responses.insert(
				"top_k_and_cardinality".into(),
				json!({"top_k": [{"value": "a", "count": 9}], "cardinality": 3}),
			);
			responses.insert(
				"numeric_histogram".into(),
				json!([{"bucket": 0, "low": 0.0, "high": 10.0, "count": 5}]),
			);
			responses.insert(
				"descriptive_statistics".into(),
				json!({"min": 0.0, "max": 10.0, "mean": 5.0, "q25": 2.5, "q50": 5.0, "q75": 7.5, "sd": 1.0}),
			);
			responses.insert("time_range".into(), json!({"min": "2024-01-01", "max": "2024-12-31"}));
			responses.insert("null_count".into(), json!(1));
			Arc::new(Self {
				responses: Mutex::new(responses),
				fail: Mutex::new(HashSet::new()),
				gate_schema: false,
				gate: Semaphore::new(0),
			})
		}

		fn gated() -> Arc<Self> {
			let engine = Self::new();
			// Arc::new just happened; nobody else holds it yet.
			let mut engine = Arc::into_inner(engine).unwrap();
			engine.gate_schema = true;
			Arc::new(engine)
		}

		fn fail_on(&self, operation: &str) {
			self.fail.lock().insert(operation.to_owned());
		}
	}

	#[async_trait]
	impl AnalyticsEngine for FakeEngine {
		async fn execute(&self, operation: &str, _args: Value) -> Result<Value, EngineError> {
			if self.fail.lock().contains(operation) {
				return Err(EngineError::Failed {
					operation: operation.to_owned(),
					message: "synthetic".to_owned(),
				});
			}
			if self.gate_schema && operation == "get_schema" {
				let _permit = self
					.gate
					.acquire()
					.await
					.map_err(|_| EngineError::Unsupported(operation.to_owned()))?;
			}
			self.responses
				.lock()
				.get(operation)
				.cloned()
				.ok_or_else(|| EngineError::Unsupported(operation.to_owned()))
		}
	}

	fn service_with(engine: Arc<FakeEngine>) -> ModelerService {
		let state = Arc::new(StateService::new(Duration::from_millis(250)));
		let queue = PriorityQueue::new(engine);
		ModelerService::with_config(state, queue, ServiceConfig { profile_with_update: false })
	}

	fn model_id(service: &ModelerService, name: &str) -> String {
		service
			.state()
			.stores()
			.persistent_models
			.get_by_name(name)
			.unwrap()
			.id
	}

	#[tokio::test]
	async fn add_model_creates_twin_records_and_focuses() {
		let service = service_with(FakeEngine::new());
		let result = service
			.dispatch(ServiceAction::AddModel { name: "orders".into(), query: String::new() })
			.await;
		assert_eq!(result.status, ActionStatus::Success);

		let stores = service.state().stores();
		let model = stores.persistent_models.get_by_name("orders.sql").unwrap();
		assert!(stores.derived_models.get_by_id(&model.id).is_some());
		let app = stores.application.get_by_id("application").unwrap();
		assert_eq!(
			app.active_entity,
			Some(ActiveEntity { entity_type: EntityType::Model, id: model.id }),
		);
	}

	#[tokio::test]
	async fn add_model_rejects_duplicate_name() {
		let service = service_with(FakeEngine::new());
		service
			.dispatch(ServiceAction::AddModel { name: "orders".into(), query: String::new() })
			.await;
		let result = service
			.dispatch(ServiceAction::AddModel { name: "orders.sql".into(), query: String::new() })
			.await;
		assert_eq!(result.failure_kind(), Some(FailureKind::DuplicateEntity));
	}

	#[tokio::test]
	async fn create_model_from_file_is_idempotent_and_keeps_focus() {
		let service = service_with(FakeEngine::new());
		let action = ServiceAction::CreateModelFromFile { name: "found.sql".into(), query: "select 1".into() };
		assert_eq!(service.dispatch(action.clone()).await.status, ActionStatus::Success);
		assert_eq!(service.dispatch(action).await.status, ActionStatus::Success);

		let stores = service.state().stores();
		assert_eq!(stores.persistent_models.current().entities.len(), 1);
		assert_eq!(stores.application.get_by_id("application"), None);
	}

	#[tokio::test]
	async fn update_model_query_failure_records_error_but_keeps_text() {
		let engine = FakeEngine::new();
		engine.fail_on("validate_query");
		let service = service_with(engine);
		service
			.dispatch(ServiceAction::AddModel { name: "orders".into(), query: "select 1".into() })
			.await;
		let id = model_id(&service, "orders.sql");

		let result = service
			.dispatch(ServiceAction::UpdateModelQuery { id: id.clone(), query: "select nope".into() })
			.await;
		assert_eq!(result.failure_kind(), Some(FailureKind::QueryFailed));

		let stores = service.state().stores();
		assert_eq!(stores.persistent_models.get_by_id(&id).unwrap().query, "select nope");
		assert!(stores.derived_models.get_by_id(&id).unwrap().error.is_some());
	}

	#[tokio::test]
	async fn unchanged_query_is_a_noop() {
		let service = service_with(FakeEngine::new());
		service
			.dispatch(ServiceAction::AddModel { name: "orders".into(), query: "select 1".into() })
			.await;
		let id = model_id(&service, "orders.sql");
		let revision_before = service.state().stores().derived_models.get_by_id(&id).unwrap().profile_revision;

		let result = service
			.dispatch(ServiceAction::UpdateModelQuery { id: id.clone(), query: "select 1".into() })
			.await;
		assert_eq!(result.status, ActionStatus::Success);
		let revision_after = service.state().stores().derived_models.get_by_id(&id).unwrap().profile_revision;
		assert_eq!(revision_before, revision_after);
	}

	#[tokio::test]
	async fn profile_model_fills_columns_and_marks_profiled() {
		let service = service_with(FakeEngine::new());
		service
			.dispatch(ServiceAction::AddModel { name: "orders".into(), query: "select 1".into() })
			.await;
		let id = model_id(&service, "orders.sql");

		let result = service.dispatch(ServiceAction::ProfileModel { id: id.clone() }).await;
		assert_eq!(result.status, ActionStatus::Success);
		service.state().flush_pending(quarry_store::StoreKey::new(
			EntityType::Model,
			quarry_store::StateType::Derived,
		));

		let derived = service.state().stores().derived_models.get_by_id(&id).unwrap();
		assert!(derived.profiled);
		assert_eq!(derived.cardinality, Some(42));
		assert_eq!(derived.profile.len(), 3);
		assert!(matches!(derived.profile[0].summary, Some(ColumnSummary::Numeric { .. })));
		assert!(matches!(derived.profile[1].summary, Some(ColumnSummary::Categorical { .. })));
		assert!(matches!(derived.profile[2].summary, Some(ColumnSummary::TimeRange { .. })));
		assert_eq!(derived.profile[0].null_count, Some(1));
	}

	#[tokio::test]
	async fn failed_column_lookup_skips_that_column_only() {
		let engine = FakeEngine::new();
		engine.fail_on("top_k_and_cardinality");
		let service = service_with(engine);
		service
			.dispatch(ServiceAction::AddModel { name: "orders".into(), query: "select 1".into() })
			.await;
		let id = model_id(&service, "orders.sql");

		let result = service.dispatch(ServiceAction::ProfileModel { id: id.clone() }).await;
		assert_eq!(result.status, ActionStatus::Success);
		service.state().flush_pending(quarry_store::StoreKey::new(
			EntityType::Model,
			quarry_store::StateType::Derived,
		));

		let derived = service.state().stores().derived_models.get_by_id(&id).unwrap();
		assert!(derived.profile[1].summary.is_none(), "categorical lookup failed");
		assert!(derived.profile[0].summary.is_some());
		assert!(derived.profiled);
	}

	#[tokio::test]
	async fn superseded_profile_run_discards_its_results() {
		let engine = FakeEngine::gated();
		let service = service_with(Arc::clone(&engine));
		service
			.dispatch(ServiceAction::AddModel { name: "orders".into(), query: "select 1".into() })
			.await;
		let id = model_id(&service, "orders.sql");

		let profiler = {
			let service = service.clone();
			let id = id.clone();
			tokio::spawn(async move { service.dispatch(ServiceAction::ProfileModel { id }).await })
		};
		tokio::task::yield_now().await;

		// The query changes while the schema lookup is still blocked; the
		// revision bump makes the run stale.
		service
			.dispatch(ServiceAction::UpdateModelQuery { id: id.clone(), query: "select 2".into() })
			.await;
		engine.gate.add_permits(1);

		let result = profiler.await.unwrap();
		assert_eq!(result.status, ActionStatus::Success);
		let derived = service.state().stores().derived_models.get_by_id(&id).unwrap();
		assert!(derived.profile.is_empty(), "stale run must not publish columns");
		assert!(!derived.profiled);
	}

	#[tokio::test]
	async fn add_table_import_failure_creates_no_records() {
		let engine = FakeEngine::new();
		engine.fail_on("import_file");
		let service = service_with(engine);

		let result = service
			.dispatch(ServiceAction::AddTable { name: "sales".into(), path: "data/sales.parquet".into() })
			.await;
		assert_eq!(result.failure_kind(), Some(FailureKind::ImportFailed));
		assert!(service.state().stores().persistent_tables.current().entities.is_empty());
	}

	#[tokio::test]
	async fn reimport_keeps_table_id() {
		let service = service_with(FakeEngine::new());
		service
			.dispatch(ServiceAction::AddTable { name: "sales".into(), path: "a.parquet".into() })
			.await;
		let first = service.state().stores().persistent_tables.get_by_name("sales").unwrap().id;
		service
			.dispatch(ServiceAction::AddTable { name: "sales".into(), path: "b.parquet".into() })
			.await;
		let table = service.state().stores().persistent_tables.get_by_name("sales").unwrap();
		assert_eq!(table.id, first);
		assert_eq!(table.path, "b.parquet");
	}

	#[tokio::test]
	async fn delete_model_clears_focus_and_twin() {
		let service = service_with(FakeEngine::new());
		service
			.dispatch(ServiceAction::AddModel { name: "orders".into(), query: String::new() })
			.await;
		let id = model_id(&service, "orders.sql");

		let result = service.dispatch(ServiceAction::DeleteModel { id: id.clone() }).await;
		assert_eq!(result.status, ActionStatus::Success);
		let stores = service.state().stores();
		assert_eq!(stores.persistent_models.get_by_id(&id), None);
		assert_eq!(stores.derived_models.get_by_id(&id), None);
		assert_eq!(stores.application.get_by_id("application").unwrap().active_entity, None);
	}

	#[tokio::test]
	async fn set_active_entity_requires_existing_record() {
		let service = service_with(FakeEngine::new());
		let result = service
			.dispatch(ServiceAction::SetActiveEntity { entity_type: EntityType::Model, id: "ghost".into() })
			.await;
		assert_eq!(result.failure_kind(), Some(FailureKind::EntityNotFound));
	}

	#[test]
	fn model_suffix_is_appended_once() {
		assert_eq!(with_model_suffix("orders"), "orders.sql");
		assert_eq!(with_model_suffix("orders.sql"), "orders.sql");
	}
}
