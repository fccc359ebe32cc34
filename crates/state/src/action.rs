//! The closed set of state actions and their dispatch metadata.
//!
//! Every mutation of an entity store flows through one of these variants.
//! The dispatcher holds no business logic: it resolves the target store from
//! the action and hands the payload to the registered handler.

use quarry_store::{ActiveEntity, AppStatus, ColumnSummary, EntityType, ProfileColumn, StateType, StoreKey};
use thiserror::Error;

/// Error raised by a handler while applying an action to a draft.
///
/// Always recovered by the dispatcher: logged, action dropped.
#[derive(Debug, Error)]
pub enum ApplyError {
	/// The action referenced an id with no record in the target store.
	#[error("entity not found: {0}")]
	EntityNotFound(String),
}

/// Discriminant of a [`StateAction`], used as the handler-table key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum ActionKind {
	AddTable,
	DeleteTable,
	AddDerivedTable,
	DeleteDerivedTable,
	SetTableProfile,
	AddModel,
	AddDerivedModel,
	UpdateModelQuery,
	RenameModel,
	DeleteModel,
	DeleteDerivedModel,
	SetModelProfile,
	SetModelError,
	ResetModelProfile,
	UpdateColumnSummary,
	UpdateNullCount,
	UpdateCardinality,
	MarkProfiled,
	SetActiveEntity,
	SetAppStatus,
}

impl std::fmt::Display for ActionKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{self:?}")
	}
}

/// One state mutation with its typed payload.
#[derive(Debug, Clone)]
pub enum StateAction {
	/// Creates (or refreshes) an imported source record.
	AddTable {
		/// New record id.
		id: String,
		/// Declared source name.
		name: String,
		/// Imported file path.
		path: String,
	},
	/// Removes an imported source record.
	DeleteTable {
		/// Record id.
		id: String,
	},
	/// Creates the derived twin of an imported source.
	AddDerivedTable {
		/// Shared id.
		id: String,
	},
	/// Removes the derived twin of an imported source.
	DeleteDerivedTable {
		/// Shared id.
		id: String,
	},
	/// Replaces the column list of a source profile.
	SetTableProfile {
		/// Record id.
		id: String,
		/// Fresh, unsummarized columns.
		profile: Vec<ProfileColumn>,
		/// Row count, when already known.
		cardinality: Option<u64>,
	},
	/// Creates a model record.
	AddModel {
		/// New record id.
		id: String,
		/// Declared name (also the file name).
		name: String,
		/// Query text.
		query: String,
	},
	/// Creates the derived twin of a model.
	AddDerivedModel {
		/// Shared id.
		id: String,
	},
	/// Replaces a model's query text.
	UpdateModelQuery {
		/// Record id.
		id: String,
		/// New query text.
		query: String,
	},
	/// Renames a model (and thereby its file).
	RenameModel {
		/// Record id.
		id: String,
		/// New declared name.
		name: String,
	},
	/// Removes a model record.
	DeleteModel {
		/// Record id.
		id: String,
	},
	/// Removes the derived twin of a model.
	DeleteDerivedModel {
		/// Shared id.
		id: String,
	},
	/// Replaces the column list of a model profile.
	SetModelProfile {
		/// Record id.
		id: String,
		/// Fresh, unsummarized columns.
		profile: Vec<ProfileColumn>,
		/// Result row count, when already known.
		cardinality: Option<u64>,
	},
	/// Records or clears a model's query failure.
	SetModelError {
		/// Record id.
		id: String,
		/// Failure text, `None` to clear.
		error: Option<String>,
	},
	/// Clears a model profile and bumps its revision, invalidating in-flight
	/// lookups enqueued against the previous query.
	ResetModelProfile {
		/// Record id.
		id: String,
	},
	/// Stores one column's summary (throttled). Dropped at apply time when
	/// the record's revision has moved past the run that collected it.
	UpdateColumnSummary {
		/// Which derived store.
		entity_type: EntityType,
		/// Owning record id.
		id: String,
		/// Column name.
		column: String,
		/// Collected summary.
		summary: ColumnSummary,
		/// Revision of the profiling run that collected the summary, `None`
		/// when the target does not track revisions.
		revision: Option<u64>,
	},
	/// Stores one column's null count (throttled). Dropped at apply time when
	/// the record's revision has moved past the run that collected it.
	UpdateNullCount {
		/// Which derived store.
		entity_type: EntityType,
		/// Owning record id.
		id: String,
		/// Column name.
		column: String,
		/// Collected null count.
		null_count: u64,
		/// Revision of the profiling run that collected the count, `None`
		/// when the target does not track revisions.
		revision: Option<u64>,
	},
	/// Stores a derived record's cardinality.
	UpdateCardinality {
		/// Which derived store.
		entity_type: EntityType,
		/// Owning record id.
		id: String,
		/// Row count.
		cardinality: u64,
	},
	/// Marks a derived record as fully profiled.
	MarkProfiled {
		/// Which derived store.
		entity_type: EntityType,
		/// Owning record id.
		id: String,
	},
	/// Sets or clears the focused entity.
	SetActiveEntity {
		/// New focus, `None` to clear.
		active: Option<ActiveEntity>,
	},
	/// Sets the application run status.
	SetAppStatus {
		/// New status.
		status: AppStatus,
	},
}

impl StateAction {
	/// The handler-table key for this action.
	#[must_use]
	pub fn kind(&self) -> ActionKind {
		match self {
			Self::AddTable { .. } => ActionKind::AddTable,
			Self::DeleteTable { .. } => ActionKind::DeleteTable,
			Self::AddDerivedTable { .. } => ActionKind::AddDerivedTable,
			Self::DeleteDerivedTable { .. } => ActionKind::DeleteDerivedTable,
			Self::SetTableProfile { .. } => ActionKind::SetTableProfile,
			Self::AddModel { .. } => ActionKind::AddModel,
			Self::AddDerivedModel { .. } => ActionKind::AddDerivedModel,
			Self::UpdateModelQuery { .. } => ActionKind::UpdateModelQuery,
			Self::RenameModel { .. } => ActionKind::RenameModel,
			Self::DeleteModel { .. } => ActionKind::DeleteModel,
			Self::DeleteDerivedModel { .. } => ActionKind::DeleteDerivedModel,
			Self::SetModelProfile { .. } => ActionKind::SetModelProfile,
			Self::SetModelError { .. } => ActionKind::SetModelError,
			Self::ResetModelProfile { .. } => ActionKind::ResetModelProfile,
			Self::UpdateColumnSummary { .. } => ActionKind::UpdateColumnSummary,
			Self::UpdateNullCount { .. } => ActionKind::UpdateNullCount,
			Self::UpdateCardinality { .. } => ActionKind::UpdateCardinality,
			Self::MarkProfiled { .. } => ActionKind::MarkProfiled,
			Self::SetActiveEntity { .. } => ActionKind::SetActiveEntity,
			Self::SetAppStatus { .. } => ActionKind::SetAppStatus,
		}
	}

	/// The store this action mutates, resolved from static metadata or, for
	/// profile updates, from the payload's entity kind.
	#[must_use]
	pub fn target(&self) -> StoreKey {
		match self {
			Self::AddTable { .. } | Self::DeleteTable { .. } => {
				StoreKey::new(EntityType::Table, StateType::Persistent)
			}
			Self::AddDerivedTable { .. } | Self::DeleteDerivedTable { .. } | Self::SetTableProfile { .. } => {
				StoreKey::new(EntityType::Table, StateType::Derived)
			}
			Self::AddModel { .. }
			| Self::UpdateModelQuery { .. }
			| Self::RenameModel { .. }
			| Self::DeleteModel { .. } => StoreKey::new(EntityType::Model, StateType::Persistent),
			Self::AddDerivedModel { .. }
			| Self::DeleteDerivedModel { .. }
			| Self::SetModelProfile { .. }
			| Self::SetModelError { .. }
			| Self::ResetModelProfile { .. } => StoreKey::new(EntityType::Model, StateType::Derived),
			Self::UpdateColumnSummary { entity_type, .. }
			| Self::UpdateNullCount { entity_type, .. }
			| Self::UpdateCardinality { entity_type, .. }
			| Self::MarkProfiled { entity_type, .. } => StoreKey::new(*entity_type, StateType::Derived),
			Self::SetActiveEntity { .. } | Self::SetAppStatus { .. } => {
				StoreKey::new(EntityType::Application, StateType::Persistent)
			}
		}
	}

	/// Whether the action rides the update batcher instead of mutating its
	/// store immediately. Only the profiling burst is throttled.
	#[must_use]
	pub fn throttled(&self) -> bool {
		matches!(self, Self::UpdateColumnSummary { .. } | Self::UpdateNullCount { .. })
	}
}
