//! Compound actions accepted by the modeler service.

use serde::{Deserialize, Serialize};

use quarry_store::EntityType;

/// A compound action dispatched by a caller.
///
/// Entity references use ids except where an action exists specifically to
/// create the entity, in which case the caller supplies a name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ServiceAction {
	/// Import a source table from a file path.
	AddTable {
		/// Display name for the table.
		name: String,
		/// Path of the source file to import.
		path: String,
	},
	/// Create a new model with a caller-chosen name.
	AddModel {
		/// Requested model name; a `.sql` suffix is appended when absent.
		name: String,
		/// Initial query text, usually empty.
		query: String,
	},
	/// Create a model whose exact name is already fixed by a file on disk.
	CreateModelFromFile {
		/// Exact model name, suffix included.
		name: String,
		/// Query text read from the file.
		query: String,
	},
	/// Replace a model's query and re-profile it.
	UpdateModelQuery {
		/// Model id.
		id: String,
		/// New query text.
		query: String,
	},
	/// Rename a model.
	RenameModel {
		/// Model id.
		id: String,
		/// New name; a `.sql` suffix is appended when absent.
		name: String,
	},
	/// Delete a model and its derived record.
	DeleteModel {
		/// Model id.
		id: String,
	},
	/// Record which entity the interface is focused on.
	SetActiveEntity {
		/// Entity type of the focused entity.
		entity_type: EntityType,
		/// Entity id.
		id: String,
	},
	/// Re-run the profiling fan-out for a model.
	ProfileModel {
		/// Model id.
		id: String,
	},
	/// Re-run the profiling fan-out for a table.
	ProfileTable {
		/// Table id.
		id: String,
	},
}

impl ServiceAction {
	/// Stable name of the action variant, for logging.
	#[must_use]
	pub fn name(&self) -> &'static str {
		match self {
			Self::AddTable { .. } => "add_table",
			Self::AddModel { .. } => "add_model",
			Self::CreateModelFromFile { .. } => "create_model_from_file",
			Self::UpdateModelQuery { .. } => "update_model_query",
			Self::RenameModel { .. } => "rename_model",
			Self::DeleteModel { .. } => "delete_model",
			Self::SetActiveEntity { .. } => "set_active_entity",
			Self::ProfileModel { .. } => "profile_model",
			Self::ProfileTable { .. } => "profile_table",
		}
	}
}
