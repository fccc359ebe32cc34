//! Entity records and the two-axis store classification.
//!
//! Entity-kinds model distinct domain objects (imported tables, derived
//! models, the application singleton); state-kinds distinguish the durable,
//! file-backed representation of a logical entity from its recomputed,
//! ephemeral profile. Both representations of one logical entity share an id.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Domain object classification for a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
	/// An imported data source.
	Table,
	/// A SQL model derived from sources.
	Model,
	/// The application-level singleton.
	Application,
}

/// Durability classification for a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateType {
	/// Durable, possibly file-backed state.
	Persistent,
	/// Recomputed, ephemeral state (profiling results).
	Derived,
}

/// Identifies one store: which domain object, which representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoreKey {
	/// Domain object axis.
	pub entity_type: EntityType,
	/// Durability axis.
	pub state_type: StateType,
}

impl StoreKey {
	/// Creates a store key.
	#[must_use]
	pub const fn new(entity_type: EntityType, state_type: StateType) -> Self {
		Self { entity_type, state_type }
	}
}

impl std::fmt::Display for StoreKey {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{:?}/{:?}", self.entity_type, self.state_type)
	}
}

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn unix_millis() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_millis() as u64)
		.unwrap_or(0)
}

/// A record owned by one entity store.
///
/// Ids are opaque, stable for the lifetime of the process and never reused
/// after deletion. `last_updated` is stamped by the store on every mutation
/// that changes the record.
pub trait EntityRecord {
	/// Stable opaque identity.
	fn id(&self) -> &str;

	/// Declared name, when the record has one. Used for lookup-by-field.
	fn name(&self) -> Option<&str> {
		None
	}

	/// Logical update time in Unix milliseconds.
	fn last_updated(&self) -> u64;

	/// Stamps the logical update time.
	fn touch(&mut self, now_ms: u64);
}

/// One entry of a categorical top-k summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopKEntry {
	/// The value.
	pub value: serde_json::Value,
	/// Occurrences of the value.
	pub count: u64,
}

/// One bucket of a numeric histogram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramBin {
	/// Bucket ordinal.
	pub bucket: u32,
	/// Inclusive lower bound.
	pub low: f64,
	/// Exclusive upper bound.
	pub high: f64,
	/// Rows in the bucket.
	pub count: u64,
}

/// Descriptive statistics for a numeric column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericStatistics {
	/// Minimum value.
	pub min: f64,
	/// Maximum value.
	pub max: f64,
	/// Arithmetic mean.
	pub mean: f64,
	/// 25th percentile.
	pub q25: f64,
	/// Median.
	pub q50: f64,
	/// 75th percentile.
	pub q75: f64,
	/// Standard deviation.
	pub sd: f64,
}

/// Column summary produced by one analytic lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnSummary {
	/// Top-k values and distinct count for categorical/boolean columns.
	Categorical {
		/// Most frequent values.
		top_k: Vec<TopKEntry>,
		/// Distinct value count.
		cardinality: u64,
	},
	/// Histogram and optional statistics for numeric columns.
	Numeric {
		/// Equal-width histogram.
		histogram: Vec<HistogramBin>,
		/// Descriptive statistics, filled by a separate lookup.
		statistics: Option<NumericStatistics>,
	},
	/// Observed range for timestamp columns.
	TimeRange {
		/// Earliest observed value (ISO 8601).
		min: String,
		/// Latest observed value (ISO 8601).
		max: String,
	},
}

/// Profiling state of one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileColumn {
	/// Column name.
	pub name: String,
	/// Engine type name (e.g. `VARCHAR`, `BIGINT`, `TIMESTAMP`).
	pub col_type: String,
	/// Summary from the type-appropriate lookup, once collected.
	pub summary: Option<ColumnSummary>,
	/// Null count, once collected.
	pub null_count: Option<u64>,
}

impl ProfileColumn {
	/// Creates an unprofiled column.
	#[must_use]
	pub fn new(name: impl Into<String>, col_type: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			col_type: col_type.into(),
			summary: None,
			null_count: None,
		}
	}
}

/// Durable record of an imported data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistentTable {
	/// Stable identity.
	pub id: String,
	/// Declared source name.
	pub name: String,
	/// Path of the imported file.
	pub path: String,
	/// Logical update time (Unix ms).
	pub last_updated: u64,
}

impl EntityRecord for PersistentTable {
	fn id(&self) -> &str {
		&self.id
	}

	fn name(&self) -> Option<&str> {
		Some(&self.name)
	}

	fn last_updated(&self) -> u64 {
		self.last_updated
	}

	fn touch(&mut self, now_ms: u64) {
		self.last_updated = now_ms;
	}
}

/// Profiling results for an imported data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedTable {
	/// Shared with the persistent record.
	pub id: String,
	/// Per-column profiling state.
	pub profile: Vec<ProfileColumn>,
	/// Row count, once estimated.
	pub cardinality: Option<u64>,
	/// True once every column lookup has settled.
	pub profiled: bool,
	/// Logical update time (Unix ms).
	pub last_updated: u64,
}

impl EntityRecord for DerivedTable {
	fn id(&self) -> &str {
		&self.id
	}

	fn last_updated(&self) -> u64 {
		self.last_updated
	}

	fn touch(&mut self, now_ms: u64) {
		self.last_updated = now_ms;
	}
}

/// Durable record of a SQL model. The query text is mirrored to a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistentModel {
	/// Stable identity.
	pub id: String,
	/// Declared name; also the file name on disk.
	pub name: String,
	/// Model query text; also the file content on disk.
	pub query: String,
	/// Logical update time (Unix ms). Compared against the file's mtime
	/// during reconciliation.
	pub last_updated: u64,
}

impl EntityRecord for PersistentModel {
	fn id(&self) -> &str {
		&self.id
	}

	fn name(&self) -> Option<&str> {
		Some(&self.name)
	}

	fn last_updated(&self) -> u64 {
		self.last_updated
	}

	fn touch(&mut self, now_ms: u64) {
		self.last_updated = now_ms;
	}
}

/// Profiling results for a SQL model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedModel {
	/// Shared with the persistent record.
	pub id: String,
	/// Per-column profiling state for the model's result shape.
	pub profile: Vec<ProfileColumn>,
	/// Result row count, once estimated.
	pub cardinality: Option<u64>,
	/// Last query failure, if any.
	pub error: Option<String>,
	/// True once every column lookup has settled.
	pub profiled: bool,
	/// Bumped whenever the owning query changes; analytic completions
	/// enqueued against an older revision are stale and must be discarded.
	pub profile_revision: u64,
	/// Logical update time (Unix ms).
	pub last_updated: u64,
}

impl EntityRecord for DerivedModel {
	fn id(&self) -> &str {
		&self.id
	}

	fn last_updated(&self) -> u64 {
		self.last_updated
	}

	fn touch(&mut self, now_ms: u64) {
		self.last_updated = now_ms;
	}
}

/// Application run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppStatus {
	/// No action in flight.
	Idle,
	/// At least one action in flight.
	Running,
}

/// Reference to the entity currently focused by the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveEntity {
	/// Domain object axis of the focused entity.
	pub entity_type: EntityType,
	/// Id of the focused entity.
	pub id: String,
}

/// The application-level singleton record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationRecord {
	/// Always `"application"`.
	pub id: String,
	/// Currently focused entity, if any.
	pub active_entity: Option<ActiveEntity>,
	/// Run status.
	pub status: AppStatus,
	/// Logical update time (Unix ms).
	pub last_updated: u64,
}

impl Default for ApplicationRecord {
	fn default() -> Self {
		Self {
			id: "application".to_owned(),
			active_entity: None,
			status: AppStatus::Idle,
			last_updated: 0,
		}
	}
}

impl EntityRecord for ApplicationRecord {
	fn id(&self) -> &str {
		&self.id
	}

	fn last_updated(&self) -> u64 {
		self.last_updated
	}

	fn touch(&mut self, now_ms: u64) {
		self.last_updated = now_ms;
	}
}
