//! Column type classification and engine result parsing.
//!
//! The analytic engine reports column types as raw SQL type names. Profiling
//! picks the summary lookup per column from the type's class, so the class
//! mapping lives here in one place.

use quarry_store::{ColumnSummary, HistogramBin, NumericStatistics, ProfileColumn, TopKEntry};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Summary class of a SQL column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeClass {
	/// Integer and floating types; summarized by histogram and statistics.
	Numeric,
	/// Text and boolean types; summarized by top-k and cardinality.
	Categorical,
	/// Date and time types; summarized by observed range.
	Timestamp,
	/// Anything else; only null counts are collected.
	Other,
}

const INTEGERS: &[&str] = &[
	"BIGINT", "HUGEINT", "SMALLINT", "INTEGER", "TINYINT", "UBIGINT", "UINTEGER", "USMALLINT", "UTINYINT",
	"INT", "INT1", "INT2", "INT4", "INT8", "SHORT", "SIGNED", "LONG",
];

const FLOATS: &[&str] = &["DOUBLE", "FLOAT", "FLOAT4", "FLOAT8", "REAL", "NUMERIC", "DECIMAL"];

const CATEGORICALS: &[&str] = &[
	"VARCHAR", "CHAR", "BPCHAR", "TEXT", "STRING", "UUID", "BOOLEAN", "BOOL", "LOGICAL",
];

const TIMESTAMPS: &[&str] = &["TIMESTAMP", "TIMESTAMPTZ", "DATETIME", "DATE", "TIME"];

/// Classifies a raw engine type name.
///
/// Parameterized types (`DECIMAL(18,3)`) classify by their base name; unknown
/// types fall through to [`TypeClass::Other`].
#[must_use]
pub fn classify(col_type: &str) -> TypeClass {
	let base = col_type.split('(').next().unwrap_or(col_type).trim().to_ascii_uppercase();
	if INTEGERS.contains(&base.as_str()) || FLOATS.contains(&base.as_str()) {
		TypeClass::Numeric
	} else if CATEGORICALS.contains(&base.as_str()) {
		TypeClass::Categorical
	} else if TIMESTAMPS.contains(&base.as_str()) {
		TypeClass::Timestamp
	} else {
		TypeClass::Other
	}
}

/// Error decoding an engine lookup result.
#[derive(Debug, Error)]
pub enum DecodeError {
	/// The result did not match the expected shape.
	#[error("malformed {operation} result: {source}")]
	Shape {
		/// Which lookup produced the value.
		operation: &'static str,
		/// Underlying decode failure.
		#[source]
		source: serde_json::Error,
	},
}

fn shape(operation: &'static str) -> impl FnOnce(serde_json::Error) -> DecodeError {
	move |source| DecodeError::Shape { operation, source }
}

#[derive(Deserialize)]
struct SchemaColumn {
	name: String,
	#[serde(rename = "type")]
	col_type: String,
}

/// Decodes a `get_schema` result into unprofiled columns.
pub fn decode_schema(value: Value) -> Result<Vec<ProfileColumn>, DecodeError> {
	let columns: Vec<SchemaColumn> = serde_json::from_value(value).map_err(shape("get_schema"))?;
	Ok(columns
		.into_iter()
		.map(|c| ProfileColumn::new(c.name, c.col_type))
		.collect())
}

#[derive(Deserialize)]
struct TopKResult {
	top_k: Vec<TopKEntry>,
	cardinality: u64,
}

/// Decodes a `top_k_and_cardinality` result.
pub fn decode_top_k(value: Value) -> Result<ColumnSummary, DecodeError> {
	let result: TopKResult = serde_json::from_value(value).map_err(shape("top_k_and_cardinality"))?;
	Ok(ColumnSummary::Categorical {
		top_k: result.top_k,
		cardinality: result.cardinality,
	})
}

/// Decodes a `numeric_histogram` result.
pub fn decode_histogram(value: Value) -> Result<ColumnSummary, DecodeError> {
	let histogram: Vec<HistogramBin> = serde_json::from_value(value).map_err(shape("numeric_histogram"))?;
	Ok(ColumnSummary::Numeric { histogram, statistics: None })
}

/// Decodes a `descriptive_statistics` result.
pub fn decode_statistics(value: Value) -> Result<NumericStatistics, DecodeError> {
	serde_json::from_value(value).map_err(shape("descriptive_statistics"))
}

#[derive(Deserialize)]
struct TimeRangeResult {
	min: String,
	max: String,
}

/// Decodes a `time_range` result.
pub fn decode_time_range(value: Value) -> Result<ColumnSummary, DecodeError> {
	let range: TimeRangeResult = serde_json::from_value(value).map_err(shape("time_range"))?;
	Ok(ColumnSummary::TimeRange { min: range.min, max: range.max })
}

/// Decodes a bare count result (`null_count`, `row_count`).
pub fn decode_count(operation: &'static str, value: Value) -> Result<u64, DecodeError> {
	serde_json::from_value(value).map_err(shape(operation))
}
