//! The abstract analytic engine the queue executes against.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Failure of one analytic operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
	/// The engine does not implement the named operation.
	#[error("unsupported analytic operation: {0}")]
	Unsupported(String),

	/// The operation ran and failed.
	#[error("analytic operation {operation} failed: {message}")]
	Failed {
		/// Operation name.
		operation: String,
		/// Engine-reported failure text.
		message: String,
	},
}

/// Executes named analytic operations and returns typed results.
///
/// The concrete engine (and every statistic it computes) lives outside the
/// core; the queue only needs this capability.
#[async_trait]
pub trait AnalyticsEngine: Send + Sync {
	/// Runs one named operation with JSON arguments.
	async fn execute(&self, operation: &str, args: Value) -> Result<Value, EngineError>;
}
