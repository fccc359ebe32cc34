//! Structured action outcomes returned to the originating caller.

use serde::{Deserialize, Serialize};

/// Whether the action as a whole succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
	/// Action completed.
	Success,
	/// Action failed; see the messages for the kind.
	Failure,
}

/// Enumerated failure classification, so remote subscribers branch on a tag
/// rather than on message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
	/// Anything without a more specific tag (including unknown actions).
	Unknown,
	/// The referenced entity does not exist.
	EntityNotFound,
	/// An entity with the same name already exists.
	DuplicateEntity,
	/// Source import failed.
	ImportFailed,
	/// Model query validation or execution failed.
	QueryFailed,
	/// The underlying lookup was cancelled.
	Cancelled,
}

/// One message attached to an action result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionMessage {
	/// Failure classification; `None` for informational messages.
	pub kind: Option<FailureKind>,
	/// Human-readable text.
	pub text: String,
	/// Backtrace-ish context, when one exists.
	pub stack: Option<String>,
}

/// Outcome of one dispatched service action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
	/// Overall status.
	pub status: ActionStatus,
	/// Attached messages, failure first.
	pub messages: Vec<ActionMessage>,
}

impl ActionResult {
	/// A success with no messages.
	#[must_use]
	pub fn success() -> Self {
		Self {
			status: ActionStatus::Success,
			messages: Vec::new(),
		}
	}

	/// A success carrying one informational message.
	#[must_use]
	pub fn info(text: impl Into<String>) -> Self {
		Self {
			status: ActionStatus::Success,
			messages: vec![ActionMessage {
				kind: None,
				text: text.into(),
				stack: None,
			}],
		}
	}

	/// A failure with the given kind and text.
	#[must_use]
	pub fn failure(kind: FailureKind, text: impl Into<String>) -> Self {
		Self {
			status: ActionStatus::Failure,
			messages: vec![ActionMessage {
				kind: Some(kind),
				text: text.into(),
				stack: None,
			}],
		}
	}

	/// True when the action failed.
	#[must_use]
	pub fn is_failure(&self) -> bool {
		self.status == ActionStatus::Failure
	}

	/// The first failure kind, when the action failed.
	#[must_use]
	pub fn failure_kind(&self) -> Option<FailureKind> {
		self.messages.iter().find_map(|m| m.kind)
	}
}
