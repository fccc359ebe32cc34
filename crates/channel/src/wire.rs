//! Messages exchanged over a session, one JSON object per line.

use quarry_service::{ActionResult, ServiceAction};
use quarry_store::{Patch, StoreKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One store's full state at connect time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSnapshot {
	/// Which store.
	pub key: StoreKey,
	/// Serialized [`quarry_store::EntityState`].
	pub state: Value,
}

/// Client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
	/// Execute a compound action. The token, when present, asks for an
	/// acknowledgement on this session once the action settles.
	Action {
		/// Caller-chosen correlation token.
		#[serde(default)]
		token: Option<String>,
		/// The action to execute.
		payload: ServiceAction,
	},
	/// Usage telemetry. Logged server-side, never broadcast.
	Telemetry {
		/// Event name.
		event: String,
		/// Free-form event fields.
		#[serde(default)]
		fields: Value,
	},
}

/// Server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
	/// First message of every session: one snapshot per store.
	InitialSnapshot {
		/// All stores, in bootstrap order.
		stores: Vec<StoreSnapshot>,
	},
	/// One store mutation, in emission order.
	Patch {
		/// Which store the ops apply to.
		key: StoreKey,
		/// The mutation.
		ops: Patch,
	},
	/// Outcome of a tokened action, sent only to the originating session.
	ActionAck {
		/// The caller's correlation token.
		token: String,
		/// The action outcome.
		result: ActionResult,
	},
}
