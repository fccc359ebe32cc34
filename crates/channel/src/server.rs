//! Session acceptance and the per-session pump.

use std::io;

use quarry_service::{ActionResult, FailureKind, ModelerService};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::wire::{ClientMessage, ServerMessage, StoreSnapshot};

/// Accepts sessions and pumps each one until disconnect or shutdown.
///
/// Cheap to clone; clones share the service and the shutdown token.
#[derive(Clone)]
pub struct ChannelServer {
	service: ModelerService,
	shutdown: CancellationToken,
}

impl ChannelServer {
	/// Creates a server over the given modeler service.
	#[must_use]
	pub fn new(service: ModelerService) -> Self {
		Self {
			service,
			shutdown: CancellationToken::new(),
		}
	}

	/// Asks every session and the accept loop to wind down.
	pub fn shutdown(&self) {
		self.shutdown.cancel();
	}

	/// Accept loop. Each connection runs as its own task; a session failure
	/// closes that session only.
	pub async fn serve(&self, listener: TcpListener) -> io::Result<()> {
		loop {
			let (stream, addr) = tokio::select! {
				() = self.shutdown.cancelled() => return Ok(()),
				accepted = listener.accept() => accepted?,
			};
			tracing::info!(%addr, "channel.session.connected");
			let server = self.clone();
			tokio::spawn(async move {
				let (read, write) = stream.into_split();
				if let Err(error) = server.run_session(BufReader::new(read), write).await {
					tracing::debug!(%addr, %error, "channel.session.failed");
				}
				tracing::info!(%addr, "channel.session.closed");
			});
		}
	}

	/// Pumps one session: snapshot first, then patches as they are emitted,
	/// interleaved with client messages.
	pub async fn run_session<R, W>(&self, reader: R, mut writer: W) -> io::Result<()>
	where
		R: AsyncBufRead + Unpin,
		W: AsyncWrite + Unpin,
	{
		// Subscribe before snapshotting so no patch can fall in between.
		let mut patches = self.service.state().subscribe();
		let stores = self
			.service
			.state()
			.snapshots()
			.into_iter()
			.map(|(key, state)| StoreSnapshot { key, state })
			.collect();
		send(&mut writer, &ServerMessage::InitialSnapshot { stores }).await?;

		let mut lines = reader.lines();
		loop {
			tokio::select! {
				() = self.shutdown.cancelled() => break,
				patch = patches.recv() => {
					let Some(patch) = patch else { break };
					send(&mut writer, &ServerMessage::Patch { key: patch.key, ops: patch.ops }).await?;
				}
				line = lines.next_line() => {
					let Some(line) = line? else { break };
					if line.trim().is_empty() {
						continue;
					}
					if let Some(reply) = self.handle_line(&line).await {
						send(&mut writer, &reply).await?;
					}
				}
			}
		}
		Ok(())
	}

	async fn handle_line(&self, line: &str) -> Option<ServerMessage> {
		match serde_json::from_str::<ClientMessage>(line) {
			Ok(ClientMessage::Action { token, payload }) => {
				let result = self.service.dispatch(payload).await;
				token.map(|token| ServerMessage::ActionAck { token, result })
			}
			Ok(ClientMessage::Telemetry { event, fields }) => {
				tracing::info!(%event, %fields, "channel.telemetry");
				None
			}
			Err(error) => {
				// Unknown action name or malformed message. Ack the failure
				// when a token can still be recovered, otherwise just log.
				let token = serde_json::from_str::<Value>(line)
					.ok()
					.and_then(|v| v.get("token").and_then(Value::as_str).map(str::to_owned));
				match token {
					Some(token) => Some(ServerMessage::ActionAck {
						token,
						result: ActionResult::failure(FailureKind::Unknown, error.to_string()),
					}),
					None => {
						tracing::warn!(%error, "channel.message.malformed");
						None
					}
				}
			}
		}
	}
}

async fn send<W>(writer: &mut W, message: &ServerMessage) -> io::Result<()>
where
	W: AsyncWrite + Unpin,
{
	let mut line = serde_json::to_vec(message).map_err(io::Error::other)?;
	line.push(b'\n');
	writer.write_all(&line).await?;
	writer.flush().await
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;
	use std::time::Duration;

	use async_trait::async_trait;
	use pretty_assertions::assert_eq;
	use quarry_queue::{AnalyticsEngine, EngineError, PriorityQueue};
	use quarry_service::{ActionStatus, ServiceConfig};
	use quarry_state::StateService;
	use quarry_store::{EntityType, StateType, StoreKey};
	use tokio::io::{AsyncBufReadExt, DuplexStream, Lines, ReadHalf, WriteHalf};
	use tokio::task::JoinHandle;

	use super::*;

	struct AcceptAllEngine;

	#[async_trait]
	impl AnalyticsEngine for AcceptAllEngine {
		async fn execute(&self, _operation: &str, _args: Value) -> Result<Value, EngineError> {
			Ok(Value::Null)
		}
	}

	fn server() -> ChannelServer {
		let state = Arc::new(StateService::new(Duration::from_millis(250)));
		let queue = PriorityQueue::new(Arc::new(AcceptAllEngine));
		let service = quarry_service::ModelerService::with_config(
			state,
			queue,
			ServiceConfig { profile_with_update: false },
		);
		ChannelServer::new(service)
	}

	struct Session {
		lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
		writer: WriteHalf<DuplexStream>,
		_pump: JoinHandle<io::Result<()>>,
	}

	impl Session {
		fn open(server: &ChannelServer) -> Self {
			let (client, remote) = tokio::io::duplex(16 * 1024);
			let (remote_read, remote_write) = tokio::io::split(remote);
			let pump = {
				let server = server.clone();
				tokio::spawn(async move { server.run_session(BufReader::new(remote_read), remote_write).await })
			};
			let (client_read, client_write) = tokio::io::split(client);
			Self {
				lines: BufReader::new(client_read).lines(),
				writer: client_write,
				_pump: pump,
			}
		}

		async fn recv(&mut self) -> ServerMessage {
			let line = self.lines.next_line().await.unwrap().expect("session closed");
			serde_json::from_str(&line).unwrap()
		}

		async fn send_raw(&mut self, line: &str) {
			self.writer.write_all(line.as_bytes()).await.unwrap();
			self.writer.write_all(b"\n").await.unwrap();
			self.writer.flush().await.unwrap();
		}

		async fn send(&mut self, message: &ClientMessage) {
			self.send_raw(&serde_json::to_string(message).unwrap()).await;
		}
	}

	fn add_model_action(token: Option<&str>, name: &str) -> ClientMessage {
		ClientMessage::Action {
			token: token.map(str::to_owned),
			payload: quarry_service::ServiceAction::AddModel {
				name: name.to_owned(),
				query: "select 1".to_owned(),
			},
		}
	}

	#[tokio::test]
	async fn session_opens_with_full_snapshot() {
		let server = server();
		server
			.service
			.dispatch(quarry_service::ServiceAction::AddModel {
				name: "orders".into(),
				query: String::new(),
			})
			.await;

		let mut session = Session::open(&server);
		let ServerMessage::InitialSnapshot { stores } = session.recv().await else {
			panic!("expected snapshot first");
		};
		assert_eq!(stores.len(), 5);
		let models = stores
			.iter()
			.find(|s| s.key == StoreKey::new(EntityType::Model, StateType::Persistent))
			.unwrap();
		assert_eq!(models.state["entities"][0]["name"], "orders.sql");
	}

	#[tokio::test]
	async fn ack_reaches_only_the_originator_and_patches_reach_all() {
		let server = server();
		let mut alice = Session::open(&server);
		let mut bob = Session::open(&server);
		assert!(matches!(alice.recv().await, ServerMessage::InitialSnapshot { .. }));
		assert!(matches!(bob.recv().await, ServerMessage::InitialSnapshot { .. }));

		alice.send(&add_model_action(Some("t1"), "orders")).await;

		// AddModel touches three stores, so three patches per session; only
		// alice also gets the ack.
		let mut alice_acks = 0;
		let mut alice_patches = 0;
		for _ in 0..4 {
			match alice.recv().await {
				ServerMessage::ActionAck { token, result } => {
					assert_eq!(token, "t1");
					assert_eq!(result.status, ActionStatus::Success);
					alice_acks += 1;
				}
				ServerMessage::Patch { .. } => alice_patches += 1,
				ServerMessage::InitialSnapshot { .. } => panic!("snapshot already consumed"),
			}
		}
		assert_eq!((alice_acks, alice_patches), (1, 3));

		for _ in 0..3 {
			assert!(matches!(bob.recv().await, ServerMessage::Patch { .. }));
		}
	}

	#[tokio::test]
	async fn unknown_action_with_token_is_acked_as_unknown() {
		let server = server();
		let mut session = Session::open(&server);
		assert!(matches!(session.recv().await, ServerMessage::InitialSnapshot { .. }));

		session
			.send_raw(r#"{"type":"action","token":"t9","payload":{"action":"explode"}}"#)
			.await;
		let ServerMessage::ActionAck { token, result } = session.recv().await else {
			panic!("expected an ack");
		};
		assert_eq!(token, "t9");
		assert_eq!(result.failure_kind(), Some(quarry_service::FailureKind::Unknown));
	}

	#[tokio::test]
	async fn telemetry_produces_no_messages() {
		let server = server();
		let mut session = Session::open(&server);
		assert!(matches!(session.recv().await, ServerMessage::InitialSnapshot { .. }));

		session
			.send(&ClientMessage::Telemetry {
				event: "model_opened".into(),
				fields: serde_json::json!({"id": "m0"}),
			})
			.await;
		// The next message a tokened action produces must be its ack, with
		// nothing emitted for the telemetry in between.
		session.send(&add_model_action(Some("t2"), "orders")).await;
		let first = session.recv().await;
		assert!(matches!(first, ServerMessage::ActionAck { .. }), "got {first:?}");
	}
}
