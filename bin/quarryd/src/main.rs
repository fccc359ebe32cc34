//! Standalone modeler state server.
//!
//! Hosts the entity stores, the file reconciliation loop, and a line-JSON
//! session endpoint. Runs against a stub analytic engine until a real
//! database binding is attached.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use quarry_channel::ChannelServer;
use quarry_queue::{AnalyticsEngine, EngineError, PriorityQueue};
use quarry_service::ModelerService;
use quarry_state::StateService;
use quarry_sync::{FileRepository, StateSyncService, SyncConfig};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "quarryd", about = "Data modeler state server")]
struct Args {
	/// Directory holding the project's model files.
	#[arg(long, default_value = "models")]
	dir: PathBuf,

	/// Listen address for modeler sessions.
	#[arg(long, default_value = "127.0.0.1:8090")]
	listen: SocketAddr,

	/// Quiet window for coalesced profile updates, in milliseconds.
	#[arg(long, default_value_t = 250)]
	quiet_window_ms: u64,

	/// Interval between file reconciliation passes, in milliseconds.
	#[arg(long, default_value_t = 500)]
	sync_interval_ms: u64,

	/// Disable the file reconciliation loop.
	#[arg(long)]
	no_sync: bool,
}

/// Engine stand-in: accepts queries and imports, reports empty schemas.
/// Keeps the modeling surface usable with no database attached.
struct StubEngine;

#[async_trait]
impl AnalyticsEngine for StubEngine {
	async fn execute(&self, operation: &str, _args: Value) -> Result<Value, EngineError> {
		match operation {
			"validate_query" | "import_file" => Ok(Value::Null),
			"get_schema" => Ok(json!([])),
			"row_count" | "null_count" => Ok(json!(0)),
			_ => Err(EngineError::Unsupported(operation.to_owned())),
		}
	}
}

#[tokio::main]
async fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
		.init();
	if let Err(error) = run(Args::parse()).await {
		tracing::error!(%error, "server.fatal");
		std::process::exit(1);
	}
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
	let state = Arc::new(StateService::new(Duration::from_millis(args.quiet_window_ms)));
	let queue = PriorityQueue::new(Arc::new(StubEngine));
	let service = ModelerService::new(state, queue);

	let repo = FileRepository::new(&args.dir)?;
	let sync = Arc::new(StateSyncService::new(
		service.clone(),
		repo,
		SyncConfig {
			auto_sync: !args.no_sync,
			interval: Duration::from_millis(args.sync_interval_ms),
		},
	));
	let sync_task = sync.start();

	let listener = TcpListener::bind(args.listen).await?;
	tracing::info!(addr = %args.listen, dir = %args.dir.display(), "server.listening");
	let server = ChannelServer::new(service.clone());
	let accept = {
		let server = server.clone();
		tokio::spawn(async move { server.serve(listener).await })
	};

	tokio::signal::ctrl_c().await?;
	tracing::info!("server.shutdown");
	server.shutdown();
	sync.shutdown();
	if let Some(task) = sync_task {
		let _ = task.await;
	}
	service.queue().shutdown();
	accept.await??;
	Ok(())
}
