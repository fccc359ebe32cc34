//! The periodic reconciliation pass.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use quarry_service::{ModelerService, ServiceAction};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::repo::{FileRepository, RepoError};

/// Reconciliation cadence and switches.
#[derive(Debug, Clone)]
pub struct SyncConfig {
	/// Run the reconciliation loop automatically. Off, ticks are manual.
	pub auto_sync: bool,
	/// Time between reconciliation passes.
	pub interval: Duration,
}

impl Default for SyncConfig {
	fn default() -> Self {
		Self {
			auto_sync: true,
			interval: Duration::from_millis(500),
		}
	}
}

/// Reconciles the persistent model store with the file repository.
///
/// Each tick walks both sides once. A file strictly newer than its record
/// pulls its content into the record; otherwise the record overwrites the
/// file, so a modification-time tie settles on the in-memory side (the
/// content-equal skip in [`FileRepository::save`] keeps the common tie from
/// touching disk). A file with no record either
/// becomes a new model (never seen before) or is removed from disk (its
/// record existed last tick and was deleted or renamed through the service).
pub struct StateSyncService {
	service: ModelerService,
	repo: FileRepository,
	config: SyncConfig,
	// File name -> record id binding as of the previous tick. Distinguishes
	// a freshly dropped file from one orphaned by a record deletion.
	known: Mutex<HashMap<String, String>>,
	ticking: tokio::sync::Mutex<()>,
	shutdown: CancellationToken,
}

impl StateSyncService {
	/// Creates a sync service over the given modeler service and repository.
	#[must_use]
	pub fn new(service: ModelerService, repo: FileRepository, config: SyncConfig) -> Self {
		Self {
			service,
			repo,
			config,
			known: Mutex::new(HashMap::new()),
			ticking: tokio::sync::Mutex::new(()),
			shutdown: CancellationToken::new(),
		}
	}

	/// The modeler service ticks dispatch through.
	#[must_use]
	pub fn service(&self) -> &ModelerService {
		&self.service
	}

	/// Starts the reconciliation loop. Returns `None` when auto-sync is off.
	pub fn start(self: &Arc<Self>) -> Option<JoinHandle<()>> {
		if !self.config.auto_sync {
			return None;
		}
		let sync = Arc::clone(self);
		Some(tokio::spawn(async move {
			let mut ticker = tokio::time::interval(sync.config.interval);
			ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
			loop {
				tokio::select! {
					() = sync.shutdown.cancelled() => break,
					_ = ticker.tick() => sync.tick().await,
				}
			}
			// Final pass so edits made just before shutdown reach disk.
			sync.tick().await;
		}))
	}

	/// Stops the reconciliation loop after one final pass.
	pub fn shutdown(&self) {
		self.shutdown.cancel();
	}

	/// Runs one reconciliation pass. Overlapping calls collapse: a tick that
	/// finds another in flight returns immediately.
	pub async fn tick(&self) {
		let Ok(_guard) = self.ticking.try_lock() else {
			tracing::trace!("sync.tick.skipped");
			return;
		};
		if let Err(error) = self.reconcile().await {
			tracing::warn!(%error, "sync.tick.failed");
		}
	}

	async fn reconcile(&self) -> Result<(), RepoError> {
		let files = self.repo.list()?;
		let known = self.known.lock().clone();
		let models = self.service.state().stores().persistent_models.current().entities.clone();
		let by_name: HashMap<&str, usize> = models
			.iter()
			.enumerate()
			.map(|(index, model)| (model.name.as_str(), index))
			.collect();

		for file in &files {
			match by_name.get(file.name.as_str()) {
				Some(&index) => {
					let model = &models[index];
					if file.modified_ms > model.last_updated {
						let content = self.repo.read(&file.name)?;
						if content != model.query {
							tracing::debug!(model = %file.name, "sync.model.pulled");
							// A validation failure lands on the record itself.
							self.service
								.dispatch(ServiceAction::UpdateModelQuery {
									id: model.id.clone(),
									query: content,
								})
								.await;
						}
					}
				}
				None if known.contains_key(&file.name) => {
					// The binding broke on the record side; the file is the
					// leftover.
					tracing::debug!(model = %file.name, "sync.file.removed");
					self.repo.remove(&file.name)?;
				}
				None => {
					let content = self.repo.read(&file.name)?;
					tracing::debug!(model = %file.name, "sync.model.created");
					self.service
						.dispatch(ServiceAction::CreateModelFromFile {
							name: file.name.clone(),
							query: content,
						})
						.await;
				}
			}
		}

		// Push side, over the post-pull records: write every record at or past
		// its file's stamp, or with no file yet. Ties go to the record.
		let mtimes: HashMap<&str, u64> = files.iter().map(|f| (f.name.as_str(), f.modified_ms)).collect();
		let models = self.service.state().stores().persistent_models.current().entities.clone();
		for model in &models {
			let wins = mtimes.get(model.name.as_str()).is_none_or(|&mtime| model.last_updated >= mtime);
			if wins {
				self.repo.save(model)?;
			}
		}

		*self.known.lock() = models.into_iter().map(|model| (model.name, model.id)).collect();
		Ok(())
	}
}
