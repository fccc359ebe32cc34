//! Quiet-window coalescing of bursty store mutations.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use quarry_store::EntityRecord;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Notify;

use crate::emit::{Emitter, Mutator};

/// Default quiet window between coalesced flushes.
pub const DEFAULT_QUIET_WINDOW: Duration = Duration::from_millis(250);

struct BatchState<R> {
	pending: Vec<Mutator<R>>,
	/// Generation of the armed timer; a timer only flushes if its generation
	/// is still armed when it fires.
	armed: Option<u64>,
	next_generation: u64,
}

impl<R> Default for BatchState<R> {
	fn default() -> Self {
		Self {
			pending: Vec::new(),
			armed: None,
			next_generation: 0,
		}
	}
}

/// Coalesces scheduled mutators for one store inside a fixed quiet window.
///
/// The window arms on the first [`schedule`](Self::schedule) and is not
/// re-armed by later ones, bounding the emitted patch rate to one per window
/// per store no matter how many mutators arrive inside it. All pending
/// mutators are applied in arrival order against a single draft.
pub struct UpdateBatcher<R> {
	emitter: Arc<Emitter<R>>,
	window: Duration,
	state: Arc<Mutex<BatchState<R>>>,
	flushed: Arc<Notify>,
}

impl<R> UpdateBatcher<R>
where
	R: EntityRecord + Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static,
{
	/// Creates a batcher with the given quiet window.
	#[must_use]
	pub fn new(emitter: Arc<Emitter<R>>, window: Duration) -> Self {
		Self {
			emitter,
			window,
			state: Arc::new(Mutex::new(BatchState::default())),
			flushed: Arc::new(Notify::new()),
		}
	}

	/// Appends a mutator to the pending batch, arming the window timer if it
	/// is not already armed.
	pub fn schedule(&self, mutator: Mutator<R>) {
		let generation = {
			let mut state = self.state.lock();
			state.pending.push(mutator);
			if state.armed.is_some() {
				None
			} else {
				let generation = state.next_generation;
				state.next_generation += 1;
				state.armed = Some(generation);
				Some(generation)
			}
		};

		if let Some(generation) = generation {
			let state = Arc::clone(&self.state);
			let emitter = Arc::clone(&self.emitter);
			let flushed = Arc::clone(&self.flushed);
			let window = self.window;
			tokio::spawn(async move {
				tokio::time::sleep(window).await;
				let drained = {
					let mut state = state.lock();
					if state.armed != Some(generation) {
						// flush_now won the race; nothing left to do.
						return;
					}
					state.armed = None;
					std::mem::take(&mut state.pending)
				};
				tracing::trace!(pending = drained.len(), "state.batch.window_flush");
				emitter.apply(drained);
				flushed.notify_waiters();
			});
		}
	}

	/// Cancels the armed timer and applies pending mutators immediately.
	///
	/// Used before an unthrottled mutation touches the same store, so the
	/// coalesced batch is never reordered after it.
	pub fn flush_now(&self) {
		let drained = {
			let mut state = self.state.lock();
			state.armed = None;
			std::mem::take(&mut state.pending)
		};
		if drained.is_empty() {
			return;
		}
		tracing::trace!(pending = drained.len(), "state.batch.forced_flush");
		self.emitter.apply(drained);
		self.flushed.notify_waiters();
	}

	/// Resolves after the next flush of this batcher.
	pub async fn next_flush(&self) {
		self.flushed.notified().await;
	}

	/// True when mutators are waiting for the window to close.
	pub fn has_pending(&self) -> bool {
		!self.state.lock().pending.is_empty()
	}
}
