//! Patch fan-out to subscribers and order-preserving emission.

use std::sync::Arc;

use parking_lot::Mutex;
use quarry_store::{EntityRecord, EntityStore, Patch, StoreKey};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;

/// One emitted diff, tagged with the store it belongs to.
#[derive(Debug, Clone)]
pub struct StorePatch {
	/// Which store was mutated.
	pub key: StoreKey,
	/// The ordered edit list.
	pub ops: Patch,
}

/// Stream of patches for one subscriber.
pub type PatchReceiver = mpsc::UnboundedReceiver<StorePatch>;

/// Bounded observer list for emitted patches.
///
/// Subscribers whose receiver has been dropped are pruned on the next emit,
/// so the list never grows past the set of live connections.
#[derive(Default)]
pub struct Subscribers {
	senders: Mutex<Vec<mpsc::UnboundedSender<StorePatch>>>,
}

impl Subscribers {
	/// Creates an empty subscriber list.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers a subscriber and returns its patch stream.
	pub fn subscribe(&self) -> PatchReceiver {
		let (tx, rx) = mpsc::unbounded_channel();
		self.senders.lock().push(tx);
		rx
	}

	/// Sends one patch to every live subscriber, pruning dead ones.
	pub fn emit(&self, patch: StorePatch) {
		self.senders.lock().retain(|tx| tx.send(patch.clone()).is_ok());
	}

	/// Number of live subscribers.
	pub fn len(&self) -> usize {
		self.senders.lock().len()
	}

	/// True when nobody is subscribed.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

/// A mutation step applied to one store draft.
pub type Mutator<R> = Box<dyn FnOnce(&mut quarry_store::EntityState<R>) + Send>;

/// Couples a store with the subscriber list, serializing mutate-then-emit so
/// patches for one store always reach subscribers in application order.
pub struct Emitter<R> {
	store: Arc<EntityStore<R>>,
	subscribers: Arc<Subscribers>,
	order: Mutex<()>,
}

impl<R> Emitter<R>
where
	R: EntityRecord + Clone + PartialEq + Serialize + DeserializeOwned,
{
	/// Creates an emitter for one store.
	#[must_use]
	pub fn new(store: Arc<EntityStore<R>>, subscribers: Arc<Subscribers>) -> Self {
		Self {
			store,
			subscribers,
			order: Mutex::new(()),
		}
	}

	/// The wrapped store.
	#[must_use]
	pub fn store(&self) -> &Arc<EntityStore<R>> {
		&self.store
	}

	/// Applies all mutators against one draft and emits the single resulting
	/// patch. Empty patches (no observable change) are not emitted.
	pub fn apply(&self, mutators: Vec<Mutator<R>>) {
		if mutators.is_empty() {
			return;
		}
		let _order = self.order.lock();
		match self.store.mutate(|draft| {
			for mutator in mutators {
				mutator(draft);
			}
		}) {
			Ok(ops) => {
				if !ops.is_empty() {
					self.subscribers.emit(StorePatch {
						key: self.store.key(),
						ops,
					});
				}
			}
			Err(error) => {
				tracing::error!(store = %self.store.key(), %error, "state.emit.mutate_failed");
			}
		}
	}
}
