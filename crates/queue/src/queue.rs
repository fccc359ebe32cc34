//! The priority queue proper.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::engine::{AnalyticsEngine, EngineError};

/// Default bound on concurrently running lookups.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Urgency of a queued lookup. Lower is more urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
	/// Queries for the model the user is editing right now.
	ActiveModel = 0,
	/// Profiling for the active model.
	ActiveModelProfile = 1,
	/// Export of a model result.
	ModelExport = 2,
	/// Source import.
	TableImport = 3,
	/// Profiling for an imported source.
	TableProfile = 4,
}

/// Failure outcome of a queued task.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueueError {
	/// Task was cancelled while still queued.
	#[error("task cancelled before it ran")]
	Cancelled,

	/// The engine reported a failure for this task only.
	#[error(transparent)]
	Failed(#[from] EngineError),
}

/// Resolves with the task's outcome once it settles.
pub struct TaskTicket {
	rx: oneshot::Receiver<Result<Value, QueueError>>,
}

impl TaskTicket {
	fn settled(result: Result<Value, QueueError>) -> Self {
		let (tx, rx) = oneshot::channel();
		// Receiver is held right here; the send cannot fail.
		let _ = tx.send(result);
		Self { rx }
	}

	/// Waits for the task to settle. A dropped queue settles as cancelled.
	pub async fn outcome(self) -> Result<Value, QueueError> {
		self.rx.await.unwrap_or(Err(QueueError::Cancelled))
	}
}

struct QueuedTask {
	owner: String,
	priority: Priority,
	seq: u64,
	operation: String,
	args: Value,
	reply: oneshot::Sender<Result<Value, QueueError>>,
}

impl PartialEq for QueuedTask {
	fn eq(&self, other: &Self) -> bool {
		self.priority == other.priority && self.seq == other.seq
	}
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for QueuedTask {
	// BinaryHeap is a max-heap: invert so the lowest (priority, seq) pops
	// first, most urgent level then arrival order within a level.
	fn cmp(&self, other: &Self) -> Ordering {
		(other.priority, other.seq).cmp(&(self.priority, self.seq))
	}
}

struct QueueState {
	ready: BinaryHeap<QueuedTask>,
	running: usize,
	next_seq: u64,
}

struct QueueInner {
	engine: Arc<dyn AnalyticsEngine>,
	limit: usize,
	state: Mutex<QueueState>,
	shutdown: CancellationToken,
}

/// Bounded-concurrency, priority-ordered scheduler for analytic lookups.
///
/// Task lifecycle: Queued → Running → {Completed, Failed, Cancelled}, with
/// Cancelled reachable only from Queued. A failing operation settles only its
/// own ticket; siblings and the queue itself are unaffected.
#[derive(Clone)]
pub struct PriorityQueue {
	inner: Arc<QueueInner>,
}

impl PriorityQueue {
	/// Creates a queue over the given engine with the default concurrency.
	#[must_use]
	pub fn new(engine: Arc<dyn AnalyticsEngine>) -> Self {
		Self::with_concurrency(engine, DEFAULT_CONCURRENCY)
	}

	/// Creates a queue with an explicit concurrency bound.
	#[must_use]
	pub fn with_concurrency(engine: Arc<dyn AnalyticsEngine>, limit: usize) -> Self {
		Self {
			inner: Arc::new(QueueInner {
				engine,
				limit: limit.max(1),
				state: Mutex::new(QueueState {
					ready: BinaryHeap::new(),
					running: 0,
					next_seq: 0,
				}),
				shutdown: CancellationToken::new(),
			}),
		}
	}

	/// Enqueues one lookup on behalf of `owner` and returns its ticket.
	pub fn enqueue(
		&self,
		owner: impl Into<String>,
		priority: Priority,
		operation: impl Into<String>,
		args: Value,
	) -> TaskTicket {
		if self.inner.shutdown.is_cancelled() {
			return TaskTicket::settled(Err(QueueError::Cancelled));
		}
		let owner = owner.into();
		let operation = operation.into();
		let (tx, rx) = oneshot::channel();
		{
			let mut state = self.inner.state.lock();
			let seq = state.next_seq;
			state.next_seq += 1;
			tracing::debug!(%owner, op = %operation, ?priority, seq, "queue.task.enqueued");
			state.ready.push(QueuedTask {
				owner,
				priority,
				seq,
				operation,
				args,
				reply: tx,
			});
		}
		self.pump();
		TaskTicket { rx }
	}

	/// Removes every still-queued task for `owner`, settling each ticket as
	/// cancelled. Running tasks are left to complete; their results are
	/// discarded by the caller's staleness check.
	pub fn cancel_for(&self, owner: &str) {
		let cancelled = {
			let mut state = self.inner.state.lock();
			let (keep, drop): (Vec<_>, Vec<_>) =
				state.ready.drain().partition(|task| task.owner != owner);
			state.ready = keep.into_iter().collect();
			drop
		};
		if cancelled.is_empty() {
			return;
		}
		tracing::debug!(%owner, count = cancelled.len(), "queue.task.cancelled");
		for task in cancelled {
			let _ = task.reply.send(Err(QueueError::Cancelled));
		}
	}

	/// Stops accepting work and settles every still-queued task as
	/// cancelled. Running tasks complete normally.
	pub fn shutdown(&self) {
		self.inner.shutdown.cancel();
		let pending = {
			let mut state = self.inner.state.lock();
			std::mem::take(&mut state.ready)
		};
		for task in pending {
			let _ = task.reply.send(Err(QueueError::Cancelled));
		}
	}

	/// Queued-but-not-running task count.
	#[must_use]
	pub fn ready_len(&self) -> usize {
		self.inner.state.lock().ready.len()
	}

	/// Starts ready tasks while running slots are free.
	fn pump(&self) {
		loop {
			let task = {
				let mut state = self.inner.state.lock();
				if state.running >= self.inner.limit {
					return;
				}
				let Some(task) = state.ready.pop() else {
					return;
				};
				state.running += 1;
				task
			};
			let inner = Arc::clone(&self.inner);
			let queue = self.clone();
			tokio::spawn(async move {
				tracing::trace!(owner = %task.owner, op = %task.operation, "queue.task.start");
				let result = inner.engine.execute(&task.operation, task.args).await;
				if let Err(error) = &result {
					tracing::debug!(owner = %task.owner, op = %task.operation, %error, "queue.task.failed");
				}
				let _ = task.reply.send(result.map_err(QueueError::from));
				inner.state.lock().running -= 1;
				queue.pump();
			});
		}
	}
}
