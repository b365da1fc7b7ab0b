//! Bounded fan-out of due orders to the executor.
//!
//! Jobs run in chunks of `chunk_size`. Inside a chunk at most `concurrency`
//! executor calls are in flight and results are handed to the caller as they
//! complete. A chunk is fully settled before the next one starts.

use dca_delivery::DeliveryService;
use dca_types::{Action, DcaOrder, Outcome};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct Job {
	pub order: DcaOrder,
	pub action: Action,
}

impl From<(DcaOrder, Action)> for Job {
	fn from((order, action): (DcaOrder, Action)) -> Self {
		Self { order, action }
	}
}

pub struct Dispatcher {
	delivery: Arc<DeliveryService>,
	concurrency: usize,
	chunk_size: usize,
}

impl Dispatcher {
	pub fn new(delivery: Arc<DeliveryService>, concurrency: usize, chunk_size: usize) -> Self {
		Self {
			delivery,
			concurrency: concurrency.max(1),
			chunk_size: chunk_size.max(1),
		}
	}

	pub fn concurrency(&self) -> usize {
		self.concurrency
	}

	/// Drops later jobs for an escrow that already has one, keeping order.
	pub fn dedupe(jobs: Vec<Job>) -> Vec<Job> {
		let mut seen = HashSet::new();
		let before = jobs.len();
		let jobs: Vec<Job> = jobs
			.into_iter()
			.filter(|job| seen.insert(job.order.escrow_id.clone()))
			.collect();
		if jobs.len() != before {
			warn!(dropped = before - jobs.len(), "Duplicate escrows in dispatch batch");
		}
		jobs
	}

	/// Runs every job once and passes each `(job, outcome)` to `on_result`,
	/// collecting what it returns.
	///
	/// Returns after all jobs have settled.
	pub async fn dispatch<F, Fut, T>(&self, jobs: Vec<Job>, mut on_result: F) -> Vec<T>
	where
		F: FnMut(Job, Outcome) -> Fut,
		Fut: Future<Output = T>,
	{
		let jobs = Self::dedupe(jobs);
		let mut settled = Vec::with_capacity(jobs.len());
		let mut chunk_index = 0;
		let mut remaining = jobs.into_iter().peekable();

		while remaining.peek().is_some() {
			let chunk: Vec<Job> = remaining.by_ref().take(self.chunk_size).collect();
			chunk_index += 1;
			debug!(chunk = chunk_index, size = chunk.len(), "Dispatching chunk");

			let delivery = &self.delivery;
			let mut results = stream::iter(chunk)
				.map(|job| async move {
					let outcome = delivery.execute(&job.order, job.action).await;
					(job, outcome)
				})
				.buffer_unordered(self.concurrency);

			while let Some((job, outcome)) = results.next().await {
				settled.push(on_result(job, outcome).await);
			}
		}

		settled
	}
}
