//! Cooperative tasklet execution
//!
//! A fixed pool of workers, each repeatedly polling the non-blocking
//! tasklets assigned to it. Endpoint dispatchers register one tasklet per
//! worker; the same workers interleave them with whatever other engine
//! tasklets they carry. A tasklet does a bounded unit of work per poll and
//! reports whether it made progress; it must never block its worker, and
//! suspension on an asynchronous result is done by detaching a spawned
//! continuation, not by parking the poll.

use crate::config::EndpointConfig;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Outcome of one tasklet poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    MadeProgress,
    NoProgress,
}

/// A non-blocking unit of cooperative work
pub trait Tasklet: Send {
    /// Do one bounded unit of work. Must not block.
    fn poll(&mut self) -> Progress;
}

/// Fixed pool of cooperative workers
pub struct CooperativeExecutor {
    intakes: Vec<mpsc::UnboundedSender<Box<dyn Tasklet>>>,
    cancel: CancellationToken,
}

impl CooperativeExecutor {
    /// Spawn the worker pool. Must be called within a tokio runtime.
    pub fn new(config: &EndpointConfig) -> Self {
        let worker_count = config.worker_count.max(1);
        let cancel = CancellationToken::new();
        let mut intakes = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let (tx, rx) = mpsc::unbounded_channel();
            intakes.push(tx);
            let backoff = IdleBackoff::new(config.spin_yields, config.min_park(), config.max_park());
            tokio::spawn(worker_loop(index, rx, cancel.clone(), backoff));
        }
        Self { intakes, cancel }
    }

    pub fn worker_count(&self) -> usize {
        self.intakes.len()
    }

    /// Hand a batch of tasklets to the pool, one per worker in order.
    ///
    /// A batch larger than the pool wraps around; dispatchers submit
    /// exactly one tasklet per worker.
    pub fn submit_tasklets(&self, tasklets: Vec<Box<dyn Tasklet>>) {
        for (i, tasklet) in tasklets.into_iter().enumerate() {
            let worker = i % self.intakes.len();
            if self.intakes[worker].send(tasklet).is_err() {
                warn!(worker, "executor stopped, tasklet dropped");
            }
        }
    }

    /// Stop all workers. Tasklets still queued are dropped.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for CooperativeExecutor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn worker_loop(
    index: usize,
    mut intake: mpsc::UnboundedReceiver<Box<dyn Tasklet>>,
    cancel: CancellationToken,
    mut backoff: IdleBackoff,
) {
    let mut tasklets: Vec<Box<dyn Tasklet>> = Vec::new();
    debug!(worker = index, "cooperative worker started");
    loop {
        if cancel.is_cancelled() {
            break;
        }
        while let Ok(tasklet) = intake.try_recv() {
            tasklets.push(tasklet);
        }
        let mut made_progress = false;
        for tasklet in tasklets.iter_mut() {
            if tasklet.poll() == Progress::MadeProgress {
                made_progress = true;
            }
        }
        if made_progress {
            backoff.reset();
            tokio::task::yield_now().await;
        } else {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = backoff.idle() => {}
            }
        }
    }
    debug!(worker = index, "cooperative worker stopped");
}

/// Escalating backoff for idle workers: yield a few times, then park for
/// increasing intervals up to a cap. Any progress resets it.
struct IdleBackoff {
    spin_yields: u32,
    min_park: Duration,
    max_park: Duration,
    spins: u32,
    park: Duration,
}

impl IdleBackoff {
    fn new(spin_yields: u32, min_park: Duration, max_park: Duration) -> Self {
        Self {
            spin_yields,
            min_park,
            max_park,
            spins: 0,
            park: min_park,
        }
    }

    fn reset(&mut self) {
        self.spins = 0;
        self.park = self.min_park;
    }

    async fn idle(&mut self) {
        if self.spins < self.spin_yields {
            self.spins += 1;
            tokio::task::yield_now().await;
        } else {
            let park = self.park;
            self.park = (self.park * 2).min(self.max_park);
            tokio::time::sleep(park).await;
        }
    }
}
