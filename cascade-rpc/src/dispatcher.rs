//! Server-side request dispatch
//!
//! One dispatcher per locally-owned endpoint. Inbound requests fan out
//! round robin across one queue per cooperative worker; each queue is
//! drained by a single tasklet that invokes the handler and detaches a
//! continuation to send the response once the handler settles. The tasklet
//! never waits on the handler, so a slow call holds up neither its worker
//! nor the requests behind it on other queues.

use crate::cluster::ClusterSubstrate;
use crate::executor::{CooperativeExecutor, Progress, Tasklet};
use crate::handler::{HandlerFactory, RawHandler};
use crate::metrics;
use crate::wire::{self, RequestPacket};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::warn;

/// One queued inbound request
struct InboundRequest {
    caller: SocketAddr,
    request_id: u64,
    payload: Bytes,
}

/// Multi-producer queue drained by exactly one dispatch tasklet
type DispatchQueue = Arc<Mutex<VecDeque<InboundRequest>>>;

/// Cooperative runtime servicing inbound requests for one endpoint
pub struct EndpointDispatcher {
    endpoint_id: u64,
    name: String,
    queues: Vec<DispatchQueue>,
    next_queue: AtomicUsize,
}

impl EndpointDispatcher {
    /// Build the dispatcher and register its tasklets, one per worker.
    ///
    /// The handler factory runs once per worker here, so each tasklet owns
    /// a private handler instance for the dispatcher's lifetime.
    pub fn new(
        endpoint_id: u64,
        name: &str,
        factory: &HandlerFactory,
        executor: &CooperativeExecutor,
        substrate: Arc<dyn ClusterSubstrate>,
    ) -> Self {
        let worker_count = executor.worker_count();
        let queues: Vec<DispatchQueue> = (0..worker_count)
            .map(|_| Arc::new(Mutex::new(VecDeque::new())))
            .collect();
        let tasklets: Vec<Box<dyn Tasklet>> = queues
            .iter()
            .map(|queue| {
                Box::new(DispatchTasklet {
                    endpoint_id,
                    queue: queue.clone(),
                    handler: factory(),
                    substrate: substrate.clone(),
                }) as Box<dyn Tasklet>
            })
            .collect();
        executor.submit_tasklets(tasklets);
        Self {
            endpoint_id,
            name: name.to_string(),
            queues,
            next_queue: AtomicUsize::new(0),
        }
    }

    pub fn endpoint_id(&self) -> u64 {
        self.endpoint_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Accept one inbound request.
    ///
    /// Queue selection is a shared atomic counter modulo the worker count:
    /// an even, lock-free round robin regardless of which thread delivers
    /// the packet. No caller affinity, no backpressure; callers bound their
    /// own in-flight requests.
    pub fn enqueue(&self, caller: SocketAddr, request: RequestPacket) {
        let index = self.next_queue.fetch_add(1, Ordering::Relaxed) % self.queues.len();
        self.queues[index].lock().push_back(InboundRequest {
            caller,
            request_id: request.request_id,
            payload: request.payload,
        });
        metrics::record_request_enqueued(&self.name);
    }

    /// Current depth of every dispatch queue, in worker order.
    ///
    /// This is the sampling hook the monitoring side channel reads; it also
    /// refreshes the queue depth gauges.
    pub fn queue_depths(&self) -> Vec<usize> {
        self.queues
            .iter()
            .enumerate()
            .map(|(worker, queue)| {
                let depth = queue.lock().len();
                metrics::record_queue_depth(&self.name, worker, depth);
                depth
            })
            .collect()
    }
}

/// Drains one dispatch queue from its assigned cooperative worker
struct DispatchTasklet {
    endpoint_id: u64,
    queue: DispatchQueue,
    handler: RawHandler,
    substrate: Arc<dyn ClusterSubstrate>,
}

impl Tasklet for DispatchTasklet {
    fn poll(&mut self) -> Progress {
        let Some(request) = self.queue.lock().pop_front() else {
            return Progress::NoProgress;
        };
        let future = (self.handler)(request.payload);
        let substrate = self.substrate.clone();
        let endpoint_id = self.endpoint_id;
        let caller = request.caller;
        let request_id = request.request_id;
        // Detach: the worker is free to poll on while the handler runs.
        tokio::spawn(async move {
            let result = future.await;
            let packet = match &result {
                Ok(payload) => wire::encode_response(endpoint_id, request_id, true, payload),
                Err(failure) => {
                    wire::encode_response(endpoint_id, request_id, false, failure.as_bytes())
                }
            };
            let sent = substrate
                .connection_to(caller)
                .and_then(|conn| conn.send(packet));
            if let Err(e) = sent {
                // No retry: the caller's pending request stays unresolved.
                warn!(endpoint_id, request_id, %caller, error = %e, "response send failed, dropped");
                metrics::record_packet_dropped("response_send_failed");
            }
        });
        Progress::MadeProgress
    }
}
