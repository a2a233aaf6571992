//! Client-side endpoint proxy
//!
//! A proxy owns a snapshot of connections to the members serving its
//! endpoint, a request sequence, and the correlation map from request id to
//! pending result. The snapshot is taken once at construction and never
//! tracks later membership changes.

use crate::cluster::Connection;
use crate::error::{EndpointError, Result};
use crate::metrics;
use crate::wire::{self, ResponsePacket};
use bytes::Bytes;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tracing::debug;

type CallReply = Result<Bytes>;

/// Client-side handle for invoking a remote endpoint
pub struct EndpointProxy {
    endpoint_id: u64,
    name: String,
    participants: Vec<Arc<dyn Connection>>,
    sequence: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<CallReply>>>,
    destroyed: AtomicBool,
}

impl EndpointProxy {
    pub fn new(endpoint_id: u64, name: &str, participants: Vec<Arc<dyn Connection>>) -> Self {
        Self {
            endpoint_id,
            name: name.to_string(),
            participants,
            sequence: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn endpoint_id(&self) -> u64 {
        self.endpoint_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Issue a call without waiting for its response.
    ///
    /// The request id picks the target as `id % participants`, a
    /// deterministic round robin over the snapshot. The pending entry is
    /// inserted before the packet is handed to the transport, so a response
    /// can never race its own registration.
    pub fn call_async<I, O>(&self, request: &I) -> Result<PendingCall<O>>
    where
        I: Serialize,
        O: DeserializeOwned,
    {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(EndpointError::ProxyDestroyed);
        }
        if self.participants.is_empty() {
            return Err(EndpointError::NoParticipants(self.name.clone()));
        }
        let payload = bincode::serialize(request)?;
        let request_id = self.sequence.fetch_add(1, Ordering::SeqCst);
        let connection = &self.participants[(request_id % self.participants.len() as u64) as usize];

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(request_id, tx);
        // destroy() sets the flag before draining, so an entry inserted after
        // the drain is caught here and never outlives the proxy unsettled.
        if self.destroyed.load(Ordering::SeqCst) {
            self.pending.lock().remove(&request_id);
            return Err(EndpointError::ProxyDestroyed);
        }
        metrics::record_call_issued(&self.name);

        let packet = wire::encode_request(self.endpoint_id, request_id, &payload);
        if let Err(e) = connection.send(packet) {
            self.pending.lock().remove(&request_id);
            return Err(e);
        }
        Ok(PendingCall {
            request_id,
            rx,
            _response: PhantomData,
        })
    }

    /// Issue a call and wait for its response
    pub async fn call<I, O>(&self, request: &I) -> Result<O>
    where
        I: Serialize,
        O: DeserializeOwned,
    {
        let timer = metrics::CallTimer::new(&self.name);
        match self.call_async(request)?.await {
            Ok(response) => {
                timer.success();
                Ok(response)
            }
            Err(e) => {
                timer.error(e.error_type());
                Err(e)
            }
        }
    }

    /// Settle the pending call a response packet belongs to.
    ///
    /// A response whose request id has no live entry (already completed,
    /// abandoned, or duplicated by the transport) is a protocol anomaly for
    /// the member boundary to log and drop, never an error for any caller.
    pub fn handle_response(&self, response: ResponsePacket) -> Result<()> {
        let sender = self
            .pending
            .lock()
            .remove(&response.request_id)
            .ok_or(EndpointError::UnknownRequest(response.request_id))?;
        let reply = if response.success {
            metrics::record_call_completed(&self.name, "ok");
            Ok(response.payload)
        } else {
            metrics::record_call_completed(&self.name, "handler_error");
            Err(EndpointError::Handler(
                String::from_utf8_lossy(&response.payload).into_owned(),
            ))
        };
        // The caller may have dropped its PendingCall; nothing to settle then.
        let _ = sender.send(reply);
        Ok(())
    }

    /// Number of calls issued and not yet settled
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Release the proxy. Idempotent.
    ///
    /// In-flight calls are not silently abandoned: their pending results
    /// settle immediately with [`EndpointError::ProxyDestroyed`]. A late
    /// response for one of them is then dropped as an unknown request.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        let abandoned: Vec<u64> = {
            let mut pending = self.pending.lock();
            pending.drain().map(|(id, _)| id).collect()
        };
        if !abandoned.is_empty() {
            debug!(
                endpoint = %self.name,
                count = abandoned.len(),
                "proxy destroyed with calls in flight"
            );
        }
    }
}

impl fmt::Debug for EndpointProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointProxy")
            .field("endpoint_id", &self.endpoint_id)
            .field("name", &self.name)
            .field("participants", &self.participants.len())
            .field("destroyed", &self.destroyed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Drop for EndpointProxy {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// A call issued through [`EndpointProxy::call_async`], resolving to the
/// decoded response or the call's failure
pub struct PendingCall<O> {
    request_id: u64,
    rx: oneshot::Receiver<CallReply>,
    _response: PhantomData<fn() -> O>,
}

impl<O> PendingCall<O> {
    /// The proxy-scoped request id this call was issued under
    pub fn request_id(&self) -> u64 {
        self.request_id
    }
}

impl<O: DeserializeOwned> Future for PendingCall<O> {
    type Output = Result<O>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(Ok(payload))) => {
                Poll::Ready(bincode::deserialize(&payload).map_err(Into::into))
            }
            Poll::Ready(Ok(Err(e))) => Poll::Ready(Err(e)),
            Poll::Ready(Err(_)) => Poll::Ready(Err(EndpointError::ProxyDestroyed)),
            Poll::Pending => Poll::Pending,
        }
    }
}
