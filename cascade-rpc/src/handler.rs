//! Endpoint handler plumbing
//!
//! A handler is a single capability: take a serialized request, produce an
//! asynchronous result or failure. Dispatchers call the factory once per
//! cooperative worker, so whatever state the returned closure captures is
//! that worker's private context.

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;

/// Result of one handler invocation: serialized response value, or the
/// failure text carried back to the caller.
pub type HandlerResult = std::result::Result<Bytes, String>;

/// The asynchronous result a handler yields instead of blocking
pub type HandlerFuture = BoxFuture<'static, HandlerResult>;

/// One worker's handler instance. May hold per-worker state.
pub type RawHandler = Box<dyn FnMut(Bytes) -> HandlerFuture + Send>;

/// Produces one [`RawHandler`] per cooperative worker at dispatcher start
pub type HandlerFactory = Arc<dyn Fn() -> RawHandler + Send + Sync>;

/// Wrap a stateless async function as a handler factory.
///
/// Request and response values are bincode-encoded. A request payload that
/// fails to decode settles as a handler failure for that one call; it never
/// takes down the worker.
pub fn handler_fn<I, O, F, Fut>(f: F) -> HandlerFactory
where
    I: DeserializeOwned + Send + 'static,
    O: Serialize + Send + 'static,
    F: Fn(I) -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = std::result::Result<O, String>> + Send + 'static,
{
    Arc::new(move || {
        let f = f.clone();
        Box::new(move |payload: Bytes| {
            let f = f.clone();
            async move {
                let request: I = bincode::deserialize(&payload)
                    .map_err(|e| format!("malformed request payload: {e}"))?;
                let response = f(request).await?;
                bincode::serialize(&response)
                    .map(Bytes::from)
                    .map_err(|e| format!("unserializable response: {e}"))
            }
            .boxed()
        })
    })
}

/// Wrap an async function with per-worker context as a handler factory.
///
/// `context_factory` runs once per worker when the dispatcher starts; every
/// call serviced by that worker sees a clone of its context. Contexts are
/// never shared across workers, so `Arc<SomeState>` with interior
/// mutability covers the stateful cases.
pub fn stateful_handler_fn<C, I, O, CF, F, Fut>(context_factory: CF, f: F) -> HandlerFactory
where
    C: Clone + Send + 'static,
    I: DeserializeOwned + Send + 'static,
    O: Serialize + Send + 'static,
    CF: Fn() -> C + Send + Sync + 'static,
    F: Fn(C, I) -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = std::result::Result<O, String>> + Send + 'static,
{
    Arc::new(move || {
        let context = context_factory();
        let f = f.clone();
        Box::new(move |payload: Bytes| {
            let context = context.clone();
            let f = f.clone();
            async move {
                let request: I = bincode::deserialize(&payload)
                    .map_err(|e| format!("malformed request payload: {e}"))?;
                let response = f(context, request).await?;
                bincode::serialize(&response)
                    .map(Bytes::from)
                    .map_err(|e| format!("unserializable response: {e}"))
            }
            .boxed()
        })
    })
}
