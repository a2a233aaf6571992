//! Per-member endpoint directory
//!
//! The single source of truth on a member for the name↔id mapping, the
//! local dispatcher of each endpoint this member serves, and the local
//! proxy of each endpoint this member calls. Dispatchers and proxies are
//! only ever reached through lookups here, which keeps the components free
//! of references to each other.

use crate::cluster::ClusterSubstrate;
use crate::dispatcher::EndpointDispatcher;
use crate::error::{EndpointError, Result};
use crate::executor::CooperativeExecutor;
use crate::handler::HandlerFactory;
use crate::proxy::EndpointProxy;
use crate::wire::RequestPacket;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

/// The coupled server-side maps, guarded together so endpoint creation
/// publishes name and dispatcher atomically from any observer's view.
#[derive(Default)]
struct Registered {
    name_to_id: HashMap<String, u64>,
    dispatchers: HashMap<u64, Arc<EndpointDispatcher>>,
}

/// Registry of the endpoints a member serves and the proxies it holds
pub struct EndpointDirectory {
    executor: Arc<CooperativeExecutor>,
    substrate: Arc<dyn ClusterSubstrate>,
    registered: RwLock<Registered>,
    proxies: RwLock<HashMap<u64, Arc<EndpointProxy>>>,
}

impl EndpointDirectory {
    pub fn new(executor: Arc<CooperativeExecutor>, substrate: Arc<dyn ClusterSubstrate>) -> Self {
        Self {
            executor,
            substrate,
            registered: RwLock::new(Registered::default()),
            proxies: RwLock::new(HashMap::new()),
        }
    }

    /// Publish an endpoint on this member under a pre-assigned cluster id.
    ///
    /// Fails with `DuplicateName` and mutates nothing if the name is taken.
    /// On success the dispatcher is live before the mappings are visible.
    pub fn new_endpoint(&self, endpoint_id: u64, name: &str, factory: &HandlerFactory) -> Result<()> {
        let mut registered = self.registered.write();
        if registered.name_to_id.contains_key(name) {
            return Err(EndpointError::DuplicateName(name.to_string()));
        }
        let dispatcher = Arc::new(EndpointDispatcher::new(
            endpoint_id,
            name,
            factory,
            &self.executor,
            self.substrate.clone(),
        ));
        registered.name_to_id.insert(name.to_string(), endpoint_id);
        registered.dispatchers.insert(endpoint_id, dispatcher);
        info!(endpoint = name, endpoint_id, "endpoint registered");
        Ok(())
    }

    /// Resolve a name known to this member. Never goes over the network;
    /// cross-member resolution is the lifecycle operation's job.
    pub fn resolve_id(&self, name: &str) -> Result<u64> {
        self.registered
            .read()
            .name_to_id
            .get(name)
            .copied()
            .ok_or_else(|| EndpointError::NotFound(name.to_string()))
    }

    /// Route one inbound request to its dispatcher
    pub fn dispatch_request(&self, caller: SocketAddr, request: RequestPacket) -> Result<()> {
        let registered = self.registered.read();
        let dispatcher = registered
            .dispatchers
            .get(&request.endpoint_id)
            .ok_or(EndpointError::UnknownEndpoint(request.endpoint_id))?;
        dispatcher.enqueue(caller, request);
        Ok(())
    }

    /// The proxy for an endpoint id, or build one. At most one proxy ever
    /// exists per endpoint id on a member, even under concurrent callers.
    pub fn get_or_create_proxy(
        &self,
        endpoint_id: u64,
        build: impl FnOnce() -> Result<Arc<EndpointProxy>>,
    ) -> Result<Arc<EndpointProxy>> {
        if let Some(proxy) = self.proxies.read().get(&endpoint_id) {
            return Ok(proxy.clone());
        }
        let mut proxies = self.proxies.write();
        // A racing caller may have won between the two locks.
        if let Some(proxy) = proxies.get(&endpoint_id) {
            return Ok(proxy.clone());
        }
        let proxy = build()?;
        proxies.insert(endpoint_id, proxy.clone());
        Ok(proxy)
    }

    /// Register a proxy constructed by the create path
    pub fn register_proxy(&self, proxy: Arc<EndpointProxy>) {
        self.proxies
            .write()
            .entry(proxy.endpoint_id())
            .or_insert(proxy);
    }

    /// The proxy a response packet belongs to, if any
    pub fn proxy(&self, endpoint_id: u64) -> Option<Arc<EndpointProxy>> {
        self.proxies.read().get(&endpoint_id).cloned()
    }

    /// Sample every local dispatcher's queue depths, by endpoint name.
    /// Monitoring hook; also refreshes the queue depth gauges.
    pub fn sample_queue_depths(&self) -> HashMap<String, Vec<usize>> {
        let registered = self.registered.read();
        registered
            .dispatchers
            .values()
            .map(|d| (d.name().to_string(), d.queue_depths()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{Connection, MemberOperation, OperationReply};
    use crate::config::EndpointConfig;
    use crate::handler::handler_fn;
    use async_trait::async_trait;
    use bytes::Bytes;

    struct NullSubstrate;

    #[async_trait]
    impl ClusterSubstrate for NullSubstrate {
        fn members(&self) -> Vec<SocketAddr> {
            Vec::new()
        }

        fn connection_to(&self, addr: SocketAddr) -> Result<Arc<dyn Connection>> {
            Err(EndpointError::Transport(format!("no route to {addr}")))
        }

        async fn invoke_on_member(
            &self,
            _op: MemberOperation,
            target: SocketAddr,
        ) -> Result<OperationReply> {
            Err(EndpointError::Transport(format!("no route to {target}")))
        }

        fn new_cluster_unique_id(&self) -> u64 {
            0
        }
    }

    fn directory() -> EndpointDirectory {
        let executor = Arc::new(CooperativeExecutor::new(&EndpointConfig::with_workers(2)));
        EndpointDirectory::new(executor, Arc::new(NullSubstrate))
    }

    fn sum_factory() -> HandlerFactory {
        handler_fn(|(a, b): (i32, i32)| async move { Ok(a + b) })
    }

    #[tokio::test]
    async fn test_duplicate_name_leaves_mapping_unchanged() {
        let directory = directory();
        directory.new_endpoint(1, "sum", &sum_factory()).unwrap();
        let err = directory.new_endpoint(2, "sum", &sum_factory()).unwrap_err();
        assert!(matches!(err, EndpointError::DuplicateName(_)));
        assert_eq!(directory.resolve_id("sum").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_resolve_unknown_name() {
        let directory = directory();
        assert!(matches!(
            directory.resolve_id("missing"),
            Err(EndpointError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_dispatch_to_unknown_endpoint() {
        let directory = directory();
        let request = RequestPacket {
            endpoint_id: 99,
            request_id: 0,
            payload: Bytes::new(),
        };
        assert!(matches!(
            directory.dispatch_request("127.0.0.1:7000".parse().unwrap(), request),
            Err(EndpointError::UnknownEndpoint(99))
        ));
    }

    #[tokio::test]
    async fn test_get_or_create_proxy_returns_single_instance() {
        let directory = directory();
        let build = || Ok(Arc::new(EndpointProxy::new(5, "remote", Vec::new())));
        let first = directory.get_or_create_proxy(5, build).unwrap();
        let second = directory
            .get_or_create_proxy(5, || panic!("must reuse the existing proxy"))
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_queue_depth_sampling() {
        let directory = directory();
        directory.new_endpoint(1, "sum", &sum_factory()).unwrap();
        let depths = directory.sample_queue_depths();
        assert_eq!(depths["sum"].len(), 2);
    }
}
