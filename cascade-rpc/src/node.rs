//! Member-side endpoint runtime
//!
//! One `EndpointNode` per cluster member ties the pieces together: the
//! cooperative executor, the directory, and the two cluster-wide lifecycle
//! operations (create an endpoint everywhere, resolve a name from a member
//! that already has it). It is also where the transport delivers inbound
//! RPC packets.

use crate::cluster::{ClusterSubstrate, Connection, MemberOperation, OperationReply};
use crate::config::EndpointConfig;
use crate::directory::EndpointDirectory;
use crate::error::{EndpointError, Result};
use crate::executor::CooperativeExecutor;
use crate::handler::HandlerFactory;
use crate::metrics;
use crate::proxy::EndpointProxy;
use crate::wire::{self, Packet};
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

/// Endpoint runtime of one cluster member
pub struct EndpointNode {
    address: SocketAddr,
    substrate: Arc<dyn ClusterSubstrate>,
    executor: Arc<CooperativeExecutor>,
    directory: EndpointDirectory,
}

impl EndpointNode {
    /// Build the member runtime and start its cooperative workers.
    /// Must be called within a tokio runtime.
    pub fn new(
        config: EndpointConfig,
        address: SocketAddr,
        substrate: Arc<dyn ClusterSubstrate>,
    ) -> Arc<Self> {
        let executor = Arc::new(CooperativeExecutor::new(&config));
        let directory = EndpointDirectory::new(executor.clone(), substrate.clone());
        info!(%address, workers = executor.worker_count(), "endpoint node started");
        Arc::new(Self {
            address,
            substrate,
            executor,
            directory,
        })
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn directory(&self) -> &EndpointDirectory {
        &self.directory
    }

    /// Create a cluster-wide endpoint and return a proxy to it.
    ///
    /// Assigns the endpoint id exactly once via the substrate's id
    /// generator, then runs the create operation on every member — local
    /// included — awaiting each acknowledgment. When this returns, every
    /// member's directory has the mapping.
    pub async fn new_endpoint(
        &self,
        name: &str,
        factory: HandlerFactory,
    ) -> Result<Arc<EndpointProxy>> {
        let endpoint_id = self.substrate.new_cluster_unique_id();
        for member in self.substrate.members() {
            let op = MemberOperation::CreateEndpoint {
                endpoint_id,
                name: name.to_string(),
                factory: factory.clone(),
            };
            self.substrate.invoke_on_member(op, member).await?;
        }
        let proxy = self.build_proxy(endpoint_id, name)?;
        self.directory.register_proxy(proxy.clone());
        info!(endpoint = name, endpoint_id, "endpoint created cluster-wide");
        Ok(proxy)
    }

    /// Obtain a proxy for an endpoint some other member created.
    ///
    /// Resolution asks one known member for the id; no packet is sent to
    /// the endpoint itself until the first call.
    pub async fn get_endpoint(&self, name: &str) -> Result<Arc<EndpointProxy>> {
        let target = self
            .substrate
            .members()
            .into_iter()
            .next()
            .ok_or_else(|| EndpointError::NoParticipants(name.to_string()))?;
        let op = MemberOperation::ResolveEndpoint {
            name: name.to_string(),
        };
        let endpoint_id = match self.substrate.invoke_on_member(op, target).await? {
            OperationReply::Resolved(id) => id,
            other => {
                return Err(EndpointError::Transport(format!(
                    "unexpected reply to resolve: {other:?}"
                )))
            }
        };
        self.directory
            .get_or_create_proxy(endpoint_id, || self.build_proxy(endpoint_id, name))
    }

    /// Participant snapshot: connections to every other member, in member
    /// order. Captured once per proxy; membership changes after this point
    /// are not tracked.
    fn build_proxy(&self, endpoint_id: u64, name: &str) -> Result<Arc<EndpointProxy>> {
        let participants: Vec<Arc<dyn Connection>> = self
            .substrate
            .members()
            .into_iter()
            .filter(|addr| *addr != self.address)
            .map(|addr| self.substrate.connection_to(addr))
            .collect::<Result<_>>()?;
        Ok(Arc::new(EndpointProxy::new(endpoint_id, name, participants)))
    }

    /// Service a one-shot operation another member invoked on this one
    pub async fn handle_operation(&self, op: MemberOperation) -> Result<OperationReply> {
        match op {
            MemberOperation::CreateEndpoint {
                endpoint_id,
                name,
                factory,
            } => {
                self.directory.new_endpoint(endpoint_id, &name, &factory)?;
                Ok(OperationReply::Created)
            }
            MemberOperation::ResolveEndpoint { name } => {
                Ok(OperationReply::Resolved(self.directory.resolve_id(&name)?))
            }
        }
    }

    /// Inbound packet delivery callback for the wire transport.
    ///
    /// Protocol anomalies — unknown endpoint, unknown request, garbage
    /// bytes — are contained here: logged, counted, dropped. They never
    /// reach a worker or another in-flight request.
    pub fn handle_packet(&self, from: SocketAddr, packet: Bytes) {
        match wire::decode_packet(packet) {
            Ok(Packet::Request(request)) => {
                if let Err(e) = self.directory.dispatch_request(from, request) {
                    warn!(%from, error = %e, "inbound request dropped");
                    metrics::record_packet_dropped(e.error_type());
                }
            }
            Ok(Packet::Response(response)) => match self.directory.proxy(response.endpoint_id) {
                Some(proxy) => {
                    if let Err(e) = proxy.handle_response(response) {
                        warn!(%from, error = %e, "inbound response dropped");
                        metrics::record_packet_dropped(e.error_type());
                    }
                }
                None => {
                    warn!(
                        %from,
                        endpoint_id = response.endpoint_id,
                        "response for endpoint with no local proxy, dropped"
                    );
                    metrics::record_packet_dropped("unknown_proxy");
                }
            },
            Err(e) => {
                warn!(%from, error = %e, "undecodable packet dropped");
                metrics::record_packet_dropped(e.error_type());
            }
        }
    }

    /// Stop this member's cooperative workers
    pub fn shutdown(&self) {
        self.executor.shutdown();
        info!(address = %self.address, "endpoint node stopped");
    }
}
