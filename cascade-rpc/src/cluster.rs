//! Cluster substrate interfaces
//!
//! The endpoint subsystem does not do its own member discovery, packet
//! delivery, or id generation; it consumes them through these traits. The
//! in-process implementation lives in [`crate::local`]; a production
//! deployment plugs in the engine's networking layer.

use crate::error::Result;
use crate::handler::HandlerFactory;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

/// Ordered, reliable point-to-point channel to one remote member.
///
/// `send` hands one opaque packet to the transport without blocking;
/// delivery failures after that point are not reported back.
pub trait Connection: Send + Sync {
    fn remote_address(&self) -> SocketAddr;

    fn send(&self, packet: Bytes) -> Result<()>;
}

/// One-shot operation executed on a single member
pub enum MemberOperation {
    /// Publish an endpoint on the target member under a pre-assigned id.
    ///
    /// The handler factory travels by value; moving handler code between
    /// address spaces is the substrate's concern, not this crate's. The
    /// in-process substrate simply clones the `Arc`.
    CreateEndpoint {
        endpoint_id: u64,
        name: String,
        factory: HandlerFactory,
    },
    /// Ask the target member what id a name maps to
    ResolveEndpoint { name: String },
}

impl fmt::Debug for MemberOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberOperation::CreateEndpoint {
                endpoint_id, name, ..
            } => f
                .debug_struct("CreateEndpoint")
                .field("endpoint_id", endpoint_id)
                .field("name", name)
                .finish_non_exhaustive(),
            MemberOperation::ResolveEndpoint { name } => f
                .debug_struct("ResolveEndpoint")
                .field("name", name)
                .finish(),
        }
    }
}

/// Successful outcome of a [`MemberOperation`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationReply {
    Created,
    Resolved(u64),
}

/// The cluster services this crate consumes: membership, connections,
/// one-shot member operations, and cluster-unique id assignment.
#[async_trait]
pub trait ClusterSubstrate: Send + Sync {
    /// Current cluster members, in a stable order
    fn members(&self) -> Vec<SocketAddr>;

    /// Connection to the given member
    fn connection_to(&self, addr: SocketAddr) -> Result<Arc<dyn Connection>>;

    /// Run a one-shot operation on the target member and await its reply
    async fn invoke_on_member(
        &self,
        op: MemberOperation,
        target: SocketAddr,
    ) -> Result<OperationReply>;

    /// A fresh id, unique across the whole cluster, never reused
    fn new_cluster_unique_id(&self) -> u64;
}
