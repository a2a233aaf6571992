//! In-process cluster substrate
//!
//! Wires a set of [`EndpointNode`]s together inside one process: packets
//! are handed straight to the target node's delivery callback, one-shot
//! operations are direct method calls, and ids come from a shared counter.
//! This is the substrate the tests and examples run on; a production
//! deployment implements [`ClusterSubstrate`] over the engine's real
//! networking layer, where handler code distribution and flake-style id
//! generation live.

use crate::cluster::{ClusterSubstrate, Connection, MemberOperation, OperationReply};
use crate::config::EndpointConfig;
use crate::error::{EndpointError, Result};
use crate::node::EndpointNode;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// In-process registry of cluster members
pub struct LocalCluster {
    // Weak so a dropped node leaves the cluster instead of leaking through
    // the node -> substrate -> node cycle.
    members: RwLock<BTreeMap<SocketAddr, Weak<EndpointNode>>>,
    id_sequence: AtomicU64,
    next_port: AtomicU64,
}

impl LocalCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            members: RwLock::new(BTreeMap::new()),
            id_sequence: AtomicU64::new(1),
            next_port: AtomicU64::new(7900),
        })
    }

    /// Start a new member and join it to the cluster.
    /// Each member gets its own substrate handle bound to its address.
    pub fn add_member(self: &Arc<Self>, config: EndpointConfig) -> Arc<EndpointNode> {
        let port = self.next_port.fetch_add(1, Ordering::SeqCst) as u16;
        let address = SocketAddr::from(([127, 0, 0, 1], port));
        let handle = Arc::new(LocalMemberHandle {
            cluster: self.clone(),
            address,
        });
        let node = EndpointNode::new(config, address, handle);
        self.members.write().insert(address, Arc::downgrade(&node));
        node
    }

    fn member(&self, addr: SocketAddr) -> Result<Arc<EndpointNode>> {
        self.members
            .read()
            .get(&addr)
            .and_then(Weak::upgrade)
            .ok_or_else(|| EndpointError::Transport(format!("member {addr} is gone")))
    }

    fn member_addresses(&self) -> Vec<SocketAddr> {
        self.members
            .read()
            .iter()
            .filter(|(_, node)| node.strong_count() > 0)
            .map(|(addr, _)| *addr)
            .collect()
    }
}

/// One member's view of the in-process cluster
struct LocalMemberHandle {
    cluster: Arc<LocalCluster>,
    address: SocketAddr,
}

#[async_trait]
impl ClusterSubstrate for LocalMemberHandle {
    fn members(&self) -> Vec<SocketAddr> {
        self.cluster.member_addresses()
    }

    fn connection_to(&self, addr: SocketAddr) -> Result<Arc<dyn Connection>> {
        let node = self.cluster.member(addr)?;
        Ok(Arc::new(LocalConnection {
            target: Arc::downgrade(&node),
            from: self.address,
            to: addr,
        }))
    }

    async fn invoke_on_member(
        &self,
        op: MemberOperation,
        target: SocketAddr,
    ) -> Result<OperationReply> {
        self.cluster.member(target)?.handle_operation(op).await
    }

    fn new_cluster_unique_id(&self) -> u64 {
        self.cluster.id_sequence.fetch_add(1, Ordering::SeqCst)
    }
}

/// Direct in-process delivery into the target node
struct LocalConnection {
    target: Weak<EndpointNode>,
    from: SocketAddr,
    to: SocketAddr,
}

impl Connection for LocalConnection {
    fn remote_address(&self) -> SocketAddr {
        self.to
    }

    fn send(&self, packet: Bytes) -> Result<()> {
        let node = self
            .target
            .upgrade()
            .ok_or_else(|| EndpointError::Transport(format!("member {} is gone", self.to)))?;
        node.handle_packet(self.from, packet);
        Ok(())
    }
}
