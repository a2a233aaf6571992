//! Cascade RPC - Point-to-point RPC endpoints between cluster members
//!
//! Any member registers a named, cluster-wide callable (an "endpoint");
//! any other member invokes it synchronously or asynchronously. Request
//! servicing runs on the engine's cooperative workers, interleaved with
//! its normal data-processing work, instead of dedicating threads.
//!
//! # Architecture
//!
//! - **Directory**: per-member registry of name↔id mappings, local
//!   dispatchers, and local proxies
//! - **Dispatcher**: server-side runtime for one endpoint; round-robin
//!   fan-out over one queue per cooperative worker
//! - **Proxy**: client-side handle; deterministic routing over a snapshot
//!   of member connections, response correlation by request id
//! - **Executor**: fixed pool of cooperative workers polling non-blocking
//!   tasklets
//! - **Cluster**: the substrate seam — membership, connections, one-shot
//!   member operations, cluster-unique ids — with an in-process
//!   implementation for tests and examples
//!
//! # Key operations
//!
//! - `EndpointNode::new_endpoint`: assign an id once, publish the handler
//!   on every member, return a proxy
//! - `EndpointNode::get_endpoint`: resolve a name from another member,
//!   build or reuse the local proxy
//! - `EndpointProxy::call` / `call_async`: invoke with round-robin routing
//!   and per-proxy request correlation

pub mod cluster;
pub mod config;
pub mod directory;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod handler;
pub mod local;
pub mod metrics;
pub mod wire;

mod node;
mod proxy;

pub use cluster::{ClusterSubstrate, Connection, MemberOperation, OperationReply};
pub use config::EndpointConfig;
pub use directory::EndpointDirectory;
pub use dispatcher::EndpointDispatcher;
pub use error::{EndpointError, Result};
pub use executor::{CooperativeExecutor, Progress, Tasklet};
pub use handler::{handler_fn, stateful_handler_fn, HandlerFactory, RawHandler};
pub use local::LocalCluster;
pub use node::EndpointNode;
pub use proxy::{EndpointProxy, PendingCall};
