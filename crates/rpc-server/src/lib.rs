//! RPC Server - JSON-RPC over HTTP for both staking domains
//!
//! Every method takes the domain it targets as its first parameter:
//! - Queries: getLedger, getBalance, getRequestInfo, getOracleRecord,
//!   getPauseStatus, getClaimable, getOutboxMessage, getEpoch, getHeight
//! - Permissionless actions: finalizeRecord, claimUnstake
//! - relayMessage: claim an attested message on the destination domain

pub mod http_server;
pub mod methods;

pub use http_server::HttpRpcServer;
pub use methods::{RpcContext, RpcError};

/// RPC Server configuration
#[derive(Clone, Debug)]
pub struct RpcServerConfig {
    /// HTTP RPC bind address
    pub http_addr: String,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self {
            http_addr: "127.0.0.1:8899".to_string(),
        }
    }
}
