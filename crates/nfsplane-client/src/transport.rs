//! RPC transport seam for mount sessions.
//!
//! A [`MountSession`](crate::session::MountSession) never touches sockets.
//! It hands each attempt to an [`RpcTransport`] and applies its own
//! timeout, retry and health policy to whatever comes back.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use nfsplane_core::{FileHandle, NfsOp};

/// One NFS call as handed to the transport.
#[derive(Debug, Clone)]
pub struct RpcRequest {
    /// Transaction id; unchanged across retransmissions
    pub xid: u32,
    /// Procedure
    pub op: NfsOp,
    /// Target object, if the procedure takes one
    pub handle: Option<FileHandle>,
    /// Encoded arguments
    pub payload: Bytes,
    /// Set on every send after the first
    pub retransmit: bool,
}

/// Reply from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcReply {
    /// NFS status; 0 is success
    pub status: u32,
    /// Encoded results
    pub payload: Bytes,
}

impl RpcReply {
    /// Successful reply carrying `payload`.
    pub fn ok(payload: impl Into<Bytes>) -> Self {
        Self {
            status: 0,
            payload: payload.into(),
        }
    }

    /// Failed reply with no results.
    pub fn status(status: u32) -> Self {
        Self {
            status,
            payload: Bytes::new(),
        }
    }
}

/// Transport-level failure of a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportFailure {
    /// No reply within the transport's own deadline
    Timeout,
    /// Connection dropped; the request may or may not have executed
    ConnectionReset,
}

impl fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportFailure::Timeout => write!(f, "timeout"),
            TransportFailure::ConnectionReset => write!(f, "connection reset"),
        }
    }
}

/// Carries NFS calls to one server.
#[async_trait]
pub trait RpcTransport: Send + Sync + 'static {
    /// Sends `request` and waits for its reply.
    async fn call(&self, request: RpcRequest) -> Result<RpcReply, TransportFailure>;

    /// Rebuilds server-side state (client id, session) after the server
    /// reported it lost.
    async fn reestablish(&self) -> Result<(), TransportFailure> {
        Ok(())
    }
}
