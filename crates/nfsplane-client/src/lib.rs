#![warn(missing_docs)]

//! nfsplane client subsystem: mount sessions, retry policy, lock coordination, identity mapping

pub mod dispatch;
pub mod error;
pub mod idmap;
pub mod lock;
pub mod lockd;
pub mod mount_config;
pub mod retry;
pub mod session;
pub mod transport;

pub use dispatch::Dispatcher;
pub use error::{ClientError, Result};
pub use idmap::{IdentityMapper, IdentityQuery, IdentityValue, NameService};
pub use lock::{LockCoordinator, LockOp, LockRequest, LockService, Resolution};
pub use lockd::{LockAnswer, LockNotify};
pub use mount_config::{LockMode, MountConfig, MountFlag, MountFlags, MountParams};
pub use retry::RetryPolicy;
pub use session::{MountInfo, MountSession, MountState, Operation};
pub use transport::{RpcReply, RpcRequest, RpcTransport, TransportFailure};
