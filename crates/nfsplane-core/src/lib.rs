#![warn(missing_docs)]

//! nfsplane core subsystem: file handle codec, NFS status codes, statistics registry

pub mod error;
pub mod filehandle;
pub mod op;
pub mod stats;
pub mod status;
pub mod version;
pub mod wire;

pub use error::{HandleError, WireError};
pub use filehandle::{ExportKey, FileHandle};
pub use op::NfsOp;
pub use status::{classify, ErrorClass};
pub use stats::{Counter, RpcCounter, StatKey, StatsRegistry, StatsSnapshot};
pub use version::NfsVersion;
