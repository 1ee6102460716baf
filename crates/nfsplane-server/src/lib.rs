#![warn(missing_docs)]

//! nfsplane server subsystem: export table, client authorization, export statistics

pub mod config;
pub mod error;
pub mod export;
pub mod export_stats;
pub mod export_table;

pub use config::ServerConfig;
pub use error::{ExportError, Result};
pub use export::{ExportEntry, ExportOptions, MappedCredential, NetRule, SecFlavor};
pub use export_stats::{ActiveUsers, ExportStatReport, UserStatReport};
pub use export_table::{AuthDecision, DenyReason, ExportOp, ExportOutcome, ExportTable, Grant};
