//! Export and active-user statistics query records
//!
//! Both queries answer with a versioned descriptor followed by fixed-size
//! records, big-endian.

use std::net::SocketAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use nfsplane_core::wire::{WireDecoder, WireEncoder};
use nfsplane_core::{ExportKey, StatsSnapshot, WireError};
use tracing::debug;

use crate::export_table::ExportTable;

/// Export stat record version.
pub const NFS_EXPORT_STAT_REC_VERSION: u32 = 1;
/// Active user record version.
pub const NFS_USER_STAT_REC_VERSION: u32 = 1;
/// Record tag for a user record.
pub const NFS_USER_STAT_USER_REC: u8 = 0;
/// Record tag for a path record.
pub const NFS_USER_STAT_PATH_REC: u8 = 1;
/// Width of the NUL-padded path field.
pub const STAT_PATH_LEN: usize = 1025;

/// Default idle time after which a user drops out of the active list.
pub const DEFAULT_USER_IDLE_TIMEOUT: Duration = Duration::from_secs(3600);

fn check_version(expected: u32, got: u32) -> Result<(), WireError> {
    if got != expected {
        return Err(WireError::VersionMismatch { expected, got });
    }
    Ok(())
}

/// Per-export counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportStatRecord {
    /// Exported path
    pub path: String,
    /// Requests received
    pub ops: u64,
    /// Bytes read
    pub bytes_read: u64,
    /// Bytes written
    pub bytes_written: u64,
}

/// Answer to the export statistics query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportStatReport {
    /// One record per export
    pub records: Vec<ExportStatRecord>,
}

impl ExportStatReport {
    /// Builds the report from the export list and per-export counters.
    pub fn collect(table: &ExportTable, snapshot: &StatsSnapshot) -> Self {
        let records = table
            .entries()
            .iter()
            .map(|entry| {
                let (ops, bytes_read, bytes_written) = snapshot.export_totals(entry.key());
                ExportStatRecord {
                    path: entry.full_path(),
                    ops,
                    bytes_read,
                    bytes_written,
                }
            })
            .collect();
        Self { records }
    }

    /// Serializes descriptor and records.
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = WireEncoder::with_capacity(12 + self.records.len() * (STAT_PATH_LEN + 24));
        enc.put_u32(NFS_EXPORT_STAT_REC_VERSION);
        enc.put_u64(self.records.len() as u64);
        for rec in &self.records {
            enc.put_fixed(rec.path.as_bytes(), STAT_PATH_LEN);
            enc.put_u64(rec.ops);
            enc.put_u64(rec.bytes_read);
            enc.put_u64(rec.bytes_written);
        }
        enc.finish().to_vec()
    }

    /// Parses an encoded report.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut dec = WireDecoder::new(bytes);
        check_version(NFS_EXPORT_STAT_REC_VERSION, dec.get_u32()?)?;
        let count = dec.get_u64()?;
        let mut records = Vec::new();
        for _ in 0..count {
            records.push(ExportStatRecord {
                path: dec.get_fixed_str(STAT_PATH_LEN, "path")?,
                ops: dec.get_u64()?,
                bytes_read: dec.get_u64()?,
                bytes_written: dec.get_u64()?,
            });
        }
        Ok(Self { records })
    }
}

/// One record of the active user list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserStatRecord {
    /// Activity of one user from one address
    User {
        /// User id
        uid: u32,
        /// Client socket address
        sock: SocketAddr,
        /// Requests
        ops: u64,
        /// Bytes read
        bytes_read: u64,
        /// Bytes written
        bytes_written: u64,
        /// First request, seconds since the epoch
        tm_start: i64,
        /// Latest request, seconds since the epoch
        tm_last: i64,
    },
    /// Export path the following user records belong to
    Path {
        /// Exported path
        path: String,
    },
}

/// Answer to the active user query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserStatReport {
    /// Path and user records, each export's path before its users
    pub records: Vec<UserStatRecord>,
}

impl UserStatReport {
    /// Serializes descriptor and records.
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = WireEncoder::new();
        enc.put_u32(NFS_USER_STAT_REC_VERSION);
        enc.put_u32(self.records.len() as u32);
        for rec in &self.records {
            match rec {
                UserStatRecord::User {
                    uid,
                    sock,
                    ops,
                    bytes_read,
                    bytes_written,
                    tm_start,
                    tm_last,
                } => {
                    enc.put_u8(NFS_USER_STAT_USER_REC);
                    enc.put_u32(*uid);
                    enc.put_socket_addr(sock);
                    enc.put_u64(*ops);
                    enc.put_u64(*bytes_read);
                    enc.put_u64(*bytes_written);
                    enc.put_i64(*tm_start);
                    enc.put_i64(*tm_last);
                }
                UserStatRecord::Path { path } => {
                    enc.put_u8(NFS_USER_STAT_PATH_REC);
                    enc.put_fixed(path.as_bytes(), STAT_PATH_LEN);
                }
            }
        }
        enc.finish().to_vec()
    }

    /// Parses an encoded report.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut dec = WireDecoder::new(bytes);
        check_version(NFS_USER_STAT_REC_VERSION, dec.get_u32()?)?;
        let count = dec.get_u32()?;
        let mut records = Vec::new();
        for _ in 0..count {
            let rec = match dec.get_u8()? {
                NFS_USER_STAT_USER_REC => UserStatRecord::User {
                    uid: dec.get_u32()?,
                    sock: dec.get_socket_addr()?,
                    ops: dec.get_u64()?,
                    bytes_read: dec.get_u64()?,
                    bytes_written: dec.get_u64()?,
                    tm_start: dec.get_i64()?,
                    tm_last: dec.get_i64()?,
                },
                NFS_USER_STAT_PATH_REC => UserStatRecord::Path {
                    path: dec.get_fixed_str(STAT_PATH_LEN, "path")?,
                },
                other => {
                    return Err(WireError::InvalidField {
                        field: "rec_type",
                        reason: format!("unknown record type {}", other),
                    })
                }
            };
            records.push(rec);
        }
        Ok(Self { records })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct UserKey {
    export: ExportKey,
    uid: u32,
    sock: SocketAddr,
}

#[derive(Debug, Clone, Copy)]
struct UserActivity {
    ops: u64,
    bytes_read: u64,
    bytes_written: u64,
    tm_start: i64,
    tm_last: i64,
}

/// Tracks which users are active on which export.
pub struct ActiveUsers {
    users: DashMap<UserKey, UserActivity>,
    idle_timeout: Duration,
}

impl ActiveUsers {
    /// Creates a tracker that forgets users idle longer than `idle_timeout`.
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            users: DashMap::new(),
            idle_timeout,
        }
    }

    /// Records one request at the current wall-clock time.
    pub fn record(
        &self,
        export: ExportKey,
        uid: u32,
        sock: SocketAddr,
        bytes_read: u64,
        bytes_written: u64,
    ) {
        self.record_at(export, uid, sock, bytes_read, bytes_written, unix_now());
    }

    /// Records one request at `now` seconds since the epoch.
    pub fn record_at(
        &self,
        export: ExportKey,
        uid: u32,
        sock: SocketAddr,
        bytes_read: u64,
        bytes_written: u64,
        now: i64,
    ) {
        let key = UserKey { export, uid, sock };
        let mut entry = self.users.entry(key).or_insert_with(|| UserActivity {
            ops: 0,
            bytes_read: 0,
            bytes_written: 0,
            tm_start: now,
            tm_last: now,
        });
        entry.ops += 1;
        entry.bytes_read += bytes_read;
        entry.bytes_written += bytes_written;
        entry.tm_last = entry.tm_last.max(now);
    }

    /// Drops users idle since before `now - idle_timeout`; returns how many.
    pub fn expire_at(&self, now: i64) -> usize {
        let cutoff = now - self.idle_timeout.as_secs() as i64;
        let before = self.users.len();
        self.users.retain(|_, a| a.tm_last >= cutoff);
        let removed = before.saturating_sub(self.users.len());
        if removed > 0 {
            debug!(removed, "expired idle users");
        }
        removed
    }

    /// Drops idle users at the current wall-clock time.
    pub fn expire(&self) -> usize {
        self.expire_at(unix_now())
    }

    /// Number of active (user, address, export) triples.
    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Builds the active user report, grouped by export.
    pub fn report(&self, table: &ExportTable) -> UserStatReport {
        let mut records = Vec::new();
        for entry in table.entries() {
            let mut users: Vec<(UserKey, UserActivity)> = self
                .users
                .iter()
                .filter(|u| u.key().export == entry.key())
                .map(|u| (*u.key(), *u.value()))
                .collect();
            if users.is_empty() {
                continue;
            }
            users.sort_by_key(|(k, _)| (k.uid, k.sock));
            records.push(UserStatRecord::Path {
                path: entry.full_path(),
            });
            records.extend(users.into_iter().map(|(k, a)| UserStatRecord::User {
                uid: k.uid,
                sock: k.sock,
                ops: a.ops,
                bytes_read: a.bytes_read,
                bytes_written: a.bytes_written,
                tm_start: a.tm_start,
                tm_last: a.tm_last,
            }));
        }
        UserStatReport { records }
    }
}

impl Default for ActiveUsers {
    fn default() -> Self {
        Self::new(DEFAULT_USER_IDLE_TIMEOUT)
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
