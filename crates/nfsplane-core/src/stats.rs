//! Operation and error statistics
//!
//! Every component records into one shared [`StatsRegistry`]. Counters are
//! plain atomics; the only way down is [`StatsRegistry::reset_all`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::filehandle::ExportKey;
use crate::op::NfsOp;
use crate::status::{
    error_bucket, ErrorBucket, COMMON_ERRORS, NFSERR_INFO_COMMON_SIZE, NFSERR_INFO_V4_SIZE,
    NFSERR_V4_BASE, V4_ERROR_NAMES,
};

/// Per-operation counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Counter {
    /// Requests sent (including retransmissions)
    Attempts,
    /// Requests that completed with NFS_OK
    Successes,
    /// Answered from a local cache
    CacheHits,
    /// Had to go to the server
    CacheMisses,
    /// Payload bytes read
    BytesRead,
    /// Payload bytes written
    BytesWritten,
}

impl Counter {
    const COUNT: usize = 6;

    fn index(self) -> usize {
        self as usize
    }
}

/// RPC-level client counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RpcCounter {
    /// Calls issued
    Requests,
    /// Retransmissions
    Retries,
    /// Attempts that timed out
    Timeouts,
    /// Replies (or lock answers) nobody was waiting for
    Unexpected,
    /// Replies that could not be parsed
    Invalid,
}

impl RpcCounter {
    const COUNT: usize = 5;
}

/// Network lock manager counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NlmCounter {
    /// Lock requests
    Lock,
    /// Lock tests
    Test,
    /// Unlock requests
    Unlock,
}

impl NlmCounter {
    const COUNT: usize = 3;
}

/// Server duplicate request cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServerCacheCounter {
    /// Retransmission of a request still being processed
    InProgressHits,
    /// Retransmission of a completed idempotent request
    IdemDoneHits,
    /// Retransmission of a completed non-idempotent request
    NonIdemDoneHits,
    /// Request not in the cache
    Misses,
}

impl ServerCacheCounter {
    const COUNT: usize = 4;
}

/// Address of a single counter in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatKey {
    /// Per-operation counter, optionally scoped to one export
    Op {
        /// Operation
        op: NfsOp,
        /// Export, `None` for mount-wide tallies
        export: Option<ExportKey>,
        /// Which counter
        counter: Counter,
    },
    /// Occurrence of a status code
    Error(u32),
    /// RPC counter
    Rpc(RpcCounter),
    /// Lock manager counter
    Nlm(NlmCounter),
    /// Duplicate request cache counter
    ServerCache(ServerCacheCounter),
}

impl StatKey {
    /// Shorthand for an operation counter.
    pub fn op(op: NfsOp, export: Option<ExportKey>, counter: Counter) -> Self {
        StatKey::Op {
            op,
            export,
            counter,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct OpSlot {
    op: NfsOp,
    export: Option<ExportKey>,
}

#[derive(Debug, Default)]
struct OpCounters {
    values: [AtomicU64; Counter::COUNT],
}

fn zeroed<const N: usize>() -> [AtomicU64; N] {
    std::array::from_fn(|_| AtomicU64::new(0))
}

fn load_all(values: &[AtomicU64]) -> Vec<u64> {
    values.iter().map(|v| v.load(Ordering::Relaxed)).collect()
}

fn clear(values: &[AtomicU64]) {
    for v in values {
        v.store(0, Ordering::Relaxed);
    }
}

/// Shared statistics registry.
pub struct StatsRegistry {
    ops: DashMap<OpSlot, Arc<OpCounters>>,
    common_errors: [AtomicU64; NFSERR_INFO_COMMON_SIZE],
    v4_errors: [AtomicU64; NFSERR_INFO_V4_SIZE],
    unknown_errors: AtomicU64,
    rpc: [AtomicU64; RpcCounter::COUNT],
    nlm: [AtomicU64; NlmCounter::COUNT],
    server_cache: [AtomicU64; ServerCacheCounter::COUNT],
}

impl StatsRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            ops: DashMap::new(),
            common_errors: zeroed(),
            v4_errors: zeroed(),
            unknown_errors: AtomicU64::new(0),
            rpc: zeroed(),
            nlm: zeroed(),
            server_cache: zeroed(),
        }
    }

    /// Adds one to `key`.
    pub fn increment(&self, key: StatKey) {
        self.increment_by(key, 1);
    }

    /// Adds `n` to `key`.
    pub fn increment_by(&self, key: StatKey, n: u64) {
        self.slot(key).fetch_add(n, Ordering::Relaxed);
    }

    fn slot(&self, key: StatKey) -> SlotRef<'_> {
        match key {
            StatKey::Op {
                op,
                export,
                counter,
            } => {
                let slot = OpSlot { op, export };
                let counters = match self.ops.get(&slot) {
                    Some(c) => Arc::clone(c.value()),
                    None => Arc::clone(self.ops.entry(slot).or_default().value()),
                };
                SlotRef::Owned(counters, counter.index())
            }
            StatKey::Error(code) => SlotRef::Borrowed(match error_bucket(code) {
                ErrorBucket::Common(idx) => &self.common_errors[idx],
                ErrorBucket::V4(idx) => &self.v4_errors[idx],
                ErrorBucket::Unknown => &self.unknown_errors,
            }),
            StatKey::Rpc(c) => SlotRef::Borrowed(&self.rpc[c as usize]),
            StatKey::Nlm(c) => SlotRef::Borrowed(&self.nlm[c as usize]),
            StatKey::ServerCache(c) => SlotRef::Borrowed(&self.server_cache[c as usize]),
        }
    }

    /// Records one status code, counted under the code's table bucket.
    pub fn record_status(&self, code: u32) {
        self.increment(StatKey::Error(code));
    }

    /// Returns an immutable copy of every counter.
    ///
    /// Increments racing with the snapshot may or may not be included.
    pub fn snapshot(&self) -> StatsSnapshot {
        let mut ops: Vec<OpStat> = self
            .ops
            .iter()
            .map(|entry| {
                let v = &entry.value().values;
                let get = |c: Counter| v[c.index()].load(Ordering::Relaxed);
                OpStat {
                    op: entry.key().op,
                    export: entry.key().export,
                    attempts: get(Counter::Attempts),
                    successes: get(Counter::Successes),
                    cache_hits: get(Counter::CacheHits),
                    cache_misses: get(Counter::CacheMisses),
                    bytes_read: get(Counter::BytesRead),
                    bytes_written: get(Counter::BytesWritten),
                }
            })
            .collect();
        ops.sort_by_key(|s| (s.op, s.export));

        let rpc = load_all(&self.rpc);
        let nlm = load_all(&self.nlm);
        let drc = load_all(&self.server_cache);

        StatsSnapshot {
            ops,
            common_errors: load_all(&self.common_errors),
            v4_errors: load_all(&self.v4_errors),
            unknown_errors: self.unknown_errors.load(Ordering::Relaxed),
            rpc: RpcStats {
                requests: rpc[RpcCounter::Requests as usize],
                retries: rpc[RpcCounter::Retries as usize],
                timeouts: rpc[RpcCounter::Timeouts as usize],
                unexpected: rpc[RpcCounter::Unexpected as usize],
                invalid: rpc[RpcCounter::Invalid as usize],
            },
            nlm: NlmStats {
                lock: nlm[NlmCounter::Lock as usize],
                test: nlm[NlmCounter::Test as usize],
                unlock: nlm[NlmCounter::Unlock as usize],
            },
            server_cache: ServerCacheStats {
                in_progress_hits: drc[ServerCacheCounter::InProgressHits as usize],
                idem_done_hits: drc[ServerCacheCounter::IdemDoneHits as usize],
                non_idem_done_hits: drc[ServerCacheCounter::NonIdemDoneHits as usize],
                misses: drc[ServerCacheCounter::Misses as usize],
            },
        }
    }

    /// Zeroes every counter. Administrative only.
    pub fn reset_all(&self) {
        for entry in self.ops.iter() {
            clear(&entry.value().values);
        }
        clear(&self.common_errors);
        clear(&self.v4_errors);
        self.unknown_errors.store(0, Ordering::Relaxed);
        clear(&self.rpc);
        clear(&self.nlm);
        clear(&self.server_cache);
        tracing::info!("statistics reset");
    }
}

impl Default for StatsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

enum SlotRef<'a> {
    Borrowed(&'a AtomicU64),
    Owned(Arc<OpCounters>, usize),
}

impl SlotRef<'_> {
    fn fetch_add(&self, n: u64, order: Ordering) {
        match self {
            SlotRef::Borrowed(a) => a.fetch_add(n, order),
            SlotRef::Owned(c, idx) => c.values[*idx].fetch_add(n, order),
        };
    }
}

/// Counters for one operation, optionally scoped to one export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpStat {
    /// Operation
    pub op: NfsOp,
    /// Export, if scoped
    pub export: Option<ExportKey>,
    /// Requests sent
    pub attempts: u64,
    /// Successful completions
    pub successes: u64,
    /// Cache hits
    pub cache_hits: u64,
    /// Cache misses
    pub cache_misses: u64,
    /// Bytes read
    pub bytes_read: u64,
    /// Bytes written
    pub bytes_written: u64,
}

impl OpStat {
    /// Value of one counter.
    pub fn get(&self, counter: Counter) -> u64 {
        match counter {
            Counter::Attempts => self.attempts,
            Counter::Successes => self.successes,
            Counter::CacheHits => self.cache_hits,
            Counter::CacheMisses => self.cache_misses,
            Counter::BytesRead => self.bytes_read,
            Counter::BytesWritten => self.bytes_written,
        }
    }
}

/// RPC counter values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct RpcStats {
    pub requests: u64,
    pub retries: u64,
    pub timeouts: u64,
    pub unexpected: u64,
    pub invalid: u64,
}

/// Lock manager counter values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct NlmStats {
    pub lock: u64,
    pub test: u64,
    pub unlock: u64,
}

/// Duplicate request cache counter values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct ServerCacheStats {
    pub in_progress_hits: u64,
    pub idem_done_hits: u64,
    pub non_idem_done_hits: u64,
    pub misses: u64,
}

/// Point-in-time copy of a [`StatsRegistry`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Operation counters sorted by (op, export)
    pub ops: Vec<OpStat>,
    /// Common error table, indexed like `COMMON_ERRORS`
    pub common_errors: Vec<u64>,
    /// NFSv4 error table, indexed from `NFSERR_V4_BASE`
    pub v4_errors: Vec<u64>,
    /// Codes neither table recognizes
    pub unknown_errors: u64,
    /// RPC counters
    pub rpc: RpcStats,
    /// Lock manager counters
    pub nlm: NlmStats,
    /// Duplicate request cache counters
    pub server_cache: ServerCacheStats,
}

impl StatsSnapshot {
    /// Counters for one (op, export) pair, if any were recorded.
    pub fn op(&self, op: NfsOp, export: Option<ExportKey>) -> Option<&OpStat> {
        self.ops.iter().find(|s| s.op == op && s.export == export)
    }

    /// Times `code` was recorded. Unknown codes share the overflow bucket.
    pub fn error_count(&self, code: u32) -> u64 {
        match error_bucket(code) {
            ErrorBucket::Common(idx) => self.common_errors[idx],
            ErrorBucket::V4(idx) => self.v4_errors[idx],
            ErrorBucket::Unknown => self.unknown_errors,
        }
    }

    /// Reads the value of any counter.
    pub fn get(&self, key: &StatKey) -> u64 {
        match *key {
            StatKey::Op {
                op,
                export,
                counter,
            } => self.op(op, export).map(|s| s.get(counter)).unwrap_or(0),
            StatKey::Error(code) => self.error_count(code),
            StatKey::Rpc(c) => match c {
                RpcCounter::Requests => self.rpc.requests,
                RpcCounter::Retries => self.rpc.retries,
                RpcCounter::Timeouts => self.rpc.timeouts,
                RpcCounter::Unexpected => self.rpc.unexpected,
                RpcCounter::Invalid => self.rpc.invalid,
            },
            StatKey::Nlm(c) => match c {
                NlmCounter::Lock => self.nlm.lock,
                NlmCounter::Test => self.nlm.test,
                NlmCounter::Unlock => self.nlm.unlock,
            },
            StatKey::ServerCache(c) => match c {
                ServerCacheCounter::InProgressHits => self.server_cache.in_progress_hits,
                ServerCacheCounter::IdemDoneHits => self.server_cache.idem_done_hits,
                ServerCacheCounter::NonIdemDoneHits => self.server_cache.non_idem_done_hits,
                ServerCacheCounter::Misses => self.server_cache.misses,
            },
        }
    }

    /// Sums (attempts, bytes read, bytes written) over all ops scoped to `export`.
    pub fn export_totals(&self, export: ExportKey) -> (u64, u64, u64) {
        self.ops
            .iter()
            .filter(|s| s.export == Some(export))
            .fold((0, 0, 0), |(ops, rd, wr), s| {
                (ops + s.attempts, rd + s.bytes_read, wr + s.bytes_written)
            })
    }

    /// Renders the snapshot in Prometheus text exposition format.
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();

        let op_series: [(&str, &str, Counter); 6] = [
            ("nfsplane_op_attempts_total", "Requests sent per operation", Counter::Attempts),
            ("nfsplane_op_successes_total", "Successful completions per operation", Counter::Successes),
            ("nfsplane_op_cache_hits_total", "Cache hits per operation", Counter::CacheHits),
            ("nfsplane_op_cache_misses_total", "Cache misses per operation", Counter::CacheMisses),
            ("nfsplane_op_bytes_read_total", "Bytes read per operation", Counter::BytesRead),
            ("nfsplane_op_bytes_written_total", "Bytes written per operation", Counter::BytesWritten),
        ];
        for (name, help, counter) in op_series {
            output.push_str(&format!("# HELP {} {}\n", name, help));
            output.push_str(&format!("# TYPE {} counter\n", name));
            for s in &self.ops {
                let export = s.export.map(|e| e.to_string()).unwrap_or_default();
                output.push_str(&format!(
                    "{}{{op=\"{}\",export=\"{}\"}} {}\n",
                    name,
                    s.op.name(),
                    export,
                    s.get(counter)
                ));
            }
        }

        output.push_str("# HELP nfsplane_errors_total Status code occurrences\n");
        output.push_str("# TYPE nfsplane_errors_total counter\n");
        for (idx, (_, name)) in COMMON_ERRORS.iter().enumerate() {
            if self.common_errors[idx] > 0 {
                output.push_str(&format!(
                    "nfsplane_errors_total{{error=\"{}\"}} {}\n",
                    name, self.common_errors[idx]
                ));
            }
        }
        for (idx, name) in V4_ERROR_NAMES.iter().enumerate() {
            if self.v4_errors[idx] > 0 {
                output.push_str(&format!(
                    "nfsplane_errors_total{{error=\"{}\",code=\"{}\"}} {}\n",
                    name,
                    NFSERR_V4_BASE + idx as u32,
                    self.v4_errors[idx]
                ));
            }
        }
        output.push_str(&format!(
            "nfsplane_errors_total{{error=\"unknown\"}} {}\n",
            self.unknown_errors
        ));

        output.push_str("# HELP nfsplane_rpc_total RPC client counters\n");
        output.push_str("# TYPE nfsplane_rpc_total counter\n");
        for (kind, value) in [
            ("requests", self.rpc.requests),
            ("retries", self.rpc.retries),
            ("timeouts", self.rpc.timeouts),
            ("unexpected", self.rpc.unexpected),
            ("invalid", self.rpc.invalid),
        ] {
            output.push_str(&format!("nfsplane_rpc_total{{kind=\"{}\"}} {}\n", kind, value));
        }

        output.push_str("# HELP nfsplane_nlm_total Lock manager requests\n");
        output.push_str("# TYPE nfsplane_nlm_total counter\n");
        for (kind, value) in [
            ("lock", self.nlm.lock),
            ("test", self.nlm.test),
            ("unlock", self.nlm.unlock),
        ] {
            output.push_str(&format!("nfsplane_nlm_total{{kind=\"{}\"}} {}\n", kind, value));
        }

        output.push_str("# HELP nfsplane_drc_total Duplicate request cache lookups\n");
        output.push_str("# TYPE nfsplane_drc_total counter\n");
        for (kind, value) in [
            ("in_progress", self.server_cache.in_progress_hits),
            ("idem_done", self.server_cache.idem_done_hits),
            ("non_idem_done", self.server_cache.non_idem_done_hits),
            ("miss", self.server_cache.misses),
        ] {
            output.push_str(&format!("nfsplane_drc_total{{kind=\"{}\"}} {}\n", kind, value));
        }

        output
    }
}
