//! NFS status codes, their symbolic names and error classification

/// Success
pub const NFS_OK: u32 = 0;
/// Not owner
pub const NFSERR_PERM: u32 = 1;
/// No such file or directory
pub const NFSERR_NOENT: u32 = 2;
/// I/O error
pub const NFSERR_IO: u32 = 5;
/// No such device or address
pub const NFSERR_NXIO: u32 = 6;
/// Permission denied
pub const NFSERR_ACCES: u32 = 13;
/// File exists
pub const NFSERR_EXIST: u32 = 17;
/// Cross-device link
pub const NFSERR_XDEV: u32 = 18;
/// No such device
pub const NFSERR_NODEV: u32 = 19;
/// Not a directory
pub const NFSERR_NOTDIR: u32 = 20;
/// Is a directory
pub const NFSERR_ISDIR: u32 = 21;
/// Invalid argument
pub const NFSERR_INVAL: u32 = 22;
/// File too large
pub const NFSERR_FBIG: u32 = 27;
/// No space left on device
pub const NFSERR_NOSPC: u32 = 28;
/// Read-only filesystem
pub const NFSERR_ROFS: u32 = 30;
/// Too many links
pub const NFSERR_MLINK: u32 = 31;
/// Name too long
pub const NFSERR_NAMETOL: u32 = 63;
/// Directory not empty
pub const NFSERR_NOTEMPTY: u32 = 66;
/// Quota exceeded
pub const NFSERR_DQUOT: u32 = 69;
/// Stale file handle
pub const NFSERR_STALE: u32 = 70;
/// Too many levels of remote in path
pub const NFSERR_REMOTE: u32 = 71;
/// Write cache flushed
pub const NFSERR_WFLUSH: u32 = 99;
/// Illegal file handle
pub const NFSERR_BADHANDLE: u32 = 10001;
/// SETATTR guard check failed
pub const NFSERR_NOT_SYNC: u32 = 10002;
/// READDIR cookie is stale
pub const NFSERR_BAD_COOKIE: u32 = 10003;
/// Operation not supported
pub const NFSERR_NOTSUPP: u32 = 10004;
/// Buffer or request too small
pub const NFSERR_TOOSMALL: u32 = 10005;
/// Server fault
pub const NFSERR_SERVERFAULT: u32 = 10006;
/// Object type not supported
pub const NFSERR_BADTYPE: u32 = 10007;
/// Server busy, retry later (jukebox)
pub const NFSERR_DELAY: u32 = 10008;

/// First NFSv4-specific status code (`NFSERR_SAME`).
pub const NFSERR_V4_BASE: u32 = 10009;
/// Lease expired
pub const NFSERR_EXPIRED: u32 = 10011;
/// Server in grace period
pub const NFSERR_GRACE: u32 = 10013;
/// Volatile file handle expired
pub const NFSERR_FHEXPIRED: u32 = 10014;
/// Wrong security flavor
pub const NFSERR_WRONGSEC: u32 = 10016;
/// Minor version not supported
pub const NFSERR_MINOR_VERS_MISMATCH: u32 = 10021;
/// Client id unknown to a restarted server
pub const NFSERR_STALE_CLIENTID: u32 = 10022;
/// State id from a previous server instance
pub const NFSERR_STALE_STATEID: u32 = 10023;
/// Lease moved to another server
pub const NFSERR_LEASE_MOVED: u32 = 10031;
/// Undecodable XDR
pub const NFSERR_BADXDR: u32 = 10036;
/// Illegal operation
pub const NFSERR_OP_ILLEGAL: u32 = 10044;

/// Number of buckets in the common error table.
pub const NFSERR_INFO_COMMON_SIZE: usize = 30;
/// Number of buckets in the NFSv4 error table.
pub const NFSERR_INFO_V4_SIZE: usize = 40;

/// Status codes of the common error table, in bucket order.
pub const COMMON_ERRORS: [(u32, &str); NFSERR_INFO_COMMON_SIZE] = [
    (NFS_OK, "NFS_OK"),
    (NFSERR_PERM, "NFSERR_PERM"),
    (NFSERR_NOENT, "NFSERR_NOENT"),
    (NFSERR_IO, "NFSERR_IO"),
    (NFSERR_NXIO, "NFSERR_NXIO"),
    (NFSERR_ACCES, "NFSERR_ACCES"),
    (NFSERR_EXIST, "NFSERR_EXIST"),
    (NFSERR_XDEV, "NFSERR_XDEV"),
    (NFSERR_NODEV, "NFSERR_NODEV"),
    (NFSERR_NOTDIR, "NFSERR_NOTDIR"),
    (NFSERR_ISDIR, "NFSERR_ISDIR"),
    (NFSERR_INVAL, "NFSERR_INVAL"),
    (NFSERR_FBIG, "NFSERR_FBIG"),
    (NFSERR_NOSPC, "NFSERR_NOSPC"),
    (NFSERR_ROFS, "NFSERR_ROFS"),
    (NFSERR_MLINK, "NFSERR_MLINK"),
    (NFSERR_NAMETOL, "NFSERR_NAMETOL"),
    (NFSERR_NOTEMPTY, "NFSERR_NOTEMPTY"),
    (NFSERR_DQUOT, "NFSERR_DQUOT"),
    (NFSERR_STALE, "NFSERR_STALE"),
    (NFSERR_REMOTE, "NFSERR_REMOTE"),
    (NFSERR_WFLUSH, "NFSERR_WFLUSH"),
    (NFSERR_BADHANDLE, "NFSERR_BADHANDLE"),
    (NFSERR_NOT_SYNC, "NFSERR_NOT_SYNC"),
    (NFSERR_BAD_COOKIE, "NFSERR_BAD_COOKIE"),
    (NFSERR_NOTSUPP, "NFSERR_NOTSUPP"),
    (NFSERR_TOOSMALL, "NFSERR_TOOSMALL"),
    (NFSERR_SERVERFAULT, "NFSERR_SERVERFAULT"),
    (NFSERR_BADTYPE, "NFSERR_BADTYPE"),
    (NFSERR_DELAY, "NFSERR_DELAY"),
];

/// Names of the NFSv4 error table; bucket `i` holds code `NFSERR_V4_BASE + i`.
pub const V4_ERROR_NAMES: [&str; NFSERR_INFO_V4_SIZE] = [
    "ERR_SAME",
    "ERR_DENIED",
    "ERR_EXPIRED",
    "ERR_LOCKED",
    "ERR_GRACE",
    "ERR_FHEXPIRED",
    "ERR_SHARE_DENIED",
    "ERR_WRONGSEC",
    "ERR_CLID_INUSE",
    "ERR_RESOURCE",
    "ERR_MOVED",
    "ERR_NOFILEHANDLE",
    "ERR_MINOR_VERS_MISMATCH",
    "ERR_STALE_CLIENTID",
    "ERR_STALE_STATEID",
    "ERR_OLD_STATEID",
    "ERR_BAD_STATEID",
    "ERR_BAD_SEQID",
    "ERR_NOT_SAME",
    "ERR_LOCK_RANGE",
    "ERR_SYMLINK",
    "ERR_RESTOREFH",
    "ERR_LEASE_MOVED",
    "ERR_ATTRNOTSUPP",
    "ERR_NO_GRACE",
    "ERR_RECLAIM_BAD",
    "ERR_RECLAIM_CONFLICT",
    "ERR_BADXDR",
    "ERR_LOCKS_HELD",
    "ERR_OPENMODE",
    "ERR_BADOWNER",
    "ERR_BADCHAR",
    "ERR_BADNAME",
    "ERR_BAD_RANGE",
    "ERR_LOCK_NOTSUPP",
    "ERR_OP_ILLEGAL",
    "ERR_DEADLOCK",
    "ERR_FILE_OPEN",
    "ERR_ADMIN_REVOKED",
    "ERR_CB_PATH_DOWN",
];

/// Which error-count table a status code lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorBucket {
    /// Index into the common table
    Common(usize),
    /// Index into the NFSv4 table
    V4(usize),
    /// Overflow bucket for codes neither table knows
    Unknown,
}

/// Locates the statistics bucket for a status code.
pub fn error_bucket(code: u32) -> ErrorBucket {
    if let Some(idx) = COMMON_ERRORS.iter().position(|(c, _)| *c == code) {
        return ErrorBucket::Common(idx);
    }
    let v4_end = NFSERR_V4_BASE + NFSERR_INFO_V4_SIZE as u32;
    if (NFSERR_V4_BASE..v4_end).contains(&code) {
        return ErrorBucket::V4((code - NFSERR_V4_BASE) as usize);
    }
    ErrorBucket::Unknown
}

/// Symbolic name for a status code, if known.
pub fn nfserr_name(code: u32) -> Option<&'static str> {
    match error_bucket(code) {
        ErrorBucket::Common(idx) => Some(COMMON_ERRORS[idx].1),
        ErrorBucket::V4(idx) => Some(V4_ERROR_NAMES[idx]),
        ErrorBucket::Unknown => None,
    }
}

/// How a failure should be handled by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Timeout or connection reset; retried per mount policy
    TransportTransient,
    /// Semantic failure reported by the server; surfaced verbatim
    ProtocolSemantic,
    /// Version or handle-format mismatch; fatal to the operation only
    Negotiation,
    /// Server asked the client to wait and resend
    ServerDelay,
    /// Server lost or invalidated state the mount must re-establish
    StateRecovery,
    /// Mount is dead
    SessionFatal,
}

/// Classifies a non-zero status code returned in a reply.
pub fn classify(code: u32) -> ErrorClass {
    match code {
        NFSERR_DELAY => ErrorClass::ServerDelay,
        NFSERR_GRACE | NFSERR_EXPIRED | NFSERR_FHEXPIRED | NFSERR_STALE_CLIENTID
        | NFSERR_STALE_STATEID | NFSERR_LEASE_MOVED => ErrorClass::StateRecovery,
        NFSERR_MINOR_VERS_MISMATCH | NFSERR_BADHANDLE | NFSERR_BADXDR | NFSERR_OP_ILLEGAL => {
            ErrorClass::Negotiation
        }
        _ => ErrorClass::ProtocolSemantic,
    }
}
