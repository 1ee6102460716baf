//! Lock service wire records
//!
//! The lock service answers asynchronously with a fixed-size answer record
//! and reports restarted peers with a notify record. Both are big-endian.

use std::net::IpAddr;

use bytes::Bytes;
use nfsplane_core::version::NFSV3_MAX_FH_SIZE;
use nfsplane_core::wire::{WireDecoder, WireEncoder, IP_ADDR_SIZE};
use nfsplane_core::WireError;

/// Answer record version.
pub const LOCKD_ANS_VERSION: u32 = 2;
/// Notify record version.
pub const LOCKD_NOTIFY_VERSION: u32 = 1;
/// Encoded size of an answer record.
pub const LOCKD_ANS_SIZE: usize = 4 + 4 + 8 + 4 + 4 + 8 + 8 + 4 + NFSV3_MAX_FH_SIZE;

/// Lock was granted.
pub const LOCKD_ANS_GRANTED: u32 = 0x0001;
/// Request is queued at the server; a later answer will grant it.
pub const LOCKD_ANS_BLOCKED: u32 = 0x0002;
/// Request was cancelled.
pub const LOCKD_ANS_CANCELLED: u32 = 0x0004;
/// Answer to an unlock.
pub const LOCKD_ANS_UNLOCK: u32 = 0x0008;
/// Answer to a reclaim after a server restart.
pub const LOCKD_ANS_RECLAIM: u32 = 0x0010;
/// Conflicting lock reported by a test is exclusive.
pub const LOCKD_ANS_EXCL: u32 = 0x0020;

const KNOWN_ANSWER_FLAGS: u32 = LOCKD_ANS_GRANTED
    | LOCKD_ANS_BLOCKED
    | LOCKD_ANS_CANCELLED
    | LOCKD_ANS_UNLOCK
    | LOCKD_ANS_RECLAIM
    | LOCKD_ANS_EXCL;

/// Answer flag bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct AnswerFlags(u32);

impl AnswerFlags {
    /// No flags.
    pub fn empty() -> Self {
        Self(0)
    }

    /// Builds from raw bits, rejecting undefined ones.
    pub fn from_bits(bits: u32) -> Option<Self> {
        (bits & !KNOWN_ANSWER_FLAGS == 0).then_some(Self(bits))
    }

    /// Raw bits.
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Adds `bit`.
    pub fn with(self, bit: u32) -> Self {
        Self(self.0 | (bit & KNOWN_ANSWER_FLAGS))
    }

    /// Whether `bit` is set.
    pub fn contains(self, bit: u32) -> bool {
        self.0 & bit == bit
    }

    /// Lock granted.
    pub fn granted(self) -> bool {
        self.contains(LOCKD_ANS_GRANTED)
    }

    /// Request still waiting at the server.
    pub fn blocked(self) -> bool {
        self.contains(LOCKD_ANS_BLOCKED)
    }
}

/// Answer from the lock service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockAnswer {
    /// Transaction id of the request being answered
    pub xid: u64,
    /// Error number; 0 on success
    pub errno: u32,
    /// Answer flags
    pub flags: AnswerFlags,
    /// Owning process of the lock (or of the conflicting lock for a test)
    pub pid: i32,
    /// First byte of the range
    pub start: i64,
    /// Range length; 0 means to end of file
    pub len: i64,
    /// Handle of the locked file
    pub fh: Bytes,
}

impl LockAnswer {
    /// Grant of `xid` with an empty range.
    pub fn granted(xid: u64) -> Self {
        Self {
            xid,
            errno: 0,
            flags: AnswerFlags::empty().with(LOCKD_ANS_GRANTED),
            pid: 0,
            start: 0,
            len: 0,
            fh: Bytes::new(),
        }
    }

    /// Denial of `xid` with error number `errno`.
    pub fn denied(xid: u64, errno: u32) -> Self {
        Self {
            xid,
            errno,
            flags: AnswerFlags::empty(),
            pid: 0,
            start: 0,
            len: 0,
            fh: Bytes::new(),
        }
    }

    /// Encodes the fixed-size answer record.
    pub fn encode(&self) -> Result<Bytes, WireError> {
        if self.fh.len() > NFSV3_MAX_FH_SIZE {
            return Err(WireError::InvalidField {
                field: "la_fh_len",
                reason: format!("{} exceeds {}", self.fh.len(), NFSV3_MAX_FH_SIZE),
            });
        }
        let mut enc = WireEncoder::with_capacity(LOCKD_ANS_SIZE);
        enc.put_u32(LOCKD_ANS_VERSION);
        enc.put_u32(self.errno);
        enc.put_u64(self.xid);
        enc.put_u32(self.flags.bits());
        enc.put_i32(self.pid);
        enc.put_i64(self.start);
        enc.put_i64(self.len);
        enc.put_u32(self.fh.len() as u32);
        enc.put_fixed(&self.fh, NFSV3_MAX_FH_SIZE);
        Ok(enc.finish())
    }

    /// Decodes an answer record.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut dec = WireDecoder::new(buf);
        let version = dec.get_u32()?;
        if version != LOCKD_ANS_VERSION {
            return Err(WireError::VersionMismatch {
                expected: LOCKD_ANS_VERSION,
                got: version,
            });
        }
        let errno = dec.get_u32()?;
        let xid = dec.get_u64()?;
        let raw_flags = dec.get_u32()?;
        let flags = AnswerFlags::from_bits(raw_flags).ok_or_else(|| WireError::InvalidField {
            field: "la_flags",
            reason: format!("unknown bits 0x{:x}", raw_flags & !KNOWN_ANSWER_FLAGS),
        })?;
        let pid = dec.get_i32()?;
        let start = dec.get_i64()?;
        let len = dec.get_i64()?;
        let fh_len = dec.get_u32()? as usize;
        if fh_len > NFSV3_MAX_FH_SIZE {
            return Err(WireError::InvalidField {
                field: "la_fh_len",
                reason: format!("{} exceeds {}", fh_len, NFSV3_MAX_FH_SIZE),
            });
        }
        let fh_field = dec.get_bytes(NFSV3_MAX_FH_SIZE)?;
        Ok(Self {
            xid,
            errno,
            flags,
            pid,
            start,
            len,
            fh: Bytes::copy_from_slice(&fh_field[..fh_len]),
        })
    }
}

/// Restart notification for a set of hosts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockNotify {
    /// Notify flags
    pub flags: u32,
    /// Hosts that restarted
    pub addrs: Vec<IpAddr>,
}

impl LockNotify {
    /// Encodes the notify record.
    pub fn encode(&self) -> Bytes {
        let mut enc = WireEncoder::with_capacity(16 + self.addrs.len() * IP_ADDR_SIZE);
        enc.put_u32(LOCKD_NOTIFY_VERSION);
        enc.put_u32(self.flags);
        enc.put_u32(0);
        enc.put_u32(self.addrs.len() as u32);
        for addr in &self.addrs {
            enc.put_ip_addr(addr);
        }
        enc.finish()
    }

    /// Decodes a notify record.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut dec = WireDecoder::new(buf);
        let version = dec.get_u32()?;
        if version != LOCKD_NOTIFY_VERSION {
            return Err(WireError::VersionMismatch {
                expected: LOCKD_NOTIFY_VERSION,
                got: version,
            });
        }
        let flags = dec.get_u32()?;
        let _pad = dec.get_u32()?;
        let count = dec.get_u32()? as usize;
        let needed = count.saturating_mul(IP_ADDR_SIZE);
        if needed > dec.remaining() {
            return Err(WireError::Truncated {
                needed,
                available: dec.remaining(),
            });
        }
        let addrs = (0..count)
            .map(|_| dec.get_ip_addr())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { flags, addrs })
    }
}
