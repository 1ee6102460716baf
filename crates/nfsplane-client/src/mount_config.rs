//! Mount configuration
//!
//! [`MountConfig`] carries only the attributes the caller set. Each field
//! corresponds to one mount attribute number. [`MountConfig::resolve`]
//! applies defaults and checks invariants, yielding [`MountParams`].

use std::time::Duration;

use nfsplane_core::filehandle::{self, FileHandle};
use nfsplane_core::version::pack_version;
use nfsplane_core::NfsVersion;
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, Result};
use crate::retry::{RetryPolicy, NFS_MAXTIMEO, NFS_MINTIMEO};

/// Words in the mount attribute bitmap.
pub const NFS_MATTR_BITMAP_LEN: usize = 2;

/// Default read/write/readdir size.
pub const NFS_RWSIZE: u32 = 32768;
/// Default readahead block count.
pub const NFS_DEFRAHEAD: u32 = 16;
/// Largest readahead block count.
pub const NFS_MAXRAHEAD: u32 = 128;
/// Default and largest AUTH_SYS group list.
pub const NFS_MAXGRPS: u32 = 16;
/// Default minimum attribute cache time, seconds.
pub const NFS_MINATTRTIMO: u32 = 5;
/// Default maximum attribute cache time, seconds.
pub const NFS_MAXATTRTIMO: u32 = 60;
/// Largest number of security flavors.
pub const NFS_MAX_SEC_FLAVORS: usize = 5;
/// AUTH_SYS flavor number.
pub const RPCAUTH_SYS: u32 = 1;
/// Delay before a hard mount reports the server as not responding.
pub const NFS_TPRINTF_INITIAL_DELAY: Duration = Duration::from_secs(5);
/// Default limit on requests in flight per mount.
pub const NFS_DEFMAXASYNCWRITES: usize = 128;
/// Default wait for a lock answer.
pub const NFS_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Mount attribute numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
#[allow(missing_docs)]
pub enum MountAttr {
    Flags = 0,
    NfsVersion = 1,
    NfsMinorVersion = 2,
    ReadSize = 3,
    WriteSize = 4,
    ReaddirSize = 5,
    Readahead = 6,
    AttrCacheRegMin = 7,
    AttrCacheRegMax = 8,
    AttrCacheDirMin = 9,
    AttrCacheDirMax = 10,
    LockMode = 11,
    Security = 12,
    MaxGroupList = 13,
    SocketType = 14,
    NfsPort = 15,
    MountPort = 16,
    RequestTimeout = 17,
    SoftRetryCount = 18,
    DeadTimeout = 19,
    Fh = 20,
    FsLocations = 21,
    MntFlags = 22,
    MntFrom = 23,
    Realm = 24,
    Principal = 25,
    SvcPrincipal = 26,
    NfsVersionRange = 27,
    KerbEtype = 28,
    LocalNfsPort = 29,
    LocalMountPort = 30,
    SetMountOwner = 31,
    ReadlinkNocache = 32,
    AttrCacheRootDirMin = 33,
    AttrCacheRootDirMax = 34,
    AccessCache = 35,
}

impl MountAttr {
    /// Attribute number.
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

/// Mount flag bit numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MountFlag {
    /// Fail requests once the server stops answering
    Soft = 0,
    /// Allow hard-mount requests to be interrupted
    Intr = 1,
    /// Use a reserved source port
    ResvPort = 2,
    /// Do not connect the datagram socket
    NoConnect = 3,
    /// Do not estimate round-trip times
    DumbTimer = 4,
    /// Tell the server on unmount
    CallUmnt = 5,
    /// Use extended directory listing
    RdirPlus = 6,
    /// Disable negative name caching
    NoNegNameCache = 7,
    /// Do not treat jukebox replies as unresponsiveness
    MuteJukebox = 8,
    /// Ephemeral mount
    Ephemeral = 9,
    /// No callback service
    NoCallback = 10,
    /// Do not use named attributes
    NamedAttr = 11,
    /// No ACL support
    NoAcl = 12,
    /// ACLs only, no mode bits
    AclOnly = 13,
    /// Send normalized names
    Nfc = 14,
    /// No quota support
    NoQuota = 15,
    /// Mount protocol over UDP
    MntUdp = 16,
    /// Short timeouts while mounting
    MntQuick = 17,
    /// No opaque auth
    NoOpaqueAuth = 19,
    /// Skip lease renewal when idle
    SkipRenew = 20,
}

impl MountFlag {
    /// Every defined flag.
    pub const ALL: [MountFlag; 20] = [
        MountFlag::Soft,
        MountFlag::Intr,
        MountFlag::ResvPort,
        MountFlag::NoConnect,
        MountFlag::DumbTimer,
        MountFlag::CallUmnt,
        MountFlag::RdirPlus,
        MountFlag::NoNegNameCache,
        MountFlag::MuteJukebox,
        MountFlag::Ephemeral,
        MountFlag::NoCallback,
        MountFlag::NamedAttr,
        MountFlag::NoAcl,
        MountFlag::AclOnly,
        MountFlag::Nfc,
        MountFlag::NoQuota,
        MountFlag::MntUdp,
        MountFlag::MntQuick,
        MountFlag::NoOpaqueAuth,
        MountFlag::SkipRenew,
    ];

    fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

const KNOWN_FLAG_BITS: u32 = {
    let mut bits = 0u32;
    let mut i = 0;
    while i < MountFlag::ALL.len() {
        bits |= 1 << (MountFlag::ALL[i] as u32);
        i += 1;
    }
    bits
};

/// Set of boolean mount flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct MountFlags(u32);

impl MountFlags {
    /// No flags.
    pub fn empty() -> Self {
        Self(0)
    }

    /// Adds `flag`.
    pub fn with(mut self, flag: MountFlag) -> Self {
        self.0 |= flag.bit();
        self
    }

    /// Sets or clears `flag`.
    pub fn set(&mut self, flag: MountFlag, on: bool) {
        if on {
            self.0 |= flag.bit();
        } else {
            self.0 &= !flag.bit();
        }
    }

    /// Whether `flag` is set.
    pub fn contains(&self, flag: MountFlag) -> bool {
        self.0 & flag.bit() != 0
    }

    /// Wire bitmap.
    pub fn to_bitmap(self) -> u32 {
        self.0
    }

    /// Parses a wire bitmap, rejecting undefined bits.
    pub fn from_bitmap(bits: u32) -> Result<Self> {
        if bits & !KNOWN_FLAG_BITS != 0 {
            return Err(ClientError::config(format!(
                "unknown mount flag bits 0x{:x}",
                bits & !KNOWN_FLAG_BITS
            )));
        }
        Ok(Self(bits))
    }

    /// Flags that are set.
    pub fn iter(&self) -> impl Iterator<Item = MountFlag> + '_ {
        MountFlag::ALL.into_iter().filter(move |f| self.contains(*f))
    }
}

impl TryFrom<u32> for MountFlags {
    type Error = ClientError;

    fn try_from(bits: u32) -> Result<Self> {
        MountFlags::from_bitmap(bits)
    }
}

impl From<MountFlags> for u32 {
    fn from(flags: MountFlags) -> u32 {
        flags.to_bitmap()
    }
}

/// Advisory locking mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockMode {
    /// Locks go to the server's lock service
    #[default]
    Enabled,
    /// Lock requests fail
    Disabled,
    /// Locks are kept on this client only
    Local,
}

impl LockMode {
    /// Wire value.
    pub fn as_u32(self) -> u32 {
        match self {
            LockMode::Enabled => 0,
            LockMode::Disabled => 1,
            LockMode::Local => 2,
        }
    }

    /// Parses a wire value.
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(LockMode::Enabled),
            1 => Some(LockMode::Disabled),
            2 => Some(LockMode::Local),
            _ => None,
        }
    }
}

/// Transport socket type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[allow(missing_docs)]
pub enum SocketType {
    #[default]
    Tcp,
    Tcp4,
    Tcp6,
    Udp,
    Udp4,
    Udp6,
}

impl SocketType {
    /// True for stream transports.
    pub fn is_stream(self) -> bool {
        matches!(self, SocketType::Tcp | SocketType::Tcp4 | SocketType::Tcp6)
    }
}

/// One alternative location of the exported filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsLocation {
    /// Server names or addresses
    pub servers: Vec<String>,
    /// Path on those servers
    pub path: String,
}

/// Owner applied to the mount point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct MountOwner {
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
}

/// Range of protocol versions to try, packed as `(major << 16) | minor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRange {
    /// Lowest packed version
    pub min: u32,
    /// Highest packed version
    pub max: u32,
}

impl VersionRange {
    /// Range covering `min` to `max` major versions with minor 0.
    pub fn majors(min: NfsVersion, max: NfsVersion) -> Self {
        Self {
            min: pack_version(min.as_u32(), 0),
            max: pack_version(max.as_u32(), 0),
        }
    }
}

/// Sparse set of mount attributes as supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[allow(missing_docs)]
pub struct MountConfig {
    pub flags: Option<MountFlags>,
    pub nfs_version: Option<NfsVersion>,
    pub minor_version: Option<u32>,
    pub read_size: Option<u32>,
    pub write_size: Option<u32>,
    pub readdir_size: Option<u32>,
    pub readahead: Option<u32>,
    pub attrcache_reg_min: Option<u32>,
    pub attrcache_reg_max: Option<u32>,
    pub attrcache_dir_min: Option<u32>,
    pub attrcache_dir_max: Option<u32>,
    pub lock_mode: Option<LockMode>,
    pub security: Option<Vec<u32>>,
    pub max_group_list: Option<u32>,
    pub socket_type: Option<SocketType>,
    pub nfs_port: Option<u16>,
    pub mount_port: Option<u16>,
    pub request_timeout: Option<Duration>,
    pub soft_retry_count: Option<u32>,
    pub dead_timeout: Option<Duration>,
    pub fh: Option<Vec<u8>>,
    pub fs_locations: Option<Vec<FsLocation>>,
    pub mnt_flags: Option<u64>,
    pub mnt_from: Option<String>,
    pub realm: Option<String>,
    pub principal: Option<String>,
    pub svc_principal: Option<String>,
    pub version_range: Option<VersionRange>,
    pub kerb_etypes: Option<Vec<u32>>,
    pub local_nfs_port: Option<String>,
    pub local_mount_port: Option<String>,
    pub mount_owner: Option<MountOwner>,
    pub readlink_nocache: Option<u32>,
    pub attrcache_rootdir_min: Option<u32>,
    pub attrcache_rootdir_max: Option<u32>,
    pub access_cache: Option<u32>,
}

/// Attribute cache lifetime bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttrCacheBounds {
    /// Shortest lifetime
    pub min: Duration,
    /// Longest lifetime
    pub max: Duration,
}

fn cache_bounds(min: Option<u32>, max: Option<u32>, what: &str) -> Result<AttrCacheBounds> {
    let min = min.unwrap_or(NFS_MINATTRTIMO);
    let max = max.unwrap_or(NFS_MAXATTRTIMO);
    if min > max {
        return Err(ClientError::config(format!(
            "{} attribute cache min {}s exceeds max {}s",
            what, min, max
        )));
    }
    Ok(AttrCacheBounds {
        min: Duration::from_secs(min as u64),
        max: Duration::from_secs(max as u64),
    })
}

fn io_size(value: Option<u32>, version: NfsVersion, what: &str) -> Result<u32> {
    let max = version.max_io_size();
    let size = value.unwrap_or(NFS_RWSIZE.min(max));
    if size == 0 || size > max {
        return Err(ClientError::config(format!(
            "{} {} outside 1..={} for NFS {}",
            what, size, max, version
        )));
    }
    Ok(size)
}

/// Validated mount parameters with defaults applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MountParams {
    /// Protocol version
    pub version: NfsVersion,
    /// Minor version (v4 only)
    pub minor_version: u32,
    /// READ size
    pub read_size: u32,
    /// WRITE size
    pub write_size: u32,
    /// READDIR size
    pub readdir_size: u32,
    /// Readahead blocks
    pub readahead: u32,
    /// File attribute cache bounds
    pub attrcache_reg: AttrCacheBounds,
    /// Directory attribute cache bounds
    pub attrcache_dir: AttrCacheBounds,
    /// Root directory attribute cache bounds
    pub attrcache_rootdir: AttrCacheBounds,
    /// Locking mode
    pub lock_mode: LockMode,
    /// Security flavors in preference order
    pub security: Vec<u32>,
    /// AUTH_SYS group list limit
    pub max_group_list: u32,
    /// Transport
    pub socket_type: SocketType,
    /// NFS port, if fixed
    pub nfs_port: Option<u16>,
    /// Mount port, if fixed
    pub mount_port: Option<u16>,
    /// Boolean flags
    pub flags: MountFlags,
    /// Timeout policy
    pub retry: RetryPolicy,
    /// Unresponsive time after which the mount is dead
    pub dead_timeout: Option<Duration>,
    /// Hard-mount delay before reporting the server as not responding
    pub initial_diag_delay: Duration,
    /// Requests in flight at once
    pub concurrency_limit: usize,
    /// Wait for a lock answer
    pub lock_timeout: Duration,
    /// Root file handle
    #[serde(skip)]
    pub root_fh: Option<FileHandle>,
    /// Alternative locations
    pub fs_locations: Vec<FsLocation>,
    /// Display name
    pub mnt_from: Option<String>,
    /// Mount point owner override
    pub mount_owner: Option<MountOwner>,
}

impl MountParams {
    /// Soft mount.
    pub fn is_soft(&self) -> bool {
        self.flags.contains(MountFlag::Soft)
    }

    /// Interruptible hard mount.
    pub fn is_interruptible(&self) -> bool {
        self.flags.contains(MountFlag::Intr)
    }

    /// Jukebox replies do not count as unresponsiveness.
    pub fn mute_jukebox(&self) -> bool {
        self.flags.contains(MountFlag::MuteJukebox)
    }
}

impl Default for MountParams {
    fn default() -> Self {
        let defaults = AttrCacheBounds {
            min: Duration::from_secs(NFS_MINATTRTIMO as u64),
            max: Duration::from_secs(NFS_MAXATTRTIMO as u64),
        };
        Self {
            version: NfsVersion::V3,
            minor_version: 0,
            read_size: NFS_RWSIZE,
            write_size: NFS_RWSIZE,
            readdir_size: NFS_RWSIZE,
            readahead: NFS_DEFRAHEAD,
            attrcache_reg: defaults,
            attrcache_dir: defaults,
            attrcache_rootdir: defaults,
            lock_mode: LockMode::Enabled,
            security: vec![RPCAUTH_SYS],
            max_group_list: NFS_MAXGRPS,
            socket_type: SocketType::Tcp,
            nfs_port: None,
            mount_port: None,
            flags: MountFlags::empty(),
            retry: RetryPolicy::default(),
            dead_timeout: None,
            initial_diag_delay: NFS_TPRINTF_INITIAL_DELAY,
            concurrency_limit: NFS_DEFMAXASYNCWRITES,
            lock_timeout: NFS_LOCK_TIMEOUT,
            root_fh: None,
            fs_locations: vec![],
            mnt_from: None,
            mount_owner: None,
        }
    }
}

impl MountConfig {
    /// Empty configuration; every attribute takes its default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Which attributes are present, as the two-word attribute bitmap.
    pub fn attribute_bitmap(&self) -> [u32; NFS_MATTR_BITMAP_LEN] {
        let present = [
            (MountAttr::Flags, self.flags.is_some()),
            (MountAttr::NfsVersion, self.nfs_version.is_some()),
            (MountAttr::NfsMinorVersion, self.minor_version.is_some()),
            (MountAttr::ReadSize, self.read_size.is_some()),
            (MountAttr::WriteSize, self.write_size.is_some()),
            (MountAttr::ReaddirSize, self.readdir_size.is_some()),
            (MountAttr::Readahead, self.readahead.is_some()),
            (MountAttr::AttrCacheRegMin, self.attrcache_reg_min.is_some()),
            (MountAttr::AttrCacheRegMax, self.attrcache_reg_max.is_some()),
            (MountAttr::AttrCacheDirMin, self.attrcache_dir_min.is_some()),
            (MountAttr::AttrCacheDirMax, self.attrcache_dir_max.is_some()),
            (MountAttr::LockMode, self.lock_mode.is_some()),
            (MountAttr::Security, self.security.is_some()),
            (MountAttr::MaxGroupList, self.max_group_list.is_some()),
            (MountAttr::SocketType, self.socket_type.is_some()),
            (MountAttr::NfsPort, self.nfs_port.is_some()),
            (MountAttr::MountPort, self.mount_port.is_some()),
            (MountAttr::RequestTimeout, self.request_timeout.is_some()),
            (MountAttr::SoftRetryCount, self.soft_retry_count.is_some()),
            (MountAttr::DeadTimeout, self.dead_timeout.is_some()),
            (MountAttr::Fh, self.fh.is_some()),
            (MountAttr::FsLocations, self.fs_locations.is_some()),
            (MountAttr::MntFlags, self.mnt_flags.is_some()),
            (MountAttr::MntFrom, self.mnt_from.is_some()),
            (MountAttr::Realm, self.realm.is_some()),
            (MountAttr::Principal, self.principal.is_some()),
            (MountAttr::SvcPrincipal, self.svc_principal.is_some()),
            (MountAttr::NfsVersionRange, self.version_range.is_some()),
            (MountAttr::KerbEtype, self.kerb_etypes.is_some()),
            (MountAttr::LocalNfsPort, self.local_nfs_port.is_some()),
            (MountAttr::LocalMountPort, self.local_mount_port.is_some()),
            (MountAttr::SetMountOwner, self.mount_owner.is_some()),
            (MountAttr::ReadlinkNocache, self.readlink_nocache.is_some()),
            (MountAttr::AttrCacheRootDirMin, self.attrcache_rootdir_min.is_some()),
            (MountAttr::AttrCacheRootDirMax, self.attrcache_rootdir_max.is_some()),
            (MountAttr::AccessCache, self.access_cache.is_some()),
        ];
        let mut bitmap = [0u32; NFS_MATTR_BITMAP_LEN];
        for (attr, set) in present {
            if set {
                let n = attr.as_u32() as usize;
                bitmap[n / 32] |= 1 << (n % 32);
            }
        }
        bitmap
    }

    /// Applies defaults and validates the result.
    pub fn resolve(&self) -> Result<MountParams> {
        let version = match (self.nfs_version, self.version_range) {
            (Some(v), _) => v,
            (None, Some(range)) => {
                let major = range.max >> 16;
                NfsVersion::from_u32(major).ok_or_else(|| {
                    ClientError::config(format!("unsupported version range max {}", major))
                })?
            }
            (None, None) => NfsVersion::V3,
        };
        if let Some(range) = self.version_range {
            if range.min > range.max {
                return Err(ClientError::config("version range min exceeds max"));
            }
        }

        let minor_version = self.minor_version.unwrap_or(0);
        if minor_version != 0 && !version.has_minor_versions() {
            return Err(ClientError::Negotiation {
                reason: format!("minor version {} with NFS {}", minor_version, version),
            });
        }

        let flags = self.flags.unwrap_or_default();
        if flags.contains(MountFlag::NoAcl) && flags.contains(MountFlag::AclOnly) {
            return Err(ClientError::config("noacl and aclonly are mutually exclusive"));
        }

        let readahead = self.readahead.unwrap_or(NFS_DEFRAHEAD);
        if readahead > NFS_MAXRAHEAD {
            return Err(ClientError::config(format!(
                "readahead {} exceeds {}",
                readahead, NFS_MAXRAHEAD
            )));
        }

        let security = self.security.clone().unwrap_or_else(|| vec![RPCAUTH_SYS]);
        if security.is_empty() || security.len() > NFS_MAX_SEC_FLAVORS {
            return Err(ClientError::config(format!(
                "{} security flavors, expected 1..={}",
                security.len(),
                NFS_MAX_SEC_FLAVORS
            )));
        }

        let max_group_list = self.max_group_list.unwrap_or(NFS_MAXGRPS);
        if max_group_list == 0 || max_group_list > NFS_MAXGRPS {
            return Err(ClientError::config(format!(
                "max group list {} outside 1..={}",
                max_group_list, NFS_MAXGRPS
            )));
        }

        let retry = RetryPolicy {
            initial_timeout: self
                .request_timeout
                .unwrap_or(NFS_MINTIMEO)
                .clamp(NFS_MINTIMEO, NFS_MAXTIMEO),
            retry_count: self.soft_retry_count.unwrap_or(RetryPolicy::default().retry_count),
            ..RetryPolicy::default()
        };

        if let Some(dead) = self.dead_timeout {
            if dead.is_zero() {
                return Err(ClientError::config("dead timeout must be positive"));
            }
        }

        let root_fh = match &self.fh {
            Some(bytes) => Some(filehandle::decode_for(bytes, version)?),
            None => None,
        };

        Ok(MountParams {
            version,
            minor_version,
            read_size: io_size(self.read_size, version, "read size")?,
            write_size: io_size(self.write_size, version, "write size")?,
            readdir_size: io_size(self.readdir_size, version, "readdir size")?,
            readahead,
            attrcache_reg: cache_bounds(self.attrcache_reg_min, self.attrcache_reg_max, "file")?,
            attrcache_dir: cache_bounds(
                self.attrcache_dir_min,
                self.attrcache_dir_max,
                "directory",
            )?,
            attrcache_rootdir: cache_bounds(
                self.attrcache_rootdir_min,
                self.attrcache_rootdir_max,
                "root directory",
            )?,
            lock_mode: self.lock_mode.unwrap_or_default(),
            security,
            max_group_list,
            socket_type: self.socket_type.unwrap_or_default(),
            nfs_port: self.nfs_port,
            mount_port: self.mount_port,
            flags,
            retry,
            dead_timeout: self.dead_timeout,
            root_fh,
            fs_locations: self.fs_locations.clone().unwrap_or_default(),
            mnt_from: self.mnt_from.clone(),
            mount_owner: self.mount_owner,
            ..MountParams::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_defaults() {
        let params = MountConfig::new().resolve().unwrap();
        assert_eq!(params, MountParams::default());
        assert!(!params.is_soft());
        assert_eq!(params.retry.retry_count, 10);
    }

    #[test]
    fn test_attribute_bitmap() {
        let config = MountConfig {
            nfs_version: Some(NfsVersion::V4),
            soft_retry_count: Some(3),
            access_cache: Some(64),
            ..Default::default()
        };
        let bitmap = config.attribute_bitmap();
        assert_eq!(bitmap[0], (1 << 1) | (1 << 18));
        assert_eq!(bitmap[1], 1 << (35 - 32));
        assert_eq!(MountConfig::new().attribute_bitmap(), [0, 0]);
    }

    #[test]
    fn test_flags_bitmap_roundtrip() {
        let flags = MountFlags::empty()
            .with(MountFlag::Soft)
            .with(MountFlag::MuteJukebox)
            .with(MountFlag::SkipRenew);
        assert_eq!(flags.to_bitmap(), 1 | (1 << 8) | (1 << 20));
        assert_eq!(MountFlags::from_bitmap(flags.to_bitmap()).unwrap(), flags);
        assert_eq!(
            flags.iter().collect::<Vec<_>>(),
            vec![MountFlag::Soft, MountFlag::MuteJukebox, MountFlag::SkipRenew]
        );
    }

    #[test]
    fn test_flags_reject_unknown_bits() {
        assert!(MountFlags::from_bitmap(1 << 18).is_err());
        assert!(MountFlags::from_bitmap(1 << 21).is_err());
        assert!(serde_json::from_str::<MountFlags>("262144").is_err());
    }

    #[test]
    fn test_attr_cache_invariant() {
        let config = MountConfig {
            attrcache_dir_min: Some(120),
            ..Default::default()
        };
        assert!(matches!(config.resolve(), Err(ClientError::Config { .. })));

        let config = MountConfig {
            attrcache_reg_min: Some(30),
            attrcache_reg_max: Some(30),
            ..Default::default()
        };
        let params = config.resolve().unwrap();
        assert_eq!(params.attrcache_reg.min, Duration::from_secs(30));
    }

    #[test]
    fn test_io_size_bounded_by_version() {
        let config = MountConfig {
            nfs_version: Some(NfsVersion::V2),
            read_size: Some(16384),
            ..Default::default()
        };
        assert!(config.resolve().is_err());

        let params = MountConfig {
            nfs_version: Some(NfsVersion::V2),
            ..Default::default()
        }
        .resolve()
        .unwrap();
        assert_eq!(params.read_size, 8192);

        let params = MountConfig {
            write_size: Some(1024 * 1024),
            ..Default::default()
        }
        .resolve()
        .unwrap();
        assert_eq!(params.write_size, 1024 * 1024);
    }

    #[test]
    fn test_minor_version_requires_v4() {
        let config = MountConfig {
            minor_version: Some(1),
            ..Default::default()
        };
        assert!(matches!(
            config.resolve(),
            Err(ClientError::Negotiation { .. })
        ));
        let config = MountConfig {
            nfs_version: Some(NfsVersion::V4),
            minor_version: Some(1),
            ..Default::default()
        };
        assert_eq!(config.resolve().unwrap().minor_version, 1);
    }

    #[test]
    fn test_request_timeout_clamped() {
        let config = MountConfig {
            request_timeout: Some(Duration::from_millis(100)),
            ..Default::default()
        };
        assert_eq!(
            config.resolve().unwrap().retry.initial_timeout,
            Duration::from_secs(1)
        );
        let config = MountConfig {
            request_timeout: Some(Duration::from_secs(600)),
            ..Default::default()
        };
        assert_eq!(
            config.resolve().unwrap().retry.initial_timeout,
            Duration::from_secs(60)
        );
    }

    #[test]
    fn test_security_bounds() {
        let config = MountConfig {
            security: Some(vec![]),
            ..Default::default()
        };
        assert!(config.resolve().is_err());
        let config = MountConfig {
            security: Some(vec![1; 6]),
            ..Default::default()
        };
        assert!(config.resolve().is_err());
    }

    #[test]
    fn test_conflicting_acl_flags() {
        let config = MountConfig {
            flags: Some(
                MountFlags::empty()
                    .with(MountFlag::NoAcl)
                    .with(MountFlag::AclOnly),
            ),
            ..Default::default()
        };
        assert!(config.resolve().is_err());
    }

    #[test]
    fn test_root_fh_validated_for_version() {
        let fh = filehandle::encode(1, 1, &[0u8; 40], NfsVersion::V4).unwrap();
        let config = MountConfig {
            nfs_version: Some(NfsVersion::V2),
            fh: Some(fh.to_bytes()),
            ..Default::default()
        };
        assert!(matches!(config.resolve(), Err(ClientError::Handle(_))));

        let config = MountConfig {
            fh: Some(fh.to_bytes()),
            ..Default::default()
        };
        assert_eq!(config.resolve().unwrap().root_fh, Some(fh));
    }

    #[test]
    fn test_version_from_range() {
        let config = MountConfig {
            version_range: Some(VersionRange::majors(NfsVersion::V2, NfsVersion::V4)),
            ..Default::default()
        };
        assert_eq!(config.resolve().unwrap().version, NfsVersion::V4);
    }

    #[test]
    fn test_lock_mode_wire() {
        for mode in [LockMode::Enabled, LockMode::Disabled, LockMode::Local] {
            assert_eq!(LockMode::from_u32(mode.as_u32()), Some(mode));
        }
        assert_eq!(LockMode::from_u32(3), None);
    }

    #[test]
    fn test_config_json() {
        let json = r#"{"flags": 3, "nfs_version": 4, "lock_mode": "local", "soft_retry_count": 3}"#;
        let config: MountConfig = serde_json::from_str(json).unwrap();
        let params = config.resolve().unwrap();
        assert!(params.is_soft());
        assert!(params.is_interruptible());
        assert_eq!(params.lock_mode, LockMode::Local);
        assert_eq!(params.retry.retry_count, 3);
    }
}
