//! NFS protocol versions and the limits derived from them

use serde::{Deserialize, Serialize};

/// Size of the fixed file handle header in bytes.
pub const FH_HEADER_SIZE: usize = 20;

/// Maximum NFSv2 file handle size.
pub const NFSV2_MAX_FH_SIZE: usize = 32;
/// Maximum NFSv3 file handle size.
pub const NFSV3_MAX_FH_SIZE: usize = 64;
/// Maximum NFSv4 file handle size.
pub const NFSV4_MAX_FH_SIZE: usize = 128;
/// Largest file handle any supported version can carry.
pub const NFS_MAX_FH_SIZE: usize = NFSV4_MAX_FH_SIZE;

/// Largest READ/WRITE payload for NFSv2.
pub const NFSV2_MAX_DATA: u32 = 8192;
/// Largest READ/WRITE payload for NFSv3 and later.
pub const NFS_MAX_DATA: u32 = 1024 * 1024;

/// Negotiated NFS protocol major version.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(try_from = "u32", into = "u32")]
pub enum NfsVersion {
    /// NFS version 2
    V2,
    /// NFS version 3
    #[default]
    V3,
    /// NFS version 4
    V4,
}

impl NfsVersion {
    /// Maps a numeric major version.
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            2 => Some(NfsVersion::V2),
            3 => Some(NfsVersion::V3),
            4 => Some(NfsVersion::V4),
            _ => None,
        }
    }

    /// Numeric major version.
    pub fn as_u32(self) -> u32 {
        match self {
            NfsVersion::V2 => 2,
            NfsVersion::V3 => 3,
            NfsVersion::V4 => 4,
        }
    }

    /// Maximum encoded file handle length for this version.
    pub fn max_fh_size(self) -> usize {
        match self {
            NfsVersion::V2 => NFSV2_MAX_FH_SIZE,
            NfsVersion::V3 => NFSV3_MAX_FH_SIZE,
            NfsVersion::V4 => NFSV4_MAX_FH_SIZE,
        }
    }

    /// Maximum file id payload length for this version.
    pub fn max_fid_size(self) -> usize {
        self.max_fh_size() - FH_HEADER_SIZE
    }

    /// Maximum read/write transfer size for this version.
    pub fn max_io_size(self) -> u32 {
        match self {
            NfsVersion::V2 => NFSV2_MAX_DATA,
            NfsVersion::V3 | NfsVersion::V4 => NFS_MAX_DATA,
        }
    }

    /// Whether minor versions are meaningful.
    pub fn has_minor_versions(self) -> bool {
        self == NfsVersion::V4
    }
}

impl TryFrom<u32> for NfsVersion {
    type Error = String;

    fn try_from(v: u32) -> Result<Self, Self::Error> {
        NfsVersion::from_u32(v).ok_or_else(|| format!("unsupported NFS version {}", v))
    }
}

impl From<NfsVersion> for u32 {
    fn from(v: NfsVersion) -> u32 {
        v.as_u32()
    }
}

impl std::fmt::Display for NfsVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.as_u32())
    }
}

/// Packs a major/minor pair into the version-range wire form.
pub fn pack_version(major: u32, minor: u32) -> u32 {
    (major << 16) | (minor & 0xffff)
}

/// Splits a packed version into `(major, minor)`.
pub fn unpack_version(packed: u32) -> (u32, u32) {
    ((packed >> 16) & 0xffff, packed & 0xffff)
}
