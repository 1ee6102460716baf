//! Server file handle codec
//!
//! A file handle names one object inside one export. The encoding is a fixed
//! 20-byte big-endian header followed by the file id payload:
//!
//! ```text
//! 0       4       8       12    14    16      20
//! +-------+-------+-------+-----+-----+-------+---------------+
//! | "NX00"| fs_id | exp_id|flags| rsvd|fid_len| fid[fid_len]  |
//! +-------+-------+-------+-----+-----+-------+---------------+
//! ```
//!
//! Clients persist handles and present them to servers that may have
//! restarted, so the layout must stay byte-for-byte stable.

use serde::{Deserialize, Serialize};

use crate::error::{HandleError, Result};
use crate::version::{NfsVersion, FH_HEADER_SIZE, NFS_MAX_FH_SIZE};
use crate::wire::{WireDecoder, WireEncoder};

/// Format version tag ("NX00").
pub const NFS_FH_VERSION: u32 = 0x4e58_0000;

/// Handle flag: the referenced object is gone and the handle is unusable.
pub const NXHF_INVALIDFH: u16 = 0x0001;

/// Identifies one export: the exported filesystem and the export rule.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ExportKey {
    /// Filesystem-export id
    pub fs_id: u32,
    /// Export id
    pub export_id: u32,
}

impl ExportKey {
    /// Creates a key.
    pub fn new(fs_id: u32, export_id: u32) -> Self {
        Self { fs_id, export_id }
    }
}

impl std::fmt::Display for ExportKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.fs_id, self.export_id)
    }
}

/// Opaque server-issued identifier of a filesystem object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileHandle {
    version: u32,
    fs_id: u32,
    export_id: u32,
    flags: u16,
    fid: Vec<u8>,
}

impl FileHandle {
    /// Filesystem-export id.
    pub fn fs_id(&self) -> u32 {
        self.fs_id
    }

    /// Export id.
    pub fn export_id(&self) -> u32 {
        self.export_id
    }

    /// Export this handle was admitted by.
    pub fn export_key(&self) -> ExportKey {
        ExportKey::new(self.fs_id, self.export_id)
    }

    /// Format version tag.
    pub fn format_version(&self) -> u32 {
        self.version
    }

    /// Raw flags word.
    pub fn flags(&self) -> u16 {
        self.flags
    }

    /// File id payload.
    pub fn fid(&self) -> &[u8] {
        &self.fid
    }

    /// True iff the invalid flag is unset.
    pub fn is_valid(&self) -> bool {
        self.flags & NXHF_INVALIDFH == 0
    }

    /// Returns a copy with the invalid flag set. There is no inverse.
    pub fn invalidate(&self) -> FileHandle {
        let mut fh = self.clone();
        fh.flags |= NXHF_INVALIDFH;
        fh
    }

    /// Total encoded length in bytes.
    pub fn encoded_len(&self) -> usize {
        FH_HEADER_SIZE + self.fid.len()
    }

    /// Whether this handle fits the limits of `version`.
    pub fn fits(&self, version: NfsVersion) -> bool {
        self.encoded_len() <= version.max_fh_size()
    }

    /// Serializes the handle.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut enc = WireEncoder::with_capacity(self.encoded_len());
        enc.put_u32(self.version);
        enc.put_u32(self.fs_id);
        enc.put_u32(self.export_id);
        enc.put_u16(self.flags);
        enc.put_u16(0);
        enc.put_u32(self.fid.len() as u32);
        enc.put_bytes(&self.fid);
        enc.finish().to_vec()
    }
}

/// Builds a handle for `fid_bytes` inside the given export.
///
/// Fails with [`HandleError::OversizeFid`] when the payload does not fit the
/// handle size of `version`.
pub fn encode(
    export_id: u32,
    fs_id: u32,
    fid_bytes: &[u8],
    version: NfsVersion,
) -> Result<FileHandle> {
    let max = version.max_fid_size();
    if fid_bytes.len() > max {
        return Err(HandleError::OversizeFid {
            len: fid_bytes.len(),
            max,
        });
    }
    Ok(FileHandle {
        version: NFS_FH_VERSION,
        fs_id,
        export_id,
        flags: 0,
        fid: fid_bytes.to_vec(),
    })
}

/// Parses a handle of any supported protocol version.
pub fn decode(bytes: &[u8]) -> Result<FileHandle> {
    if bytes.len() > NFS_MAX_FH_SIZE {
        return Err(HandleError::MalformedHandle {
            reason: format!(
                "handle is {} bytes, larger than any protocol allows ({})",
                bytes.len(),
                NFS_MAX_FH_SIZE
            ),
        });
    }
    let mut dec = WireDecoder::new(bytes);
    let header_err = |_| HandleError::MalformedHandle {
        reason: format!(
            "handle is {} bytes, shorter than the {}-byte header",
            bytes.len(),
            FH_HEADER_SIZE
        ),
    };

    let version = dec.get_u32().map_err(header_err)?;
    if version != NFS_FH_VERSION {
        return Err(HandleError::UnsupportedVersion(version));
    }
    let fs_id = dec.get_u32().map_err(header_err)?;
    let export_id = dec.get_u32().map_err(header_err)?;
    let flags = dec.get_u16().map_err(header_err)?;
    let _reserved = dec.get_u16().map_err(header_err)?;
    let fid_len = dec.get_u32().map_err(header_err)? as usize;

    if fid_len != dec.remaining() {
        return Err(HandleError::MalformedHandle {
            reason: format!(
                "declared file id length {} but {} bytes follow the header",
                fid_len,
                dec.remaining()
            ),
        });
    }
    let fid = dec
        .get_bytes(fid_len)
        .map_err(|e| HandleError::MalformedHandle {
            reason: e.to_string(),
        })?
        .to_vec();

    Ok(FileHandle {
        version,
        fs_id,
        export_id,
        flags,
        fid,
    })
}

/// Parses a handle and checks it against the limits of `version`.
pub fn decode_for(bytes: &[u8], version: NfsVersion) -> Result<FileHandle> {
    let fh = decode(bytes)?;
    if !fh.fits(version) {
        return Err(HandleError::OversizeFid {
            len: fh.fid.len(),
            max: version.max_fid_size(),
        });
    }
    Ok(fh)
}

/// True iff the invalid flag of `handle` is unset.
pub fn is_valid(handle: &FileHandle) -> bool {
    handle.is_valid()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout_is_stable() {
        let fh = encode(7, 3, &[0xAA, 0xBB], NfsVersion::V3).unwrap();
        let bytes = fh.to_bytes();
        assert_eq!(
            bytes,
            vec![
                0x4e, 0x58, 0x00, 0x00, // NX00
                0, 0, 0, 3, // fs_id
                0, 0, 0, 7, // export_id
                0, 0, // flags
                0, 0, // reserved
                0, 0, 0, 2, // fid_len
                0xAA, 0xBB,
            ]
        );
    }

    #[test]
    fn test_roundtrip() {
        let fh = encode(1, 2, b"inode-4711", NfsVersion::V4).unwrap();
        let decoded = decode(&fh.to_bytes()).unwrap();
        assert_eq!(decoded, fh);
        assert_eq!(decoded.export_key(), ExportKey::new(2, 1));
    }

    #[test]
    fn test_max_fid_accepted_and_one_more_rejected() {
        for version in [NfsVersion::V2, NfsVersion::V3, NfsVersion::V4] {
            let max = version.max_fid_size();
            let fh = encode(1, 1, &vec![0u8; max], version).unwrap();
            assert_eq!(fh.encoded_len(), version.max_fh_size());

            let err = encode(1, 1, &vec![0u8; max + 1], version).unwrap_err();
            assert_eq!(err, HandleError::OversizeFid { len: max + 1, max });
        }
    }

    #[test]
    fn test_decode_length_mismatch() {
        let mut bytes = encode(1, 1, &[1, 2, 3], NfsVersion::V3)
            .unwrap()
            .to_bytes();
        bytes.push(0);
        assert!(matches!(
            decode(&bytes),
            Err(HandleError::MalformedHandle { .. })
        ));

        bytes.truncate(bytes.len() - 2);
        assert!(matches!(
            decode(&bytes),
            Err(HandleError::MalformedHandle { .. })
        ));
    }

    #[test]
    fn test_decode_short_header() {
        assert!(matches!(
            decode(&[0x4e, 0x58, 0, 0, 0, 0]),
            Err(HandleError::MalformedHandle { .. })
        ));
    }

    #[test]
    fn test_decode_unknown_version() {
        let mut bytes = encode(1, 1, &[], NfsVersion::V3).unwrap().to_bytes();
        bytes[0] = 0x11;
        assert!(matches!(
            decode(&bytes),
            Err(HandleError::UnsupportedVersion(v)) if v == 0x1158_0000
        ));
    }

    #[test]
    fn test_decode_for_enforces_version_bound() {
        let fh = encode(1, 1, &[0u8; 40], NfsVersion::V4).unwrap();
        let bytes = fh.to_bytes();
        assert!(decode_for(&bytes, NfsVersion::V3).is_ok());
        assert!(matches!(
            decode_for(&bytes, NfsVersion::V2),
            Err(HandleError::OversizeFid { len: 40, max: 12 })
        ));
    }

    #[test]
    fn test_invalidate_is_sticky() {
        let fh = encode(1, 1, b"x", NfsVersion::V3).unwrap();
        assert!(is_valid(&fh));
        let dead = fh.invalidate();
        assert!(!is_valid(&dead));
        assert!(!dead.invalidate().is_valid());

        let decoded = decode(&dead.to_bytes()).unwrap();
        assert!(!decoded.is_valid());
        assert_eq!(decoded.flags() & NXHF_INVALIDFH, NXHF_INVALIDFH);
    }

    #[test]
    fn test_empty_fid() {
        let fh = encode(9, 9, &[], NfsVersion::V2).unwrap();
        assert_eq!(fh.encoded_len(), FH_HEADER_SIZE);
        assert_eq!(decode(&fh.to_bytes()).unwrap(), fh);
    }
}
