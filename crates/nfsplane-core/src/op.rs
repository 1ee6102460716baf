//! NFS operation codes and their retry/mutation properties

use serde::{Deserialize, Serialize};

/// NFS procedure issued by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u32)]
pub enum NfsOp {
    /// NULL
    Null = 0,
    /// GETATTR
    GetAttr = 1,
    /// SETATTR
    SetAttr = 2,
    /// LOOKUP
    Lookup = 3,
    /// ACCESS
    Access = 4,
    /// READLINK
    ReadLink = 5,
    /// READ
    Read = 6,
    /// WRITE
    Write = 7,
    /// CREATE
    Create = 8,
    /// MKDIR
    MkDir = 9,
    /// SYMLINK
    SymLink = 10,
    /// MKNOD
    MkNod = 11,
    /// REMOVE
    Remove = 12,
    /// RMDIR
    RmDir = 13,
    /// RENAME
    Rename = 14,
    /// LINK
    Link = 15,
    /// READDIR
    ReadDir = 16,
    /// READDIRPLUS
    ReadDirPlus = 17,
    /// FSSTAT
    FsStat = 18,
    /// FSINFO
    FsInfo = 19,
    /// PATHCONF
    PathConf = 20,
    /// COMMIT
    Commit = 21,
}

/// Number of NFS procedures tracked per operation.
pub const NFS_NPROCS: usize = 22;

impl NfsOp {
    /// All procedures in procedure-number order.
    pub const ALL: [NfsOp; NFS_NPROCS] = [
        NfsOp::Null,
        NfsOp::GetAttr,
        NfsOp::SetAttr,
        NfsOp::Lookup,
        NfsOp::Access,
        NfsOp::ReadLink,
        NfsOp::Read,
        NfsOp::Write,
        NfsOp::Create,
        NfsOp::MkDir,
        NfsOp::SymLink,
        NfsOp::MkNod,
        NfsOp::Remove,
        NfsOp::RmDir,
        NfsOp::Rename,
        NfsOp::Link,
        NfsOp::ReadDir,
        NfsOp::ReadDirPlus,
        NfsOp::FsStat,
        NfsOp::FsInfo,
        NfsOp::PathConf,
        NfsOp::Commit,
    ];

    /// Maps a procedure number.
    pub fn from_u32(proc_num: u32) -> Option<Self> {
        Self::ALL.get(proc_num as usize).copied()
    }

    /// Procedure number.
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Replaying the request has the same effect as sending it once.
    pub fn is_idempotent(self) -> bool {
        !matches!(
            self,
            NfsOp::Create
                | NfsOp::MkDir
                | NfsOp::SymLink
                | NfsOp::MkNod
                | NfsOp::Remove
                | NfsOp::RmDir
                | NfsOp::Rename
                | NfsOp::Link
        )
    }

    /// The request changes filesystem state.
    pub fn is_mutating(self) -> bool {
        matches!(
            self,
            NfsOp::SetAttr
                | NfsOp::Write
                | NfsOp::Create
                | NfsOp::MkDir
                | NfsOp::SymLink
                | NfsOp::MkNod
                | NfsOp::Remove
                | NfsOp::RmDir
                | NfsOp::Rename
                | NfsOp::Link
                | NfsOp::Commit
        )
    }

    /// Lower-case procedure name.
    pub fn name(self) -> &'static str {
        match self {
            NfsOp::Null => "null",
            NfsOp::GetAttr => "getattr",
            NfsOp::SetAttr => "setattr",
            NfsOp::Lookup => "lookup",
            NfsOp::Access => "access",
            NfsOp::ReadLink => "readlink",
            NfsOp::Read => "read",
            NfsOp::Write => "write",
            NfsOp::Create => "create",
            NfsOp::MkDir => "mkdir",
            NfsOp::SymLink => "symlink",
            NfsOp::MkNod => "mknod",
            NfsOp::Remove => "remove",
            NfsOp::RmDir => "rmdir",
            NfsOp::Rename => "rename",
            NfsOp::Link => "link",
            NfsOp::ReadDir => "readdir",
            NfsOp::ReadDirPlus => "readdirplus",
            NfsOp::FsStat => "fsstat",
            NfsOp::FsInfo => "fsinfo",
            NfsOp::PathConf => "pathconf",
            NfsOp::Commit => "commit",
        }
    }
}

impl std::fmt::Display for NfsOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
