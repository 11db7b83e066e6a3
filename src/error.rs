//! Internal error taxonomy shared by every component, and its mapping
//! onto the wire-level `nfsstat3`/`mountstat3` values.

use crate::nfs::nfsstat3;

/// Internal error taxonomy. Structurally identical to the NFSv3 status
/// values it is eventually mapped to, but kept distinct so that the
/// same underlying [`nix::Error`] can be mapped differently depending
/// on which procedure observed it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NfsError {
    Perm,
    NoEntry,
    Io,
    NXIo,
    Access,
    Exist,
    XDev,
    NoDev,
    NotDir,
    IsDir,
    Invalid,
    FileTooLarge,
    NoSpace,
    ReadOnlyFs,
    TooManyLinks,
    NameTooLong,
    NotEmpty,
    QuotaExceeded,
    Stale,
    TooManyRemote,
    BadHandle,
    NotSync,
    BadCookie,
    NotSupported,
    TooSmall,
    ServerFault,
    BadType,
    Jukebox,
}

pub type Result<T> = std::result::Result<T, NfsError>;

impl NfsError {
    /// Default errno→taxonomy mapping, used by callers that have no
    /// procedure-specific table of their own.
    pub fn from_errno(errno: nix::errno::Errno) -> Self {
        use nix::errno::Errno::*;
        match errno {
            EPERM => NfsError::Perm,
            ENOENT => NfsError::NoEntry,
            ENXIO => NfsError::NXIo,
            EACCES => NfsError::Access,
            EEXIST => NfsError::Exist,
            EXDEV => NfsError::XDev,
            ENODEV => NfsError::NoDev,
            ENOTDIR => NfsError::NotDir,
            EISDIR => NfsError::IsDir,
            EINVAL => NfsError::Invalid,
            EFBIG => NfsError::FileTooLarge,
            ENOSPC => NfsError::NoSpace,
            EROFS => NfsError::ReadOnlyFs,
            EMLINK => NfsError::TooManyLinks,
            ENAMETOOLONG => NfsError::NameTooLong,
            ENOTEMPTY => NfsError::NotEmpty,
            EDQUOT => NfsError::QuotaExceeded,
            ELOOP => NfsError::Stale,
            EREMOTE => NfsError::TooManyRemote,
            _ => NfsError::Io,
        }
    }

    /// Context-specific override table for RMDIR: unlike the default
    /// table, `ENOTEMPTY` keeps its natural meaning but a handful of
    /// hosts also return `EEXIST` for the same condition.
    pub fn from_errno_rmdir(errno: nix::errno::Errno) -> Self {
        if errno == nix::errno::Errno::EEXIST {
            NfsError::NotEmpty
        } else {
            Self::from_errno(errno)
        }
    }

    /// Context-specific override table for RENAME: some hosts recycle
    /// `ENOTEMPTY` to mean "cross-device-like" conditions that are
    /// better reported as a generic I/O error than `NotEmpty`, since
    /// the client cannot act on a not-empty failure for RENAME the way
    /// it can for RMDIR.
    pub fn from_errno_rename(errno: nix::errno::Errno) -> Self {
        if errno == nix::errno::Errno::ENOTEMPTY {
            NfsError::Io
        } else {
            Self::from_errno(errno)
        }
    }
}

impl From<NfsError> for nfsstat3 {
    fn from(e: NfsError) -> Self {
        match e {
            NfsError::Perm => nfsstat3::NFS3ERR_PERM,
            NfsError::NoEntry => nfsstat3::NFS3ERR_NOENT,
            NfsError::Io => nfsstat3::NFS3ERR_IO,
            NfsError::NXIo => nfsstat3::NFS3ERR_NXIO,
            NfsError::Access => nfsstat3::NFS3ERR_ACCES,
            NfsError::Exist => nfsstat3::NFS3ERR_EXIST,
            NfsError::XDev => nfsstat3::NFS3ERR_XDEV,
            NfsError::NoDev => nfsstat3::NFS3ERR_NODEV,
            NfsError::NotDir => nfsstat3::NFS3ERR_NOTDIR,
            NfsError::IsDir => nfsstat3::NFS3ERR_ISDIR,
            NfsError::Invalid => nfsstat3::NFS3ERR_INVAL,
            NfsError::FileTooLarge => nfsstat3::NFS3ERR_FBIG,
            NfsError::NoSpace => nfsstat3::NFS3ERR_NOSPC,
            NfsError::ReadOnlyFs => nfsstat3::NFS3ERR_ROFS,
            NfsError::TooManyLinks => nfsstat3::NFS3ERR_MLINK,
            NfsError::NameTooLong => nfsstat3::NFS3ERR_NAMETOOLONG,
            NfsError::NotEmpty => nfsstat3::NFS3ERR_NOTEMPTY,
            NfsError::QuotaExceeded => nfsstat3::NFS3ERR_DQUOT,
            NfsError::Stale => nfsstat3::NFS3ERR_STALE,
            NfsError::TooManyRemote => nfsstat3::NFS3ERR_REMOTE,
            NfsError::BadHandle => nfsstat3::NFS3ERR_BADHANDLE,
            NfsError::NotSync => nfsstat3::NFS3ERR_NOT_SYNC,
            NfsError::BadCookie => nfsstat3::NFS3ERR_BAD_COOKIE,
            NfsError::NotSupported => nfsstat3::NFS3ERR_NOTSUPP,
            NfsError::TooSmall => nfsstat3::NFS3ERR_TOOSMALL,
            NfsError::ServerFault => nfsstat3::NFS3ERR_SERVERFAULT,
            NfsError::BadType => nfsstat3::NFS3ERR_BADTYPE,
            NfsError::Jukebox => nfsstat3::NFS3ERR_JUKEBOX,
        }
    }
}

/// Short-circuit combinator used by every procedure handler: the first
/// non-OK status wins, but the caller is expected to have already
/// gathered WCC attributes before calling this, since those are
/// attached regardless of the outcome.
pub fn join<T>(first: Result<T>, rest: impl FnOnce() -> Result<T>) -> Result<T> {
    match first {
        Ok(_) => rest(),
        Err(e) => Err(e),
    }
}
