//! C6: attribute translation. Turns a raw `lstat` result plus the
//! requesting credential into the `post_op_attr`/`pre_op_attr`/`wcc_data`
//! shapes the wire protocol carries around every operation.

use nix::sys::stat::FileStat;

use crate::config::Config;
use crate::export::ExportEntry;
use crate::nfs::{fattr3, ftype3, nfsstat3, nfstime3, post_op_attr, pre_op_attr, specdata3, wcc_attr, wcc_data};
use crate::rpc::AuthUnix;

/// Translates a POSIX mode's file-type bits into the NFSv3 type enum,
/// defaulting to regular for anything exotic.
fn ftype_of(mode: u32) -> ftype3 {
    match mode & libc::S_IFMT as u32 {
        m if m == libc::S_IFDIR as u32 => ftype3::NF3DIR,
        m if m == libc::S_IFBLK as u32 => ftype3::NF3BLK,
        m if m == libc::S_IFCHR as u32 => ftype3::NF3CHR,
        m if m == libc::S_IFLNK as u32 => ftype3::NF3LNK,
        m if m == libc::S_IFSOCK as u32 => ftype3::NF3SOCK,
        m if m == libc::S_IFIFO as u32 => ftype3::NF3FIFO,
        _ => ftype3::NF3REG,
    }
}

/// Folds a uid/gid through `singleuser` squash rules: the server
/// reports the *caller's* credential value when the object is owned
/// by the server's own real uid (or the server runs as root);
/// otherwise it reports 0, hiding the real owner from everyone else.
fn singleuser_fold(object_owner: u32, caller_value: u32, server_real: u32, server_is_root: bool) -> u32 {
    if object_owner == server_real || server_is_root {
        caller_value
    } else {
        0
    }
}

/// Builds the `fattr3` for `stat`, applying squash, readable-executable
/// propagation, and the removable-export `fsid` override.
pub fn fattr_of(stat: &FileStat, cred: &AuthUnix, config: &Config, export: &ExportEntry) -> fattr3 {
    let mut mode = stat.st_mode & 0xffff;
    if config.readable_executables && ftype_of(stat.st_mode) == ftype3::NF3REG {
        // Propagate each execute bit into its matching read bit.
        if mode & 0o100 != 0 {
            mode |= 0o400;
        }
        if mode & 0o010 != 0 {
            mode |= 0o040;
        }
        if mode & 0o001 != 0 {
            mode |= 0o004;
        }
    }

    let (uid, gid) = if config.singleuser {
        let server_real = nix::unistd::getuid().as_raw();
        let server_is_root = nix::unistd::Uid::current().is_root();
        (
            singleuser_fold(stat.st_uid, cred.uid, server_real, server_is_root),
            singleuser_fold(stat.st_gid, cred.gid, server_real, server_is_root),
        )
    } else {
        (stat.st_uid, stat.st_gid)
    };

    let fsid = match export.fsid_override {
        Some(fsid) if export.removable => fsid,
        _ => stat.st_dev as u32,
    };

    let fileid = if stat.st_ino > u32::MAX as u64 {
        (stat.st_ino >> 32) ^ (stat.st_ino & 0xffff_ffff)
    } else {
        stat.st_ino
    };

    fattr3 {
        ftype: ftype_of(stat.st_mode),
        mode,
        nlink: stat.st_nlink as u32,
        uid,
        gid,
        size: stat.st_size as u64,
        used: stat.st_blocks as u64 * 512,
        rdev: specdata3 {
            specdata1: ((stat.st_rdev >> 8) & 0xff) as u32,
            specdata2: (stat.st_rdev & 0xff) as u32,
        },
        fsid: fsid as u64,
        fileid,
        atime: nfstime3 { seconds: stat.st_atime as u32, nseconds: stat.st_atime_nsec as u32 },
        mtime: nfstime3 { seconds: stat.st_mtime as u32, nseconds: stat.st_mtime_nsec as u32 },
        ctime: nfstime3 { seconds: stat.st_ctime as u32, nseconds: stat.st_ctime_nsec as u32 },
    }
}

pub fn post_op(stat: Option<&FileStat>, cred: &AuthUnix, config: &Config, export: &ExportEntry) -> post_op_attr {
    stat.map(|s| fattr_of(s, cred, config, export))
}

/// Pre-op WCC attributes carry only size/mtime/ctime, taken from the
/// stat cache snapshotted before the mutating operation ran.
pub fn pre_op(stat: Option<&FileStat>) -> pre_op_attr {
    stat.map(|s| wcc_attr {
        size: s.st_size as u64,
        mtime: nfstime3 { seconds: s.st_mtime as u32, nseconds: s.st_mtime_nsec as u32 },
        ctime: nfstime3 { seconds: s.st_ctime as u32, nseconds: s.st_ctime_nsec as u32 },
    })
}

pub fn wcc(before: Option<&FileStat>, after: Option<&FileStat>, cred: &AuthUnix, config: &Config, export: &ExportEntry) -> wcc_data {
    wcc_data {
        before: pre_op(before),
        after: post_op(after, cred, config, export),
    }
}

/// Setattr ctime guard: compares the client's supplied guard ctime
/// (seconds only) against the object's pre-op ctime. A mismatch means
/// another writer raced us, so the client's idea of the object's state
/// is stale and the operation is refused with NOT_SYNC.
pub fn ctime_guard_ok(guard: Option<nfstime3>, pre: Option<&FileStat>) -> bool {
    match (guard, pre) {
        (None, _) => true,
        (Some(g), Some(s)) => g.seconds == s.st_ctime as u32,
        (Some(_), None) => false,
    }
}

pub fn guard_failure() -> nfsstat3 {
    nfsstat3::NFS3ERR_NOT_SYNC
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn singleuser_fold_reveals_owner_identity_only_to_owner() {
        assert_eq!(singleuser_fold(1000, 42, 1000, false), 42);
        assert_eq!(singleuser_fold(2000, 42, 1000, false), 0);
        assert_eq!(singleuser_fold(2000, 42, 1000, true), 42);
    }

    #[test]
    fn ctime_guard_detects_mismatch() {
        let guard = Some(nfstime3 { seconds: 100, nseconds: 0 });
        assert!(!ctime_guard_ok(guard, None));
    }
}
