//! C8: translates POSIX permission bits into the NFSv3 ACCESS bitmap
//! under a specific requesting credential.

use nix::sys::stat::FileStat;

use crate::nfs::{ftype3, ACCESS3_DELETE, ACCESS3_EXECUTE, ACCESS3_EXTEND, ACCESS3_LOOKUP, ACCESS3_MODIFY, ACCESS3_READ};
use crate::rpc::AuthUnix;

fn ftype_of(mode: u32) -> ftype3 {
    if mode & libc::S_IFMT as u32 == libc::S_IFDIR as u32 {
        ftype3::NF3DIR
    } else {
        ftype3::NF3REG
    }
}

/// Computes the subset of `requested` the caller actually holds.
/// Root bypasses every POSIX check. Directories get the LOOKUP/DELETE
/// implications RFC 1813 describes for ACCESS on a directory object.
pub fn access_bits(stat: &FileStat, cred: &AuthUnix, requested: u32, readable_executables: bool) -> u32 {
    if cred.uid == 0 {
        return requested & (ACCESS3_READ | ACCESS3_MODIFY | ACCESS3_EXTEND | ACCESS3_DELETE | ACCESS3_LOOKUP | ACCESS3_EXECUTE);
    }

    let mode = stat.st_mode;
    let (r, w, x) = if cred.uid == stat.st_uid {
        (mode & 0o400 != 0, mode & 0o200 != 0, mode & 0o100 != 0)
    } else if cred.gid == stat.st_gid || cred.gids.contains(&stat.st_gid) {
        (mode & 0o040 != 0, mode & 0o020 != 0, mode & 0o010 != 0)
    } else {
        (mode & 0o004 != 0, mode & 0o002 != 0, mode & 0o001 != 0)
    };

    let mut bits = 0u32;
    if r {
        bits |= ACCESS3_READ;
    }
    if w {
        bits |= ACCESS3_MODIFY | ACCESS3_EXTEND;
    }
    if x {
        bits |= ACCESS3_EXECUTE;
        if readable_executables {
            bits |= ACCESS3_READ;
        }
    }

    if ftype_of(mode) == ftype3::NF3DIR {
        if bits & (ACCESS3_READ | ACCESS3_EXECUTE) != 0 {
            bits |= ACCESS3_LOOKUP;
        }
        if bits & ACCESS3_MODIFY != 0 {
            bits |= ACCESS3_DELETE;
        }
        bits &= !ACCESS3_EXECUTE;
    }

    bits & requested
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::MaybeUninit;

    fn stat_with(mode: u32, uid: u32, gid: u32) -> FileStat {
        // SAFETY: FileStat is a repr(transparent) wrapper around
        // libc::stat; zero-init is valid for the fields this test reads.
        let mut raw: libc::stat = unsafe { MaybeUninit::zeroed().assume_init() };
        raw.st_mode = mode;
        raw.st_uid = uid;
        raw.st_gid = gid;
        raw.into()
    }

    #[test]
    fn owner_read_write_grants_modify_and_extend() {
        let stat = stat_with(libc::S_IFREG | 0o600, 42, 0);
        let cred = AuthUnix { uid: 42, gid: 0, gids: vec![], ..Default::default() };
        let got = access_bits(&stat, &cred, ACCESS3_READ | ACCESS3_MODIFY | ACCESS3_EXTEND, false);
        assert_eq!(got, ACCESS3_READ | ACCESS3_MODIFY | ACCESS3_EXTEND);
    }

    #[test]
    fn directory_read_implies_lookup() {
        let stat = stat_with(libc::S_IFDIR | 0o500, 42, 0);
        let cred = AuthUnix { uid: 42, gid: 0, gids: vec![], ..Default::default() };
        let got = access_bits(&stat, &cred, ACCESS3_READ | ACCESS3_LOOKUP, false);
        assert_eq!(got, ACCESS3_READ | ACCESS3_LOOKUP);
    }

    #[test]
    fn root_bypasses_posix_checks() {
        let stat = stat_with(libc::S_IFREG, 1000, 1000);
        let cred = AuthUnix { uid: 0, gid: 0, gids: vec![], ..Default::default() };
        let got = access_bits(&stat, &cred, ACCESS3_READ | ACCESS3_MODIFY, false);
        assert_eq!(got, ACCESS3_READ | ACCESS3_MODIFY);
    }
}
