//! POSIX-like host abstraction (C1). Every other component reaches
//! the filesystem and the credential layer only through here, so the
//! rest of the core never imports `nix`/`libc` directly.

use std::ffi::CString;
use std::fs::File;
use std::os::fd::{AsRawFd, RawFd};
use std::path::Path;

use nix::sys::stat::{FileStat, Mode, SFlag};
use nix::unistd::{Gid, Uid};

use crate::error::{NfsError, Result};

/// `lstat`, mapped through the shared errno table.
pub fn lstat(path: &Path) -> Result<FileStat> {
    nix::sys::stat::lstat(path).map_err(NfsError::from_errno)
}

/// `fstat` on an already-open descriptor.
pub fn fstat(fd: RawFd) -> Result<FileStat> {
    nix::sys::stat::fstat(fd).map_err(NfsError::from_errno)
}

/// Ioctl request number for `EXT2_IOC_GETVERSION` on Linux
/// (`_IOR('v', 1, long)`), used to read a file's inode generation.
#[cfg(target_os = "linux")]
const EXT2_IOC_GETVERSION: libc::c_ulong = 0x8004_7601;

/// Probe the inode generation of an open file. Returns `0` when the
/// host or filesystem cannot supply one — this is the literal
/// base-specification fallback, deliberately different from the
/// original C implementation's `st_ino` fallback (see DESIGN.md).
#[cfg(target_os = "linux")]
pub fn inode_generation(fd: RawFd) -> u32 {
    let mut version: libc::c_long = 0;
    let rc = unsafe { libc::ioctl(fd, EXT2_IOC_GETVERSION, &mut version as *mut libc::c_long) };
    if rc == 0 {
        version as u32
    } else {
        0
    }
}

#[cfg(not(target_os = "linux"))]
pub fn inode_generation(_fd: RawFd) -> u32 {
    0
}

/// Guard restoring the previous effective uid/gid on drop, including
/// on an early return or a panic unwinding through the caller.
pub struct CredentialGuard {
    prior_uid: Uid,
    prior_gid: Gid,
}

impl Drop for CredentialGuard {
    fn drop(&mut self) {
        // Restore gid before uid: dropping root privilege for uid
        // first would make the gid restore fail if it still requires
        // privilege.
        let _ = nix::unistd::setegid(self.prior_gid);
        let _ = nix::unistd::seteuid(self.prior_uid);
    }
}

/// Runs `f` with the effective uid/gid temporarily switched to
/// `(uid, gid)`, restoring the caller's prior identity on every exit
/// path. Used to perform filesystem operations under the mapped
/// identity of the requesting NFS client.
pub fn with_credentials<T>(uid: u32, gid: u32, f: impl FnOnce() -> T) -> T {
    let prior_uid = nix::unistd::geteuid();
    let prior_gid = nix::unistd::getegid();
    let _guard = CredentialGuard {
        prior_uid,
        prior_gid,
    };

    if !prior_uid.is_root() {
        // Already unprivileged: nothing to switch, run as-is. This is
        // the common case for a server started without root.
        return f();
    }

    if nix::unistd::setegid(Gid::from_raw(gid)).is_err() || nix::unistd::seteuid(Uid::from_raw(uid)).is_err() {
        tracing::error!(
            uid,
            gid,
            "CRISIS: unable to switch effective credentials"
        );
        std::process::exit(2);
    }
    f()
}

/// Fills `buf` with cryptographically-irrelevant random bytes, used
/// for write verifiers, the mount nonce, and server-picked create
/// verifiers.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut buf = [0u8; N];
    rand::Rng::fill(&mut rand::thread_rng(), &mut buf);
    buf
}

pub fn process_id() -> u32 {
    std::process::id()
}

/// Opens `path` with the given flags/mode, POSIX style.
pub fn open(path: &Path, oflag: nix::fcntl::OFlag, mode: Mode) -> Result<File> {
    let cpath = CString::new(path.as_os_str().as_encoded_bytes()).map_err(|_| NfsError::Invalid)?;
    let fd = nix::fcntl::open(cpath.as_c_str(), oflag, mode).map_err(NfsError::from_errno)?;
    Ok(unsafe { <File as std::os::fd::FromRawFd>::from_raw_fd(fd) })
}

pub fn pwrite(file: &File, offset: u64, data: &[u8]) -> Result<usize> {
    nix::sys::uio::pwrite(file, data, offset as i64).map_err(NfsError::from_errno)
}

pub fn pread(file: &File, offset: u64, buf: &mut [u8]) -> Result<usize> {
    nix::sys::uio::pread(file, buf, offset as i64).map_err(NfsError::from_errno)
}

pub fn fsync(file: &File) -> Result<()> {
    nix::unistd::fsync(file.as_raw_fd()).map_err(NfsError::from_errno)
}

pub fn mkdir(path: &Path, mode: Mode) -> Result<()> {
    nix::unistd::mkdir(path, mode).map_err(NfsError::from_errno)
}

pub fn rmdir(path: &Path) -> Result<()> {
    nix::unistd::rmdir(path).map_err(NfsError::from_errno)
}

pub fn unlink(path: &Path) -> Result<()> {
    nix::unistd::unlink(path).map_err(NfsError::from_errno)
}

pub fn rename(from: &Path, to: &Path) -> Result<()> {
    nix::fcntl::renameat::<Path, Path, Path, Path>(None, from, None, to).map_err(NfsError::from_errno)
}

pub fn link(from: &Path, to: &Path) -> Result<()> {
    nix::unistd::linkat(
        None,
        from,
        None,
        to,
        nix::unistd::LinkatFlags::NoSymlinkFollow,
    )
    .map_err(NfsError::from_errno)
}

pub fn symlink(target: &Path, link_path: &Path) -> Result<()> {
    nix::unistd::symlinkat(target, None, link_path).map_err(NfsError::from_errno)
}

pub fn readlink(path: &Path) -> Result<std::path::PathBuf> {
    nix::fcntl::readlink(path).map_err(NfsError::from_errno)
}

pub fn mknod(path: &Path, kind: SFlag, mode: Mode, dev: u64) -> Result<()> {
    nix::sys::stat::mknod(path, kind, mode, dev).map_err(NfsError::from_errno)
}

pub fn statvfs(path: &Path) -> Result<nix::sys::statvfs::Statvfs> {
    nix::sys::statvfs::statvfs(path).map_err(NfsError::from_errno)
}
