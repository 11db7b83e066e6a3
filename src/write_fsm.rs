//! C7: the write/commit state machine tying the FD cache to the write
//! verifier lifecycle. WRITE and COMMIT handlers call into here rather
//! than touching `FdCache` directly, so the stability-mode mapping and
//! verifier-regeneration policy live in exactly one place.

use std::path::Path;

use crate::context::ServerContext;
use crate::error::Result;
use crate::fd_cache::{Close, Kind};
use crate::filehandle::FileHandle;
use crate::host;
use crate::nfs::stable_how;

pub struct WriteOutcome {
    pub count: u32,
    pub committed: stable_how,
}

/// Performs one WRITE: opens (or reuses) a cached descriptor, writes
/// at `offset`, and closes per the stability mode. `DATA_SYNC` is
/// mapped to `FILE_SYNC` since this server never calls `fdatasync`.
pub fn write(
    ctx: &mut ServerContext,
    path: &Path,
    fh: &FileHandle,
    offset: u64,
    data: &[u8],
    stability: stable_how,
) -> Result<WriteOutcome> {
    let committed = match stability {
        stable_how::UNSTABLE => stable_how::UNSTABLE,
        stable_how::DATA_SYNC | stable_how::FILE_SYNC => stable_how::FILE_SYNC,
    };
    let allow_caching = stability == stable_how::UNSTABLE;

    let mut should_regen = false;
    let handle = {
        let mut regen = || should_regen = true;
        ctx.fd_cache.fd_open(path, fh, Kind::Write, allow_caching, &mut regen)?
    };
    if should_regen {
        ctx.regenerate_verifier();
    }

    let write_result = {
        let file = ctx.fd_cache.file(&handle);
        host::pwrite(file, offset, data)
    };

    let really_close = if allow_caching { Close::Virtual } else { Close::Real };

    let outcome = match write_result {
        Ok(count) => {
            let mut should_regen = false;
            {
                let mut regen = || should_regen = true;
                ctx.fd_cache.fd_close(handle, Kind::Write, really_close, &mut regen)?;
            }
            if should_regen {
                ctx.regenerate_verifier();
            }
            Ok(WriteOutcome { count: count as u32, committed })
        }
        Err(e) => {
            let mut should_regen = false;
            {
                let mut regen = || should_regen = true;
                let _ = ctx.fd_cache.fd_close(handle, Kind::Write, Close::Real, &mut regen);
            }
            if should_regen {
                ctx.regenerate_verifier();
            }
            Err(e)
        }
    };
    outcome
}

/// COMMIT: flushes any cached WRITE descriptor for `fh`. Success means
/// every preceding UNSTABLE write for this file is now durable.
pub fn commit(ctx: &mut ServerContext, fh: &FileHandle) -> Result<()> {
    let mut should_regen = false;
    let result = {
        let mut regen = || should_regen = true;
        ctx.fd_cache.fd_sync(fh, &mut regen)
    };
    if should_regen {
        ctx.regenerate_verifier();
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::export::ExportTable;
    use std::net::IpAddr;
    use std::path::PathBuf;

    fn test_ctx() -> ServerContext {
        ServerContext::new(
            Config {
                exports_path: PathBuf::new(),
                pid_file: None,
                nfs_port: 0,
                mount_port: 0,
                tcp_only: true,
                register_portmap: false,
                singleuser: false,
                brute_force: false,
                bind_addr: IpAddr::from([0, 0, 0, 0]),
                readable_executables: false,
                parse_and_exit: false,
                foreground: true,
            },
            ExportTable::default(),
        )
    }

    #[test]
    fn unstable_write_then_commit_round_trips_verifier() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"").unwrap();
        let stat = host::lstat(&path).unwrap();
        let fh = FileHandle::root(stat.st_dev as u32, stat.st_ino, 0, 0);

        let mut ctx = test_ctx();
        let verifier_before = ctx.write_verifier;
        let outcome = write(&mut ctx, &path, &fh, 0, b"hello", stable_how::UNSTABLE).unwrap();
        assert_eq!(outcome.count, 5);
        assert_eq!(outcome.committed, stable_how::UNSTABLE);

        commit(&mut ctx, &fh).unwrap();
        assert_eq!(ctx.write_verifier, verifier_before);
    }
}
