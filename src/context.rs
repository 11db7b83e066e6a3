//! The single explicit server context that replaces what would
//! otherwise be a scattering of module-level globals: every cache,
//! the write verifier, the readdir epoch, the mount list and nonce,
//! the export table, and the immutable config. Owned and mutated only
//! by the dispatcher loop — nothing here is `Arc`/`Mutex`-wrapped.

use std::path::PathBuf;

use crate::config::Config;
use crate::export::{self, ExportTable, ParseError};
use crate::fd_cache::FdCache;
use crate::fh_cache::FhCache;
use crate::host;
use crate::resolver::StatCache;

pub struct ServerContext {
    pub config: Config,
    pub exports: ExportTable,
    pub fh_cache: FhCache,
    pub fd_cache: FdCache,
    pub stat_cache: StatCache,
    pub write_verifier: [u8; 8],
    pub readdir_epoch: u32,
    pub mount_list: Vec<(String, PathBuf)>,
    pub nonce: [u8; 32],
}

impl ServerContext {
    pub fn new(config: Config, exports: ExportTable) -> Self {
        ServerContext {
            config,
            exports,
            fh_cache: FhCache::new(),
            fd_cache: FdCache::new(),
            stat_cache: StatCache::default(),
            write_verifier: host::random_bytes(),
            readdir_epoch: 0,
            mount_list: Vec::new(),
            nonce: host::random_bytes(),
        }
    }

    /// Regenerates the write verifier, invalidating every uncommitted
    /// write the client believes is safe. Passed as the `regenerate_verifier`
    /// closure into every `FdCache` call that can observe a swept or
    /// delivered `PendingError`.
    pub fn regenerate_verifier(&mut self) {
        self.write_verifier = host::random_bytes();
    }

    /// Advances the readdir epoch: called after REMOVE/RMDIR/RENAME on
    /// any directory, invalidating in-flight client enumerations.
    pub fn bump_readdir_epoch(&mut self) {
        self.readdir_epoch = self.readdir_epoch.wrapping_add(1);
    }

    pub fn rotate_nonce(&mut self) {
        self.nonce = host::random_bytes();
    }

    /// Re-parses the exports file, atomically swapping in the new
    /// table only on success; a malformed file leaves the previous
    /// table fully intact, per the SIGHUP contract.
    pub fn reload_exports(&mut self) -> Result<(), ParseError> {
        let table = export::parse_file(&self.config.exports_path)?;
        self.exports = table;
        Ok(())
    }

    pub fn log_cache_stats(&self) {
        tracing::info!(
            fh_cache_occupied = self.fh_cache.occupied_count(),
            fd_readers = self.fd_cache.readers,
            fd_writers = self.fd_cache.writers,
            readdir_epoch = self.readdir_epoch,
            "cache statistics"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::net::IpAddr;

    use super::*;

    fn test_config(exports_path: PathBuf) -> Config {
        Config {
            exports_path,
            pid_file: None,
            nfs_port: 0,
            mount_port: 0,
            tcp_only: true,
            register_portmap: false,
            singleuser: false,
            brute_force: false,
            bind_addr: IpAddr::from([127, 0, 0, 1]),
            readable_executables: false,
            parse_and_exit: false,
            foreground: true,
        }
    }

    #[test]
    fn reload_exports_swaps_in_the_new_table_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let export_dir = dir.path().join("share");
        std::fs::create_dir(&export_dir).unwrap();
        let exports_path = dir.path().join("exports");
        std::fs::write(&exports_path, format!("{} *\n", export_dir.display())).unwrap();

        let mut ctx = ServerContext::new(test_config(exports_path.clone()), export::ExportTable { entries: Vec::new() });
        assert!(ctx.exports.entries.is_empty());

        ctx.reload_exports().unwrap();
        assert_eq!(ctx.exports.entries.len(), 1);
    }

    #[test]
    fn reload_exports_keeps_the_previous_table_on_a_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let export_dir = dir.path().join("share");
        std::fs::create_dir(&export_dir).unwrap();
        let exports_path = dir.path().join("exports");
        std::fs::write(&exports_path, format!("{} *\n", export_dir.display())).unwrap();

        let mut ctx = ServerContext::new(test_config(exports_path.clone()), export::ExportTable { entries: Vec::new() });
        ctx.reload_exports().unwrap();
        assert_eq!(ctx.exports.entries.len(), 1);

        let mut file = std::fs::OpenOptions::new().append(true).open(&exports_path).unwrap();
        writeln!(file, "not a valid line at all").unwrap();

        assert!(ctx.reload_exports().is_err());
        assert_eq!(ctx.exports.entries.len(), 1);
    }

    #[test]
    fn bump_readdir_epoch_advances_monotonically() {
        let dir = tempfile::tempdir().unwrap();
        let exports_path = dir.path().join("exports");
        std::fs::write(&exports_path, "").unwrap();
        let mut ctx = ServerContext::new(test_config(exports_path), export::ExportTable { entries: Vec::new() });

        assert_eq!(ctx.readdir_epoch, 0);
        ctx.bump_readdir_epoch();
        assert_eq!(ctx.readdir_epoch, 1);
    }
}
