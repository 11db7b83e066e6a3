//! MOUNT protocol (versions 1 and 3), program 100005. Exposes the
//! procedures the NFS client's `mount(8)` helper calls before it ever
//! speaks NFSv3 proper: NULL, MNT, DUMP, UMNT, UMNTALL, EXPORT.

pub mod auth;

use std::net::IpAddr;

use num_derive::{FromPrimitive, ToPrimitive};

use crate::attr::fattr_of;
use crate::context::ServerContext;
use crate::export::ExportEntry;
use crate::filehandle::FileHandle;
use crate::host;
use crate::rpc::AuthUnix;
use crate::xdr::{xdr_enum, xdr_struct};

pub const PROGRAM: u32 = 100005;
pub const VERSION1: u32 = 1;
pub const VERSION3: u32 = 3;

#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum Procedure {
    Null = 0,
    Mnt = 1,
    Dump = 2,
    Umnt = 3,
    UmntAll = 4,
    Export = 5,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum mountstat3 {
    MNT3_OK = 0,
    MNT3ERR_PERM = 1,
    MNT3ERR_NOENT = 2,
    MNT3ERR_IO = 5,
    MNT3ERR_ACCES = 13,
    MNT3ERR_NOTDIR = 20,
    MNT3ERR_INVAL = 22,
    MNT3ERR_NAMETOOLONG = 63,
    MNT3ERR_NOTSUPP = 10004,
    MNT3ERR_SERVERFAULT = 10006,
}
impl Default for mountstat3 {
    fn default() -> Self {
        mountstat3::MNT3_OK
    }
}
xdr_enum!(mountstat3);

#[derive(Debug, Default, Clone)]
pub struct MountRes3Ok {
    pub fhandle: Vec<u8>,
    pub auth_flavors: Vec<u32>,
}
xdr_struct!(MountRes3Ok { fhandle: Vec<u8>, auth_flavors: Vec<u32> });

#[derive(Debug, Default, Clone)]
pub struct MountEntry {
    pub hostname: String,
    pub directory: String,
}
xdr_struct!(MountEntry { hostname: String, directory: String });

/// Runs the mount authenticator state machine over the MNT dirpath
/// argument and, on success, returns the filehandle for the resolved
/// export root.
pub fn handle_mnt(
    ctx: &mut ServerContext,
    peer: IpAddr,
    peer_is_privileged_port: bool,
    raw_dirpath: &str,
) -> (mountstat3, Option<FileHandle>) {
    match auth::parse_request(raw_dirpath) {
        auth::MountRequest::GetNonce => {
            // The nonce travels back to the client disguised as a
            // filehandle; it designates no real object and must never
            // be accepted by the resolver.
            (mountstat3::MNT3_OK, Some(nonce_as_fh(&ctx.nonce)))
        }
        auth::MountRequest::Password { password, path } => {
            try_mount(ctx, peer, peer_is_privileged_port, path, Some(password), None)
        }
        auth::MountRequest::Otp { hex, path } => {
            let outcome = try_mount(ctx, peer, peer_is_privileged_port, path, None, Some(hex));
            if outcome.0 == mountstat3::MNT3_OK {
                ctx.rotate_nonce();
            }
            outcome
        }
        auth::MountRequest::Path(path) => try_mount(ctx, peer, peer_is_privileged_port, path, None, None),
    }
}

fn nonce_as_fh(nonce: &[u8; 32]) -> FileHandle {
    let mut fh = FileHandle::root(0, 0, 0, 0);
    for chunk in nonce.chunks(8).take(4) {
        let mut buf = [0u8; 8];
        buf[..chunk.len()].copy_from_slice(chunk);
        fh = fh.extend(0, u64::from_le_bytes(buf), 0).unwrap_or(fh);
    }
    fh
}

fn try_mount(
    ctx: &mut ServerContext,
    peer: IpAddr,
    peer_is_privileged_port: bool,
    path: &str,
    password_attempt: Option<&str>,
    otp_attempt: Option<&str>,
) -> (mountstat3, Option<FileHandle>) {
    let path = std::path::Path::new(path);
    let export = match ctx.exports.find_by_path(path).or_else(|| ctx.exports.find_containing(path)) {
        Some(e) => e.clone(),
        None => return (mountstat3::MNT3ERR_NOENT, None),
    };

    if !export.allows(peer) {
        return (mountstat3::MNT3ERR_ACCES, None);
    }
    if !peer_is_privileged_port && !export.insecure {
        return (mountstat3::MNT3ERR_ACCES, None);
    }

    if let Some(configured) = &export.password {
        let authenticated = match (password_attempt, otp_attempt) {
            (Some(pw), _) => pw == configured,
            (_, Some(hex)) => auth::otp_matches(&ctx.nonce, configured, hex),
            (None, None) => false,
        };
        if !authenticated {
            return (mountstat3::MNT3ERR_ACCES, None);
        }
    }

    let stat = match host::lstat(&export.path) {
        Ok(s) => s,
        Err(_) => return (mountstat3::MNT3ERR_SERVERFAULT, None),
    };
    let fh = FileHandle::root(stat.st_dev as u32, stat.st_ino, 0, export.pwhash);
    (mountstat3::MNT3_OK, Some(fh))
}

pub fn handle_dump(ctx: &ServerContext) -> Vec<MountEntry> {
    ctx.mount_list
        .iter()
        .map(|(host, dir)| MountEntry {
            hostname: host.clone(),
            directory: dir.to_string_lossy().into_owned(),
        })
        .collect()
}

pub fn handle_umnt(ctx: &mut ServerContext, hostname: &str, directory: &str) {
    ctx.mount_list.retain(|(h, d)| !(h == hostname && d.to_string_lossy() == directory));
}

pub fn handle_umntall(ctx: &mut ServerContext, hostname: &str) {
    ctx.mount_list.retain(|(h, _)| h != hostname);
}

pub fn handle_export(ctx: &ServerContext) -> Vec<(String, Vec<String>)> {
    ctx.exports
        .entries
        .iter()
        .map(|e: &ExportEntry| {
            (
                e.path.to_string_lossy().into_owned(),
                e.clients.iter().map(|c| c.host.clone()).collect(),
            )
        })
        .collect()
}

/// Builds the attributes the NFSv3 side needs for a freshly-mounted
/// root, reusing the attribute engine and a throwaway root credential
/// (mount itself carries no NFS credential).
pub fn root_attrs(ctx: &ServerContext, export: &ExportEntry) -> Option<crate::nfs::fattr3> {
    let stat = host::lstat(&export.path).ok()?;
    let cred = AuthUnix::default();
    Some(fattr_of(&stat, &cred, &ctx.config, export))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::{ClientMatch, Squash};
    use std::path::PathBuf;

    fn sample_export(path: &str, password: Option<&str>) -> ExportEntry {
        ExportEntry {
            path: PathBuf::from(path),
            clients: vec![ClientMatch { host: "*".to_string() }],
            read_only: true,
            squash: Squash::RootSquash,
            removable: false,
            insecure: true,
            password: password.map(str::to_string),
            pwhash: crate::filehandle::fnv1a(password.unwrap_or("").as_bytes()),
            anonuid: 65534,
            anongid: 65534,
            fsid_override: None,
        }
    }

    fn test_config() -> crate::config::Config {
        crate::config::Config {
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
        }
    }

    #[test]
    fn mount_without_password_succeeds_when_insecure_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let export = sample_export(dir.path().to_str().unwrap(), None);
        let mut ctx = ServerContext::new(test_config(), crate::export::ExportTable { entries: vec![export] });
        let peer: IpAddr = "127.0.0.1".parse().unwrap();
        let (status, fh) = try_mount(&mut ctx, peer, false, dir.path().to_str().unwrap(), None, None);
        assert_eq!(status, mountstat3::MNT3_OK);
        assert!(fh.is_some());
    }

    #[test]
    fn otp_flow_authenticates_then_rotates_nonce() {
        let dir = tempfile::tempdir().unwrap();
        let export = sample_export(dir.path().to_str().unwrap(), Some("hunter2"));
        let mut ctx = ServerContext::new(test_config(), crate::export::ExportTable { entries: vec![export] });
        let peer: IpAddr = "127.0.0.1".parse().unwrap();

        let (status, _) = handle_mnt(&mut ctx, peer, false, "@getnonce");
        assert_eq!(status, mountstat3::MNT3_OK);
        let nonce = ctx.nonce;

        let otp = auth::expected_otp(&nonce, "hunter2");
        // The separator and the absolute export path's own leading slash
        // are the same character, per the wire format `@otp:<hex>/<path>`.
        let raw = format!("@otp:{}{}", otp, dir.path().to_str().unwrap());
        let (status, fh) = handle_mnt(&mut ctx, peer, false, &raw);
        assert_eq!(status, mountstat3::MNT3_OK);
        assert!(fh.is_some());
        assert_ne!(ctx.nonce, nonce);

        // Re-issuing the same (now stale) OTP against the rotated nonce fails.
        let (status, _) = handle_mnt(&mut ctx, peer, false, &raw);
        assert_eq!(status, mountstat3::MNT3ERR_ACCES);
    }
}
