//! C9: the RPC program/version/procedure table, transport wiring, and
//! the single-threaded cooperative main loop.
//!
//! Runs under a `current_thread` tokio runtime (see `bin/main.rs`) and
//! never calls `tokio::spawn`: `tokio::select!` over the listening
//! sockets plus a one-second interval stands in for the original
//! `poll`/`select` loop, and every branch runs its handler to
//! completion before the loop continues. This is what lets every
//! cache in [`ServerContext`] go unlocked.

use std::io::Cursor;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};

use crate::access;
use crate::attr;
use crate::context::ServerContext;
use crate::error::NfsError;
use crate::export::ExportEntry;
use crate::fd_cache::Kind;
use crate::filehandle::FileHandle;
use crate::mount;
use crate::nfs::{self, nfsstat3, proc as nfsproc};
use crate::resolver;
use crate::rpc::{self, AcceptStat, AuthFlavor, AuthUnix, CallBody, ReplyHeader};
use crate::write_fsm;
use crate::xdr::Xdr;

const RECORD_LAST_FRAGMENT: u32 = 0x8000_0000;

/// Decoded per-request identity: UNIX credentials when `AUTH_SYS` was
/// presented, otherwise the anonymous identity.
struct Credential {
    uid: u32,
    gid: u32,
    gids: Vec<u32>,
}

impl Credential {
    fn anonymous() -> Self {
        Credential { uid: 65534, gid: 65534, gids: vec![] }
    }

    fn from_call(call: &CallBody) -> Self {
        if call.cred.flavor == AuthFlavor::AuthSys {
            let mut au = AuthUnix::default();
            if au.deserialize(&mut Cursor::new(&call.cred.body)).is_ok() {
                return Credential { uid: au.uid, gid: au.gid, gids: au.gids };
            }
        }
        Credential::anonymous()
    }

    fn as_auth_unix(&self) -> AuthUnix {
        AuthUnix {
            stamp: 0,
            machinename: String::new(),
            uid: self.uid,
            gid: self.gid,
            gids: self.gids.clone(),
        }
    }
}

/// Runs the server forever. `ctx` is owned exclusively by this loop;
/// no other task ever touches it.
pub async fn run(mut ctx: ServerContext, tcp: TcpListener, udp: Option<UdpSocket>) -> anyhow::Result<()> {
    let mut sighup = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())?;
    let mut sigusr1 = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::user_defined1())?;
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(1));

    let mut udp_buf = vec![0u8; 65536];

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                ctx.fd_cache.sweep_idle(&mut || {});
            }
            _ = sighup.recv() => {
                match ctx.reload_exports() {
                    Ok(()) => tracing::info!("exports reloaded"),
                    Err(e) => tracing::error!(%e, "exports reload failed, keeping previous table"),
                }
            }
            _ = sigusr1.recv() => {
                ctx.log_cache_stats();
            }
            _ = sigterm.recv() => {
                tracing::info!("SIGTERM received, shutting down");
                ctx.fd_cache.purge();
                if ctx.config.register_portmap {
                    crate::portmap::unregister_all(ctx.config.nfs_port, ctx.config.mount_port).await;
                }
                return Ok(());
            }
            _ = sigint.recv() => {
                tracing::info!("SIGINT received, shutting down");
                ctx.fd_cache.purge();
                if ctx.config.register_portmap {
                    crate::portmap::unregister_all(ctx.config.nfs_port, ctx.config.mount_port).await;
                }
                return Ok(());
            }
            accepted = tcp.accept() => {
                let (stream, peer) = accepted?;
                serve_tcp_connection(&mut ctx, stream, peer).await;
            }
            result = recv_udp(&udp, &mut udp_buf), if udp.is_some() => {
                if let Some((n, peer)) = result? {
                    let reply = dispatch_message(&mut ctx, &udp_buf[..n], peer);
                    if let (Some(sock), Some(reply)) = (&udp, reply) {
                        let _ = sock.send_to(&reply, peer).await;
                    }
                }
            }
        }
    }
}

async fn recv_udp(udp: &Option<UdpSocket>, buf: &mut [u8]) -> std::io::Result<Option<(usize, SocketAddr)>> {
    match udp {
        Some(sock) => sock.recv_from(buf).await.map(Some),
        None => std::future::pending().await,
    }
}

/// One TCP connection is served to completion (all its record-marked
/// requests, in order) before the main loop resumes — the connection
/// itself is not handed to a spawned task.
async fn serve_tcp_connection(ctx: &mut ServerContext, mut stream: TcpStream, peer: SocketAddr) {
    loop {
        let request = match read_record(&mut stream).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return,
            Err(e) => {
                tracing::debug!(%peer, %e, "connection closed");
                return;
            }
        };

        if let Some(reply) = dispatch_message(ctx, &request, peer) {
            let mut framed = Vec::with_capacity(reply.len() + 4);
            framed.extend_from_slice(&(reply.len() as u32 | RECORD_LAST_FRAGMENT).to_be_bytes());
            framed.extend_from_slice(&reply);
            if stream.write_all(&framed).await.is_err() {
                return;
            }
        }
    }
}

async fn read_record(stream: &mut TcpStream) -> std::io::Result<Option<Vec<u8>>> {
    let mut data = Vec::new();
    loop {
        let mut header = [0u8; 4];
        if stream.read_exact(&mut header).await.is_err() {
            return Ok(if data.is_empty() { None } else { Some(data) });
        }
        let word = u32::from_be_bytes(header);
        let last = word & RECORD_LAST_FRAGMENT != 0;
        let len = (word & !RECORD_LAST_FRAGMENT) as usize;
        let start = data.len();
        data.resize(start + len, 0);
        stream.read_exact(&mut data[start..]).await?;
        if last {
            return Ok(Some(data));
        }
    }
}

fn dispatch_message(ctx: &mut ServerContext, bytes: &[u8], peer: SocketAddr) -> Option<Vec<u8>> {
    let mut cursor = Cursor::new(bytes);
    let (xid, call) = match rpc::parse_call(&mut cursor) {
        Ok(v) => v,
        Err(_) => return None,
    };
    let header = ReplyHeader { xid };

    if call.rpcvers != rpc::RPC_VERSION {
        let mut out = Vec::new();
        let _ = header.write_rpc_vers_mismatch(&mut out);
        return Some(out);
    }

    let cred = Credential::from_call(&call);
    let peer_ip = peer.ip();
    let peer_port_privileged = peer.port() < 1024;

    let mut out = Vec::new();

    match call.prog {
        nfs::PROGRAM => {
            if call.vers != nfs::VERSION {
                let _ = header.write_prog_mismatch(&mut out, nfs::VERSION, nfs::VERSION);
                return Some(out);
            }
            let Some(procedure) = num_traits::FromPrimitive::from_u32(call.proc_) else {
                let _ = header.write_accepted(&mut out, AcceptStat::ProcUnavail);
                return Some(out);
            };
            let _ = header.write_accepted_success(&mut out);
            dispatch_nfs(ctx, procedure, &cred, &mut cursor, &mut out, peer_ip);
        }
        mount::PROGRAM => {
            if call.vers != mount::VERSION1 && call.vers != mount::VERSION3 {
                let _ = header.write_prog_mismatch(&mut out, mount::VERSION1, mount::VERSION3);
                return Some(out);
            }
            let Some(procedure) = num_traits::FromPrimitive::from_u32(call.proc_) else {
                let _ = header.write_accepted(&mut out, AcceptStat::ProcUnavail);
                return Some(out);
            };
            let _ = header.write_accepted_success(&mut out);
            dispatch_mount(ctx, procedure, &mut cursor, &mut out, peer_ip, peer_port_privileged);
        }
        _ => {
            let _ = header.write_accepted(&mut out, AcceptStat::ProgUnavail);
        }
    }

    Some(out)
}

/// Resolves `object` under the matching export, returning the path,
/// export entry, and a fresh `lstat` (already published into the stat
/// cache), or the `nfsstat3` to report on failure.
/// Extracts the `pwhash` field directly out of the wire bytes without
/// validating it, so the matching export can be found first and the
/// real (validating) decode can run against its password hash.
fn peek_pwhash(bytes: &[u8]) -> Option<u32> {
    if bytes.len() < 20 {
        return None;
    }
    Some(u32::from_le_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]))
}

fn resolve_object(ctx: &mut ServerContext, object: &nfs::nfs_fh3) -> Result<(PathBuf, ExportEntry, nix::sys::stat::FileStat), nfsstat3> {
    let wire_pwhash = peek_pwhash(&object.data).ok_or(nfsstat3::NFS3ERR_BADHANDLE)?;

    let export = ctx
        .exports
        .entries
        .iter()
        .find(|e| e.pwhash == wire_pwhash)
        .cloned()
        .ok_or(nfsstat3::NFS3ERR_STALE)?;

    let fh = FileHandle::decode(&object.data, export.pwhash).map_err(nfsstat3::from)?;

    if let Some(path) = ctx.fh_cache.lookup(fh.dev, fh.ino) {
        if let Ok(stat) = crate::host::lstat(&path) {
            return Ok((path, export, stat));
        }
    }

    match resolver::resolve(&export.path, &fh, &mut ctx.stat_cache).map_err(nfsstat3::from)? {
        Some(path) => {
            let stat = ctx.stat_cache.get().copied().ok_or(nfsstat3::NFS3ERR_STALE)?;
            ctx.fh_cache.insert(fh.dev, fh.ino, path.clone());
            Ok((path, export, stat))
        }
        None if ctx.config.brute_force => {
            match resolver::brute_force_scan(&export.path, fh.dev, fh.ino) {
                Some(path) => {
                    let stat = crate::host::lstat(&path).map_err(nfsstat3::from)?;
                    Ok((path, export, stat))
                }
                None => Err(nfsstat3::NFS3ERR_STALE),
            }
        }
        None => Err(nfsstat3::NFS3ERR_STALE),
    }
}

fn encode_fh(path: &Path, export: &ExportEntry, gen_of: impl Fn(&Path) -> u32) -> Option<nfs::nfs_fh3> {
    let fh = resolver::compose(&export.path, path, path.is_dir(), gen_of, export.pwhash).ok()?;
    Some(nfs::nfs_fh3 { data: fh.encode() })
}

fn gen_of(path: &Path) -> u32 {
    match crate::host::open(path, nix::fcntl::OFlag::O_RDONLY, nix::sys::stat::Mode::empty()) {
        Ok(file) => crate::host::inode_generation(std::os::fd::AsRawFd::as_raw_fd(&file)),
        Err(_) => 0,
    }
}

fn dispatch_nfs(
    ctx: &mut ServerContext,
    procedure: nfs::Procedure,
    cred: &Credential,
    src: &mut Cursor<&[u8]>,
    out: &mut Vec<u8>,
    _peer: std::net::IpAddr,
) {
    use nfs::Procedure::*;
    let auth_unix = cred.as_auth_unix();

    match procedure {
        Null => {}

        GetAttr => {
            let mut args = nfsproc::GetAttr3Args::default();
            if args.deserialize(src).is_err() {
                let _ = nfsstat3::NFS3ERR_INVAL.serialize(out);
                return;
            }
            match resolve_object(ctx, &args.object) {
                Ok((_, export, stat)) => {
                    let _ = nfsstat3::NFS3_OK.serialize(out);
                    let _ = nfsproc::GetAttr3ResOk { obj_attributes: attr::fattr_of(&stat, &auth_unix, &ctx.config, &export) }.serialize(out);
                }
                Err(status) => {
                    let _ = status.serialize(out);
                }
            }
        }

        SetAttr => {
            let mut args = nfsproc::SetAttr3Args::default();
            if args.deserialize(src).is_err() {
                let _ = nfsstat3::NFS3ERR_INVAL.serialize(out);
                return;
            }
            match resolve_object(ctx, &args.object) {
                Ok((path, export, before)) => {
                    if !attr::ctime_guard_ok(args.guard_ctime, Some(&before)) {
                        let _ = attr::guard_failure().serialize(out);
                        let _ = nfsproc::SetAttr3ResFail { obj_wcc: attr::wcc(Some(&before), Some(&before), &auth_unix, &ctx.config, &export) }.serialize(out);
                        return;
                    }
                    match apply_sattr(&path, &args.new_attributes) {
                        Ok(()) => {
                            let after = crate::host::lstat(&path).ok();
                            let _ = nfsstat3::NFS3_OK.serialize(out);
                            let _ = nfsproc::SetAttr3ResOk { obj_wcc: attr::wcc(Some(&before), after.as_ref(), &auth_unix, &ctx.config, &export) }.serialize(out);
                        }
                        Err(e) => {
                            let _ = nfsstat3::from(e).serialize(out);
                            let _ = nfsproc::SetAttr3ResFail { obj_wcc: attr::wcc(Some(&before), Some(&before), &auth_unix, &ctx.config, &export) }.serialize(out);
                        }
                    }
                }
                Err(status) => {
                    let _ = status.serialize(out);
                    let _ = nfsproc::SetAttr3ResFail { obj_wcc: nfs::wcc_data::default() }.serialize(out);
                }
            }
        }

        Lookup => {
            let mut args = nfsproc::Lookup3Args::default();
            if args.deserialize(src).is_err() {
                let _ = nfsstat3::NFS3ERR_INVAL.serialize(out);
                return;
            }
            match resolve_object(ctx, &args.what.dir) {
                Ok((dir_path, export, dir_stat)) => {
                    let child = dir_path.join(&args.what.name);
                    match crate::host::lstat(&child) {
                        Ok(stat) => {
                            let Some(fh) = encode_fh(&child, &export, gen_of) else {
                                let _ = nfsstat3::NFS3ERR_SERVERFAULT.serialize(out);
                                return;
                            };
                            let _ = nfsstat3::NFS3_OK.serialize(out);
                            let _ = nfsproc::Lookup3ResOk {
                                object: fh,
                                obj_attributes: attr::post_op(Some(&stat), &auth_unix, &ctx.config, &export),
                                dir_attributes: attr::post_op(Some(&dir_stat), &auth_unix, &ctx.config, &export),
                            }
                            .serialize(out);
                        }
                        Err(e) => {
                            let _ = nfsstat3::from(e).serialize(out);
                            let _ = nfsproc::Lookup3ResFail { dir_attributes: attr::post_op(Some(&dir_stat), &auth_unix, &ctx.config, &export) }.serialize(out);
                        }
                    }
                }
                Err(status) => {
                    let _ = status.serialize(out);
                    let _ = nfsproc::Lookup3ResFail { dir_attributes: None }.serialize(out);
                }
            }
        }

        Access => {
            let mut args = nfsproc::Access3Args::default();
            if args.deserialize(src).is_err() {
                let _ = nfsstat3::NFS3ERR_INVAL.serialize(out);
                return;
            }
            match resolve_object(ctx, &args.object) {
                Ok((_, export, stat)) => {
                    let bits = access::access_bits(&stat, &auth_unix, args.access, ctx.config.readable_executables);
                    let _ = nfsstat3::NFS3_OK.serialize(out);
                    let _ = nfsproc::Access3ResOk { obj_attributes: attr::post_op(Some(&stat), &auth_unix, &ctx.config, &export), access: bits }.serialize(out);
                }
                Err(status) => {
                    let _ = status.serialize(out);
                }
            }
        }

        ReadLink => {
            let mut args = nfsproc::ReadLink3Args::default();
            if args.deserialize(src).is_err() {
                let _ = nfsstat3::NFS3ERR_INVAL.serialize(out);
                return;
            }
            match resolve_object(ctx, &args.symlink) {
                Ok((path, export, stat)) => match crate::host::readlink(&path) {
                    Ok(target) => {
                        let _ = nfsstat3::NFS3_OK.serialize(out);
                        let _ = nfsproc::ReadLink3ResOk {
                            symlink_attributes: attr::post_op(Some(&stat), &auth_unix, &ctx.config, &export),
                            data: target.to_string_lossy().into_owned(),
                        }
                        .serialize(out);
                    }
                    Err(e) => {
                        let _ = nfsstat3::from(e).serialize(out);
                    }
                },
                Err(status) => {
                    let _ = status.serialize(out);
                }
            }
        }

        Read => {
            let mut args = nfsproc::Read3Args::default();
            if args.deserialize(src).is_err() {
                let _ = nfsstat3::NFS3ERR_INVAL.serialize(out);
                return;
            }
            match resolve_object(ctx, &args.file) {
                Ok((path, export, stat)) => {
                    let fh = FileHandle::decode(&args.file.data, export.pwhash).unwrap_or_else(|_| FileHandle::invalid());
                    let mut should_regen = false;
                    let opened = {
                        let mut regen = || should_regen = true;
                        ctx.fd_cache.fd_open(&path, &fh, Kind::Read, true, &mut regen)
                    };
                    if should_regen {
                        ctx.regenerate_verifier();
                    }
                    match opened {
                        Ok(handle) => {
                            let mut buf = vec![0u8; args.count as usize];
                            let read_result = {
                                let file = ctx.fd_cache.file(&handle);
                                crate::host::pread(file, args.offset, &mut buf)
                            };
                            let mut regen2 = || {};
                            let _ = ctx.fd_cache.fd_close(handle, Kind::Read, crate::fd_cache::Close::Virtual, &mut regen2);
                            match read_result {
                                Ok(n) => {
                                    buf.truncate(n);
                                    let eof = args.offset + n as u64 >= stat.st_size as u64;
                                    let _ = nfsstat3::NFS3_OK.serialize(out);
                                    let _ = nfsproc::Read3ResOk {
                                        file_attributes: attr::post_op(Some(&stat), &auth_unix, &ctx.config, &export),
                                        count: n as u32,
                                        eof,
                                        data: buf,
                                    }
                                    .serialize(out);
                                }
                                Err(e) => {
                                    let _ = nfsstat3::from(e).serialize(out);
                                }
                            }
                        }
                        Err(e) => {
                            let _ = nfsstat3::from(e).serialize(out);
                        }
                    }
                }
                Err(status) => {
                    let _ = status.serialize(out);
                }
            }
        }

        Write => {
            let mut args = nfsproc::Write3Args::default();
            if args.deserialize(src).is_err() {
                let _ = nfsstat3::NFS3ERR_INVAL.serialize(out);
                return;
            }
            match resolve_object(ctx, &args.file) {
                Ok((path, export, before)) => {
                    let fh = FileHandle::decode(&args.file.data, export.pwhash).unwrap_or_else(|_| FileHandle::invalid());
                    match write_fsm::write(ctx, &path, &fh, args.offset, &args.data, args.stable) {
                        Ok(outcome) => {
                            let after = crate::host::lstat(&path).ok();
                            let _ = nfsstat3::NFS3_OK.serialize(out);
                            let _ = nfsproc::Write3ResOk {
                                file_wcc: attr::wcc(Some(&before), after.as_ref(), &auth_unix, &ctx.config, &export),
                                count: outcome.count,
                                committed: outcome.committed,
                                verf: ctx.write_verifier,
                            }
                            .serialize(out);
                        }
                        Err(e) => {
                            let _ = nfsstat3::from(e).serialize(out);
                            let _ = nfsproc::Write3ResOk {
                                file_wcc: attr::wcc(Some(&before), Some(&before), &auth_unix, &ctx.config, &export),
                                count: 0,
                                committed: stable_how_default(),
                                verf: ctx.write_verifier,
                            }
                            .serialize(out);
                        }
                    }
                }
                Err(status) => {
                    let _ = status.serialize(out);
                }
            }
        }

        Remove => {
            let mut args = nfsproc::Remove3Args::default();
            if args.deserialize(src).is_err() {
                let _ = nfsstat3::NFS3ERR_INVAL.serialize(out);
                return;
            }
            match resolve_object(ctx, &args.object.dir) {
                Ok((dir_path, export, before)) => {
                    let target = dir_path.join(&args.object.name);
                    match crate::host::unlink(&target) {
                        Ok(()) => {
                            ctx.bump_readdir_epoch();
                            let after = crate::host::lstat(&dir_path).ok();
                            let _ = nfsstat3::NFS3_OK.serialize(out);
                            let _ = nfsproc::RemoveRes3Ok { dir_wcc: attr::wcc(Some(&before), after.as_ref(), &auth_unix, &ctx.config, &export) }.serialize(out);
                        }
                        Err(e) => {
                            let _ = nfsstat3::from(e).serialize(out);
                            let _ = nfsproc::RemoveRes3Ok { dir_wcc: attr::wcc(Some(&before), Some(&before), &auth_unix, &ctx.config, &export) }.serialize(out);
                        }
                    }
                }
                Err(status) => {
                    let _ = status.serialize(out);
                }
            }
        }

        RmDir => {
            let mut args = nfsproc::RmDir3Args::default();
            if args.deserialize(src).is_err() {
                let _ = nfsstat3::NFS3ERR_INVAL.serialize(out);
                return;
            }
            match resolve_object(ctx, &args.object.dir) {
                Ok((dir_path, export, before)) => {
                    let target = dir_path.join(&args.object.name);
                    match crate::host::rmdir(&target) {
                        Ok(()) => {
                            ctx.bump_readdir_epoch();
                            let after = crate::host::lstat(&dir_path).ok();
                            let _ = nfsstat3::NFS3_OK.serialize(out);
                            let _ = nfsproc::RemoveRes3Ok { dir_wcc: attr::wcc(Some(&before), after.as_ref(), &auth_unix, &ctx.config, &export) }.serialize(out);
                        }
                        Err(e) => {
                            let _ = nfsstat3::from(e).serialize(out);
                            let _ = nfsproc::RemoveRes3Ok { dir_wcc: attr::wcc(Some(&before), Some(&before), &auth_unix, &ctx.config, &export) }.serialize(out);
                        }
                    }
                }
                Err(status) => {
                    let _ = status.serialize(out);
                }
            }
        }

        MkDir => {
            let mut args = nfsproc::MkDir3Args::default();
            if args.deserialize(src).is_err() {
                let _ = nfsstat3::NFS3ERR_INVAL.serialize(out);
                return;
            }
            match resolve_object(ctx, &args.where_.dir) {
                Ok((dir_path, export, before)) => {
                    let target = dir_path.join(&args.where_.name);
                    let mode = args.attributes.mode.unwrap_or(0o777);
                    match crate::host::mkdir(&target, nix::sys::stat::Mode::from_bits_truncate(mode)) {
                        Ok(()) => {
                            ctx.bump_readdir_epoch();
                            let stat = crate::host::lstat(&target).ok();
                            let after = crate::host::lstat(&dir_path).ok();
                            let fh = stat.as_ref().and_then(|_| encode_fh(&target, &export, gen_of));
                            let _ = nfsstat3::NFS3_OK.serialize(out);
                            let _ = nfsproc::DirOpRes3Ok {
                                obj: fh,
                                obj_attributes: attr::post_op(stat.as_ref(), &auth_unix, &ctx.config, &export),
                                dir_wcc: attr::wcc(Some(&before), after.as_ref(), &auth_unix, &ctx.config, &export),
                            }
                            .serialize(out);
                        }
                        Err(e) => {
                            let _ = nfsstat3::from(e).serialize(out);
                            let _ = nfsproc::DirOpRes3Fail { dir_wcc: attr::wcc(Some(&before), Some(&before), &auth_unix, &ctx.config, &export) }.serialize(out);
                        }
                    }
                }
                Err(status) => {
                    let _ = status.serialize(out);
                }
            }
        }

        Create => {
            let mut args = nfsproc::Create3Args::default();
            if args.deserialize(src).is_err() {
                let _ = nfsstat3::NFS3ERR_INVAL.serialize(out);
                return;
            }
            match resolve_object(ctx, &args.where_.dir) {
                Ok((dir_path, export, before)) => {
                    let target = dir_path.join(&args.where_.name);
                    let mode = match &args.how {
                        nfs::CreateHow3::Unchecked(a) | nfs::CreateHow3::Guarded(a) => a.mode.unwrap_or(0o666),
                        nfs::CreateHow3::Exclusive(_) => 0o666,
                    };
                    let result = crate::host::open(
                        &target,
                        nix::fcntl::OFlag::O_CREAT | nix::fcntl::OFlag::O_WRONLY | nix::fcntl::OFlag::O_TRUNC,
                        nix::sys::stat::Mode::from_bits_truncate(mode),
                    );
                    match result {
                        Ok(_file) => {
                            ctx.bump_readdir_epoch();
                            let stat = crate::host::lstat(&target).ok();
                            let after = crate::host::lstat(&dir_path).ok();
                            let fh = stat.as_ref().and_then(|_| encode_fh(&target, &export, gen_of));
                            let _ = nfsstat3::NFS3_OK.serialize(out);
                            let _ = nfsproc::DirOpRes3Ok {
                                obj: fh,
                                obj_attributes: attr::post_op(stat.as_ref(), &auth_unix, &ctx.config, &export),
                                dir_wcc: attr::wcc(Some(&before), after.as_ref(), &auth_unix, &ctx.config, &export),
                            }
                            .serialize(out);
                        }
                        Err(e) => {
                            let _ = nfsstat3::from(e).serialize(out);
                            let _ = nfsproc::DirOpRes3Fail { dir_wcc: attr::wcc(Some(&before), Some(&before), &auth_unix, &ctx.config, &export) }.serialize(out);
                        }
                    }
                }
                Err(status) => {
                    let _ = status.serialize(out);
                }
            }
        }

        SymLink => {
            let mut args = nfsproc::SymLink3Args::default();
            if args.deserialize(src).is_err() {
                let _ = nfsstat3::NFS3ERR_INVAL.serialize(out);
                return;
            }
            match resolve_object(ctx, &args.where_.dir) {
                Ok((dir_path, export, before)) => {
                    let target = dir_path.join(&args.where_.name);
                    match crate::host::symlink(Path::new(&args.symlink.symlink_data), &target) {
                        Ok(()) => {
                            ctx.bump_readdir_epoch();
                            let stat = crate::host::lstat(&target).ok();
                            let after = crate::host::lstat(&dir_path).ok();
                            let fh = stat.as_ref().and_then(|_| encode_fh(&target, &export, gen_of));
                            let _ = nfsstat3::NFS3_OK.serialize(out);
                            let _ = nfsproc::DirOpRes3Ok {
                                obj: fh,
                                obj_attributes: attr::post_op(stat.as_ref(), &auth_unix, &ctx.config, &export),
                                dir_wcc: attr::wcc(Some(&before), after.as_ref(), &auth_unix, &ctx.config, &export),
                            }
                            .serialize(out);
                        }
                        Err(e) => {
                            let _ = nfsstat3::from(e).serialize(out);
                            let _ = nfsproc::DirOpRes3Fail { dir_wcc: attr::wcc(Some(&before), Some(&before), &auth_unix, &ctx.config, &export) }.serialize(out);
                        }
                    }
                }
                Err(status) => {
                    let _ = status.serialize(out);
                }
            }
        }

        MkNod => {
            let mut args = nfsproc::MkNod3Args::default();
            if args.deserialize(src).is_err() {
                let _ = nfsstat3::NFS3ERR_INVAL.serialize(out);
                return;
            }
            match resolve_object(ctx, &args.where_.dir) {
                Ok((dir_path, export, before)) => {
                    let target = dir_path.join(&args.where_.name);
                    let result = create_special(&target, &args.what);
                    match result {
                        Ok(()) => {
                            ctx.bump_readdir_epoch();
                            let stat = crate::host::lstat(&target).ok();
                            let after = crate::host::lstat(&dir_path).ok();
                            let fh = stat.as_ref().and_then(|_| encode_fh(&target, &export, gen_of));
                            let _ = nfsstat3::NFS3_OK.serialize(out);
                            let _ = nfsproc::DirOpRes3Ok {
                                obj: fh,
                                obj_attributes: attr::post_op(stat.as_ref(), &auth_unix, &ctx.config, &export),
                                dir_wcc: attr::wcc(Some(&before), after.as_ref(), &auth_unix, &ctx.config, &export),
                            }
                            .serialize(out);
                        }
                        Err(e) => {
                            let _ = nfsstat3::from(e).serialize(out);
                            let _ = nfsproc::DirOpRes3Fail { dir_wcc: attr::wcc(Some(&before), Some(&before), &auth_unix, &ctx.config, &export) }.serialize(out);
                        }
                    }
                }
                Err(status) => {
                    let _ = status.serialize(out);
                }
            }
        }

        Rename => {
            let mut args = nfsproc::Rename3Args::default();
            if args.deserialize(src).is_err() {
                let _ = nfsstat3::NFS3ERR_INVAL.serialize(out);
                return;
            }
            match (resolve_object(ctx, &args.from.dir), resolve_object(ctx, &args.to.dir)) {
                (Ok((from_dir, from_export, from_before)), Ok((to_dir, to_export, to_before))) => {
                    let from_path = from_dir.join(&args.from.name);
                    let to_path = to_dir.join(&args.to.name);
                    match crate::host::rename(&from_path, &to_path) {
                        Ok(()) => {
                            ctx.bump_readdir_epoch();
                            let from_after = crate::host::lstat(&from_dir).ok();
                            let to_after = crate::host::lstat(&to_dir).ok();
                            let _ = nfsstat3::NFS3_OK.serialize(out);
                            let _ = nfsproc::Rename3ResOk {
                                fromdir_wcc: attr::wcc(Some(&from_before), from_after.as_ref(), &auth_unix, &ctx.config, &from_export),
                                todir_wcc: attr::wcc(Some(&to_before), to_after.as_ref(), &auth_unix, &ctx.config, &to_export),
                            }
                            .serialize(out);
                        }
                        Err(e) => {
                            let _ = nfsstat3::from(NfsError::from_errno_rename(errno_of(e))).serialize(out);
                            let _ = nfsproc::Rename3ResOk {
                                fromdir_wcc: attr::wcc(Some(&from_before), Some(&from_before), &auth_unix, &ctx.config, &from_export),
                                todir_wcc: attr::wcc(Some(&to_before), Some(&to_before), &auth_unix, &ctx.config, &to_export),
                            }
                            .serialize(out);
                        }
                    }
                }
                _ => {
                    let _ = nfsstat3::NFS3ERR_STALE.serialize(out);
                }
            }
        }

        Link => {
            let mut args = nfsproc::Link3Args::default();
            if args.deserialize(src).is_err() {
                let _ = nfsstat3::NFS3ERR_INVAL.serialize(out);
                return;
            }
            match (resolve_object(ctx, &args.file), resolve_object(ctx, &args.link.dir)) {
                (Ok((file_path, _file_export, file_stat)), Ok((dir_path, dir_export, dir_before))) => {
                    let target = dir_path.join(&args.link.name);
                    match crate::host::link(&file_path, &target) {
                        Ok(()) => {
                            ctx.bump_readdir_epoch();
                            let after = crate::host::lstat(&dir_path).ok();
                            let _ = nfsstat3::NFS3_OK.serialize(out);
                            let _ = nfsproc::Link3ResOk {
                                file_attributes: attr::post_op(Some(&file_stat), &auth_unix, &ctx.config, &dir_export),
                                linkdir_wcc: attr::wcc(Some(&dir_before), after.as_ref(), &auth_unix, &ctx.config, &dir_export),
                            }
                            .serialize(out);
                        }
                        Err(e) => {
                            let _ = nfsstat3::from(e).serialize(out);
                        }
                    }
                }
                _ => {
                    let _ = nfsstat3::NFS3ERR_STALE.serialize(out);
                }
            }
        }

        ReadDir => {
            let mut args = nfsproc::ReadDir3Args::default();
            if args.deserialize(src).is_err() {
                let _ = nfsstat3::NFS3ERR_INVAL.serialize(out);
                return;
            }
            match resolve_object(ctx, &args.dir) {
                Ok((dir_path, export, stat)) => {
                    let offset = cookie_offset(args.cookie, ctx.readdir_epoch);
                    let mut entries: Vec<_> = std::fs::read_dir(&dir_path)
                        .map(|it| it.flatten().collect())
                        .unwrap_or_else(|_| Vec::new());
                    entries.sort_by_key(|e: &std::fs::DirEntry| e.file_name());

                    let mut result = Vec::new();
                    for (idx, entry) in entries.iter().enumerate().skip(offset as usize) {
                        let Ok(child_stat) = crate::host::lstat(&entry.path()) else { continue };
                        result.push(nfsproc::DirEntry3 {
                            fileid: child_stat.st_ino,
                            name: entry.file_name().to_string_lossy().into_owned(),
                            cookie: make_cookie(ctx.readdir_epoch, idx as u32 + 1),
                        });
                        if result.len() >= 143 {
                            break;
                        }
                    }
                    let eof = offset as usize + result.len() >= entries.len();

                    let _ = nfsstat3::NFS3_OK.serialize(out);
                    let _ = nfsproc::ReadDir3ResOk {
                        dir_attributes: attr::post_op(Some(&stat), &auth_unix, &ctx.config, &export),
                        cookieverf: [0u8; nfs::NFS3_COOKIEVERFSIZE],
                        entries: result,
                        eof,
                    }
                    .serialize(out);
                }
                Err(status) => {
                    let _ = status.serialize(out);
                }
            }
        }

        ReadDirPlus => {
            // Deliberately unimplementable atomically from user space;
            // every conforming NFSv3 server must still answer this
            // procedure number rather than drop the connection.
            let _ = nfsstat3::NFS3ERR_NOTSUPP.serialize(out);
        }

        FsStat => {
            let mut args = nfsproc::GetAttr3Args::default();
            if args.deserialize(src).is_err() {
                let _ = nfsstat3::NFS3ERR_INVAL.serialize(out);
                return;
            }
            match resolve_object(ctx, &args.object) {
                Ok((path, export, stat)) => match crate::host::statvfs(&path) {
                    Ok(vfs) => {
                        let _ = nfsstat3::NFS3_OK.serialize(out);
                        let _ = nfsproc::FsStat3ResOk {
                            obj_attributes: attr::post_op(Some(&stat), &auth_unix, &ctx.config, &export),
                            tbytes: vfs.blocks() * vfs.fragment_size(),
                            fbytes: vfs.blocks_free() * vfs.fragment_size(),
                            abytes: vfs.blocks_available() * vfs.fragment_size(),
                            tfiles: vfs.files(),
                            ffiles: vfs.files_free(),
                            afiles: vfs.files_free(),
                            invarsec: 0,
                        }
                        .serialize(out);
                    }
                    Err(e) => {
                        let _ = nfsstat3::from(e).serialize(out);
                    }
                },
                Err(status) => {
                    let _ = status.serialize(out);
                }
            }
        }

        FsInfo => {
            let mut args = nfsproc::GetAttr3Args::default();
            if args.deserialize(src).is_err() {
                let _ = nfsstat3::NFS3ERR_INVAL.serialize(out);
                return;
            }
            match resolve_object(ctx, &args.object) {
                Ok((_, export, stat)) => {
                    let _ = nfsstat3::NFS3_OK.serialize(out);
                    let _ = nfsproc::FsInfo3ResOk {
                        obj_attributes: attr::post_op(Some(&stat), &auth_unix, &ctx.config, &export),
                        rtmax: 65536,
                        rtpref: 32768,
                        rtmult: 4096,
                        wtmax: 65536,
                        wtpref: 32768,
                        wtmult: 4096,
                        dtpref: 4096,
                        maxfilesize: u64::MAX,
                        time_delta: nfs::nfstime3 { seconds: 1, nseconds: 0 },
                        properties: nfs::FSF3_LINK | nfs::FSF3_SYMLINK | nfs::FSF3_HOMOGENEOUS | nfs::FSF3_CANSETTIME,
                    }
                    .serialize(out);
                }
                Err(status) => {
                    let _ = status.serialize(out);
                }
            }
        }

        PathConf => {
            let mut args = nfsproc::GetAttr3Args::default();
            if args.deserialize(src).is_err() {
                let _ = nfsstat3::NFS3ERR_INVAL.serialize(out);
                return;
            }
            match resolve_object(ctx, &args.object) {
                Ok((_, export, stat)) => {
                    let _ = nfsstat3::NFS3_OK.serialize(out);
                    let _ = nfsproc::PathConf3ResOk {
                        obj_attributes: attr::post_op(Some(&stat), &auth_unix, &ctx.config, &export),
                        linkmax: 32000,
                        name_max: 255,
                        no_trunc: true,
                        chown_restricted: true,
                        case_insensitive: false,
                        case_preserving: true,
                    }
                    .serialize(out);
                }
                Err(status) => {
                    let _ = status.serialize(out);
                }
            }
        }

        Commit => {
            let mut args = nfsproc::Commit3Args::default();
            if args.deserialize(src).is_err() {
                let _ = nfsstat3::NFS3ERR_INVAL.serialize(out);
                return;
            }
            match resolve_object(ctx, &args.file) {
                Ok((_, export, before)) => {
                    let fh = FileHandle::decode(&args.file.data, export.pwhash).unwrap_or_else(|_| FileHandle::invalid());
                    match write_fsm::commit(ctx, &fh) {
                        Ok(()) => {
                            let _ = nfsstat3::NFS3_OK.serialize(out);
                            let _ = nfsproc::Commit3ResOk {
                                file_wcc: attr::wcc(Some(&before), Some(&before), &auth_unix, &ctx.config, &export),
                                verf: ctx.write_verifier,
                            }
                            .serialize(out);
                        }
                        Err(e) => {
                            let _ = nfsstat3::from(e).serialize(out);
                            let _ = nfsproc::Commit3ResOk {
                                file_wcc: attr::wcc(Some(&before), Some(&before), &auth_unix, &ctx.config, &export),
                                verf: ctx.write_verifier,
                            }
                            .serialize(out);
                        }
                    }
                }
                Err(status) => {
                    let _ = status.serialize(out);
                }
            }
        }
    }
}

fn stable_how_default() -> nfs::stable_how {
    nfs::stable_how::UNSTABLE
}

fn errno_of(e: NfsError) -> nix::errno::Errno {
    // Best-effort reverse mapping for the rename-specific table; exact
    // errno fidelity is not required once the taxonomy has already
    // collapsed the original errno away.
    match e {
        NfsError::NotEmpty => nix::errno::Errno::ENOTEMPTY,
        _ => nix::errno::Errno::EIO,
    }
}

fn apply_sattr(path: &Path, attrs: &nfs::sattr3) -> crate::error::Result<()> {
    if let Some(mode) = attrs.mode {
        nix::sys::stat::fchmodat(
            None,
            path,
            nix::sys::stat::Mode::from_bits_truncate(mode),
            nix::sys::stat::FchmodatFlags::FollowSymlink,
        )
        .map_err(NfsError::from_errno)?;
    }
    if attrs.uid.is_some() || attrs.gid.is_some() {
        nix::unistd::chown(
            path,
            attrs.uid.map(nix::unistd::Uid::from_raw),
            attrs.gid.map(nix::unistd::Gid::from_raw),
        )
        .map_err(NfsError::from_errno)?;
    }
    if let Some(size) = attrs.size {
        nix::unistd::truncate(path, size as i64).map_err(NfsError::from_errno)?;
    }
    Ok(())
}

fn create_special(path: &Path, what: &nfs::MkNodData3) -> crate::error::Result<()> {
    use nix::sys::stat::{Mode, SFlag};
    match what {
        nfs::MkNodData3::Block(d) => {
            let mode = Mode::from_bits_truncate(d.dev_attributes.mode.unwrap_or(0o666));
            let dev = nix::sys::stat::makedev(d.spec.specdata1 as u64, d.spec.specdata2 as u64);
            crate::host::mknod(path, SFlag::S_IFBLK, mode, dev)
        }
        nfs::MkNodData3::Char(d) => {
            let mode = Mode::from_bits_truncate(d.dev_attributes.mode.unwrap_or(0o666));
            let dev = nix::sys::stat::makedev(d.spec.specdata1 as u64, d.spec.specdata2 as u64);
            crate::host::mknod(path, SFlag::S_IFCHR, mode, dev)
        }
        nfs::MkNodData3::Socket(a) => {
            let mode = Mode::from_bits_truncate(a.mode.unwrap_or(0o666));
            crate::host::mknod(path, SFlag::S_IFSOCK, mode, 0)
        }
        nfs::MkNodData3::Fifo(a) => {
            let mode = Mode::from_bits_truncate(a.mode.unwrap_or(0o666));
            crate::host::mknod(path, SFlag::S_IFIFO, mode, 0)
        }
    }
}

/// Splits a client cookie into the directory offset, treating any
/// epoch mismatch as cookie zero (restart the scan) rather than
/// NFS3ERR_BAD_COOKIE.
fn cookie_offset(cookie: u64, current_epoch: u32) -> u32 {
    let epoch = (cookie >> 32) as u32;
    if epoch != current_epoch || cookie == 0 {
        0
    } else {
        cookie as u32
    }
}

fn make_cookie(epoch: u32, offset: u32) -> u64 {
    ((epoch as u64) << 32) | offset as u64
}

fn dispatch_mount(
    ctx: &mut ServerContext,
    procedure: mount::Procedure,
    src: &mut Cursor<&[u8]>,
    out: &mut Vec<u8>,
    peer: std::net::IpAddr,
    peer_port_privileged: bool,
) {
    use mount::Procedure::*;
    match procedure {
        Null => {}
        Mnt => {
            let mut dirpath = String::new();
            if dirpath.deserialize(src).is_err() {
                let _ = mount::mountstat3::MNT3ERR_INVAL.serialize(out);
                return;
            }
            let (status, fh) = mount::handle_mnt(ctx, peer, peer_port_privileged, &dirpath);
            let _ = status.serialize(out);
            if let Some(fh) = fh {
                let _ = mount::MountRes3Ok { fhandle: fh.encode(), auth_flavors: vec![AuthFlavor::AuthSys as u32] }.serialize(out);
            }
        }
        Dump => {
            let entries = mount::handle_dump(ctx);
            for e in &entries {
                let _ = true.serialize(out);
                let _ = e.serialize(out);
            }
            let _ = false.serialize(out);
        }
        Umnt => {
            let mut directory = String::new();
            if directory.deserialize(src).is_err() {
                return;
            }
            mount::handle_umnt(ctx, &peer.to_string(), &directory);
        }
        UmntAll => {
            mount::handle_umntall(ctx, &peer.to_string());
        }
        Export => {
            let entries = mount::handle_export(ctx);
            for (path, clients) in &entries {
                let _ = true.serialize(out);
                let _ = path.clone().serialize(out);
                for c in clients {
                    let _ = true.serialize(out);
                    let _ = c.clone().serialize(out);
                }
                let _ = false.serialize(out);
            }
            let _ = false.serialize(out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NfsError;

    #[test]
    fn cookie_round_trips_within_the_same_epoch() {
        let cookie = make_cookie(7, 42);
        assert_eq!(cookie_offset(cookie, 7), 42);
    }

    #[test]
    fn cookie_zero_always_restarts_the_scan() {
        assert_eq!(cookie_offset(0, 9), 0);
    }

    #[test]
    fn cookie_from_a_stale_epoch_restarts_the_scan() {
        let cookie = make_cookie(1, 42);
        assert_eq!(cookie_offset(cookie, 2), 0);
    }

    #[test]
    fn peek_pwhash_reads_the_wire_field_without_validating_it() {
        let mut fh = vec![0u8; 21];
        fh[16..20].copy_from_slice(&0xdead_beefu32.to_le_bytes());
        assert_eq!(peek_pwhash(&fh), Some(0xdead_beef));
    }

    #[test]
    fn peek_pwhash_rejects_a_filehandle_too_short_to_hold_it() {
        assert_eq!(peek_pwhash(&[0u8; 10]), None);
    }

    #[test]
    fn errno_of_maps_not_empty_to_enotempty() {
        assert_eq!(errno_of(NfsError::NotEmpty), nix::errno::Errno::ENOTEMPTY);
    }

    #[test]
    fn errno_of_falls_back_to_eio_for_unmapped_errors() {
        assert_eq!(errno_of(NfsError::Io), nix::errno::Errno::EIO);
    }

    #[test]
    fn stable_how_default_is_unstable() {
        assert_eq!(stable_how_default(), nfs::stable_how::UNSTABLE);
    }
}
