//! Optional portmap/rpcbind registration. Gated by `config.register_portmap`
//! (the `-p` flag flips it off); skipped entirely in unprivileged-port
//! mode since rpcbind refuses non-standard ports for `set`.

use std::net::IpAddr;

use crate::mount;
use crate::nfs;
use crate::xdr::Xdr;

const PMAP_PROGRAM: u32 = 100000;
const PMAP_VERSION: u32 = 2;
const PMAP_PORT: u16 = 111;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    fn ipproto(self) -> u32 {
        match self {
            Protocol::Tcp => 6,
            Protocol::Udp => 17,
        }
    }
}

/// Registers NFS and MOUNT (both versions this server speaks) with the
/// local rpcbind daemon over UDP, for each transport actually bound.
/// Best-effort: a missing or refusing rpcbind only logs a warning, it
/// never prevents the server from serving NFS directly.
pub async fn register_all(bind_addr: IpAddr, nfs_port: u16, mount_port: u16, tcp: bool, udp: bool) {
    let mut calls = Vec::new();
    if tcp {
        calls.push((nfs::PROGRAM, nfs::VERSION, Protocol::Tcp, nfs_port));
        calls.push((mount::PROGRAM, mount::VERSION1, Protocol::Tcp, mount_port));
        calls.push((mount::PROGRAM, mount::VERSION3, Protocol::Tcp, mount_port));
    }
    if udp {
        calls.push((nfs::PROGRAM, nfs::VERSION, Protocol::Udp, nfs_port));
        calls.push((mount::PROGRAM, mount::VERSION1, Protocol::Udp, mount_port));
        calls.push((mount::PROGRAM, mount::VERSION3, Protocol::Udp, mount_port));
    }

    for (prog, vers, proto, port) in calls {
        if let Err(e) = set(bind_addr, prog, vers, proto, port).await {
            tracing::warn!(%prog, %vers, ?proto, %port, %e, "rpcbind registration failed");
        }
    }
}

/// Best-effort deregistration of everything this server might have
/// registered, called on clean shutdown.
pub async fn unregister_all(nfs_port: u16, mount_port: u16) {
    for (prog, vers) in [
        (nfs::PROGRAM, nfs::VERSION),
        (mount::PROGRAM, mount::VERSION1),
        (mount::PROGRAM, mount::VERSION3),
    ] {
        let _ = unset(prog, vers).await;
    }
    let _ = (nfs_port, mount_port);
}

async fn set(bind_addr: IpAddr, prog: u32, vers: u32, proto: Protocol, port: u16) -> std::io::Result<()> {
    let mut body = Vec::new();
    prog.serialize(&mut body)?;
    vers.serialize(&mut body)?;
    proto.ipproto().serialize(&mut body)?;
    (port as u32).serialize(&mut body)?;
    call(bind_addr, 1, &body).await
}

async fn unset(prog: u32, vers: u32) -> std::io::Result<()> {
    let bind_addr: IpAddr = [127, 0, 0, 1].into();
    let mut body = Vec::new();
    prog.serialize(&mut body)?;
    vers.serialize(&mut body)?;
    0u32.serialize(&mut body)?;
    0u32.serialize(&mut body)?;
    call(bind_addr, 2, &body).await
}

/// Minimal ONC-RPC call to rpcbind: builds the call envelope by hand
/// (portmap's own argument shapes are fixed and tiny enough that
/// reusing the full `CallBody` machinery would only add indirection)
/// and fires it over a short-lived UDP socket.
async fn call(bind_addr: IpAddr, procedure: u32, args: &[u8]) -> std::io::Result<()> {
    use tokio::net::UdpSocket;

    let sock = UdpSocket::bind((bind_addr, 0)).await?;
    sock.connect((bind_addr, PMAP_PORT)).await?;

    let mut msg = Vec::new();
    1u32.serialize(&mut msg)?; // arbitrary XID
    0u32.serialize(&mut msg)?; // CALL
    2u32.serialize(&mut msg)?; // RPC version 2
    PMAP_PROGRAM.serialize(&mut msg)?;
    PMAP_VERSION.serialize(&mut msg)?;
    procedure.serialize(&mut msg)?;
    0u32.serialize(&mut msg)?; // AUTH_NONE cred
    0u32.serialize(&mut msg)?;
    0u32.serialize(&mut msg)?; // AUTH_NONE verf
    0u32.serialize(&mut msg)?;
    msg.extend_from_slice(args);

    sock.send(&msg).await?;

    let mut buf = [0u8; 512];
    let _ = tokio::time::timeout(std::time::Duration::from_secs(2), sock.recv(&mut buf)).await;
    Ok(())
}
