//! A user-space NFSv3 + MOUNT server: stateless filehandles resolved
//! by a hash-guided directory walk, so the whole service runs without
//! ever persisting its own state across a restart.

pub mod access;
pub mod attr;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod export;
pub mod fd_cache;
pub mod fh_cache;
pub mod filehandle;
pub mod host;
pub mod md5;
pub mod mount;
pub mod nfs;
pub mod portmap;
pub mod resolver;
pub mod rpc;
pub mod write_fsm;
pub mod xdr;

use tokio::net::{TcpListener, UdpSocket};

use crate::config::Config;
use crate::context::ServerContext;

/// Binds the configured sockets, optionally registers with rpcbind,
/// and runs the dispatcher loop until a termination signal arrives.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let exports = export::parse_file(&config.exports_path)
        .map_err(|e| anyhow::anyhow!("failed to parse {}: {e}", config.exports_path.display()))?;

    let tcp = TcpListener::bind((config.bind_addr, config.nfs_port)).await?;
    let nfs_port = tcp.local_addr()?.port();

    let udp = if config.tcp_only {
        None
    } else {
        Some(UdpSocket::bind((config.bind_addr, config.nfs_port)).await?)
    };

    if config.register_portmap {
        portmap::register_all(config.bind_addr, nfs_port, config.mount_port, true, !config.tcp_only).await;
    }

    tracing::info!(
        nfs_port,
        mount_port = config.mount_port,
        exports = ?config.exports_path,
        "server starting"
    );

    let ctx = ServerContext::new(config, exports);
    let result = dispatcher::run(ctx, tcp, udp).await;

    result
}
