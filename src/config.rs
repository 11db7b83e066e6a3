//! C12: CLI flags and the immutable server configuration they build.

use std::net::IpAddr;
use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "unfs3rsd", about = "A user-space NFSv3 + MOUNT server", disable_help_flag = true)]
pub struct Cli {
    /// Stay attached to the controlling terminal instead of logging
    /// exclusively through the structured subscriber.
    #[arg(short = 'd')]
    pub debug: bool,

    /// Exports file path (must be absolute).
    #[arg(short = 'e', value_name = "path")]
    pub exports: Option<PathBuf>,

    /// PID file path.
    #[arg(short = 'i', value_name = "path")]
    pub pid_file: Option<PathBuf>,

    /// NFS port override.
    #[arg(short = 'n', value_name = "port")]
    pub nfs_port: Option<u16>,

    /// MOUNT port override.
    #[arg(short = 'm', value_name = "port")]
    pub mount_port: Option<u16>,

    /// Use unprivileged (ephemeral) ports for NFS/MOUNT.
    #[arg(short = 'u')]
    pub unprivileged_ports: bool,

    /// TCP-only; do not bind a UDP socket.
    #[arg(short = 't')]
    pub tcp_only: bool,

    /// Skip portmap/rpcbind registration.
    #[arg(short = 'p')]
    pub skip_portmap: bool,

    /// Single-user mode: squash every caller to the server's own uid.
    #[arg(short = 's')]
    pub singleuser: bool,

    /// Enable brute-force fallback resolution.
    #[arg(short = 'b')]
    pub brute_force: bool,

    /// Bind interface address.
    #[arg(short = 'l', value_name = "addr")]
    pub bind_addr: Option<IpAddr>,

    /// Propagate execute bits into read bits for regular files.
    #[arg(short = 'r')]
    pub readable_executables: bool,

    /// Parse the exports file, print the table, and exit.
    #[arg(short = 'T')]
    pub parse_and_exit: bool,

    /// Print usage and exit.
    #[arg(short = 'h', action = clap::ArgAction::Help)]
    pub help: Option<bool>,
}

pub const DEFAULT_NFS_PORT: u16 = 2049;
pub const DEFAULT_MOUNT_PORT: u16 = 627;
pub const DEFAULT_EXPORTS_PATH: &str = "/etc/exports";

/// Immutable for the life of the process; built once from [`Cli`] at
/// startup and handed by shared reference to every component.
#[derive(Debug, Clone)]
pub struct Config {
    pub exports_path: PathBuf,
    pub pid_file: Option<PathBuf>,
    pub nfs_port: u16,
    pub mount_port: u16,
    pub tcp_only: bool,
    pub register_portmap: bool,
    pub singleuser: bool,
    pub brute_force: bool,
    pub bind_addr: IpAddr,
    pub readable_executables: bool,
    pub parse_and_exit: bool,
    pub foreground: bool,
}

impl From<Cli> for Config {
    fn from(cli: Cli) -> Self {
        let (nfs_port, mount_port) = if cli.unprivileged_ports {
            (0, 0)
        } else {
            (
                cli.nfs_port.unwrap_or(DEFAULT_NFS_PORT),
                cli.mount_port.unwrap_or(DEFAULT_MOUNT_PORT),
            )
        };

        Config {
            exports_path: cli.exports.unwrap_or_else(|| PathBuf::from(DEFAULT_EXPORTS_PATH)),
            pid_file: cli.pid_file,
            nfs_port,
            mount_port,
            tcp_only: cli.tcp_only,
            register_portmap: !cli.skip_portmap,
            singleuser: cli.singleuser,
            brute_force: cli.brute_force,
            bind_addr: cli.bind_addr.unwrap_or_else(|| IpAddr::from([0, 0, 0, 0])),
            readable_executables: cli.readable_executables,
            parse_and_exit: cli.parse_and_exit,
            foreground: cli.debug,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser as _;

    #[test]
    fn unprivileged_flag_zeroes_ports() {
        let cli = Cli::parse_from(["unfs3rsd", "-u"]);
        let config: Config = cli.into();
        assert_eq!(config.nfs_port, 0);
        assert_eq!(config.mount_port, 0);
    }

    #[test]
    fn default_exports_path() {
        let cli = Cli::parse_from(["unfs3rsd"]);
        let config: Config = cli.into();
        assert_eq!(config.exports_path, PathBuf::from(DEFAULT_EXPORTS_PATH));
    }
}
