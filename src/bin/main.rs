//! `unfs3rsd`: the server binary. Parses CLI flags, sets up logging,
//! optionally writes a PID file, and either prints the export table
//! (`-T`) or runs the dispatcher forever.

use std::io::Write;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use unfs3rs::config::{Cli, Config};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config: Config = cli.into();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    if config.parse_and_exit {
        let table = unfs3rs::export::parse_file(&config.exports_path)?;
        for entry in &table.entries {
            println!("{:?}", entry);
        }
        return Ok(());
    }

    let _pid_guard = config.pid_file.as_ref().map(PidFile::create).transpose()?;

    unfs3rs::run(config).await
}

/// Holds a PID file for the life of the process, removing it on drop
/// so a clean shutdown never leaves a stale PID behind.
struct PidFile {
    path: std::path::PathBuf,
}

impl PidFile {
    fn create(path: &std::path::PathBuf) -> anyhow::Result<Self> {
        let mut file = std::fs::OpenOptions::new().create(true).write(true).truncate(true).open(path)?;
        writeln!(file, "{}", unfs3rs::host::process_id())?;
        Ok(PidFile { path: path.clone() })
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
