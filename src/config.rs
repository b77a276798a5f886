use std::path::PathBuf;
use std::thread;

use clap::Parser;

/// Command line configuration of the catalog daemon.
#[derive(Parser, Clone, Debug)]
#[clap(author, version, about = "Laptop catalog server", long_about = None)]
pub struct ServerConfig {
    /// Address of the catalog RPC listener
    #[clap(long, default_value = "0.0.0.0:8080")]
    pub addr: String,

    /// Port of the read-only HTTP admin API (disabled when omitted)
    #[clap(long)]
    pub api_port: Option<u16>,

    /// Folder receiving uploaded images
    #[clap(long, default_value = "img")]
    pub image_dir: PathBuf,

    /// Tokio worker threads (defaults to the number of logical cores)
    #[clap(long)]
    pub worker_threads: Option<usize>,

    /// Log filter used when RUST_LOG is not set
    #[clap(long, default_value = "info")]
    pub log_level: String,
}

impl ServerConfig {
    pub fn worker_threads(&self) -> usize {
        self.worker_threads
        .filter(|n| *n > 0)
        .unwrap_or_else(|| thread::available_parallelism().map(|n| n.get()).unwrap_or(1))
    }
}
