//! Shared CLI helpers and small reusable Clap fragments

use clap::Parser;
use std::path::PathBuf;

use crate::protocol::{limits, DEFAULT_PORT};

/// Common daemon options used by courierd
#[derive(Clone, Debug, Parser)]
pub struct DaemonOpts {
    /// TCP port to listen on (all interfaces)
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Directory where received files and the session journal are written
    #[arg(long, default_value = ".")]
    pub output: PathBuf,

    /// Username accepted by the daemon
    #[arg(long, default_value = "admin")]
    pub user: String,

    /// Password accepted by the daemon
    #[arg(long, default_value = "password")]
    pub password: String,

    /// Sessions serviced at once; extra connections queue
    #[arg(long, default_value_t = limits::MAX_CONNECTIONS)]
    pub max_connections: usize,

    /// Largest declared payload accepted, in bytes
    #[arg(long, default_value_t = limits::MAX_FILE_SIZE)]
    pub max_file_size: i64,

    /// Append session events to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}
