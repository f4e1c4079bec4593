use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use courier::blacklist::BlacklistConfig;
use courier::cli::DaemonOpts;
use courier::logger::{EventSink, NoopSink, TextSink};
use courier::server::{AuthFn, ReportServer, ServerConfig};

fn main() -> Result<()> {
    let opts = DaemonOpts::parse();

    // Validate output directory exists and is a directory
    if !opts.output.exists() {
        anyhow::bail!("Error: Output directory does not exist: {}", opts.output.display());
    }
    if !opts.output.is_dir() {
        anyhow::bail!("Error: Output path is not a directory: {}", opts.output.display());
    }

    // Canonicalize the path for better logging
    let canonical_output = std::fs::canonicalize(&opts.output)
        .with_context(|| format!("Failed to canonicalize output path: {}", opts.output.display()))?;

    println!("Starting courierd:");
    println!("  Port: {}", opts.port);
    println!("  Output: {}", canonical_output.display());
    println!("  Max sessions: {}", opts.max_connections);
    println!("  Max file size: {} bytes", opts.max_file_size);
    println!("Press Ctrl+C to stop");

    let sink: Arc<dyn EventSink> = match &opts.log_file {
        Some(path) => match TextSink::new(path) {
            Ok(sink) => Arc::new(sink),
            Err(_) => Arc::new(NoopSink),
        },
        None => Arc::new(NoopSink),
    };

    let (user, password) = (opts.user.clone(), opts.password.clone());
    let auth: AuthFn = Arc::new(move |u, p| u == user && p == password);

    let config = ServerConfig {
        port: opts.port,
        output_dir: canonical_output,
        max_connections: opts.max_connections,
        max_file_size: opts.max_file_size,
        blacklist: BlacklistConfig::default(),
    };

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    rt.block_on(async move {
        let cancel = CancellationToken::new();
        let watcher = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Stopping courierd...");
                watcher.cancel();
            }
        });
        Arc::new(ReportServer::new(config, auth, sink))
            .serve(cancel)
            .await
    })
}
