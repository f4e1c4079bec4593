//! Courier - deliver one encrypted host report to a collector daemon
//!
//! Design goals:
//! - Keep retrying until the collector takes the file
//! - One artifact per run, no state carried between runs
//! - Wire format compatible with the deployed receiver fleet

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use courier::client::{ClientConfig, UploadOutcome, Uploader};
use courier::logger::{EventSink, NoopSink, TextSink};
use courier::probe::{IcmpProbe, LivenessProbe, SkipProbe};
use courier::protocol::DEFAULT_PORT;
use courier::report::{self, ReportArtifact};
use courier::wire::Credential;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Courier - deliver one encrypted report file to a collector daemon"
)]
struct Args {
    /// File to deliver (not required with --snapshot)
    #[arg(required_unless_present = "snapshot")]
    file: Option<PathBuf>,

    /// Collect a host snapshot and deliver that instead of an existing file
    #[arg(long)]
    snapshot: bool,

    /// Directory the snapshot is written to
    #[arg(long, default_value = ".")]
    snapshot_dir: PathBuf,

    /// Collector hostname or IP
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Collector TCP port
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Username presented to the daemon
    #[arg(long, default_value = "admin")]
    user: String,

    /// Password presented to the daemon
    #[arg(long, default_value = "password")]
    password: String,

    /// Skip the ICMP reachability probe (raw sockets need privileges)
    #[arg(long)]
    no_probe: bool,

    /// Seconds to sleep between retry rounds
    #[arg(long, default_value_t = 30)]
    retry_delay: u64,

    /// Append transfer events to this file instead of drawing a progress bar
    #[arg(long)]
    log_file: Option<PathBuf>,
}

/// Progress bar driven by uploader events.
struct BarSink {
    bar: ProgressBar,
}

impl BarSink {
    fn new(total: u64) -> Self {
        let bar = ProgressBar::new(total);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{bar:40.cyan/blue} {bytes}/{total_bytes} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        Self { bar }
    }
}

impl EventSink for BarSink {
    fn probe(&self, host: &str, alive: bool) {
        if !alive {
            self.bar.set_message(format!("waiting for {host}"));
        }
    }
    fn upload_started(&self, _host: &str, _bytes: u64) {
        self.bar.set_position(0);
        self.bar.set_message("uploading");
    }
    fn upload_progress(&self, sent: u64, _total: u64) {
        self.bar.set_position(sent);
    }
    fn upload_complete(&self, _host: &str, _bytes: u64) {
        self.bar.finish_and_clear();
    }
    fn retry(&self, _context: &str, delay: Duration) {
        self.bar.set_message(format!("retrying in {}s", delay.as_secs()));
    }
    fn error(&self, _context: &str, msg: &str) {
        self.bar.set_message(format!("error: {msg}"));
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let credential = Credential::parse(&format!("{}:{}", args.user, args.password))
        .context("credential must be user:pass with both parts non-empty and no extra ':'")?;

    let artifact = if args.snapshot {
        let artifact = report::write_host_snapshot(&args.snapshot_dir)?;
        println!("Snapshot written to {}", artifact.path().display());
        artifact
    } else {
        let path = args
            .file
            .clone()
            .ok_or_else(|| anyhow::anyhow!("file required unless --snapshot"))?;
        ReportArtifact::open(path)?
    };

    println!(
        "Delivering {} ({} bytes) to {}:{}",
        artifact.path().display(),
        artifact.len(),
        args.host,
        args.port
    );

    // Choose sink once; the bar only makes sense on an interactive run
    let sink: Arc<dyn EventSink> = if let Some(ref p) = args.log_file {
        match TextSink::new(p) {
            Ok(s) => Arc::new(s),
            Err(_) => Arc::new(NoopSink),
        }
    } else {
        Arc::new(BarSink::new(artifact.len()))
    };

    let probe: Arc<dyn LivenessProbe> = if args.no_probe {
        Arc::new(SkipProbe)
    } else {
        Arc::new(IcmpProbe::new())
    };

    let mut config = ClientConfig::new(args.host.clone(), args.port, credential);
    config.retry_delay = Duration::from_secs(args.retry_delay);

    let cancel = CancellationToken::new();
    let watcher = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nInterrupted by user. Exiting (Ctrl-C)...");
            watcher.cancel();
        }
    });

    let uploader = Uploader::new(config, probe, sink);
    match uploader.run(&artifact, &cancel).await {
        UploadOutcome::Delivered { bytes } => {
            println!("Delivered {} ({} bytes)", artifact.path().display(), bytes);
            Ok(())
        }
        UploadOutcome::Cancelled => {
            // 128 + SIGINT, same convention as an interrupted copy
            std::process::exit(130);
        }
    }
}
