use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;

/// Event sink for transfer activity on either side of the wire. Every method
/// has a no-op default so callers implement only what they care about.
pub trait EventSink: Send + Sync {
    fn session_opened(&self, _peer: SocketAddr) {}
    fn session_rejected(&self, _peer: SocketAddr, _reason: &str) {}
    fn transfer_progress(&self, _peer: SocketAddr, _received: u64, _declared: u64) {}
    fn transfer_complete(&self, _peer: SocketAddr, _path: &Path, _bytes: u64) {}
    fn probe(&self, _host: &str, _alive: bool) {}
    fn upload_started(&self, _host: &str, _bytes: u64) {}
    fn upload_progress(&self, _sent: u64, _total: u64) {}
    fn upload_complete(&self, _host: &str, _bytes: u64) {}
    fn retry(&self, _context: &str, _delay: Duration) {}
    fn error(&self, _context: &str, _msg: &str) {}
}

pub struct NoopSink;
impl EventSink for NoopSink {}

pub struct TextSink {
    file: Mutex<File>,
}

impl TextSink {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }

    fn line(&self, s: &str) {
        if let Ok(mut f) = self.file.lock() {
            let _ = writeln!(f, "[{}] {}", Utc::now().to_rfc3339(), s);
        }
    }
}

impl EventSink for TextSink {
    fn session_opened(&self, peer: SocketAddr) {
        self.line(&format!("SESSION peer={peer}"));
    }
    fn session_rejected(&self, peer: SocketAddr, reason: &str) {
        self.line(&format!("REJECT peer={peer} reason={reason}"));
    }
    fn transfer_complete(&self, peer: SocketAddr, path: &Path, bytes: u64) {
        self.line(&format!(
            "RECV peer={} file={} bytes={}",
            peer,
            path.display(),
            bytes
        ));
    }
    fn probe(&self, host: &str, alive: bool) {
        self.line(&format!("PROBE host={host} alive={alive}"));
    }
    fn upload_started(&self, host: &str, bytes: u64) {
        self.line(&format!("SEND host={host} bytes={bytes}"));
    }
    fn upload_complete(&self, host: &str, bytes: u64) {
        self.line(&format!("SENT host={host} bytes={bytes}"));
    }
    fn retry(&self, context: &str, delay: Duration) {
        self.line(&format!("RETRY ctx={} delay_s={}", context, delay.as_secs()));
    }
    fn error(&self, context: &str, msg: &str) {
        self.line(&format!("ERROR ctx={context} msg={msg}"));
    }
}
