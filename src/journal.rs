use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// How a session ended, one record per connection the daemon handled.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed,
    Blacklisted,
    BadFrame,
    AuthFailed,
    Oversize,
    Failed,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct SessionRecord {
    pub timestamp: String,
    pub session_id: String,
    pub peer: String,
    pub outcome: SessionOutcome,
    /// Size the sender declared, once the size frame was read.
    pub declared_bytes: Option<i64>,
    /// Decrypted bytes actually written, including partials on failure.
    pub received_bytes: u64,
    pub file: Option<PathBuf>,
    pub digest: Option<String>,
    pub error: Option<String>,
}

pub struct SessionJournal {
    journal_path: PathBuf,
    // sessions run on independent tasks; appends must not interleave
    write_lock: Mutex<()>,
}

impl SessionJournal {
    pub fn new(output_root: &Path) -> Self {
        let journal_path = output_root.join(".courier_sessions.jsonl");
        SessionJournal {
            journal_path,
            write_lock: Mutex::new(()),
        }
    }

    pub fn append(&self, record: &SessionRecord) -> Result<()> {
        let _guard = self.write_lock.lock();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.journal_path)
            .context("Failed to open session journal")?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, record)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    pub fn read_all(&self) -> Result<Vec<SessionRecord>> {
        if !self.journal_path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.journal_path)
            .context("Failed to open session journal for reading")?;
        let reader = BufReader::new(file);
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: SessionRecord = serde_json::from_str(&line)?;
            records.push(record);
        }
        Ok(records)
    }
}
