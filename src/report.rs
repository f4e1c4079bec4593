//! Report artifacts: the single file a courier run delivers
//!
//! The uploader does not care what the file contains; `ReportArtifact` just
//! pins down an existing regular file and its size for the size frame.
//! `write_host_snapshot` produces the stock artifact, a small JSON summary of
//! the local machine named `<hostname>.json`.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use sysinfo::System;

#[derive(Debug, Clone)]
pub struct ReportArtifact {
    path: PathBuf,
    len: u64,
}

impl ReportArtifact {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let meta = std::fs::metadata(&path)
            .with_context(|| format!("Cannot stat report file {}", path.display()))?;
        if !meta.is_file() {
            bail!("Report path {} is not a regular file", path.display());
        }
        Ok(Self {
            len: meta.len(),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[derive(Serialize)]
struct HostFacts {
    hostname: String,
    os: Option<String>,
    os_version: Option<String>,
    kernel_version: Option<String>,
    uptime_secs: u64,
    cpu_count: usize,
    total_memory_bytes: u64,
    available_memory_bytes: u64,
    generated_at: String,
}

fn local_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown-host".to_string())
}

/// Collects a machine summary and writes it to `<dir>/<hostname>.json`.
pub fn write_host_snapshot(dir: &Path) -> Result<ReportArtifact> {
    let hostname = local_hostname();
    let mut sys = System::new_all();
    sys.refresh_memory();

    let facts = HostFacts {
        hostname: hostname.clone(),
        os: System::name(),
        os_version: System::long_os_version(),
        kernel_version: System::kernel_version(),
        uptime_secs: System::uptime(),
        cpu_count: sys.cpus().len(),
        total_memory_bytes: sys.total_memory(),
        available_memory_bytes: sys.available_memory(),
        generated_at: Utc::now().to_rfc3339(),
    };

    let path = dir.join(format!("{hostname}.json"));
    let file = File::create(&path)
        .with_context(|| format!("Cannot create snapshot {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, &facts)?;
    writer.write_all(b"\n")?;
    writer.flush()?;

    ReportArtifact::open(path)
}
