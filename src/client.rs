//! Upload orchestrator: probe, connect, encrypt, retry forever
//!
//! One delivery attempt is a single shot: connect, send the three preamble
//! frames, stream the encrypted artifact, close. Any failure, from an
//! unreachable host to a mid-stream reset, sends the loop back to the ICMP
//! probe after a fixed delay. There is no acknowledgement from the daemon;
//! success means the local write side completed.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::crypto::CipherContext;
use crate::logger::EventSink;
use crate::probe::LivenessProbe;
use crate::protocol::{timeouts, COPY_CHUNK};
use crate::report::ReportArtifact;
use crate::wire::{self, Credential};

#[derive(Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub credential: Credential,
    pub retry_delay: Duration,
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, port: u16, credential: Credential) -> Self {
        Self {
            host: host.into(),
            port,
            credential,
            retry_delay: timeouts::RETRY_DELAY,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum UploadOutcome {
    Delivered { bytes: u64 },
    Cancelled,
}

pub struct Uploader {
    config: ClientConfig,
    probe: Arc<dyn LivenessProbe>,
    sink: Arc<dyn EventSink>,
}

impl Uploader {
    pub fn new(config: ClientConfig, probe: Arc<dyn LivenessProbe>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            config,
            probe,
            sink,
        }
    }

    /// Drives probe and upload rounds until one attempt succeeds or `cancel`
    /// fires. Transfer failures never end the loop.
    pub async fn run(&self, artifact: &ReportArtifact, cancel: &CancellationToken) -> UploadOutcome {
        loop {
            // Wait for the collector to answer a ping before burning a
            // connection attempt on it
            loop {
                let alive = tokio::select! {
                    _ = cancel.cancelled() => return UploadOutcome::Cancelled,
                    alive = self.probe.is_alive(&self.config.host) => alive,
                };
                self.sink.probe(&self.config.host, alive);
                if alive {
                    break;
                }
                if self.sleep_or_cancel(cancel).await {
                    return UploadOutcome::Cancelled;
                }
            }

            let attempt = tokio::select! {
                _ = cancel.cancelled() => return UploadOutcome::Cancelled,
                attempt = self.upload_once(artifact) => attempt,
            };
            match attempt {
                Ok(bytes) => {
                    self.sink.upload_complete(&self.config.host, bytes);
                    return UploadOutcome::Delivered { bytes };
                }
                Err(e) => {
                    self.sink.error("upload", &format!("{:#}", e));
                    self.sink.retry("upload", self.config.retry_delay);
                    if self.sleep_or_cancel(cancel).await {
                        return UploadOutcome::Cancelled;
                    }
                    // next round starts from the probe again
                }
            }
        }
    }

    /// One complete delivery attempt against the configured daemon.
    pub async fn upload_once(&self, artifact: &ReportArtifact) -> Result<u64> {
        let target = (self.config.host.as_str(), self.config.port);
        let mut stream = TcpStream::connect(target)
            .await
            .with_context(|| format!("connect {}:{}", self.config.host, self.config.port))?;
        let _ = stream.set_nodelay(true);

        wire::write_credential(&mut stream, &self.config.credential)
            .await
            .context("send credential")?;

        let ctx = CipherContext::derive(&self.config.credential);
        // The daemon derives the same IV itself but still reads ours first
        wire::write_iv(&mut stream, &ctx.iv).await.context("send iv")?;
        wire::write_payload_size(&mut stream, artifact.len() as i64)
            .await
            .context("send size")?;

        self.sink.upload_started(&self.config.host, artifact.len());
        let mut file = tokio::fs::File::open(artifact.path())
            .await
            .with_context(|| format!("open {}", artifact.path().display()))?;

        let mut encryptor = ctx.encryptor();
        let mut buf = vec![0u8; COPY_CHUNK];
        let mut sent = 0u64;
        loop {
            let n = file.read(&mut buf).await.context("read artifact")?;
            if n == 0 {
                break;
            }
            let cipher = encryptor.update(&buf[..n]);
            if !cipher.is_empty() {
                stream.write_all(&cipher).await.context("send payload")?;
            }
            sent += n as u64;
            self.sink.upload_progress(sent, artifact.len());
        }
        stream
            .write_all(&encryptor.finalize())
            .await
            .context("send final block")?;
        // Half-close is the end-of-payload marker the daemon waits for
        stream.shutdown().await.context("close stream")?;
        Ok(sent)
    }

    async fn sleep_or_cancel(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => true,
            _ = tokio::time::sleep(self.config.retry_delay) => false,
        }
    }
}
