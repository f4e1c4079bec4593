//! Receiving daemon: accept loop, admission control, and the per-session
//! decrypt-to-disk state machine
//!
//! Each connection runs on its own task. A counting semaphore caps how many
//! sessions are serviced at once; connections past the cap sit parked on the
//! semaphore rather than being turned away. The blacklist gate runs before a
//! single byte is read from the socket.

use anyhow::{Context, Result};
use chrono::Utc;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::blacklist::{BlacklistConfig, IpBlacklist};
use crate::crypto::CipherContext;
use crate::journal::{SessionJournal, SessionOutcome, SessionRecord};
use crate::logger::EventSink;
use crate::protocol::{limits, timeouts::ACCEPT_RETRY_DELAY, COPY_CHUNK, DEFAULT_PORT};
use crate::wire;

/// Credential check the daemon applies to every session.
pub type AuthFn = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub output_dir: PathBuf,
    pub max_connections: usize,
    pub max_file_size: i64,
    pub blacklist: BlacklistConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            output_dir: PathBuf::from("."),
            max_connections: limits::MAX_CONNECTIONS,
            max_file_size: limits::MAX_FILE_SIZE,
            blacklist: BlacklistConfig::default(),
        }
    }
}

pub struct ReportServer {
    config: ServerConfig,
    auth: AuthFn,
    blacklist: IpBlacklist,
    journal: SessionJournal,
    sink: Arc<dyn EventSink>,
}

impl ReportServer {
    pub fn new(config: ServerConfig, auth: AuthFn, sink: Arc<dyn EventSink>) -> Self {
        Self {
            blacklist: IpBlacklist::new(config.blacklist),
            journal: SessionJournal::new(&config.output_dir),
            config,
            auth,
            sink,
        }
    }

    pub fn blacklist(&self) -> &IpBlacklist {
        &self.blacklist
    }

    pub fn journal(&self) -> &SessionJournal {
        &self.journal
    }

    /// Accepts connections until `cancel` fires, then stops listening and
    /// lets in-flight sessions run to completion.
    pub async fn serve(self: Arc<Self>, cancel: CancellationToken) -> Result<()> {
        let bind = SocketAddr::from(([0, 0, 0, 0], self.config.port));
        let listener = TcpListener::bind(bind)
            .await
            .with_context(|| format!("bind {}", bind))?;
        eprintln!(
            "courierd listening on {} output={}",
            bind,
            self.config.output_dir.display()
        );

        let gate = Arc::new(Semaphore::new(self.config.max_connections));
        let mut sessions = JoinSet::new();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            eprintln!("accept error: {}", e);
                            tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                            continue;
                        }
                    };
                    let _ = stream.set_nodelay(true);
                    eprintln!("conn from {}", peer);
                    let server = Arc::clone(&self);
                    let gate = Arc::clone(&gate);
                    sessions.spawn(async move {
                        // Queue here until a session slot frees up. The permit
                        // rides the task and releases on every exit path.
                        let _permit = match gate.acquire_owned().await {
                            Ok(permit) => permit,
                            Err(_) => return,
                        };
                        server.handle_session(stream, peer).await;
                    });
                }
                // Reap finished session tasks so the set does not grow
                Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
            }
        }

        drop(listener);
        if !sessions.is_empty() {
            eprintln!("draining {} active session(s)", sessions.len());
        }
        while sessions.join_next().await.is_some() {}
        Ok(())
    }

    async fn handle_session(&self, mut stream: TcpStream, peer: SocketAddr) {
        let session_id = Uuid::new_v4().to_string();
        self.sink.session_opened(peer);

        let mut declared_bytes = None;
        let mut received_bytes = 0;
        let mut file = None;
        let mut digest = None;
        let mut error = None;

        let outcome = 'session: {
            // Blocked addresses are cut before any frame is read. No failure
            // is registered for them; only bad authentication counts.
            if !self.blacklist.is_allowed(peer.ip()) {
                self.sink.session_rejected(peer, "blacklisted");
                break 'session SessionOutcome::Blacklisted;
            }

            let credential = match wire::read_credential(&mut stream).await {
                Ok(credential) => credential,
                Err(e) => {
                    // A frame that never parses into a credential counts the
                    // same as a wrong password.
                    self.blacklist.register_failed_attempt(peer.ip());
                    self.sink.session_rejected(peer, "malformed credential");
                    error = Some(e.to_string());
                    break 'session SessionOutcome::BadFrame;
                }
            };

            if !(self.auth)(&credential.username, &credential.password) {
                self.blacklist.register_failed_attempt(peer.ip());
                self.sink.session_rejected(peer, "bad credentials");
                break 'session SessionOutcome::AuthFailed;
            }

            // Derive key and IV locally, then take the IV off the wire. A
            // conforming sender transmits the derived IV anyway, so the two
            // are normally identical.
            let derived = CipherContext::derive(&credential);
            let ctx = match wire::read_iv(&mut stream).await {
                Ok(iv) => derived.with_iv(iv),
                Err(e) => {
                    error = Some(e.to_string());
                    break 'session SessionOutcome::BadFrame;
                }
            };

            let declared = match wire::read_payload_size(&mut stream).await {
                Ok(size) => size,
                Err(e) => {
                    error = Some(e.to_string());
                    break 'session SessionOutcome::BadFrame;
                }
            };
            declared_bytes = Some(declared);

            // Size policy runs before any file is created
            if declared > self.config.max_file_size {
                self.sink.session_rejected(peer, "declared size over limit");
                error = Some(format!(
                    "declared {} exceeds limit {}",
                    declared, self.config.max_file_size
                ));
                break 'session SessionOutcome::Oversize;
            }

            let stamp = Utc::now();
            let nanos = stamp
                .timestamp_nanos_opt()
                .unwrap_or_else(|| stamp.timestamp_micros());
            let path = self
                .config
                .output_dir
                .join(format!("received_file_{}.bin", nanos));
            file = Some(path.clone());

            match self
                .receive_payload(&mut stream, &ctx, declared as u64, &path, peer)
                .await
            {
                Ok((bytes, hash)) => {
                    received_bytes = bytes;
                    digest = Some(hash);
                    self.sink.transfer_complete(peer, &path, bytes);
                    eprintln!("saved {} ({} bytes) from {}", path.display(), bytes, peer);
                    SessionOutcome::Completed
                }
                Err(e) => {
                    // Whatever was decrypted so far stays on disk
                    received_bytes = e.received;
                    error = Some(format!("{:#}", e.source));
                    self.sink.error("session", &format!("{}: {:#}", peer, e.source));
                    SessionOutcome::Failed
                }
            }
        };

        let record = SessionRecord {
            timestamp: Utc::now().to_rfc3339(),
            session_id,
            peer: peer.to_string(),
            outcome,
            declared_bytes,
            received_bytes,
            file,
            digest,
            error,
        };
        if let Err(e) = self.journal.append(&record) {
            self.sink.error("journal", &format!("{:#}", e));
        }
    }

    /// Streams ciphertext to EOF, decrypting in chunks into `path`. Returns
    /// the plaintext byte count and its blake3 digest.
    async fn receive_payload(
        &self,
        stream: &mut TcpStream,
        ctx: &CipherContext,
        declared: u64,
        path: &std::path::Path,
        peer: SocketAddr,
    ) -> std::result::Result<(u64, String), ReceiveError> {
        let mut received = 0u64;
        let inner = async {
            let mut out = tokio::fs::File::create(path)
                .await
                .with_context(|| format!("create {}", path.display()))?;
            let mut decryptor = ctx.decryptor();
            let mut hasher = blake3::Hasher::new();
            let mut buf = vec![0u8; COPY_CHUNK];
            loop {
                // The declared size never terminates the loop; the sender
                // closing its half of the connection does.
                let n = stream.read(&mut buf).await.context("read payload")?;
                if n == 0 {
                    break;
                }
                let plain = decryptor.update(&buf[..n]);
                if !plain.is_empty() {
                    out.write_all(&plain).await.context("write payload")?;
                    hasher.update(&plain);
                    received += plain.len() as u64;
                    self.sink.transfer_progress(peer, received, declared);
                }
            }
            let tail = decryptor.finalize().context("finish decrypt")?;
            if !tail.is_empty() {
                out.write_all(&tail).await.context("write payload")?;
                hasher.update(&tail);
                received += tail.len() as u64;
            }
            out.flush().await.context("flush payload")?;
            Ok((received, hasher.finalize().to_hex().to_string()))
        };
        match inner.await {
            Ok(done) => Ok(done),
            Err(source) => Err(ReceiveError { received, source }),
        }
    }
}

/// Payload failure plus how much plaintext had already landed on disk.
struct ReceiveError {
    received: u64,
    source: anyhow::Error,
}
