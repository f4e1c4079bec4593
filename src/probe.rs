//! Reachability probe run before every upload attempt
//!
//! ICMP echo against the collector host. Anything that goes wrong, name
//! resolution, raw-socket setup, or just no reply inside the timeout, counts
//! as unreachable and sends the caller back to its sleep/retry loop. Raw ICMP
//! needs elevated privileges on most systems; `SkipProbe` is the way out for
//! unprivileged runs.

use async_trait::async_trait;
use std::net::IpAddr;
use std::time::Duration;
use surge_ping::{Client, Config, PingIdentifier, PingSequence, ICMP};

use crate::protocol::timeouts::PROBE_TIMEOUT;

#[async_trait]
pub trait LivenessProbe: Send + Sync {
    /// True when the target answered within the probe timeout.
    async fn is_alive(&self, host: &str) -> bool;
}

pub struct IcmpProbe {
    timeout: Duration,
}

impl IcmpProbe {
    pub fn new() -> Self {
        Self {
            timeout: PROBE_TIMEOUT,
        }
    }
}

impl Default for IcmpProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LivenessProbe for IcmpProbe {
    async fn is_alive(&self, host: &str) -> bool {
        let addr = match resolve(host).await {
            Some(addr) => addr,
            None => return false,
        };
        let config = match addr {
            IpAddr::V4(_) => Config::default(),
            IpAddr::V6(_) => Config::builder().kind(ICMP::V6).build(),
        };
        let client = match Client::new(&config) {
            Ok(client) => client,
            Err(_) => return false,
        };
        let mut pinger = client.pinger(addr, PingIdentifier(std::process::id() as u16)).await;
        pinger.timeout(self.timeout);
        pinger.ping(PingSequence(0), &[0u8; 32]).await.is_ok()
    }
}

/// Probe that reports every host as reachable. Used when ICMP is unavailable
/// and by tests that drive the retry loop directly.
pub struct SkipProbe;

#[async_trait]
impl LivenessProbe for SkipProbe {
    async fn is_alive(&self, _host: &str) -> bool {
        true
    }
}

async fn resolve(host: &str) -> Option<IpAddr> {
    if let Ok(ip) = host.parse() {
        return Some(ip);
    }
    tokio::net::lookup_host((host, 0))
        .await
        .ok()?
        .next()
        .map(|sa| sa.ip())
}
