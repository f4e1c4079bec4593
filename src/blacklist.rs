//! Per-IP failed-authentication tracking
//!
//! Five failed attempts inside a rolling 30 minute window block the address
//! for 24 hours. Entries are never removed: a successful login later does not
//! clear the counter, and an expired block stays on the record until a fresh
//! run of failures overwrites it.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use dashmap::DashMap;

#[derive(Clone, Copy, Debug)]
pub struct BlacklistConfig {
    pub max_failed_attempts: u32,
    /// Failures further apart than this start a fresh count.
    pub attempt_interval: Duration,
    pub block_duration: Duration,
}

impl Default for BlacklistConfig {
    fn default() -> Self {
        Self {
            max_failed_attempts: 5,
            attempt_interval: Duration::from_secs(30 * 60),
            block_duration: Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[derive(Default)]
struct IpEntry {
    failed_attempts: u32,
    last_failed_attempt: Option<Instant>,
    blocked_until: Option<Instant>,
}

pub struct IpBlacklist {
    entries: DashMap<IpAddr, IpEntry>,
    config: BlacklistConfig,
}

impl IpBlacklist {
    pub fn new(config: BlacklistConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
        }
    }

    pub fn is_allowed(&self, ip: IpAddr) -> bool {
        self.is_allowed_at(ip, Instant::now())
    }

    pub fn register_failed_attempt(&self, ip: IpAddr) {
        self.register_failed_attempt_at(ip, Instant::now());
    }

    /// Attempts recorded for `ip` in the current window. Zero for unknown
    /// addresses.
    pub fn failed_attempts(&self, ip: IpAddr) -> u32 {
        self.entries.get(&ip).map_or(0, |e| e.failed_attempts)
    }

    fn is_allowed_at(&self, ip: IpAddr, now: Instant) -> bool {
        match self.entries.get(&ip) {
            Some(entry) => match entry.blocked_until {
                Some(until) => now >= until,
                None => true,
            },
            None => true,
        }
    }

    // The entry guard holds the shard lock, so read-modify-write per IP is
    // atomic even with many sessions failing at once.
    fn register_failed_attempt_at(&self, ip: IpAddr, now: Instant) {
        let mut entry = self.entries.entry(ip).or_default();
        let stale = entry
            .last_failed_attempt
            .map_or(true, |last| now.saturating_duration_since(last) > self.config.attempt_interval);
        entry.failed_attempts = if stale { 1 } else { entry.failed_attempts + 1 };
        entry.last_failed_attempt = Some(now);
        if entry.failed_attempts >= self.config.max_failed_attempts {
            entry.blocked_until = Some(now + self.config.block_duration);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([10, 0, 0, last])
    }

    #[test]
    fn blocks_at_threshold() {
        let bl = IpBlacklist::new(BlacklistConfig::default());
        let now = Instant::now();
        for i in 1..=4 {
            bl.register_failed_attempt_at(ip(1), now + Duration::from_secs(i));
            assert!(bl.is_allowed_at(ip(1), now + Duration::from_secs(i)));
        }
        bl.register_failed_attempt_at(ip(1), now + Duration::from_secs(5));
        assert_eq!(bl.failed_attempts(ip(1)), 5);
        assert!(!bl.is_allowed_at(ip(1), now + Duration::from_secs(6)));
    }

    #[test]
    fn block_expires_after_duration() {
        let config = BlacklistConfig::default();
        let bl = IpBlacklist::new(config);
        let now = Instant::now();
        for _ in 0..5 {
            bl.register_failed_attempt_at(ip(2), now);
        }
        assert!(!bl.is_allowed_at(ip(2), now + config.block_duration - Duration::from_secs(1)));
        assert!(bl.is_allowed_at(ip(2), now + config.block_duration));
    }

    #[test]
    fn stale_failures_restart_the_count() {
        let config = BlacklistConfig::default();
        let bl = IpBlacklist::new(config);
        let now = Instant::now();
        for i in 0..4 {
            bl.register_failed_attempt_at(ip(3), now + Duration::from_secs(i));
        }
        assert_eq!(bl.failed_attempts(ip(3)), 4);
        // the fifth failure lands outside the window, so no block
        let late = now + config.attempt_interval + Duration::from_secs(10);
        bl.register_failed_attempt_at(ip(3), late);
        assert_eq!(bl.failed_attempts(ip(3)), 1);
        assert!(bl.is_allowed_at(ip(3), late));
    }

    #[test]
    fn expired_block_survives_until_overwritten() {
        let config = BlacklistConfig::default();
        let bl = IpBlacklist::new(config);
        let now = Instant::now();
        for _ in 0..5 {
            bl.register_failed_attempt_at(ip(4), now);
        }
        let after = now + config.block_duration + Duration::from_secs(1);
        assert!(bl.is_allowed_at(ip(4), after));
        // one failure long after the block: fresh window, still allowed
        bl.register_failed_attempt_at(ip(4), after);
        assert_eq!(bl.failed_attempts(ip(4)), 1);
        assert!(bl.is_allowed_at(ip(4), after + Duration::from_secs(1)));
    }

    #[test]
    fn addresses_are_tracked_independently() {
        let bl = IpBlacklist::new(BlacklistConfig::default());
        let now = Instant::now();
        for _ in 0..5 {
            bl.register_failed_attempt_at(ip(5), now);
        }
        assert!(!bl.is_allowed_at(ip(5), now + Duration::from_secs(1)));
        assert!(bl.is_allowed_at(ip(6), now + Duration::from_secs(1)));
        assert_eq!(bl.failed_attempts(ip(6)), 0);
    }

    #[test]
    fn concurrent_failures_are_not_lost() {
        let bl = std::sync::Arc::new(IpBlacklist::new(BlacklistConfig {
            max_failed_attempts: u32::MAX,
            ..BlacklistConfig::default()
        }));
        std::thread::scope(|s| {
            for _ in 0..8 {
                let bl = std::sync::Arc::clone(&bl);
                s.spawn(move || {
                    for _ in 0..50 {
                        bl.register_failed_attempt(ip(7));
                    }
                });
            }
        });
        assert_eq!(bl.failed_attempts(ip(7)), 400);
    }
}
