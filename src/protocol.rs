//! Shared protocol constants for the Courier framed transport
//!
//! The wire format is fixed by the deployed receiver fleet: a 4-byte
//! little-endian signed credential length, the UTF-8 `username:password`
//! string, a raw 16-byte IV, an 8-byte little-endian signed plaintext size,
//! then AES-256-CBC ciphertext until the sender closes the connection.

use std::time::Duration;

// Default TCP port the daemon listens on
pub const DEFAULT_PORT: u16 = 2222;

// Fixed field widths of the session preamble
pub const CRED_LEN_BYTES: usize = 4;
pub const IV_LEN: usize = 16;
pub const SIZE_LEN: usize = 8;

// Sanity ceiling on the credential frame. The length field is signed 32-bit
// on the wire; anything above this is treated as a malformed frame rather
// than an allocation request.
pub const MAX_CREDENTIAL_BYTES: usize = 4096;

// Chunk size for the encrypt/decrypt copy loops (80 KiB)
pub const COPY_CHUNK: usize = 81920;

// Key-stretching parameters. Both endpoints must agree on these or the
// derived key/IV pairs diverge and every transfer unpads garbage.
pub mod kdf {
    pub const SALT: &[u8] = b"your_salt_here";
    pub const ITERATIONS: u32 = 10_000;

    // PBKDF2 output split: first 32 bytes key, next 16 bytes IV
    pub const KEY_LEN: usize = 32;
    pub const DERIVED_LEN: usize = 48;
}

// Admission defaults for the daemon
pub mod limits {
    // Simultaneous sessions before new connections queue
    pub const MAX_CONNECTIONS: usize = 100;

    // Largest declared plaintext accepted (50 MB)
    pub const MAX_FILE_SIZE: i64 = 52_428_800;
}

// Centralized timeout constants for consistent pacing on both endpoints
pub mod timeouts {
    use super::Duration;

    // How long the ICMP probe waits for an echo reply
    pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

    // Sleep between probe rounds and after a failed upload attempt
    pub const RETRY_DELAY: Duration = Duration::from_secs(30);

    // Back off briefly when accept() itself fails so a transient error
    // (fd exhaustion, conn reset in the backlog) cannot spin the loop
    pub const ACCEPT_RETRY_DELAY: Duration = Duration::from_secs(1);
}
