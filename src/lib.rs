//! Courier Library
//!
//! Encrypted single-file delivery: a framed TCP client/daemon pair with
//! credential-derived AES-256-CBC, per-IP admission control, and a JSONL
//! session journal

pub mod blacklist;
pub mod cli;
pub mod client;
pub mod crypto;
pub mod journal;
pub mod logger;
pub mod probe;
pub mod protocol;
pub mod report;
pub mod server;
pub mod wire;
