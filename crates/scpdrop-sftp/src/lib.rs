//! # scpdrop – SFTP
//!
//! Single-file upload over SSH/SFTP:
//!   • DNS resolution kept separate from transport errors
//!   • Password (and keyboard-interactive) authentication
//!   • Trust-on-first-use host keys with optional fingerprint pinning
//!   • Single-level remote directory ensure
//!   • Classified, non-panicking outcomes with guaranteed teardown

pub mod sftp;

pub use sftp::*;
