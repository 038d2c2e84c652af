//! scpdrop: upload files to a remote directory over SFTP.
//!
//! The transfer itself lives in `scpdrop-sftp`; this crate adds the caller
//! side: environment config, destination profiles, remote naming, retries
//! and the command-line front end.

pub mod cli;
pub mod commands;
pub mod config;
pub mod naming;
pub mod profiles;
pub mod retry;

pub use config::{connection_from_env, ConfigError};
pub use profiles::ProfileSet;
pub use retry::{upload_with_retry, RetryPolicy};
