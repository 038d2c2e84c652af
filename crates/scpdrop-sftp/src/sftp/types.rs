// ── Types ─────────────────────────────────────────────────────────────────────

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

// ── Serde default helpers ────────────────────────────────────────────────────

fn default_ssh_port() -> u16 {
    22
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_dir_mode() -> i32 {
    0o755
}
fn default_file_mode() -> i32 {
    0o644
}
fn default_chunk_size() -> usize {
    65_536
}

// ── Connection ───────────────────────────────────────────────────────────────

/// Credentials and endpoint for a single upload.
///
/// Built by the caller and passed by value; nothing here is read from global
/// state. The password is never serialised and is masked in `Debug`.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub username: String,
    #[serde(default, skip_serializing)]
    pub password: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// `SHA256:<base64>` as printed by `ssh-keygen -lf`. `None` accepts any
    /// host key.
    #[serde(default)]
    pub host_key_fingerprint: Option<String>,
}

impl ConnectionConfig {
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: default_ssh_port(),
            username: username.into(),
            password: password.into(),
            connect_timeout_secs: default_connect_timeout_secs(),
            host_key_fingerprint: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_connect_timeout(mut self, secs: u64) -> Self {
        self.connect_timeout_secs = secs;
        self
    }

    pub fn with_host_key_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.host_key_fingerprint = Some(fingerprint.into());
        self
    }

    /// Names of the fields that prevent a connection attempt.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.host.trim().is_empty() {
            missing.push("host");
        }
        if self.port == 0 {
            missing.push("port");
        }
        if self.username.trim().is_empty() {
            missing.push("username");
        }
        if self.password.is_empty() {
            missing.push("password");
        }
        missing
    }

    pub fn is_complete(&self) -> bool {
        self.missing_fields().is_empty()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }

    pub fn masked_password(&self) -> String {
        if self.password.is_empty() {
            "NOT SET".to_string()
        } else {
            "*".repeat(self.password.chars().count())
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.masked_password())
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("host_key_fingerprint", &self.host_key_fingerprint)
            .finish()
    }
}

// ── Request ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub local_path: PathBuf,
    /// Absolute POSIX directory on the remote host.
    pub remote_directory: String,
    /// Single path segment; uniqueness is up to the caller.
    pub remote_filename: String,
}

impl TransferRequest {
    pub fn new(
        local_path: impl Into<PathBuf>,
        remote_directory: impl Into<String>,
        remote_filename: impl Into<String>,
    ) -> Self {
        Self {
            local_path: local_path.into(),
            remote_directory: remote_directory.into(),
            remote_filename: remote_filename.into(),
        }
    }

    /// Final remote path, joined with `/`.
    pub fn remote_path(&self) -> String {
        crate::sftp::path::join_remote_path(&self.remote_directory, &self.remote_filename)
    }
}

// ── Failure taxonomy ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UploadFailureKind {
    DnsResolutionFailed,
    AuthenticationFailed,
    ConnectionFailed,
    Timeout,
    TransferFailed,
    DirectoryCreateFailed,
}

impl UploadFailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DnsResolutionFailed => "DNS resolution failed",
            Self::AuthenticationFailed => "authentication failed",
            Self::ConnectionFailed => "connection failed",
            Self::Timeout => "connection timed out",
            Self::TransferFailed => "transfer failed",
            Self::DirectoryCreateFailed => "directory create failed",
        }
    }

    /// Transient kinds a caller may reasonably retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::ConnectionFailed)
    }
}

impl fmt::Display for UploadFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("{kind}: {message}")]
pub struct UploadFailure {
    pub kind: UploadFailureKind,
    pub message: String,
}

impl UploadFailure {
    pub fn new(kind: UploadFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

// ── Outcome ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum UploadOutcome {
    Success {
        #[serde(rename = "remotePath")]
        remote_path: String,
        /// Non-fatal conditions met on the way (directory ensure only).
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        warnings: Vec<UploadFailure>,
    },
    Failure(UploadFailure),
}

impl UploadOutcome {
    pub fn failure(kind: UploadFailureKind, message: impl Into<String>) -> Self {
        Self::Failure(UploadFailure::new(kind, message))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn remote_path(&self) -> Option<&str> {
        match self {
            Self::Success { remote_path, .. } => Some(remote_path),
            Self::Failure(_) => None,
        }
    }

    pub fn failure_kind(&self) -> Option<UploadFailureKind> {
        match self {
            Self::Success { .. } => None,
            Self::Failure(f) => Some(f.kind),
        }
    }

    pub fn into_result(self) -> Result<String, UploadFailure> {
        match self {
            Self::Success { remote_path, .. } => Ok(remote_path),
            Self::Failure(f) => Err(f),
        }
    }
}

// ── Uploader options ─────────────────────────────────────────────────────────

/// What to do when the remote directory cannot be confirmed or created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum DirectoryErrorPolicy {
    /// Record a warning and let the write be the authoritative failure.
    #[default]
    Continue,
    Abort,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploaderOptions {
    #[serde(default)]
    pub directory_policy: DirectoryErrorPolicy,
    #[serde(default = "default_dir_mode")]
    pub directory_mode: i32,
    #[serde(default = "default_file_mode")]
    pub file_mode: i32,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for UploaderOptions {
    fn default() -> Self {
        Self {
            directory_policy: DirectoryErrorPolicy::default(),
            directory_mode: default_dir_mode(),
            file_mode: default_file_mode(),
            chunk_size: default_chunk_size(),
        }
    }
}
