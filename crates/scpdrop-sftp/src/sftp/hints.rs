// ── Operator remediation tips ────────────────────────────────────────────────

use crate::sftp::types::{ConnectionConfig, UploadFailureKind};

impl UploadFailureKind {
    /// Troubleshooting tips for this failure, filled in with the target.
    pub fn hints(&self, config: &ConnectionConfig) -> Vec<String> {
        let host = &config.host;
        let port = config.port;
        let user = &config.username;
        match self {
            Self::DnsResolutionFailed => vec![
                "Verify the hostname is correct (check for typos)".into(),
                "Try the server's IP address instead, e.g. SCP_HOST=192.168.1.100".into(),
                format!("Test DNS with: nslookup {host}"),
                "Check your network connection and DNS settings".into(),
            ],
            Self::AuthenticationFailed => vec![
                format!("Verify the username: SCP_USERNAME={user}"),
                "Verify the password is correct".into(),
                "Check that the user exists on the server".into(),
                format!("Try a manual login: ssh {user}@{host}"),
            ],
            Self::ConnectionFailed => vec![
                format!("Verify an SSH server is running on {host}:{port}"),
                format!("Check that the firewall allows port {port}"),
                format!("Try a manual login: ssh -p {port} {user}@{host}"),
            ],
            Self::Timeout => vec![
                format!("Verify the server is online: ping {host}"),
                "Check network connectivity".into(),
                format!("Verify port {port} is not blocked by a firewall"),
            ],
            Self::TransferFailed => vec![
                "Check that the local file still exists and is readable".into(),
                format!("Check that {user} can write to the remote directory"),
                "Check free space on the remote filesystem".into(),
            ],
            Self::DirectoryCreateFailed => vec![
                "Check that the parent of the remote directory exists (creation is single-level)"
                    .into(),
                format!("Check that {user} has write permission on the parent directory"),
            ],
        }
    }
}
