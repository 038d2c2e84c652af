// ── scpdrop-sftp / sftp module ────────────────────────────────────────────────
//
//   • types        – config, request, outcome and failure taxonomy
//   • path         – POSIX remote path policy
//   • transport    – connector / session / channel seam and scoped teardown
//   • ssh2_transport – libssh2-backed implementation of the seam
//   • uploader     – the RemoteUploader sequence
//   • hints        – operator remediation tips per failure kind

pub mod hints;
pub mod path;
pub mod ssh2_transport;
pub mod transport;
pub mod types;
pub mod uploader;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;

pub use path::{join_remote_path, normalize_remote_dir, validate_remote_filename};
pub use ssh2_transport::Ssh2Connector;
pub use transport::{
    first_reachable, Connector, DirectoryState, RemoteSession, Scoped, Teardown, TransferChannel,
};
pub use types::*;
pub use uploader::RemoteUploader;
