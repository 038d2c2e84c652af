//! Caller-side retry around a single upload.

use scpdrop_sftp::{ConnectionConfig, Connector, RemoteUploader, TransferRequest, UploadOutcome};
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            retries: 0,
            delay: Duration::ZERO,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// Re-run `upload` while it fails with a transient kind (`Timeout`,
/// `ConnectionFailed`) and attempts remain. Each attempt opens a fresh
/// session. Incomplete configurations are never retried.
pub fn upload_with_retry<C: Connector>(
    uploader: &RemoteUploader<C>,
    config: &ConnectionConfig,
    request: &TransferRequest,
    policy: RetryPolicy,
) -> UploadOutcome {
    let mut attempt = 0;
    loop {
        let outcome = uploader.upload(config.clone(), request.clone());
        let transient = outcome.failure_kind().is_some_and(|k| k.is_transient());
        if !transient || attempt >= policy.retries || !config.is_complete() {
            return outcome;
        }
        attempt += 1;
        warn!(
            attempt,
            of = policy.retries,
            kind = ?outcome.failure_kind(),
            delay_ms = policy.delay.as_millis() as u64,
            "transient upload failure, retrying"
        );
        std::thread::sleep(policy.delay);
    }
}
