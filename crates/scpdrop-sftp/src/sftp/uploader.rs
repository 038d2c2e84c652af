// ── RemoteUploader – one file, one session ───────────────────────────────────

use crate::sftp::path::{join_remote_path, normalize_remote_dir, validate_remote_filename};
use crate::sftp::ssh2_transport::Ssh2Connector;
use crate::sftp::transport::{Connector, DirectoryState, RemoteSession, Scoped, TransferChannel};
use crate::sftp::types::*;
use std::fs::File;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Uploads a single local file per call over a fresh session.
///
/// The sequence is resolve → connect/authenticate → open SFTP → ensure
/// directory → write. Every step converts its error into an
/// [`UploadFailure`]; the session and channel are torn down on every path.
#[derive(Debug, Clone)]
pub struct RemoteUploader<C = Ssh2Connector> {
    connector: C,
    options: UploaderOptions,
}

impl RemoteUploader<Ssh2Connector> {
    pub fn new() -> Self {
        Self::with_connector(Ssh2Connector)
    }
}

impl Default for RemoteUploader<Ssh2Connector> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Connector> RemoteUploader<C> {
    pub fn with_connector(connector: C) -> Self {
        Self {
            connector,
            options: UploaderOptions::default(),
        }
    }

    pub fn with_options(mut self, options: UploaderOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &UploaderOptions {
        &self.options
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Upload `request.local_path` to `remote_directory/remote_filename`.
    ///
    /// Never panics and never retries; the returned outcome is terminal.
    pub fn upload(&self, config: ConnectionConfig, request: TransferRequest) -> UploadOutcome {
        let started = Instant::now();
        info!(
            file = %request.remote_filename,
            host = %config.host,
            directory = %request.remote_directory,
            "Starting upload"
        );

        let result = panic::catch_unwind(AssertUnwindSafe(|| self.run(&config, &request)))
            .unwrap_or_else(|_| {
                Err(UploadFailure::new(
                    UploadFailureKind::TransferFailed,
                    "upload aborted by an internal panic",
                ))
            });

        match result {
            Ok((remote_path, warnings)) => {
                info!(
                    remote_path = %remote_path,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Upload completed successfully"
                );
                UploadOutcome::Success {
                    remote_path,
                    warnings,
                }
            }
            Err(failure) => {
                error!(
                    kind = ?failure.kind,
                    error = %failure.message,
                    file = %request.remote_filename,
                    "Upload failed"
                );
                UploadOutcome::Failure(failure)
            }
        }
    }

    fn run(
        &self,
        config: &ConnectionConfig,
        request: &TransferRequest,
    ) -> Result<(String, Vec<UploadFailure>), UploadFailure> {
        let missing = config.missing_fields();
        if !missing.is_empty() {
            return Err(UploadFailure::new(
                UploadFailureKind::ConnectionFailed,
                format!("incomplete configuration: missing {}", missing.join(", ")),
            ));
        }
        validate_remote_filename(&request.remote_filename)?;
        let remote_path = join_remote_path(&request.remote_directory, &request.remote_filename);

        // Step 1: DNS
        debug!(host = %config.host, "Resolving host");
        let addrs = self.connector.resolve(&config.host, config.port)?;
        info!(host = %config.host, addresses = ?addrs, "DNS resolution successful");

        // Step 2: session. Guards drop in reverse order: channel, then session.
        let mut session = Scoped::new(self.connector.connect(&addrs, config)?);

        // Step 3: subchannel
        let mut channel = Scoped::new(session.open_channel()?);
        info!("SFTP session opened");

        // Step 4: directory ensure
        let mut warnings = Vec::new();
        if let Some(warning) = self.ensure_directory(&mut *channel, &request.remote_directory) {
            if self.options.directory_policy == DirectoryErrorPolicy::Abort {
                return Err(warning);
            }
            warn!(
                directory = %request.remote_directory,
                error = %warning.message,
                "Could not ensure remote directory; attempting upload anyway"
            );
            warnings.push(warning);
        }

        // Step 5: stream
        info!(
            local = %request.local_path.display(),
            remote = %remote_path,
            "Uploading file"
        );
        let mut local = File::open(&request.local_path).map_err(|e| {
            UploadFailure::new(
                UploadFailureKind::TransferFailed,
                format!("cannot open local file '{}': {e}", request.local_path.display()),
            )
        })?;
        let bytes = channel
            .write_file(
                &remote_path,
                self.options.file_mode,
                &mut local,
                self.options.chunk_size,
            )
            .map_err(|e| {
                UploadFailure::new(
                    UploadFailureKind::TransferFailed,
                    format!("writing '{remote_path}' failed: {e}"),
                )
            })?;
        debug!(bytes, remote = %remote_path, "Transfer finished");

        Ok((remote_path, warnings))
    }

    /// Stat the directory and create it (single level) when missing.
    /// Returns the non-fatal condition, if any.
    fn ensure_directory<T: TransferChannel>(
        &self,
        channel: &mut T,
        directory: &str,
    ) -> Option<UploadFailure> {
        let directory = normalize_remote_dir(directory);
        debug!(directory = %directory, "Checking remote directory");
        match channel.probe_directory(&directory) {
            Ok(DirectoryState::Present) => None,
            Ok(DirectoryState::Missing) => {
                info!(directory = %directory, "Remote directory missing, creating it");
                match channel.create_directory(&directory, self.options.directory_mode) {
                    Ok(()) => None,
                    Err(e) => Some(UploadFailure::new(
                        UploadFailureKind::DirectoryCreateFailed,
                        format!("could not create remote directory {directory}: {e}"),
                    )),
                }
            }
            Err(e) => Some(UploadFailure::new(
                UploadFailureKind::DirectoryCreateFailed,
                format!("could not check remote directory {directory}: {e}"),
            )),
        }
    }
}

impl<C> RemoteUploader<C>
where
    C: Connector + Clone + Send + 'static,
{
    /// Run [`upload`](Self::upload) on tokio's blocking pool.
    pub async fn upload_async(
        &self,
        config: ConnectionConfig,
        request: TransferRequest,
    ) -> UploadOutcome {
        let uploader = self.clone();
        match tokio::task::spawn_blocking(move || uploader.upload(config, request)).await {
            Ok(outcome) => outcome,
            Err(e) => UploadOutcome::failure(
                UploadFailureKind::TransferFailed,
                format!("upload task failed: {e}"),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sftp::fake::FakeServer;
    use std::io::Write;
    use std::net::IpAddr;
    use tempfile::NamedTempFile;

    const USER: &str = "render";
    const PASS: &str = "s3cret";

    fn config() -> ConnectionConfig {
        ConnectionConfig::new("files.internal", USER, PASS)
    }

    fn local_file(bytes: &[u8]) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(bytes).unwrap();
        f.flush().unwrap();
        f
    }

    fn request(file: &NamedTempFile, dir: &str, name: &str) -> TransferRequest {
        TransferRequest::new(file.path(), dir, name)
    }

    fn assert_torn_down(server: &FakeServer) {
        let s = server.state();
        assert_eq!(s.sessions_closed, s.sessions_opened, "session leak");
        assert_eq!(s.channels_closed, s.channel_opens, "channel leak");
    }

    // ── Configuration gate ──────────────────────────────────────────────────

    #[test]
    fn incomplete_config_skips_all_network_io() {
        let file = local_file(b"png");
        for cfg in [
            ConnectionConfig::new("", USER, PASS),
            ConnectionConfig::new("files.internal", "", PASS),
            ConnectionConfig::new("files.internal", USER, ""),
            config().with_port(0),
        ] {
            let server = FakeServer::new(USER, PASS);
            let uploader = RemoteUploader::with_connector(server.clone());
            let outcome = uploader.upload(cfg, request(&file, "/tmp", "a.png"));
            assert_eq!(outcome.failure_kind(), Some(UploadFailureKind::ConnectionFailed));
            match &outcome {
                UploadOutcome::Failure(f) => assert!(f.message.contains("incomplete configuration")),
                _ => unreachable!(),
            }
            assert_eq!(server.state().network_calls(), 0);
        }
    }

    #[test]
    fn invalid_filename_rejected_before_network() {
        let file = local_file(b"png");
        let server = FakeServer::new(USER, PASS);
        let uploader = RemoteUploader::with_connector(server.clone());
        let outcome = uploader.upload(config(), request(&file, "/tmp", "../escape.png"));
        assert_eq!(outcome.failure_kind(), Some(UploadFailureKind::TransferFailed));
        assert_eq!(server.state().network_calls(), 0);
    }

    // ── Step 1 ──────────────────────────────────────────────────────────────

    #[test]
    fn dns_failure_never_attempts_session() {
        let file = local_file(b"png");
        let server = FakeServer::new(USER, PASS).fail_dns("Name or service not known");
        let uploader = RemoteUploader::with_connector(server.clone());
        let outcome = uploader.upload(config(), request(&file, "/tmp", "a.png"));
        assert_eq!(outcome.failure_kind(), Some(UploadFailureKind::DnsResolutionFailed));
        let s = server.state();
        assert_eq!(s.resolve_calls, 1);
        assert_eq!(s.connect_calls, 0);
    }

    #[test]
    fn unreachable_first_address_falls_back_to_next() {
        let v6: IpAddr = "::1".parse().unwrap();
        let v4: IpAddr = "127.0.0.1".parse().unwrap();
        let file = local_file(b"png");
        let server = FakeServer::new(USER, PASS).resolves_to(&[v6, v4]).refuse(v6);
        let uploader = RemoteUploader::with_connector(server.clone());

        let outcome = uploader.upload(config(), request(&file, "/tmp", "a.png"));

        assert!(outcome.is_success(), "{outcome:?}");
        let s = server.state();
        let tried: Vec<IpAddr> = s.connect_attempts.iter().map(|a| a.ip()).collect();
        assert_eq!(tried, vec![v6, v4]);
        assert!(s.connect_attempts.iter().all(|a| a.port() == 22));
        assert!(s.files.contains_key("/tmp/a.png"));
        drop(s);
        assert_torn_down(&server);
    }

    #[test]
    fn every_address_refused_is_connection_failed() {
        let v6: IpAddr = "::1".parse().unwrap();
        let v4: IpAddr = "127.0.0.1".parse().unwrap();
        let file = local_file(b"png");
        let server = FakeServer::new(USER, PASS)
            .resolves_to(&[v6, v4])
            .refuse(v6)
            .refuse(v4);
        let uploader = RemoteUploader::with_connector(server.clone());

        let outcome = uploader.upload(config(), request(&file, "/tmp", "a.png"));

        assert_eq!(outcome.failure_kind(), Some(UploadFailureKind::ConnectionFailed));
        let s = server.state();
        assert_eq!(s.connect_attempts.len(), 2);
        assert_eq!(s.sessions_opened, 0);
    }

    #[test]
    fn real_resolver_reports_invalid_tld() {
        let file = local_file(b"png");
        let uploader = RemoteUploader::new();
        let cfg = ConnectionConfig::new("this-host-does-not-exist.invalid", USER, PASS);
        let outcome = uploader.upload(cfg, request(&file, "/tmp", "a.png"));
        assert_eq!(outcome.failure_kind(), Some(UploadFailureKind::DnsResolutionFailed));
    }

    // ── Step 2 ──────────────────────────────────────────────────────────────

    #[test]
    fn wrong_password_is_authentication_failed() {
        let file = local_file(b"png");
        let server = FakeServer::new(USER, PASS);
        let uploader = RemoteUploader::with_connector(server.clone());
        let cfg = ConnectionConfig::new("files.internal", USER, "wrong");
        let outcome = uploader.upload(cfg, request(&file, "/tmp", "a.png"));
        assert_eq!(outcome.failure_kind(), Some(UploadFailureKind::AuthenticationFailed));
        assert_eq!(server.state().channel_opens, 0);
    }

    #[test]
    fn connect_timeout_is_reported() {
        let file = local_file(b"png");
        let server =
            FakeServer::new(USER, PASS).fail_connect(UploadFailureKind::Timeout, "timed out after 10s");
        let uploader = RemoteUploader::with_connector(server.clone());
        let outcome = uploader.upload(config(), request(&file, "/tmp", "a.png"));
        assert_eq!(outcome.failure_kind(), Some(UploadFailureKind::Timeout));
    }

    // ── Steps 3–6 ───────────────────────────────────────────────────────────

    #[test]
    fn channel_fault_after_session_open_still_tears_down() {
        let file = local_file(b"png");
        let server = FakeServer::new(USER, PASS).fail_channel_open("subsystem request failed");
        let uploader = RemoteUploader::with_connector(server.clone());
        let outcome = uploader.upload(config(), request(&file, "/tmp", "a.png"));
        assert_eq!(outcome.failure_kind(), Some(UploadFailureKind::ConnectionFailed));
        let s = server.state();
        assert_eq!(s.connect_calls, 1);
        assert_eq!(s.sessions_closed, 1);
        assert_eq!(s.stat_calls, 0);
    }

    #[test]
    fn creates_missing_directory_and_round_trips_bytes() {
        let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let file = local_file(&payload);
        let server = FakeServer::new(USER, PASS).with_directory("/data");
        let uploader = RemoteUploader::with_connector(server.clone());

        let outcome = uploader.upload(
            config(),
            request(&file, "/data/out", "img_00001_20240101_120000.png"),
        );

        assert_eq!(
            outcome.remote_path(),
            Some("/data/out/img_00001_20240101_120000.png")
        );
        let s = server.state();
        assert_eq!(s.mkdir_calls, vec!["/data/out".to_string()]);
        assert!(s.directories.contains("/data/out"));
        assert_eq!(
            s.files.get("/data/out/img_00001_20240101_120000.png"),
            Some(&payload)
        );
        assert_eq!(s.sessions_closed, 1);
        assert_eq!(s.channels_closed, 1);
    }

    #[test]
    fn existing_directory_is_not_recreated() {
        let file = local_file(b"png");
        let server = FakeServer::new(USER, PASS)
            .with_directory("/data")
            .with_directory("/data/out");
        let uploader = RemoteUploader::with_connector(server.clone());
        let outcome = uploader.upload(config(), request(&file, "/data/out/", "a.png"));
        assert!(outcome.is_success());
        let s = server.state();
        assert_eq!(s.stat_calls, 1);
        assert!(s.mkdir_calls.is_empty());
    }

    #[test]
    fn mkdir_failure_is_tolerated_by_default() {
        let file = local_file(b"png");
        let server = FakeServer::new(USER, PASS).fail_mkdir("permission denied");
        let uploader = RemoteUploader::with_connector(server.clone());
        let outcome = uploader.upload(config(), request(&file, "/srv/drop", "a.png"));

        // The write is still attempted and fails on its own.
        assert_eq!(outcome.failure_kind(), Some(UploadFailureKind::TransferFailed));
        let s = server.state();
        assert_eq!(s.mkdir_calls.len(), 1);
        assert_eq!(s.write_calls, 1);
        assert_eq!(s.sessions_closed, 1);
        assert_eq!(s.channels_closed, 1);
    }

    #[test]
    fn stat_failure_is_a_warning_when_write_succeeds() {
        let file = local_file(b"png");
        let server = FakeServer::new(USER, PASS).fail_stat("permission denied");
        let uploader = RemoteUploader::with_connector(server.clone());
        let outcome = uploader.upload(config(), request(&file, "/tmp", "a.png"));
        match outcome {
            UploadOutcome::Success { remote_path, warnings } => {
                assert_eq!(remote_path, "/tmp/a.png");
                assert_eq!(warnings.len(), 1);
                assert_eq!(warnings[0].kind, UploadFailureKind::DirectoryCreateFailed);
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[test]
    fn abort_policy_stops_before_write() {
        let file = local_file(b"png");
        let server = FakeServer::new(USER, PASS).fail_mkdir("permission denied");
        let uploader = RemoteUploader::with_connector(server.clone()).with_options(UploaderOptions {
            directory_policy: DirectoryErrorPolicy::Abort,
            ..UploaderOptions::default()
        });
        let outcome = uploader.upload(config(), request(&file, "/srv/drop", "a.png"));
        assert_eq!(
            outcome.failure_kind(),
            Some(UploadFailureKind::DirectoryCreateFailed)
        );
        let s = server.state();
        assert_eq!(s.write_calls, 0);
        assert_eq!(s.sessions_closed, 1);
        assert_eq!(s.channels_closed, 1);
    }

    #[test]
    fn write_fault_is_transfer_failed_and_tears_down() {
        let file = local_file(b"png");
        let server = FakeServer::new(USER, PASS).fail_write("connection reset");
        let uploader = RemoteUploader::with_connector(server.clone());
        let outcome = uploader.upload(config(), request(&file, "/tmp", "a.png"));
        match &outcome {
            UploadOutcome::Failure(f) => {
                assert_eq!(f.kind, UploadFailureKind::TransferFailed);
                assert!(f.message.contains("connection reset"));
            }
            _ => panic!("expected failure"),
        }
        assert_torn_down(&server);
    }

    #[test]
    fn missing_local_file_is_transfer_failed() {
        let server = FakeServer::new(USER, PASS);
        let uploader = RemoteUploader::with_connector(server.clone());
        let req = TransferRequest::new("/definitely/not/here.png", "/tmp", "a.png");
        let outcome = uploader.upload(config(), req);
        assert_eq!(outcome.failure_kind(), Some(UploadFailureKind::TransferFailed));
        assert_torn_down(&server);
    }

    #[test]
    fn each_upload_uses_a_fresh_session() {
        let file = local_file(b"png");
        let server = FakeServer::new(USER, PASS);
        let uploader = RemoteUploader::with_connector(server.clone());
        for name in ["a.png", "b.png", "c.png"] {
            assert!(uploader.upload(config(), request(&file, "/tmp", name)).is_success());
        }
        let s = server.state();
        assert_eq!(s.connect_calls, 3);
        assert_eq!(s.sessions_closed, 3);
        assert_eq!(s.files.len(), 3);
    }

    #[test]
    fn windows_style_local_path_still_joins_posix() {
        let file = local_file(b"png");
        let server = FakeServer::new(USER, PASS).with_directory("/data");
        let uploader = RemoteUploader::with_connector(server.clone());
        let outcome = uploader.upload(config(), request(&file, "\\data\\", "x.png"));
        assert_eq!(outcome.remote_path(), Some("/data/x.png"));
    }

    #[tokio::test]
    async fn async_wrapper_matches_blocking_result() {
        let file = local_file(b"async-bytes");
        let server = FakeServer::new(USER, PASS);
        let uploader = RemoteUploader::with_connector(server.clone());
        let outcome = uploader
            .upload_async(config(), request(&file, "/tmp", "async.png"))
            .await;
        assert_eq!(outcome.remote_path(), Some("/tmp/async.png"));
        assert_eq!(
            server.state().files.get("/tmp/async.png").map(Vec::as_slice),
            Some(&b"async-bytes"[..])
        );
    }
}
