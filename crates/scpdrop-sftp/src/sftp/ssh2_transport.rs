// ── libssh2 transport ────────────────────────────────────────────────────────

use crate::sftp::transport::{
    first_reachable, Connector, DirectoryState, RemoteSession, Teardown, TransferChannel,
};
use crate::sftp::types::{ConnectionConfig, UploadFailure, UploadFailureKind};
use base64::Engine;
use ssh2::{ErrorCode, HashType, OpenFlags, OpenType, Session, Sftp};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

// libssh2 session error codes (libssh2.h)
const LIBSSH2_ERROR_SOCKET_SEND: i32 = -7;
const LIBSSH2_ERROR_TIMEOUT: i32 = -9;
const LIBSSH2_ERROR_SOCKET_DISCONNECT: i32 = -13;
const LIBSSH2_ERROR_AUTHENTICATION_FAILED: i32 = -18;
const LIBSSH2_ERROR_PUBLICKEY_UNVERIFIED: i32 = -19;
const LIBSSH2_ERROR_SOCKET_TIMEOUT: i32 = -30;
const LIBSSH2_ERROR_SOCKET_RECV: i32 = -43;

// SFTP status codes (libssh2_sftp.h)
const LIBSSH2_FX_NO_SUCH_FILE: i32 = 2;
const LIBSSH2_FX_NO_SUCH_PATH: i32 = 10;

// ── Classification ───────────────────────────────────────────────────────────

fn is_timeout(code: &ErrorCode) -> bool {
    matches!(
        code,
        ErrorCode::Session(LIBSSH2_ERROR_TIMEOUT) | ErrorCode::Session(LIBSSH2_ERROR_SOCKET_TIMEOUT)
    )
}

fn is_socket_failure(code: &ErrorCode) -> bool {
    matches!(
        code,
        ErrorCode::Session(LIBSSH2_ERROR_SOCKET_SEND)
            | ErrorCode::Session(LIBSSH2_ERROR_SOCKET_RECV)
            | ErrorCode::Session(LIBSSH2_ERROR_SOCKET_DISCONNECT)
    )
}

/// Map a handshake / session-level error.
pub(crate) fn classify_session_error(err: &ssh2::Error, context: &str) -> UploadFailure {
    let code = err.code();
    let kind = if is_timeout(&code) {
        UploadFailureKind::Timeout
    } else if matches!(
        code,
        ErrorCode::Session(LIBSSH2_ERROR_AUTHENTICATION_FAILED)
            | ErrorCode::Session(LIBSSH2_ERROR_PUBLICKEY_UNVERIFIED)
    ) {
        UploadFailureKind::AuthenticationFailed
    } else {
        UploadFailureKind::ConnectionFailed
    };
    UploadFailure::new(kind, format!("{context}: {err}"))
}

/// Map an error raised while authenticating. Anything that is not a timeout
/// or a dead socket is a rejection.
pub(crate) fn classify_auth_error(err: &ssh2::Error, context: &str) -> UploadFailure {
    let code = err.code();
    let kind = if is_timeout(&code) {
        UploadFailureKind::Timeout
    } else if is_socket_failure(&code) {
        UploadFailureKind::ConnectionFailed
    } else {
        UploadFailureKind::AuthenticationFailed
    };
    UploadFailure::new(kind, format!("{context}: {err}"))
}

/// Map a TCP connect error.
pub(crate) fn classify_connect_error(err: &io::Error, addr: SocketAddr) -> UploadFailure {
    let kind = match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => UploadFailureKind::Timeout,
        _ => UploadFailureKind::ConnectionFailed,
    };
    UploadFailure::new(kind, format!("TCP connection to {addr} failed: {err}"))
}

fn is_not_found(err: &ssh2::Error) -> bool {
    matches!(
        err.code(),
        ErrorCode::SFTP(LIBSSH2_FX_NO_SUCH_FILE) | ErrorCode::SFTP(LIBSSH2_FX_NO_SUCH_PATH)
    )
}

/// Compare OpenSSH-style fingerprints, ignoring base64 padding and the
/// `SHA256:` prefix.
pub(crate) fn fingerprints_match(expected: &str, actual: &str) -> bool {
    fn canon(s: &str) -> &str {
        let s = s.trim();
        s.strip_prefix("SHA256:").unwrap_or(s).trim_end_matches('=')
    }
    canon(expected) == canon(actual)
}

fn timeout_ms(timeout: Duration) -> u32 {
    u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX)
}

// ── Connector ────────────────────────────────────────────────────────────────

/// Production connector backed by libssh2. Unknown host keys are accepted
/// unless the config pins a fingerprint.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ssh2Connector;

impl Connector for Ssh2Connector {
    type Session = Ssh2Session;

    fn connect(
        &self,
        addrs: &[SocketAddr],
        config: &ConnectionConfig,
    ) -> Result<Ssh2Session, UploadFailure> {
        let timeout = config.connect_timeout();
        info!(
            host = %config.host,
            candidates = addrs.len(),
            username = %config.username,
            "Attempting SSH connection"
        );

        let tcp = connect_tcp(addrs, timeout)?;
        let _ = tcp.set_nodelay(true);

        let mut session = Session::new().map_err(|e| {
            UploadFailure::new(
                UploadFailureKind::ConnectionFailed,
                format!("Failed to create SSH session: {e}"),
            )
        })?;
        // Every blocking libssh2 call from here on (handshake, auth, SFTP
        // open, writes) is bounded by the same timeout.
        session.set_timeout(timeout_ms(timeout));
        session.set_tcp_stream(tcp);

        // Wrapped before the handshake so any failure below disconnects.
        let mut link = Ssh2Session::new(session);
        link.session
            .handshake()
            .map_err(|e| classify_session_error(&e, "SSH handshake failed"))?;

        verify_host_key(&link.session, config)?;

        let method = authenticate(&link.session, config)?;
        info!(host = %config.host, method, "SSH connection successful");
        Ok(link)
    }
}

/// TCP connect to the first address that accepts within `timeout`.
pub(crate) fn connect_tcp(addrs: &[SocketAddr], timeout: Duration) -> Result<TcpStream, UploadFailure> {
    first_reachable(addrs, |addr| {
        debug!(%addr, "Opening TCP connection");
        TcpStream::connect_timeout(&addr, timeout).map_err(|e| classify_connect_error(&e, addr))
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum HostKeyVerdict {
    /// No pin configured; the key is accepted and its fingerprint recorded.
    TrustOnFirstUse(String),
    /// No pin configured and the server offered no hash.
    Unverified,
    Pinned,
}

/// Decide whether a host key is acceptable. A pin that cannot be matched
/// fails closed.
pub(crate) fn check_host_key(
    host: &str,
    expected: Option<&str>,
    actual: Option<String>,
) -> Result<HostKeyVerdict, UploadFailure> {
    match (expected, actual) {
        (None, Some(fp)) => Ok(HostKeyVerdict::TrustOnFirstUse(fp)),
        (None, None) => Ok(HostKeyVerdict::Unverified),
        (Some(expected), Some(actual)) if fingerprints_match(expected, &actual) => {
            Ok(HostKeyVerdict::Pinned)
        }
        (Some(expected), actual) => Err(UploadFailure::new(
            UploadFailureKind::ConnectionFailed,
            format!(
                "host key mismatch for {host}: expected {expected}, got {}",
                actual.as_deref().unwrap_or("none")
            ),
        )),
    }
}

fn verify_host_key(session: &Session, config: &ConnectionConfig) -> Result<(), UploadFailure> {
    let fingerprint = session.host_key_hash(HashType::Sha256).map(|bytes| {
        format!(
            "SHA256:{}",
            base64::engine::general_purpose::STANDARD_NO_PAD.encode(bytes)
        )
    });

    match check_host_key(&config.host, config.host_key_fingerprint.as_deref(), fingerprint)? {
        HostKeyVerdict::TrustOnFirstUse(fp) => {
            info!(host = %config.host, fingerprint = %fp, "Accepting host key (trust on first use)")
        }
        HostKeyVerdict::Unverified => {
            warn!(host = %config.host, "Server offered no host key hash; continuing")
        }
        HostKeyVerdict::Pinned => {
            debug!(host = %config.host, "Host key matches pinned fingerprint")
        }
    }
    Ok(())
}

struct PasswordPrompt<'a> {
    password: &'a str,
}

impl ssh2::KeyboardInteractivePrompt for PasswordPrompt<'_> {
    fn prompt(
        &mut self,
        _username: &str,
        _instructions: &str,
        prompts: &[ssh2::Prompt],
    ) -> Vec<String> {
        prompts.iter().map(|_| self.password.to_string()).collect()
    }
}

/// Password first, then keyboard-interactive if the server offers it.
fn authenticate(session: &Session, config: &ConnectionConfig) -> Result<&'static str, UploadFailure> {
    let rejection = match session.userauth_password(&config.username, &config.password) {
        Ok(()) if session.authenticated() => return Ok("password"),
        Ok(()) => UploadFailure::new(
            UploadFailureKind::AuthenticationFailed,
            "Password accepted but session is not authenticated",
        ),
        Err(e) => {
            let failure = classify_auth_error(&e, "Password authentication failed");
            if failure.kind != UploadFailureKind::AuthenticationFailed {
                return Err(failure);
            }
            failure
        }
    };

    let offers_kbd = session
        .auth_methods(&config.username)
        .map(|methods| methods.split(',').any(|m| m == "keyboard-interactive"))
        .unwrap_or(false);

    if !offers_kbd {
        return Err(rejection);
    }

    debug!(username = %config.username, "Falling back to keyboard-interactive");
    let mut prompt = PasswordPrompt {
        password: &config.password,
    };
    let fallback = session
        .userauth_keyboard_interactive(&config.username, &mut prompt)
        .map(|()| session.authenticated());
    settle_keyboard_interactive(rejection, fallback)
}

/// Outcome of the keyboard-interactive fallback. A rejection keeps the
/// password failure; a timeout or dead socket replaces it.
pub(crate) fn settle_keyboard_interactive(
    rejection: UploadFailure,
    fallback: Result<bool, ssh2::Error>,
) -> Result<&'static str, UploadFailure> {
    match fallback {
        Ok(true) => Ok("keyboard-interactive"),
        Ok(false) => Err(rejection),
        Err(e) => {
            let failure = classify_auth_error(&e, "Keyboard-interactive authentication failed");
            if failure.kind == UploadFailureKind::AuthenticationFailed {
                Err(rejection)
            } else {
                Err(failure)
            }
        }
    }
}

// ── Session ──────────────────────────────────────────────────────────────────

pub struct Ssh2Session {
    session: Session,
    open: bool,
}

impl Ssh2Session {
    fn new(session: Session) -> Self {
        Self {
            session,
            open: true,
        }
    }
}

impl Teardown for Ssh2Session {
    fn teardown(&mut self) {
        if self.open {
            self.open = false;
            let _ = self.session.disconnect(None, "Client disconnecting", None);
            debug!("SSH session closed");
        }
    }
}

impl Drop for Ssh2Session {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl RemoteSession for Ssh2Session {
    type Channel = Ssh2Channel;

    fn open_channel(&mut self) -> Result<Ssh2Channel, UploadFailure> {
        let sftp = self.session.sftp().map_err(|e| {
            UploadFailure::new(
                UploadFailureKind::ConnectionFailed,
                format!("SFTP subsystem could not be started: {e}"),
            )
        })?;
        Ok(Ssh2Channel { sftp: Some(sftp) })
    }
}

// ── Channel ──────────────────────────────────────────────────────────────────

pub struct Ssh2Channel {
    sftp: Option<Sftp>,
}

impl Ssh2Channel {
    fn sftp(&self) -> io::Result<&Sftp> {
        self.sftp
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "SFTP channel closed"))
    }
}

impl Teardown for Ssh2Channel {
    fn teardown(&mut self) {
        if self.sftp.take().is_some() {
            debug!("SFTP channel closed");
        }
    }
}

impl TransferChannel for Ssh2Channel {
    fn probe_directory(&mut self, path: &str) -> Result<DirectoryState, String> {
        let sftp = self.sftp().map_err(|e| e.to_string())?;
        match sftp.stat(Path::new(path)) {
            Ok(_) => Ok(DirectoryState::Present),
            Err(e) if is_not_found(&e) => Ok(DirectoryState::Missing),
            Err(e) => Err(format!("stat '{path}' failed: {e}")),
        }
    }

    fn create_directory(&mut self, path: &str, mode: i32) -> Result<(), String> {
        let sftp = self.sftp().map_err(|e| e.to_string())?;
        sftp.mkdir(Path::new(path), mode)
            .map_err(|e| format!("mkdir '{path}' failed: {e}"))
    }

    fn write_file(
        &mut self,
        path: &str,
        mode: i32,
        source: &mut dyn Read,
        chunk_size: usize,
    ) -> io::Result<u64> {
        let sftp = self.sftp()?;
        let mut remote = sftp
            .open_mode(
                Path::new(path),
                OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE,
                mode,
                OpenType::File,
            )
            .map_err(io::Error::from)?;

        let mut buf = vec![0u8; chunk_size.max(1)];
        let mut transferred: u64 = 0;
        loop {
            let n = match source.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            remote.write_all(&buf[..n])?;
            transferred += n as u64;
            debug!(path, transferred, "chunk written");
        }
        remote.flush()?;
        Ok(transferred)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_error(code: i32) -> ssh2::Error {
        ssh2::Error::new(ErrorCode::Session(code), "synthetic")
    }

    #[test]
    fn handshake_timeout_is_timeout() {
        let f = classify_session_error(&session_error(LIBSSH2_ERROR_TIMEOUT), "SSH handshake failed");
        assert_eq!(f.kind, UploadFailureKind::Timeout);
        assert!(f.message.starts_with("SSH handshake failed"));
        let f = classify_session_error(&session_error(LIBSSH2_ERROR_SOCKET_TIMEOUT), "x");
        assert_eq!(f.kind, UploadFailureKind::Timeout);
    }

    #[test]
    fn protocol_errors_are_connection_failures() {
        // LIBSSH2_ERROR_KEX_FAILURE
        let f = classify_session_error(&session_error(-5), "SSH handshake failed");
        assert_eq!(f.kind, UploadFailureKind::ConnectionFailed);
    }

    #[test]
    fn auth_rejection_is_authentication_failed() {
        let f = classify_auth_error(&session_error(LIBSSH2_ERROR_AUTHENTICATION_FAILED), "auth");
        assert_eq!(f.kind, UploadFailureKind::AuthenticationFailed);
        // LIBSSH2_ERROR_METHOD_NOT_SUPPORTED still means "not let in"
        let f = classify_auth_error(&session_error(-33), "auth");
        assert_eq!(f.kind, UploadFailureKind::AuthenticationFailed);
    }

    #[test]
    fn auth_socket_drop_is_connection_failed() {
        let f = classify_auth_error(&session_error(LIBSSH2_ERROR_SOCKET_RECV), "auth");
        assert_eq!(f.kind, UploadFailureKind::ConnectionFailed);
        let f = classify_auth_error(&session_error(LIBSSH2_ERROR_TIMEOUT), "auth");
        assert_eq!(f.kind, UploadFailureKind::Timeout);
    }

    #[test]
    fn tcp_errors() {
        let addr: SocketAddr = "192.0.2.1:22".parse().unwrap();
        let f = classify_connect_error(&io::Error::from(io::ErrorKind::TimedOut), addr);
        assert_eq!(f.kind, UploadFailureKind::Timeout);
        let f = classify_connect_error(&io::Error::from(io::ErrorKind::ConnectionRefused), addr);
        assert_eq!(f.kind, UploadFailureKind::ConnectionFailed);
        assert!(f.message.contains("192.0.2.1:22"));
    }

    #[test]
    fn sftp_not_found_codes() {
        assert!(is_not_found(&ssh2::Error::new(ErrorCode::SFTP(LIBSSH2_FX_NO_SUCH_FILE), "x")));
        assert!(is_not_found(&ssh2::Error::new(ErrorCode::SFTP(LIBSSH2_FX_NO_SUCH_PATH), "x")));
        // permission denied
        assert!(!is_not_found(&ssh2::Error::new(ErrorCode::SFTP(3), "x")));
    }

    #[test]
    fn fingerprint_comparison() {
        let fp = "SHA256:nThbg6kXUpJWGl7E1IGOCspRomTxdCARLviKw6E5SY8";
        assert!(fingerprints_match(fp, fp));
        assert!(fingerprints_match("nThbg6kXUpJWGl7E1IGOCspRomTxdCARLviKw6E5SY8=", fp));
        assert!(!fingerprints_match("SHA256:AAAA", fp));
    }

    #[test]
    fn refused_port_is_connection_failed() {
        let cfg = ConnectionConfig::new("127.0.0.1", "u", "p").with_connect_timeout(1);
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        match Ssh2Connector.connect(&[addr], &cfg) {
            Err(f) => assert!(matches!(
                f.kind,
                UploadFailureKind::ConnectionFailed | UploadFailureKind::Timeout
            )),
            Ok(_) => panic!("nothing should listen on port 1"),
        }
    }

    #[test]
    fn tcp_falls_through_to_listening_address() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let live = listener.local_addr().unwrap();
        let dead: SocketAddr = "127.0.0.1:1".parse().unwrap();

        let stream = connect_tcp(&[dead, live], Duration::from_secs(2)).unwrap();
        assert_eq!(stream.peer_addr().unwrap(), live);
    }

    #[test]
    fn tcp_reports_failure_when_nothing_listens() {
        let dead: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let err = connect_tcp(&[dead, dead], Duration::from_secs(1)).unwrap_err();
        assert!(matches!(
            err.kind,
            UploadFailureKind::ConnectionFailed | UploadFailureKind::Timeout
        ));
    }

    const PINNED: &str = "SHA256:nThbg6kXUpJWGl7E1IGOCspRomTxdCARLviKw6E5SY8";

    #[test]
    fn host_key_without_pin_is_trusted_on_first_use() {
        assert_eq!(
            check_host_key("nas", None, Some(PINNED.into())).unwrap(),
            HostKeyVerdict::TrustOnFirstUse(PINNED.into())
        );
        assert_eq!(
            check_host_key("nas", None, None).unwrap(),
            HostKeyVerdict::Unverified
        );
    }

    #[test]
    fn host_key_matching_pin_is_accepted() {
        let unpadded = PINNED.trim_start_matches("SHA256:");
        assert_eq!(
            check_host_key("nas", Some(unpadded), Some(PINNED.into())).unwrap(),
            HostKeyVerdict::Pinned
        );
    }

    #[test]
    fn host_key_mismatch_fails_closed() {
        let err = check_host_key("nas", Some("SHA256:AAAA"), Some(PINNED.into())).unwrap_err();
        assert_eq!(err.kind, UploadFailureKind::ConnectionFailed);
        assert!(err.message.contains("host key mismatch for nas"));
        assert!(err.message.contains(PINNED));

        let err = check_host_key("nas", Some(PINNED), None).unwrap_err();
        assert_eq!(err.kind, UploadFailureKind::ConnectionFailed);
        assert!(err.message.ends_with("got none"));
    }

    fn password_rejection() -> UploadFailure {
        UploadFailure::new(UploadFailureKind::AuthenticationFailed, "Password authentication failed")
    }

    #[test]
    fn keyboard_interactive_success_and_rejection() {
        assert_eq!(
            settle_keyboard_interactive(password_rejection(), Ok(true)),
            Ok("keyboard-interactive")
        );
        assert_eq!(
            settle_keyboard_interactive(password_rejection(), Ok(false)),
            Err(password_rejection())
        );
        let rejected = session_error(LIBSSH2_ERROR_AUTHENTICATION_FAILED);
        assert_eq!(
            settle_keyboard_interactive(password_rejection(), Err(rejected)),
            Err(password_rejection())
        );
    }

    #[test]
    fn keyboard_interactive_timeout_is_not_masked() {
        let err = settle_keyboard_interactive(
            password_rejection(),
            Err(session_error(LIBSSH2_ERROR_SOCKET_TIMEOUT)),
        )
        .unwrap_err();
        assert_eq!(err.kind, UploadFailureKind::Timeout);
        assert!(err.message.starts_with("Keyboard-interactive"));

        let err = settle_keyboard_interactive(
            password_rejection(),
            Err(session_error(LIBSSH2_ERROR_SOCKET_DISCONNECT)),
        )
        .unwrap_err();
        assert_eq!(err.kind, UploadFailureKind::ConnectionFailed);
    }
}
