// ── Transport seam ───────────────────────────────────────────────────────────
//
// The uploader talks to these traits only. `Ssh2Connector` is the production
// implementation; tests plug in an in-memory one.

use crate::sftp::types::{ConnectionConfig, UploadFailure, UploadFailureKind};
use scpdrop_core::diagnostics::resolve_host;
use std::io::{self, Read};
use std::net::SocketAddr;
use std::ops::{Deref, DerefMut};
use tracing::debug;

/// Release of a network resource. Must be idempotent.
pub trait Teardown {
    fn teardown(&mut self);
}

/// Result of probing a remote directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryState {
    Present,
    Missing,
}

/// Opens authenticated sessions. One session per upload.
pub trait Connector {
    type Session: RemoteSession;

    /// Resolve `host` before any socket is opened. Every address is kept,
    /// in resolver order.
    fn resolve(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>, UploadFailure> {
        resolve_host(host, port)
            .map_err(|e| UploadFailure::new(UploadFailureKind::DnsResolutionFailed, e.to_string()))
    }

    /// Connect to the first reachable address of `addrs`, complete the
    /// handshake and authenticate.
    fn connect(
        &self,
        addrs: &[SocketAddr],
        config: &ConnectionConfig,
    ) -> Result<Self::Session, UploadFailure>;
}

/// Run `attempt` against each address in order. The first success wins;
/// otherwise the failure from the last address is returned.
pub fn first_reachable<T, F>(addrs: &[SocketAddr], mut attempt: F) -> Result<T, UploadFailure>
where
    F: FnMut(SocketAddr) -> Result<T, UploadFailure>,
{
    let mut last = None;
    for &addr in addrs {
        match attempt(addr) {
            Ok(value) => return Ok(value),
            Err(failure) => {
                debug!(%addr, error = %failure, "address unreachable");
                last = Some(failure);
            }
        }
    }
    Err(last.unwrap_or_else(|| {
        UploadFailure::new(UploadFailureKind::ConnectionFailed, "no addresses to connect to")
    }))
}

/// An authenticated session able to start a file-transfer subchannel.
pub trait RemoteSession: Teardown {
    type Channel: TransferChannel;

    fn open_channel(&mut self) -> Result<Self::Channel, UploadFailure>;
}

/// File operations over an open subchannel.
pub trait TransferChannel: Teardown {
    /// Stat `path`. `Err` carries the server's message for anything other
    /// than "no such file".
    fn probe_directory(&mut self, path: &str) -> Result<DirectoryState, String>;

    /// Single-level mkdir.
    fn create_directory(&mut self, path: &str, mode: i32) -> Result<(), String>;

    /// Create or truncate `path` and copy `source` into it. Returns the number
    /// of bytes written.
    fn write_file(
        &mut self,
        path: &str,
        mode: i32,
        source: &mut dyn Read,
        chunk_size: usize,
    ) -> io::Result<u64>;
}

// ── Scoped guard ─────────────────────────────────────────────────────────────

/// Owns a resource and tears it down when dropped, on every exit path.
pub struct Scoped<T: Teardown> {
    inner: T,
}

impl<T: Teardown> Scoped<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }
}

impl<T: Teardown> Deref for Scoped<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T: Teardown> DerefMut for Scoped<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

impl<T: Teardown> Drop for Scoped<T> {
    fn drop(&mut self) {
        self.inner.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    struct Probe {
        closed: Rc<Cell<u32>>,
    }

    impl Teardown for Probe {
        fn teardown(&mut self) {
            self.closed.set(self.closed.get() + 1);
        }
    }

    fn fails_midway(closed: Rc<Cell<u32>>) -> Result<(), String> {
        let _guard = Scoped::new(Probe { closed });
        let step: Result<(), String> = Err("boom".to_string());
        step?;
        Ok(())
    }

    #[test]
    fn scoped_tears_down_on_early_return() {
        let closed = Rc::new(Cell::new(0));
        assert!(fails_midway(closed.clone()).is_err());
        assert_eq!(closed.get(), 1);
    }

    #[test]
    fn scoped_tears_down_once_on_normal_drop() {
        let closed = Rc::new(Cell::new(0));
        {
            let _guard = Scoped::new(Probe {
                closed: closed.clone(),
            });
        }
        assert_eq!(closed.get(), 1);
    }

    struct Plain;
    impl Connector for Plain {
        type Session = NoSession;
        fn connect(&self, _: &[SocketAddr], _: &ConnectionConfig) -> Result<NoSession, UploadFailure> {
            Err(UploadFailure::new(UploadFailureKind::ConnectionFailed, "unused"))
        }
    }
    struct NoSession;
    impl Teardown for NoSession {
        fn teardown(&mut self) {}
    }
    impl RemoteSession for NoSession {
        type Channel = NoChannel;
        fn open_channel(&mut self) -> Result<NoChannel, UploadFailure> {
            Err(UploadFailure::new(UploadFailureKind::ConnectionFailed, "unused"))
        }
    }
    struct NoChannel;
    impl Teardown for NoChannel {
        fn teardown(&mut self) {}
    }
    impl TransferChannel for NoChannel {
        fn probe_directory(&mut self, _: &str) -> Result<DirectoryState, String> {
            Ok(DirectoryState::Present)
        }
        fn create_directory(&mut self, _: &str, _: i32) -> Result<(), String> {
            Ok(())
        }
        fn write_file(&mut self, _: &str, _: i32, _: &mut dyn Read, _: usize) -> io::Result<u64> {
            Ok(0)
        }
    }

    #[test]
    fn default_resolve_classifies_dns_failure() {
        let err = Plain.resolve("this-host-does-not-exist.invalid", 22).unwrap_err();
        assert_eq!(err.kind, UploadFailureKind::DnsResolutionFailed);
    }

    #[test]
    fn default_resolve_keeps_port() {
        let addrs = Plain.resolve("127.0.0.1", 2022).unwrap();
        assert_eq!(addrs, vec!["127.0.0.1:2022".parse::<SocketAddr>().unwrap()]);
    }

    fn addrs(list: &[&str]) -> Vec<SocketAddr> {
        list.iter().map(|a| a.parse().unwrap()).collect()
    }

    #[test]
    fn first_reachable_moves_past_dead_addresses() {
        let mut tried = Vec::new();
        let got = first_reachable(&addrs(&["[::1]:22", "127.0.0.1:22"]), |addr| {
            tried.push(addr);
            if addr.is_ipv6() {
                Err(UploadFailure::new(UploadFailureKind::ConnectionFailed, "refused"))
            } else {
                Ok(addr)
            }
        })
        .unwrap();
        assert!(got.is_ipv4());
        assert_eq!(tried.len(), 2);
    }

    #[test]
    fn first_reachable_reports_last_failure() {
        let err = first_reachable(&addrs(&["10.0.0.1:22", "10.0.0.2:22"]), |addr| {
            let kind = if addr.ip().to_string().ends_with('1') {
                UploadFailureKind::ConnectionFailed
            } else {
                UploadFailureKind::Timeout
            };
            Err::<(), _>(UploadFailure::new(kind, addr.to_string()))
        })
        .unwrap_err();
        assert_eq!(err.kind, UploadFailureKind::Timeout);
        assert_eq!(err.message, "10.0.0.2:22");
    }

    #[test]
    fn first_reachable_with_no_addresses() {
        let err = first_reachable(&[], |_| Ok::<(), UploadFailure>(())).unwrap_err();
        assert_eq!(err.kind, UploadFailureKind::ConnectionFailed);
    }
}
