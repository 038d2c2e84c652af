// ── In-memory transport ──────────────────────────────────────────────────────
//
// Models a POSIX SFTP server closely enough to exercise the upload sequence:
// single-level mkdir, writes that need an existing parent, and counters for
// every network-facing call and every teardown.

use crate::sftp::path::normalize_remote_dir;
use crate::sftp::transport::{
    first_reachable, Connector, DirectoryState, RemoteSession, Teardown, TransferChannel,
};
use crate::sftp::types::{ConnectionConfig, UploadFailure, UploadFailureKind};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::io::{self, Read};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
pub struct FakeState {
    pub resolve_calls: usize,
    pub connect_calls: usize,
    /// Every address a connect tried, in order.
    pub connect_attempts: Vec<SocketAddr>,
    pub sessions_opened: usize,
    pub channel_opens: usize,
    pub stat_calls: usize,
    pub mkdir_calls: Vec<String>,
    pub write_calls: usize,
    pub sessions_closed: usize,
    pub channels_closed: usize,
    pub directories: BTreeSet<String>,
    pub files: BTreeMap<String, Vec<u8>>,
}

impl FakeState {
    pub fn network_calls(&self) -> usize {
        self.resolve_calls + self.connect_calls
    }
}

#[derive(Debug, Default)]
struct Faults {
    dns: Option<String>,
    addresses: Vec<IpAddr>,
    refused: BTreeSet<IpAddr>,
    connect: VecDeque<UploadFailure>,
    channel: Option<String>,
    stat: Option<String>,
    mkdir: Option<String>,
    write: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FakeServer {
    state: Arc<Mutex<FakeState>>,
    faults: Arc<Mutex<Faults>>,
    username: String,
    password: String,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl FakeServer {
    /// A server that accepts `username` / `password` and has `/` and `/tmp`.
    pub fn new(username: &str, password: &str) -> Self {
        let mut state = FakeState::default();
        state.directories.insert("/".into());
        state.directories.insert("/tmp".into());
        Self {
            state: Arc::new(Mutex::new(state)),
            faults: Arc::new(Mutex::new(Faults::default())),
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn with_directory(self, path: &str) -> Self {
        lock(&self.state).directories.insert(normalize_remote_dir(path));
        self
    }

    pub fn fail_dns(self, message: &str) -> Self {
        lock(&self.faults).dns = Some(message.into());
        self
    }

    /// Resolve every host to `ips`, in this order. Defaults to 127.0.0.1.
    pub fn resolves_to(self, ips: &[IpAddr]) -> Self {
        lock(&self.faults).addresses = ips.to_vec();
        self
    }

    /// Refuse TCP connections to `ip`.
    pub fn refuse(self, ip: IpAddr) -> Self {
        lock(&self.faults).refused.insert(ip);
        self
    }

    /// Queue a failure for the next connect; repeat to fail several in a row.
    pub fn fail_connect(self, kind: UploadFailureKind, message: &str) -> Self {
        lock(&self.faults)
            .connect
            .push_back(UploadFailure::new(kind, message));
        self
    }

    pub fn fail_channel_open(self, message: &str) -> Self {
        lock(&self.faults).channel = Some(message.into());
        self
    }

    pub fn fail_stat(self, message: &str) -> Self {
        lock(&self.faults).stat = Some(message.into());
        self
    }

    pub fn fail_mkdir(self, message: &str) -> Self {
        lock(&self.faults).mkdir = Some(message.into());
        self
    }

    pub fn fail_write(self, message: &str) -> Self {
        lock(&self.faults).write = Some(message.into());
        self
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        lock(&self.state)
    }
}

impl Connector for FakeServer {
    type Session = FakeSession;

    fn resolve(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>, UploadFailure> {
        lock(&self.state).resolve_calls += 1;
        let faults = lock(&self.faults);
        if let Some(msg) = faults.dns.clone() {
            return Err(UploadFailure::new(
                UploadFailureKind::DnsResolutionFailed,
                format!("{host}: {msg}"),
            ));
        }
        if faults.addresses.is_empty() {
            return Ok(vec![SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)]);
        }
        Ok(faults
            .addresses
            .iter()
            .map(|ip| SocketAddr::new(*ip, port))
            .collect())
    }

    fn connect(
        &self,
        addrs: &[SocketAddr],
        config: &ConnectionConfig,
    ) -> Result<FakeSession, UploadFailure> {
        lock(&self.state).connect_calls += 1;
        if let Some(f) = lock(&self.faults).connect.pop_front() {
            return Err(f);
        }
        first_reachable(addrs, |addr| {
            lock(&self.state).connect_attempts.push(addr);
            if lock(&self.faults).refused.contains(&addr.ip()) {
                Err(UploadFailure::new(
                    UploadFailureKind::ConnectionFailed,
                    format!("TCP connection to {addr} failed: Connection refused"),
                ))
            } else {
                Ok(())
            }
        })?;
        if config.username != self.username || config.password != self.password {
            return Err(UploadFailure::new(
                UploadFailureKind::AuthenticationFailed,
                "Password authentication failed: Authentication failed (username/password)",
            ));
        }
        lock(&self.state).sessions_opened += 1;
        Ok(FakeSession {
            server: self.clone(),
            open: true,
        })
    }
}

pub struct FakeSession {
    server: FakeServer,
    open: bool,
}

impl Teardown for FakeSession {
    fn teardown(&mut self) {
        if self.open {
            self.open = false;
            lock(&self.server.state).sessions_closed += 1;
        }
    }
}

impl RemoteSession for FakeSession {
    type Channel = FakeChannel;

    fn open_channel(&mut self) -> Result<FakeChannel, UploadFailure> {
        lock(&self.server.state).channel_opens += 1;
        if let Some(msg) = lock(&self.server.faults).channel.clone() {
            return Err(UploadFailure::new(UploadFailureKind::ConnectionFailed, msg));
        }
        Ok(FakeChannel {
            server: self.server.clone(),
            open: true,
        })
    }
}

pub struct FakeChannel {
    server: FakeServer,
    open: bool,
}

fn parent_of(path: &str) -> String {
    match path.rsplit_once('/') {
        Some(("", _)) => "/".to_string(),
        Some((parent, _)) => parent.to_string(),
        None => ".".to_string(),
    }
}

impl Teardown for FakeChannel {
    fn teardown(&mut self) {
        if self.open {
            self.open = false;
            lock(&self.server.state).channels_closed += 1;
        }
    }
}

impl TransferChannel for FakeChannel {
    fn probe_directory(&mut self, path: &str) -> Result<DirectoryState, String> {
        let mut state = lock(&self.server.state);
        state.stat_calls += 1;
        if let Some(msg) = lock(&self.server.faults).stat.clone() {
            return Err(msg);
        }
        let path = normalize_remote_dir(path);
        if state.directories.contains(&path) || state.files.contains_key(&path) {
            Ok(DirectoryState::Present)
        } else {
            Ok(DirectoryState::Missing)
        }
    }

    fn create_directory(&mut self, path: &str, _mode: i32) -> Result<(), String> {
        let mut state = lock(&self.server.state);
        let path = normalize_remote_dir(path);
        state.mkdir_calls.push(path.clone());
        if let Some(msg) = lock(&self.server.faults).mkdir.clone() {
            return Err(msg);
        }
        if !state.directories.contains(&parent_of(&path)) {
            return Err(format!("mkdir '{path}' failed: no such file"));
        }
        state.directories.insert(path);
        Ok(())
    }

    fn write_file(
        &mut self,
        path: &str,
        _mode: i32,
        source: &mut dyn Read,
        _chunk_size: usize,
    ) -> io::Result<u64> {
        lock(&self.server.state).write_calls += 1;
        if let Some(msg) = lock(&self.server.faults).write.clone() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, msg));
        }
        if !lock(&self.server.state).directories.contains(&parent_of(path)) {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such file"));
        }
        let mut data = Vec::new();
        source.read_to_end(&mut data)?;
        let len = data.len() as u64;
        lock(&self.server.state).files.insert(path.to_string(), data);
        Ok(len)
    }
}
