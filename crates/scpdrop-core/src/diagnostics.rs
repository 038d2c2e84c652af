//! Connection diagnostics shared by the uploader and the `diagnose` command.
//!
//! Each probe pushes a [`DiagnosticStep`] onto the caller's step list so a
//! run can be rendered as one [`DiagnosticReport`]. [`resolve_host`] is the
//! plain resolver used on the upload path, where only the result matters.

use serde::{Deserialize, Serialize};
use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

// ─── Shared types ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pass,
    Fail,
    Warn,
    Info,
    Skip,
}

/// Result of a single diagnostic probe step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticStep {
    pub name: String,
    pub status: StepStatus,
    pub message: String,
    pub duration_ms: u64,
    pub detail: Option<String>,
}

impl DiagnosticStep {
    pub fn new(
        name: impl Into<String>,
        status: StepStatus,
        message: impl Into<String>,
        started: Instant,
    ) -> Self {
        Self {
            name: name.into(),
            status,
            message: message.into(),
            duration_ms: started.elapsed().as_millis() as u64,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Full diagnostic report for one target.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticReport {
    pub host: String,
    pub port: u16,
    pub protocol: String,
    pub resolved_ip: Option<String>,
    pub steps: Vec<DiagnosticStep>,
    pub summary: String,
    /// Wall-clock milliseconds for the entire run.
    pub total_duration_ms: u64,
}

impl DiagnosticReport {
    pub fn passed(&self) -> bool {
        !self.steps.iter().any(|s| s.status == StepStatus::Fail)
    }
}

// ─── Resolution ─────────────────────────────────────────────────────────────

/// Resolve `host:port` to every address the system resolver returns.
///
/// An empty answer is reported as an error so callers never have to special
/// case it.
pub fn resolve_host(host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
    let addrs: Vec<SocketAddr> = (host, port).to_socket_addrs()?.collect();
    if addrs.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("no addresses returned for {host}"),
        ));
    }
    Ok(addrs)
}

// ─── Probes ─────────────────────────────────────────────────────────────────

/// Resolve a hostname and return the first address.
/// Pushes a [`DiagnosticStep`] onto `steps`.  Returns `None` on failure.
pub fn probe_dns(host: &str, port: u16, steps: &mut Vec<DiagnosticStep>) -> Option<SocketAddr> {
    let t = Instant::now();
    match resolve_host(host, port) {
        Ok(all) => {
            let first = all[0];
            let ips: Vec<String> = all.iter().map(|a| a.ip().to_string()).collect();
            let mut step = DiagnosticStep::new(
                "DNS Resolution",
                StepStatus::Pass,
                format!("{host} → {}", first.ip()),
                t,
            );
            if ips.len() > 1 {
                step = step.with_detail(format!("All resolved addresses: {}", ips.join(", ")));
            }
            steps.push(step);
            Some(first)
        }
        Err(e) => {
            steps.push(
                DiagnosticStep::new(
                    "DNS Resolution",
                    StepStatus::Fail,
                    format!("DNS lookup failed: {e}"),
                    t,
                )
                .with_detail("Check hostname spelling, try an IP address, or run nslookup"),
            );
            None
        }
    }
}

/// Attempt a TCP connect with timeout.  Pushes a [`DiagnosticStep`].
pub fn probe_tcp(
    socket_addr: SocketAddr,
    timeout: Duration,
    steps: &mut Vec<DiagnosticStep>,
) -> Option<TcpStream> {
    let t = Instant::now();
    match TcpStream::connect_timeout(&socket_addr, timeout) {
        Ok(stream) => {
            steps.push(DiagnosticStep::new(
                "TCP Connect",
                StepStatus::Pass,
                format!("Connected to {socket_addr} in {}ms", t.elapsed().as_millis()),
                t,
            ));
            Some(stream)
        }
        Err(e) => {
            let detail = match e.kind() {
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
                    "Connection timed out: the port may be firewalled or the host is offline"
                }
                io::ErrorKind::ConnectionRefused => {
                    "Connection refused: the SSH server may not be running on this port"
                }
                _ => "Check firewall rules and that the SSH server is running",
            };
            steps.push(
                DiagnosticStep::new(
                    "TCP Connect",
                    StepStatus::Fail,
                    format!("TCP connect failed: {e}"),
                    t,
                )
                .with_detail(detail),
            );
            None
        }
    }
}

/// Read the identification line an SSH server sends right after connect.
pub fn probe_banner(
    stream: &TcpStream,
    timeout: Duration,
    steps: &mut Vec<DiagnosticStep>,
) -> Option<String> {
    let _ = stream.set_read_timeout(Some(timeout));
    let t = Instant::now();
    let mut buf = [0u8; 256];
    match io::Read::read(&mut &*stream, &mut buf) {
        Ok(0) => {
            steps.push(DiagnosticStep::new(
                "SSH Banner",
                StepStatus::Fail,
                "Server closed the connection without identifying itself",
                t,
            ));
            None
        }
        Ok(n) => {
            let banner = String::from_utf8_lossy(&buf[..n]).trim().to_string();
            let status = if banner.starts_with("SSH-") {
                StepStatus::Pass
            } else {
                StepStatus::Warn
            };
            steps.push(DiagnosticStep::new(
                "SSH Banner",
                status,
                format!("Banner: {}", banner.chars().take(120).collect::<String>()),
                t,
            ));
            Some(banner)
        }
        Err(e) => {
            steps.push(DiagnosticStep::new(
                "SSH Banner",
                StepStatus::Fail,
                format!("Banner read error: {e}"),
                t,
            ));
            None
        }
    }
}

/// Build the final report from accumulated steps.
pub fn finish_report(
    host: &str,
    port: u16,
    protocol: &str,
    resolved_ip: Option<String>,
    steps: Vec<DiagnosticStep>,
    start: Instant,
) -> DiagnosticReport {
    let first_fail = steps.iter().find(|s| s.status == StepStatus::Fail);
    let any_warn = steps.iter().any(|s| s.status == StepStatus::Warn);

    let summary = if let Some(fail) = first_fail {
        format!("Diagnostics stopped at: {} ({})", fail.name, fail.message)
    } else if any_warn {
        "Target reachable but warnings were reported.".into()
    } else {
        "All diagnostic probes passed.".into()
    };

    DiagnosticReport {
        host: host.to_string(),
        port,
        protocol: protocol.to_string(),
        resolved_ip,
        steps,
        summary,
        total_duration_ms: start.elapsed().as_millis() as u64,
    }
}
