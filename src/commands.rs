//! Subcommand handlers. They return `Result<exit code, message>`.

use crate::cli::{Cli, Command, DiagnoseArgs, ProfilesArgs, UploadArgs};
use crate::config::{self, missing_env_vars};
use crate::naming::{disambiguate, remote_name_for};
use crate::profiles::ProfileSet;
use crate::retry::upload_with_retry;
use chrono::{Local, NaiveDateTime};
use futures::stream::{self, StreamExt};
use scpdrop_core::{diagnostics, DiagnosticReport};
use scpdrop_sftp::{
    ConnectionConfig, Connector, RemoteUploader, TransferRequest, UploadFailureKind, UploadOutcome,
};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, warn};

pub async fn run(cli: Cli) -> Result<i32, String> {
    match cli.command {
        Command::Upload(args) => {
            let config = args.connection.to_config().map_err(|e| e.to_string())?;
            let uploader = RemoteUploader::new().with_options(args.uploader_options());
            let reports = upload_files(uploader, &args, config, Local::now().naive_local()).await;
            print_reports(&reports, args.json)?;
            Ok(if reports.iter().any(FileReport::failed) { 1 } else { 0 })
        }
        Command::Profiles(args) => list_profiles(&args),
        Command::Diagnose(args) => run_diagnose(args).await,
    }
}

// ── upload ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SkipReason {
    DryRun,
    IncompleteConfig,
    NoFileName,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileReport {
    pub local_path: PathBuf,
    /// Planned destination; absent when no remote name could be derived.
    pub remote_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<SkipReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<UploadOutcome>,
}

impl FileReport {
    /// A dry run is not a failure; every other skip is.
    pub fn failed(&self) -> bool {
        match (&self.outcome, self.skipped) {
            (Some(outcome), _) => !outcome.is_success(),
            (None, Some(SkipReason::DryRun)) => false,
            (None, _) => true,
        }
    }
}

/// Plan and run the uploads for `args`. Remote names are unique within the
/// batch. Results come back in argument order whatever the concurrency.
pub async fn upload_files<C>(
    uploader: RemoteUploader<C>,
    args: &UploadArgs,
    config: ConnectionConfig,
    now: NaiveDateTime,
) -> Vec<FileReport>
where
    C: Connector + Clone + Send + 'static,
{
    let remote_dir = match &args.remote_dir {
        Some(dir) => dir.clone(),
        None => ProfileSet::load(&args.profiles.profiles_file)
            .resolve(&args.profile)
            .to_string(),
    };
    let stamp = (!args.no_timestamp).then_some(now);

    let mut names: Vec<Option<String>> = args
        .files
        .iter()
        .map(|path| remote_name_for(path, stamp))
        .collect();
    for (from, to) in disambiguate(&mut names) {
        warn!(name = %from, renamed = %to, "remote name already used in this batch");
    }

    let mut reports = Vec::with_capacity(args.files.len());
    let mut pending = Vec::new();
    for (idx, (path, name)) in args.files.iter().zip(names).enumerate() {
        let request = name
            .as_ref()
            .map(|n| TransferRequest::new(path, &remote_dir, n));
        reports.push(FileReport {
            local_path: path.clone(),
            remote_path: request.as_ref().map(TransferRequest::remote_path),
            skipped: name.is_none().then_some(SkipReason::NoFileName),
            outcome: None,
        });
        if let Some(request) = request {
            pending.push((idx, request));
        }
    }

    if args.dry_run {
        for (idx, _) in &pending {
            reports[*idx].skipped = Some(SkipReason::DryRun);
        }
        return reports;
    }

    config::log_summary(&config);
    if !config.is_complete() {
        warn!(
            missing = %missing_env_vars(&config).join(", "),
            "SCP configuration incomplete, skipping upload"
        );
        for (idx, _) in &pending {
            reports[*idx].skipped = Some(SkipReason::IncompleteConfig);
        }
        return reports;
    }

    let policy = args.retry_policy();
    let finished: Vec<(usize, UploadOutcome)> = stream::iter(pending)
        .map(|(idx, request)| {
            let uploader = uploader.clone();
            let config = config.clone();
            async move {
                let task = tokio::task::spawn_blocking(move || {
                    upload_with_retry(&uploader, &config, &request, policy)
                });
                let outcome = task.await.unwrap_or_else(|e| {
                    UploadOutcome::failure(
                        UploadFailureKind::TransferFailed,
                        format!("upload task failed: {e}"),
                    )
                });
                (idx, outcome)
            }
        })
        .buffer_unordered(usize::from(args.jobs))
        .collect()
        .await;

    for (idx, outcome) in finished {
        if let UploadOutcome::Failure(failure) = &outcome {
            log_hints(failure.kind, &config);
        }
        reports[idx].outcome = Some(outcome);
    }
    reports
}

fn log_hints(kind: UploadFailureKind, config: &ConnectionConfig) {
    for hint in kind.hints(config) {
        info!(kind = %kind, "hint: {hint}");
    }
}

fn print_reports(reports: &[FileReport], json: bool) -> Result<(), String> {
    for report in reports {
        if json {
            println!("{}", serde_json::to_string(report).map_err(|e| e.to_string())?);
            continue;
        }
        let local = report.local_path.display();
        let remote = report.remote_path.as_deref().unwrap_or("-");
        match (&report.outcome, report.skipped) {
            (Some(UploadOutcome::Success { remote_path, warnings }), _) => {
                println!("uploaded {local} -> {remote_path}");
                for w in warnings {
                    println!("  warning: {w}");
                }
            }
            (Some(UploadOutcome::Failure(f)), _) => println!("FAILED   {local}: {f}"),
            (None, Some(SkipReason::DryRun)) => println!("would upload {local} -> {remote}"),
            (None, Some(SkipReason::IncompleteConfig)) => {
                println!("skipped  {local}: SCP configuration incomplete")
            }
            (None, _) => println!("skipped  {local}: no file name"),
        }
    }
    Ok(())
}

// ── profiles ────────────────────────────────────────────────────────────────

fn list_profiles(args: &ProfilesArgs) -> Result<i32, String> {
    let set = ProfileSet::load(&args.profiles.profiles_file);
    if args.json {
        let entries: Vec<serde_json::Value> = set
            .iter()
            .map(|(name, dir)| serde_json::json!({ "name": name, "directory": dir }))
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&entries).map_err(|e| e.to_string())?
        );
    } else {
        for (i, (name, dir)) in set.iter().enumerate() {
            let marker = if i == 0 { "*" } else { " " };
            println!("{marker} {name:<16} {dir}");
        }
    }
    Ok(0)
}

// ── diagnose ────────────────────────────────────────────────────────────────

/// DNS, TCP and SSH-banner probes against the configured server.
pub fn diagnose(config: &ConnectionConfig) -> DiagnosticReport {
    let start = Instant::now();
    let timeout = config.connect_timeout();
    let mut steps = Vec::new();

    let resolved = diagnostics::probe_dns(&config.host, config.port, &mut steps);
    if let Some(addr) = resolved {
        if let Some(stream) = diagnostics::probe_tcp(addr, timeout, &mut steps) {
            diagnostics::probe_banner(&stream, timeout, &mut steps);
        }
    }
    diagnostics::finish_report(
        &config.host,
        config.port,
        "sftp",
        resolved.map(|a| a.ip().to_string()),
        steps,
        start,
    )
}

async fn run_diagnose(args: DiagnoseArgs) -> Result<i32, String> {
    let config = args.connection.to_config().map_err(|e| e.to_string())?;
    if config.host.trim().is_empty() {
        return Err(format!("{} is not set", config::ENV_HOST));
    }
    let report = tokio::task::spawn_blocking(move || diagnose(&config))
        .await
        .map_err(|e| format!("diagnostics task failed: {e}"))?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).map_err(|e| e.to_string())?
        );
    } else {
        println!("{}:{} ({})", report.host, report.port, report.protocol);
        for step in &report.steps {
            println!("  [{:?}] {}: {}", step.status, step.name, step.message);
            if let Some(detail) = &step.detail {
                println!("         {detail}");
            }
        }
        println!("{}", report.summary);
    }
    Ok(if report.passed() { 0 } else { 1 })
}
