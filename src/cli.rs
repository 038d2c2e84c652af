//! Command-line surface.

use crate::config::{self, ConfigError, ENV_HOST, ENV_PASSWORD, ENV_PORT, ENV_USERNAME};
use crate::retry::RetryPolicy;
use clap::{Args, Parser, Subcommand};
use scpdrop_sftp::{ConnectionConfig, DirectoryErrorPolicy, UploaderOptions};
use std::path::PathBuf;
use std::time::Duration;

/// Upload files to a remote directory over SFTP.
#[derive(Parser, Debug)]
#[command(name = "scpdrop", version, about)]
pub struct Cli {
    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Upload one or more files
    Upload(UploadArgs),
    /// List the configured destination profiles
    Profiles(ProfilesArgs),
    /// Probe DNS, TCP and the SSH banner of the configured server
    Diagnose(DiagnoseArgs),
}

/// Server settings. Flags override the `SCP_HOST`, `SCP_PORT`,
/// `SCP_USERNAME` and `SCP_PASSWORD` variables.
#[derive(Args, Debug, Clone)]
pub struct ConnectionArgs {
    /// Server hostname or IP [env: SCP_HOST]
    #[arg(long)]
    pub host: Option<String>,

    /// SSH port [env: SCP_PORT, default: 22]
    #[arg(long)]
    pub port: Option<u16>,

    /// [env: SCP_USERNAME]
    #[arg(long)]
    pub username: Option<String>,

    /// Prefer SCP_PASSWORD; flags are visible in process lists
    #[arg(long)]
    pub password: Option<String>,

    /// Seconds allowed for the TCP connect and each SSH operation
    #[arg(long, default_value_t = 10)]
    pub connect_timeout: u64,

    /// Expected host key, as printed by `ssh-keygen -lf` (SHA256:...)
    #[arg(long, env = "SCP_HOST_KEY_FINGERPRINT")]
    pub host_key_fingerprint: Option<String>,
}

impl ConnectionArgs {
    /// Flags layered over the process environment.
    pub fn to_config(&self) -> Result<ConnectionConfig, ConfigError> {
        self.to_config_with(|key| std::env::var(key).ok())
    }

    /// Flags layered over `lookup`. A variable shadowed by a flag is never
    /// read, so a bad `SCP_PORT` is ignored when `--port` is given.
    pub fn to_config_with<F>(&self, lookup: F) -> Result<ConnectionConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = self.port.map(|p| p.to_string());
        let cfg = config::connection_from_lookup(|key| {
            let flag = match key {
                ENV_HOST => self.host.clone(),
                ENV_PORT => port.clone(),
                ENV_USERNAME => self.username.clone(),
                ENV_PASSWORD => self.password.clone(),
                _ => None,
            };
            flag.or_else(|| lookup(key))
        })?
        .with_connect_timeout(self.connect_timeout);
        Ok(match &self.host_key_fingerprint {
            Some(fp) => cfg.with_host_key_fingerprint(fp),
            None => cfg,
        })
    }
}

#[derive(Args, Debug, Clone)]
pub struct ProfilesFileArg {
    /// JSON document of the form {"profiles": {"name": "/remote/dir"}}
    #[arg(long, env = "SCPDROP_PROFILES", default_value = "config.json")]
    pub profiles_file: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct UploadArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    #[command(flatten)]
    pub profiles: ProfilesFileArg,

    /// Destination profile
    #[arg(long, short = 'p', default_value = "default")]
    pub profile: String,

    /// Remote directory; overrides the profile
    #[arg(long)]
    pub remote_dir: Option<String>,

    /// Keep local file names instead of inserting a timestamp
    #[arg(long)]
    pub no_timestamp: bool,

    /// Extra attempts after a timeout or connection failure
    #[arg(long, default_value_t = 0)]
    pub retries: u32,

    #[arg(long, default_value_t = 2000)]
    pub retry_delay_ms: u64,

    /// Concurrent uploads, each on its own session
    #[arg(long, short = 'j', default_value_t = 1, value_parser = clap::value_parser!(u16).range(1..))]
    pub jobs: u16,

    /// Fail the upload when the remote directory cannot be checked or created
    #[arg(long)]
    pub strict_dirs: bool,

    /// Print the planned remote paths without connecting
    #[arg(long)]
    pub dry_run: bool,

    /// Print one JSON object per file on stdout
    #[arg(long)]
    pub json: bool,

    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}

impl UploadArgs {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.retries,
            delay: Duration::from_millis(self.retry_delay_ms),
        }
    }

    pub fn uploader_options(&self) -> UploaderOptions {
        UploaderOptions {
            directory_policy: if self.strict_dirs {
                DirectoryErrorPolicy::Abort
            } else {
                DirectoryErrorPolicy::Continue
            },
            ..UploaderOptions::default()
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ProfilesArgs {
    #[command(flatten)]
    pub profiles: ProfilesFileArg,

    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct DiagnoseArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    #[arg(long)]
    pub json: bool,
}
