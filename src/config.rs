use clap::Parser;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::envfile;
use crate::error::{RestarterError, Result};

/// Polling interval used when POLLING_RATE is absent or non-numeric
pub const DEFAULT_POLLING_RATE_SECONDS: u64 = 60;

/// SMTP submission port used when SMTP_PORT is absent or non-numeric
pub const DEFAULT_SMTP_PORT: u16 = 587;

/// Command line and environment inputs, prior to resolution.
///
/// Every setting can also come from an env file (see [`Config::resolve`]);
/// precedence is CLI/process environment, then env file.
#[derive(Parser, Debug)]
#[command(
    name = "gce-spot-restarter",
    version,
    about = "Restarts a terminated GCE spot instance and emails the new public IP"
)]
pub struct Args {
    /// GCP project ID
    #[arg(long, env = "PROJECT_ID")]
    pub project_id: Option<String>,

    /// Compute Engine zone of the instance
    #[arg(long, env = "ZONE")]
    pub zone: Option<String>,

    /// Name of the spot instance to watch
    #[arg(long, env = "INSTANCE_NAME")]
    pub instance_name: Option<String>,

    /// Path to the service account key file (JSON)
    #[arg(long, env = "GOOGLE_APPLICATION_CREDENTIALS")]
    pub credentials_file: Option<String>,

    /// Polling interval in seconds
    #[arg(long, env = "POLLING_RATE")]
    pub polling_rate: Option<String>,

    /// Sender address for notification emails
    #[arg(long, env = "SMTP_SENDER")]
    pub smtp_sender: Option<String>,

    /// Recipient address for notification emails
    #[arg(long, env = "SMTP_RECEIVER")]
    pub smtp_receiver: Option<String>,

    /// Password for SMTP plain authentication
    #[arg(long, env = "SMTP_PASSWORD")]
    pub smtp_password: Option<String>,

    /// SMTP server hostname
    #[arg(long, env = "SMTP_SERVER")]
    pub smtp_server: Option<String>,

    /// SMTP submission port
    #[arg(long, env = "SMTP_PORT")]
    pub smtp_port: Option<String>,

    /// Optional KEY=VALUE file filling settings not set via CLI or environment
    #[arg(long, env = "ENV_FILE")]
    pub env_file: Option<PathBuf>,

    /// Log format: json or pretty
    #[arg(long, env = "LOG_FORMAT", default_value = "json")]
    pub log_format: String,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Args {
    pub fn from_args() -> Self {
        Self::parse()
    }
}

/// SMTP submission settings.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub sender: String,
    pub receiver: String,
    pub password: String,
    pub server: String,
    pub port: u16,
}

/// Resolved configuration, built once at startup and passed to the watchdog.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_id: String,
    pub zone: String,
    pub instance_name: String,
    pub credentials_file: PathBuf,
    pub polling_rate: Duration,
    pub smtp: SmtpConfig,
}

impl Config {
    /// Resolve [`Args`] into a complete configuration.
    ///
    /// When an env file is given, its values fill any setting the CLI and
    /// process environment left unset. Missing required settings are a
    /// configuration error.
    pub fn resolve(args: Args) -> Result<Self> {
        let file_vars = match &args.env_file {
            Some(path) => envfile::load(path)?,
            None => HashMap::new(),
        };
        Self::resolve_with(args, &file_vars)
    }

    fn resolve_with(args: Args, file_vars: &HashMap<String, String>) -> Result<Self> {
        let pick = |arg: Option<String>, key: &str| -> Option<String> {
            arg.or_else(|| file_vars.get(key).cloned())
        };

        let require = |value: Option<String>, key: &str| -> Result<String> {
            value.ok_or_else(|| RestarterError::config(format!("{} is not set", key)))
        };

        let project_id = require(pick(args.project_id, "PROJECT_ID"), "PROJECT_ID")?;
        let zone = require(pick(args.zone, "ZONE"), "ZONE")?;
        let instance_name = require(pick(args.instance_name, "INSTANCE_NAME"), "INSTANCE_NAME")?;
        let credentials_file = require(
            pick(args.credentials_file, "GOOGLE_APPLICATION_CREDENTIALS"),
            "GOOGLE_APPLICATION_CREDENTIALS",
        )?;

        // A zero interval is not a usable polling period; treat it like any
        // other invalid value.
        let polling_rate_seconds = match parse_or_default(
            pick(args.polling_rate, "POLLING_RATE"),
            DEFAULT_POLLING_RATE_SECONDS,
        ) {
            0 => DEFAULT_POLLING_RATE_SECONDS,
            seconds => seconds,
        };

        let smtp = SmtpConfig {
            sender: require(pick(args.smtp_sender, "SMTP_SENDER"), "SMTP_SENDER")?,
            receiver: require(pick(args.smtp_receiver, "SMTP_RECEIVER"), "SMTP_RECEIVER")?,
            password: require(pick(args.smtp_password, "SMTP_PASSWORD"), "SMTP_PASSWORD")?,
            server: require(pick(args.smtp_server, "SMTP_SERVER"), "SMTP_SERVER")?,
            port: parse_or_default(pick(args.smtp_port, "SMTP_PORT"), DEFAULT_SMTP_PORT),
        };

        Ok(Self {
            project_id,
            zone,
            instance_name,
            credentials_file: PathBuf::from(credentials_file),
            polling_rate: Duration::from_secs(polling_rate_seconds),
            smtp,
        })
    }

    pub fn display(&self) {
        tracing::info!(
            project_id = %self.project_id,
            zone = %self.zone,
            instance_name = %self.instance_name,
            credentials_file = %self.credentials_file.display(),
            polling_rate_seconds = self.polling_rate.as_secs(),
            smtp_server = %self.smtp.server,
            smtp_port = self.smtp.port,
            smtp_receiver = %self.smtp.receiver,
            "Configuration initialized"
        );
    }
}

/// Parse a numeric setting, falling back to its default when the raw value is
/// absent or non-numeric.
fn parse_or_default<T: std::str::FromStr>(raw: Option<String>, default: T) -> T {
    raw.and_then(|s| s.parse().ok()).unwrap_or(default)
}
