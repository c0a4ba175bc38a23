//! Configuration Module
//!
//! This module reads configuration values from environment variables, provides
//! sensible defaults, and validates limits for the attachment unpacker. The
//! resulting struct is built once at process start and passed by reference into
//! each component; no component reads ambient state.

use anyhow::Result;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// SMTP submission settings for outbound alerts. Absent when no SMTP host or
/// alert recipient is configured; alerts are then logged instead of sent.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub from_name: String,
    pub alert_email: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the dated raw-document tree (`<root>/<yyyy>/<mm>/<name>`).
    pub raw_xml_dir: PathBuf,
    /// Directory scanned for inbound message drops.
    pub spool_dir: PathBuf,
    /// Directory processed message drops are moved into.
    pub processed_dir: PathBuf,
    /// Expected DNS configuration (domain -> record type -> value).
    pub expected_path: PathBuf,
    /// Persisted snapshot of the last observed DNS state.
    pub snapshot_path: PathBuf,
    pub poll_interval: Duration,
    pub dns_check_interval: Duration,
    pub notify_on_ok: bool,
    pub dns_timeout: Duration,
    pub sts_timeout: Duration,
    pub max_decompressed_size: usize,
    pub max_files_in_zip: usize,
    pub smtp: Option<SmtpConfig>,
}

fn var(name: &str) -> Option<String> {
    env::var(name)
        .map(|s| s.trim().to_string())
        .ok()
        .filter(|s| !s.is_empty())
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    var(name).and_then(|s| s.parse().ok()).unwrap_or(default)
}

impl Config {
    /// Creates a new configuration by reading environment variables.
    /// If a variable is missing or empty, a default value is used.
    pub fn new() -> Result<Self> {
        let max_decompressed_size =
            parse_var("DMARCWATCH_MAX_DECOMPRESSED_SIZE", 100 * 1024 * 1024);
        if max_decompressed_size > 500_000_000 {
            return Err(anyhow::anyhow!(
                "Max decompressed size too large (500MB limit)"
            ));
        }

        let smtp = match (var("DMARCWATCH_SMTP_HOST"), var("DMARCWATCH_ALERT_EMAIL")) {
            (Some(host), Some(alert_email)) => {
                let user = var("DMARCWATCH_SMTP_USER").unwrap_or_default();
                Some(SmtpConfig {
                    host,
                    port: parse_var("DMARCWATCH_SMTP_PORT", 587),
                    from_name: var("DMARCWATCH_SMTP_FROM_NAME")
                        .unwrap_or_else(|| user.clone()),
                    password: var("DMARCWATCH_SMTP_PASS").unwrap_or_default(),
                    user,
                    alert_email,
                })
            }
            _ => None,
        };

        Ok(Config {
            raw_xml_dir: var("DMARCWATCH_RAW_XML_DIR")
                .unwrap_or_else(|| "raw_xml".into())
                .into(),
            spool_dir: var("DMARCWATCH_SPOOL_DIR")
                .unwrap_or_else(|| "spool/incoming".into())
                .into(),
            processed_dir: var("DMARCWATCH_PROCESSED_DIR")
                .unwrap_or_else(|| "spool/processed".into())
                .into(),
            expected_path: var("DMARCWATCH_EXPECTED_CONFIG")
                .unwrap_or_else(|| "config.json".into())
                .into(),
            snapshot_path: var("DMARCWATCH_LAST_RESULTS")
                .unwrap_or_else(|| "last_results.json".into())
                .into(),
            poll_interval: Duration::from_secs(parse_var("DMARCWATCH_POLL_INTERVAL", 300)),
            dns_check_interval: Duration::from_secs(parse_var(
                "DMARCWATCH_DNS_CHECK_INTERVAL",
                6 * 60 * 60,
            )),
            notify_on_ok: var("DMARCWATCH_NOTIFY_ON_OK")
                .map(|s| s.to_lowercase() == "true")
                .unwrap_or(false),
            dns_timeout: Duration::from_secs(parse_var("DMARCWATCH_DNS_TIMEOUT", 5)),
            sts_timeout: Duration::from_secs(parse_var("DMARCWATCH_STS_TIMEOUT", 10)),
            max_decompressed_size,
            max_files_in_zip: parse_var("DMARCWATCH_MAX_FILES_IN_ZIP", 1000),
            smtp,
        })
    }
}
