//! Runtime configuration: command-line flags first, then environment, then defaults.
//!
//! Environment:
//!   SEALMAIL_KEYS_DIR     - key directory (default: keys)
//!   SEALMAIL_AUDIT_LOG    - append audit events as JSON lines to this file
//!   SEALMAIL_LOG_FORMAT   - "json" for structured logging, "pretty" for humans
//!   RUST_LOG              - log filter (default: sealmail=info)

use std::path::PathBuf;
use std::sync::Arc;

use clap::ValueEnum;
use sealmail_keystore::{AuditSinkSync, FileAuditSink, FileBackend, KeyStore, KeystoreError, TracingAuditSink};

pub const DEFAULT_KEYS_DIR: &str = "keys";
pub const DEFAULT_LOG_FILTER: &str = "sealmail=info,sealmail_keystore=info";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub keys_dir: PathBuf,
    pub audit_log: Option<PathBuf>,
    pub log_format: LogFormat,
}

impl Config {
    /// Fill unset flags from the process environment.
    pub fn resolve(
        keys_dir: Option<PathBuf>,
        audit_log: Option<PathBuf>,
        log_format: Option<LogFormat>,
    ) -> Result<Self, String> {
        Self::resolve_with(keys_dir, audit_log, log_format, |name| std::env::var(name).ok())
    }

    fn resolve_with(
        keys_dir: Option<PathBuf>,
        audit_log: Option<PathBuf>,
        log_format: Option<LogFormat>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, String> {
        let keys_dir = keys_dir
            .or_else(|| env("SEALMAIL_KEYS_DIR").map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_KEYS_DIR));
        let audit_log = audit_log.or_else(|| env("SEALMAIL_AUDIT_LOG").map(PathBuf::from));
        let log_format = match log_format {
            Some(format) => format,
            None => match env("SEALMAIL_LOG_FORMAT") {
                Some(raw) => LogFormat::from_str(&raw, true)
                    .map_err(|_| format!("SEALMAIL_LOG_FORMAT must be json or pretty, got {:?}", raw))?,
                None => LogFormat::default(),
            },
        };
        Ok(Self { keys_dir, audit_log, log_format })
    }

    /// Logs go to stderr; stdout carries envelopes.
    pub fn init_tracing(&self) {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
        match self.log_format {
            LogFormat::Json => tracing_subscriber::fmt()
                .json()
                .with_env_filter(env_filter)
                .with_target(true)
                .with_writer(std::io::stderr)
                .init(),
            LogFormat::Pretty => tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init(),
        }
    }

    pub fn open_keystore(&self) -> Result<KeyStore, KeystoreError> {
        let storage = Arc::new(FileBackend::new(&self.keys_dir)?);
        let audit: Arc<dyn AuditSinkSync> = match &self.audit_log {
            Some(path) => Arc::new(FileAuditSink::new(path)),
            None => Arc::new(TracingAuditSink),
        };
        Ok(KeyStore::new(storage, audit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults() {
        let cfg = Config::resolve_with(None, None, None, env_of(&[])).unwrap();
        assert_eq!(cfg.keys_dir, PathBuf::from("keys"));
        assert_eq!(cfg.audit_log, None);
        assert_eq!(cfg.log_format, LogFormat::Pretty);
    }

    #[test]
    fn environment_fills_unset_flags() {
        let env = env_of(&[
            ("SEALMAIL_KEYS_DIR", "/var/lib/sealmail"),
            ("SEALMAIL_AUDIT_LOG", "/var/log/sealmail.jsonl"),
            ("SEALMAIL_LOG_FORMAT", "JSON"),
        ]);
        let cfg = Config::resolve_with(None, None, None, env).unwrap();
        assert_eq!(cfg.keys_dir, PathBuf::from("/var/lib/sealmail"));
        assert_eq!(cfg.audit_log, Some(PathBuf::from("/var/log/sealmail.jsonl")));
        assert_eq!(cfg.log_format, LogFormat::Json);
    }

    #[test]
    fn flags_win_over_environment() {
        let env = env_of(&[("SEALMAIL_KEYS_DIR", "/env"), ("SEALMAIL_LOG_FORMAT", "json")]);
        let cfg = Config::resolve_with(Some("flag".into()), None, Some(LogFormat::Pretty), env).unwrap();
        assert_eq!(cfg.keys_dir, PathBuf::from("flag"));
        assert_eq!(cfg.log_format, LogFormat::Pretty);
    }

    #[test]
    fn bad_log_format_is_rejected() {
        let env = env_of(&[("SEALMAIL_LOG_FORMAT", "xml")]);
        assert!(Config::resolve_with(None, None, None, env).is_err());
    }
}
