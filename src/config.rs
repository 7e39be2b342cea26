//! Process configuration
//!
//! Read from environment variables, optionally seeded from a `.env` file:
//! - SIFA_HOST / SIFA_PORT: bind address (default 0.0.0.0:8080)
//! - SIFA_TARGETS: targets JSON file (default config.json)
//! - SIFA_DATA_DIR: state directory (default ./data)
//! - SIFA_IN_MEMORY: keep state in memory only (default false)
//! - SIFA_TOKEN: access token for webhook and inspection endpoints (required)
//! - SIFA_MUTE_SECRET: mute link signing secret (default SIFA_TOKEN)
//! - SIFA_URL: public base URL used in mute links
//! - SIFA_CHECK_INTERVAL_SECS: evaluation cadence (default 3600)
//! - SIFA_NOTIFY_TIMEOUT_SECS: per-send timeout (default 10)
//! - SIFA_SHUTDOWN_TIMEOUT_SECS: drain timeout on shutdown (default 30)
//! - SIFA_WEBHOOK_URL: enables the webhook channel
//! - POSTMARK_API_KEY, SIFA_MAIL_FROM, SIFA_MAIL_TO: enable the email channel

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::alerts::notifier::{
    Dispatcher, LogNotifier, Notifier, NotifyError, PostmarkNotifier, WebhookNotifier,
};
use crate::alerts::{Scheduler, TargetsFile};
use crate::auth::MuteTokens;
use crate::storage::{FileStore, MemoryStore, StateStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse targets: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Missing environment variable {0}")]
    MissingEnv(&'static str),
}

/// Email channel settings
#[derive(Debug, Clone)]
pub struct MailConfig {
    pub postmark_api_key: String,
    pub from: String,
    /// Used for targets without their own email
    pub default_to: Option<String>,
}

/// Runtime configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub targets_path: PathBuf,
    pub data_dir: PathBuf,
    pub in_memory: bool,
    pub access_token: String,
    pub mute_secret: String,
    pub public_url: Option<String>,
    pub check_interval: Duration,
    pub notify_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub webhook_url: Option<String>,
    pub mail: Option<MailConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            targets_path: PathBuf::from("config.json"),
            data_dir: PathBuf::from("./data"),
            in_memory: false,
            access_token: String::new(),
            mute_secret: String::new(),
            public_url: None,
            check_interval: Duration::from_secs(3600),
            notify_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(30),
            webhook_url: None,
            mail: None,
        }
    }
}

impl Config {
    /// Load `.env` (if present) and read the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                return Err(ConfigError::Invalid(format!("failed to load .env: {}", e)));
            }
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let secs = |key: &str, default: Duration| -> Result<Duration, ConfigError> {
            match non_empty(key) {
                Some(v) => v
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|_| ConfigError::Invalid(format!("{} must be a number of seconds", key))),
                None => Ok(default),
            }
        };

        let access_token = non_empty("SIFA_TOKEN").ok_or(ConfigError::MissingEnv("SIFA_TOKEN"))?;
        let mute_secret = non_empty("SIFA_MUTE_SECRET").unwrap_or_else(|| access_token.clone());

        let port = match non_empty("SIFA_PORT") {
            Some(p) => p
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("invalid SIFA_PORT '{}'", p)))?,
            None => defaults.port,
        };

        let check_interval = secs("SIFA_CHECK_INTERVAL_SECS", defaults.check_interval)?;
        if check_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "SIFA_CHECK_INTERVAL_SECS must be > 0".to_string(),
            ));
        }

        let mail = match (non_empty("POSTMARK_API_KEY"), non_empty("SIFA_MAIL_FROM")) {
            (Some(postmark_api_key), Some(from)) => Some(MailConfig {
                postmark_api_key,
                from,
                default_to: non_empty("SIFA_MAIL_TO"),
            }),
            (Some(_), None) => {
                return Err(ConfigError::Invalid(
                    "POSTMARK_API_KEY is set but SIFA_MAIL_FROM is missing".to_string(),
                ))
            }
            _ => None,
        };

        Ok(Self {
            host: non_empty("SIFA_HOST").unwrap_or(defaults.host),
            port,
            targets_path: non_empty("SIFA_TARGETS")
                .map(PathBuf::from)
                .unwrap_or(defaults.targets_path),
            data_dir: non_empty("SIFA_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            in_memory: non_empty("SIFA_IN_MEMORY")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            access_token,
            mute_secret,
            public_url: non_empty("SIFA_URL").map(|u| u.trim_end_matches('/').to_string()),
            check_interval,
            notify_timeout: secs("SIFA_NOTIFY_TIMEOUT_SECS", defaults.notify_timeout)?,
            shutdown_timeout: secs("SIFA_SHUTDOWN_TIMEOUT_SECS", defaults.shutdown_timeout)?,
            webhook_url: non_empty("SIFA_WEBHOOK_URL"),
            mail,
        })
    }

    /// Open the configured state store
    pub fn open_store(&self) -> Result<Arc<dyn StateStore>, StoreError> {
        if self.in_memory {
            tracing::warn!("Using in-memory state store, state is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        } else {
            Ok(Arc::new(FileStore::open(&self.data_dir)?))
        }
    }

    /// Build the notification dispatcher from the enabled channels.
    ///
    /// Falls back to logging alerts when no channel is configured.
    pub fn build_notifier(&self) -> Result<Arc<dyn Notifier>, NotifyError> {
        let mut dispatcher = Dispatcher::default();

        if let Some(url) = &self.webhook_url {
            dispatcher =
                dispatcher.with_channel(Box::new(WebhookNotifier::new(url, self.notify_timeout)?));
        }
        if let Some(mail) = &self.mail {
            dispatcher = dispatcher.with_channel(Box::new(PostmarkNotifier::new(
                &mail.postmark_api_key,
                &mail.from,
                mail.default_to.clone(),
                self.notify_timeout,
            )?));
        }
        if dispatcher.is_empty() {
            dispatcher = dispatcher.with_channel(Box::new(LogNotifier));
        }

        tracing::info!(channels = ?dispatcher.channel_names(), "Notification channels");
        Ok(Arc::new(dispatcher))
    }

    /// Wire a scheduler for `targets` on top of `store` using the configured
    /// channels and mute link settings.
    pub fn build_scheduler(
        &self,
        targets: Arc<TargetsFile>,
        store: Arc<dyn StateStore>,
    ) -> Result<Scheduler, NotifyError> {
        Ok(Scheduler::new(
            targets,
            store,
            self.build_notifier()?,
            MuteTokens::new(&self.mute_secret),
        )
        .with_public_url(self.public_url.clone()))
    }
}
