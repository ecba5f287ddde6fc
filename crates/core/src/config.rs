use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::anomaly::DetectorSettings;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub notifications: NotificationsConfig,
    pub detection: DetectorSettings,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Debug)]
pub struct NotificationsConfig {
    pub mode: NotificationMode,
    pub webhook_url: Option<String>,
    pub webhook_token: Option<SecretString>,
    pub timeout_secs: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationMode {
    Log,
    Webhook,
}

impl NotificationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Webhook => "webhook",
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
    pub notification_mode: Option<NotificationMode>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://expensa.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
            notifications: NotificationsConfig {
                mode: NotificationMode::Log,
                webhook_url: None,
                webhook_token: None,
                timeout_secs: 5,
            },
            detection: DetectorSettings::default(),
        }
    }
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl FromStr for NotificationMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "log" => Ok(Self::Log),
            "webhook" => Ok(Self::Webhook),
            other => Err(ConfigError::Validation(format!(
                "unsupported notification mode `{other}` (expected log|webhook)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("expensa.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }

        if let Some(notifications) = patch.notifications {
            if let Some(mode) = notifications.mode {
                self.notifications.mode = mode;
            }
            if let Some(webhook_url) = notifications.webhook_url {
                self.notifications.webhook_url = Some(webhook_url);
            }
            if let Some(webhook_token) = notifications.webhook_token {
                self.notifications.webhook_token = Some(webhook_token.into());
            }
            if let Some(timeout_secs) = notifications.timeout_secs {
                self.notifications.timeout_secs = timeout_secs;
            }
        }

        // Unset detection keys fall back to their defaults during deserialization.
        if let Some(detection) = patch.detection {
            self.detection = detection;
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("EXPENSA_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("EXPENSA_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_env("EXPENSA_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("EXPENSA_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_env("EXPENSA_DATABASE_TIMEOUT_SECS", &value)?;
        }

        let log_level = read_env("EXPENSA_LOGGING_LEVEL").or_else(|| read_env("EXPENSA_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("EXPENSA_LOGGING_FORMAT").or_else(|| read_env("EXPENSA_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        if let Some(value) = read_env("EXPENSA_NOTIFICATIONS_MODE") {
            self.notifications.mode = value.parse()?;
        }
        if let Some(value) = read_env("EXPENSA_NOTIFICATIONS_WEBHOOK_URL") {
            self.notifications.webhook_url = Some(value);
        }
        if let Some(value) = read_env("EXPENSA_NOTIFICATIONS_WEBHOOK_TOKEN") {
            self.notifications.webhook_token = Some(value.into());
        }
        if let Some(value) = read_env("EXPENSA_NOTIFICATIONS_TIMEOUT_SECS") {
            self.notifications.timeout_secs =
                parse_env("EXPENSA_NOTIFICATIONS_TIMEOUT_SECS", &value)?;
        }

        let detection = &mut self.detection;
        if let Some(value) = read_env("EXPENSA_DETECTION_HISTORY_LOOKBACK_DAYS") {
            detection.history_lookback_days =
                parse_env("EXPENSA_DETECTION_HISTORY_LOOKBACK_DAYS", &value)?;
        }
        if let Some(value) = read_env("EXPENSA_DETECTION_VENDOR_LOOKBACK_DAYS") {
            detection.vendor_lookback_days =
                parse_env("EXPENSA_DETECTION_VENDOR_LOOKBACK_DAYS", &value)?;
        }
        if let Some(value) = read_env("EXPENSA_DETECTION_AMOUNT_ABSOLUTE_HIGH") {
            detection.amount_absolute_high =
                parse_env::<Decimal>("EXPENSA_DETECTION_AMOUNT_ABSOLUTE_HIGH", &value)?;
        }
        if let Some(value) = read_env("EXPENSA_DETECTION_DAILY_SUBMISSION_CAP") {
            detection.daily_submission_cap =
                parse_env("EXPENSA_DETECTION_DAILY_SUBMISSION_CAP", &value)?;
        }
        if let Some(value) = read_env("EXPENSA_DETECTION_WEEKLY_SUBMISSION_CAP") {
            detection.weekly_submission_cap =
                parse_env("EXPENSA_DETECTION_WEEKLY_SUBMISSION_CAP", &value)?;
        }
        if let Some(value) = read_env("EXPENSA_DETECTION_VENDOR_BLACKLIST") {
            detection.vendor_blacklist = value
                .split(',')
                .map(|term| term.trim().to_string())
                .filter(|term| !term.is_empty())
                .collect();
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(log_format) = overrides.log_format {
            self.logging.format = log_format;
        }
        if let Some(mode) = overrides.notification_mode {
            self.notifications.mode = mode;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_logging(&self.logging)?;
        validate_notifications(&self.notifications)?;
        self.detection.validate().map_err(ConfigError::Validation)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("expensa.toml"), PathBuf::from("config/expensa.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn validate_notifications(notifications: &NotificationsConfig) -> Result<(), ConfigError> {
    if notifications.timeout_secs == 0 || notifications.timeout_secs > 60 {
        return Err(ConfigError::Validation(
            "notifications.timeout_secs must be in range 1..=60".to_string(),
        ));
    }

    if notifications.mode == NotificationMode::Webhook {
        let url = notifications.webhook_url.as_deref().map(str::trim).unwrap_or_default();
        if url.is_empty() {
            return Err(ConfigError::Validation(
                "notifications.webhook_url is required when notifications.mode = \"webhook\""
                    .to_string(),
            ));
        }
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "notifications.webhook_url must start with http:// or https://".to_string(),
            ));
        }
    }

    let blank_token = notifications
        .webhook_token
        .as_ref()
        .map(|token| token.expose_secret().trim().is_empty())
        .unwrap_or(false);
    if blank_token {
        return Err(ConfigError::Validation(
            "notifications.webhook_token must not be blank when set".to_string(),
        ));
    }

    Ok(())
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    logging: Option<LoggingPatch>,
    notifications: Option<NotificationsPatch>,
    detection: Option<DetectorSettings>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[derive(Debug, Default, Deserialize)]
struct NotificationsPatch {
    mode: Option<NotificationMode>,
    webhook_url: Option<String>,
    webhook_token: Option<String>,
    timeout_secs: Option<u64>,
}
