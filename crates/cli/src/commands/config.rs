use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use expensa_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

/// Detection keys that also accept an `EXPENSA_DETECTION_*` override.
const DETECTION_ENV_KEYS: &[&str] = &[
    "history_lookback_days",
    "vendor_lookback_days",
    "amount_absolute_high",
    "daily_submission_cap",
    "weekly_submission_cap",
    "vendor_blacklist",
];

struct Sources {
    path: Option<PathBuf>,
    doc: Option<Value>,
}

pub fn run(options: &LoadOptions) -> String {
    let config = match AppConfig::load(options.clone()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let path = detect_config_path(options.config_path.as_deref());
    let sources = Sources { doc: load_config_file_doc(path.as_deref()), path };

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    let mut push = |key: &str, value: &str, env_key: Option<&str>| {
        lines.push(render_line(key, value, sources.field_source(key, env_key)));
    };

    push("database.url", &config.database.url, Some("EXPENSA_DATABASE_URL"));
    push(
        "database.max_connections",
        &config.database.max_connections.to_string(),
        Some("EXPENSA_DATABASE_MAX_CONNECTIONS"),
    );
    push(
        "database.timeout_secs",
        &config.database.timeout_secs.to_string(),
        Some("EXPENSA_DATABASE_TIMEOUT_SECS"),
    );

    push("logging.level", &config.logging.level, Some("EXPENSA_LOGGING_LEVEL"));
    push("logging.format", &format!("{:?}", config.logging.format), Some("EXPENSA_LOGGING_FORMAT"));

    push(
        "notifications.mode",
        config.notifications.mode.as_str(),
        Some("EXPENSA_NOTIFICATIONS_MODE"),
    );
    push(
        "notifications.webhook_url",
        config.notifications.webhook_url.as_deref().unwrap_or("<unset>"),
        Some("EXPENSA_NOTIFICATIONS_WEBHOOK_URL"),
    );
    let webhook_token = config
        .notifications
        .webhook_token
        .as_ref()
        .map(|token| redact_token(token.expose_secret()))
        .unwrap_or_else(|| "<unset>".to_string());
    push(
        "notifications.webhook_token",
        &webhook_token,
        Some("EXPENSA_NOTIFICATIONS_WEBHOOK_TOKEN"),
    );
    push(
        "notifications.timeout_secs",
        &config.notifications.timeout_secs.to_string(),
        Some("EXPENSA_NOTIFICATIONS_TIMEOUT_SECS"),
    );

    match serde_json::to_value(&config.detection) {
        Ok(serde_json::Value::Object(fields)) => {
            for (field, value) in fields {
                let key = format!("detection.{field}");
                let env_key = DETECTION_ENV_KEYS
                    .contains(&field.as_str())
                    .then(|| format!("EXPENSA_DETECTION_{}", field.to_ascii_uppercase()));
                push(&key, &render_value(&value), env_key.as_deref());
            }
        }
        Ok(_) | Err(_) => push("detection", "<unrenderable>", None),
    }

    lines.join("\n")
}

impl Sources {
    fn field_source(&self, key_path: &str, env_key: Option<&str>) -> String {
        if let Some(env_key) = env_key {
            if env::var_os(env_key).is_some() {
                return format!("env ({env_key})");
            }
        }

        if let Some(doc) = &self.doc {
            if contains_path(doc, key_path) {
                let file_path = self
                    .path
                    .as_ref()
                    .map(|path| path.display().to_string())
                    .unwrap_or_else(|| "config file".to_string());
                return format!("file ({file_path})");
            }
        }

        "default".to_string()
    }
}

fn detect_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }

    [PathBuf::from("expensa.toml"), PathBuf::from("config/expensa.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('_') {
        return format!("{prefix}_***");
    }

    "<redacted>".to_string()
}
