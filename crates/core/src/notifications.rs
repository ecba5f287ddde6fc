use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::config::{NotificationMode, NotificationsConfig};
use crate::domain::expense::ExpenseId;
use crate::domain::user::{CompanyId, UserId};
use crate::errors::NotificationError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    ApprovalRequired,
    ExpenseApproved,
    ExpenseRejected,
    ExpenseOverridden,
    ConfigurationGap,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApprovalRequired => "approval_required",
            Self::ExpenseApproved => "expense_approved",
            Self::ExpenseRejected => "expense_rejected",
            Self::ExpenseOverridden => "expense_overridden",
            Self::ConfigurationGap => "configuration_gap",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub event_id: String,
    pub kind: NotificationKind,
    pub expense_id: ExpenseId,
    pub company_id: CompanyId,
    pub recipient: Option<UserId>,
    pub step_sequence: Option<usize>,
    pub correlation_id: String,
    pub message: String,
    pub metadata: BTreeMap<String, String>,
    pub occurred_at: DateTime<Utc>,
}

impl NotificationEvent {
    pub fn new(
        kind: NotificationKind,
        expense_id: ExpenseId,
        company_id: CompanyId,
        correlation_id: impl Into<String>,
        message: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            kind,
            expense_id,
            company_id,
            recipient: None,
            step_sequence: None,
            correlation_id: correlation_id.into(),
            message: message.into(),
            metadata: BTreeMap::new(),
            occurred_at,
        }
    }

    pub fn for_recipient(mut self, recipient: UserId) -> Self {
        self.recipient = Some(recipient);
        self
    }

    pub fn at_step(mut self, step_sequence: usize) -> Self {
        self.step_sequence = Some(step_sequence);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Best-effort delivery. Callers log failures and never roll back on them.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn notify(&self, event: &NotificationEvent) -> Result<(), NotificationError>;
}

/// Writes each event as a structured `tracing` record.
#[derive(Clone, Debug, Default)]
pub struct LogNotificationChannel;

#[async_trait]
impl NotificationChannel for LogNotificationChannel {
    async fn notify(&self, event: &NotificationEvent) -> Result<(), NotificationError> {
        info!(
            event_name = "notification.dispatched",
            notification = event.kind.as_str(),
            expense_id = %event.expense_id,
            recipient = event.recipient.as_ref().map(|id| id.0.as_str()).unwrap_or("-"),
            correlation_id = %event.correlation_id,
            "{}",
            event.message
        );
        Ok(())
    }
}

/// Posts each event as JSON, with an optional bearer token.
pub struct WebhookNotificationChannel {
    client: Client,
    url: String,
    token: Option<SecretString>,
}

impl WebhookNotificationChannel {
    pub fn new(
        url: impl Into<String>,
        token: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, NotificationError> {
        let url = url.into();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(NotificationError::Configuration(format!(
                "webhook url `{url}` must start with http:// or https://"
            )));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| NotificationError::Configuration(error.to_string()))?;
        Ok(Self { client, url, token })
    }
}

#[async_trait]
impl NotificationChannel for WebhookNotificationChannel {
    async fn notify(&self, event: &NotificationEvent) -> Result<(), NotificationError> {
        let mut request = self.client.post(&self.url).json(event);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|error| NotificationError::Transport(error.to_string()))?;
        if !response.status().is_success() {
            return Err(NotificationError::Rejected { status: response.status().as_u16() });
        }
        Ok(())
    }
}

pub fn channel_from_config(
    config: &NotificationsConfig,
) -> Result<Arc<dyn NotificationChannel>, NotificationError> {
    match config.mode {
        NotificationMode::Log => Ok(Arc::new(LogNotificationChannel)),
        NotificationMode::Webhook => {
            let url = config.webhook_url.clone().ok_or_else(|| {
                NotificationError::Configuration("webhook mode requires a webhook_url".to_string())
            })?;
            Ok(Arc::new(WebhookNotificationChannel::new(
                url,
                config.webhook_token.clone(),
                Duration::from_secs(config.timeout_secs),
            )?))
        }
    }
}

#[derive(Clone, Default)]
pub struct InMemoryNotificationChannel {
    events: Arc<Mutex<Vec<NotificationEvent>>>,
}

impl InMemoryNotificationChannel {
    pub fn events(&self) -> Vec<NotificationEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn kinds(&self) -> Vec<NotificationKind> {
        self.events().iter().map(|event| event.kind).collect()
    }
}

#[async_trait]
impl NotificationChannel for InMemoryNotificationChannel {
    async fn notify(&self, event: &NotificationEvent) -> Result<(), NotificationError> {
        match self.events.lock() {
            Ok(mut events) => events.push(event.clone()),
            Err(poisoned) => poisoned.into_inner().push(event.clone()),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread::{self, JoinHandle};
    use std::time::Duration;

    use chrono::Utc;
    use secrecy::SecretString;

    use super::{
        channel_from_config, InMemoryNotificationChannel, LogNotificationChannel, NotificationChannel,
        NotificationEvent, NotificationKind, WebhookNotificationChannel,
    };
    use crate::config::{NotificationMode, NotificationsConfig};
    use crate::domain::expense::ExpenseId;
    use crate::domain::user::{CompanyId, UserId};
    use crate::errors::NotificationError;

    fn event() -> NotificationEvent {
        NotificationEvent::new(
            NotificationKind::ApprovalRequired,
            ExpenseId("EXP-1".to_owned()),
            CompanyId("acme".to_owned()),
            "req-123",
            "approval required for step 0",
            Utc::now(),
        )
        .for_recipient(UserId("mgr-1".to_owned()))
        .at_step(0)
        .with_metadata("role", "manager")
    }

    /// Answers one HTTP request with `status` and hands back the raw request text.
    fn serve_once(status: u16) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind listener");
        let url = format!("http://{}/hooks/expensa", listener.local_addr().expect("local addr"));

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            let mut raw = Vec::new();
            let mut buffer = [0_u8; 1024];
            loop {
                let read = stream.read(&mut buffer).expect("read request");
                if read == 0 {
                    break;
                }
                raw.extend_from_slice(&buffer[..read]);
                let text = String::from_utf8_lossy(&raw).to_string();
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let content_length = text[..header_end]
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if raw.len() >= header_end + 4 + content_length {
                        break;
                    }
                }
            }

            let response =
                format!("HTTP/1.1 {status} Status\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
            stream.write_all(response.as_bytes()).expect("write response");
            String::from_utf8_lossy(&raw).to_string()
        });

        (url, handle)
    }

    #[tokio::test]
    async fn webhook_posts_json_with_bearer_token() {
        let (url, server) = serve_once(202);
        let channel = WebhookNotificationChannel::new(
            url,
            Some(SecretString::from("whk_test_token".to_string())),
            Duration::from_secs(5),
        )
        .expect("channel");

        channel.notify(&event()).await.expect("delivered");

        let request = server.join().expect("server thread");
        let lowered = request.to_ascii_lowercase();
        assert!(request.starts_with("POST /hooks/expensa "));
        assert!(lowered.contains("authorization: bearer whk_test_token"));
        assert!(lowered.contains("content-type: application/json"));
        assert!(request.contains("\"kind\":\"approval_required\""));
        assert!(request.contains("\"correlation_id\":\"req-123\""));
    }

    #[tokio::test]
    async fn webhook_maps_error_status_to_rejected() {
        let (url, server) = serve_once(503);
        let channel =
            WebhookNotificationChannel::new(url, None, Duration::from_secs(5)).expect("channel");

        let result = channel.notify(&event()).await;

        assert!(matches!(result, Err(NotificationError::Rejected { status: 503 })));
        let request = server.join().expect("server thread");
        assert!(!request.to_ascii_lowercase().contains("authorization:"));
    }

    #[tokio::test]
    async fn webhook_maps_refused_connection_to_transport() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").expect("bind listener");
            listener.local_addr().expect("local addr").port()
        };
        let channel = WebhookNotificationChannel::new(
            format!("http://127.0.0.1:{port}/hooks"),
            None,
            Duration::from_secs(2),
        )
        .expect("channel");

        let result = channel.notify(&event()).await;

        assert!(matches!(result, Err(NotificationError::Transport(_))));
    }

    #[tokio::test]
    async fn in_memory_channel_records_events_with_correlation_fields() {
        let channel = InMemoryNotificationChannel::default();
        channel.notify(&event()).await.expect("notify");

        let events = channel.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].correlation_id, "req-123");
        assert_eq!(events[0].recipient.as_ref().map(|id| id.0.as_str()), Some("mgr-1"));
        assert_eq!(events[0].step_sequence, Some(0));
        assert_eq!(channel.kinds(), vec![NotificationKind::ApprovalRequired]);
    }

    #[tokio::test]
    async fn log_channel_always_succeeds() {
        assert!(LogNotificationChannel.notify(&event()).await.is_ok());
    }

    #[test]
    fn webhook_rejects_non_http_url() {
        let result = WebhookNotificationChannel::new("ftp://hooks", None, Duration::from_secs(2));
        assert!(matches!(result, Err(NotificationError::Configuration(_))));
    }

    #[test]
    fn config_without_webhook_url_cannot_build_webhook_channel() {
        let config = NotificationsConfig {
            mode: NotificationMode::Webhook,
            webhook_url: None,
            webhook_token: None,
            timeout_secs: 5,
        };
        assert!(matches!(channel_from_config(&config), Err(NotificationError::Configuration(_))));
    }

    #[test]
    fn event_kind_serializes_snake_case() {
        let json = serde_json::to_value(event()).expect("serialize");
        assert_eq!(json["kind"], "approval_required");
    }
}
