//! Notification channels for overdue alerts

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;

/// A rendered alert ready for delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub target_id: String,
    pub title: String,
    pub message: String,
    /// Email recipient configured on the target, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
}

/// A notification channel.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;

    /// Short channel name used in logs ("log", "webhook", ...)
    fn channel_name(&self) -> &str;
}

/// Writes alerts to the tracing log
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        tracing::warn!(
            target_id = %notification.target_id,
            title = %notification.title,
            "Alert triggered: {}",
            notification.message
        );
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "log"
    }
}

/// POSTs alerts as JSON to a URL
#[derive(Debug)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    headers: HashMap<String, String>,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, NotifyError> {
        Ok(Self {
            client: http_client(timeout)?,
            url: url.into(),
            headers: HashMap::new(),
        })
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let payload = serde_json::json!({
            "target_id": notification.target_id,
            "title": notification.title,
            "message": notification.message,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        let mut request = self.client.post(&self.url).json(&payload);
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| NotifyError::Webhook(format!("Failed to send webhook: {}", e)))?;

        if !response.status().is_success() {
            return Err(NotifyError::Webhook(format!(
                "Webhook returned status {}",
                response.status()
            )));
        }

        tracing::debug!(
            target_id = %notification.target_id,
            url = %self.url,
            "Webhook notification sent"
        );
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "webhook"
    }
}

const POSTMARK_API_URL: &str = "https://api.postmarkapp.com/email";

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct PostmarkEmail<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text_body: &'a str,
}

#[derive(serde::Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
struct PostmarkResponse {
    #[serde(default, rename = "MessageID")]
    message_id: String,
    #[serde(default)]
    error_code: i64,
    #[serde(default)]
    message: String,
}

/// Sends alerts as email through the Postmark API.
///
/// The recipient is the target's own email, falling back to a default
/// address.
#[derive(Debug)]
pub struct PostmarkNotifier {
    client: reqwest::Client,
    api_url: String,
    server_token: String,
    from: String,
    default_to: Option<String>,
}

impl PostmarkNotifier {
    pub fn new(
        server_token: impl Into<String>,
        from: impl Into<String>,
        default_to: Option<String>,
        timeout: Duration,
    ) -> Result<Self, NotifyError> {
        Ok(Self {
            client: http_client(timeout)?,
            api_url: POSTMARK_API_URL.to_string(),
            server_token: server_token.into(),
            from: from.into(),
            default_to,
        })
    }

    /// Point at a different API endpoint (sandbox or test server)
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }
}

#[async_trait::async_trait]
impl Notifier for PostmarkNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let to = notification
            .recipient
            .as_deref()
            .or(self.default_to.as_deref())
            .ok_or_else(|| {
                NotifyError::Email(format!(
                    "no recipient for target '{}'",
                    notification.target_id
                ))
            })?;

        let email = PostmarkEmail {
            from: &self.from,
            to,
            subject: &notification.title,
            text_body: &notification.message,
        };

        let response = self
            .client
            .post(&self.api_url)
            .header("Accept", "application/json")
            .header("X-Postmark-Server-Token", &self.server_token)
            .json(&email)
            .send()
            .await
            .map_err(|e| NotifyError::Email(format!("Failed to send email: {}", e)))?;

        let status = response.status();
        let body: PostmarkResponse = response.json().await.unwrap_or_default();

        if !status.is_success() {
            return Err(NotifyError::Email(format!(
                "Postmark API error (code {}): {}",
                body.error_code, body.message
            )));
        }

        tracing::debug!(
            target_id = %notification.target_id,
            message_id = %body.message_id,
            "Email sent"
        );
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "postmark"
    }
}

/// Fans a notification out to every configured channel.
///
/// Channels are sent to concurrently; one failing channel does not stop the
/// others.
#[derive(Default)]
pub struct Dispatcher {
    channels: Vec<Box<dyn Notifier>>,
}

impl Dispatcher {
    pub fn new(channels: Vec<Box<dyn Notifier>>) -> Self {
        Self { channels }
    }

    pub fn with_channel(mut self, channel: Box<dyn Notifier>) -> Self {
        self.channels.push(channel);
        self
    }

    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.channel_name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

#[async_trait::async_trait]
impl Notifier for Dispatcher {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let results =
            futures::future::join_all(self.channels.iter().map(|c| c.send(notification))).await;

        let mut errors: Vec<NotifyError> = results
            .into_iter()
            .zip(&self.channels)
            .filter_map(|(result, channel)| {
                result.err().map(|e| {
                    tracing::debug!(channel = channel.channel_name(), error = %e, "Channel failed");
                    e
                })
            })
            .collect();

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(NotifyError::Multiple(errors)),
        }
    }

    fn channel_name(&self) -> &str {
        "dispatcher"
    }
}

fn http_client(timeout: Duration) -> Result<reqwest::Client, NotifyError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| NotifyError::Config(e.to_string()))
}

/// Notifier errors
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Webhook error: {0}")]
    Webhook(String),

    #[error("Email error: {0}")]
    Email(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Multiple notification failures: {0:?}")]
    Multiple(Vec<NotifyError>),
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Records every notification; optionally fails each send.
    #[derive(Default, Clone)]
    pub(crate) struct RecordingNotifier {
        pub sent: Arc<Mutex<Vec<Notification>>>,
        pub fail: bool,
    }

    impl RecordingNotifier {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }

        pub fn sent(&self) -> Vec<Notification> {
            self.sent.lock().clone()
        }
    }

    #[async_trait::async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
            self.sent.lock().push(notification.clone());
            if self.fail {
                Err(NotifyError::Webhook("transport down".to_string()))
            } else {
                Ok(())
            }
        }

        fn channel_name(&self) -> &str {
            "recording"
        }
    }

    fn notification() -> Notification {
        Notification {
            target_id: "backup".to_string(),
            title: "Alert: Target backup is overdue".to_string(),
            message: "Target backup has not acted since 2 hours ago.".to_string(),
            recipient: None,
        }
    }

    #[tokio::test]
    async fn test_log_notification() {
        let result = LogNotifier.send(&notification()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_dispatcher_sends_to_all_channels() {
        let a = RecordingNotifier::default();
        let b = RecordingNotifier::default();
        let dispatcher = Dispatcher::new(vec![Box::new(a.clone()), Box::new(b.clone())]);

        dispatcher.send(&notification()).await.unwrap();

        assert_eq!(a.sent(), vec![notification()]);
        assert_eq!(b.sent(), vec![notification()]);
        assert_eq!(dispatcher.channel_names(), vec!["recording", "recording"]);
    }

    #[tokio::test]
    async fn test_dispatcher_failure_does_not_block_others() {
        let ok = RecordingNotifier::default();
        let bad = RecordingNotifier::failing();
        let dispatcher = Dispatcher::default()
            .with_channel(Box::new(bad.clone()))
            .with_channel(Box::new(ok.clone()));

        let result = dispatcher.send(&notification()).await;
        assert!(matches!(result, Err(NotifyError::Webhook(_))));
        assert_eq!(ok.sent().len(), 1);
        assert_eq!(bad.sent().len(), 1);

        let both_bad = Dispatcher::new(vec![
            Box::new(RecordingNotifier::failing()),
            Box::new(RecordingNotifier::failing()),
        ]);
        assert!(matches!(
            both_bad.send(&notification()).await,
            Err(NotifyError::Multiple(errors)) if errors.len() == 2
        ));
    }

    #[tokio::test]
    async fn test_postmark_requires_recipient() {
        let notifier =
            PostmarkNotifier::new("token", "sifa@example.com", None, Duration::from_secs(1)).unwrap();
        let result = notifier.send(&notification()).await;
        assert!(matches!(result, Err(NotifyError::Email(_))));
    }

    #[tokio::test]
    async fn test_webhook_unreachable() {
        let notifier =
            WebhookNotifier::new("http://127.0.0.1:9/hook", Duration::from_millis(500)).unwrap();
        let result = notifier.send(&notification()).await;
        assert!(matches!(result, Err(NotifyError::Webhook(_))));
    }

    #[test]
    fn test_postmark_payload_shape() {
        let email = PostmarkEmail {
            from: "a@example.com",
            to: "b@example.com",
            subject: "s",
            text_body: "t",
        };
        let json = serde_json::to_value(&email).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"From": "a@example.com", "To": "b@example.com", "Subject": "s", "TextBody": "t"})
        );
    }

    /// Serve a single route that records request bodies and the given header.
    async fn capture_server(
        header_name: &'static str,
    ) -> (String, Arc<Mutex<Vec<(Option<String>, serde_json::Value)>>>) {
        use axum::{http::HeaderMap, routing::post, Json, Router};

        let captured = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&captured);
        let app = Router::new().route(
            "/",
            post(move |headers: HeaderMap, Json(body): Json<serde_json::Value>| {
                let sink = Arc::clone(&sink);
                async move {
                    let header = headers
                        .get(header_name)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    sink.lock().push((header, body));
                    Json(serde_json::json!({"MessageID": "abc-123", "ErrorCode": 0}))
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}/", addr), captured)
    }

    #[tokio::test]
    async fn test_webhook_posts_json_with_headers() {
        let (url, captured) = capture_server("x-sifa-key").await;
        let notifier = WebhookNotifier::new(url, Duration::from_secs(5))
            .unwrap()
            .with_header("X-Sifa-Key", "k1");

        notifier.send(&notification()).await.unwrap();

        let captured = captured.lock();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].0.as_deref(), Some("k1"));
        assert_eq!(captured[0].1["target_id"], "backup");
        assert!(captured[0].1["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_postmark_sends_to_target_recipient() {
        let (url, captured) = capture_server("x-postmark-server-token").await;
        let notifier = PostmarkNotifier::new(
            "server-token",
            "sifa@example.com",
            Some("fallback@example.com".to_string()),
            Duration::from_secs(5),
        )
        .unwrap()
        .with_api_url(url);

        let mut with_recipient = notification();
        with_recipient.recipient = Some("ops@example.com".to_string());
        notifier.send(&with_recipient).await.unwrap();
        notifier.send(&notification()).await.unwrap();

        let captured = captured.lock();
        assert_eq!(captured.len(), 2);
        assert_eq!(captured[0].0.as_deref(), Some("server-token"));
        assert_eq!(captured[0].1["To"], "ops@example.com");
        assert_eq!(captured[0].1["From"], "sifa@example.com");
        assert_eq!(captured[1].1["To"], "fallback@example.com");
    }
}
