//! Operator notifications.
//!
//! Delivery is fire-and-forget: a failed notification is logged and never
//! turned into a migration failure.

use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use tracing::{error, info, warn};

use kdvh_common::{MigrationError, MigrationResult};

/// Message sent to the notification webhook.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PanicReport {
    pub subject: String,
    pub recipients: Vec<String>,
    pub body: String,
}

impl PanicReport {
    /// Build the report for a panic in `context`, including the command
    /// line of this process.
    pub fn new(context: &str, message: &str, backtrace: &str, recipients: &[String]) -> Self {
        let command: Vec<String> = std::env::args().collect();
        Self {
            subject: format!("KDVH migration panicked: {}", context),
            recipients: recipients.to_vec(),
            body: format!(
                "{} panicked: {}\n\nCommand:\n{}\n\nBacktrace:\n{}",
                context,
                message,
                command.join(" "),
                backtrace
            ),
        }
    }

    /// JSON body posted to the webhook.
    pub fn to_json(&self) -> MigrationResult<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| MigrationError::Notification(format!("Could not encode panic report: {}", e)))
    }
}

/// Posts panic reports to a webhook that relays them to the operators.
#[derive(Clone)]
pub struct Notifier {
    client: reqwest::Client,
    webhook_url: Option<String>,
    recipients: Vec<String>,
}

impl Notifier {
    pub fn new(webhook_url: Option<String>, recipients: Vec<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            client,
            webhook_url,
            recipients,
        }
    }

    /// A notifier that only logs.
    pub fn disabled() -> Self {
        Self::new(None, Vec::new())
    }

    pub fn is_enabled(&self) -> bool {
        self.webhook_url.is_some()
    }

    /// Report a panic. Failures are logged, never returned.
    pub async fn notify_panic(&self, context: &str, message: &str, backtrace: &str) {
        let report = PanicReport::new(context, message, backtrace, &self.recipients);

        let Some(url) = &self.webhook_url else {
            warn!(context = %context, "No notification webhook configured, panic report not sent");
            return;
        };

        match self.send(url, &report).await {
            Ok(()) => info!(context = %context, recipients = self.recipients.len(), "Panic report sent"),
            Err(e) => error!(context = %context, error = %e, "Failed to send panic report"),
        }
    }

    async fn send(&self, url: &str, report: &PanicReport) -> MigrationResult<()> {
        let body = report.to_json()?;

        match self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => Ok(()),
            Ok(response) => Err(MigrationError::Notification(format!(
                "Webhook rejected panic report with status {}",
                response.status()
            ))),
            Err(e) => Err(MigrationError::Notification(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_contents() {
        let report = PanicReport::new(
            "T_ADATA import",
            "index out of bounds",
            "0: main",
            &["ops@example.com".to_string()],
        );
        assert_eq!(report.subject, "KDVH migration panicked: T_ADATA import");
        assert_eq!(report.recipients, vec!["ops@example.com".to_string()]);
        assert!(report.body.contains("index out of bounds"));
        assert!(report.body.contains("Command:"));
        assert!(report.body.contains("0: main"));
    }

    #[test]
    fn test_report_is_encoded_as_json() {
        let report = PanicReport::new("T_ADATA dump", "boom", "", &["ops@example.com".to_string()]);
        let body = report.to_json().unwrap();

        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["subject"], "KDVH migration panicked: T_ADATA dump");
        assert_eq!(json["recipients"][0], "ops@example.com");
        assert!(json["body"].as_str().unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn test_unreachable_webhook_is_a_notification_error() {
        let notifier = Notifier::new(Some("http://127.0.0.1:1/notify".to_string()), Vec::new());
        let report = PanicReport::new("T_ADATA dump", "boom", "", &[]);

        let err = notifier.send("http://127.0.0.1:1/notify", &report).await.unwrap_err();
        assert!(matches!(err, MigrationError::Notification(_)));
        assert_eq!(err.kind(), "notification");

        // logged only
        notifier.notify_panic("T_ADATA dump", "boom", "").await;
    }

    #[tokio::test]
    async fn test_disabled_notifier_is_silent() {
        let notifier = Notifier::disabled();
        assert!(!notifier.is_enabled());
        notifier.notify_panic("T_ADATA dump", "boom", "").await;
    }
}
