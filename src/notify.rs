use crate::util::config::get_config;
use serde_json::json;
use tracing::info;

/// Human-readable alert ready for the notification channel.
#[derive(Clone, Debug, PartialEq)]
pub struct AlertMessage {
    pub subject: String,
    pub body: String,
}

/// Webhook-backed notification channel. Without a configured URL alerts are
/// only logged, which keeps the pipeline runnable against a bare broker.
pub struct Notifier {
    webhook_url: Option<String>,
    client: reqwest::Client,
}

impl Notifier {
    pub fn from_config() -> Self {
        let webhook_url = get_config().get_string("notify_webhook_url").ok();

        if webhook_url.is_none() {
            info!("notify_webhook_url not set, alerts will only be logged");
        }

        Self {
            webhook_url,
            client: reqwest::Client::new(),
        }
    }

    pub async fn send(&self, message: &AlertMessage) -> anyhow::Result<()> {
        let Some(url) = &self.webhook_url else {
            info!("{}: {}", message.subject, message.body);
            return Ok(());
        };

        self.client
            .post(url)
            .json(&json!({
                "subject": message.subject,
                "message": message.body,
            }))
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }
}
