use crate::{DomainEvent, NotificationChannel};
use anyhow::Result;
use async_trait::async_trait;

pub struct WebhookChannel {
    url: String,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn render_body(&self, event: &DomainEvent) -> String {
        serde_json::json!({
            "severity": event.severity().to_string(),
            "title": event.title(),
            "message": event.message(),
            "event": event,
        })
        .to_string()
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    async fn send(&self, event: &DomainEvent) -> Result<()> {
        let body = self.render_body(event);
        let mut last_err = None;

        for attempt in 0..3u32 {
            match self
                .client
                .post(&self.url)
                .header("Content-Type", "application/json")
                .body(body.clone())
                .send()
                .await
            {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(resp) => {
                    let status = resp.status();
                    tracing::warn!(
                        attempt = attempt + 1,
                        status = %status,
                        "Webhook returned non-success status, retrying"
                    );
                    last_err = Some(anyhow::anyhow!("HTTP {status}"));
                }
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        error = %e,
                        "Webhook send failed, retrying"
                    );
                    last_err = Some(e.into());
                }
            }
            if attempt < 2 {
                tokio::time::sleep(std::time::Duration::from_millis(100 * 2u64.pow(attempt)))
                    .await;
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Webhook failed")))
    }

    fn channel_name(&self) -> &str {
        "webhook"
    }
}
