use crate::{DomainEvent, NotificationChannel};
use anyhow::Result;
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

pub struct EmailChannel {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
    recipients: Vec<String>,
}

impl EmailChannel {
    pub fn new(
        smtp_host: &str,
        smtp_port: u16,
        username: Option<&str>,
        password: Option<&str>,
        from: &str,
        recipients: Vec<String>,
    ) -> Result<Self> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(smtp_host)?.port(smtp_port);
        if let (Some(user), Some(pass)) = (username, password) {
            builder = builder.credentials(Credentials::new(user.to_string(), pass.to_string()));
        }
        Ok(Self {
            transport: builder.build(),
            from: from.to_string(),
            recipients,
        })
    }

    fn render_body(&self, event: &DomainEvent) -> String {
        format!(
            "Severity: {}\n\n{}\n\n{}",
            event.severity(),
            event.title(),
            event.message()
        )
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    async fn send(&self, event: &DomainEvent) -> Result<()> {
        let subject = format!("[CloudWise {}] {}", event.severity(), event.title());
        let body = self.render_body(event);

        for recipient in &self.recipients {
            let message = Message::builder()
                .from(self.from.parse()?)
                .to(recipient.parse()?)
                .subject(&subject)
                .header(ContentType::TEXT_PLAIN)
                .body(body.clone())?;
            self.transport.send(message).await?;
        }
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "email"
    }
}
