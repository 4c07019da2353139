//! Change summaries by e-mail

use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor, message::Mailbox,
    message::header::ContentType, transport::smtp::authentication::Credentials,
};
use locsync_core::error::NotifyError;
use locsync_core::{ChangeSummary, Notifier};
use tracing::info;

use crate::config::SmtpSettings;

const SUMMARY_SUBJECT: &str = "[locsync] Location changed successfully";
const ALERT_SUBJECT: &str = "[locsync] Attention required";

pub struct EmailNotifier {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    sender: Mailbox,
    recipient: Mailbox,
}

impl EmailNotifier {
    pub fn new(settings: &SmtpSettings) -> Result<Self, NotifyError> {
        let sender = settings
            .sender
            .parse()
            .map_err(|e| NotifyError::Config(format!("Invalid sender: {}", e)))?;
        let recipient = settings
            .recipient
            .parse()
            .map_err(|e| NotifyError::Config(format!("Invalid recipient: {}", e)))?;

        let mut mailer_builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
            .map_err(|e| NotifyError::Config(e.to_string()))?
            .port(settings.port);

        if !settings.user.is_empty() {
            mailer_builder = mailer_builder.credentials(Credentials::new(
                settings.user.clone(),
                settings.password.clone(),
            ));
        }

        Ok(EmailNotifier {
            mailer: mailer_builder.build(),
            sender,
            recipient,
        })
    }

    async fn send_html(&self, subject: &str, html: String) -> Result<(), NotifyError> {
        let email = Message::builder()
            .from(self.sender.clone())
            .to(self.recipient.clone())
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html)
            .map_err(|e| NotifyError::Send(e.to_string()))?;

        self.mailer
            .send(email)
            .await
            .map_err(|e| NotifyError::Send(e.to_string()))?;

        info!(recipient = %self.recipient, subject, "Sent e-mail");
        Ok(())
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn send_change_summary(&self, changes: &ChangeSummary) -> Result<(), NotifyError> {
        if changes.is_empty() {
            return Ok(());
        }
        self.send_html(SUMMARY_SUBJECT, render_summary(changes)).await
    }

    async fn send_alert(&self, message: &str) -> Result<(), NotifyError> {
        let html = format!("<p>Hi,</p>\n<p>{}</p>\n", escape_html(message));
        self.send_html(ALERT_SUBJECT, html).await
    }
}

/// HTML body listing every change in date order.
pub fn render_summary(changes: &ChangeSummary) -> String {
    let items: String = changes
        .iter()
        .map(|(date, change)| {
            format!(
                "<li><strong>{}</strong>: {}</li>",
                date.format("%Y-%m-%d"),
                escape_html(change)
            )
        })
        .collect();

    format!(
        "<p>Hi,</p>\n\
         <p>You have successfully changed your location for the following dates:</p>\n\
         <ul>{items}</ul>\n\
         <p>locsync</p>\n"
    )
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
