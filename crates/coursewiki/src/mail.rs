use async_trait::async_trait;
use coursewiki_core::mailer::Mailer;

/// Mailer that writes outgoing messages to the log instead of an SMTP relay.
///
/// The body carries one-shot tokens, so it is only emitted at `debug`.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> anyhow::Result<()> {
        log::info!("Sending email '{}' to {}", subject, to);
        log::debug!("Email body for {}: {}", to, html_body);
        Ok(())
    }
}
