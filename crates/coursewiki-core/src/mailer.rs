use async_trait::async_trait;
use parking_lot::Mutex;

/// Outbound email capability.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub html_body: String,
}

/// Mailer that keeps every message in memory, newest last.
#[derive(Default)]
pub struct MemoryMailer {
    sent: Mutex<Vec<Email>>,
}

impl MemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Email> {
        self.sent.lock().clone()
    }

    pub fn last_to(&self, to: &str) -> Option<Email> {
        self.sent.lock().iter().rev().find(|e| e.to == to).cloned()
    }
}

#[async_trait]
impl Mailer for MemoryMailer {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> anyhow::Result<()> {
        self.sent.lock().push(Email {
            to: to.to_string(),
            subject: subject.to_string(),
            html_body: html_body.to_string(),
        });
        Ok(())
    }
}

/// Message bodies for the account lifecycle emails.
pub mod templates {
    use super::Email;

    fn origin(origin: Option<&str>) -> Option<&str> {
        origin.map(|o| o.trim_end_matches('/')).filter(|o| !o.is_empty())
    }

    pub fn verification(email: &str, token: &str, request_origin: Option<&str>) -> Email {
        let message = match origin(request_origin) {
            Some(origin) => {
                let verify_url = format!(
                    "{origin}/email_validate?email={}&token={}",
                    urlencoding::encode(email),
                    urlencoding::encode(token)
                );
                format!(
                    "<p>Please click the below link to verify your email address:</p>\
                     <p><a href=\"{verify_url}\">{verify_url}</a></p>"
                )
            }
            None => format!(
                "<p>Please use the below token to verify your email address with the \
                 <code>/users/verify-email</code> api route:</p><p><code>{token}</code></p>"
            ),
        };

        Email {
            to: email.to_string(),
            subject: "Sign-up Verification API - Verify Email".to_string(),
            html_body: format!("<h4>Verify Email</h4><p>Thanks for registering!</p>{message}"),
        }
    }

    pub fn already_registered(email: &str, request_origin: Option<&str>) -> Email {
        let message = match origin(request_origin) {
            Some(origin) => format!(
                "<p>If you don't know your password please visit the \
                 <a href=\"{origin}/password_reset\">forgot password</a> page.</p>"
            ),
            None => "<p>If you don't know your password you can reset it via the \
                     <code>/users/forgot-password</code> api route.</p>"
                .to_string(),
        };

        Email {
            to: email.to_string(),
            subject: "Sign-up Verification API - Email Already Registered".to_string(),
            html_body: format!(
                "<h4>Email Already Registered</h4>\
                 <p>Your email <strong>{email}</strong> is already registered.</p>{message}"
            ),
        }
    }

    pub fn password_reset(email: &str, token: &str, request_origin: Option<&str>) -> Email {
        let message = match origin(request_origin) {
            Some(origin) => {
                let reset_url = format!(
                    "{origin}/reset?email={}&token={}",
                    urlencoding::encode(email),
                    urlencoding::encode(token)
                );
                format!(
                    "<p>Please click the below link to reset your password, \
                     the link will be valid for 1 day:</p>\
                     <p><a href=\"{reset_url}\">{reset_url}</a></p>"
                )
            }
            None => format!(
                "<p>Please use the below token to reset your password with the \
                 <code>/users/reset-password</code> api route:</p><p><code>{token}</code></p>"
            ),
        };

        Email {
            to: email.to_string(),
            subject: "Sign-up Verification API - Reset Password".to_string(),
            html_body: format!("<h4>Reset Password Email</h4>{message}"),
        }
    }
}

/// Deliver `email`, logging rather than propagating a delivery failure so the
/// caller's response does not depend on mail delivery.
pub async fn deliver(mailer: &dyn Mailer, email: Email) {
    if let Err(e) = mailer.send(&email.to, &email.subject, &email.html_body).await {
        log::error!("Failed to send '{}' email: {e}", email.subject);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verification_link_uses_origin() {
        let email = templates::verification("a@x.com", "tok.en", Some("https://wiki.example/"));
        assert!(email
            .html_body
            .contains("https://wiki.example/email_validate?email=a%40x.com&token=tok.en"));
    }

    #[test]
    fn test_verification_without_origin_shows_token() {
        let email = templates::verification("a@x.com", "abc", None);
        assert!(email.html_body.contains("<code>abc</code>"));
    }

    #[tokio::test]
    async fn test_memory_mailer_records() {
        let mailer = MemoryMailer::new();
        deliver(&mailer, templates::already_registered("a@x.com", None)).await;

        let last = mailer.last_to("a@x.com").unwrap();
        assert!(last.subject.contains("Already Registered"));
        assert_eq!(mailer.sent().len(), 1);
    }
}
