//! Provider adapters.
//!
//! A uniform send primitive over the two transmission backends: the
//! delegated Gmail API and an authenticated SMTP relay. Provider choice is a
//! pure configuration switch made once per job; the dispatcher never
//! branches on it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE;
use lettre::message::{Mailbox, SinglePart, header::ContentType};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use mailops_common::{AppError, AppResult};
use mailops_db::entities::sender_account;
use thiserror::Error;

/// Send failure, classified for the retry policy.
#[derive(Debug, Error)]
pub enum SendError {
    /// Network, timeout, or rate-limit failure. Retryable.
    #[error("transient send failure: {0}")]
    Transient(String),
    /// Auth or invalid-recipient failure. Not retryable.
    #[error("fatal send failure: {0}")]
    Fatal(String),
}

impl SendError {
    /// Whether the bounded retry policy applies.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// One rendered message, ready for transmission.
#[derive(Debug, Clone)]
pub struct OutgoingEmail {
    /// Destination address.
    pub to: String,
    /// Destination display name.
    pub to_name: Option<String>,
    /// From display name (the sending address comes from the account).
    pub from_name: String,
    /// Subject line.
    pub subject: String,
    /// HTML body, already tracking-rewritten.
    pub html: String,
}

/// The uniform send primitive.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Transmit one message through the given sender account.
    async fn send(
        &self,
        account: &sender_account::Model,
        mail: &OutgoingEmail,
    ) -> Result<(), SendError>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// Source of delegated access tokens for API sending.
///
/// Token minting (service-account key exchange per domain) belongs to the
/// provisioning tooling; the engine only consumes tokens.
#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    /// An access token authorized to send as the given account.
    async fn token_for(&self, account: &sender_account::Model) -> AppResult<String>;
}

/// Token source backed by a single configured token.
pub struct StaticTokenSource {
    token: String,
}

impl StaticTokenSource {
    /// Create a token source from a configured token.
    #[must_use]
    pub const fn new(token: String) -> Self {
        Self { token }
    }
}

#[async_trait]
impl AccessTokenSource for StaticTokenSource {
    async fn token_for(&self, _account: &sender_account::Model) -> AppResult<String> {
        Ok(self.token.clone())
    }
}

/// Delegated-API sending through the Gmail REST API.
pub struct GmailApiProvider {
    http: reqwest::Client,
    tokens: Arc<dyn AccessTokenSource>,
}

impl GmailApiProvider {
    /// Create a new Gmail API provider.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new(tokens: Arc<dyn AccessTokenSource>) -> Self {
        // Bounded request and connect timeouts: a half-open connection must
        // surface as a transient failure, not hang the dispatcher.
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");

        Self { http, tokens }
    }

    /// Render the RFC 2822 message the API expects in its `raw` field.
    fn render_rfc2822(account: &sender_account::Model, mail: &OutgoingEmail) -> String {
        let to = mail.to_name.as_ref().map_or_else(
            || mail.to.clone(),
            |name| format!("{name} <{}>", mail.to),
        );
        format!(
            "From: {} <{}>\r\nTo: {}\r\nSubject: {}\r\nMIME-Version: 1.0\r\nContent-Type: text/html; charset=utf-8\r\n\r\n{}",
            mail.from_name, account.email, to, mail.subject, mail.html
        )
    }
}

#[async_trait]
impl ProviderAdapter for GmailApiProvider {
    async fn send(
        &self,
        account: &sender_account::Model,
        mail: &OutgoingEmail,
    ) -> Result<(), SendError> {
        let token = self
            .tokens
            .token_for(account)
            .await
            .map_err(|e| SendError::Fatal(format!("no delegated token: {e}")))?;

        let raw = URL_SAFE.encode(Self::render_rfc2822(account, mail));
        let url = format!(
            "https://gmail.googleapis.com/gmail/v1/users/{}/messages/send",
            account.email
        );

        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(&serde_json::json!({ "raw": raw }))
            .send()
            .await
            .map_err(|e| SendError::Transient(format!("gmail api request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        if status.as_u16() == 429 || status.is_server_error() {
            Err(SendError::Transient(format!("gmail api {status}: {body}")))
        } else {
            Err(SendError::Fatal(format!("gmail api {status}: {body}")))
        }
    }

    fn name(&self) -> &'static str {
        "gmail_api"
    }
}

/// Authenticated-relay sending through per-account SMTP credentials.
pub struct SmtpRelayProvider {
    _private: (),
}

impl SmtpRelayProvider {
    /// Create a new SMTP relay provider.
    #[must_use]
    pub const fn new() -> Self {
        Self { _private: () }
    }

    /// Build the relay transport for one account from its stored
    /// credentials.
    fn transport(
        account: &sender_account::Model,
    ) -> Result<AsyncSmtpTransport<Tokio1Executor>, SendError> {
        let host = account
            .smtp_host
            .as_deref()
            .ok_or_else(|| SendError::Fatal(format!("account {} has no relay host", account.id)))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(host)
            .map_err(|e| SendError::Fatal(format!("bad relay host {host}: {e}")))?;

        if let Some(port) = account.smtp_port {
            builder = builder.port(port as u16);
        }
        if let (Some(user), Some(pass)) = (
            account.smtp_username.as_deref(),
            account.smtp_password.as_deref(),
        ) {
            builder = builder.credentials(Credentials::new(user.to_string(), pass.to_string()));
        }

        Ok(builder.build())
    }
}

impl Default for SmtpRelayProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderAdapter for SmtpRelayProvider {
    async fn send(
        &self,
        account: &sender_account::Model,
        mail: &OutgoingEmail,
    ) -> Result<(), SendError> {
        let from: Mailbox = format!("{} <{}>", mail.from_name, account.email)
            .parse()
            .map_err(|e| SendError::Fatal(format!("bad from address: {e}")))?;
        let to: Mailbox = mail
            .to
            .parse()
            .map_err(|e| SendError::Fatal(format!("bad recipient address: {e}")))?;

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(&mail.subject)
            .singlepart(
                SinglePart::builder()
                    .header(ContentType::TEXT_HTML)
                    .body(mail.html.clone()),
            )
            .map_err(|e| SendError::Fatal(format!("failed to build message: {e}")))?;

        let transport = Self::transport(account)?;
        transport.send(message).await.map_err(|e| {
            if e.is_permanent() {
                SendError::Fatal(format!("smtp relay rejected message: {e}"))
            } else {
                SendError::Transient(format!("smtp relay send failed: {e}"))
            }
        })?;

        Ok(())
    }

    fn name(&self) -> &'static str {
        "smtp_relay"
    }
}

/// Map a send error to its job-level application error.
impl From<SendError> for AppError {
    fn from(err: SendError) -> Self {
        match err {
            SendError::Transient(msg) => Self::ProviderTransient(msg),
            SendError::Fatal(msg) => Self::ProviderFatal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn account() -> sender_account::Model {
        sender_account::Model {
            id: "a1".to_string(),
            email: "deals@acme.example".to_string(),
            domain: "acme.example".to_string(),
            daily_send_limit: 500,
            sends_today: 0,
            status: mailops_db::entities::sender_account::AccountStatus::Active,
            smtp_host: Some("relay.acme.example".to_string()),
            smtp_port: Some(587),
            smtp_username: Some("deals".to_string()),
            smtp_password: Some("hunter2".to_string()),
            updated_at: Utc::now().into(),
        }
    }

    fn mail() -> OutgoingEmail {
        OutgoingEmail {
            to: "user@example.com".to_string(),
            to_name: Some("Jo User".to_string()),
            from_name: "Acme Deals".to_string(),
            subject: "June offers".to_string(),
            html: "<p>Hello</p>".to_string(),
        }
    }

    #[test]
    fn test_rfc2822_rendering() {
        let raw = GmailApiProvider::render_rfc2822(&account(), &mail());
        assert!(raw.starts_with("From: Acme Deals <deals@acme.example>\r\n"));
        assert!(raw.contains("To: Jo User <user@example.com>"));
        assert!(raw.contains("Subject: June offers"));
        assert!(raw.ends_with("<p>Hello</p>"));
    }

    #[test]
    fn test_transport_requires_relay_host() {
        let mut acc = account();
        acc.smtp_host = None;
        let err = SmtpRelayProvider::transport(&acc).unwrap_err();
        assert!(matches!(err, SendError::Fatal(_)));
    }

    #[test]
    fn test_error_classification() {
        assert!(SendError::Transient("timeout".into()).is_retryable());
        assert!(!SendError::Fatal("bad auth".into()).is_retryable());
    }

    #[test]
    fn test_gmail_provider_builds_bounded_client() {
        let provider = GmailApiProvider::new(Arc::new(StaticTokenSource::new("tok".to_string())));
        assert_eq!(provider.name(), "gmail_api");
    }

    #[tokio::test]
    async fn test_static_token_source() {
        let source = StaticTokenSource::new("tok".to_string());
        let token = source.token_for(&account()).await.expect("token");
        assert_eq!(token, "tok");
    }
}
