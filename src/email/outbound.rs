use async_trait::async_trait;
use chrono::Utc;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use uuid::Uuid;

use crate::config::SmtpConfig;

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("invalid address: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("failed to build email: {0}")]
    Build(#[from] lettre::error::Error),
    #[error("smtp error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
    #[error("send task failed: {0}")]
    Join(String),
}

/// A reply email with resolved threading headers. Ids are stored bare; the
/// RFC 5322 angle brackets are added at composition time only.
#[derive(Debug, Clone)]
pub struct OutboundEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub content: String,
    pub message_id: String,
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
}

/// Globally-unique bare Message-ID under the configured domain.
pub fn generate_message_id(domain: &str) -> String {
    format!(
        "{}.{}@{}",
        Utc::now().timestamp_millis(),
        Uuid::new_v4().simple(),
        domain
    )
}

/// Threading headers for a reply: a fresh Message-ID, In-Reply-To pointing at
/// the most recent known id, and References as the deduplicated union of all
/// prior ids plus the one being replied to.
pub fn build_threaded_reply(
    in_reply_to: Option<&str>,
    prior_references: &[String],
    domain: &str,
) -> (String, Vec<String>) {
    let mut references: Vec<String> = Vec::new();
    for r in prior_references {
        if !references.iter().any(|seen| seen == r) {
            references.push(r.clone());
        }
    }
    if let Some(id) = in_reply_to {
        if !references.iter().any(|seen| seen == id) {
            references.push(id.to_string());
        }
    }
    (generate_message_id(domain), references)
}

pub fn compose(email: &OutboundEmail) -> Result<Message, MailError> {
    let mut builder = Message::builder()
        .from(email.from.parse()?)
        .to(email.to.parse()?)
        .subject(email.subject.clone())
        .message_id(Some(format!("<{}>", email.message_id)));
    if let Some(ref id) = email.in_reply_to {
        builder = builder.in_reply_to(format!("<{id}>"));
    }
    if !email.references.is_empty() {
        let formatted: Vec<String> =
            email.references.iter().map(|r| format!("<{r}>")).collect();
        builder = builder.references(formatted.join(" "));
    }
    Ok(builder.body(email.content.clone())?)
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutboundEmail) -> Result<(), MailError>;
}

pub struct SmtpMailer {
    config: SmtpConfig,
}

impl SmtpMailer {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &OutboundEmail) -> Result<(), MailError> {
        let message = compose(email)?;
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || {
            let mut transport = SmtpTransport::starttls_relay(&config.server)?
                .port(config.port);
            if !config.username.is_empty() {
                transport = transport
                    .credentials(Credentials::new(config.username, config.password));
            }
            transport.build().send(&message)?;
            Ok::<(), MailError>(())
        })
        .await
        .map_err(|e| MailError::Join(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_ids_are_unique_across_calls() {
        let a = generate_message_id("helpdesk.test");
        let b = generate_message_id("helpdesk.test");
        assert_ne!(a, b);
        assert!(a.ends_with("@helpdesk.test"));
        assert!(!a.contains('<') && !a.contains('>'));
    }

    #[test]
    fn references_accumulate_over_a_reply_chain() {
        let domain = "helpdesk.test";
        // Customer's first message.
        let mut last_id = "cust-1@mail.test".to_string();
        let mut references: Vec<String> = Vec::new();
        for _ in 0..5 {
            let (new_id, refs) = build_threaded_reply(Some(&last_id), &references, domain);
            // The replied-to id always lands at the end, nothing is dropped.
            assert_eq!(refs.last().map(String::as_str), Some(last_id.as_str()));
            assert_eq!(refs.len(), references.len() + 1);
            references = refs;
            last_id = new_id;
        }
        assert_eq!(references.len(), 5);
    }

    #[test]
    fn references_are_deduplicated() {
        let prior = vec![
            "a@x".to_string(),
            "b@x".to_string(),
            "a@x".to_string(),
        ];
        let (_, refs) = build_threaded_reply(Some("b@x"), &prior, "helpdesk.test");
        assert_eq!(refs, vec!["a@x".to_string(), "b@x".to_string()]);
    }

    #[test]
    fn composed_message_carries_bracketed_threading_headers() {
        let email = OutboundEmail {
            from: "Acme Support <support@acme.example>".to_string(),
            to: "ada@example.com".to_string(),
            subject: "Re: Ticket #7".to_string(),
            content: "We are on it.".to_string(),
            message_id: "123.abc@helpdesk.test".to_string(),
            in_reply_to: Some("cust-1@mail.test".to_string()),
            references: vec!["root@mail.test".to_string(), "cust-1@mail.test".to_string()],
        };
        let message = compose(&email).expect("compose");
        let raw = String::from_utf8(message.formatted()).expect("utf8");
        assert!(raw.contains("Message-ID: <123.abc@helpdesk.test>"));
        assert!(raw.contains("In-Reply-To: <cust-1@mail.test>"));
        assert!(raw.contains("References: <root@mail.test> <cust-1@mail.test>"));
    }

    #[test]
    fn compose_without_thread_headers_omits_them() {
        let email = OutboundEmail {
            from: "support@acme.example".to_string(),
            to: "ada@example.com".to_string(),
            subject: "Hello".to_string(),
            content: "hi".to_string(),
            message_id: generate_message_id("helpdesk.test"),
            in_reply_to: None,
            references: Vec::new(),
        };
        let raw = String::from_utf8(compose(&email).expect("compose").formatted()).expect("utf8");
        assert!(!raw.contains("In-Reply-To"));
        assert!(!raw.contains("References"));
    }
}
