use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::{error, info, instrument, warn};

use crate::config::MailConfig;

/// A plain-text message ready to hand to a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl OutgoingMail {
    pub fn welcome(to: &str, first_name: &str) -> Self {
        Self {
            to: to.to_string(),
            subject: "Welcome to the Research Portal".to_string(),
            body: format!(
                "Hello {first_name},\n\n\
                 Your research portal account has been created. \
                 You can now sign in with your username or email.\n"
            ),
        }
    }

    pub fn reset_code(to: &str, code: &str, ttl_minutes: i64) -> Self {
        Self {
            to: to.to_string(),
            subject: "Your password reset code".to_string(),
            body: format!(
                "Your password reset code is {code}.\n\n\
                 It expires in {ttl_minutes} minutes. \
                 If you did not ask for a reset, ignore this message.\n"
            ),
        }
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: OutgoingMail) -> anyhow::Result<()>;
}

/// Sends in the background; the request never waits on SMTP.
pub fn dispatch(mailer: Arc<dyn Mailer>, mail: OutgoingMail) {
    tokio::spawn(async move {
        let to = mail.to.clone();
        if let Err(e) = mailer.send(mail).await {
            error!(error = ?e, to = %to, "mail delivery failed");
        }
    });
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(host: &str, cfg: &MailConfig) -> anyhow::Result<Self> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .with_context(|| format!("smtp relay {host}"))?
            .port(cfg.port);
        if let (Some(user), Some(pass)) = (&cfg.username, &cfg.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }
        let from = cfg
            .from
            .parse::<Mailbox>()
            .with_context(|| format!("invalid MAIL_FROM {:?}", cfg.from))?;
        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    #[instrument(skip(self, mail), fields(to = %mail.to, subject = %mail.subject))]
    async fn send(&self, mail: OutgoingMail) -> anyhow::Result<()> {
        let to = mail
            .to
            .parse::<Mailbox>()
            .with_context(|| format!("invalid recipient {:?}", mail.to))?;
        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(mail.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(mail.body)
            .context("build message")?;
        self.transport.send(message).await.context("smtp send")?;
        info!("mail sent");
        Ok(())
    }
}

/// Used when no SMTP host is configured.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, mail: OutgoingMail) -> anyhow::Result<()> {
        warn!(to = %mail.to, subject = %mail.subject, "SMTP not configured; mail dropped");
        Ok(())
    }
}

pub fn from_config(cfg: &MailConfig) -> anyhow::Result<Arc<dyn Mailer>> {
    match cfg.host.as_deref() {
        Some(host) => Ok(Arc::new(SmtpMailer::new(host, cfg)?)),
        None => Ok(Arc::new(LogMailer)),
    }
}

/// Captures outgoing mail on a channel.
#[cfg(test)]
pub struct RecordingMailer(pub tokio::sync::mpsc::UnboundedSender<OutgoingMail>);

#[cfg(test)]
#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, mail: OutgoingMail) -> anyhow::Result<()> {
        self.0.send(mail).context("recording channel closed")?;
        Ok(())
    }
}
