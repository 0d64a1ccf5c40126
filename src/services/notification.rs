//! Run notifications
//!
//! Live events (status changes, log updates) go out on a broadcast channel;
//! failure e-mails go to the task owner over SMTP. Every method is fire and
//! forget: a notification problem is logged and never fails a run.

use std::sync::Arc;

use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::MailConfig;
use crate::models::{TaskStatus, User};

/// Event for live observers of backup runs
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BackupEvent {
    StatusChanged { task_id: i64, status: TaskStatus },
    LogCreated { task_id: i64, log_id: i64 },
    LogAppended { task_id: i64, text: String },
}

/// Receives notifications emitted during a run
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify_failure(&self, user: &User, task_label: &str, message: &str);
    fn status_changed(&self, task_id: i64, status: TaskStatus);
    fn log_created(&self, task_id: i64, log_id: i64);
    fn log_appended(&self, task_id: i64, text: &str);
}

/// Broadcast events plus optional failure e-mails
#[derive(Clone)]
pub struct NotificationService {
    broadcast: Arc<broadcast::Sender<BackupEvent>>,
    mailer: Option<Arc<Mailer>>,
}

impl NotificationService {
    pub fn new(mailer: Option<Mailer>) -> Self {
        let (tx, _) = broadcast::channel(1000);
        Self {
            broadcast: Arc::new(tx),
            mailer: mailer.map(Arc::new),
        }
    }

    /// Subscribe to run events
    pub fn subscribe(&self) -> broadcast::Receiver<BackupEvent> {
        self.broadcast.subscribe()
    }

    fn emit(&self, event: BackupEvent) {
        debug!(?event, "Backup event");
        // No subscribers is not an error
        let _ = self.broadcast.send(event);
    }
}

#[async_trait]
impl NotificationSink for NotificationService {
    async fn notify_failure(&self, user: &User, task_label: &str, message: &str) {
        let Some(mailer) = &self.mailer else {
            info!(
                user_id = user.id,
                task = task_label,
                "Mail is not configured; failure e-mail not sent"
            );
            return;
        };

        if let Err(e) = mailer.send_failure(user, task_label, message).await {
            warn!(user_id = user.id, task = task_label, "Failed to send failure e-mail: {}", e);
        }
    }

    fn status_changed(&self, task_id: i64, status: TaskStatus) {
        self.emit(BackupEvent::StatusChanged { task_id, status });
    }

    fn log_created(&self, task_id: i64, log_id: i64) {
        self.emit(BackupEvent::LogCreated { task_id, log_id });
    }

    fn log_appended(&self, task_id: i64, text: &str) {
        self.emit(BackupEvent::LogAppended {
            task_id,
            text: text.to_string(),
        });
    }
}

/// SMTP sender for failure e-mails
pub struct Mailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl Mailer {
    pub fn from_config(config: &MailConfig) -> anyhow::Result<Self> {
        let builder = if config.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)?
        };

        let builder = builder.port(config.smtp_port);
        let builder = match (&config.smtp_username, &config.smtp_password) {
            (Some(user), Some(pass)) => {
                builder.credentials(Credentials::new(user.clone(), pass.clone()))
            }
            _ => builder,
        };

        Ok(Self {
            transport: builder.build(),
            from: config.from_address.parse()?,
        })
    }

    async fn send_failure(
        &self,
        user: &User,
        task_label: &str,
        message: &str,
    ) -> anyhow::Result<()> {
        let email = failure_email(&self.from, user, task_label, message)?;
        self.transport.send(email).await?;
        info!(user_id = user.id, task = task_label, "Failure e-mail sent");
        Ok(())
    }
}

/// Plain-text failure e-mail addressed to the task owner
pub fn failure_email(
    from: &Mailbox,
    user: &User,
    task_label: &str,
    message: &str,
) -> anyhow::Result<Message> {
    let to = Mailbox::new(Some(user.name.clone()), user.email.parse()?);
    let body = format!(
        "Hello {},\n\nThe backup task \"{}\" failed.\n\n{}\n",
        user.name, task_label, message
    );

    Ok(Message::builder()
        .from(from.clone())
        .to(to)
        .subject(format!("Backup task failed: {}", task_label))
        .header(ContentType::TEXT_PLAIN)
        .body(body)?)
}
