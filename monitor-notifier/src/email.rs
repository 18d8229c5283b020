use crate::{Notification, NotificationChannel};
use async_trait::async_trait;
use lettre::{
    message::{Mailbox, MultiPart},
    transport::smtp::{self, authentication::Credentials},
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use monitor_anomaly::Alert;
use monitor_core::{EmailConfig, MonitorError, Result};
use std::fmt::Write;
use tracing::{error, info, warn};

/// Mails each divergence alert to every configured recipient in one message.
///
/// Addresses are parsed once up front; unparseable recipients are logged and
/// dropped, and an unparseable sender disables the channel.
#[derive(Debug)]
pub struct EmailNotifier {
    sender: Option<Mailbox>,
    recipients: Vec<Mailbox>,
    mailer: Option<AsyncSmtpTransport<Tokio1Executor>>,
}

impl EmailNotifier {
    pub fn new(config: EmailConfig) -> Self {
        if !config.enabled {
            return Self {
                sender: None,
                recipients: Vec::new(),
                mailer: None,
            };
        }

        let sender = match config.from_address.parse::<Mailbox>() {
            Ok(mailbox) => Some(mailbox),
            Err(e) => {
                warn!("Invalid sender address {:?}: {}", config.from_address, e);
                None
            }
        };

        let mailer = match build_transport(&config) {
            Ok(transport) => Some(transport),
            Err(e) => {
                error!("Failed to set up SMTP relay {}: {}", config.smtp_host, e);
                None
            }
        };

        Self {
            sender,
            recipients: parse_recipients(&config.to_addresses),
            mailer,
        }
    }

    fn build_message(&self, notification: &Notification) -> Result<Message> {
        let sender = self
            .sender
            .clone()
            .ok_or_else(|| MonitorError::Notification("Email sender not configured".to_string()))?;

        let alert = decode_alert(notification);
        let mut builder = Message::builder()
            .from(sender)
            .subject(format!("[{:?}] {}", notification.level, notification.title));
        for recipient in &self.recipients {
            builder = builder.to(recipient.clone());
        }

        builder
            .multipart(MultiPart::alternative_plain_html(
                plain_body(notification, alert.as_ref()),
                html_body(notification, alert.as_ref()),
            ))
            .map_err(|e| MonitorError::Notification(format!("Failed to build email: {}", e)))
    }
}

fn build_transport(
    config: &EmailConfig,
) -> std::result::Result<AsyncSmtpTransport<Tokio1Executor>, smtp::Error> {
    let builder = if config.use_tls {
        AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?
    } else {
        AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host)
    };

    let builder = builder.port(config.smtp_port);
    let builder = if config.username.is_empty() {
        builder
    } else {
        builder.credentials(Credentials::new(
            config.username.clone(),
            config.password.clone(),
        ))
    };

    Ok(builder.build())
}

fn parse_recipients(addresses: &[String]) -> Vec<Mailbox> {
    addresses
        .iter()
        .filter_map(|address| match address.parse::<Mailbox>() {
            Ok(mailbox) => Some(mailbox),
            Err(e) => {
                warn!("Dropping invalid recipient {:?}: {}", address, e);
                None
            }
        })
        .collect()
}

fn decode_alert(notification: &Notification) -> Option<Alert> {
    let data = notification.data.clone()?;
    serde_json::from_value(data).ok()
}

fn series(values: &[f64]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn plain_body(notification: &Notification, alert: Option<&Alert>) -> String {
    let mut body = format!(
        "{}\n\n{}\n\nDetected at: {}\n",
        notification.title,
        notification.message,
        notification.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
    );

    if let Some(alert) = alert {
        let _ = write!(
            body,
            "\nFunding rate:  {}\nOpen interest: {}\n24h volume:    {}\n\n\
             Funding fell {} times in a row: {}\n\
             Open interest rose {} times in a row: {}\n",
            alert.funding_rate,
            alert.open_interest,
            alert.volume,
            alert.consecutive_fr_decreases,
            series(&alert.funding_history),
            alert.consecutive_oi_increases,
            series(&alert.open_interest_history),
        );
    }

    body
}

fn html_body(notification: &Notification, alert: Option<&Alert>) -> String {
    let mut body = format!(
        "<html><body><h2>{}</h2><p>{}</p><p><em>Detected at {}</em></p>",
        notification.title,
        notification.message,
        notification.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
    );

    if let Some(alert) = alert {
        let _ = write!(
            body,
            "<p><strong>Funding rate:</strong> {} &middot; <strong>Open interest:</strong> {} \
             &middot; <strong>24h volume:</strong> {}</p>\
             <p>Funding fell {} times in a row while open interest rose {} times.</p>\
             <table border=\"1\" cellpadding=\"4\">\
             <tr><th>#</th><th>Funding rate</th><th>Open interest</th></tr>",
            alert.funding_rate,
            alert.open_interest,
            alert.volume,
            alert.consecutive_fr_decreases,
            alert.consecutive_oi_increases,
        );

        let rows = alert
            .funding_history
            .len()
            .max(alert.open_interest_history.len());
        let cell = |values: &[f64], i: usize| {
            values.get(i).map(|v| v.to_string()).unwrap_or_default()
        };
        for i in 0..rows {
            let _ = write!(
                body,
                "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
                i + 1,
                cell(&alert.funding_history, i),
                cell(&alert.open_interest_history, i),
            );
        }
        body.push_str("</table>");
    }

    body.push_str("</body></html>");
    body
}

#[async_trait]
impl NotificationChannel for EmailNotifier {
    async fn send(&self, notification: &Notification) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }

        let mailer = self
            .mailer
            .as_ref()
            .ok_or_else(|| MonitorError::Notification("Email mailer not initialized".to_string()))?;

        let message = self.build_message(notification)?;
        mailer
            .send(message)
            .await
            .map_err(|e| MonitorError::Notification(format!("SMTP send failed: {}", e)))?;

        info!(
            "Email alert for {} sent to {} recipients",
            notification.symbol,
            self.recipients.len()
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "Email"
    }

    fn is_enabled(&self) -> bool {
        self.mailer.is_some() && self.sender.is_some() && !self.recipients.is_empty()
    }
}
