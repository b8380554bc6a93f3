use reqwest::Client;
use serde::Serialize;
use tracing::{error, info};

use crate::config::Config;
use crate::database::models::Round;
use crate::error::AppError;

/// Sends transactional email through an HTTP mail API.
///
/// Delivery is fire-and-forget: callers use [`Mailer::dispatch`], which
/// spawns the send onto the runtime and logs the outcome. A round's picks
/// never wait on (or fail because of) the mail provider.
#[derive(Debug, Clone)]
pub struct Mailer {
    client: Client,
    api_url: String,
    api_key: String,
    from: String,
    base_url: String,
}

#[derive(Serialize)]
struct MailPayload<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    html: &'a str,
}

impl Mailer {
    pub fn new(config: &Config) -> Self {
        Self {
            client: Client::new(),
            api_url: config.mail_api_url.clone(),
            api_key: config.mail_api_key.clone(),
            from: config.mail_from.clone(),
            base_url: config.base_url.clone(),
        }
    }

    /// Queues an email and returns immediately.
    pub fn dispatch(&self, to: String, subject: String, html: String) {
        let mailer = self.clone();
        tokio::spawn(async move {
            match mailer.send(&to, &subject, &html).await {
                Ok(()) => info!("Sent \"{subject}\" to {to}"),
                Err(e) => error!("Failed to send \"{subject}\" to {to}: {e}"),
            }
        });
    }

    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<(), AppError> {
        if self.api_url.is_empty() {
            info!("Mail API not configured, dropping \"{subject}\" to {to}");
            return Ok(());
        }

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&MailPayload {
                from: &self.from,
                to,
                subject,
                html,
            })
            .send()
            .await
            .map_err(anyhow::Error::from)?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "Mail API responded with status {}",
                response.status()
            )
            .into());
        }
        Ok(())
    }

    /// Builds the subject and body of a round's magic-link invite.
    pub fn pick_invite(&self, round: &Round, recipient_name: &str, token: &str) -> (String, String) {
        let link = format!("{}/picks/{}", self.base_url, token);
        let subject = format!("Make your {} picks!", round.sport);
        let html = format!(
            "<p>Hi {recipient_name},</p>\
             <p>The {} round is open. Picks lock at {}.</p>\
             <p><a href=\"{link}\">Go make your picks</a></p>",
            round.sport,
            round.lock_time.format("%Y-%m-%d %H:%M UTC"),
        );
        (subject, html)
    }
}
