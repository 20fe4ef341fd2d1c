//! Transactional email client used to send newsletters.
//!
//! Talks to a Resend-style HTTP API: `POST {api_url}/emails` with a bearer key
//! and a `{from, to, subject, html}` JSON body. One request per recipient, no
//! retries; the first failure aborts the run.

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::Serialize;

use crate::config::EmailConfig;
use crate::errors::AppError;

#[derive(Debug, Serialize)]
struct OutgoingEmail<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

/// Email API client. Without an API key it runs dry and only logs.
#[derive(Clone)]
pub struct EmailClient {
    client: Option<reqwest::Client>,
    api_url: String,
    from_address: String,
}

impl EmailClient {
    pub fn new(config: &EmailConfig) -> Result<Self, AppError> {
        let client = match &config.api_key {
            Some(key) => {
                let mut headers = HeaderMap::new();
                let auth_value = HeaderValue::from_str(&format!("Bearer {}", key))
                    .map_err(|e| AppError::Internal(format!("Invalid email API key format: {}", e)))?;
                headers.insert(AUTHORIZATION, auth_value);

                Some(
                    reqwest::Client::builder()
                        .default_headers(headers)
                        .timeout(std::time::Duration::from_secs(15))
                        .build()?,
                )
            }
            None => None,
        };

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            from_address: config.from_address.clone(),
        })
    }

    pub fn is_dry_run(&self) -> bool {
        self.client.is_none()
    }

    /// Send one message to each recipient. Returns how many were accepted.
    pub async fn send_to_all(
        &self,
        recipients: &[String],
        subject: &str,
        html: &str,
    ) -> Result<usize, AppError> {
        let Some(client) = &self.client else {
            for recipient in recipients {
                tracing::info!(to = %recipient, subject = %subject, "Email API not configured, skipping send");
            }
            return Ok(recipients.len());
        };

        let url = format!("{}/emails", self.api_url);
        for (sent, recipient) in recipients.iter().enumerate() {
            let body = OutgoingEmail {
                from: &self.from_address,
                to: [recipient.as_str()],
                subject,
                html,
            };

            let response = client.post(&url).json(&body).send().await?;
            let status = response.status();
            if !status.is_success() {
                let detail = response.text().await.unwrap_or_default();
                tracing::error!(to = %recipient, %status, "Email API rejected message");
                return Err(AppError::Email(format!(
                    "Email API returned {} for {} after {} sent: {}",
                    status, recipient, sent, detail
                )));
            }
        }

        tracing::info!(recipients = recipients.len(), subject = %subject, "Emails sent");
        Ok(recipients.len())
    }
}
