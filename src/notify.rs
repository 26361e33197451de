use std::fmt;

use reqwest::blocking::Client;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;
use serde_json::{Value, json};

use crate::config::{NotifySettings, read_secret};
use crate::error::RepackError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Category {
    Success,
    Error,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Success => write!(f, "Success"),
            Category::Error => write!(f, "Error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub category: Category,
    pub message: String,
}

impl Notification {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            category: Category::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            category: Category::Error,
            message: message.into(),
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification) -> Result<(), RepackError>;
}

impl<N: Notifier + ?Sized> Notifier for Box<N> {
    fn notify(&self, notification: &Notification) -> Result<(), RepackError> {
        (**self).notify(notification)
    }
}

/// Writes notifications to the log only. Used when no mail API is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: &Notification) -> Result<(), RepackError> {
        match notification.category {
            Category::Success => tracing::info!(body = %notification.message, "run notification"),
            Category::Error => tracing::error!(body = %notification.message, "run notification"),
        }
        Ok(())
    }
}

/// Sends notifications through a Mailtrap-style JSON send endpoint.
pub struct MailNotifier {
    client: Client,
    settings: NotifySettings,
    api_key: String,
}

impl MailNotifier {
    pub fn new(settings: &NotifySettings, api_key: String) -> Result<Self, RepackError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("bms-repack/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| RepackError::NotifyHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|err| RepackError::NotifyHttp(err.to_string()))?;
        Ok(Self {
            client,
            settings: settings.clone(),
            api_key,
        })
    }

    /// Reads the API key from the configured environment variable.
    pub fn from_settings(settings: &NotifySettings) -> Result<Self, RepackError> {
        let api_key = read_secret(&settings.api_key_env)?;
        Self::new(settings, api_key)
    }

    pub fn payload(&self, notification: &Notification) -> Value {
        let to = self
            .settings
            .to
            .iter()
            .map(|email| json!({ "email": email }))
            .collect::<Vec<_>>();
        json!({
            "from": { "email": self.settings.from },
            "to": to,
            "subject": format!("{} {}", self.settings.subject_prefix, notification.category),
            "text": notification.message,
        })
    }
}

impl Notifier for MailNotifier {
    fn notify(&self, notification: &Notification) -> Result<(), RepackError> {
        let response = self
            .client
            .post(&self.settings.api_url)
            .header(CONTENT_TYPE, "application/json")
            .header("Api-Token", &self.api_key)
            .body(self.payload(notification).to_string())
            .send()
            .map_err(|err| RepackError::NotifyHttp(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "mail request failed".to_string());
            return Err(RepackError::NotifyStatus { status, message });
        }
        tracing::debug!(category = %notification.category, "notification sent");
        Ok(())
    }
}
