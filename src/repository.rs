use std::path::Path;

use chrono::NaiveDate;
use reqwest::blocking::Client;
use reqwest::blocking::multipart::Form;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::RepositorySettings;
use crate::error::RepackError;

/// Filter sent to the repository search endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub filename: String,
    pub upload_from_date: Option<NaiveDate>,
    pub upload_to_date: Option<NaiveDate>,
}

impl SearchQuery {
    pub fn filename(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            upload_from_date: None,
            upload_to_date: None,
        }
    }

    pub fn uploaded_between(mut self, from: NaiveDate, to: NaiveDate) -> Self {
        self.upload_from_date = Some(from);
        self.upload_to_date = Some(to);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub filename: String,
    pub url: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RemoteEntry {
    pub fn new(filename: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            url: url.into(),
            extra: Map::new(),
        }
    }

    /// Upload timestamp reported by the repository, ISO 8601.
    pub fn created_at(&self) -> Option<&str> {
        self.extra.get("created_at").and_then(Value::as_str)
    }

    pub fn id(&self) -> Option<u64> {
        self.extra.get("id").and_then(Value::as_u64)
    }
}

/// Descriptive fields attached to an uploaded file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadMetadata {
    #[serde(rename = "type")]
    pub file_type: String,
    pub experiment_id: String,
    pub start_time: String,
    pub end_time: String,
    pub description: String,
    pub label_names: String,
    pub creator_email: String,
    pub contributor_names: Vec<String>,
}

pub trait RepositoryClient: Send + Sync {
    fn search(&self, query: &SearchQuery) -> Result<Vec<RemoteEntry>, RepackError>;
    /// Writes the entry's content to `destination`, returning the byte count.
    fn download(&self, entry: &RemoteEntry, destination: &Path) -> Result<u64, RepackError>;
    fn upload(&self, file: &Path, metadata: &UploadMetadata) -> Result<(), RepackError>;
}

#[derive(Serialize)]
struct SearchPayload<'a> {
    auth_token: &'a str,
    filename: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    upload_from_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    upload_to_date: Option<String>,
}

/// Blocking client for the HIEv data repository API.
#[derive(Clone)]
pub struct HievHttpClient {
    client: Client,
    settings: RepositorySettings,
    token: String,
}

impl HievHttpClient {
    pub fn new(settings: &RepositorySettings, token: String) -> Result<Self, RepackError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("bms-repack/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| RepackError::RepositoryHttp(err.to_string()))?,
        );
        headers.insert("X-Accept", HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(settings.timeout)
            .build()
            .map_err(|err| RepackError::RepositoryHttp(err.to_string()))?;

        Ok(Self {
            client,
            settings: settings.clone(),
            token,
        })
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, RepackError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "repository request failed".to_string());
        Err(RepackError::RepositoryStatus { status, message })
    }
}

impl RepositoryClient for HievHttpClient {
    fn search(&self, query: &SearchQuery) -> Result<Vec<RemoteEntry>, RepackError> {
        let payload = SearchPayload {
            auth_token: &self.token,
            filename: &query.filename,
            upload_from_date: query.upload_from_date.map(|date| date.to_string()),
            upload_to_date: query.upload_to_date.map(|date| date.to_string()),
        };
        tracing::debug!(filename = %query.filename, "repository search");
        let response = self
            .client
            .post(self.settings.search_url())
            .header(CONTENT_TYPE, "application/json; charset=UTF-8")
            .header(ACCEPT, "application/json")
            .json(&payload)
            .send()
            .map_err(|err| RepackError::RepositoryHttp(err.to_string()))?;
        let response = Self::handle_status(response)?;
        response
            .json::<Vec<RemoteEntry>>()
            .map_err(|err| RepackError::RepositoryHttp(format!("malformed search response: {err}")))
    }

    fn download(&self, entry: &RemoteEntry, destination: &Path) -> Result<u64, RepackError> {
        tracing::debug!(filename = %entry.filename, "repository download");
        let response = self
            .client
            .get(&entry.url)
            .query(&[("auth_token", self.token.as_str())])
            .send()
            .map_err(|err| RepackError::RepositoryHttp(err.to_string()))?;
        let mut response = Self::handle_status(response)?;

        let parent = destination
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent).map_err(|err| RepackError::Filesystem(err.to_string()))?;
        let mut file = tempfile::Builder::new()
            .prefix(".bms-repack-download")
            .tempfile_in(parent)
            .map_err(|err| RepackError::Filesystem(err.to_string()))?;
        let bytes = std::io::copy(&mut response, &mut file)
            .map_err(|err| RepackError::RepositoryHttp(err.to_string()))?;
        file.persist(destination)
            .map_err(|err| RepackError::Filesystem(err.to_string()))?;
        Ok(bytes)
    }

    fn upload(&self, file: &Path, metadata: &UploadMetadata) -> Result<(), RepackError> {
        let mut form = Form::new()
            .text("auth_token", self.token.clone())
            .text("type", metadata.file_type.clone())
            .text("experiment_id", metadata.experiment_id.clone())
            .text("start_time", metadata.start_time.clone())
            .text("end_time", metadata.end_time.clone())
            .text("description", metadata.description.clone())
            .text("label_names", metadata.label_names.clone())
            .text("creator_email", metadata.creator_email.clone());
        for name in &metadata.contributor_names {
            form = form.text("contributor_names[]", name.clone());
        }
        let form = form
            .file("file", file)
            .map_err(|err| RepackError::Filesystem(format!("{}: {err}", file.display())))?;

        tracing::debug!(file = %file.display(), "repository upload");
        let response = self
            .client
            .post(self.settings.create_url())
            .multipart(form)
            .send()
            .map_err(|err| RepackError::RepositoryHttp(err.to_string()))?;
        Self::handle_status(response)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_payload_omits_empty_window() {
        let payload = SearchPayload {
            auth_token: "token",
            filename: "BMS_S39_2017_11_01.zip",
            upload_from_date: None,
            upload_to_date: None,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"auth_token": "token", "filename": "BMS_S39_2017_11_01.zip"})
        );
    }

    #[test]
    fn remote_entry_keeps_extra_fields() {
        let raw = r#"[{"filename": "a.zip", "url": "https://x/1", "file_id": 7}]"#;
        let entries: Vec<RemoteEntry> = serde_json::from_str(raw).unwrap();
        assert_eq!(entries[0].filename, "a.zip");
        assert_eq!(entries[0].extra.get("file_id"), Some(&Value::from(7)));
    }
}
