use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::error::RepackError;
use crate::existence::ExistencePredicate;

pub const DEFAULT_CONFIG_FILE: &str = "bms-repack.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub facility: Option<String>,
    #[serde(default)]
    pub archive_prefix: Option<String>,
    #[serde(default)]
    pub room_file_prefix: Option<String>,
    #[serde(default)]
    pub expected_file_count: Option<usize>,
    #[serde(default)]
    pub timestamp_formats: Option<Vec<String>>,
    #[serde(default)]
    pub staging_dir: Option<String>,
    #[serde(default)]
    pub output_dir: Option<String>,
    #[serde(default)]
    pub header_block: Option<bool>,
    #[serde(default)]
    pub existence: Option<ExistencePredicate>,
    #[serde(default)]
    pub on_missing_archive: Option<MissingArchivePolicy>,
    #[serde(default)]
    pub repository: Option<RepositoryEntry>,
    #[serde(default)]
    pub publish: Option<PublishEntry>,
    #[serde(default)]
    pub notify: Option<NotifyEntry>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RepositoryEntry {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub token_env: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct PublishEntry {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default, rename = "type")]
    pub file_type: Option<String>,
    #[serde(default)]
    pub experiment_id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub label_names: Option<Vec<String>>,
    #[serde(default)]
    pub creator_email: Option<String>,
    #[serde(default)]
    pub contributor_names: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct NotifyEntry {
    pub api_url: String,
    #[serde(default)]
    pub api_key_env: Option<String>,
    pub from: String,
    pub to: Vec<String>,
    #[serde(default)]
    pub subject_prefix: Option<String>,
}

/// What to do when the search for a day's archive is not exactly one hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingArchivePolicy {
    #[default]
    Abort,
    Skip,
}

#[derive(Debug, Clone)]
pub struct RepositorySettings {
    pub base_url: String,
    pub token_env: String,
    pub timeout: Duration,
}

impl RepositorySettings {
    pub fn search_url(&self) -> String {
        format!("{}/data_files/api_search", self.base_url)
    }

    pub fn create_url(&self) -> String {
        format!("{}/data_files/api_create", self.base_url)
    }
}

#[derive(Debug, Clone)]
pub struct PublishSettings {
    pub enabled: bool,
    pub file_type: String,
    pub experiment_id: String,
    pub description: String,
    pub label_names: Vec<String>,
    pub creator_email: String,
    pub contributor_names: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct NotifySettings {
    pub api_url: String,
    pub api_key_env: String,
    pub from: String,
    pub to: Vec<String>,
    pub subject_prefix: String,
}

/// Immutable settings shared by every stage of a run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub schema_version: u32,
    pub facility: String,
    pub archive_prefix: String,
    pub room_file_prefix: String,
    pub expected_file_count: usize,
    pub timestamp_formats: Vec<String>,
    pub staging_dir: Utf8PathBuf,
    pub output_dir: Utf8PathBuf,
    pub header_block: bool,
    pub existence: ExistencePredicate,
    pub on_missing_archive: MissingArchivePolicy,
    pub repository: RepositorySettings,
    pub publish: PublishSettings,
    pub notify: Option<NotifySettings>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path`, or `bms-repack.json` from the current directory when it
    /// exists. Without either, built-in defaults are used.
    pub fn resolve(path: Option<&str>) -> Result<RunConfig, RepackError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if !config_path.exists() {
            if path.is_some() {
                return Err(RepackError::ConfigRead(config_path));
            }
            tracing::debug!("no {DEFAULT_CONFIG_FILE} found, using defaults");
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| RepackError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| RepackError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<RunConfig, RepackError> {
        let schema_version = config.schema_version.unwrap_or(1);
        if schema_version != 1 {
            return Err(RepackError::ConfigParse(format!(
                "unsupported schema_version {schema_version}"
            )));
        }

        let facility = config.facility.unwrap_or_else(|| "S39".to_string());
        let archive_prefix = config
            .archive_prefix
            .unwrap_or_else(|| format!("BMS_{facility}"));
        let room_file_prefix = config
            .room_file_prefix
            .unwrap_or_else(|| format!("hawk-{}_ac_room_", facility.to_lowercase()));

        let timestamp_formats = config
            .timestamp_formats
            .filter(|formats| !formats.is_empty())
            .unwrap_or_else(default_timestamp_formats);

        let repository = config.repository.unwrap_or_default();
        let repository = RepositorySettings {
            base_url: repository
                .base_url
                .unwrap_or_else(|| "https://hiev.westernsydney.edu.au".to_string())
                .trim_end_matches('/')
                .to_string(),
            token_env: repository
                .token_env
                .unwrap_or_else(|| "HIEV_API_KEY".to_string()),
            timeout: Duration::from_secs(repository.timeout_secs.unwrap_or(300)),
        };

        let publish = config.publish.unwrap_or_default();
        let publish = PublishSettings {
            enabled: publish.enabled.unwrap_or(false),
            file_type: publish.file_type.unwrap_or_else(|| "PROCESSED".to_string()),
            experiment_id: publish.experiment_id.unwrap_or_default(),
            description: publish.description.unwrap_or_else(|| {
                format!(
                    "Environmental variables (temperature, humidity, CO2) for {facility} rooms at 5-minute resolution, derived from BMS exports."
                )
            }),
            label_names: publish.label_names.unwrap_or_else(|| {
                vec![
                    "Temperature".to_string(),
                    "Humidity".to_string(),
                    "CO2".to_string(),
                ]
            }),
            creator_email: publish.creator_email.unwrap_or_default(),
            contributor_names: publish.contributor_names.unwrap_or_default(),
        };

        let notify = config.notify.map(|entry| NotifySettings {
            api_url: entry.api_url,
            api_key_env: entry
                .api_key_env
                .unwrap_or_else(|| "MAILTRAP_API_KEY".to_string()),
            from: entry.from,
            to: entry.to,
            subject_prefix: entry
                .subject_prefix
                .unwrap_or_else(|| format!("[{facility} BMS repack]")),
        });

        Ok(RunConfig {
            schema_version,
            archive_prefix,
            room_file_prefix,
            expected_file_count: config.expected_file_count.unwrap_or(28),
            timestamp_formats,
            staging_dir: Utf8PathBuf::from(
                config.staging_dir.unwrap_or_else(|| "raw_data".to_string()),
            ),
            output_dir: Utf8PathBuf::from(
                config.output_dir.unwrap_or_else(|| "output_data".to_string()),
            ),
            header_block: config.header_block.unwrap_or(true),
            existence: config.existence.unwrap_or_default(),
            on_missing_archive: config.on_missing_archive.unwrap_or_default(),
            repository,
            publish,
            notify,
            facility,
        })
    }
}

pub fn default_timestamp_formats() -> Vec<String> {
    vec![
        "%d/%m/%Y %H:%M:%S".to_string(),
        "%d/%m/%Y %H:%M".to_string(),
        "%Y-%m-%d %H:%M:%S".to_string(),
    ]
}

/// Reads a secret from the environment, rejecting blank values.
pub fn read_secret(var: &str) -> Result<String, RepackError> {
    std::env::var(var)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| RepackError::MissingSecret(var.to_string()))
}
