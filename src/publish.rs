use std::collections::HashSet;
use std::fs::File;

use camino::Utf8Path;
use serde::Serialize;

use crate::config::PublishSettings;
use crate::domain::RemoteFileName;
use crate::error::RepackError;
use crate::existence::{RemoteStatus, WritePolicy};
use crate::record::{self, HeaderBlock, HeaderMode, RoomRecord, RoomRow};
use crate::repository::{RepositoryClient, UploadMetadata};
use crate::series::format_timestamp;
use crate::store::Store;

#[derive(Debug, Clone, Serialize)]
pub struct PublishOutcome {
    pub file: String,
    pub path: String,
    pub policy: WritePolicy,
    pub rows_written: usize,
    pub uploaded: bool,
}

pub struct PublishStep<'a, C: RepositoryClient> {
    client: &'a C,
    store: &'a Store,
    settings: &'a PublishSettings,
    header_block: bool,
    source: &'a str,
}

impl<'a, C: RepositoryClient> PublishStep<'a, C> {
    pub fn new(
        client: &'a C,
        store: &'a Store,
        settings: &'a PublishSettings,
        header_block: bool,
        source: &'a str,
    ) -> Self {
        Self {
            client,
            store,
            settings,
            header_block,
            source,
        }
    }

    /// Writes `record` into its monthly file and uploads the file when
    /// publishing is enabled.
    pub fn publish(
        &self,
        record: &RoomRecord,
        name: &RemoteFileName,
        remote: &RemoteStatus,
    ) -> Result<PublishOutcome, RepackError> {
        let file = name.to_string();
        let path = self.store.output_path(&file);
        let policy = WritePolicy::decide(remote.exists, path.as_std_path().exists());

        let rows_written = match policy {
            WritePolicy::Create => {
                let header = if self.header_block {
                    HeaderMode::Block(HeaderBlock::for_file(name, self.source))
                } else {
                    HeaderMode::ColumnNames
                };
                let bytes = record::to_csv_bytes(&record.rows, &header)?;
                Store::write_bytes_atomic(&path, &bytes)?;
                tracing::info!(file = %file, rows = record.rows.len(), "CSV file created");
                record.rows.len()
            }
            WritePolicy::Append => {
                if !path.as_std_path().exists() {
                    self.pull_remote_copy(remote, &path)?;
                }
                let existing: HashSet<_> = read_local(&path)?
                    .into_iter()
                    .map(|row| row.date_time)
                    .collect();
                let fresh: Vec<RoomRow> = record
                    .rows
                    .iter()
                    .filter(|row| !existing.contains(&row.date_time))
                    .copied()
                    .collect();
                if fresh.len() < record.rows.len() {
                    tracing::warn!(
                        file = %file,
                        duplicates = record.rows.len() - fresh.len(),
                        "rows already present in monthly file, not appended again"
                    );
                }
                if !fresh.is_empty() {
                    let bytes = record::to_csv_bytes(&fresh, &HeaderMode::None)?;
                    Store::append_bytes(&path, &bytes)?;
                }
                tracing::info!(file = %file, rows = fresh.len(), "CSV file appended");
                fresh.len()
            }
        };

        let uploaded = if self.settings.enabled && rows_written > 0 {
            self.upload(&path, &file)?;
            true
        } else {
            false
        };

        Ok(PublishOutcome {
            file,
            path: path.to_string(),
            policy,
            rows_written,
            uploaded,
        })
    }

    fn pull_remote_copy(&self, remote: &RemoteStatus, path: &Utf8Path) -> Result<(), RepackError> {
        let entry = remote.entry.as_ref().ok_or_else(|| {
            RepackError::RepositoryHttp(format!("no download entry for existing {path}"))
        })?;
        let bytes = Store::replace_with(path, |partial| self.client.download(entry, partial))?;
        tracing::info!(filename = %entry.filename, bytes, "existing monthly file downloaded");
        Ok(())
    }

    fn upload(&self, path: &Utf8Path, file: &str) -> Result<(), RepackError> {
        let rows = read_local(path)?;
        let metadata = self.metadata(&rows);
        self.client.upload(path.as_std_path(), &metadata)?;
        tracing::info!(file = %file, "file uploaded");
        Ok(())
    }

    pub fn metadata(&self, rows: &[RoomRow]) -> UploadMetadata {
        let span = |row: Option<&RoomRow>| {
            row.map(|row| format_timestamp(row.date_time))
                .unwrap_or_default()
        };
        UploadMetadata {
            file_type: self.settings.file_type.clone(),
            experiment_id: self.settings.experiment_id.clone(),
            start_time: span(rows.first()),
            end_time: span(rows.last()),
            description: self.settings.description.clone(),
            label_names: self.settings.label_names.join(","),
            creator_email: self.settings.creator_email.clone(),
            contributor_names: self.settings.contributor_names.clone(),
        }
    }
}

fn read_local(path: &Utf8Path) -> Result<Vec<RoomRow>, RepackError> {
    let file = File::open(path.as_std_path())
        .map_err(|err| RepackError::Filesystem(format!("{path}: {err}")))?;
    record::read_rows(file)
}
