use serde::Serialize;

use crate::error::{Issue, RepackError};
use crate::fs_util;
use crate::locator::Archive;
use crate::repository::RepositoryClient;
use crate::store::Store;

#[derive(Debug, Clone, Serialize)]
pub struct FetchOutcome {
    pub archive: String,
    pub bytes: u64,
    pub extracted: Vec<String>,
    pub issues: Vec<Issue>,
}

pub struct ArchiveFetcher<'a, C: RepositoryClient> {
    client: &'a C,
    store: &'a Store,
    expected_file_count: usize,
}

impl<'a, C: RepositoryClient> ArchiveFetcher<'a, C> {
    pub fn new(client: &'a C, store: &'a Store, expected_file_count: usize) -> Self {
        Self {
            client,
            store,
            expected_file_count,
        }
    }

    /// Downloads `archive` into staging and unpacks it next to the zip.
    ///
    /// A short file count is reported as an issue, not an error: the rooms
    /// that are present can still be processed.
    pub fn fetch(&self, archive: &Archive) -> Result<FetchOutcome, RepackError> {
        let staging = self.store.staging_root();
        let zip_path = archive.staging_path(staging);

        let bytes = self
            .client
            .download(&archive.entry, zip_path.as_std_path())?;
        tracing::info!(filename = %archive.filename, bytes, "zip file downloaded");

        let extracted = fs_util::extract_zip(zip_path.as_std_path(), staging.as_std_path())?;

        let mut issues = Vec::new();
        if extracted.len() < self.expected_file_count {
            let issue = Issue::ExtractedFileCount {
                found: extracted.len(),
                expected: self.expected_file_count,
            };
            tracing::error!("{issue}");
            issues.push(issue);
        } else {
            tracing::info!("{} files extracted from zipfile", extracted.len());
        }

        Ok(FetchOutcome {
            archive: archive.filename.clone(),
            bytes,
            extracted,
            issues,
        })
    }
}
