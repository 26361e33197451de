use camino::Utf8PathBuf;
use chrono::NaiveDate;
use serde::Serialize;

use crate::domain::ArchiveName;
use crate::error::RepackError;
use crate::repository::{RemoteEntry, RepositoryClient, SearchQuery};

/// A daily archive resolved on the repository.
#[derive(Debug, Clone, Serialize)]
pub struct Archive {
    pub filename: String,
    pub date: NaiveDate,
    #[serde(skip)]
    pub entry: RemoteEntry,
}

impl Archive {
    pub fn staging_path(&self, staging_dir: &camino::Utf8Path) -> Utf8PathBuf {
        staging_dir.join(&self.filename)
    }
}

pub struct ArchiveLocator<'a, C: RepositoryClient> {
    client: &'a C,
    prefix: &'a str,
}

impl<'a, C: RepositoryClient> ArchiveLocator<'a, C> {
    pub fn new(client: &'a C, prefix: &'a str) -> Self {
        Self { client, prefix }
    }

    pub fn expected_name(&self, date: NaiveDate) -> ArchiveName {
        ArchiveName::new(self.prefix, date)
    }

    /// Finds the single archive uploaded for `date`.
    pub fn locate(&self, date: NaiveDate) -> Result<Archive, RepackError> {
        let filename = self.expected_name(date).to_string();
        let archive = self.single(SearchQuery::filename(&filename), &filename)?;
        if archive.date != date {
            tracing::warn!(
                requested = %date,
                returned = %archive.date,
                "archive date differs from the requested date"
            );
        }
        Ok(archive)
    }

    /// Finds the single archive uploaded in `[from, to]`, whatever day it
    /// covers. This is how the daily schedule picks up the newest export.
    pub fn locate_uploaded(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Archive, RepackError> {
        let prefix = format!("{}_", self.prefix.trim_end_matches('_'));
        let query = SearchQuery::filename(&prefix).uploaded_between(from, to);
        self.single(query, &format!("{prefix}* uploaded {from}..{to}"))
    }

    fn single(&self, query: SearchQuery, label: &str) -> Result<Archive, RepackError> {
        let mut results = self.client.search(&query)?;

        if results.len() != 1 {
            tracing::error!(
                filename = %label,
                count = results.len(),
                "archive search did not return exactly one result"
            );
            return Err(RepackError::ArchiveCardinality {
                filename: label.to_string(),
                count: results.len(),
            });
        }

        let entry = results.remove(0);
        let name = ArchiveName::parse(&entry.filename)?;
        tracing::info!(filename = %entry.filename, "archive located");

        Ok(Archive {
            filename: entry.filename.clone(),
            date: name.date(),
            entry,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use assert_matches::assert_matches;

    use super::*;
    use crate::repository::UploadMetadata;

    struct FixedSearch(Vec<RemoteEntry>);

    impl RepositoryClient for FixedSearch {
        fn search(&self, _query: &SearchQuery) -> Result<Vec<RemoteEntry>, RepackError> {
            Ok(self.0.clone())
        }

        fn download(&self, _entry: &RemoteEntry, _destination: &Path) -> Result<u64, RepackError> {
            Err(RepackError::RepositoryHttp("not used".to_string()))
        }

        fn upload(&self, _file: &Path, _metadata: &UploadMetadata) -> Result<(), RepackError> {
            Err(RepackError::RepositoryHttp("not used".to_string()))
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2017, 11, 1).unwrap()
    }

    #[test]
    fn locates_single_match() {
        let client = FixedSearch(vec![RemoteEntry::new(
            "BMS_S39_2017_11_01.zip",
            "https://repo/data_files/1/download",
        )]);
        let archive = ArchiveLocator::new(&client, "BMS_S39").locate(date()).unwrap();
        assert_eq!(archive.filename, "BMS_S39_2017_11_01.zip");
        assert_eq!(archive.date, date());
    }

    #[test]
    fn zero_matches_is_cardinality_error() {
        let client = FixedSearch(Vec::new());
        let err = ArchiveLocator::new(&client, "BMS_S39")
            .locate(date())
            .unwrap_err();
        assert_matches!(err, RepackError::ArchiveCardinality { count: 0, .. });
    }

    #[test]
    fn many_matches_is_cardinality_error() {
        let entry = RemoteEntry::new("BMS_S39_2017_11_01.zip", "https://repo/1");
        let client = FixedSearch(vec![entry.clone(), entry]);
        let err = ArchiveLocator::new(&client, "BMS_S39")
            .locate(date())
            .unwrap_err();
        assert_matches!(err, RepackError::ArchiveCardinality { count: 2, .. });
    }

    #[test]
    fn upload_window_takes_date_from_the_archive_name() {
        let client = FixedSearch(vec![RemoteEntry::new(
            "BMS_S39_2017_10_30.zip",
            "https://repo/data_files/7/download",
        )]);
        let archive = ArchiveLocator::new(&client, "BMS_S39")
            .locate_uploaded(date(), date().succ_opt().unwrap())
            .unwrap();
        assert_eq!(archive.date, NaiveDate::from_ymd_opt(2017, 10, 30).unwrap());
    }

    #[test]
    fn upload_window_needs_exactly_one_archive() {
        let client = FixedSearch(Vec::new());
        let err = ArchiveLocator::new(&client, "BMS_S39")
            .locate_uploaded(date(), date().succ_opt().unwrap())
            .unwrap_err();
        assert_matches!(err, RepackError::ArchiveCardinality { count: 0, .. });
    }

    #[test]
    fn unparseable_result_name_is_rejected() {
        let client = FixedSearch(vec![RemoteEntry::new("BMS_S39_latest.zip", "https://repo/1")]);
        let err = ArchiveLocator::new(&client, "BMS_S39")
            .locate(date())
            .unwrap_err();
        assert_matches!(err, RepackError::InvalidArchiveName(_));
    }
}
