use serde::{Deserialize, Serialize};

use crate::domain::RemoteFileName;
use crate::error::RepackError;
use crate::repository::{RemoteEntry, RepositoryClient, SearchQuery};

/// Rule turning a search hit count into "the file exists".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExistencePredicate {
    #[default]
    AtLeastOne,
    /// Only more than one hit counts as existing.
    MoreThanOne,
}

impl ExistencePredicate {
    pub fn exists(self, matches: usize) -> bool {
        match self {
            ExistencePredicate::AtLeastOne => matches >= 1,
            ExistencePredicate::MoreThanOne => matches > 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WritePolicy {
    /// New monthly file, opened with the header block.
    Create,
    /// Rows are added to an existing monthly file without any header.
    Append,
}

impl WritePolicy {
    pub fn decide(remote_exists: bool, local_exists: bool) -> Self {
        if remote_exists || local_exists {
            WritePolicy::Append
        } else {
            WritePolicy::Create
        }
    }
}

#[derive(Debug, Clone)]
pub struct RemoteStatus {
    pub exists: bool,
    pub entry: Option<RemoteEntry>,
}

pub struct RemoteExistenceChecker<'a, C: RepositoryClient> {
    client: &'a C,
    predicate: ExistencePredicate,
}

impl<'a, C: RepositoryClient> RemoteExistenceChecker<'a, C> {
    pub fn new(client: &'a C, predicate: ExistencePredicate) -> Self {
        Self { client, predicate }
    }

    pub fn check(&self, name: &RemoteFileName) -> Result<RemoteStatus, RepackError> {
        let filename = name.to_string();
        let results = self.client.search(&SearchQuery::filename(&filename))?;
        let exists = self.predicate.exists(results.len());
        tracing::debug!(
            filename = %filename,
            matches = results.len(),
            exists,
            "remote existence check"
        );
        if exists && results.len() > 1 {
            tracing::warn!(
                filename = %filename,
                matches = results.len(),
                "several remote copies found, appending to the newest"
            );
        }
        Ok(RemoteStatus {
            exists,
            entry: if exists { newest(results) } else { None },
        })
    }
}

/// Latest upload by `created_at`, then `id`; ties go to the later result.
fn newest(entries: Vec<RemoteEntry>) -> Option<RemoteEntry> {
    entries
        .into_iter()
        .enumerate()
        .max_by(|(a_pos, a), (b_pos, b)| {
            (a.created_at(), a.id(), a_pos).cmp(&(b.created_at(), b.id(), b_pos))
        })
        .map(|(_, entry)| entry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicates() {
        assert!(!ExistencePredicate::AtLeastOne.exists(0));
        assert!(ExistencePredicate::AtLeastOne.exists(1));
        assert!(!ExistencePredicate::MoreThanOne.exists(1));
        assert!(ExistencePredicate::MoreThanOne.exists(2));
    }

    #[test]
    fn policy() {
        assert_eq!(WritePolicy::decide(false, false), WritePolicy::Create);
        assert_eq!(WritePolicy::decide(true, false), WritePolicy::Append);
        assert_eq!(WritePolicy::decide(false, true), WritePolicy::Append);
    }

    struct Copies(Vec<RemoteEntry>);

    impl RepositoryClient for Copies {
        fn search(&self, _query: &SearchQuery) -> Result<Vec<RemoteEntry>, RepackError> {
            Ok(self.0.clone())
        }

        fn download(
            &self,
            _entry: &RemoteEntry,
            _destination: &std::path::Path,
        ) -> Result<u64, RepackError> {
            Err(RepackError::RepositoryHttp("not used".to_string()))
        }

        fn upload(
            &self,
            _file: &std::path::Path,
            _metadata: &crate::repository::UploadMetadata,
        ) -> Result<(), RepackError> {
            Err(RepackError::RepositoryHttp("not used".to_string()))
        }
    }

    fn copy(url: &str, created_at: &str, id: u64) -> RemoteEntry {
        let mut entry = RemoteEntry::new("S39_R3_ENVVARS_NOV2017.csv", url);
        entry
            .extra
            .insert("created_at".to_string(), serde_json::json!(created_at));
        entry.extra.insert("id".to_string(), serde_json::json!(id));
        entry
    }

    fn name() -> RemoteFileName {
        let date = chrono::NaiveDate::from_ymd_opt(2017, 11, 1).unwrap();
        RemoteFileName::new("S39", crate::domain::RoomNumber::new(3).unwrap(), date)
    }

    #[test]
    fn newest_copy_is_used_for_append() {
        let client = Copies(vec![
            copy("https://repo/2", "2017-11-02T01:00:00Z", 2),
            copy("https://repo/9", "2017-11-09T01:00:00Z", 9),
            copy("https://repo/5", "2017-11-05T01:00:00Z", 5),
        ]);
        let status = RemoteExistenceChecker::new(&client, ExistencePredicate::AtLeastOne)
            .check(&name())
            .unwrap();
        assert!(status.exists);
        assert_eq!(status.entry.unwrap().url, "https://repo/9");
    }

    #[test]
    fn copies_without_metadata_take_the_last_result() {
        let client = Copies(vec![
            RemoteEntry::new("S39_R3_ENVVARS_NOV2017.csv", "https://repo/a"),
            RemoteEntry::new("S39_R3_ENVVARS_NOV2017.csv", "https://repo/b"),
        ]);
        let status = RemoteExistenceChecker::new(&client, ExistencePredicate::AtLeastOne)
            .check(&name())
            .unwrap();
        assert_eq!(status.entry.unwrap().url, "https://repo/b");
    }

    #[test]
    fn single_copy_below_threshold_is_absent() {
        let client = Copies(vec![copy("https://repo/1", "2017-11-01T01:00:00Z", 1)]);
        let status = RemoteExistenceChecker::new(&client, ExistencePredicate::MoreThanOne)
            .check(&name())
            .unwrap();
        assert!(!status.exists);
        assert!(status.entry.is_none());
    }

    #[test]
    fn predicate_from_config_value() {
        let predicate: ExistencePredicate = serde_json::from_str("\"more_than_one\"").unwrap();
        assert_eq!(predicate, ExistencePredicate::MoreThanOne);
    }
}
