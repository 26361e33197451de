use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::RepackError;

/// Local working area: a staging directory for downloaded archives and an
/// output directory for the monthly per-room files.
#[derive(Debug, Clone)]
pub struct Store {
    staging_root: Utf8PathBuf,
    output_root: Utf8PathBuf,
}

impl Store {
    pub fn new_with_paths(staging_root: Utf8PathBuf, output_root: Utf8PathBuf) -> Self {
        Self {
            staging_root,
            output_root,
        }
    }

    pub fn staging_root(&self) -> &Utf8Path {
        &self.staging_root
    }

    pub fn output_root(&self) -> &Utf8Path {
        &self.output_root
    }

    pub fn output_path(&self, filename: &str) -> Utf8PathBuf {
        self.output_root.join(filename)
    }

    pub fn ensure_roots(&self) -> Result<(), RepackError> {
        for root in [&self.staging_root, &self.output_root] {
            fs::create_dir_all(root.as_std_path())
                .map_err(|err| RepackError::Filesystem(format!("{root}: {err}")))?;
        }
        Ok(())
    }

    /// Removes everything inside the staging directory, keeping the directory.
    pub fn clear_staging(&self) -> Result<usize, RepackError> {
        if !self.staging_root.as_std_path().exists() {
            fs::create_dir_all(self.staging_root.as_std_path())
                .map_err(|err| RepackError::Filesystem(err.to_string()))?;
            return Ok(0);
        }
        let mut removed = 0;
        let entries = fs::read_dir(self.staging_root.as_std_path())
            .map_err(|err| RepackError::Filesystem(err.to_string()))?;
        for entry in entries {
            let path = entry
                .map_err(|err| RepackError::Filesystem(err.to_string()))?
                .path();
            if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            }
            .map_err(|err| RepackError::Filesystem(format!("{}: {err}", path.display())))?;
            removed += 1;
        }
        Ok(removed)
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), RepackError> {
        let parent = path
            .parent()
            .ok_or_else(|| RepackError::Filesystem("invalid destination path".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| RepackError::Filesystem(err.to_string()))?;
        let mut temp = tempfile::Builder::new()
            .prefix("bms-repack-file")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| RepackError::Filesystem(err.to_string()))?;
        temp.write_all(content)
            .map_err(|err| RepackError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| RepackError::Filesystem(err.to_string()))?;
        Ok(())
    }

    /// Runs `fill` against a temporary file next to `path` and moves it into
    /// place only when `fill` succeeds, so a failed transfer leaves nothing
    /// behind.
    pub fn replace_with<T>(
        path: &Utf8Path,
        fill: impl FnOnce(&std::path::Path) -> Result<T, RepackError>,
    ) -> Result<T, RepackError> {
        let parent = path
            .parent()
            .ok_or_else(|| RepackError::Filesystem("invalid destination path".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| RepackError::Filesystem(err.to_string()))?;
        let temp = tempfile::Builder::new()
            .prefix(".bms-repack-partial")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| RepackError::Filesystem(err.to_string()))?;
        let value = fill(temp.path())?;
        temp.persist(path.as_std_path())
            .map_err(|err| RepackError::Filesystem(err.to_string()))?;
        Ok(value)
    }

    pub fn append_bytes(path: &Utf8Path, content: &[u8]) -> Result<(), RepackError> {
        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(path.as_std_path())
            .map_err(|err| RepackError::Filesystem(format!("{path}: {err}")))?;
        file.write_all(content)
            .map_err(|err| RepackError::Filesystem(format!("{path}: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_staging_keeps_directory() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let store = Store::new_with_paths(root.join("raw_data"), root.join("output_data"));
        store.ensure_roots().unwrap();
        fs::write(store.staging_root().join("a.csv"), b"x").unwrap();
        fs::create_dir_all(store.staging_root().join("nested")).unwrap();

        assert_eq!(store.clear_staging().unwrap(), 2);
        assert!(store.staging_root().exists());
        assert_eq!(fs::read_dir(store.staging_root()).unwrap().count(), 0);
    }

    #[test]
    fn atomic_write_then_append() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let path = root.join("out").join("file.csv");
        Store::write_bytes_atomic(&path, b"a\n").unwrap();
        Store::append_bytes(&path, b"b\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "a\nb\n");
    }

    #[test]
    fn failed_replace_leaves_no_file() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let path = root.join("file.csv");

        let err = Store::replace_with(&path, |partial| {
            fs::write(partial, b"DateTime,Ro").unwrap();
            Err::<(), _>(RepackError::RepositoryHttp("connection reset".to_string()))
        })
        .unwrap_err();
        assert!(matches!(err, RepackError::RepositoryHttp(_)));
        assert!(!path.exists());
        assert_eq!(fs::read_dir(&root).unwrap().count(), 0);

        let written = Store::replace_with(&path, |partial| {
            fs::write(partial, b"ok\n").unwrap();
            Ok(3)
        })
        .unwrap();
        assert_eq!(written, 3);
        assert_eq!(fs::read_to_string(&path).unwrap(), "ok\n");
    }
}
