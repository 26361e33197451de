use std::fs;
use std::io;
use std::path::Path;

use zip::ZipArchive;

use crate::error::RepackError;

/// Extracts every entry of `zip_path` into `target_dir` and returns the
/// relative names of the extracted files (directories excluded).
pub fn extract_zip(zip_path: &Path, target_dir: &Path) -> Result<Vec<String>, RepackError> {
    let file = fs::File::open(zip_path)
        .map_err(|err| RepackError::Archive(format!("open zip {}: {err}", zip_path.display())))?;
    let mut archive = ZipArchive::new(file).map_err(|err| RepackError::Archive(err.to_string()))?;

    let mut extracted = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| RepackError::Archive(err.to_string()))?;
        let relative = match entry.enclosed_name() {
            Some(path) => path,
            None => {
                return Err(RepackError::Archive(
                    "zip entry path traversal detected".to_string(),
                ));
            }
        };
        let entry_path = target_dir.join(&relative);

        if entry.is_dir() {
            fs::create_dir_all(&entry_path)
                .map_err(|err| RepackError::Filesystem(err.to_string()))?;
            continue;
        }

        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent).map_err(|err| RepackError::Filesystem(err.to_string()))?;
        }
        let mut outfile = fs::File::create(&entry_path)
            .map_err(|err| RepackError::Filesystem(err.to_string()))?;
        io::copy(&mut entry, &mut outfile)
            .map_err(|err| RepackError::Archive(err.to_string()))?;
        extracted.push(relative.to_string_lossy().into_owned());
    }
    Ok(extracted)
}

/// Sorted names of the regular files directly inside `dir`.
pub fn list_files(dir: &Path) -> Result<Vec<String>, RepackError> {
    let mut names = Vec::new();
    let entries = fs::read_dir(dir).map_err(|err| RepackError::Filesystem(err.to_string()))?;
    for entry in entries {
        let entry = entry.map_err(|err| RepackError::Filesystem(err.to_string()))?;
        if entry.path().is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use zip::write::SimpleFileOptions;

    use super::*;

    #[test]
    fn extracts_and_lists_files() {
        let temp = tempfile::tempdir().unwrap();
        let zip_path = temp.path().join("bundle.zip");
        let mut writer = zip::ZipWriter::new(fs::File::create(&zip_path).unwrap());
        for name in ["b.csv", "a.csv"] {
            writer
                .start_file(name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(b"DateTime,Value\n").unwrap();
        }
        writer.finish().unwrap();

        let target = temp.path().join("out");
        fs::create_dir_all(&target).unwrap();
        let extracted = extract_zip(&zip_path, &target).unwrap();
        assert_eq!(extracted.len(), 2);
        assert_eq!(list_files(&target).unwrap(), vec!["a.csv", "b.csv"]);
    }

    #[test]
    fn corrupt_zip_is_archive_error() {
        let temp = tempfile::tempdir().unwrap();
        let zip_path = temp.path().join("broken.zip");
        fs::write(&zip_path, b"not a zip").unwrap();
        let err = extract_zip(&zip_path, temp.path()).unwrap_err();
        assert!(matches!(err, RepackError::Archive(_)));
    }
}
