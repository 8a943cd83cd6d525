//! On-disk layout for harvested, processing, staged and restored deposits.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::types::{Deposit, Journal};

#[derive(Debug, Clone)]
pub struct FilePaths {
    root: PathBuf,
}

impl FilePaths {
    /// `root` is resolved against `project_dir` when it is relative.
    pub fn new(root: impl AsRef<Path>, project_dir: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        let root = if root.is_absolute() {
            root.to_path_buf()
        } else {
            project_dir.as_ref().join(root)
        };
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn harvest_dir(&self, journal: &Journal) -> Result<PathBuf> {
        ensure_dir(self.root.join("harvest").join(journal.uuid_key()))
    }

    pub fn harvest_file(&self, deposit: &Deposit) -> Result<PathBuf> {
        Ok(self
            .harvest_dir(&deposit.journal)?
            .join(format!("{}.zip", deposit.uuid_key())))
    }

    pub fn processing_base_dir(&self, journal: &Journal) -> Result<PathBuf> {
        ensure_dir(self.root.join("processing").join(journal.uuid_key()))
    }

    /// Directory the extracted bag for `deposit` lives in while it is processed.
    pub fn processing_bag_dir(&self, deposit: &Deposit) -> Result<PathBuf> {
        ensure_dir(self.processing_base_dir(&deposit.journal)?.join(deposit.uuid_key()))
    }

    pub fn staging_dir(&self, journal: &Journal) -> Result<PathBuf> {
        ensure_dir(self.root.join("staged").join(journal.uuid_key()))
    }

    pub fn staging_file(&self, deposit: &Deposit) -> Result<PathBuf> {
        Ok(self
            .staging_dir(&deposit.journal)?
            .join(format!("{}.zip", deposit.uuid_key())))
    }

    pub fn restore_dir(&self, journal: &Journal) -> Result<PathBuf> {
        ensure_dir(self.root.join("restore").join(journal.uuid_key()))
    }

    pub fn restore_file(&self, deposit: &Deposit) -> Result<PathBuf> {
        Ok(self
            .restore_dir(&deposit.journal)?
            .join(format!("{}.zip", deposit.uuid_key())))
    }
}

fn ensure_dir(path: PathBuf) -> Result<PathBuf> {
    fs::create_dir_all(&path)?;
    Ok(path)
}

/// Remove a file or directory tree. A missing path is not an error.
pub fn remove_path(path: &Path) -> Result<()> {
    let outcome = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(err) => Err(err),
    };

    match outcome {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn deposit() -> Deposit {
        let journal = Journal::new(
            Uuid::parse_str("c0a65967-32bd-4ee8-96de-c469743e563a").unwrap(),
            "https://journal.example.org",
        );
        Deposit::new(
            Uuid::parse_str("d38e7ecb-7d7e-408d-94b0-b00d434fdbd2").unwrap(),
            journal,
            "https://journal.example.org/deposit.zip",
        )
    }

    #[test]
    fn relative_root_resolves_against_project_dir() {
        let project = tempfile::tempdir().unwrap();
        let paths = FilePaths::new("data", project.path());
        assert_eq!(paths.root(), project.path().join("data"));
    }

    #[test]
    fn deposit_files_use_uppercase_uuids() {
        let project = tempfile::tempdir().unwrap();
        let paths = FilePaths::new(project.path(), "/unused");
        let deposit = deposit();

        let harvest = paths.harvest_file(&deposit).unwrap();
        assert_eq!(
            harvest,
            project.path().join(
                "harvest/C0A65967-32BD-4EE8-96DE-C469743E563A/D38E7ECB-7D7E-408D-94B0-B00D434FDBD2.zip"
            )
        );
        assert!(harvest.parent().unwrap().is_dir());

        let bag_dir = paths.processing_bag_dir(&deposit).unwrap();
        assert!(bag_dir.is_dir());
        assert!(bag_dir.ends_with("processing/C0A65967-32BD-4EE8-96DE-C469743E563A/D38E7ECB-7D7E-408D-94B0-B00D434FDBD2"));

        let staged = paths.staging_file(&deposit).unwrap();
        assert!(staged.starts_with(project.path().join("staged")));
        let restored = paths.restore_file(&deposit).unwrap();
        assert!(restored.starts_with(project.path().join("restore")));
    }

    #[test]
    fn remove_path_tolerates_missing_targets() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("file.txt"), b"x").unwrap();

        remove_path(&dir.path().join("a")).unwrap();
        assert!(!dir.path().join("a").exists());
        remove_path(&dir.path().join("a")).unwrap();
    }
}
