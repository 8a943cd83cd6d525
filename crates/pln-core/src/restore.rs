//! Fetch archived packages back from the preservation network.

use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::checksum::{checksums_match, hash_file};
use crate::error::Result;
use crate::paths::FilePaths;
use crate::storage::DepositStore;
use crate::sword::{original_deposit_urls, SwordClient};
use crate::types::Deposit;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoredFile {
    pub deposit_uuid: Uuid,
    pub path: PathBuf,
    pub bytes: u64,
    /// False when the downloaded file does not match the recorded package checksum.
    pub checksum_ok: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub restored: Vec<RestoredFile>,
    pub failures: usize,
}

pub struct Restorer<'a> {
    store: &'a dyn DepositStore,
    sword: &'a SwordClient,
    paths: &'a FilePaths,
}

impl<'a> Restorer<'a> {
    pub fn new(store: &'a dyn DepositStore, sword: &'a SwordClient, paths: &'a FilePaths) -> Self {
        Self {
            store,
            sword,
            paths,
        }
    }

    /// Download every original deposit the archive holds for a journal into
    /// the journal's restore directory. Individual failures are logged and
    /// counted.
    pub async fn restore_journal(&self, journal_uuid: Uuid) -> Result<RestoreReport> {
        let deposits = self.store.deposits_for_journal(journal_uuid).await?;
        let mut report = RestoreReport::default();

        for mut deposit in deposits {
            if deposit.deposit_receipt.is_none() {
                tracing::info!(deposit = %deposit.deposit_uuid, "deposit was never sent, skipping");
                continue;
            }
            match self.restore_deposit(&mut deposit).await {
                Ok(mut files) => report.restored.append(&mut files),
                Err(err) => {
                    tracing::error!(
                        deposit = %deposit.deposit_uuid,
                        error = %err,
                        "failed to restore deposit"
                    );
                    report.failures += 1;
                }
            }
        }

        Ok(report)
    }

    async fn restore_deposit(&self, deposit: &mut Deposit) -> Result<Vec<RestoredFile>> {
        let statement = self.sword.statement(deposit).await?;
        let dir = self.paths.restore_dir(&deposit.journal)?;
        let mut restored = Vec::new();

        for href in original_deposit_urls(&statement)? {
            let path = dir.join(file_name_of(&href, deposit));
            tracing::info!(
                deposit = %deposit.deposit_uuid,
                volume = %deposit.volume,
                issue = %deposit.issue,
                path = %path.display(),
                "saving archived deposit"
            );
            let bytes = self.sword.download(&href, &path, None).await?;
            let checksum_ok = verify_package(deposit, &path)?;
            restored.push(RestoredFile {
                deposit_uuid: deposit.deposit_uuid,
                path,
                bytes,
                checksum_ok,
            });
        }

        Ok(restored)
    }
}

/// Last path segment of the href, falling back to the deposit's package name.
fn file_name_of(href: &str, deposit: &Deposit) -> String {
    let trimmed = href.split(['?', '#']).next().unwrap_or(href);
    match trimmed.rsplit('/').next() {
        Some(name) if !name.is_empty() && name != ".." && name != "." => name.to_string(),
        _ => format!("{}.zip", deposit.uuid_key()),
    }
}

fn verify_package(deposit: &Deposit, path: &Path) -> Result<bool> {
    let (Some(kind), Some(expected)) = (
        deposit.package_checksum_type.as_deref(),
        deposit.package_checksum_value.as_deref(),
    ) else {
        return Ok(true);
    };
    let actual = hash_file(kind, path)?;
    if checksums_match(expected, &actual) {
        return Ok(true);
    }
    tracing::warn!(
        deposit = %deposit.deposit_uuid,
        expected,
        actual = %actual,
        "Package checksum failed"
    );
    Ok(false)
}
