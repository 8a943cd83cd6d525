use std::sync::Arc;

use async_trait::async_trait;

use super::{
    load_processing_bag, remove_artifacts, DepositProcessor, Stage, StageContext, StageOutcome,
};
use crate::bag::Bag;
use crate::checksum::{hash_file_with, ChecksumAlgorithm};
use crate::error::Result;
use crate::paths::{remove_path, FilePaths};
use crate::state::DepositState;
use crate::storage::DepositStore;
use crate::types::Deposit;

/// Adds provenance to the processed bag, packages it for staging and files
/// the package into an AU container.
pub struct BagReserializer {
    paths: FilePaths,
    store: Arc<dyn DepositStore>,
    max_au_size: i64,
}

impl BagReserializer {
    pub fn new(paths: FilePaths, store: Arc<dyn DepositStore>, max_au_size: i64) -> Self {
        Self {
            paths,
            store,
            max_au_size,
        }
    }

    /// Move the deposit's package size into the open container, closing it
    /// once it grows past the limit.
    async fn assign_container(&self, deposit: &mut Deposit, previous_size: i64) -> Result<()> {
        if let Some(previous_id) = deposit.au_container_id {
            if let Some(mut previous) = self.store.find_container(previous_id).await? {
                previous.size = (previous.size - previous_size).max(0);
                self.store.update_container(&previous).await?;
            }
        }

        let mut container = match self.store.open_container().await? {
            Some(container) => container,
            None => self.store.create_container().await?,
        };
        container.size += deposit.package_size.unwrap_or(0);
        if container.size > self.max_au_size {
            container.open = false;
        }
        self.store.update_container(&container).await?;
        deposit.au_container_id = Some(container.id);

        tracing::debug!(
            deposit = %deposit.deposit_uuid,
            container = container.id,
            size = container.size,
            open = container.open,
            "deposit assigned to AU container"
        );
        Ok(())
    }
}

fn provenance_tags(deposit: &Deposit) -> Vec<(String, String)> {
    let journal = &deposit.journal;
    let optional = |value: &Option<String>| value.clone().unwrap_or_default();

    let mut tags = vec![
        ("External-Identifier".to_string(), deposit.uuid_key()),
        ("PKP-PLN-Deposit-UUID".to_string(), deposit.uuid_key()),
        (
            "PKP-PLN-Deposit-Received".to_string(),
            deposit.received.to_rfc3339(),
        ),
        ("PKP-PLN-Deposit-Volume".to_string(), deposit.volume.clone()),
        ("PKP-PLN-Deposit-Issue".to_string(), deposit.issue.clone()),
        (
            "PKP-PLN-Deposit-PubDate".to_string(),
            deposit
                .pub_date
                .map(|date| date.to_rfc3339())
                .unwrap_or_default(),
        ),
        ("PKP-PLN-Journal-UUID".to_string(), journal.uuid_key()),
        ("PKP-PLN-Journal-Title".to_string(), optional(&journal.title)),
        ("PKP-PLN-Journal-ISSN".to_string(), optional(&journal.issn)),
        ("PKP-PLN-Journal-URL".to_string(), journal.url.clone()),
        ("PKP-PLN-Journal-Email".to_string(), optional(&journal.email)),
        (
            "PKP-PLN-Publisher-Name".to_string(),
            optional(&journal.publisher_name),
        ),
        (
            "PKP-PLN-Publisher-URL".to_string(),
            optional(&journal.publisher_url),
        ),
    ];
    for (key, value) in &deposit.license {
        tags.push((format!("PKP-PLN-{key}"), value.clone()));
    }
    tags
}

fn add_provenance(bag: &mut Bag, deposit: &Deposit) {
    for (name, value) in provenance_tags(deposit) {
        // Re-running replaces rather than duplicates.
        bag.remove_tag(&name);
        bag.add_tag(name, value);
    }
}

#[async_trait]
impl DepositProcessor for BagReserializer {
    async fn process(&self, deposit: &mut Deposit) -> Result<StageOutcome> {
        let mut bag = load_processing_bag(&self.paths, deposit)?;
        bag.create_file("processing-log.txt", deposit.processing_log_text().as_bytes())?;
        bag.create_file("error-log.txt", deposit.error_log_text().as_bytes())?;
        add_provenance(&mut bag, deposit);
        bag.update()?;

        let staged = self.paths.staging_file(deposit)?;
        remove_path(&staged)?;
        bag.package(&staged)?;

        let previous_size = deposit.package_size.unwrap_or(0);
        let bytes = std::fs::metadata(&staged)?.len();
        deposit.package_size = Some(bytes.div_ceil(1000) as i64);
        deposit.package_checksum_type = Some("sha1".to_string());
        deposit.package_checksum_value = Some(hash_file_with(ChecksumAlgorithm::Sha1, &staged)?);

        self.assign_container(deposit, previous_size).await?;
        Ok(StageOutcome::Success)
    }
}

pub fn stage(context: &StageContext) -> Stage {
    let paths = context.paths.clone();

    Stage::new(
        "reserialize",
        DepositState::VirusChecked,
        DepositState::Reserialized,
        DepositState::ReserializeError,
        BagReserializer::new(
            context.paths.clone(),
            context.store.clone(),
            context.config.max_au_size,
        ),
    )
    .messages("Bag Reserialize succeeded.", "Bag Reserialize failed.")
    .after_success(move |deposit| {
        remove_artifacts(deposit, &[paths.processing_bag_dir(deposit)?]);
        Ok(())
    })
}
