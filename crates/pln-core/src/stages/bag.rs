use async_trait::async_trait;

use super::{remove_artifacts, DepositProcessor, Stage, StageContext, StageOutcome};
use crate::bag::Bag;
use crate::error::Result;
use crate::paths::FilePaths;
use crate::state::DepositState;
use crate::types::Deposit;

pub const VERSION_TAG: &str = "PKP-PLN-OJS-Version";

/// Extracts the harvested archive into the processing directory and checks
/// it as a BagIt bag.
pub struct BagValidator {
    paths: FilePaths,
}

impl BagValidator {
    pub fn new(paths: FilePaths) -> Self {
        Self { paths }
    }
}

#[async_trait]
impl DepositProcessor for BagValidator {
    async fn process(&self, deposit: &mut Deposit) -> Result<StageOutcome> {
        let archive = self.paths.harvest_file(deposit)?;
        let cache = self.paths.processing_bag_dir(deposit)?;
        let bag = Bag::read_compressed(&archive, &cache)?;

        let errors = bag.validate()?;
        if !errors.is_empty() {
            for error in &errors {
                deposit.log_error(format!(
                    "Bag validation error for {} - {}",
                    error.file, error.message
                ));
            }
            return Ok(StageOutcome::Failure);
        }

        if let Some(version) = bag.tag(VERSION_TAG) {
            if version != deposit.journal_version {
                deposit.log_error(format!(
                    "Bag journal version tag {version} does not match deposit journal version {}",
                    deposit.journal_version
                ));
            }
        }

        Ok(StageOutcome::Success)
    }
}

pub fn stage(context: &StageContext) -> Stage {
    let success_paths = context.paths.clone();
    let failure_paths = context.paths.clone();

    Stage::new(
        "bag",
        DepositState::PayloadValidated,
        DepositState::BagValidated,
        DepositState::BagError,
        BagValidator::new(context.paths.clone()),
    )
    .messages(
        "Bag checksum validation succeeded.",
        "Bag checksum validation failed.",
    )
    .after_success(move |deposit| {
        remove_artifacts(deposit, &[success_paths.harvest_file(deposit)?]);
        Ok(())
    })
    .after_failure(move |deposit| {
        remove_artifacts(deposit, &[failure_paths.processing_bag_dir(deposit)?]);
        Ok(())
    })
}
