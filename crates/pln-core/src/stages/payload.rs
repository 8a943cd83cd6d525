use async_trait::async_trait;

use super::{DepositProcessor, Stage, StageContext, StageOutcome};
use crate::checksum::{checksums_match, hash_file};
use crate::error::Result;
use crate::paths::FilePaths;
use crate::state::DepositState;
use crate::types::Deposit;

/// Compares the harvested archive against the checksum the journal declared.
pub struct PayloadValidator {
    paths: FilePaths,
}

impl PayloadValidator {
    pub fn new(paths: FilePaths) -> Self {
        Self { paths }
    }
}

#[async_trait]
impl DepositProcessor for PayloadValidator {
    async fn process(&self, deposit: &mut Deposit) -> Result<StageOutcome> {
        let path = self.paths.harvest_file(deposit)?;
        let actual = hash_file(&deposit.checksum_type, &path)?;
        if checksums_match(&deposit.checksum_value, &actual) {
            return Ok(StageOutcome::Success);
        }

        deposit.log_processing(format!(
            "Deposit checksum does not match. Expected {} != Actual {}",
            deposit.checksum_value.to_uppercase(),
            actual
        ));
        Ok(StageOutcome::Failure)
    }
}

pub fn stage(context: &StageContext) -> Stage {
    Stage::new(
        "payload",
        DepositState::Harvested,
        DepositState::PayloadValidated,
        DepositState::PayloadError,
        PayloadValidator::new(context.paths.clone()),
    )
    .messages(
        "Payload checksum validation succeeded.",
        "Payload checksum validation failed.",
    )
}
