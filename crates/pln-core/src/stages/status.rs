use std::sync::Arc;

use async_trait::async_trait;

use super::{remove_artifacts, DepositProcessor, Stage, StageContext, StageOutcome};
use crate::error::{PipelineError, Result};
use crate::state::DepositState;
use crate::sword::{state_term, SwordClient};
use crate::types::Deposit;

pub const AGREEMENT: &str = "agreement";

/// Polls the archive's statement for a deposit and records its state term.
pub struct StatusChecker {
    sword: Arc<SwordClient>,
}

impl StatusChecker {
    pub fn new(sword: Arc<SwordClient>) -> Self {
        Self { sword }
    }
}

/// Record the archive's state term and decide whether it means the deposit
/// is fully preserved.
pub fn apply_statement(deposit: &mut Deposit, statement: &str) -> Result<StageOutcome> {
    let term = state_term(statement)?
        .filter(|term| !term.is_empty())
        .ok_or_else(|| PipelineError::Protocol("Failed to retrieve term".into()))?;
    let agreed = term == AGREEMENT;
    deposit.lockss_state = Some(term);

    Ok(if agreed {
        StageOutcome::Success
    } else {
        StageOutcome::Failure
    })
}

#[async_trait]
impl DepositProcessor for StatusChecker {
    async fn process(&self, deposit: &mut Deposit) -> Result<StageOutcome> {
        let statement = self.sword.statement(deposit).await?;
        apply_statement(deposit, &statement)
    }
}

pub fn stage(context: &StageContext) -> Stage {
    // Deposits without agreement stay in `deposited` and are polled again.
    let stage = Stage::new(
        "status",
        DepositState::Deposited,
        DepositState::Complete,
        DepositState::Deposited,
        StatusChecker::new(context.sword.clone()),
    )
    .messages(
        "Status check with the archive succeeded.",
        "Status check with the archive failed.",
    );

    if !context.config.remove_complete_deposits {
        return stage;
    }

    let paths = context.paths.clone();
    stage.after_success(move |deposit| {
        tracing::info!(
            deposit = %deposit.deposit_uuid,
            "deposit complete, removing processing files"
        );
        remove_artifacts(
            deposit,
            &[
                paths.harvest_file(deposit)?,
                paths.processing_bag_dir(deposit)?,
                paths.staging_file(deposit)?,
            ],
        );
        Ok(())
    })
}
