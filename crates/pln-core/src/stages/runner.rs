use std::sync::Arc;

use tracing::{error, info, warn};

use super::{Hook, Stage, StageOutcome};
use crate::error::Result;
use crate::storage::{DepositQuery, DepositStore};
use crate::types::Deposit;

pub const HOLD_MESSAGE: &str = "Holding deposit.";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Select deposits from the stage's failure state instead of its input.
    pub retry: bool,
    /// Process but persist nothing and run no hooks.
    pub dry_run: bool,
    pub limit: Option<i64>,
    pub ids: Vec<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub selected: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub held: usize,
    pub deferred: usize,
}

enum Applied {
    Success,
    Failure,
    Hold,
}

pub struct StageRunner {
    store: Arc<dyn DepositStore>,
}

impl StageRunner {
    pub fn new(store: Arc<dyn DepositStore>) -> Self {
        Self { store }
    }

    /// Run `stage` over every deposit waiting in its input (or failure) state.
    /// Only the selection query can fail the run; per-deposit problems are
    /// recorded on the deposit and counted.
    pub async fn run(&self, stage: &Stage, options: &RunOptions) -> Result<RunReport> {
        let query = DepositQuery {
            state: if options.retry {
                stage.failure
            } else {
                stage.input
            },
            ids: options.ids.clone(),
            limit: options.limit,
        };
        let deposits = self.store.find_deposits(&query).await?;

        info!(
            stage = stage.name,
            state = %query.state,
            count = deposits.len(),
            retry = options.retry,
            "processing deposits"
        );
        if options.dry_run {
            warn!(stage = stage.name, "dry run: changes will not be saved");
        }

        let mut report = RunReport {
            selected: deposits.len(),
            ..RunReport::default()
        };
        for mut deposit in deposits {
            self.run_deposit(stage, &mut deposit, options.dry_run, &mut report)
                .await;
        }

        info!(
            stage = stage.name,
            succeeded = report.succeeded,
            failed = report.failed,
            held = report.held,
            deferred = report.deferred,
            "stage finished"
        );
        Ok(report)
    }

    async fn run_deposit(
        &self,
        stage: &Stage,
        deposit: &mut Deposit,
        dry_run: bool,
        report: &mut RunReport,
    ) {
        let applied = match stage.processor.process(deposit).await {
            Ok(StageOutcome::Success) => {
                deposit.state = stage.success;
                deposit.log_processing(stage.success_message);
                Applied::Success
            }
            Ok(StageOutcome::Failure) => {
                deposit.state = stage.failure;
                deposit.log_processing(stage.failure_message);
                Applied::Failure
            }
            Ok(StageOutcome::Hold(state)) => {
                deposit.state = state;
                deposit.log_processing(HOLD_MESSAGE);
                Applied::Hold
            }
            Ok(StageOutcome::Deferred) => {
                report.deferred += 1;
                return;
            }
            Err(err) => {
                warn!(
                    stage = stage.name,
                    deposit = %deposit.deposit_uuid,
                    error = %err,
                    "deposit processing failed"
                );
                deposit.state = stage.failure;
                deposit.log_processing(stage.failure_message);
                deposit.log_error(err.to_string());
                Applied::Failure
            }
        };

        if !dry_run {
            if let Err(err) = self.store.save_deposit(deposit).await {
                error!(
                    stage = stage.name,
                    deposit = %deposit.deposit_uuid,
                    error = %err,
                    "failed to save deposit"
                );
                report.failed += 1;
                return;
            }
        }

        let hook = match applied {
            Applied::Success => {
                report.succeeded += 1;
                stage.after_success.as_ref()
            }
            Applied::Failure => {
                report.failed += 1;
                stage.after_failure.as_ref()
            }
            Applied::Hold => {
                report.held += 1;
                None
            }
        };

        if !dry_run {
            run_hook(stage, hook, deposit);
        }
    }
}

fn run_hook(stage: &Stage, hook: Option<&Hook>, deposit: &Deposit) {
    if let Some(hook) = hook {
        if let Err(err) = hook(deposit) {
            warn!(
                stage = stage.name,
                deposit = %deposit.deposit_uuid,
                error = %err,
                "stage hook failed"
            );
        }
    }
}
