//! Processing stages. Each stage is a data description (states, messages,
//! hooks) around a [`DepositProcessor`]; [`runner::StageRunner`] drives it.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::bag::Bag;
use crate::clamav::ScanConnector;
use crate::config::PlnConfig;
use crate::error::{PipelineError, Result};
use crate::paths::FilePaths;
use crate::state::DepositState;
use crate::storage::DepositStore;
use crate::sword::SwordClient;
use crate::types::Deposit;

pub mod bag;
pub mod deposit;
pub mod harvest;
pub mod payload;
pub mod reserialize;
pub mod runner;
pub mod scan;
pub mod status;
pub mod xml;

pub use runner::{RunOptions, RunReport, StageRunner};

/// What a processor decided for one deposit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Success,
    Failure,
    /// Park the deposit in the given state without running hooks.
    Hold(DepositState),
    /// Leave the deposit untouched; it is picked up again next run.
    Deferred,
}

#[async_trait]
pub trait DepositProcessor: Send + Sync {
    async fn process(&self, deposit: &mut Deposit) -> Result<StageOutcome>;
}

pub type Hook = Box<dyn Fn(&Deposit) -> Result<()> + Send + Sync>;

pub struct Stage {
    pub name: &'static str,
    pub input: DepositState,
    pub success: DepositState,
    pub failure: DepositState,
    pub success_message: &'static str,
    pub failure_message: &'static str,
    pub processor: Box<dyn DepositProcessor>,
    pub after_success: Option<Hook>,
    pub after_failure: Option<Hook>,
}

impl Stage {
    pub fn new(
        name: &'static str,
        input: DepositState,
        success: DepositState,
        failure: DepositState,
        processor: impl DepositProcessor + 'static,
    ) -> Self {
        Self {
            name,
            input,
            success,
            failure,
            success_message: "",
            failure_message: "",
            processor: Box::new(processor),
            after_success: None,
            after_failure: None,
        }
    }

    pub fn messages(mut self, success: &'static str, failure: &'static str) -> Self {
        self.success_message = success;
        self.failure_message = failure;
        self
    }

    pub fn after_success(
        mut self,
        hook: impl Fn(&Deposit) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.after_success = Some(Box::new(hook));
        self
    }

    pub fn after_failure(
        mut self,
        hook: impl Fn(&Deposit) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.after_failure = Some(Box::new(hook));
        self
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("input", &self.input)
            .field("success", &self.success)
            .field("failure", &self.failure)
            .finish_non_exhaustive()
    }
}

/// Collaborators shared by the stage processors.
#[derive(Clone)]
pub struct StageContext {
    pub store: Arc<dyn DepositStore>,
    pub paths: FilePaths,
    pub config: Arc<PlnConfig>,
    pub sword: Arc<SwordClient>,
    pub scanner: Arc<dyn ScanConnector>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Harvest,
    Payload,
    Bag,
    Xml,
    Scan,
    Reserialize,
    Deposit,
    Status,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Harvest => "harvest",
            StageKind::Payload => "payload",
            StageKind::Bag => "bag",
            StageKind::Xml => "xml",
            StageKind::Scan => "scan",
            StageKind::Reserialize => "reserialize",
            StageKind::Deposit => "deposit",
            StageKind::Status => "status",
        }
    }

    pub fn build(&self, context: &StageContext) -> Result<Stage> {
        Ok(match self {
            StageKind::Harvest => harvest::stage(context)?,
            StageKind::Payload => payload::stage(context),
            StageKind::Bag => bag::stage(context),
            StageKind::Xml => xml::stage(context),
            StageKind::Scan => scan::stage(context),
            StageKind::Reserialize => reserialize::stage(context),
            StageKind::Deposit => deposit::stage(context),
            StageKind::Status => status::stage(context),
        })
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Load the extracted bag a previous stage left in the processing directory.
pub(crate) fn load_processing_bag(paths: &FilePaths, deposit: &Deposit) -> Result<Bag> {
    let dir = paths.processing_bag_dir(deposit)?;
    let bag = Bag::load(&dir)?;
    if !bag.data_dir().is_dir() {
        return Err(PipelineError::Bag(format!(
            "processing bag {} has no payload directory",
            dir.display()
        )));
    }
    Ok(bag)
}

/// Remove on-disk artifacts, logging rather than failing on individual errors.
pub(crate) fn remove_artifacts(deposit: &Deposit, paths: &[std::path::PathBuf]) {
    for path in paths {
        if let Err(err) = crate::paths::remove_path(path) {
            tracing::error!(
                deposit = %deposit.deposit_uuid,
                path = %path.display(),
                error = %err,
                "failed to remove deposit artifact"
            );
        }
    }
}
