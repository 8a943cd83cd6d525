use async_trait::async_trait;

use super::{load_processing_bag, DepositProcessor, Stage, StageContext, StageOutcome};
use crate::error::Result;
use crate::paths::FilePaths;
use crate::state::DepositState;
use crate::types::Deposit;
use crate::xml::{DtdValidator, XmlParser};

/// Checks every XML export in the bag payload.
pub struct XmlValidator {
    paths: FilePaths,
}

impl XmlValidator {
    pub fn new(paths: FilePaths) -> Self {
        Self { paths }
    }
}

#[async_trait]
impl DepositProcessor for XmlValidator {
    async fn process(&self, deposit: &mut Deposit) -> Result<StageOutcome> {
        let bag = load_processing_bag(&self.paths, deposit)?;
        let mut validator = DtdValidator::new();
        let mut failed = false;

        for file in bag.payload_files()? {
            if !file.to_ascii_lowercase().ends_with(".xml") {
                continue;
            }
            let path = bag.root().join(&file);
            let mut parser = XmlParser::new();
            let loaded = parser.load(&path);
            for notice in parser.notices() {
                deposit.log_error(notice.clone());
            }
            match loaded {
                Ok(document) => validator.validate(&document),
                Err(err) => {
                    deposit.log_error(format!("XML parse error for {file} - {err}"));
                    failed = true;
                }
            }
        }

        for error in validator.errors() {
            deposit.log_error(format!(
                "XML validation error for {}:{} - {}",
                error.file, error.line, error.message
            ));
        }

        if failed || validator.has_errors() {
            Ok(StageOutcome::Failure)
        } else {
            Ok(StageOutcome::Success)
        }
    }
}

pub fn stage(context: &StageContext) -> Stage {
    Stage::new(
        "xml",
        DepositState::BagValidated,
        DepositState::XmlValidated,
        DepositState::XmlError,
        XmlValidator::new(context.paths.clone()),
    )
    .messages("XML validation succeeded.", "XML Validation failed.")
}
