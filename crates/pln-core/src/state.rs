use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Processing state of a deposit. The string forms are what gets stored in
/// the `deposit.state` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DepositState {
    DepositedByJournal,
    Harvested,
    HarvestError,
    PayloadValidated,
    PayloadError,
    BagValidated,
    BagError,
    XmlValidated,
    XmlError,
    VirusChecked,
    VirusError,
    Reserialized,
    ReserializeError,
    Deposited,
    DepositError,
    Complete,
    Hold,
}

impl DepositState {
    pub const ALL: [DepositState; 17] = [
        DepositState::DepositedByJournal,
        DepositState::Harvested,
        DepositState::HarvestError,
        DepositState::PayloadValidated,
        DepositState::PayloadError,
        DepositState::BagValidated,
        DepositState::BagError,
        DepositState::XmlValidated,
        DepositState::XmlError,
        DepositState::VirusChecked,
        DepositState::VirusError,
        DepositState::Reserialized,
        DepositState::ReserializeError,
        DepositState::Deposited,
        DepositState::DepositError,
        DepositState::Complete,
        DepositState::Hold,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DepositState::DepositedByJournal => "depositedByJournal",
            DepositState::Harvested => "harvested",
            DepositState::HarvestError => "harvest-error",
            DepositState::PayloadValidated => "payload-validated",
            DepositState::PayloadError => "payload-error",
            DepositState::BagValidated => "bag-validated",
            DepositState::BagError => "bag-error",
            DepositState::XmlValidated => "xml-validated",
            DepositState::XmlError => "xml-error",
            DepositState::VirusChecked => "virus-checked",
            DepositState::VirusError => "virus-error",
            DepositState::Reserialized => "reserialized",
            DepositState::ReserializeError => "reserialize-error",
            DepositState::Deposited => "deposited",
            DepositState::DepositError => "deposit-error",
            DepositState::Complete => "complete",
            DepositState::Hold => "hold",
        }
    }
}

impl fmt::Display for DepositState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DepositState {
    type Err = PipelineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        DepositState::ALL
            .iter()
            .copied()
            .find(|state| state.as_str() == value)
            .ok_or_else(|| PipelineError::InvalidState(value.to_string()))
    }
}

impl TryFrom<String> for DepositState {
    type Error = PipelineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DepositState> for String {
    fn from(value: DepositState) -> Self {
        value.as_str().to_string()
    }
}
