pub mod error;
pub mod state;
pub mod types;
pub mod config;
pub mod db;
pub mod storage;
pub mod paths;
pub mod checksum;
pub mod url_validator;
pub mod bag;
pub mod xml;
pub mod clamav;
pub mod sword;
pub mod stages;
pub mod restore;
pub mod extract;

pub use error::{PipelineError, Result};
pub use state::DepositState;
pub use types::{AuContainer, Deposit, DepositAction, Journal, LogEntry};
