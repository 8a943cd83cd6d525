use std::cmp::Ordering;
use std::sync::Arc;

use async_trait::async_trait;

use super::{DepositProcessor, Stage, StageContext, StageOutcome};
use crate::error::Result;
use crate::state::DepositState;
use crate::sword::SwordClient;
use crate::types::Deposit;

/// Sends staged packages to the archive, holding back journals running
/// versions the network does not accept yet.
pub struct Depositor {
    sword: Arc<SwordClient>,
    held_versions: Option<String>,
}

impl Depositor {
    pub fn new(sword: Arc<SwordClient>, held_versions: Option<String>) -> Self {
        Self {
            sword,
            held_versions,
        }
    }

    pub fn should_hold(&self, deposit: &Deposit) -> bool {
        match self.held_versions.as_deref() {
            Some(held) if !held.is_empty() => {
                compare_versions(&deposit.journal_version, held) == Ordering::Greater
            }
            _ => false,
        }
    }
}

#[async_trait]
impl DepositProcessor for Depositor {
    async fn process(&self, deposit: &mut Deposit) -> Result<StageOutcome> {
        if self.should_hold(deposit) {
            return Ok(StageOutcome::Hold(DepositState::Hold));
        }

        self.sword.create_deposit(deposit).await?;
        Ok(StageOutcome::Success)
    }
}

/// Compare dotted version strings numerically, treating missing components
/// as zero. Non-numeric parts compare by their leading digits.
pub fn compare_versions(left: &str, right: &str) -> Ordering {
    let parse = |version: &str| -> Vec<u64> {
        version
            .trim()
            .split('.')
            .map(|part| {
                let digits: String = part.chars().take_while(|c| c.is_ascii_digit()).collect();
                digits.parse().unwrap_or(0)
            })
            .collect()
    };
    let left = parse(left);
    let right = parse(right);

    for index in 0..left.len().max(right.len()) {
        let a = left.get(index).copied().unwrap_or(0);
        let b = right.get(index).copied().unwrap_or(0);
        match a.cmp(&b) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

pub fn stage(context: &StageContext) -> Stage {
    Stage::new(
        "deposit",
        DepositState::Reserialized,
        DepositState::Deposited,
        DepositState::DepositError,
        Depositor::new(context.sword.clone(), context.config.held_versions.clone()),
    )
    .messages(
        "Deposit to the archive succeeded.",
        "Deposit to the archive failed.",
    )
}
