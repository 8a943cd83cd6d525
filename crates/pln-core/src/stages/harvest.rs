use async_trait::async_trait;
use reqwest::redirect::Policy;
use tokio::io::AsyncWriteExt;

use super::{DepositProcessor, Stage, StageContext, StageOutcome};
use crate::error::Result;
use crate::paths::FilePaths;
use crate::state::DepositState;
use crate::types::Deposit;
use crate::url_validator::UrlValidator;

const MAX_REDIRECTS: usize = 3;

/// Downloads a journal's package to the harvest directory.
pub struct Harvester {
    paths: FilePaths,
    http: reqwest::Client,
    validator: UrlValidator,
    max_attempts: i32,
}

impl Harvester {
    pub fn new(
        paths: FilePaths,
        http: reqwest::Client,
        validator: UrlValidator,
        max_attempts: i32,
    ) -> Self {
        Self {
            paths,
            http,
            validator,
            max_attempts,
        }
    }
}

#[async_trait]
impl DepositProcessor for Harvester {
    async fn process(&self, deposit: &mut Deposit) -> Result<StageOutcome> {
        if deposit.harvest_attempts >= self.max_attempts {
            deposit.log_processing(format!(
                "Deposit harvest attempts exceeded {}.",
                self.max_attempts
            ));
            return Ok(StageOutcome::Failure);
        }
        deposit.harvest_attempts += 1;

        let url = match self.validator.validate(&deposit.url) {
            Ok(url) => url,
            Err(err) => {
                deposit.log_error(err.to_string());
                return Ok(StageOutcome::Failure);
            }
        };

        let mut response = match self.http.get(url).send().await {
            Ok(response) => response,
            Err(err) if err.is_redirect() => {
                deposit.log_error(format!(
                    "Harvest of {} was refused at a redirect: {}",
                    deposit.url,
                    error_chain(&err)
                ));
                return Ok(StageOutcome::Failure);
            }
            Err(err) => return Err(err.into()),
        };
        let status = response.status();
        if !status.is_success() {
            deposit.log_error(format!(
                "Harvest of {} failed with HTTP status {status}.",
                deposit.url
            ));
            return Ok(StageOutcome::Failure);
        }

        let path = self.paths.harvest_file(deposit)?;
        let mut file = tokio::fs::File::create(&path).await?;
        let mut bytes = 0u64;
        while let Some(chunk) = response.chunk().await? {
            bytes += chunk.len() as u64;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        tracing::info!(deposit = %deposit.deposit_uuid, bytes, "deposit harvested");
        deposit.log_processing(format!("Harvested {bytes} bytes from {}.", deposit.url));
        Ok(StageOutcome::Success)
    }
}

/// Follow at most a few redirects, and only to URLs the validator accepts.
pub fn redirect_policy(validator: UrlValidator) -> Policy {
    Policy::custom(move |attempt| {
        if attempt.previous().len() > MAX_REDIRECTS {
            return attempt.error(format!("more than {MAX_REDIRECTS} redirects"));
        }
        match validator.validate(attempt.url().as_str()) {
            Ok(_) => attempt.follow(),
            Err(err) => attempt.error(err.to_string()),
        }
    })
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

pub fn stage(context: &StageContext) -> Result<Stage> {
    let config = &context.config;
    let validator = UrlValidator::new(config.forbidden_hosts());
    let http = reqwest::Client::builder()
        .redirect(redirect_policy(validator.clone()))
        .connect_timeout(config.sword.connect_timeout())
        .user_agent(config.sword.user_agent.clone())
        .build()?;
    let harvester = Harvester::new(
        context.paths.clone(),
        http,
        validator,
        config.max_harvest_attempts,
    );

    Ok(Stage::new(
        "harvest",
        DepositState::DepositedByJournal,
        DepositState::Harvested,
        DepositState::HarvestError,
        harvester,
    )
    .messages("Deposit harvested.", "Deposit harvest failed."))
}
