use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use super::{load_processing_bag, DepositProcessor, Stage, StageContext, StageOutcome};
use crate::clamav::{scan_embed, scan_file, ScanConnector, ScanSession, ScanVerdict};
use crate::error::Result;
use crate::paths::FilePaths;
use crate::state::DepositState;
use crate::types::Deposit;
use crate::xml::XmlParser;

/// Scans every file of the processing bag, plus the payloads embedded in
/// its XML exports.
pub struct VirusScanner {
    paths: FilePaths,
    connector: Arc<dyn ScanConnector>,
}

impl VirusScanner {
    pub fn new(paths: FilePaths, connector: Arc<dyn ScanConnector>) -> Self {
        Self { paths, connector }
    }

    async fn scan_all(
        &self,
        session: &mut dyn ScanSession,
        files: &[PathBuf],
        deposit: &mut Deposit,
    ) -> Result<()> {
        for path in files {
            let name = display_name(path);
            let verdict = scan_file(session, path).await?;
            deposit.log_processing(verdict.describe(&name));

            let is_xml = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("xml"));
            if is_xml {
                self.scan_embedded(session, path, &name, deposit).await?;
            }
        }
        Ok(())
    }

    async fn scan_embedded(
        &self,
        session: &mut dyn ScanSession,
        path: &Path,
        name: &str,
        deposit: &mut Deposit,
    ) -> Result<()> {
        let mut parser = XmlParser::new();
        let document = match parser.load(path) {
            Ok(document) => document,
            Err(err) => {
                deposit.log_processing(ScanVerdict::Error(err.to_string()).describe(name));
                return Ok(());
            }
        };

        let mut embeds = document.embeds()?;
        while let Some(payload) = embeds.next_embed()? {
            let verdict = scan_embed(session, &payload).await?;
            deposit.log_processing(verdict.describe(&payload.filename));
        }
        Ok(())
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)?
        .map(|entry| entry.map(|entry| entry.path()))
        .collect::<std::io::Result<_>>()?;
    entries.sort();
    for path in entries {
        if path.is_dir() {
            collect_files(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

#[async_trait]
impl DepositProcessor for VirusScanner {
    async fn process(&self, deposit: &mut Deposit) -> Result<StageOutcome> {
        let bag = load_processing_bag(&self.paths, deposit)?;
        let mut files = Vec::new();
        collect_files(bag.root(), &mut files)?;

        let mut session = self.connector.connect().await?;
        let scanned = self.scan_all(session.as_mut(), &files, deposit).await;
        let ended = session.end_session().await;
        scanned?;
        ended?;

        Ok(StageOutcome::Success)
    }
}

pub fn stage(context: &StageContext) -> Stage {
    Stage::new(
        "scan",
        DepositState::XmlValidated,
        DepositState::VirusChecked,
        DepositState::VirusError,
        VirusScanner::new(context.paths.clone(), context.scanner.clone()),
    )
    .messages(
        "Virus check passed. No infections found.",
        "Virus check failed.",
    )
}
