#![allow(dead_code)]

pub mod http;

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use pln_core::bag::Bag;
use pln_core::clamav::{ScanConnector, ScanSession, ScanVerdict};
use pln_core::config::PlnConfig;
use pln_core::paths::FilePaths;
use pln_core::stages::StageContext;
use pln_core::storage::DepositStore;
use pln_core::sword::SwordClient;
use pln_core::{Deposit, DepositState, Journal};
use uuid::Uuid;

pub fn config(data_dir: &Path) -> Result<PlnConfig> {
    let toml = format!(
        r#"
        data_dir = "{}"
        hostname = "pln.example.org"
        max_au_size = 10

        [sword]
        service_uri = "https://lom.example.org/api/sword/2.0/sd-iri"
        staging_uuid = "7AE9D8E5-0E0F-4B1B-A0F4-6C84F4F6D6C5"
        public_base_url = "https://pln.example.org"
        "#,
        data_dir.display()
    );
    Ok(PlnConfig::from_toml_str(&toml)?)
}

pub fn context(
    data_dir: &Path,
    store: Arc<dyn DepositStore>,
    scanner: Arc<dyn ScanConnector>,
) -> Result<StageContext> {
    context_from(config(data_dir)?, store, scanner)
}

pub fn context_from(
    config: PlnConfig,
    store: Arc<dyn DepositStore>,
    scanner: Arc<dyn ScanConnector>,
) -> Result<StageContext> {
    let paths = FilePaths::new(&config.data_dir, &config.project_dir);
    let sword = SwordClient::new(config.sword.clone(), paths.clone())?;
    Ok(StageContext {
        store,
        paths,
        config: Arc::new(config),
        sword: Arc::new(sword),
        scanner,
    })
}

pub fn deposit(state: DepositState) -> Deposit {
    let journal = Journal::new(Uuid::new_v4(), "https://journal.example.org/index.php/test");
    let mut deposit = Deposit::new(
        Uuid::new_v4(),
        journal,
        "https://journal.example.org/index.php/test/pln/deposit.zip",
    );
    deposit.state = state;
    deposit.volume = "4".to_string();
    deposit.issue = "2".to_string();
    deposit.journal_version = "3.1.2".to_string();
    deposit
}

/// Write `files` under `root/data` and turn `root` into a complete bag.
pub fn build_bag(root: &Path, files: &[(&str, &[u8])]) -> Result<Bag> {
    for (name, contents) in files {
        let path = root.join("data").join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)?;
    }
    let mut bag = Bag::load(root)?;
    bag.add_tag("PKP-PLN-OJS-Version", "3.1.2");
    bag.update()?;
    Ok(bag)
}

/// Extract a bag into the processing directory the later stages read from.
pub fn stage_processing_bag(
    paths: &FilePaths,
    deposit: &Deposit,
    files: &[(&str, &[u8])],
) -> Result<Bag> {
    let dir = paths.processing_bag_dir(deposit)?;
    build_bag(&dir, files)
}

pub fn export_xml(embeds: &[(&str, &[u8])]) -> String {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;

    let mut xml = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <issues xmlns=\"http://pkp.sfu.ca\">\n  <issue>\n",
    );
    for (name, contents) in embeds {
        xml.push_str(&format!(
            "    <embed filename=\"{name}\" encoding=\"base64\" mime_type=\"text/plain\">{}</embed>\n",
            STANDARD.encode(contents)
        ));
    }
    xml.push_str("  </issue>\n</issues>\n");
    xml
}

/// Scan oracle that flags any stream containing the EICAR marker.
#[derive(Default)]
pub struct MarkerScanner;

pub struct MarkerSession {
    current: Vec<u8>,
}

#[async_trait]
impl ScanConnector for MarkerScanner {
    async fn connect(&self) -> pln_core::Result<Box<dyn ScanSession>> {
        Ok(Box::new(MarkerSession {
            current: Vec::new(),
        }))
    }
}

#[async_trait]
impl ScanSession for MarkerSession {
    async fn start_stream(&mut self) -> pln_core::Result<()> {
        self.current.clear();
        Ok(())
    }

    async fn stream_chunk(&mut self, chunk: &[u8]) -> pln_core::Result<()> {
        self.current.extend_from_slice(chunk);
        Ok(())
    }

    async fn finish_stream(&mut self) -> pln_core::Result<ScanVerdict> {
        let infected = self
            .current
            .windows(5)
            .any(|window| window == b"EICAR");
        Ok(if infected {
            ScanVerdict::Found("EICAR".to_string())
        } else {
            ScanVerdict::Ok
        })
    }

    async fn end_session(&mut self) -> pln_core::Result<()> {
        Ok(())
    }
}
