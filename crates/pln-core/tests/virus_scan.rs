mod common;

use std::sync::Arc;

use anyhow::Result;
use pln_core::stages::{RunOptions, StageKind, StageRunner};
use pln_core::storage::MemoryStore;
use pln_core::{Deposit, DepositState};

use common::{context, deposit, export_xml, stage_processing_bag, MarkerScanner};

fn messages(deposit: &Deposit) -> Vec<String> {
    deposit
        .processing_log()
        .iter()
        .map(|entry| entry.message.clone())
        .collect()
}

async fn scan(embeds: &[(&str, &[u8])]) -> Result<Deposit> {
    let dir = tempfile::tempdir()?;
    let store = MemoryStore::new();
    let context = context(dir.path(), Arc::new(store.clone()), Arc::new(MarkerScanner))?;

    let deposit = deposit(DepositState::XmlValidated);
    stage_processing_bag(
        &context.paths,
        &deposit,
        &[("clean.xml", export_xml(embeds).as_bytes())],
    )?;
    let id = store.insert_deposit(deposit).await;

    let stage = StageKind::Scan.build(&context)?;
    let report = StageRunner::new(context.store.clone())
        .run(&stage, &RunOptions::default())
        .await?;
    assert_eq!(report.succeeded, 1);

    Ok(store.deposit(id).await.unwrap())
}

#[tokio::test]
async fn clean_embeds_are_logged_in_file_order() -> Result<()> {
    let scanned = scan(&[
        ("file1", b"benign text one".as_slice()),
        ("file2", b"benign text two".as_slice()),
    ])
    .await?;

    assert_eq!(scanned.state, DepositState::VirusChecked);
    let log = messages(&scanned);
    assert!(log.contains(&"clean.xml OK".to_string()));
    assert!(log.contains(&"bagit.txt OK".to_string()));
    let first = log.iter().position(|m| m == "file1 OK").unwrap();
    let second = log.iter().position(|m| m == "file2 OK").unwrap();
    assert!(first < second);
    assert_eq!(
        log.last().map(String::as_str),
        Some("Virus check passed. No infections found.")
    );
    Ok(())
}

#[tokio::test]
async fn infected_embed_is_recorded_not_rejected() -> Result<()> {
    let scanned = scan(&[
        ("file1", b"benign text".as_slice()),
        (
            "file2",
            b"X5O!P%@AP[4\\PZX54(P^)7CC)7}$EICAR-STANDARD-ANTIVIRUS-TEST-FILE!$H+H*".as_slice(),
        ),
    ])
    .await?;

    assert_eq!(scanned.state, DepositState::VirusChecked);
    let log = messages(&scanned);
    let first = log.iter().position(|m| m == "file1 OK").unwrap();
    let second = log.iter().position(|m| m == "file2 FOUND: EICAR").unwrap();
    assert!(first < second);
    // The containing export is itself only base64 text.
    assert!(log.contains(&"clean.xml OK".to_string()));
    Ok(())
}

#[tokio::test]
async fn undecodable_embed_is_an_error_verdict() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = MemoryStore::new();
    let context = context(dir.path(), Arc::new(store.clone()), Arc::new(MarkerScanner))?;

    let deposit = deposit(DepositState::XmlValidated);
    let xml = "<issues xmlns=\"http://pkp.sfu.ca\"><embed filename=\"file1\">not*base64</embed></issues>";
    stage_processing_bag(&context.paths, &deposit, &[("issue.xml", xml.as_bytes())])?;
    let id = store.insert_deposit(deposit).await;

    let stage = StageKind::Scan.build(&context)?;
    StageRunner::new(context.store.clone())
        .run(&stage, &RunOptions::default())
        .await?;

    let scanned = store.deposit(id).await.unwrap();
    assert_eq!(scanned.state, DepositState::VirusChecked);
    assert!(messages(&scanned)
        .iter()
        .any(|m| m.starts_with("file1 ERROR: ")));
    Ok(())
}

#[tokio::test]
async fn multibyte_embed_text_does_not_stop_the_batch() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = MemoryStore::new();
    let context = context(dir.path(), Arc::new(store.clone()), Arc::new(MarkerScanner))?;

    let mut odd = deposit(DepositState::XmlValidated);
    odd.size = 1;
    let xml = format!(
        "<issues xmlns=\"http://pkp.sfu.ca\"><embed filename=\"odd.bin\">{}é</embed></issues>",
        "A".repeat(65_535)
    );
    stage_processing_bag(&context.paths, &odd, &[("issue.xml", xml.as_bytes())])?;
    let odd = store.insert_deposit(odd).await;

    let mut clean = deposit(DepositState::XmlValidated);
    clean.size = 2;
    stage_processing_bag(
        &context.paths,
        &clean,
        &[("clean.xml", export_xml(&[("file1", b"benign".as_slice())]).as_bytes())],
    )?;
    let clean = store.insert_deposit(clean).await;

    let stage = StageKind::Scan.build(&context)?;
    let report = StageRunner::new(context.store.clone())
        .run(&stage, &RunOptions::default())
        .await?;
    assert_eq!(report.succeeded, 2);

    let odd = store.deposit(odd).await.unwrap();
    assert_eq!(odd.state, DepositState::VirusChecked);
    assert!(messages(&odd)
        .iter()
        .any(|m| m.starts_with("odd.bin ERROR: ")));
    let clean = store.deposit(clean).await.unwrap();
    assert_eq!(clean.state, DepositState::VirusChecked);
    assert!(messages(&clean).contains(&"file1 OK".to_string()));
    Ok(())
}
