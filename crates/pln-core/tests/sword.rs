mod common;

use std::collections::HashMap;
use std::fs;
use std::sync::Arc;

use anyhow::Result;
use pln_core::checksum::hash_file;
use pln_core::restore::Restorer;
use pln_core::stages::deposit::Depositor;
use pln_core::stages::status::apply_statement;
use pln_core::stages::{RunOptions, StageKind, StageOutcome, StageRunner};
use pln_core::storage::MemoryStore;
use pln_core::sword::{
    deposit_entry, original_deposit_urls, state_term, statement_url, ServiceDocument, SwordClient,
};
use pln_core::{DepositState, PipelineError};

use common::http::{start, Reply};
use common::{config, context_from, deposit, MarkerScanner};

fn service_document(base: &str) -> String {
    format!(
        r#"<service xmlns="http://www.w3.org/2007/app" xmlns:sword="http://purl.org/net/sword/terms/" xmlns:lom="http://lockssomatic.info/SWORD2">
  <sword:maxUploadSize>10000</sword:maxUploadSize>
  <lom:uploadChecksumType>SHA1</lom:uploadChecksumType>
  <workspace>
    <collection href="{base}/col-iri/42"><title>PKP PLN</title></collection>
  </workspace>
</service>"#
    )
}

fn receipt(base: &str) -> String {
    format!(
        r#"<entry xmlns="http://www.w3.org/2005/Atom">
  <link rel="edit-media" href="{base}/cont-iri/1"/>
  <link rel="http://purl.org/net/sword/terms/statement" type="application/atom+xml;type=feed" href="{base}/statement/1"/>
</entry>"#
    )
}

fn statement(base: &str, term: &str) -> String {
    format!(
        r#"<atom:feed xmlns:atom="http://www.w3.org/2005/Atom" xmlns:sword="http://purl.org/net/sword/terms/">
  <atom:category scheme="http://purl.org/net/sword/terms/state" term="{term}" label="State">The content is preserved.</atom:category>
  <sword:originalDeposit href="{base}/original/PACKAGE.zip"/>
</atom:feed>"#
    )
}

#[test]
fn protocol_documents_are_parsed() -> Result<()> {
    let base = "https://lom.example.org";
    let service = ServiceDocument::parse(&service_document(base))?;
    assert_eq!(service.collection_uri, "https://lom.example.org/col-iri/42");
    assert_eq!(service.max_upload_size.as_deref(), Some("10000"));
    assert_eq!(service.upload_checksum_type.as_deref(), Some("SHA1"));

    assert_eq!(
        statement_url(&receipt(base))?.as_deref(),
        Some("https://lom.example.org/statement/1")
    );
    assert_eq!(state_term(&statement(base, "inProgress"))?.as_deref(), Some("inProgress"));
    assert_eq!(
        original_deposit_urls(&statement(base, "agreement"))?,
        vec!["https://lom.example.org/original/PACKAGE.zip".to_string()]
    );

    let empty = r#"<service><workspace><collection href=""/></workspace></service>"#;
    assert!(matches!(
        ServiceDocument::parse(empty),
        Err(PipelineError::Protocol(_))
    ));
    Ok(())
}

#[test]
fn statement_terms_decide_completion() -> Result<()> {
    let mut deposit = deposit(DepositState::Deposited);

    assert_eq!(
        apply_statement(&mut deposit, &statement("http://x", "agreement"))?,
        StageOutcome::Success
    );
    assert_eq!(deposit.lockss_state.as_deref(), Some("agreement"));

    assert_eq!(
        apply_statement(&mut deposit, &statement("http://x", "inProgress"))?,
        StageOutcome::Failure
    );
    assert_eq!(deposit.lockss_state.as_deref(), Some("inProgress"));

    let err = apply_statement(&mut deposit, "<feed/>").unwrap_err();
    assert_eq!(err.to_string(), "Deposit protocol error: Failed to retrieve term");
    Ok(())
}

#[test]
fn atom_entry_describes_the_staged_package() {
    let mut deposit = deposit(DepositState::Reserialized);
    deposit.journal.title = Some("Tests & Trials".to_string());
    deposit.package_size = Some(123);
    deposit.package_checksum_type = Some("sha1".to_string());
    deposit.package_checksum_value = Some("ABC123".to_string());
    deposit.au_container_id = Some(9);

    let entry = deposit_entry(&deposit, "https://pln.example.org/");
    assert!(entry.contains("<title>Tests &amp; Trials</title>"));
    assert!(entry.contains(&format!("<id>urn:uuid:{}</id>", deposit.uuid_key())));
    assert!(entry.contains(r#"size="123" checksumType="sha1" checksumValue="ABC123""#));
    assert!(entry.contains(&format!(
        "https://pln.example.org/fetch/{}/{}.zip",
        deposit.journal.uuid_key(),
        deposit.uuid_key()
    )));
    assert!(entry.contains(r#"<lom:property name="container_number" value="9"/>"#));
}

#[test]
fn newer_journal_versions_are_held() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = config(dir.path())?;
    let paths = pln_core::paths::FilePaths::new(&config.data_dir, &config.project_dir);
    let sword = Arc::new(SwordClient::new(config.sword.clone(), paths)?);

    let depositor = Depositor::new(sword.clone(), Some("3.1.1".to_string()));
    let mut deposit = deposit(DepositState::Reserialized);
    deposit.journal_version = "3.1.2".to_string();
    assert!(depositor.should_hold(&deposit));
    deposit.journal_version = "3.1.1.0".to_string();
    assert!(!depositor.should_hold(&deposit));

    assert!(!Depositor::new(sword, None).should_hold(&deposit));
    Ok(())
}

#[tokio::test]
async fn deposit_then_status_then_restore() -> Result<()> {
    let package = b"archived package bytes".to_vec();
    let stored_package = package.clone();
    let (base, peer) = start(move |base| {
        let mut routes = HashMap::new();
        routes.insert("/sd-iri".to_string(), Reply::ok(service_document(base)));
        routes.insert(
            "/col-iri/42".to_string(),
            Reply {
                status: 201,
                headers: vec![("Location".to_string(), format!("{base}/receipt/1"))],
                body: receipt(base).into_bytes(),
            },
        );
        routes.insert("/receipt/1".to_string(), Reply::ok(receipt(base)));
        routes.insert("/statement/1".to_string(), Reply::ok(statement(base, "agreement")));
        routes.insert("/original/PACKAGE.zip".to_string(), Reply::ok(stored_package));
        routes
    })
    .await?;

    let dir = tempfile::tempdir()?;
    let mut config = config(dir.path())?;
    config.sword.service_uri = format!("{base}/sd-iri");
    config.sword.save_deposit_xml = true;
    config.held_versions = Some("3.9".to_string());
    let store = MemoryStore::new();
    let context = context_from(config, Arc::new(store.clone()), Arc::new(MarkerScanner))?;

    let mut deposit = deposit(DepositState::Reserialized);
    let journal_uuid = deposit.journal.uuid;
    let staged = context.paths.staging_file(&deposit)?;
    fs::write(&staged, &package)?;
    deposit.package_checksum_type = Some("sha1".to_string());
    deposit.package_checksum_value = Some(hash_file("sha1", &staged)?);
    let id = store.insert_deposit(deposit).await;

    let runner = StageRunner::new(context.store.clone());
    let report = runner
        .run(&StageKind::Deposit.build(&context)?, &RunOptions::default())
        .await?;
    assert_eq!(report.succeeded, 1);

    let sent = store.deposit(id).await.unwrap();
    assert_eq!(sent.state, DepositState::Deposited);
    assert_eq!(sent.deposit_receipt, Some(format!("{base}/receipt/1")));
    assert!(sent.deposit_date.is_some());
    let mut saved_entry = staged.clone().into_os_string();
    saved_entry.push(".xml");
    assert!(fs::read_to_string(&saved_entry)?.contains(&sent.uuid_key()));
    {
        let requests = peer.requests.lock().unwrap();
        let posted = requests
            .iter()
            .find(|(line, _)| line == "POST /col-iri/42")
            .unwrap();
        assert!(posted.1.contains("<lom:content"));
    }

    let report = runner
        .run(&StageKind::Status.build(&context)?, &RunOptions::default())
        .await?;
    assert_eq!(report.succeeded, 1);
    let complete = store.deposit(id).await.unwrap();
    assert_eq!(complete.state, DepositState::Complete);
    assert_eq!(complete.lockss_state.as_deref(), Some("agreement"));

    let restorer = Restorer::new(&store, &context.sword, &context.paths);
    let restored = restorer.restore_journal(journal_uuid).await?;
    assert_eq!(restored.failures, 0);
    assert_eq!(restored.restored.len(), 1);
    let file = &restored.restored[0];
    assert!(file.checksum_ok);
    assert_eq!(file.bytes, package.len() as u64);
    assert_eq!(file.path.file_name().unwrap(), "PACKAGE.zip");
    assert_eq!(fs::read(&file.path)?, package);

    let mut complete = complete;
    let fetched = context.sword.fetch(&mut complete).await?;
    assert_eq!(fetched, context.paths.restore_file(&complete)?);
    assert_eq!(fs::read(&fetched)?, package);
    Ok(())
}

#[tokio::test]
async fn protocol_failures_are_written_to_the_error_log() -> Result<()> {
    let (base, _peer) = start(|_| HashMap::new()).await?;

    let dir = tempfile::tempdir()?;
    let store = MemoryStore::new();
    let context = context_from(config(dir.path())?, Arc::new(store.clone()), Arc::new(MarkerScanner))?;

    let mut deposit = deposit(DepositState::Deposited);
    deposit.deposit_receipt = Some(format!("{base}/receipt/404"));
    let id = store.insert_deposit(deposit).await;

    let report = StageRunner::new(context.store.clone())
        .run(&StageKind::Status.build(&context)?, &RunOptions::default())
        .await?;
    assert_eq!(report.failed, 1);

    let stored = store.deposit(id).await.unwrap();
    // Status failures stay in `deposited` to be polled again.
    assert_eq!(stored.state, DepositState::Deposited);
    assert!(stored.error_log()[0]
        .message
        .starts_with(&format!("GET {base}/receipt/404")));
    assert!(stored.error_log()[0].message.contains("404"));
    assert_eq!(
        stored.processing_log().last().unwrap().message,
        "Status check with the archive failed."
    );
    Ok(())
}

async fn deposit_against(collection: Reply) -> Result<(String, pln_core::Deposit)> {
    let (base, _peer) = start(move |base| {
        let mut routes = HashMap::new();
        routes.insert("/sd-iri".to_string(), Reply::ok(service_document(base)));
        routes.insert("/col-iri/42".to_string(), collection);
        routes
    })
    .await?;

    let dir = tempfile::tempdir()?;
    let mut config = config(dir.path())?;
    config.sword.service_uri = format!("{base}/sd-iri");
    let store = MemoryStore::new();
    let context = context_from(config, Arc::new(store.clone()), Arc::new(MarkerScanner))?;

    let deposit = deposit(DepositState::Reserialized);
    fs::write(context.paths.staging_file(&deposit)?, b"package")?;
    let id = store.insert_deposit(deposit).await;

    let report = StageRunner::new(context.store.clone())
        .run(&StageKind::Deposit.build(&context)?, &RunOptions::default())
        .await?;
    assert_eq!(report.failed, 1);
    Ok((base, store.deposit(id).await.unwrap()))
}

#[tokio::test]
async fn redirected_collection_is_not_a_deposit() -> Result<()> {
    let (base, stored) = deposit_against(Reply {
        status: 302,
        headers: vec![(
            "Location".to_string(),
            "http://elsewhere.example.org/login".to_string(),
        )],
        body: Vec::new(),
    })
    .await?;

    assert_eq!(stored.state, DepositState::DepositError);
    assert_eq!(stored.deposit_receipt, None);
    assert_eq!(stored.deposit_date, None);
    assert!(stored.error_log()[0]
        .message
        .starts_with(&format!("POST {base}/col-iri/42")));
    assert!(stored.error_log()[0].message.contains("302"));
    Ok(())
}

#[tokio::test]
async fn created_deposit_without_a_receipt_location_fails() -> Result<()> {
    let (_base, stored) = deposit_against(Reply {
        status: 201,
        headers: Vec::new(),
        body: Vec::new(),
    })
    .await?;

    assert_eq!(stored.state, DepositState::DepositError);
    assert_eq!(stored.deposit_receipt, None);
    assert!(stored
        .error_log()
        .iter()
        .any(|entry| entry.message.contains("no Location header")));
    Ok(())
}
