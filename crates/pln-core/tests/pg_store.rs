use std::env;

use anyhow::Result;
use pln_core::db;
use pln_core::storage::{DepositQuery, DepositStore, PgStore};
use pln_core::{Deposit, DepositState, Journal};
use uuid::Uuid;

#[tokio::test]
async fn deposits_round_trip_through_postgres_when_database_available() -> Result<()> {
    let database_url = match env::var("PLN_TEST_DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("Skipping pg_store test because PLN_TEST_DATABASE_URL is not set");
            return Ok(());
        }
    };

    let pool = db::connect(&database_url).await?;
    db::run_migrations(&pool).await?;
    let store = PgStore::new(pool);

    let mut journal = Journal::new(Uuid::new_v4(), "https://journal.example.org");
    journal.title = Some("Round Trip".to_string());
    journal.id = store.upsert_journal(&journal).await?;
    // Registering again updates in place.
    assert_eq!(store.upsert_journal(&journal).await?, journal.id);

    let mut deposit = Deposit::new(Uuid::new_v4(), journal.clone(), "https://journal.example.org/d.zip");
    deposit.state = DepositState::PayloadValidated;
    deposit.size = 42;
    deposit.license.insert("publishingMode".to_string(), "open".to_string());
    deposit.id = store.insert_deposit(&deposit).await?;

    let query = DepositQuery {
        ids: vec![deposit.id],
        ..DepositQuery::in_state(DepositState::PayloadValidated)
    };
    let mut found = store.find_deposits(&query).await?;
    assert_eq!(found.len(), 1);
    let mut loaded = found.remove(0);
    assert_eq!(loaded.deposit_uuid, deposit.deposit_uuid);
    assert_eq!(loaded.journal.title.as_deref(), Some("Round Trip"));
    assert_eq!(loaded.license.get("publishingMode").map(String::as_str), Some("open"));

    loaded.state = DepositState::BagValidated;
    loaded.log_processing("Bag checksum validation succeeded.");
    store.save_deposit(&loaded).await?;

    assert!(store.find_deposits(&query).await?.is_empty());
    let saved = store
        .find_deposits(&DepositQuery {
            ids: vec![deposit.id],
            ..DepositQuery::in_state(DepositState::BagValidated)
        })
        .await?;
    assert_eq!(saved[0].processing_log().len(), 1);

    let for_journal = store.deposits_for_journal(journal.uuid).await?;
    assert_eq!(for_journal.len(), 1);
    Ok(())
}

#[tokio::test]
async fn containers_open_one_at_a_time_when_database_available() -> Result<()> {
    let database_url = match env::var("PLN_TEST_DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("Skipping pg_store test because PLN_TEST_DATABASE_URL is not set");
            return Ok(());
        }
    };

    let pool = db::connect(&database_url).await?;
    db::run_migrations(&pool).await?;
    let store = PgStore::new(pool);

    let mut container = match store.open_container().await? {
        Some(container) => container,
        None => store.create_container().await?,
    };
    container.size += 10;
    store.update_container(&container).await?;
    assert_eq!(
        store.find_container(container.id).await?.map(|c| c.size),
        Some(container.size)
    );

    container.open = false;
    store.update_container(&container).await?;
    assert!(store.open_container().await?.is_none());
    let fresh = store.create_container().await?;
    assert!(fresh.open);
    assert_ne!(fresh.id, container.id);
    Ok(())
}
