//! Persistence port for deposits and AU containers, with a Postgres adapter,
//! an in-memory adapter and a read-only wrapper for dry runs.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::state::DepositState;
use crate::types::{AuContainer, Deposit, DepositAction, Journal, LogEntry};

/// Selection criteria for a stage batch.
#[derive(Debug, Clone, PartialEq)]
pub struct DepositQuery {
    pub state: DepositState,
    /// Restrict to these deposit ids. Empty means every deposit in `state`.
    pub ids: Vec<i64>,
    pub limit: Option<i64>,
}

impl DepositQuery {
    pub fn in_state(state: DepositState) -> Self {
        Self {
            state,
            ids: Vec::new(),
            limit: None,
        }
    }
}

#[async_trait]
pub trait DepositStore: Send + Sync {
    /// Deposits matching `query`, ordered by action, then size, then id.
    async fn find_deposits(&self, query: &DepositQuery) -> Result<Vec<Deposit>>;
    async fn save_deposit(&self, deposit: &Deposit) -> Result<()>;
    async fn open_container(&self) -> Result<Option<AuContainer>>;
    async fn find_container(&self, id: i64) -> Result<Option<AuContainer>>;
    async fn create_container(&self) -> Result<AuContainer>;
    async fn update_container(&self, container: &AuContainer) -> Result<()>;
    async fn deposits_for_journal(&self, journal_uuid: Uuid) -> Result<Vec<Deposit>>;
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

const DEPOSIT_COLUMNS: &str = r#"
    d.id,
    d.deposit_uuid,
    d.received,
    d.action,
    d.state,
    d.url,
    d.checksum_type,
    d.checksum_value,
    d.package_checksum_type,
    d.package_checksum_value,
    d.size,
    d.package_size,
    d.volume,
    d.issue,
    d.pub_date,
    d.journal_version,
    d.license,
    d.processing_log,
    d.error_log,
    d.deposit_receipt,
    d.deposit_date,
    d.lockss_state,
    d.au_container_id,
    d.harvest_attempts,
    j.id AS journal_id,
    j.uuid AS journal_uuid,
    j.url AS journal_url,
    j.title AS journal_title,
    j.issn AS journal_issn,
    j.email AS journal_email,
    j.publisher_name AS journal_publisher_name,
    j.publisher_url AS journal_publisher_url,
    j.status AS journal_status,
    j.contacted AS journal_contacted,
    j.notified AS journal_notified
"#;

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Register a journal, returning its id. Existing journals are matched by UUID.
    pub async fn upsert_journal(&self, journal: &Journal) -> Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO journal (
                uuid, url, title, issn, email, publisher_name, publisher_url, status
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (uuid) DO UPDATE SET
                url = EXCLUDED.url,
                title = EXCLUDED.title,
                issn = EXCLUDED.issn,
                email = EXCLUDED.email,
                publisher_name = EXCLUDED.publisher_name,
                publisher_url = EXCLUDED.publisher_url
            RETURNING id
            "#,
        )
        .bind(journal.uuid)
        .bind(&journal.url)
        .bind(&journal.title)
        .bind(&journal.issn)
        .bind(&journal.email)
        .bind(&journal.publisher_name)
        .bind(&journal.publisher_url)
        .bind(&journal.status)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("id")?)
    }

    /// Insert a new deposit for an already registered journal, returning its id.
    pub async fn insert_deposit(&self, deposit: &Deposit) -> Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO deposit (
                deposit_uuid, journal_id, received, action, state, url,
                checksum_type, checksum_value, size, volume, issue, pub_date,
                journal_version, license
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING id
            "#,
        )
        .bind(deposit.deposit_uuid)
        .bind(deposit.journal.id)
        .bind(deposit.received)
        .bind(deposit.action.as_str())
        .bind(deposit.state.as_str())
        .bind(&deposit.url)
        .bind(&deposit.checksum_type)
        .bind(&deposit.checksum_value)
        .bind(deposit.size)
        .bind(&deposit.volume)
        .bind(&deposit.issue)
        .bind(deposit.pub_date)
        .bind(&deposit.journal_version)
        .bind(serde_json::to_value(&deposit.license)?)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("id")?)
    }
}

fn journal_from_row(row: &PgRow) -> Result<Journal> {
    Ok(Journal {
        id: row.try_get("journal_id")?,
        uuid: row.try_get("journal_uuid")?,
        url: row.try_get("journal_url")?,
        title: row.try_get("journal_title")?,
        issn: row.try_get("journal_issn")?,
        email: row.try_get("journal_email")?,
        publisher_name: row.try_get("journal_publisher_name")?,
        publisher_url: row.try_get("journal_publisher_url")?,
        status: row.try_get("journal_status")?,
        contacted: row.try_get("journal_contacted")?,
        notified: row.try_get("journal_notified")?,
    })
}

fn deposit_from_row(row: &PgRow) -> Result<Deposit> {
    let action_str: String = row.try_get("action")?;
    let action = DepositAction::from_str(&action_str)
        .ok_or_else(|| {
            PipelineError::Validation(format!("unknown deposit action '{action_str}'"))
        })?;
    let state_str: String = row.try_get("state")?;
    let state: DepositState = state_str.parse()?;

    let license: Value = row.try_get("license")?;
    let processing_log: Value = row.try_get("processing_log")?;
    let error_log: Value = row.try_get("error_log")?;
    let processing_log: Vec<LogEntry> = serde_json::from_value(processing_log)?;
    let error_log: Vec<LogEntry> = serde_json::from_value(error_log)?;

    let mut deposit = Deposit::new(
        row.try_get("deposit_uuid")?,
        journal_from_row(row)?,
        row.try_get::<String, _>("url")?,
    )
    .with_logs(processing_log, error_log);

    deposit.id = row.try_get("id")?;
    deposit.received = row.try_get("received")?;
    deposit.action = action;
    deposit.state = state;
    deposit.checksum_type = row.try_get("checksum_type")?;
    deposit.checksum_value = row.try_get("checksum_value")?;
    deposit.package_checksum_type = row.try_get("package_checksum_type")?;
    deposit.package_checksum_value = row.try_get("package_checksum_value")?;
    deposit.size = row.try_get("size")?;
    deposit.package_size = row.try_get("package_size")?;
    deposit.volume = row.try_get("volume")?;
    deposit.issue = row.try_get("issue")?;
    deposit.pub_date = row.try_get("pub_date")?;
    deposit.journal_version = row.try_get("journal_version")?;
    deposit.license = serde_json::from_value(license)?;
    deposit.deposit_receipt = row.try_get("deposit_receipt")?;
    deposit.deposit_date = row.try_get("deposit_date")?;
    deposit.lockss_state = row.try_get("lockss_state")?;
    deposit.au_container_id = row.try_get("au_container_id")?;
    deposit.harvest_attempts = row.try_get("harvest_attempts")?;

    Ok(deposit)
}

fn container_from_row(row: &PgRow) -> Result<AuContainer> {
    Ok(AuContainer {
        id: row.try_get("id")?,
        open: row.try_get("open")?,
        size: row.try_get("size")?,
    })
}

#[async_trait]
impl DepositStore for PgStore {
    async fn find_deposits(&self, query: &DepositQuery) -> Result<Vec<Deposit>> {
        let ids: Option<Vec<i64>> = if query.ids.is_empty() {
            None
        } else {
            Some(query.ids.clone())
        };

        let sql = format!(
            r#"
            SELECT {DEPOSIT_COLUMNS}
            FROM deposit d
            JOIN journal j ON j.id = d.journal_id
            WHERE d.state = $1
              AND ($2::bigint[] IS NULL OR d.id = ANY($2))
            ORDER BY d.action ASC, d.size ASC, d.id ASC
            LIMIT $3
            "#
        );

        let rows = sqlx::query(&sql)
            .bind(query.state.as_str())
            .bind(ids)
            .bind(query.limit)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(deposit_from_row).collect()
    }

    async fn save_deposit(&self, deposit: &Deposit) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE deposit
            SET state = $2,
                action = $3,
                url = $4,
                checksum_type = $5,
                checksum_value = $6,
                package_checksum_type = $7,
                package_checksum_value = $8,
                size = $9,
                package_size = $10,
                volume = $11,
                issue = $12,
                pub_date = $13,
                journal_version = $14,
                license = $15,
                processing_log = $16,
                error_log = $17,
                deposit_receipt = $18,
                deposit_date = $19,
                lockss_state = $20,
                au_container_id = $21,
                harvest_attempts = $22
            WHERE id = $1
            "#,
        )
        .bind(deposit.id)
        .bind(deposit.state.as_str())
        .bind(deposit.action.as_str())
        .bind(&deposit.url)
        .bind(&deposit.checksum_type)
        .bind(&deposit.checksum_value)
        .bind(&deposit.package_checksum_type)
        .bind(&deposit.package_checksum_value)
        .bind(deposit.size)
        .bind(deposit.package_size)
        .bind(&deposit.volume)
        .bind(&deposit.issue)
        .bind(deposit.pub_date)
        .bind(&deposit.journal_version)
        .bind(serde_json::to_value(&deposit.license)?)
        .bind(serde_json::to_value(deposit.processing_log())?)
        .bind(serde_json::to_value(deposit.error_log())?)
        .bind(&deposit.deposit_receipt)
        .bind(deposit.deposit_date)
        .bind(&deposit.lockss_state)
        .bind(deposit.au_container_id)
        .bind(deposit.harvest_attempts)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PipelineError::NotFound(format!("deposit {}", deposit.id)));
        }

        Ok(())
    }

    async fn open_container(&self) -> Result<Option<AuContainer>> {
        let row = sqlx::query("SELECT id, open, size FROM au_container WHERE open LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(container_from_row).transpose()
    }

    async fn find_container(&self, id: i64) -> Result<Option<AuContainer>> {
        let row = sqlx::query("SELECT id, open, size FROM au_container WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(container_from_row).transpose()
    }

    async fn create_container(&self) -> Result<AuContainer> {
        let row = sqlx::query(
            "INSERT INTO au_container (open, size) VALUES (TRUE, 0) RETURNING id, open, size",
        )
        .fetch_one(&self.pool)
        .await?;
        container_from_row(&row)
    }

    async fn update_container(&self, container: &AuContainer) -> Result<()> {
        let result = sqlx::query("UPDATE au_container SET open = $2, size = $3 WHERE id = $1")
            .bind(container.id)
            .bind(container.open)
            .bind(container.size)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(PipelineError::NotFound(format!("au container {}", container.id)));
        }

        Ok(())
    }

    async fn deposits_for_journal(&self, journal_uuid: Uuid) -> Result<Vec<Deposit>> {
        let sql = format!(
            r#"
            SELECT {DEPOSIT_COLUMNS}
            FROM deposit d
            JOIN journal j ON j.id = d.journal_id
            WHERE j.uuid = $1
            ORDER BY d.received ASC, d.id ASC
            "#
        );

        let rows = sqlx::query(&sql)
            .bind(journal_uuid)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(deposit_from_row).collect()
    }
}

#[derive(Default)]
struct MemoryState {
    deposits: BTreeMap<i64, Deposit>,
    containers: BTreeMap<i64, AuContainer>,
    next_deposit_id: i64,
    next_container_id: i64,
}

/// In-process store used by tests and simulations.
#[derive(Default, Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new deposit, assigning it the next id.
    pub async fn insert_deposit(&self, mut deposit: Deposit) -> i64 {
        let mut state = self.inner.lock().await;
        state.next_deposit_id += 1;
        deposit.id = state.next_deposit_id;
        let id = deposit.id;
        state.deposits.insert(id, deposit);
        id
    }

    pub async fn deposit(&self, id: i64) -> Option<Deposit> {
        self.inner.lock().await.deposits.get(&id).cloned()
    }

    pub async fn containers(&self) -> Vec<AuContainer> {
        self.inner.lock().await.containers.values().cloned().collect()
    }
}

#[async_trait]
impl DepositStore for MemoryStore {
    async fn find_deposits(&self, query: &DepositQuery) -> Result<Vec<Deposit>> {
        let state = self.inner.lock().await;
        let mut deposits: Vec<Deposit> = state
            .deposits
            .values()
            .filter(|deposit| deposit.state == query.state)
            .filter(|deposit| query.ids.is_empty() || query.ids.contains(&deposit.id))
            .cloned()
            .collect();

        deposits.sort_by(|a, b| {
            a.action
                .as_str()
                .cmp(b.action.as_str())
                .then(a.size.cmp(&b.size))
                .then(a.id.cmp(&b.id))
        });

        if let Some(limit) = query.limit {
            deposits.truncate(usize::try_from(limit.max(0)).unwrap_or(usize::MAX));
        }

        Ok(deposits)
    }

    async fn save_deposit(&self, deposit: &Deposit) -> Result<()> {
        let mut state = self.inner.lock().await;
        match state.deposits.get_mut(&deposit.id) {
            Some(existing) => {
                *existing = deposit.clone();
                Ok(())
            }
            None => Err(PipelineError::NotFound(format!("deposit {}", deposit.id))),
        }
    }

    async fn open_container(&self) -> Result<Option<AuContainer>> {
        let state = self.inner.lock().await;
        Ok(state.containers.values().find(|c| c.open).cloned())
    }

    async fn find_container(&self, id: i64) -> Result<Option<AuContainer>> {
        Ok(self.inner.lock().await.containers.get(&id).cloned())
    }

    async fn create_container(&self) -> Result<AuContainer> {
        let mut state = self.inner.lock().await;
        if state.containers.values().any(|c| c.open) {
            return Err(PipelineError::Validation(
                "an open AU container already exists".into(),
            ));
        }
        state.next_container_id += 1;
        let container = AuContainer {
            id: state.next_container_id,
            open: true,
            size: 0,
        };
        state.containers.insert(container.id, container.clone());
        Ok(container)
    }

    async fn update_container(&self, container: &AuContainer) -> Result<()> {
        let mut state = self.inner.lock().await;
        if container.open
            && state
                .containers
                .values()
                .any(|c| c.open && c.id != container.id)
        {
            return Err(PipelineError::Validation(
                "an open AU container already exists".into(),
            ));
        }
        match state.containers.get_mut(&container.id) {
            Some(existing) => {
                *existing = container.clone();
                Ok(())
            }
            None => Err(PipelineError::NotFound(format!(
                "au container {}",
                container.id
            ))),
        }
    }

    async fn deposits_for_journal(&self, journal_uuid: Uuid) -> Result<Vec<Deposit>> {
        let state = self.inner.lock().await;
        Ok(state
            .deposits
            .values()
            .filter(|deposit| deposit.journal.uuid == journal_uuid)
            .cloned()
            .collect())
    }
}

/// Wraps a store for dry runs: reads pass through, writes are dropped.
pub struct ReadOnlyStore {
    inner: Arc<dyn DepositStore>,
}

impl ReadOnlyStore {
    pub fn new(inner: Arc<dyn DepositStore>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl DepositStore for ReadOnlyStore {
    async fn find_deposits(&self, query: &DepositQuery) -> Result<Vec<Deposit>> {
        self.inner.find_deposits(query).await
    }

    async fn save_deposit(&self, deposit: &Deposit) -> Result<()> {
        tracing::debug!(deposit = %deposit.deposit_uuid, "dry run: deposit not saved");
        Ok(())
    }

    async fn open_container(&self) -> Result<Option<AuContainer>> {
        self.inner.open_container().await
    }

    async fn find_container(&self, id: i64) -> Result<Option<AuContainer>> {
        self.inner.find_container(id).await
    }

    async fn create_container(&self) -> Result<AuContainer> {
        tracing::debug!("dry run: AU container not created");
        Ok(AuContainer {
            id: 0,
            open: true,
            size: 0,
        })
    }

    async fn update_container(&self, container: &AuContainer) -> Result<()> {
        tracing::debug!(container = container.id, "dry run: AU container not updated");
        Ok(())
    }

    async fn deposits_for_journal(&self, journal_uuid: Uuid) -> Result<Vec<Deposit>> {
        self.inner.deposits_for_journal(journal_uuid).await
    }
}
