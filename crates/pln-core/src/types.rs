use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::DepositState;

/// Journal versions older than the version field are recorded as this.
pub const DEFAULT_JOURNAL_VERSION: &str = "2.4.8";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DepositAction {
    Add,
    Edit,
}

impl DepositAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepositAction::Add => "add",
            DepositAction::Edit => "edit",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "add" => Some(Self::Add),
            "edit" => Some(Self::Edit),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Journal {
    pub id: i64,
    pub uuid: Uuid,
    pub url: String,
    pub title: Option<String>,
    pub issn: Option<String>,
    pub email: Option<String>,
    pub publisher_name: Option<String>,
    pub publisher_url: Option<String>,
    pub status: String,
    pub contacted: Option<DateTime<Utc>>,
    pub notified: Option<DateTime<Utc>>,
}

impl Journal {
    pub fn new(uuid: Uuid, url: impl Into<String>) -> Self {
        Self {
            id: 0,
            uuid,
            url: url.into(),
            title: None,
            issn: None,
            email: None,
            publisher_name: None,
            publisher_url: None,
            status: "healthy".to_string(),
            contacted: None,
            notified: None,
        }
    }

    /// Upper-case UUID, as used in file paths and bag tags.
    pub fn uuid_key(&self) -> String {
        self.uuid.hyphenated().to_string().to_uppercase()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub message: String,
}

impl LogEntry {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Deposit {
    pub id: i64,
    pub deposit_uuid: Uuid,
    pub journal: Journal,
    pub received: DateTime<Utc>,
    pub action: DepositAction,
    pub state: DepositState,
    pub url: String,
    pub checksum_type: String,
    pub checksum_value: String,
    pub package_checksum_type: Option<String>,
    pub package_checksum_value: Option<String>,
    /// Declared size in kB.
    pub size: i64,
    /// Size of the staged package in kB.
    pub package_size: Option<i64>,
    pub volume: String,
    pub issue: String,
    pub pub_date: Option<DateTime<Utc>>,
    pub journal_version: String,
    pub license: BTreeMap<String, String>,
    processing_log: Vec<LogEntry>,
    error_log: Vec<LogEntry>,
    pub deposit_receipt: Option<String>,
    pub deposit_date: Option<DateTime<Utc>>,
    pub lockss_state: Option<String>,
    pub au_container_id: Option<i64>,
    pub harvest_attempts: i32,
}

impl Deposit {
    pub fn new(deposit_uuid: Uuid, journal: Journal, url: impl Into<String>) -> Self {
        Self {
            id: 0,
            deposit_uuid,
            journal,
            received: Utc::now(),
            action: DepositAction::Add,
            state: DepositState::DepositedByJournal,
            url: url.into(),
            checksum_type: "sha1".to_string(),
            checksum_value: String::new(),
            package_checksum_type: None,
            package_checksum_value: None,
            size: 0,
            package_size: None,
            volume: String::new(),
            issue: String::new(),
            pub_date: None,
            journal_version: DEFAULT_JOURNAL_VERSION.to_string(),
            license: BTreeMap::new(),
            processing_log: Vec::new(),
            error_log: Vec::new(),
            deposit_receipt: None,
            deposit_date: None,
            lockss_state: None,
            au_container_id: None,
            harvest_attempts: 0,
        }
    }

    /// Rebuild a deposit with previously persisted logs.
    pub fn with_logs(mut self, processing_log: Vec<LogEntry>, error_log: Vec<LogEntry>) -> Self {
        self.processing_log = processing_log;
        self.error_log = error_log;
        self
    }

    /// Upper-case UUID, as used in file paths and bag tags.
    pub fn uuid_key(&self) -> String {
        self.deposit_uuid.hyphenated().to_string().to_uppercase()
    }

    pub fn log_processing(&mut self, message: impl Into<String>) {
        self.processing_log.push(LogEntry::new(message));
    }

    pub fn log_error(&mut self, message: impl Into<String>) {
        self.error_log.push(LogEntry::new(message));
    }

    pub fn processing_log(&self) -> &[LogEntry] {
        &self.processing_log
    }

    pub fn error_log(&self) -> &[LogEntry] {
        &self.error_log
    }

    /// Processing log rendered as text, one timestamped paragraph per entry.
    pub fn processing_log_text(&self) -> String {
        render_log(&self.processing_log)
    }

    pub fn error_log_text(&self) -> String {
        render_log(&self.error_log)
    }
}

fn render_log(entries: &[LogEntry]) -> String {
    entries
        .iter()
        .map(|entry| format!("{}\n{}", entry.at.to_rfc3339(), entry.message))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuContainer {
    pub id: i64,
    pub open: bool,
    /// Sum of the member deposits' package sizes, in kB.
    pub size: i64,
}
