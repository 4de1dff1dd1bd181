//! Shared fixtures for the app test modules: a migrated scratch database, a
//! directory client pointed at a mock server, and a frozen clock.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tempfile::NamedTempFile;

use fbp_directory::DirectoryClient;
use fbp_storage::Database;
use fbp_util::LedgerSettings;

use crate::router::AppState;
use crate::telemetry;

pub struct TestContext {
    pub state: AppState,
    pub database: Database,
    pub now: DateTime<Utc>,
    _db_file: NamedTempFile,
}

pub async fn setup(directory_base_url: &str) -> TestContext {
    let metrics = telemetry::init_metrics().expect("metrics init");

    let db_file = NamedTempFile::new().expect("temp db file");
    let url = format!("sqlite://{}?mode=rwc", db_file.path().display());
    let database = Database::connect(&url).await.expect("connect");
    database.run_migrations().await.expect("migrations");

    let base_url = url::Url::parse(directory_base_url).expect("directory url");
    let directory = DirectoryClient::new(base_url, reqwest::Client::new());

    let now = DateTime::parse_from_rfc3339("2026-02-10T12:00:00Z")
        .expect("fixed time")
        .with_timezone(&Utc);
    let ledger = LedgerSettings {
        max_attempts: 4,
        backoff: Duration::from_millis(1),
    };

    let state = AppState::new(metrics, database.clone(), directory, ledger)
        .with_clock(Arc::new(move || now));

    TestContext {
        state,
        database,
        now,
        _db_file: db_file,
    }
}
