use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;

use fbp_directory::DirectoryClient;
use fbp_storage::{Database, LedgerAppender, LedgerRetry, SqliteLedgerStore};
use fbp_util::LedgerSettings;

use crate::{feedback, overview, telemetry};

/// Shared application state handed to every request handler.
///
/// Invocations share no mutable in-process state: everything mutable lives
/// in the database, and the clock is only swapped out by tests.
#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    storage: Database,
    directory: DirectoryClient,
    appender: Arc<LedgerAppender<SqliteLedgerStore>>,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl AppState {
    pub fn new(
        metrics: PrometheusHandle,
        storage: Database,
        directory: DirectoryClient,
        ledger: LedgerSettings,
    ) -> Self {
        let appender = Arc::new(LedgerAppender::new(
            storage.ledger_objects(),
            LedgerRetry {
                max_attempts: ledger.max_attempts,
                backoff: ledger.backoff,
            },
        ));
        Self {
            metrics,
            storage,
            directory,
            appender,
            clock: Arc::new(Utc::now),
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>) -> Self {
        self.clock = clock;
        self
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn storage(&self) -> &Database {
        &self.storage
    }

    pub fn directory(&self) -> &DirectoryClient {
        &self.directory
    }

    pub fn appender(&self) -> Arc<LedgerAppender<SqliteLedgerStore>> {
        self.appender.clone()
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/api/feedback", post(feedback::handle))
        .route("/api/price-overview/:company_id", get(overview::handle))
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = telemetry::render_metrics(state.metrics());
    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4",
        )],
        body,
    )
}
