use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use metrics::counter;
use thiserror::Error;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use fbp_core::types::FollowUpEvent;
use fbp_storage::{Database, LedgerAppender, LedgerError, QueueError, SqliteLedgerStore};
use fbp_util::WorkerSettings;

/// Background consumer that drains the follow-up queue into the ledger.
///
/// Delivery is at-least-once: a claimed message stays leased while the
/// append runs and is only removed after success, so a crash or append
/// failure re-delivers it once the lease lapses. A re-delivered event
/// appends a second, identical ledger row; the ledger does not deduplicate.
pub struct FollowUpWorker {
    database: Database,
    appender: Arc<LedgerAppender<SqliteLedgerStore>>,
    settings: WorkerSettings,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

/// Summary of one drain cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainOutcome {
    pub processed: usize,
    pub failed: usize,
    pub dead: usize,
}

impl FollowUpWorker {
    /// Creates a worker with the default clock.
    pub fn new(
        database: Database,
        appender: Arc<LedgerAppender<SqliteLedgerStore>>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            database,
            appender,
            settings,
            clock: Arc::new(Utc::now),
        }
    }

    /// Overrides the clock used for claiming and leasing.
    #[cfg(test)]
    pub fn with_clock(mut self, clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>) -> Self {
        self.clock = clock;
        self
    }

    /// Runs the worker loop in the background.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run_loop().await;
        })
    }

    async fn run_loop(self) {
        let mut ticker = interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = self.run_once().await {
                error!(stage = "followup", error = %err, "queue drain failed");
            }
        }
    }

    /// Claims one batch of due messages and appends each to its ledger.
    pub async fn run_once(&self) -> Result<DrainOutcome, WorkerError> {
        let now = (self.clock)();
        let lease = ChronoDuration::milliseconds(self.settings.lease.as_millis() as i64);
        let queue = self.database.follow_up_queue();
        let claimed = queue
            .claim_due(now, self.settings.batch_size, lease)
            .await?;

        let mut outcome = DrainOutcome::default();
        for message in claimed {
            counter!("followup_deliveries_total").increment(1);

            let event: FollowUpEvent = match serde_json::from_str(&message.payload_json) {
                Ok(event) => event,
                Err(err) => {
                    warn!(
                        stage = "followup",
                        message_id = %message.id,
                        error = %err,
                        "undecodable follow-up payload, dead-lettering"
                    );
                    counter!("followup_dead_total").increment(1);
                    queue.mark_dead(message.id).await?;
                    outcome.dead += 1;
                    continue;
                }
            };

            match self.appender.append(&event).await {
                Ok(receipt) => {
                    if receipt.attempts > 1 {
                        counter!("ledger_append_retries_total")
                            .increment(u64::from(receipt.attempts - 1));
                    }
                    queue.complete(message.id).await?;
                    outcome.processed += 1;
                    info!(
                        stage = "followup",
                        feedback_id = %event.feedback_id,
                        company_id = event.company_id,
                        attempts = receipt.attempts,
                        "ledger row appended"
                    );
                }
                Err(err) => {
                    if matches!(err, LedgerError::Contention { .. }) {
                        counter!("ledger_contention_total").increment(1);
                    }
                    if message.attempts >= self.settings.max_deliveries {
                        warn!(
                            stage = "followup",
                            message_id = %message.id,
                            deliveries = message.attempts,
                            error = %err,
                            "delivery budget exhausted, dead-lettering"
                        );
                        counter!("followup_dead_total").increment(1);
                        queue.mark_dead(message.id).await?;
                        outcome.dead += 1;
                    } else {
                        warn!(
                            stage = "followup",
                            message_id = %message.id,
                            deliveries = message.attempts,
                            error = %err,
                            "ledger append failed, message will be re-delivered"
                        );
                        outcome.failed += 1;
                    }
                }
            }
        }

        if outcome.processed > 0 || outcome.dead > 0 {
            debug!(
                stage = "followup",
                processed = outcome.processed,
                failed = outcome.failed,
                dead = outcome.dead,
                "follow-up queue drained"
            );
        }
        Ok(outcome)
    }
}

/// Errors that abort a whole drain cycle.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::{submit_feedback, FollowUpStatus};
    use crate::testutil::{setup, TestContext};
    use fbp_core::ledger::{object_key, DELIMITER, FIELD_COUNT, HEADER};
    use fbp_core::types::FeedbackSubmission;
    use fbp_storage::LedgerStore;
    use httpmock::prelude::*;
    use serde_json::json;
    use std::time::Duration;

    fn worker_settings() -> WorkerSettings {
        WorkerSettings {
            poll_interval: Duration::from_millis(10),
            batch_size: 16,
            lease: Duration::from_secs(30),
            max_deliveries: 3,
        }
    }

    fn worker_for(ctx: &TestContext, settings: WorkerSettings) -> FollowUpWorker {
        let now = ctx.now;
        FollowUpWorker::new(ctx.database.clone(), ctx.state.appender(), settings)
            .with_clock(Arc::new(move || now))
    }

    fn mock_enterprise_directory(server: &MockServer) {
        server.mock(|when, then| {
            when.method(GET).path("/companies/7");
            then.status(200)
                .json_body(json!({"id": 7, "name": "Acme", "subscriptionId": 3}));
        });
        server.mock(|when, then| {
            when.method(GET).path("/subscriptions/3");
            then.status(200)
                .json_body(json!({"id": 3, "type": "Enterprise", "price": 2.0}));
        });
    }

    async fn ledger_lines(ctx: &TestContext, company_id: i64) -> Vec<String> {
        let (content, _) = ctx
            .database
            .ledger_objects()
            .read(&object_key(company_id))
            .await
            .expect("read ledger")
            .expect("ledger present");
        content.lines().map(str::to_string).collect()
    }

    #[tokio::test]
    async fn empty_queue_drains_to_nothing() {
        let server = MockServer::start();
        let ctx = setup(&server.base_url()).await;

        let drained = worker_for(&ctx, worker_settings())
            .run_once()
            .await
            .expect("drain");
        assert_eq!(drained, DrainOutcome::default());
    }

    #[tokio::test]
    async fn end_to_end_submission_reaches_the_ledger() {
        let server = MockServer::start();
        mock_enterprise_directory(&server);
        let ctx = setup(&server.base_url()).await;

        let outcome = submit_feedback(
            &ctx.state,
            FeedbackSubmission {
                user_name: "Ada".to_string(),
                comments: "unusable; support\nnever answers".to_string(),
                rating: 1,
                company_id: 7,
            },
        )
        .await
        .expect("submission accepted");
        assert_eq!(outcome.follow_up, FollowUpStatus::Published);

        let worker = worker_for(&ctx, worker_settings());
        let drained = worker.run_once().await.expect("drain");
        assert_eq!(drained.processed, 1);

        let lines = ledger_lines(&ctx, 7).await;
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], HEADER);
        assert_eq!(lines[1].split(DELIMITER).count(), FIELD_COUNT);

        // A duplicate delivery of the same event appends a second identical row.
        let duplicate = FollowUpEvent {
            feedback_id: outcome.record.id,
            user_name: outcome.record.user_name.clone(),
            comments: outcome.record.comments.clone(),
            rating: outcome.record.rating,
            company_id: 7,
            company_name: "Acme".to_string(),
            subscription: "Enterprise".to_string(),
        };
        ctx.database
            .follow_up_queue()
            .enqueue(&duplicate, ctx.now)
            .await
            .expect("duplicate enqueue");

        let drained = worker.run_once().await.expect("drain duplicate");
        assert_eq!(drained.processed, 1);

        let lines = ledger_lines(&ctx, 7).await;
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], lines[2]);
    }

    #[tokio::test]
    async fn undecodable_payloads_are_dead_lettered() {
        let server = MockServer::start();
        let ctx = setup(&server.base_url()).await;

        let stamp = ctx.now.to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        sqlx::query(
            "INSERT INTO follow_up_queue (id, payload_json, enqueued_at, available_at, attempts, status) \
             VALUES (?, ?, ?, ?, 0, 'QUEUED')",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind("{broken")
        .bind(&stamp)
        .bind(&stamp)
        .execute(ctx.database.pool())
        .await
        .expect("insert poison message");

        let drained = worker_for(&ctx, worker_settings())
            .run_once()
            .await
            .expect("drain");
        assert_eq!(drained.dead, 1);
        assert_eq!(
            ctx.database
                .follow_up_queue()
                .dead_count()
                .await
                .expect("dead count"),
            1
        );
    }

    #[tokio::test]
    async fn exhausted_delivery_budget_dead_letters_the_message() {
        let server = MockServer::start();
        mock_enterprise_directory(&server);
        let ctx = setup(&server.base_url()).await;

        submit_feedback(
            &ctx.state,
            FeedbackSubmission {
                user_name: "Ada".to_string(),
                comments: "never works".to_string(),
                rating: 1,
                company_id: 7,
            },
        )
        .await
        .expect("submission accepted");

        // Appends cannot succeed once the ledger table is gone.
        sqlx::query("DROP TABLE ledger_objects")
            .execute(ctx.database.pool())
            .await
            .expect("drop ledger table");

        let mut settings = worker_settings();
        settings.max_deliveries = 1;
        let drained = worker_for(&ctx, settings)
            .run_once()
            .await
            .expect("drain");
        assert_eq!(drained.dead, 1);
        assert_eq!(drained.processed, 0);
    }

    #[tokio::test]
    async fn failed_appends_leave_the_message_leased_for_redelivery() {
        let server = MockServer::start();
        mock_enterprise_directory(&server);
        let ctx = setup(&server.base_url()).await;

        submit_feedback(
            &ctx.state,
            FeedbackSubmission {
                user_name: "Ada".to_string(),
                comments: "never works".to_string(),
                rating: 2,
                company_id: 7,
            },
        )
        .await
        .expect("submission accepted");

        sqlx::query("DROP TABLE ledger_objects")
            .execute(ctx.database.pool())
            .await
            .expect("drop ledger table");

        let drained = worker_for(&ctx, worker_settings())
            .run_once()
            .await
            .expect("drain");
        assert_eq!(drained.failed, 1);
        assert_eq!(drained.dead, 0);

        // Still pending, but leased: an immediate second drain sees nothing.
        assert_eq!(
            ctx.database
                .follow_up_queue()
                .pending_count()
                .await
                .expect("pending"),
            1
        );
        let drained = worker_for(&ctx, worker_settings())
            .run_once()
            .await
            .expect("second drain");
        assert_eq!(drained, DrainOutcome::default());
    }
}
