use std::time::Instant;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use metrics::{counter, histogram};
use thiserror::Error;
use tracing::{info, warn};

use fbp_core::followup::needs_follow_up;
use fbp_core::submission::{validate, ValidationError};
use fbp_core::types::{FeedbackRecord, FeedbackSubmission, FollowUpEvent};
use fbp_directory::DirectoryError;
use fbp_storage::FeedbackError;

use crate::problem::ProblemResponse;
use crate::router::AppState;

/// Result of an accepted submission: the durable record plus the outcome of
/// the best-effort follow-up publish.
#[derive(Debug)]
pub struct SubmissionOutcome {
    pub record: FeedbackRecord,
    pub follow_up: FollowUpStatus,
}

/// What happened to the follow-up event for an accepted submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowUpStatus {
    NotRequired,
    Published,
    PublishFailed,
}

/// Reasons a submission is rejected. None of these leave state behind: a
/// rejected submission never appears in the feedback store.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("company with id {0} not found")]
    CompanyNotFound(i64),
    #[error("subscription with id {0} not found")]
    SubscriptionNotFound(i64),
    #[error("directory lookup failed: {0}")]
    Directory(#[from] DirectoryError),
    #[error("failed to persist feedback: {0}")]
    Store(#[from] FeedbackError),
}

impl SubmitError {
    fn reason(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::CompanyNotFound(_) => "company_not_found",
            Self::SubscriptionNotFound(_) => "subscription_not_found",
            Self::Directory(_) => "directory",
            Self::Store(_) => "store",
        }
    }
}

/// Processes a feedback submission.
///
/// Validation runs before any external call. The company and its tier must
/// both resolve before anything is written. The record is persisted first;
/// only then is the follow-up decision applied and the event published, so
/// no follow-up event can ever reference an unstored feedback id. A publish
/// failure after the store write is reported in the outcome but does not
/// invalidate the submission: the stored record is authoritative.
pub async fn submit_feedback(
    state: &AppState,
    submission: FeedbackSubmission,
) -> Result<SubmissionOutcome, SubmitError> {
    validate(&submission)?;

    let company = state
        .directory()
        .get_company(submission.company_id)
        .await?
        .ok_or(SubmitError::CompanyNotFound(submission.company_id))?;
    let tier = state
        .directory()
        .get_subscription(company.subscription_id)
        .await?
        .ok_or(SubmitError::SubscriptionNotFound(company.subscription_id))?;

    let record = FeedbackRecord::from_submission(&submission, state.now());
    state.storage().feedback().create(&record).await?;

    if !needs_follow_up(record.rating, &tier.name) {
        return Ok(SubmissionOutcome {
            record,
            follow_up: FollowUpStatus::NotRequired,
        });
    }

    let event = FollowUpEvent::from_record(&record, &company, &tier);
    let follow_up = match state
        .storage()
        .follow_up_queue()
        .enqueue(&event, state.now())
        .await
    {
        Ok(_) => {
            counter!("followup_published_total").increment(1);
            FollowUpStatus::Published
        }
        Err(err) => {
            counter!("followup_publish_failures_total").increment(1);
            warn!(
                stage = "ingest",
                feedback_id = %record.id,
                company_id = record.company_id,
                error = %err,
                "follow-up publish failed after the record was stored"
            );
            FollowUpStatus::PublishFailed
        }
    };

    Ok(SubmissionOutcome { record, follow_up })
}

pub async fn handle(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, ProblemResponse> {
    let start = Instant::now();

    if body.is_empty() {
        return Err(ProblemResponse::new(
            StatusCode::BAD_REQUEST,
            "empty_body",
            "request body is required",
        ));
    }
    let submission: FeedbackSubmission = serde_json::from_slice(&body).map_err(|err| {
        ProblemResponse::new(
            StatusCode::BAD_REQUEST,
            "invalid_json",
            format!("failed to parse request body: {err}"),
        )
    })?;

    match submit_feedback(&state, submission).await {
        Ok(outcome) => {
            counter!("feedback_submissions_total", "outcome" => "accepted").increment(1);
            histogram!("submit_latency_seconds").record(start.elapsed().as_secs_f64());
            info!(
                stage = "ingest",
                feedback_id = %outcome.record.id,
                company_id = outcome.record.company_id,
                rating = outcome.record.rating,
                follow_up = ?outcome.follow_up,
                "feedback accepted"
            );
            Ok((StatusCode::CREATED, Json(outcome.record)).into_response())
        }
        Err(err) => {
            counter!("feedback_submissions_total", "outcome" => err.reason()).increment(1);
            histogram!("submit_latency_seconds").record(start.elapsed().as_secs_f64());
            Err(into_problem(err))
        }
    }
}

fn into_problem(err: SubmitError) -> ProblemResponse {
    let detail = err.to_string();
    match err {
        SubmitError::Validation(_) => {
            ProblemResponse::new(StatusCode::BAD_REQUEST, "invalid_submission", detail)
        }
        SubmitError::CompanyNotFound(_) => {
            ProblemResponse::new(StatusCode::BAD_REQUEST, "company_not_found", detail)
        }
        SubmitError::SubscriptionNotFound(_) => {
            ProblemResponse::new(StatusCode::BAD_REQUEST, "subscription_not_found", detail)
        }
        SubmitError::Directory(DirectoryError::Timeout(_)) => ProblemResponse::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "directory_unavailable",
            detail,
        ),
        SubmitError::Directory(_) => {
            ProblemResponse::new(StatusCode::BAD_GATEWAY, "directory_error", detail)
        }
        SubmitError::Store(_) => {
            ProblemResponse::new(StatusCode::INTERNAL_SERVER_ERROR, "storage_error", detail)
        }
    }
}
