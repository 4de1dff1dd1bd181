use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use metrics::counter;
use thiserror::Error;
use tracing::info;

use fbp_core::pricing;
use fbp_core::types::PriceOverview;
use fbp_directory::DirectoryError;
use fbp_storage::FeedbackError;

use crate::problem::ProblemResponse;
use crate::router::AppState;

/// Failures while computing a price overview. Absence of the company or its
/// tier is not an error and is reported as `Ok(None)` instead.
#[derive(Debug, Error)]
pub enum OverviewError {
    #[error("directory lookup failed: {0}")]
    Directory(#[from] DirectoryError),
    #[error("failed to load feedback: {0}")]
    Store(#[from] FeedbackError),
}

/// Computes the price overview for a company.
///
/// The overview is recomputed from the full feedback partition on every
/// request; nothing is cached. A company without feedback yields an explicit
/// zero overview.
pub async fn price_overview(
    state: &AppState,
    company_id: i64,
) -> Result<Option<PriceOverview>, OverviewError> {
    let Some(company) = state.directory().get_company(company_id).await? else {
        return Ok(None);
    };
    let Some(tier) = state
        .directory()
        .get_subscription(company.subscription_id)
        .await?
    else {
        return Ok(None);
    };

    let records = state.storage().feedback().list_for_company(company_id).await?;
    let ratings: Vec<i32> = records.iter().map(|record| record.rating).collect();

    Ok(Some(pricing::price_overview(
        &company.name,
        tier.price_per_message,
        &ratings,
    )))
}

pub async fn handle(
    State(state): State<AppState>,
    Path(company_id): Path<i64>,
) -> Result<Response, ProblemResponse> {
    if company_id <= 0 {
        counter!("overview_requests_total", "result" => "invalid").increment(1);
        return Err(ProblemResponse::new(
            StatusCode::BAD_REQUEST,
            "invalid_company_id",
            "companyId must be a positive number",
        ));
    }

    match price_overview(&state, company_id).await {
        Ok(Some(overview)) => {
            counter!("overview_requests_total", "result" => "ok").increment(1);
            info!(
                stage = "overview",
                company_id,
                company = %overview.company_name,
                total = %overview.total_price,
                average = %overview.average_rating,
                "price overview computed"
            );
            Ok(Json(overview).into_response())
        }
        Ok(None) => {
            counter!("overview_requests_total", "result" => "not_found").increment(1);
            Err(ProblemResponse::new(
                StatusCode::NOT_FOUND,
                "company_not_found",
                format!("company with id {company_id} not found"),
            ))
        }
        Err(err) => {
            counter!("overview_requests_total", "result" => "error").increment(1);
            Err(into_problem(err))
        }
    }
}

fn into_problem(err: OverviewError) -> ProblemResponse {
    let detail = err.to_string();
    match err {
        OverviewError::Directory(DirectoryError::Timeout(_)) => ProblemResponse::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "directory_unavailable",
            detail,
        ),
        OverviewError::Directory(_) => {
            ProblemResponse::new(StatusCode::BAD_GATEWAY, "directory_error", detail)
        }
        OverviewError::Store(_) => {
            ProblemResponse::new(StatusCode::INTERNAL_SERVER_ERROR, "storage_error", detail)
        }
    }
}
