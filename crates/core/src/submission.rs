use thiserror::Error;

use crate::types::FeedbackSubmission;

/// Structural validation failures for a feedback submission.
///
/// All checks are independent of any external state and run before the
/// orchestrator touches the directory or the store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("userName is required")]
    MissingUserName,
    #[error("comments is required")]
    MissingComments,
    #[error("rating must be between 1 and 5")]
    RatingOutOfRange,
    #[error("companyId must be a positive number")]
    InvalidCompanyId,
}

/// Validates a submission.
///
/// Checks run in a fixed order (user name, comments, rating, company id)
/// and the first failure is reported.
pub fn validate(submission: &FeedbackSubmission) -> Result<(), ValidationError> {
    if submission.user_name.trim().is_empty() {
        return Err(ValidationError::MissingUserName);
    }
    if submission.comments.trim().is_empty() {
        return Err(ValidationError::MissingComments);
    }
    if !(1..=5).contains(&submission.rating) {
        return Err(ValidationError::RatingOutOfRange);
    }
    if submission.company_id <= 0 {
        return Err(ValidationError::InvalidCompanyId);
    }
    Ok(())
}
