use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Company record owned by the external directory service.
///
/// The subscription is referenced by id and must be resolved with a second
/// directory call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Company {
    pub id: i64,
    pub name: String,
    pub subscription_id: i64,
}

/// Subscription tier resolved from the external directory service.
///
/// Known tier names are `Basic`, `Premium` and `Enterprise`, but the name is
/// kept as free text: unknown tiers are legal and simply never qualify for
/// follow-up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionTier {
    pub id: i64,
    #[serde(rename = "type")]
    pub name: String,
    #[serde(rename = "price", with = "rust_decimal::serde::float")]
    pub price_per_message: Decimal,
}

/// Incoming feedback submission, prior to validation.
///
/// Fields default so that a missing field surfaces as a validation error
/// rather than a deserialization failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackSubmission {
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub comments: String,
    #[serde(default)]
    pub rating: i32,
    #[serde(default)]
    pub company_id: i64,
}

/// Persisted feedback document.
///
/// Created exactly once per accepted submission and never updated or
/// deleted. `company_id` doubles as the store's partition key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackRecord {
    pub id: Uuid,
    pub user_name: String,
    pub comments: String,
    pub rating: i32,
    pub company_id: i64,
    pub created_at: DateTime<Utc>,
}

impl FeedbackRecord {
    /// Builds a record from a validated submission with a fresh id and the
    /// supplied creation time.
    pub fn from_submission(submission: &FeedbackSubmission, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_name: submission.user_name.clone(),
            comments: submission.comments.clone(),
            rating: submission.rating,
            company_id: submission.company_id,
            created_at,
        }
    }
}

/// Queue payload carrying everything the ledger appender needs, so the
/// consumer never has to call back into the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowUpEvent {
    pub feedback_id: Uuid,
    pub user_name: String,
    pub comments: String,
    pub rating: i32,
    pub company_id: i64,
    pub company_name: String,
    pub subscription: String,
}

impl FollowUpEvent {
    /// Assembles the event from a persisted record plus company and tier
    /// display data.
    pub fn from_record(record: &FeedbackRecord, company: &Company, tier: &SubscriptionTier) -> Self {
        Self {
            feedback_id: record.id,
            user_name: record.user_name.clone(),
            comments: record.comments.clone(),
            rating: record.rating,
            company_id: record.company_id,
            company_name: company.name.clone(),
            subscription: tier.name.clone(),
        }
    }
}

/// Aggregated price and rating summary for one company.
///
/// Computed on demand and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceOverview {
    pub company_name: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_price: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub average_rating: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submission_deserializes_camel_case_with_defaults() {
        let submission: FeedbackSubmission =
            serde_json::from_str(r#"{"userName":"Ada","companyId":7}"#).expect("submission");
        assert_eq!(submission.user_name, "Ada");
        assert_eq!(submission.company_id, 7);
        assert_eq!(submission.comments, "");
        assert_eq!(submission.rating, 0);
    }

    #[test]
    fn tier_reads_directory_wire_format() {
        let tier: SubscriptionTier =
            serde_json::from_str(r#"{"id":3,"type":"Premium","price":2.5}"#).expect("tier");
        assert_eq!(tier.name, "Premium");
        assert_eq!(tier.price_per_message, Decimal::new(25, 1));
    }

    #[test]
    fn follow_up_event_round_trips_as_json() {
        let record = FeedbackRecord {
            id: Uuid::new_v4(),
            user_name: "Ada".to_string(),
            comments: "slow responses".to_string(),
            rating: 2,
            company_id: 7,
            created_at: Utc::now(),
        };
        let company = Company {
            id: 7,
            name: "Acme".to_string(),
            subscription_id: 3,
        };
        let tier = SubscriptionTier {
            id: 3,
            name: "Enterprise".to_string(),
            price_per_message: Decimal::new(200, 2),
        };

        let event = FollowUpEvent::from_record(&record, &company, &tier);
        let json = serde_json::to_string(&event).expect("serialize");
        assert!(json.contains("\"feedbackId\""));
        assert!(json.contains("\"companyName\":\"Acme\""));

        let parsed: FollowUpEvent = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, event);
    }
}
