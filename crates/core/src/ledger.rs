//! Textual format of the per-company follow-up ledger.
//!
//! A ledger object is a CSV-like blob: one fixed header line followed by one
//! line per follow-up event, five semicolon-delimited fields each. The
//! functions here are pure; durable appending lives in the storage layer.

use crate::types::FollowUpEvent;

/// Field delimiter for ledger rows.
pub const DELIMITER: char = ';';

/// Header line written before the first data row of a ledger object.
pub const HEADER: &str = "UserName;Comments;Rating;Company;Subscription";

/// Number of fields in a header or data row.
pub const FIELD_COUNT: usize = 5;

/// Returns the ledger object key for a company.
pub fn object_key(company_id: i64) -> String {
    format!("feedback-{company_id}.csv")
}

/// Formats a follow-up event as a single ledger row, without a trailing
/// newline.
pub fn format_row(event: &FollowUpEvent) -> String {
    format!(
        "{};{};{};{};{}",
        escape_field(&event.user_name),
        escape_field(&event.comments),
        event.rating,
        escape_field(&event.company_name),
        escape_field(&event.subscription),
    )
}

/// Escapes free text so it occupies exactly one field of one physical line.
///
/// Delimiters are replaced with commas and line breaks with spaces; content
/// is substituted, never removed.
fn escape_field(field: &str) -> String {
    field
        .replace(DELIMITER, ",")
        .replace('\n', " ")
        .replace('\r', " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn event(user_name: &str, comments: &str) -> FollowUpEvent {
        FollowUpEvent {
            feedback_id: Uuid::new_v4(),
            user_name: user_name.to_string(),
            comments: comments.to_string(),
            rating: 2,
            company_id: 7,
            company_name: "Acme".to_string(),
            subscription: "Premium".to_string(),
        }
    }

    #[test]
    fn object_key_is_derived_from_company_id() {
        assert_eq!(object_key(7), "feedback-7.csv");
    }

    #[test]
    fn header_matches_field_count() {
        assert_eq!(HEADER.split(DELIMITER).count(), FIELD_COUNT);
    }

    #[test]
    fn plain_fields_pass_through_unchanged() {
        let row = format_row(&event("Ada", "slow responses"));
        assert_eq!(row, "Ada;slow responses;2;Acme;Premium");
    }

    #[test]
    fn delimiters_and_line_breaks_are_substituted() {
        let row = format_row(&event("A;da", "first line\nsecond;part\r\nend"));
        assert!(!row.contains('\n'));
        assert!(!row.contains('\r'));
        assert_eq!(row.split(DELIMITER).count(), FIELD_COUNT);
        assert_eq!(row, "A,da;first line second,part  end;2;Acme;Premium");
    }

    #[test]
    fn escaped_row_parses_back_into_five_fields() {
        let row = format_row(&event("Ada", "contains ; and\nnewline"));
        let fields: Vec<&str> = row.split(DELIMITER).collect();
        assert_eq!(fields.len(), FIELD_COUNT);
        assert_eq!(fields[0], "Ada");
        assert_eq!(fields[2], "2");
        assert_eq!(fields[4], "Premium");
    }
}
