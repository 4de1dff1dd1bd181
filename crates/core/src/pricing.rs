use rust_decimal::Decimal;

use crate::types::PriceOverview;

/// Builds the price overview for a company from its feedback ratings.
///
/// The total price is the exact decimal product of the feedback count and
/// the tier's per-message price. The average rating is the arithmetic mean
/// rounded to one decimal place with round-half-to-even, so a mean of 2.25
/// rounds to 2.2. A company without feedback yields an explicit zero
/// overview rather than an error.
pub fn price_overview(
    company_name: &str,
    price_per_message: Decimal,
    ratings: &[i32],
) -> PriceOverview {
    if ratings.is_empty() {
        return PriceOverview {
            company_name: company_name.to_string(),
            total_price: Decimal::ZERO,
            average_rating: Decimal::ZERO,
        };
    }

    let count = Decimal::from(ratings.len() as u64);
    let total_price = count * price_per_message;

    let sum: i64 = ratings.iter().map(|rating| i64::from(*rating)).sum();
    let average_rating = (Decimal::from(sum) / count).round_dp(1);

    PriceOverview {
        company_name: company_name.to_string(),
        total_price,
        average_rating,
    }
}
