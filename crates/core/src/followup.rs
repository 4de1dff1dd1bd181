/// Ratings below this value are considered low enough to follow up on.
const LOW_RATING_CEILING: i32 = 3;

/// Tier names whose low-rated feedback is routed to follow-up handling.
const FOLLOW_UP_TIERS: [&str; 2] = ["premium", "enterprise"];

/// Decides whether a feedback submission requires follow-up processing.
///
/// Low ratings (below 3) for Premium and Enterprise subscribers qualify.
/// Tier matching is case-insensitive; unknown tier names never qualify.
/// Total over all `(rating, tier_name)` pairs and free of side effects.
pub fn needs_follow_up(rating: i32, tier_name: &str) -> bool {
    rating < LOW_RATING_CEILING
        && FOLLOW_UP_TIERS
            .iter()
            .any(|tier| tier.eq_ignore_ascii_case(tier_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_rating_on_premium_or_enterprise_qualifies() {
        assert!(needs_follow_up(1, "Premium"));
        assert!(needs_follow_up(2, "Enterprise"));
    }

    #[test]
    fn tier_match_is_case_insensitive() {
        assert!(needs_follow_up(1, "premium"));
        assert!(needs_follow_up(2, "ENTERPRISE"));
        assert!(needs_follow_up(2, "enterPRISE"));
    }

    #[test]
    fn basic_and_unknown_tiers_never_qualify() {
        assert!(!needs_follow_up(1, "Basic"));
        assert!(!needs_follow_up(1, "Trial"));
        assert!(!needs_follow_up(1, ""));
    }

    #[test]
    fn ratings_of_three_and_above_never_qualify() {
        assert!(!needs_follow_up(3, "Premium"));
        assert!(!needs_follow_up(5, "Enterprise"));
    }

    #[test]
    fn truth_table_over_ratings_and_tiers() {
        let tiers = [
            "Basic",
            "basic",
            "Premium",
            "premium",
            "PREMIUM",
            "Enterprise",
            "ENTERPRISE",
            "Trial",
            "",
        ];
        for rating in 1..=5 {
            for tier in tiers {
                let expected = rating < 3
                    && (tier.eq_ignore_ascii_case("premium")
                        || tier.eq_ignore_ascii_case("enterprise"));
                assert_eq!(
                    needs_follow_up(rating, tier),
                    expected,
                    "rating={rating} tier={tier:?}"
                );
            }
        }
    }
}
