//! Net Promoter Score.
//!
//! Scores 9-10 are promoters, 7-8 passives and 0-6 detractors. The score is
//! `(promoters - detractors) / total * 100`, rounded half up to an integer.

use crate::aggregation::response::{str_field, time_field, u64_field, Row};
use crate::models::{NpsSummary, PollResponse};
use tracing::debug;

const SCORE_FIELDS: &[&str] = &["pollResponse", "response", "score"];

/// NPS for a set of 0-10 scores; `None` when there are none.
pub fn nps_score(scores: &[u8]) -> Option<i32> {
    nps_summary(scores).score
}

/// Bucket counts and score.
pub fn nps_summary(scores: &[u8]) -> NpsSummary {
    let mut summary = NpsSummary {
        total: scores.len(),
        ..NpsSummary::default()
    };

    for &score in scores {
        match score {
            9..=10 => summary.promoters += 1,
            7..=8 => summary.passives += 1,
            _ => summary.detractors += 1,
        }
    }

    if summary.total > 0 {
        let net = 100 * (summary.promoters as i64 - summary.detractors as i64);
        summary.score = Some(round_half_up(net, summary.total as i64) as i32);
    }

    summary
}

/// `numerator / denominator` rounded with .5 toward positive infinity, so
/// -12.5 becomes -12. Integer math keeps exact halves exact.
fn round_half_up(numerator: i64, denominator: i64) -> i64 {
    (2 * numerator + denominator).div_euclid(2 * denominator)
}

/// Poll answers with a valid 0-10 score. Anything else is dropped.
pub fn poll_responses(rows: &[Row]) -> Vec<PollResponse> {
    rows.iter()
        .filter_map(|row| {
            let score = u64_field(row, SCORE_FIELDS).filter(|s| *s <= 10);
            let Some(score) = score else {
                debug!("Dropping poll row without a 0-10 score");
                return None;
            };
            Some(PollResponse {
                visitor_id: str_field(row, &["visitorId"]),
                score: score as u8,
                browser_time: time_field(row, &["browserTime"]),
            })
        })
        .collect()
}

/// Scores from poll rows, ready for [`nps_summary`].
pub fn scores(responses: &[PollResponse]) -> Vec<u8> {
    responses.iter().map(|r| r.score).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::response::rows;
    use serde_json::json;

    #[test]
    fn test_balanced_scores_are_zero() {
        assert_eq!(nps_score(&[10, 9, 8, 6, 3]), Some(0));
    }

    #[test]
    fn test_empty_is_none() {
        assert_eq!(nps_score(&[]), None);
        assert_eq!(nps_summary(&[]).total, 0);
    }

    #[test]
    fn test_extremes() {
        assert_eq!(nps_score(&[10, 10, 9]), Some(100));
        assert_eq!(nps_score(&[0, 6, 2]), Some(-100));
        assert_eq!(nps_score(&[7, 8]), Some(0));
    }

    #[test]
    fn test_half_rounds_up() {
        // 1 promoter, 2 detractors out of 8: -12.5
        assert_eq!(nps_score(&[10, 0, 0, 7, 7, 7, 8, 8]), Some(-12));
        // 3 promoters, 2 detractors out of 8: 12.5
        assert_eq!(nps_score(&[10, 9, 9, 0, 0, 7, 7, 8]), Some(13));
        // 2 of 3: 66.67
        assert_eq!(nps_score(&[10, 10, 7]), Some(67));
    }

    #[test]
    fn test_exact_halves_with_larger_totals() {
        // 23 promoters, 17 passives out of 40: 57.5
        let mut scores = vec![10u8; 23];
        scores.extend(std::iter::repeat(7).take(17));
        assert_eq!(nps_score(&scores), Some(58));

        // 11 detractors, 29 passives out of 40: -27.5
        let mut scores = vec![0u8; 11];
        scores.extend(std::iter::repeat(8).take(29));
        assert_eq!(nps_score(&scores), Some(-27));
    }

    #[test]
    fn test_summary_counts() {
        let summary = nps_summary(&[10, 9, 8, 6, 3]);
        assert_eq!(summary.promoters, 2);
        assert_eq!(summary.passives, 1);
        assert_eq!(summary.detractors, 2);
        assert_eq!(summary.total, 5);
    }

    #[test]
    fn test_poll_fixture_drops_invalid_scores() {
        let raw: serde_json::Value =
            serde_json::from_str(include_str!("../../fixtures/poll_events.json")).unwrap();
        let responses = poll_responses(&rows(&raw));

        assert_eq!(responses.len(), 5);
        assert!(responses[0].browser_time.is_some());
        assert_eq!(scores(&responses), vec![10, 9, 8, 6, 3]);
        assert_eq!(nps_score(&scores(&responses)), Some(0));
    }

    #[test]
    fn test_alternate_score_fields() {
        let raw = json!([{"response": 9}, {"score": "2"}]);
        let responses = poll_responses(&rows(&raw));
        assert_eq!(scores(&responses), vec![9, 2]);
    }
}
