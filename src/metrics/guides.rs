//! Guide list parsing and guide-event metrics.

use crate::aggregation::response::{str_field, time_field, u64_field, Row};
use crate::models::{Guide, GuideMetrics};
use std::collections::HashSet;
use tracing::debug;

/// Guide event types the metrics care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuideEventKind {
    Seen,
    Advanced,
    Completed,
    Dismissed,
    Other,
}

impl GuideEventKind {
    pub fn from_type(event_type: &str) -> Self {
        match event_type {
            "guideSeen" => GuideEventKind::Seen,
            "guideAdvanced" => GuideEventKind::Advanced,
            "guideCompleted" => GuideEventKind::Completed,
            "guideDismissed" => GuideEventKind::Dismissed,
            _ => GuideEventKind::Other,
        }
    }
}

/// Parse the guide list endpoint. Rows without an id are dropped.
pub fn parse_guides(rows: &[Row]) -> Vec<Guide> {
    rows.iter()
        .filter_map(|row| {
            let Some(id) = str_field(row, &["id", "guideId"]) else {
                debug!("Skipping guide row without id");
                return None;
            };
            Some(Guide {
                id,
                name: str_field(row, &["name"]).unwrap_or_else(|| "Untitled guide".to_string()),
                state: str_field(row, &["state"]).unwrap_or_else(|| "unknown".to_string()),
                created_at: time_field(row, &["createdAt"]),
                last_updated_at: time_field(row, &["lastUpdatedAt"]),
            })
        })
        .collect()
}

/// Public guides first, then most recently updated.
pub fn rank_guides(guides: &mut [Guide]) {
    guides.sort_by(|a, b| {
        (b.state == "public")
            .cmp(&(a.state == "public"))
            .then_with(|| b.last_updated_at.cmp(&a.last_updated_at))
    });
}

/// Derive metrics for `guide_id` from guide-event rows.
///
/// Rows may be raw events (one per row) or grouped rows carrying a `count`.
/// Rows tagged with a different guide id are ignored.
pub fn guide_metrics(guide_id: &str, rows: &[Row]) -> GuideMetrics {
    let mut metrics = GuideMetrics {
        guide_id: guide_id.to_string(),
        ..GuideMetrics::default()
    };
    let mut visitors = HashSet::new();

    for row in rows {
        if let Some(other) = str_field(row, &["guideId"]) {
            if other != guide_id {
                continue;
            }
        }

        let count = u64_field(row, &["count", "numEvents"]).unwrap_or(1);
        let kind = str_field(row, &["type"])
            .map(|t| GuideEventKind::from_type(&t))
            .unwrap_or(GuideEventKind::Other);

        match kind {
            GuideEventKind::Seen => metrics.views = metrics.views.saturating_add(count),
            GuideEventKind::Advanced | GuideEventKind::Completed => {
                metrics.completions = metrics.completions.saturating_add(count)
            }
            GuideEventKind::Dismissed => {
                metrics.dismissals = metrics.dismissals.saturating_add(count)
            }
            GuideEventKind::Other => {}
        }

        if let Some(visitor) = str_field(row, &["visitorId"]) {
            visitors.insert(visitor);
        }
    }

    metrics.unique_visitors = visitors.len() as u64;
    metrics.completion_rate = completion_rate(metrics.completions, metrics.views);
    metrics
}

/// Completions per view as a percentage with one decimal; 0 without views.
pub fn completion_rate(completions: u64, views: u64) -> f64 {
    if views == 0 {
        return 0.0;
    }
    (completions as f64 / views as f64 * 1000.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::response::rows;
    use serde_json::json;

    #[test]
    fn test_parse_guides_fixture() {
        let raw: serde_json::Value =
            serde_json::from_str(include_str!("../../fixtures/guides.json")).unwrap();
        let guides = parse_guides(&rows(&raw));

        assert_eq!(guides.len(), 3);
        assert_eq!(guides[0].id, "g-welcome");
        assert_eq!(guides[0].state, "public");
        assert!(guides[0].created_at.is_some());
        assert_eq!(guides[2].name, "Untitled guide");
    }

    #[test]
    fn test_rank_guides_puts_public_first() {
        let raw: serde_json::Value =
            serde_json::from_str(include_str!("../../fixtures/guides.json")).unwrap();
        let mut guides = parse_guides(&rows(&raw));
        rank_guides(&mut guides);

        assert_eq!(guides[0].state, "public");
        assert_eq!(guides[1].state, "public");
        assert_eq!(guides[2].state, "draft");
        assert!(guides[0].last_updated_at >= guides[1].last_updated_at);
    }

    #[test]
    fn test_guide_metrics_grouped_rows() {
        let raw: serde_json::Value =
            serde_json::from_str(include_str!("../../fixtures/guide_events.json")).unwrap();
        let metrics = guide_metrics("g-welcome", &rows(&raw));

        assert_eq!(metrics.views, 10);
        assert_eq!(metrics.completions, 4);
        assert_eq!(metrics.dismissals, 3);
        assert_eq!(metrics.unique_visitors, 3);
        assert_eq!(metrics.completion_rate, 40.0);
    }

    #[test]
    fn test_guide_metrics_raw_events_and_foreign_rows() {
        let raw = json!({"results": [
            {"type": "guideSeen", "visitorId": "v1", "guideId": "g1"},
            {"type": "guideSeen", "visitorId": "v2", "guideId": "g1"},
            {"type": "guideSeen", "visitorId": "v3"},
            {"type": "guideCompleted", "visitorId": "v1", "guideId": "g1"},
            {"type": "guideSeen", "visitorId": "v9", "guideId": "other"},
            {"type": "guideTimeout", "visitorId": "v2"}
        ]});
        let metrics = guide_metrics("g1", &rows(&raw));

        assert_eq!(metrics.views, 3);
        assert_eq!(metrics.completions, 1);
        assert_eq!(metrics.unique_visitors, 3);
        assert_eq!(metrics.completion_rate, 33.3);
    }

    #[test]
    fn test_guide_metrics_empty_response() {
        let metrics = guide_metrics("g1", &rows(&json!({})));
        assert_eq!(metrics.views, 0);
        assert_eq!(metrics.completion_rate, 0.0);
    }

    #[test]
    fn test_huge_counts_saturate() {
        let raw = json!({"results": [
            {"type": "guideSeen", "count": u64::MAX},
            {"type": "guideSeen", "count": 3},
            {"type": "guideDismissed", "count": u64::MAX},
            {"type": "guideDismissed", "count": 1}
        ]});
        let metrics = guide_metrics("g1", &rows(&raw));
        assert_eq!(metrics.views, u64::MAX);
        assert_eq!(metrics.dismissals, u64::MAX);
    }
}
