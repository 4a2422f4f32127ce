//! Data models for the analytics dashboard.
//!
//! Plain records fetched from the Pendo API, the metrics derived from them,
//! and the report structures handed to the renderers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of entity a stored metric snapshot describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Guide,
    Page,
    Feature,
    Visitor,
    Account,
    Poll,
}

impl EntityType {
    /// Column value used in the metric store.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Guide => "guide",
            EntityType::Page => "page",
            EntityType::Feature => "feature",
            EntityType::Visitor => "visitor",
            EntityType::Account => "account",
            EntityType::Poll => "poll",
        }
    }

    /// Parse a stored column value.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "guide" => Some(EntityType::Guide),
            "page" => Some(EntityType::Page),
            "feature" => Some(EntityType::Feature),
            "visitor" => Some(EntityType::Visitor),
            "account" => Some(EntityType::Account),
            "poll" => Some(EntityType::Poll),
            _ => None,
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An in-app guide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Guide {
    pub id: String,
    pub name: String,
    /// Publication state (`public`, `draft`, `disabled`, ...).
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated_at: Option<DateTime<Utc>>,
}

/// A tagged page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub id: String,
    pub name: String,
}

/// A tagged feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub id: String,
    pub name: String,
}

/// A visitor record, optionally joined with its event count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Visitor {
    pub visitor_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_visit: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_visit: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_events: Option<u64>,
}

/// An account record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub account_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_visit: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_visit: Option<DateTime<Utc>>,
}

/// A single answer to an NPS poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visitor_id: Option<String>,
    /// Score on the 0-10 scale.
    pub score: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub browser_time: Option<DateTime<Utc>>,
}

/// Engagement metrics for one guide over the query window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuideMetrics {
    pub guide_id: String,
    pub views: u64,
    pub completions: u64,
    pub dismissals: u64,
    pub unique_visitors: u64,
    /// Completions per view, as a percentage with one decimal.
    pub completion_rate: f64,
}

/// Page traffic over the query window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageAnalytics {
    pub view_count: u64,
    pub visitor_count: u64,
}

/// Feature usage over the query window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureUsage {
    pub click_count: u64,
    pub visitor_count: u64,
}

/// Net Promoter Score breakdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NpsSummary {
    pub promoters: usize,
    pub passives: usize,
    pub detractors: usize,
    pub total: usize,
    /// `None` when nobody answered.
    pub score: Option<i32>,
}

/// A guide together with its metrics (absent when the query failed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuideReport {
    pub guide: Guide,
    pub metrics: Option<GuideMetrics>,
}

/// A page together with its analytics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageReport {
    pub page: Page,
    pub analytics: Option<PageAnalytics>,
}

/// A feature together with its usage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureReport {
    pub feature: Feature,
    pub usage: Option<FeatureUsage>,
}

/// Everything collected for one dashboard refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardData {
    pub generated_at: DateTime<Utc>,
    pub window_days: u32,
    pub guides: Vec<GuideReport>,
    pub pages: Vec<PageReport>,
    pub features: Vec<FeatureReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nps: Option<NpsSummary>,
}

impl DashboardData {
    /// Creates an empty dashboard for the given window.
    pub fn new(generated_at: DateTime<Utc>, window_days: u32) -> Self {
        Self {
            generated_at,
            window_days,
            guides: Vec::new(),
            pages: Vec::new(),
            features: Vec::new(),
            nps: None,
        }
    }

    /// Total guide views across all guides with metrics.
    pub fn total_guide_views(&self) -> u64 {
        self.guides
            .iter()
            .filter_map(|g| g.metrics.as_ref())
            .fold(0u64, |total, m| total.saturating_add(m.views))
    }

    /// Total page views across all pages with analytics.
    pub fn total_page_views(&self) -> u64 {
        self.pages
            .iter()
            .filter_map(|p| p.analytics)
            .fold(0u64, |total, a| total.saturating_add(a.view_count))
    }
}

/// Structured LLM summary of a dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub headline: String,
    #[serde(default)]
    pub insights: Vec<String>,
    #[serde(default)]
    pub risks: Vec<String>,
}

/// Result of asking the LLM for a summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SummaryOutcome {
    /// The model produced a parseable summary.
    Available(Summary),
    /// The model failed or answered with something unparseable.
    Unavailable { reason: String },
    /// Summaries are turned off.
    Disabled,
}

/// Metadata about a generated report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportMetadata {
    pub base_url: String,
    pub generated_at: DateTime<Utc>,
    pub window_days: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,
    pub duration_seconds: f64,
}

/// The complete dashboard report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub metadata: ReportMetadata,
    pub data: DashboardData,
    pub summary: SummaryOutcome,
}

/// One row of the metric store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSnapshot {
    pub entity_type: EntityType,
    pub entity_id: String,
    /// UTC day (`YYYY-MM-DD`) the snapshot belongs to.
    pub bucket: String,
    pub name: String,
    pub metrics: serde_json::Value,
    pub fetched_at: DateTime<Utc>,
}

/// Size of one list endpoint and its first record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListOverview {
    pub count: usize,
    pub sample: Option<serde_json::Value>,
}

impl ListOverview {
    pub fn from_rows(rows: Vec<serde_json::Map<String, serde_json::Value>>) -> Self {
        Self {
            count: rows.len(),
            sample: rows.into_iter().next().map(serde_json::Value::Object),
        }
    }
}

/// What the subscription exposes through the list endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataOverview {
    pub timestamp: DateTime<Utc>,
    pub guides: ListOverview,
    pub features: ListOverview,
    pub pages: ListOverview,
    pub reports: ListOverview,
}

/// Daily bucket key for a timestamp.
pub fn bucket_for(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_entity_type_round_trip() {
        for kind in [
            EntityType::Guide,
            EntityType::Page,
            EntityType::Feature,
            EntityType::Visitor,
            EntityType::Account,
            EntityType::Poll,
        ] {
            assert_eq!(EntityType::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(EntityType::parse("segment"), None);
    }

    #[test]
    fn test_page_analytics_serializes_camel_case() {
        let json = serde_json::to_value(PageAnalytics::default()).unwrap();
        assert_eq!(json, serde_json::json!({"viewCount": 0, "visitorCount": 0}));
    }

    #[test]
    fn test_summary_outcome_tagging() {
        let json = serde_json::to_value(SummaryOutcome::Unavailable {
            reason: "timeout".to_string(),
        })
        .unwrap();
        assert_eq!(json["status"], "unavailable");
        assert_eq!(json["reason"], "timeout");
    }

    #[test]
    fn test_list_overview_counts_and_samples_first_row() {
        let raw: serde_json::Value =
            serde_json::from_str(include_str!("../fixtures/guides.json")).unwrap();
        let overview = ListOverview::from_rows(crate::aggregation::response::rows(&raw));

        assert_eq!(overview.count, 4);
        assert_eq!(overview.sample.as_ref().unwrap()["id"], "g-welcome");
        assert_eq!(ListOverview::from_rows(Vec::new()), ListOverview::default());
    }

    #[test]
    fn test_bucket_for() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 23, 59, 59).unwrap();
        assert_eq!(bucket_for(at), "2024-03-09");
    }

    #[test]
    fn test_dashboard_totals_skip_missing_metrics() {
        let mut data = DashboardData::new(Utc::now(), 30);
        data.guides.push(GuideReport {
            guide: Guide {
                id: "g1".to_string(),
                name: "Welcome".to_string(),
                state: "public".to_string(),
                created_at: None,
                last_updated_at: None,
            },
            metrics: Some(GuideMetrics {
                guide_id: "g1".to_string(),
                views: 12,
                ..GuideMetrics::default()
            }),
        });
        data.pages.push(PageReport {
            page: Page {
                id: "p1".to_string(),
                name: "Home".to_string(),
            },
            analytics: None,
        });

        assert_eq!(data.total_guide_views(), 12);
        assert_eq!(data.total_page_views(), 0);
    }
}
