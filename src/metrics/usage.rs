//! Page and feature usage.

use crate::aggregation::response::{str_field, u64_field, Row};
use crate::models::{Feature, FeatureUsage, Page, PageAnalytics};
use std::collections::HashSet;

const PAGE_EVENT_FIELDS: &[&str] = &["numEvents", "numViews", "viewCount", "count"];
const FEATURE_EVENT_FIELDS: &[&str] = &["numEvents", "numClicks", "clickCount", "count"];
const VISITOR_COUNT_FIELDS: &[&str] = &["visitorCount", "uniqueVisitors", "numVisitors"];

#[derive(Debug, Default)]
struct UsageTotals {
    events: u64,
    visitors: u64,
}

/// Sum events; count distinct `visitorId`s, falling back to reported
/// visitor counts on rows that carry no visitor id.
fn usage_totals(rows: &[Row], event_fields: &[&str]) -> UsageTotals {
    let mut events: u64 = 0;
    let mut reported_visitors: u64 = 0;
    let mut visitor_ids = HashSet::new();

    for row in rows {
        events = u64_field(row, event_fields).map_or(events, |n| events.saturating_add(n));
        match str_field(row, &["visitorId"]) {
            Some(id) => {
                visitor_ids.insert(id);
            }
            None => {
                let reported = u64_field(row, VISITOR_COUNT_FIELDS).unwrap_or(0);
                reported_visitors = reported_visitors.saturating_add(reported);
            }
        }
    }

    UsageTotals {
        events,
        visitors: (visitor_ids.len() as u64).saturating_add(reported_visitors),
    }
}

/// Page views and visitors from page-event rows.
pub fn page_analytics(rows: &[Row]) -> PageAnalytics {
    let totals = usage_totals(rows, PAGE_EVENT_FIELDS);
    PageAnalytics {
        view_count: totals.events,
        visitor_count: totals.visitors,
    }
}

/// Feature clicks and visitors from feature-event rows.
pub fn feature_usage(rows: &[Row]) -> FeatureUsage {
    let totals = usage_totals(rows, FEATURE_EVENT_FIELDS);
    FeatureUsage {
        click_count: totals.events,
        visitor_count: totals.visitors,
    }
}

pub fn parse_pages(rows: &[Row]) -> Vec<Page> {
    rows.iter()
        .filter_map(|row| {
            Some(Page {
                id: str_field(row, &["id", "pageId"])?,
                name: str_field(row, &["name"]).unwrap_or_else(|| "Untitled page".to_string()),
            })
        })
        .collect()
}

pub fn parse_features(rows: &[Row]) -> Vec<Feature> {
    rows.iter()
        .filter_map(|row| {
            Some(Feature {
                id: str_field(row, &["id", "featureId"])?,
                name: str_field(row, &["name"]).unwrap_or_else(|| "Untitled feature".to_string()),
            })
        })
        .collect()
}
