//! Fetch, normalize and store.
//!
//! Lists are fetched first and a list failure aborts the run. Per-entity
//! metric queries then fan out with bounded concurrency; a failed query is
//! logged and leaves that entity without metrics.

use crate::aggregation::request::{
    accounts_pipeline, feature_events_pipeline, guide_events_flat, guide_events_pipeline,
    page_events_pipeline, poll_events_pipeline, request_id, visitors_pipeline,
};
use crate::aggregation::{PendoClient, TimeSeries};
use crate::config::Config;
use crate::error::ApiResult;
use crate::metrics;
use crate::models::{
    bucket_for, Account, DashboardData, EntityType, FeatureReport, GuideReport, MetricSnapshot,
    NpsSummary, PageReport, Visitor,
};
use crate::storage::MetricStore;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What to fetch and how hard to hit the API.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub days: u32,
    pub top_n: usize,
    pub entity_limit: usize,
    pub concurrency: usize,
    /// (guide id, poll id) of the NPS poll, if one is tracked.
    pub nps_poll: Option<(String, String)>,
    /// Query guide events with the flat request shape.
    pub flat_guide_events: bool,
    pub show_progress: bool,
}

impl SyncOptions {
    pub fn from_config(config: &Config, show_progress: bool) -> Self {
        Self {
            days: config.api.days,
            top_n: config.report.top_n,
            entity_limit: config.storage.entity_limit,
            concurrency: config.general.concurrency.max(1),
            nps_poll: config.nps.poll(),
            flat_guide_events: false,
            show_progress,
        }
    }

    fn window(&self, now: DateTime<Utc>) -> Option<TimeSeries> {
        Some(TimeSeries::last_days(now, self.days))
    }
}

/// Counts from one `run_sync`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub bucket: String,
    pub guides: usize,
    pub pages: usize,
    pub features: usize,
    pub visitors: usize,
    pub accounts: usize,
    pub nps: bool,
    pub written: usize,
}

fn spinner(show: bool) -> ProgressBar {
    if !show {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    let template = "{spinner:.green} [{elapsed_precise}] {msg}";
    if let Ok(style) = ProgressStyle::default_spinner().template(template) {
        pb.set_style(style);
    }
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

/// Run one query per item, at most `concurrency` at a time, keeping input order.
async fn fan_out<T, R, F, Fut>(
    items: Vec<T>,
    concurrency: usize,
    describe: fn(&T) -> String,
    query: F,
) -> Vec<(T, Option<R>)>
where
    F: Fn(&T) -> Fut,
    Fut: Future<Output = ApiResult<R>>,
{
    let mut results: Vec<(usize, T, Option<R>)> = stream::iter(items.into_iter().enumerate())
        .map(|(index, item)| {
            let pending = query(&item);
            async move {
                match pending.await {
                    Ok(value) => (index, item, Some(value)),
                    Err(e) => {
                        warn!("Query for '{}' failed: {}", describe(&item), e);
                        (index, item, None)
                    }
                }
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    results.sort_by_key(|(index, _, _)| *index);
    results.into_iter().map(|(_, item, value)| (item, value)).collect()
}

/// Top guides with their metrics.
pub async fn collect_guides(
    client: &PendoClient,
    options: &SyncOptions,
    now: DateTime<Utc>,
) -> Result<Vec<GuideReport>> {
    let rows = client.list_guides().await.context("Failed to list guides")?;
    let mut guides = metrics::parse_guides(&rows);
    metrics::rank_guides(&mut guides);
    guides.truncate(options.top_n);
    debug!("Querying events for {} guides", guides.len());

    let window = options.window(now);
    let flat = options.flat_guide_events;
    let results = fan_out(guides, options.concurrency, |g| g.id.clone(), |guide| {
        let id = guide.id.clone();
        let pipeline = guide_events_pipeline(&id, window.clone())
            .with_request_id(request_id("guide", &id, now));
        let flat_request = guide_events_flat(&id, window.clone(), now);
        async move {
            let rows = if flat {
                client.aggregate_flat(&flat_request).await?
            } else {
                client.aggregate_pipeline(&pipeline).await?
            };
            Ok(metrics::guide_metrics(&id, &rows))
        }
    })
    .await;

    Ok(results
        .into_iter()
        .map(|(guide, metrics)| GuideReport { guide, metrics })
        .collect())
}

/// Pages with their analytics, busiest first.
pub async fn collect_pages(
    client: &PendoClient,
    options: &SyncOptions,
    now: DateTime<Utc>,
) -> Result<Vec<PageReport>> {
    let rows = client.list_pages().await.context("Failed to list pages")?;
    let mut pages = metrics::parse_pages(&rows);
    pages.truncate(options.top_n);

    let window = options.window(now);
    let results = fan_out(pages, options.concurrency, |p| p.id.clone(), |page| {
        let request = page_events_pipeline(&page.id, window.clone())
            .with_request_id(request_id("page", &page.id, now));
        async move {
            let rows = client.aggregate_pipeline(&request).await?;
            Ok(metrics::page_analytics(&rows))
        }
    })
    .await;

    let mut reports: Vec<PageReport> = results
        .into_iter()
        .map(|(page, analytics)| PageReport { page, analytics })
        .collect();
    reports.sort_by_key(|r| std::cmp::Reverse(r.analytics.map(|a| a.view_count)));
    Ok(reports)
}

/// Features with their usage, most clicked first.
pub async fn collect_features(
    client: &PendoClient,
    options: &SyncOptions,
    now: DateTime<Utc>,
) -> Result<Vec<FeatureReport>> {
    let rows = client.list_features().await.context("Failed to list features")?;
    let mut features = metrics::parse_features(&rows);
    features.truncate(options.top_n);

    let window = options.window(now);
    let results = fan_out(features, options.concurrency, |f| f.id.clone(), |feature| {
        let request = feature_events_pipeline(&feature.id, window.clone())
            .with_request_id(request_id("feature", &feature.id, now));
        async move {
            let rows = client.aggregate_pipeline(&request).await?;
            Ok(metrics::feature_usage(&rows))
        }
    })
    .await;

    let mut reports: Vec<FeatureReport> = results
        .into_iter()
        .map(|(feature, usage)| FeatureReport { feature, usage })
        .collect();
    reports.sort_by_key(|r| std::cmp::Reverse(r.usage.map(|u| u.click_count)));
    Ok(reports)
}

/// NPS for one poll.
pub async fn collect_nps(
    client: &PendoClient,
    guide_id: &str,
    poll_id: &str,
    days: u32,
    now: DateTime<Utc>,
) -> Result<NpsSummary> {
    let request = poll_events_pipeline(guide_id, poll_id, Some(TimeSeries::last_days(now, days)))
        .with_request_id(request_id("poll", poll_id, now));
    let rows = client
        .aggregate_pipeline(&request)
        .await
        .with_context(|| format!("Failed to fetch responses for poll {}", poll_id))?;

    let responses = metrics::poll_responses(&rows);
    debug!("{} valid poll responses", responses.len());
    Ok(metrics::nps_summary(&metrics::nps::scores(&responses)))
}

/// Most active visitors over the window.
pub async fn collect_visitors(
    client: &PendoClient,
    days: u32,
    limit: usize,
    now: DateTime<Utc>,
) -> Result<Vec<Visitor>> {
    let request = visitors_pipeline(Some(TimeSeries::last_days(now, days)))
        .with_request_id(request_id("visitors", "all", now));
    let rows = client
        .aggregate_pipeline(&request)
        .await
        .context("Failed to fetch visitors")?;

    let mut visitors = metrics::parse_visitors(&rows);
    metrics::rank_visitors(&mut visitors);
    visitors.truncate(limit);
    Ok(visitors)
}

/// Most recently active accounts.
pub async fn collect_accounts(
    client: &PendoClient,
    limit: usize,
    now: DateTime<Utc>,
) -> Result<Vec<Account>> {
    let request = accounts_pipeline().with_request_id(request_id("accounts", "all", now));
    let rows = client
        .aggregate_pipeline(&request)
        .await
        .context("Failed to fetch accounts")?;

    let mut accounts = metrics::parse_accounts(&rows);
    metrics::rank_accounts(&mut accounts);
    accounts.truncate(limit);
    Ok(accounts)
}

/// Everything a dashboard report needs.
pub async fn collect_dashboard(
    client: &PendoClient,
    options: &SyncOptions,
) -> Result<DashboardData> {
    let now = Utc::now();
    let pb = spinner(options.show_progress);
    let mut data = DashboardData::new(now, options.days);

    pb.set_message("Fetching guides...");
    data.guides = collect_guides(client, options, now).await?;

    pb.set_message("Fetching pages...");
    data.pages = collect_pages(client, options, now).await?;

    pb.set_message("Fetching features...");
    data.features = collect_features(client, options, now).await?;

    if let Some((guide_id, poll_id)) = &options.nps_poll {
        pb.set_message("Fetching NPS responses...");
        data.nps = match collect_nps(client, guide_id, poll_id, options.days, now).await {
            Ok(nps) => Some(nps),
            Err(e) => {
                warn!("Skipping NPS: {:#}", e);
                None
            }
        };
    }

    pb.finish_and_clear();
    info!(
        "Collected {} guides, {} pages, {} features",
        data.guides.len(),
        data.pages.len(),
        data.features.len()
    );
    Ok(data)
}

/// Store rows for every entity that has metrics. Entities whose query
/// failed are left out so the previous snapshot survives.
pub fn snapshots(
    data: &DashboardData,
    visitors: &[Visitor],
    accounts: &[Account],
    nps_poll: Option<&str>,
) -> Result<Vec<MetricSnapshot>> {
    let fetched_at = data.generated_at;
    let bucket = bucket_for(fetched_at);
    let snapshot = |entity_type, entity_id: &str, name: &str, metrics| MetricSnapshot {
        entity_type,
        entity_id: entity_id.to_string(),
        bucket: bucket.clone(),
        name: name.to_string(),
        metrics,
        fetched_at,
    };

    let mut out = Vec::new();

    for report in &data.guides {
        if let Some(m) = &report.metrics {
            out.push(snapshot(
                EntityType::Guide,
                &report.guide.id,
                &report.guide.name,
                serde_json::to_value(m)?,
            ));
        }
    }
    for report in &data.pages {
        if let Some(a) = report.analytics {
            out.push(snapshot(
                EntityType::Page,
                &report.page.id,
                &report.page.name,
                serde_json::to_value(a)?,
            ));
        }
    }
    for report in &data.features {
        if let Some(u) = report.usage {
            out.push(snapshot(
                EntityType::Feature,
                &report.feature.id,
                &report.feature.name,
                serde_json::to_value(u)?,
            ));
        }
    }
    for visitor in visitors {
        out.push(snapshot(
            EntityType::Visitor,
            &visitor.visitor_id,
            &visitor.visitor_id,
            json!({
                "accountId": visitor.account_id,
                "numEvents": visitor.num_events.unwrap_or(0),
                "lastVisit": visitor.last_visit,
            }),
        ));
    }
    for account in accounts {
        out.push(snapshot(
            EntityType::Account,
            &account.account_id,
            &account.account_id,
            json!({
                "firstVisit": account.first_visit,
                "lastVisit": account.last_visit,
            }),
        ));
    }
    if let (Some(nps), Some(poll_id)) = (data.nps, nps_poll) {
        out.push(snapshot(
            EntityType::Poll,
            poll_id,
            "NPS",
            serde_json::to_value(nps)?,
        ));
    }

    Ok(out)
}

/// Fetch everything and upsert it under today's bucket.
pub async fn run_sync(
    client: &PendoClient,
    store: &mut MetricStore,
    options: &SyncOptions,
) -> Result<SyncSummary> {
    let data = collect_dashboard(client, options).await?;
    let now = data.generated_at;

    let visitors = match collect_visitors(client, options.days, options.entity_limit, now).await {
        Ok(visitors) => visitors,
        Err(e) => {
            warn!("Skipping visitors: {:#}", e);
            Vec::new()
        }
    };
    let accounts = match collect_accounts(client, options.entity_limit, now).await {
        Ok(accounts) => accounts,
        Err(e) => {
            warn!("Skipping accounts: {:#}", e);
            Vec::new()
        }
    };

    let poll_id = options.nps_poll.as_ref().map(|(_, poll)| poll.as_str());
    let rows = snapshots(&data, &visitors, &accounts, poll_id)?;
    let written = store
        .upsert_all(&rows)
        .context("Failed to write metric snapshots")?;
    info!("Stored {} snapshots", written);

    Ok(SyncSummary {
        bucket: bucket_for(now),
        guides: data.guides.len(),
        pages: data.pages.len(),
        features: data.features.len(),
        visitors: visitors.len(),
        accounts: accounts.len(),
        nps: data.nps.is_some(),
        written,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Feature, FeatureUsage, Guide, GuideMetrics, Page, PageAnalytics,
    };
    use chrono::TimeZone;

    fn dashboard() -> DashboardData {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 8, 30, 0).unwrap();
        let mut data = DashboardData::new(now, 30);
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
                views: 10,
                ..GuideMetrics::default()
            }),
        });
        data.guides.push(GuideReport {
            guide: Guide {
                id: "g2".to_string(),
                name: "Broken".to_string(),
                state: "public".to_string(),
                created_at: None,
                last_updated_at: None,
            },
            metrics: None,
        });
        data.pages.push(PageReport {
            page: Page {
                id: "p1".to_string(),
                name: "Home".to_string(),
            },
            analytics: Some(PageAnalytics {
                view_count: 21,
                visitor_count: 3,
            }),
        });
        data.features.push(FeatureReport {
            feature: Feature {
                id: "f1".to_string(),
                name: "Export".to_string(),
            },
            usage: Some(FeatureUsage::default()),
        });
        data.nps = Some(metrics::nps_summary(&[10, 9, 8, 6, 3]));
        data
    }

    #[test]
    fn test_snapshots_skip_failed_entities() {
        let rows = snapshots(&dashboard(), &[], &[], Some("poll-1")).unwrap();

        assert_eq!(rows.len(), 4);
        assert!(rows.iter().all(|r| r.bucket == "2024-06-01"));
        assert!(!rows.iter().any(|r| r.entity_id == "g2"));

        let page = rows.iter().find(|r| r.entity_type == EntityType::Page).unwrap();
        assert_eq!(page.metrics["viewCount"], 21);

        let poll = rows.iter().find(|r| r.entity_type == EntityType::Poll).unwrap();
        assert_eq!(poll.entity_id, "poll-1");
        assert_eq!(poll.metrics["score"], 0);
    }

    #[test]
    fn test_snapshots_without_poll_id_skip_nps() {
        let rows = snapshots(&dashboard(), &[], &[], None).unwrap();
        assert!(!rows.iter().any(|r| r.entity_type == EntityType::Poll));
    }

    #[test]
    fn test_snapshots_include_entities() {
        let visitors = vec![Visitor {
            visitor_id: "v1".to_string(),
            account_id: Some("acme".to_string()),
            first_visit: None,
            last_visit: None,
            num_events: Some(42),
        }];
        let accounts = vec![Account {
            account_id: "acme".to_string(),
            first_visit: None,
            last_visit: None,
        }];
        let rows = snapshots(&dashboard(), &visitors, &accounts, None).unwrap();

        let visitor = rows.iter().find(|r| r.entity_type == EntityType::Visitor).unwrap();
        assert_eq!(visitor.metrics["numEvents"], 42);
        assert_eq!(visitor.metrics["accountId"], "acme");
        assert!(rows.iter().any(|r| r.entity_type == EntityType::Account));
    }

    #[test]
    fn test_snapshots_upsert_into_store() {
        let mut store = MetricStore::open_in_memory().unwrap();
        let rows = snapshots(&dashboard(), &[], &[], Some("poll-1")).unwrap();

        store.upsert_all(&rows).unwrap();
        store.upsert_all(&rows).unwrap();
        assert_eq!(store.count().unwrap(), 4);
    }

    #[tokio::test]
    async fn test_fan_out_keeps_order_and_drops_failures() {
        let items = vec!["a".to_string(), "bad".to_string(), "c".to_string()];
        let results = fan_out(items, 2, |s| s.clone(), |item| {
            let item = item.clone();
            async move {
                if item == "bad" {
                    Err(crate::error::ApiError::Status {
                        status: 500,
                        message: "boom".to_string(),
                    })
                } else {
                    Ok(item.len())
                }
            }
        })
        .await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0], ("a".to_string(), Some(1)));
        assert_eq!(results[1].1, None);
        assert_eq!(results[2].0, "c");
    }

    #[test]
    fn test_options_from_config() {
        let mut config = Config::default();
        config.general.concurrency = 0;
        config.nps.guide_id = Some("g".to_string());
        config.nps.poll_id = Some("p".to_string());

        let options = SyncOptions::from_config(&config, false);
        assert_eq!(options.concurrency, 1);
        assert_eq!(options.nps_poll, Some(("g".to_string(), "p".to_string())));
    }
}
