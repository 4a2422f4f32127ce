//! Markdown report generation.
//!
//! Renders a dashboard [`Report`] as Markdown, plus the smaller tables the
//! list commands print on their own.

use crate::models::{
    Account, DataOverview, FeatureReport, GuideReport, ListOverview, MetricSnapshot, NpsSummary,
    PageReport, Report, ReportMetadata, SummaryOutcome, Visitor,
};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &Report) -> String {
    let mut output = String::new();

    output.push_str("# Pendo Insights Report\n\n");

    output.push_str(&generate_metadata_section(&report.metadata));
    output.push_str(&generate_summary_section(&report.summary));
    output.push_str(&generate_overview_section(report));

    output.push_str("## Guides\n\n");
    output.push_str(&guides_table(&report.data.guides));

    output.push_str("## Pages\n\n");
    output.push_str(&pages_table(&report.data.pages));

    output.push_str("## Features\n\n");
    output.push_str(&features_table(&report.data.features));

    if let Some(ref nps) = report.data.nps {
        output.push_str("## Net Promoter Score\n\n");
        output.push_str(&nps_block(nps));
    }

    output.push_str(&generate_footer());

    output
}

fn generate_metadata_section(metadata: &ReportMetadata) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Pendo Host:** {}\n", metadata.base_url));
    section.push_str(&format!(
        "- **Generated:** {}\n",
        metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!("- **Window:** last {} days\n", metadata.window_days));
    if let Some(ref model) = metadata.model_used {
        section.push_str(&format!("- **Model Used:** `{}`\n", model));
    }
    section.push_str(&format!(
        "- **Duration:** {:.1}s\n",
        metadata.duration_seconds
    ));
    section.push('\n');

    section
}

/// The AI summary, or a note saying why there is none.
fn generate_summary_section(outcome: &SummaryOutcome) -> String {
    let mut section = String::new();

    match outcome {
        SummaryOutcome::Available(summary) => {
            section.push_str("## AI Summary\n\n");
            section.push_str(&format!("**{}**\n\n", summary.headline));

            if !summary.insights.is_empty() {
                section.push_str("### Insights\n\n");
                for insight in &summary.insights {
                    section.push_str(&format!("- {}\n", insight));
                }
                section.push('\n');
            }

            if !summary.risks.is_empty() {
                section.push_str("### Risks\n\n");
                for risk in &summary.risks {
                    section.push_str(&format!("- {}\n", risk));
                }
                section.push('\n');
            }
        }
        SummaryOutcome::Unavailable { reason } => {
            section.push_str("## AI Summary\n\n");
            section.push_str(&format!("> AI summary unavailable: {}\n\n", reason));
        }
        SummaryOutcome::Disabled => {}
    }

    section
}

fn generate_overview_section(report: &Report) -> String {
    let data = &report.data;
    let mut section = String::new();

    section.push_str("## Overview\n\n");
    section.push_str("| Guide Views | Page Views | Guides | Pages | Features | NPS |\n");
    section.push_str("|:---:|:---:|:---:|:---:|:---:|:---:|\n");
    section.push_str(&format!(
        "| {} | {} | {} | {} | {} | {} |\n\n",
        data.total_guide_views(),
        data.total_page_views(),
        data.guides.len(),
        data.pages.len(),
        data.features.len(),
        data.nps
            .and_then(|n| n.score)
            .map_or_else(|| "-".to_string(), |s| s.to_string()),
    ));

    section
}

/// Guide metrics table.
pub fn guides_table(guides: &[GuideReport]) -> String {
    if guides.is_empty() {
        return "No guides found.\n\n".to_string();
    }

    let mut table = String::new();
    table.push_str(
        "| Guide | State | Views | Completions | Dismissals | Visitors | Completion |\n",
    );
    table.push_str("|:---|:---|---:|---:|---:|---:|---:|\n");

    for report in guides {
        let name = cell(&report.guide.name);
        match &report.metrics {
            Some(m) => table.push_str(&format!(
                "| {} | {} | {} | {} | {} | {} | {:.1}% |\n",
                name,
                report.guide.state,
                m.views,
                m.completions,
                m.dismissals,
                m.unique_visitors,
                m.completion_rate
            )),
            None => table.push_str(&format!(
                "| {} | {} | - | - | - | - | - |\n",
                name, report.guide.state
            )),
        }
    }
    table.push('\n');

    table
}

/// Page analytics table.
pub fn pages_table(pages: &[PageReport]) -> String {
    if pages.is_empty() {
        return "No pages found.\n\n".to_string();
    }

    let mut table = String::new();
    table.push_str("| Page | Views | Visitors |\n");
    table.push_str("|:---|---:|---:|\n");

    for report in pages {
        let (views, visitors) = counts(report.analytics.map(|a| (a.view_count, a.visitor_count)));
        table.push_str(&format!(
            "| {} | {} | {} |\n",
            cell(&report.page.name),
            views,
            visitors
        ));
    }
    table.push('\n');

    table
}

/// Feature usage table.
pub fn features_table(features: &[FeatureReport]) -> String {
    if features.is_empty() {
        return "No features found.\n\n".to_string();
    }

    let mut table = String::new();
    table.push_str("| Feature | Clicks | Visitors |\n");
    table.push_str("|:---|---:|---:|\n");

    for report in features {
        let (clicks, visitors) = counts(report.usage.map(|u| (u.click_count, u.visitor_count)));
        table.push_str(&format!(
            "| {} | {} | {} |\n",
            cell(&report.feature.name),
            clicks,
            visitors
        ));
    }
    table.push('\n');

    table
}

pub fn visitors_table(visitors: &[Visitor]) -> String {
    if visitors.is_empty() {
        return "No visitors found.\n\n".to_string();
    }

    let mut table = String::new();
    table.push_str("| Visitor | Account | Events | First Visit | Last Visit |\n");
    table.push_str("|:---|:---|---:|:---|:---|\n");

    for v in visitors {
        table.push_str(&format!(
            "| {} | {} | {} | {} | {} |\n",
            cell(&v.visitor_id),
            v.account_id.as_deref().map(cell).unwrap_or_else(|| "-".to_string()),
            v.num_events.map_or_else(|| "-".to_string(), |n| n.to_string()),
            date(v.first_visit),
            date(v.last_visit)
        ));
    }
    table.push('\n');

    table
}

pub fn accounts_table(accounts: &[Account]) -> String {
    if accounts.is_empty() {
        return "No accounts found.\n\n".to_string();
    }

    let mut table = String::new();
    table.push_str("| Account | First Visit | Last Visit |\n");
    table.push_str("|:---|:---|:---|\n");

    for a in accounts {
        table.push_str(&format!(
            "| {} | {} | {} |\n",
            cell(&a.account_id),
            date(a.first_visit),
            date(a.last_visit)
        ));
    }
    table.push('\n');

    table
}

/// NPS score with its breakdown.
pub fn nps_block(nps: &NpsSummary) -> String {
    let mut block = String::new();

    match nps.score {
        Some(score) => block.push_str(&format!("**NPS: {}** ({} responses)\n\n", score, nps.total)),
        None => {
            block.push_str("No poll responses in this window.\n\n");
            return block;
        }
    }

    block.push_str("| Promoters (9-10) | Passives (7-8) | Detractors (0-6) |\n");
    block.push_str("|:---:|:---:|:---:|\n");
    block.push_str(&format!(
        "| {} | {} | {} |\n\n",
        nps.promoters, nps.passives, nps.detractors
    ));

    block
}

/// Stored snapshots, one row per entity and day.
pub fn snapshots_table(snapshots: &[MetricSnapshot]) -> String {
    if snapshots.is_empty() {
        return "No stored snapshots. Run `pendo-insights sync` first.\n\n".to_string();
    }

    let mut table = String::new();
    table.push_str("| Day | Id | Name | Metrics | Fetched |\n");
    table.push_str("|:---|:---|:---|:---|:---|\n");

    for s in snapshots {
        table.push_str(&format!(
            "| {} | {} | {} | `{}` | {} |\n",
            s.bucket,
            cell(&s.entity_id),
            cell(&s.name),
            s.metrics,
            s.fetched_at.format("%H:%M:%S")
        ));
    }
    table.push('\n');

    table
}

/// Record counts per list endpoint, with the first record's name.
pub fn overview_table(overview: &DataOverview) -> String {
    let mut table = String::new();
    table.push_str(&format!(
        "Data available as of {}\n\n",
        overview.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    table.push_str("| Kind | Count | Sample |\n");
    table.push_str("|:---|---:|:---|\n");

    let kinds: [(&str, &ListOverview); 4] = [
        ("Guides", &overview.guides),
        ("Features", &overview.features),
        ("Pages", &overview.pages),
        ("Reports", &overview.reports),
    ];
    for (kind, list) in kinds {
        let sample = list
            .sample
            .as_ref()
            .and_then(|s| s.get("name").or_else(|| s.get("id")))
            .and_then(|v| v.as_str())
            .unwrap_or("-");
        table.push_str(&format!("| {} | {} | {} |\n", kind, list.count, cell(sample)));
    }
    table.push('\n');

    table
}

fn counts(pair: Option<(u64, u64)>) -> (String, String) {
    match pair {
        Some((a, b)) => (a.to_string(), b.to_string()),
        None => ("-".to_string(), "-".to_string()),
    }
}

fn date(at: Option<DateTime<Utc>>) -> String {
    at.map_or_else(|| "-".to_string(), |t| t.format("%Y-%m-%d").to_string())
}

/// Escape a value for a Markdown table cell.
fn cell(value: &str) -> String {
    value.replace('|', "\\|").replace('\n', " ")
}

fn generate_footer() -> String {
    let mut footer = String::new();

    footer.push_str("---\n\n");
    footer.push_str("*Report generated by pendo-insights*\n");

    footer
}

/// Generate a JSON report.
pub fn generate_json_report(report: &Report) -> Result<String> {
    to_json(report)
}

/// Pretty JSON for any listing.
pub fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(Into::into)
}
