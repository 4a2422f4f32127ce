//! Aggregation request builders.
//!
//! The aggregation endpoint accepts two body shapes:
//! - a flat request (`source`, optional `timeSeries`, `filter`, `requestId`)
//! - a pipeline request, an ordered list of single-key stage objects wrapped
//!   in a `{"response": ..., "request": {"pipeline": [...]}}` envelope.

use chrono::{DateTime, Duration, Utc};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// The only period the dashboard queries with.
pub const DAY_RANGE: &str = "dayRange";

/// Event and entity sources exposed by the aggregation API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum SourceKind {
    GuideEvents,
    PageEvents,
    FeatureEvents,
    PollEvents,
    Events,
    Visitors,
    Accounts,
}

impl SourceKind {
    /// Name used inside a pipeline `source` stage.
    pub fn pipeline_name(&self) -> &'static str {
        match self {
            SourceKind::GuideEvents => "guideEvents",
            SourceKind::PageEvents => "pageEvents",
            SourceKind::FeatureEvents => "featureEvents",
            SourceKind::PollEvents => "pollEvents",
            SourceKind::Events => "events",
            SourceKind::Visitors => "visitors",
            SourceKind::Accounts => "accounts",
        }
    }

    /// Name used by the flat request shape.
    pub fn flat_name(&self) -> &'static str {
        match self {
            SourceKind::GuideEvents => "guideEvent",
            SourceKind::PageEvents => "pageEvent",
            SourceKind::FeatureEvents => "featureEvent",
            SourceKind::PollEvents => "pollEvent",
            SourceKind::Events => "event",
            SourceKind::Visitors => "visitor",
            SourceKind::Accounts => "account",
        }
    }

    /// Entity sources ignore time windows.
    pub fn is_entity(&self) -> bool {
        matches!(self, SourceKind::Visitors | SourceKind::Accounts)
    }
}

/// Time window of a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeSeries {
    pub period: String,
    pub first: String,
    pub count: u32,
}

impl TimeSeries {
    /// A window covering the `days` days before `now`.
    pub fn last_days(now: DateTime<Utc>, days: u32) -> Self {
        let first = now - Duration::days(i64::from(days));
        Self {
            period: DAY_RANGE.to_string(),
            first: first.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string(),
            count: days,
        }
    }
}

/// Equality filter expression, e.g. `guideId=='abc'`.
///
/// Backslashes are escaped before quotes so a trailing `\` cannot swallow
/// the closing quote.
pub fn eq_filter(field: &str, value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("{}=='{}'", field, escaped)
}

/// Request id in the form `{prefix}-{subject}-{unix seconds}`.
pub fn request_id(prefix: &str, subject: &str, now: DateTime<Utc>) -> String {
    format!("{}-{}-{}", prefix, subject, now.timestamp())
}

/// Flat aggregation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlatRequest {
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_series: Option<TimeSeries>,
    pub filter: String,
    pub request_id: String,
}

impl FlatRequest {
    pub fn new(
        source: SourceKind,
        filter: impl Into<String>,
        request_id: impl Into<String>,
    ) -> Self {
        Self {
            source: source.flat_name().to_string(),
            time_series: None,
            filter: filter.into(),
            request_id: request_id.into(),
        }
    }

    pub fn with_time_series(mut self, time_series: TimeSeries) -> Self {
        self.time_series = Some(time_series);
        self
    }
}

/// Flat guide-event request, as the dashboard's first integration sent it.
pub fn guide_events_flat(
    guide_id: &str,
    window: Option<TimeSeries>,
    now: DateTime<Utc>,
) -> FlatRequest {
    let request = FlatRequest::new(
        SourceKind::GuideEvents,
        eq_filter("guideId", guide_id),
        request_id("guide", guide_id, now),
    );
    match window {
        Some(ts) => request.with_time_series(ts),
        None => request,
    }
}

/// `source` stage: `{"<kind>": params | null, "timeSeries"?: {...}}`.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceStage {
    pub kind: SourceKind,
    pub params: Option<Map<String, Value>>,
    pub time_series: Option<TimeSeries>,
}

impl SourceStage {
    pub fn new(kind: SourceKind) -> Self {
        Self {
            kind,
            params: None,
            time_series: None,
        }
    }

    /// Adds a source parameter such as `guideId`.
    pub fn param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params
            .get_or_insert_with(Map::new)
            .insert(key.to_string(), value.into());
        self
    }

    pub fn window(mut self, time_series: Option<TimeSeries>) -> Self {
        self.time_series = time_series;
        self
    }
}

impl Serialize for SourceStage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = if self.time_series.is_some() { 2 } else { 1 };
        let mut map = serializer.serialize_map(Some(len))?;
        map.serialize_entry(self.kind.pipeline_name(), &self.params)?;
        if let Some(ref ts) = self.time_series {
            map.serialize_entry("timeSeries", ts)?;
        }
        map.end()
    }
}

/// Aggregate operator inside a `group` stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregate {
    Count(Option<String>),
    Sum(String),
    Max(String),
    Min(String),
}

/// Named aggregate, serialized as `{name: {op: field}}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupField {
    pub name: String,
    pub aggregate: Aggregate,
}

impl GroupField {
    pub fn new(name: &str, aggregate: Aggregate) -> Self {
        Self {
            name: name.to_string(),
            aggregate,
        }
    }
}

impl Serialize for GroupField {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.name, &self.aggregate)?;
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupStage {
    pub group: Vec<String>,
    pub fields: Vec<GroupField>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JoinStage {
    pub fields: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
}

/// One pipeline stage; serializes as a single-key object.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    Source(SourceStage),
    Identified(String),
    Select(BTreeMap<String, String>),
    Filter(String),
    Group(GroupStage),
    Sort(Vec<String>),
    Join(JoinStage),
    Spawn(Vec<Vec<Stage>>),
    Eval(BTreeMap<String, String>),
}

impl Stage {
    pub fn group(by: &[&str], fields: Vec<GroupField>) -> Self {
        Stage::Group(GroupStage {
            group: by.iter().map(|s| s.to_string()).collect(),
            fields,
        })
    }

    pub fn select(pairs: &[(&str, &str)]) -> Self {
        Stage::Select(to_map(pairs))
    }

    pub fn eval(pairs: &[(&str, &str)]) -> Self {
        Stage::Eval(to_map(pairs))
    }

    pub fn sort(keys: &[&str]) -> Self {
        Stage::Sort(keys.iter().map(|s| s.to_string()).collect())
    }
}

fn to_map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Pipeline aggregation request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineRequest {
    pub request_id: Option<String>,
    pub pipeline: Vec<Stage>,
}

impl PipelineRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(mut self, stage: Stage) -> Self {
        self.pipeline.push(stage);
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResponseFormat {
    mime_type: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PipelineBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    request_id: Option<&'a str>,
    pipeline: &'a [Stage],
}

#[derive(Serialize)]
struct Envelope<'a> {
    response: ResponseFormat,
    request: PipelineBody<'a>,
}

impl Serialize for PipelineRequest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        Envelope {
            response: ResponseFormat {
                mime_type: "application/json",
            },
            request: PipelineBody {
                request_id: self.request_id.as_deref(),
                pipeline: &self.pipeline,
            },
        }
        .serialize(serializer)
    }
}

/// Guide events counted per event type and visitor.
pub fn guide_events_pipeline(guide_id: &str, window: Option<TimeSeries>) -> PipelineRequest {
    PipelineRequest::new()
        .stage(Stage::Source(SourceStage::new(SourceKind::GuideEvents).window(window)))
        .stage(Stage::Filter(eq_filter("guideId", guide_id)))
        .stage(Stage::group(
            &["type", "visitorId"],
            vec![GroupField::new("count", Aggregate::Count(None))],
        ))
}

/// Page views summed per visitor.
pub fn page_events_pipeline(page_id: &str, window: Option<TimeSeries>) -> PipelineRequest {
    usage_pipeline(SourceKind::PageEvents, "pageId", page_id, window)
}

/// Feature clicks summed per visitor.
pub fn feature_events_pipeline(feature_id: &str, window: Option<TimeSeries>) -> PipelineRequest {
    usage_pipeline(SourceKind::FeatureEvents, "featureId", feature_id, window)
}

fn usage_pipeline(
    kind: SourceKind,
    id_param: &str,
    id: &str,
    window: Option<TimeSeries>,
) -> PipelineRequest {
    PipelineRequest::new()
        .stage(Stage::Source(
            SourceStage::new(kind).param(id_param, id).window(window),
        ))
        .stage(Stage::Identified("visitorId".to_string()))
        .stage(Stage::group(
            &["visitorId"],
            vec![GroupField::new(
                "numEvents",
                Aggregate::Sum("numEvents".to_string()),
            )],
        ))
}

/// Raw poll answers for one poll of a guide.
pub fn poll_events_pipeline(
    guide_id: &str,
    poll_id: &str,
    window: Option<TimeSeries>,
) -> PipelineRequest {
    PipelineRequest::new()
        .stage(Stage::Source(
            SourceStage::new(SourceKind::PollEvents)
                .param("guideId", guide_id)
                .param("pollId", poll_id)
                .window(window),
        ))
        .stage(Stage::select(&[
            ("visitorId", "visitorId"),
            ("pollResponse", "pollResponse"),
            ("browserTime", "browserTime"),
        ]))
}

/// Visitors joined with their event totals over the window.
pub fn visitors_pipeline(window: Option<TimeSeries>) -> PipelineRequest {
    let profiles = vec![
        Stage::Source(SourceStage::new(SourceKind::Visitors)),
        Stage::Identified("visitorId".to_string()),
        Stage::eval(&[
            ("accountId", "metadata.auto.accountid"),
            ("firstVisit", "metadata.auto.firstvisit"),
            ("lastVisit", "metadata.auto.lastvisit"),
        ]),
        Stage::select(&[
            ("visitorId", "visitorId"),
            ("accountId", "accountId"),
            ("firstVisit", "firstVisit"),
            ("lastVisit", "lastVisit"),
        ]),
    ];
    let activity = vec![
        Stage::Source(SourceStage::new(SourceKind::Events).window(window)),
        Stage::Identified("visitorId".to_string()),
        Stage::group(
            &["visitorId"],
            vec![GroupField::new(
                "numEvents",
                Aggregate::Sum("numEvents".to_string()),
            )],
        ),
    ];

    PipelineRequest::new()
        .stage(Stage::Spawn(vec![profiles, activity]))
        .stage(Stage::Join(JoinStage {
            fields: vec!["visitorId".to_string()],
            width: Some(2),
        }))
        .stage(Stage::sort(&["-numEvents"]))
}

/// All accounts, most recently active first.
pub fn accounts_pipeline() -> PipelineRequest {
    PipelineRequest::new()
        .stage(Stage::Source(SourceStage::new(SourceKind::Accounts)))
        .stage(Stage::Identified("accountId".to_string()))
        .stage(Stage::sort(&["-metadata.auto.lastvisit"]))
}

/// Free-form query: source, optional filter, count per group, sort.
pub fn adhoc_pipeline(
    source: SourceKind,
    filter: Option<&str>,
    group_by: &[String],
    sort: &[String],
    window: Option<TimeSeries>,
) -> PipelineRequest {
    let window = if source.is_entity() { None } else { window };
    let mut request =
        PipelineRequest::new().stage(Stage::Source(SourceStage::new(source).window(window)));

    if let Some(filter) = filter.map(str::trim).filter(|f| !f.is_empty()) {
        request = request.stage(Stage::Filter(filter.to_string()));
    }
    if !group_by.is_empty() {
        let by: Vec<&str> = group_by.iter().map(String::as_str).collect();
        request = request.stage(Stage::group(
            &by,
            vec![GroupField::new("count", Aggregate::Count(None))],
        ));
    }
    if !sort.is_empty() {
        let keys: Vec<&str> = sort.iter().map(String::as_str).collect();
        request = request.stage(Stage::sort(&keys));
    }

    request
}

/// Flat counterpart of [`adhoc_pipeline`]; entity sources get no window.
pub fn adhoc_flat(
    source: SourceKind,
    filter: &str,
    window: Option<TimeSeries>,
    now: DateTime<Utc>,
) -> FlatRequest {
    let request = FlatRequest::new(source, filter, request_id("query", source.flat_name(), now));
    match window {
        Some(ts) if !source.is_entity() => request.with_time_series(ts),
        _ => request,
    }
}
