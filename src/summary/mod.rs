//! LLM summaries of dashboard data.
//!
//! Sends one fixed prompt to an Ollama-compatible `/api/chat` endpoint and
//! expects a JSON object back. Any failure along the way turns into
//! [`SummaryOutcome::Unavailable`] so a report is never blocked on the model.

use crate::config::LlmConfig;
use crate::models::{DashboardData, Summary, SummaryOutcome};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Settings for the summarizer.
#[derive(Debug, Clone)]
pub struct SummarizerConfig {
    pub ollama_url: String,
    pub model_name: String,
    pub temperature: f32,
    pub timeout_seconds: u64,
}

impl From<&LlmConfig> for SummarizerConfig {
    fn from(llm: &LlmConfig) -> Self {
        Self {
            ollama_url: llm.ollama_url.trim_end_matches('/').to_string(),
            model_name: llm.model.clone(),
            temperature: llm.temperature,
            timeout_seconds: llm.timeout_seconds,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

/// Ollama chat API request.
#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

/// Ollama chat API response.
#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: ChatMessage,
}

/// Asks the model for a dashboard summary.
pub struct Summarizer {
    config: SummarizerConfig,
    http_client: reqwest::Client,
}

impl Summarizer {
    pub fn new(config: SummarizerConfig) -> Result<Self> {
        info!("Initializing summarizer with model {}", config.model_name);

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            config,
            http_client,
        })
    }

    pub fn model_name(&self) -> &str {
        &self.config.model_name
    }

    /// Summarize the dashboard. Never fails; problems are reported in the outcome.
    pub async fn summarize(&self, data: &DashboardData) -> SummaryOutcome {
        let prompt = build_prompt(data);

        let text = match self.send_prompt(&prompt).await {
            Ok(text) => text,
            Err(e) => {
                warn!("LLM summary failed: {e:#}");
                return SummaryOutcome::Unavailable {
                    reason: format!("{e:#}"),
                };
            }
        };

        match parse_summary(&text) {
            Ok(summary) => {
                info!("LLM summary received");
                SummaryOutcome::Available(summary)
            }
            Err(reason) => {
                warn!("Could not parse LLM summary: {reason}");
                debug!("Raw LLM answer: {text}");
                SummaryOutcome::Unavailable { reason }
            }
        }
    }

    async fn send_prompt(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/api/chat", self.config.ollama_url);

        let request = OllamaChatRequest {
            model: self.config.model_name.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
            stream: false,
            options: OllamaOptions {
                temperature: self.config.temperature,
            },
        };

        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    anyhow::anyhow!("Request timed out after {}s", self.config.timeout_seconds)
                } else if e.is_connect() {
                    anyhow::anyhow!("Cannot connect to Ollama at {}", self.config.ollama_url)
                } else {
                    anyhow::anyhow!("Failed to send request: {}", e)
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Ollama API error {}: {}", status, body));
        }

        let chat_response: OllamaChatResponse = response
            .json()
            .await
            .context("Failed to parse Ollama response")?;

        Ok(chat_response.message.content)
    }
}

const SYSTEM_PROMPT: &str = "You are a product analytics assistant. You read usage metrics \
from an in-app guidance platform and write short, factual summaries for a product team. \
Answer with a single JSON object and nothing else.";

/// The user prompt for a dashboard.
pub fn build_prompt(data: &DashboardData) -> String {
    let mut prompt = String::new();
    let _ = writeln!(
        prompt,
        "Summarize these product metrics for the last {} days.",
        data.window_days
    );
    prompt.push_str("Respond with exactly this JSON shape:\n");
    prompt.push_str(r#"{"headline": "one sentence", "insights": ["..."], "risks": ["..."]}"#);
    prompt.push_str("\n\n=== GUIDES ===\n");

    for report in &data.guides {
        match &report.metrics {
            Some(m) => {
                let _ = writeln!(
                    prompt,
                    "- {} ({}): {} views, {} completions, {} dismissals, {} visitors, \
                     {:.1}% completion",
                    report.guide.name,
                    report.guide.state,
                    m.views,
                    m.completions,
                    m.dismissals,
                    m.unique_visitors,
                    m.completion_rate
                );
            }
            None => {
                let guide = &report.guide;
                let _ = writeln!(prompt, "- {} ({}): no data", guide.name, guide.state);
            }
        }
    }

    prompt.push_str("\n=== PAGES ===\n");
    for report in &data.pages {
        if let Some(a) = report.analytics {
            let _ = writeln!(
                prompt,
                "- {}: {} views, {} visitors",
                report.page.name, a.view_count, a.visitor_count
            );
        }
    }

    prompt.push_str("\n=== FEATURES ===\n");
    for report in &data.features {
        if let Some(u) = report.usage {
            let _ = writeln!(
                prompt,
                "- {}: {} clicks, {} visitors",
                report.feature.name, u.click_count, u.visitor_count
            );
        }
    }

    if let Some(nps) = data.nps {
        prompt.push_str("\n=== NPS ===\n");
        match nps.score {
            Some(score) => {
                let _ = writeln!(
                    prompt,
                    "Score {} from {} responses ({} promoters, {} passives, {} detractors)",
                    score, nps.total, nps.promoters, nps.passives, nps.detractors
                );
            }
            None => prompt.push_str("No responses yet\n"),
        }
    }

    prompt
}

/// Parse the model's answer. Tolerates code fences and prose around the object.
pub fn parse_summary(text: &str) -> std::result::Result<Summary, String> {
    let start = text.find('{').ok_or("answer contains no JSON object")?;
    let end = text.rfind('}').ok_or("answer contains no JSON object")?;
    if end < start {
        return Err("answer contains no JSON object".to_string());
    }

    let summary: Summary = serde_json::from_str(&text[start..=end])
        .map_err(|e| format!("invalid summary JSON: {e}"))?;

    if summary.headline.trim().is_empty() {
        return Err("summary headline is empty".to_string());
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Guide, GuideMetrics, GuideReport, NpsSummary};
    use chrono::Utc;

    #[test]
    fn test_parse_bare_json() {
        let summary = parse_summary(
            r#"{"headline": "Guides are healthy",
                "insights": ["Welcome tour converts"], "risks": []}"#,
        )
        .unwrap();
        assert_eq!(summary.headline, "Guides are healthy");
        assert_eq!(summary.insights.len(), 1);
    }

    #[test]
    fn test_parse_fenced_json_with_prose() {
        let text = "Here you go:\n```json\n{\"headline\": \"Traffic is up\"}\n```\nThanks!";
        let summary = parse_summary(text).unwrap();
        assert_eq!(summary.headline, "Traffic is up");
        assert!(summary.risks.is_empty());
    }

    #[test]
    fn test_parse_invalid_answers() {
        assert!(parse_summary("no json here").is_err());
        assert!(parse_summary("} backwards {").is_err());
        assert!(parse_summary(r#"{"insights": ["x"]}"#).is_err());
        assert!(parse_summary(r#"{"headline": "  "}"#).is_err());
    }

    #[test]
    fn test_prompt_mentions_metrics() {
        let mut data = DashboardData::new(Utc::now(), 7);
        data.guides.push(GuideReport {
            guide: Guide {
                id: "g1".to_string(),
                name: "Welcome tour".to_string(),
                state: "public".to_string(),
                created_at: None,
                last_updated_at: None,
            },
            metrics: Some(GuideMetrics {
                guide_id: "g1".to_string(),
                views: 100,
                completions: 40,
                completion_rate: 40.0,
                ..GuideMetrics::default()
            }),
        });
        data.nps = Some(NpsSummary {
            promoters: 2,
            passives: 1,
            detractors: 2,
            total: 5,
            score: Some(0),
        });

        let prompt = build_prompt(&data);
        assert!(prompt.contains("last 7 days"));
        assert!(prompt.contains("Welcome tour (public): 100 views, 40 completions"));
        assert!(prompt.contains("Score 0 from 5 responses"));
    }

    #[tokio::test]
    async fn test_unreachable_ollama_is_unavailable() {
        let summarizer = Summarizer::new(SummarizerConfig {
            ollama_url: "http://127.0.0.1:1".to_string(),
            model_name: "test".to_string(),
            temperature: 0.0,
            timeout_seconds: 5,
        })
        .unwrap();

        let outcome = summarizer
            .summarize(&DashboardData::new(Utc::now(), 30))
            .await;
        assert!(matches!(outcome, SummaryOutcome::Unavailable { .. }));
    }
}
