//! Pendo Insights - product analytics from the Pendo aggregation API
//!
//! A CLI tool that pulls guide, page, feature, visitor, account and NPS
//! data, caches derived metrics in SQLite and renders dashboard reports
//! with an optional LLM summary.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Runtime error (missing key, API failure, storage failure, etc.)

mod aggregation;
mod cli;
mod config;
mod error;
mod metrics;
mod models;
mod report;
mod storage;
mod summary;
mod sync;

use aggregation::request::{adhoc_flat, adhoc_pipeline, TimeSeries};
use aggregation::PendoClient;
use anyhow::{Context, Result};
use chrono::Utc;
use cli::{Args, Command, OutputFormat};
use config::{Config, CONFIG_FILE};
use error::ApiError;
use models::{EntityType, Report, ReportMetadata, SummaryOutcome};
use std::path::{Path, PathBuf};
use std::time::Instant;
use storage::MetricStore;
use summary::{Summarizer, SummarizerConfig};
use sync::SyncOptions;
use tracing::{debug, error, info};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Config comes first so its `verbose` setting can pick the log level.
    let (mut config, source) = match load_config(&args) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };
    config.merge_with_args(&args);

    init_logging(args.log_level(config.general.verbose));

    info!("Pendo Insights v{}", env!("CARGO_PKG_VERSION"));
    match source {
        Some(path) => info!("Loaded config from {}", path.display()),
        None => debug!("No config file found, using defaults"),
    }
    debug!("Arguments: {:?}", args);

    match run(args, config).await {
        Ok(exit_code) => std::process::exit(exit_code),
        Err(e) => {
            error!("Command failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            if let Some(hint) = hint_for(&e) {
                eprintln!("   {}", hint);
            }
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .pendo-insights.toml.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(CONFIG_FILE);

    if path.exists() {
        eprintln!("⚠️  {} already exists. Remove it first or edit it manually.", CONFIG_FILE);
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).with_context(|| format!("Failed to write {}", CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE);
    println!("   Set PENDO_API_KEY in the environment rather than in the file.");
    Ok(())
}

/// Initialize logging at the given level.
fn init_logging(level: tracing::Level) {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// A follow-up hint for errors the user can fix.
fn hint_for(e: &anyhow::Error) -> Option<&'static str> {
    let api_error = e.chain().find_map(|cause| cause.downcast_ref::<ApiError>())?;
    match api_error {
        ApiError::MissingApiKey => {
            Some("Create an integration key in Pendo under Settings > Integrations.")
        }
        ApiError::Connect { .. } => {
            Some("Check --base-url; EU subscriptions use https://app.eu.pendo.io.")
        }
        _ if matches!(api_error.status(), Some(401 | 403)) => {
            Some("The integration key was rejected. Check that it is valid and has read access.")
        }
        _ => None,
    }
}

/// Load configuration from file or use defaults, with the file it came from.
///
/// Runs before logging is set up, so problems go straight to stderr.
fn load_config(args: &Args) -> Result<(Config, Option<PathBuf>)> {
    if let Some(ref config_path) = args.config {
        return Ok((Config::load(config_path)?, Some(config_path.clone())));
    }

    match Config::load_default() {
        Ok(Some(config)) => Ok((config, Some(PathBuf::from(CONFIG_FILE)))),
        Ok(None) => Ok((Config::default(), None)),
        Err(e) => {
            eprintln!("⚠️  Failed to load {}: {:#}", CONFIG_FILE, e);
            Ok((Config::default(), None))
        }
    }
}

/// Dispatch the subcommand. Returns the exit code.
async fn run(args: Args, mut config: Config) -> Result<i32> {
    let command = args.command.clone().context("A command is required")?;

    // Commands that need neither a key nor the network.
    match &command {
        Command::Query { dry_run: true, .. } => {
            println!("{}", query_body(&command, &config)?);
            return Ok(0);
        }
        Command::History { entity, id, bucket } => {
            return show_history(&config, args.format, *entity, id.as_deref(), bucket.as_deref());
        }
        _ => {}
    }

    let client = PendoClient::new(&config.api)?;
    let mut options = SyncOptions::from_config(&config, !args.quiet);
    let now = Utc::now();

    match command.clone() {
        Command::Status => {
            let status = client.status().await;
            match args.format {
                OutputFormat::Json => println!("{}", report::to_json(&status)?),
                OutputFormat::Markdown => {
                    let mark = if status.connected { "✅ connected" } else { "❌ not connected" };
                    println!("Pendo API: {}", mark);
                    println!("   Host: {}", status.base_url);
                    println!("   Key:  {}", status.api_key_prefix);
                }
            }
            return Ok(if status.connected { 0 } else { 1 });
        }
        Command::Overview => {
            let overview = client
                .data_overview()
                .await
                .context("Failed to fetch data overview")?;
            match args.format {
                OutputFormat::Json => println!("{}", report::to_json(&overview)?),
                OutputFormat::Markdown => print!("{}", report::overview_table(&overview)),
            }
        }
        Command::Guides { flat } => {
            options.flat_guide_events = flat;
            let guides = sync::collect_guides(&client, &options, now).await?;
            print_output(args.format, &guides, report::guides_table)?;
        }
        Command::Pages => {
            let pages = sync::collect_pages(&client, &options, now).await?;
            print_output(args.format, &pages, report::pages_table)?;
        }
        Command::Features => {
            let features = sync::collect_features(&client, &options, now).await?;
            print_output(args.format, &features, report::features_table)?;
        }
        Command::Visitors { limit } => {
            let visitors = sync::collect_visitors(&client, config.api.days, limit, now).await?;
            print_output(args.format, &visitors, report::visitors_table)?;
        }
        Command::Accounts { limit } => {
            let accounts = sync::collect_accounts(&client, limit, now).await?;
            print_output(args.format, &accounts, report::accounts_table)?;
        }
        Command::Nps { guide_id, poll_id } => {
            let guide_id = guide_id.or_else(|| config.nps.guide_id.clone());
            let poll_id = poll_id.or_else(|| config.nps.poll_id.clone());
            let (Some(guide_id), Some(poll_id)) = (guide_id, poll_id) else {
                anyhow::bail!(
                    "NPS needs --guide-id and --poll-id, or guide_id and poll_id under [nps] in {}",
                    CONFIG_FILE
                );
            };
            let nps = sync::collect_nps(&client, &guide_id, &poll_id, config.api.days, now).await?;
            match args.format {
                OutputFormat::Json => println!("{}", report::to_json(&nps)?),
                OutputFormat::Markdown => print!("{}", report::nps_block(&nps)),
            }
        }
        Command::Query { .. } => {
            let rows = run_query(&client, &command, &config).await?;
            info!("Query returned {} rows", rows.len());
            println!("{}", report::to_json(&rows)?);
        }
        Command::Reports => {
            let reports = client.list_reports().await.context("Failed to list reports")?;
            println!("{}", report::to_json(&reports)?);
        }
        Command::Schema { kind } => {
            let schema = client
                .metadata_schema(&kind)
                .await
                .with_context(|| format!("Failed to fetch {} metadata schema", kind))?;
            println!("{}", report::to_json(&schema)?);
        }
        // Served from the store above.
        Command::History { .. } => {}
        Command::Sync => {
            let mut store = MetricStore::open(&config.storage.database_path).with_context(|| {
                format!(
                    "Failed to open metric store at {}",
                    config.storage.database_path.display()
                )
            })?;
            let summary = sync::run_sync(&client, &mut store, &options).await?;

            println!("\n📊 Sync Summary ({}):", summary.bucket);
            println!(
                "   Guides: {} | Pages: {} | Features: {}",
                summary.guides, summary.pages, summary.features
            );
            println!(
                "   Visitors: {} | Accounts: {} | NPS: {}",
                summary.visitors,
                summary.accounts,
                if summary.nps { "yes" } else { "no" }
            );
            println!(
                "\n✅ Stored {} snapshots in {}",
                summary.written,
                config.storage.database_path.display()
            );
        }
        Command::Report {
            output,
            summarize,
            no_summary,
            ollama_url,
            model,
        } => {
            if let Some(url) = ollama_url {
                config.llm.ollama_url = url;
            }
            if let Some(model) = model {
                config.llm.model = model;
            }
            let use_llm = (config.llm.enabled || summarize) && !no_summary;
            let output = output.unwrap_or_else(|| PathBuf::from(&config.general.output));
            run_report(&client, &config, &options, use_llm, args.format, &output).await?;
        }
    }

    Ok(0)
}

/// Print snapshots stored by earlier syncs.
fn show_history(
    config: &Config,
    format: OutputFormat,
    entity: EntityType,
    id: Option<&str>,
    bucket: Option<&str>,
) -> Result<i32> {
    let store = MetricStore::open(&config.storage.database_path).with_context(|| {
        format!(
            "Failed to open metric store at {}",
            config.storage.database_path.display()
        )
    })?;

    let snapshots = match (id, bucket) {
        (Some(id), Some(bucket)) => store
            .get_snapshot(entity, id, bucket)?
            .into_iter()
            .collect(),
        _ => store.list_snapshots(entity, bucket)?,
    };
    debug!("{} of {} stored rows match", snapshots.len(), store.count()?);

    match format {
        OutputFormat::Json => println!("{}", report::to_json(&snapshots)?),
        OutputFormat::Markdown => print!("{}", report::snapshots_table(&snapshots)),
    }
    Ok(0)
}

fn print_output<T: serde::Serialize>(
    format: OutputFormat,
    items: &[T],
    table: fn(&[T]) -> String,
) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", report::to_json(items)?),
        OutputFormat::Markdown => print!("{}", table(items)),
    }
    Ok(())
}

/// Pretty-printed request body for a query command.
fn query_body(command: &Command, config: &Config) -> Result<String> {
    let Command::Query {
        source,
        filter,
        group_by,
        sort,
        flat,
        ..
    } = command
    else {
        anyhow::bail!("not a query command");
    };

    let now = Utc::now();
    let window = Some(TimeSeries::last_days(now, config.api.days));
    let body = if *flat {
        let filter = filter.as_deref().unwrap_or_default();
        serde_json::to_string_pretty(&adhoc_flat(*source, filter, window, now))?
    } else {
        serde_json::to_string_pretty(&adhoc_pipeline(
            *source,
            filter.as_deref(),
            group_by.as_deref().unwrap_or_default(),
            sort.as_deref().unwrap_or_default(),
            window,
        ))?
    };
    Ok(body)
}

async fn run_query(
    client: &PendoClient,
    command: &Command,
    config: &Config,
) -> Result<Vec<aggregation::Row>> {
    let Command::Query {
        source,
        filter,
        group_by,
        sort,
        flat,
        ..
    } = command
    else {
        anyhow::bail!("not a query command");
    };

    let now = Utc::now();
    let window = Some(TimeSeries::last_days(now, config.api.days));
    let rows = if *flat {
        let request = adhoc_flat(*source, filter.as_deref().unwrap_or_default(), window, now);
        client.aggregate_flat(&request).await?
    } else {
        let request = adhoc_pipeline(
            *source,
            filter.as_deref(),
            group_by.as_deref().unwrap_or_default(),
            sort.as_deref().unwrap_or_default(),
            window,
        )
        .with_request_id(aggregation::request::request_id("query", source.pipeline_name(), now));
        client.aggregate_pipeline(&request).await?
    };
    Ok(rows)
}

/// Collect the dashboard, summarize it and write the report.
async fn run_report(
    client: &PendoClient,
    config: &Config,
    options: &SyncOptions,
    use_llm: bool,
    format: OutputFormat,
    output: &Path,
) -> Result<()> {
    let start_time = Instant::now();

    println!("📥 Fetching metrics from {}", client.base_url());
    let data = sync::collect_dashboard(client, options).await?;

    let (summary, model_used) = if use_llm {
        println!("🤖 Asking {} for a summary...", config.llm.model);
        let summarizer = Summarizer::new(SummarizerConfig::from(&config.llm))?;
        let outcome = summarizer.summarize(&data).await;
        (outcome, Some(summarizer.model_name().to_string()))
    } else {
        (SummaryOutcome::Disabled, None)
    };

    println!("📝 Generating report...");
    let report = Report {
        metadata: ReportMetadata {
            base_url: client.base_url().to_string(),
            generated_at: data.generated_at,
            window_days: data.window_days,
            model_used,
            duration_seconds: start_time.elapsed().as_secs_f64(),
        },
        data,
        summary,
    };

    let content = match format {
        OutputFormat::Json => report::generate_json_report(&report)?,
        OutputFormat::Markdown => report::generate_markdown_report(&report),
    };

    std::fs::write(output, &content)
        .with_context(|| format!("Failed to write report to {}", output.display()))?;

    println!("\n📊 Report Summary:");
    println!(
        "   Guides: {} | Pages: {} | Features: {}",
        report.data.guides.len(),
        report.data.pages.len(),
        report.data.features.len()
    );
    println!("   Guide views: {}", report.data.total_guide_views());
    if let SummaryOutcome::Unavailable { ref reason } = report.summary {
        println!("   ⚠️  AI summary unavailable: {}", reason);
    }
    println!("   Duration: {:.1}s", report.metadata.duration_seconds);
    println!("\n✅ Report saved to: {}", output.display());

    Ok(())
}
