//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::aggregation::SourceKind;
use crate::models::EntityType;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Pendo Insights - product analytics from the Pendo aggregation API
///
/// Pull guide, page, feature, visitor, account and NPS data, cache the
/// derived metrics in SQLite, and render dashboard reports with an
/// optional LLM summary.
///
/// Examples:
///   pendo-insights status
///   pendo-insights overview
///   pendo-insights guides --top 5
///   pendo-insights nps --guide-id abc --poll-id xyz
///   pendo-insights query --source page-events --filter "pageId=='home'" --dry-run
///   pendo-insights report --summarize -o weekly.md
///   pendo-insights --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Pendo integration key
    #[arg(long, env = "PENDO_API_KEY", hide_env_values = true, global = true)]
    pub api_key: Option<String>,

    /// Pendo API host (e.g. https://app.eu.pendo.io)
    #[arg(long, env = "PENDO_BASE_URL", value_name = "URL", global = true)]
    pub base_url: Option<String>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .pendo-insights.toml in the current directory
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Query window in days
    #[arg(long, value_name = "DAYS", global = true)]
    pub days: Option<u32>,

    /// API request timeout in seconds
    #[arg(long, value_name = "SECS", global = true)]
    pub timeout: Option<u64>,

    /// Number of aggregation queries in flight at once
    #[arg(long, value_name = "NUM", global = true)]
    pub concurrency: Option<usize>,

    /// Number of guides, pages and features to include
    #[arg(long, value_name = "COUNT", global = true)]
    pub top: Option<usize>,

    /// SQLite database for cached metrics
    #[arg(long, value_name = "FILE", global = true)]
    pub database: Option<PathBuf>,

    /// Output format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT", global = true)]
    pub format: OutputFormat,

    /// Enable verbose logging output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Generate a default .pendo-insights.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Check connectivity and show API status
    Status,

    /// Counts and a sample of guides, features, pages and reports
    Overview,

    /// Guides with view, completion and dismissal metrics
    Guides {
        /// Query guide events with the flat request shape
        #[arg(long)]
        flat: bool,
    },

    /// Pages with view and visitor counts
    Pages,

    /// Features with click and visitor counts
    Features,

    /// Most active visitors
    Visitors {
        /// Maximum visitors to list
        #[arg(long, default_value = "25", value_name = "COUNT")]
        limit: usize,
    },

    /// Most recently active accounts
    Accounts {
        /// Maximum accounts to list
        #[arg(long, default_value = "25", value_name = "COUNT")]
        limit: usize,
    },

    /// Net Promoter Score for a poll
    Nps {
        /// Guide containing the NPS poll (defaults to config)
        #[arg(long)]
        guide_id: Option<String>,

        /// Poll id inside the guide (defaults to config)
        #[arg(long)]
        poll_id: Option<String>,
    },

    /// Run an ad-hoc aggregation query and print the rows
    Query {
        /// Event or entity source
        #[arg(long, value_enum)]
        source: SourceKind,

        /// Filter expression, e.g. "guideId=='abc'"
        #[arg(long)]
        filter: Option<String>,

        /// Fields to group by, counting rows per group (comma-separated)
        #[arg(long, value_delimiter = ',', value_name = "FIELDS")]
        group_by: Option<Vec<String>>,

        /// Sort keys; prefix with '-' for descending (comma-separated)
        #[arg(long, value_delimiter = ',', value_name = "KEYS", allow_hyphen_values = true)]
        sort: Option<Vec<String>>,

        /// Send the flat request shape instead of a pipeline
        #[arg(long)]
        flat: bool,

        /// Print the request body without sending it
        #[arg(long)]
        dry_run: bool,
    },

    /// List saved Pendo reports
    Reports,

    /// Show the metadata schema for an entity kind
    Schema {
        /// Entity kind
        #[arg(value_parser = ["visitor", "account", "guide"])]
        kind: String,
    },

    /// Fetch metrics and upsert them into the local store
    Sync,

    /// Show snapshots stored by earlier syncs
    History {
        /// Entity type to list
        #[arg(value_enum)]
        entity: EntityType,

        /// Only this entity id
        #[arg(long)]
        id: Option<String>,

        /// Only this day (YYYY-MM-DD)
        #[arg(long, value_name = "DATE")]
        bucket: Option<String>,
    },

    /// Build a dashboard report
    Report {
        /// Output file path for the report
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Ask the LLM for a summary
        #[arg(long, conflicts_with = "no_summary")]
        summarize: bool,

        /// Skip the LLM summary even if enabled in config
        #[arg(long, conflicts_with = "summarize")]
        no_summary: bool,

        /// Ollama API endpoint URL
        #[arg(long, env = "OLLAMA_URL")]
        ollama_url: Option<String>,

        /// Ollama model used for the summary
        #[arg(short, long)]
        model: Option<String>,
    },
}

/// Output format for reports and listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        let Some(ref command) = self.command else {
            return Err("A command is required. Run with --help to see them.".to_string());
        };

        if let Some(ref url) = self.base_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("Base URL must start with 'http://' or 'https://'".to_string());
            }
        }

        if self.days == Some(0) {
            return Err("Days must be at least 1".to_string());
        }

        if self.timeout == Some(0) {
            return Err("Timeout must be at least 1 second".to_string());
        }

        if self.concurrency == Some(0) {
            return Err("Concurrency must be at least 1".to_string());
        }

        if self.top == Some(0) {
            return Err("Top must be at least 1".to_string());
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        match command {
            Command::Visitors { limit } | Command::Accounts { limit } if *limit == 0 => {
                return Err("Limit must be at least 1".to_string());
            }
            Command::Query {
                flat,
                filter,
                group_by,
                sort,
                ..
            } if *flat => {
                if filter.as_deref().map_or(true, |f| f.trim().is_empty()) {
                    return Err("--flat requires --filter".to_string());
                }
                if group_by.is_some() || sort.is_some() {
                    return Err(
                        "--group-by and --sort need the pipeline shape; drop --flat".to_string()
                    );
                }
            }
            Command::Report {
                ollama_url: Some(url),
                ..
            } if !url.starts_with("http://") && !url.starts_with("https://") => {
                return Err("Ollama URL must start with 'http://' or 'https://'".to_string());
            }
            Command::History {
                id: Some(_),
                bucket: None,
                ..
            } => {
                return Err("--id needs --bucket".to_string());
            }
            Command::History {
                bucket: Some(day), ..
            } if chrono::NaiveDate::parse_from_str(day, "%Y-%m-%d").is_err() => {
                return Err(format!("Bucket '{}' is not a YYYY-MM-DD date", day));
            }
            _ => {}
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    ///
    /// `config_verbose` is the config file's `general.verbose`; `--quiet` wins over it.
    pub fn log_level(&self, config_verbose: bool) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose || config_verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        let mut full = vec!["pendo-insights"];
        full.extend_from_slice(argv);
        Args::parse_from(full)
    }

    #[test]
    fn test_command_required() {
        let args = parse(&[]);
        assert!(args.validate().is_err());

        let args = parse(&["--init-config"]);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = parse(&["guides", "--days", "7", "--format", "json"]);
        assert!(matches!(args.command, Some(Command::Guides { flat: false })));
        assert_eq!(args.days, Some(7));
        assert_eq!(args.format, OutputFormat::Json);
        assert!(args.validate().is_ok());

        let args = parse(&["overview", "--format", "json"]);
        assert!(matches!(args.command, Some(Command::Overview)));
        assert_eq!(args.format, OutputFormat::Json);
    }

    #[test]
    fn test_validation_invalid_base_url() {
        let args = parse(&["--base-url", "app.pendo.io", "status"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_conflicting_options() {
        let args = parse(&["-v", "-q", "status"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_zero_values() {
        assert!(parse(&["--days", "0", "pages"]).validate().is_err());
        assert!(parse(&["visitors", "--limit", "0"]).validate().is_err());
    }

    #[test]
    fn test_flat_query_needs_filter() {
        let args = parse(&["query", "--source", "guide-events", "--flat"]);
        assert!(args.validate().is_err());

        let args = parse(&[
            "query",
            "--source",
            "guide-events",
            "--flat",
            "--filter",
            "guideId=='g'",
        ]);
        assert!(args.validate().is_ok());

        let args = parse(&[
            "query", "--source", "page-events", "--flat", "--filter", "x", "--sort", "-numEvents",
        ]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_query_parses_lists() {
        let args = parse(&["query", "--source", "page-events", "--group-by", "visitorId,day"]);
        match args.command {
            Some(Command::Query { source, group_by, .. }) => {
                assert_eq!(source, SourceKind::PageEvents);
                assert_eq!(group_by, Some(vec!["visitorId".to_string(), "day".to_string()]));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_history_arguments() {
        let args = parse(&["history", "page", "--bucket", "2024-05-01"]);
        assert!(args.validate().is_ok());
        assert!(matches!(
            args.command,
            Some(Command::History { entity: EntityType::Page, .. })
        ));

        assert!(parse(&["history", "guide", "--id", "g1"]).validate().is_err());
        assert!(parse(&["history", "guide", "--bucket", "May 1"]).validate().is_err());
    }

    #[test]
    fn test_log_level() {
        assert_eq!(parse(&["status"]).log_level(false), tracing::Level::INFO);
        assert_eq!(parse(&["-v", "status"]).log_level(false), tracing::Level::DEBUG);
        assert_eq!(parse(&["-q", "status"]).log_level(false), tracing::Level::ERROR);
    }

    #[test]
    fn test_config_verbose_raises_log_level() {
        assert_eq!(parse(&["status"]).log_level(true), tracing::Level::DEBUG);
        assert_eq!(parse(&["-q", "status"]).log_level(true), tracing::Level::ERROR);
    }
}
