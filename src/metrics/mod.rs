//! Metric derivation from normalized aggregation rows.
//!
//! Every function here is pure: the same rows always give the same
//! metrics, and empty input gives zeroed metrics rather than an error.

pub mod entities;
pub mod guides;
pub mod nps;
pub mod usage;

pub use entities::{parse_accounts, parse_visitors, rank_accounts, rank_visitors};
pub use guides::{guide_metrics, parse_guides, rank_guides};
pub use nps::{nps_score, nps_summary, poll_responses};
pub use usage::{feature_usage, page_analytics, parse_features, parse_pages};
