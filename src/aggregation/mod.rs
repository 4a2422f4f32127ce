//! Pendo aggregation API: request builders, response normalization and
//! the HTTP client that ties them together.

pub mod client;
pub mod request;
pub mod response;

pub use client::PendoClient;
pub use request::{FlatRequest, PipelineRequest, SourceKind, TimeSeries};
pub use response::Row;
