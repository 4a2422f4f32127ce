//! Report rendering.

mod generator;

pub use generator::{
    accounts_table, features_table, generate_json_report, generate_markdown_report, guides_table,
    nps_block, overview_table, pages_table, snapshots_table, to_json, visitors_table,
};
