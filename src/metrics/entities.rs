//! Visitor and account records.
//!
//! Entity sources return flat fields when a pipeline `select`s them and the
//! raw `metadata.auto.*` tree otherwise, so both spellings are read.

use crate::aggregation::response::{str_field, time_field, u64_field, Row};
use crate::models::{Account, Visitor};
use std::cmp::Reverse;

pub fn parse_visitors(rows: &[Row]) -> Vec<Visitor> {
    rows.iter()
        .filter_map(|row| {
            Some(Visitor {
                visitor_id: str_field(row, &["visitorId", "id"])?,
                account_id: str_field(row, &["accountId", "metadata.auto.accountid"]),
                first_visit: time_field(row, &["firstVisit", "metadata.auto.firstvisit"]),
                last_visit: time_field(row, &["lastVisit", "metadata.auto.lastvisit"]),
                num_events: u64_field(row, &["numEvents"]),
            })
        })
        .collect()
}

pub fn parse_accounts(rows: &[Row]) -> Vec<Account> {
    rows.iter()
        .filter_map(|row| {
            Some(Account {
                account_id: str_field(row, &["accountId", "id"])?,
                first_visit: time_field(row, &["firstVisit", "metadata.auto.firstvisit"]),
                last_visit: time_field(row, &["lastVisit", "metadata.auto.lastvisit"]),
            })
        })
        .collect()
}

/// Most events first; visitors without a count sort last.
pub fn rank_visitors(visitors: &mut [Visitor]) {
    visitors.sort_by_key(|v| Reverse(v.num_events));
}

/// Most recently active first.
pub fn rank_accounts(accounts: &mut [Account]) {
    accounts.sort_by_key(|a| Reverse(a.last_visit));
}
