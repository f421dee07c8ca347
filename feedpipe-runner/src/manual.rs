//! Briefs for feeds that must be downloaded by hand.
//!
//! Only feeds without a fetcher that are tagged [`CORE_DATA_TAG`] are
//! covered. Each brief says where this month's file should land and what is
//! known about where to find it.

use std::path::PathBuf;

use chrono::NaiveDate;
use regex::Regex;
use serde::Serialize;

use feedpipe_core::{ImportRecord, Ledger};

use crate::orchestrator::RunError;
use crate::pipeline::Pipeline;

/// Tag marking a manual feed as required for a complete monthly import.
pub const CORE_DATA_TAG: &str = "core_data";

/// What the operator needs to fetch one manual feed.
#[derive(Debug, Clone, Serialize)]
pub struct ManualDataBrief {
    pub feed_id: String,
    /// `<data_root>/<data_dir>/<YYYY_MM>` for the current month.
    pub expected_location: PathBuf,
    pub index_url: Option<String>,
    pub urls: Vec<(String, String)>,
    pub publication_schedule: Option<String>,
    pub notes: Option<String>,
    /// Most recent ledger record for each importer, by template.
    pub last_imported: Vec<(String, Option<ImportRecord>)>,
}

/// Briefs for every manual core-data feed, in manifest order.
pub fn manual_data_briefs(
    pipeline: &Pipeline,
    today: NaiveDate,
) -> Result<Vec<ManualDataBrief>, RunError> {
    let bucket = today.format("%Y_%m").to_string();

    pipeline
        .manifest
        .without_fetchers()
        .into_iter()
        .filter(|feed| feed.has_tag(CORE_DATA_TAG))
        .map(|feed| {
            let last_imported = feed
                .importers
                .iter()
                .map(|importer| {
                    let record = last_record(&pipeline.ledger, &feed.id, importer.pattern())?;
                    Ok((importer.template().to_string(), record))
                })
                .collect::<Result<Vec<_>, RunError>>()?;

            Ok(ManualDataBrief {
                feed_id: feed.id.clone(),
                expected_location: pipeline.locator.feed_dir(feed).join(&bucket),
                index_url: feed.index_url.clone(),
                urls: feed
                    .urls
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
                publication_schedule: feed.publication_schedule.clone(),
                notes: feed.notes.clone(),
                last_imported,
            })
        })
        .collect()
}

fn last_record(
    ledger: &Ledger,
    feed_id: &str,
    pattern: &Regex,
) -> Result<Option<ImportRecord>, RunError> {
    Ok(ledger.most_recent_record(feed_id, pattern)?)
}
