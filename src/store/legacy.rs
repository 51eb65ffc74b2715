//! One-shot import of the JSON state files written by earlier deployments.
//!
//! - `pending_prs.json`: `{message_id: {subject, subsystem, from, date, url}}`
//! - `message_map.json`: `{message_id: {"<channel id>": notification_id}}`
//!
//! JSON object keys are always strings, so channel ids come back as text
//! and must be parsed into `ChannelId` before they are usable as keys.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::{ConfigError, DatabaseError, Error};
use crate::tracker::lifecycle::LifecycleStore;
use crate::tracker::messages::MessageTracker;
use crate::tracker::model::{ChannelId, NotificationId, SubmissionEvent};

pub const MESSAGE_MAP_FILE: &str = "message_map.json";
pub const PENDING_FILE: &str = "pending_prs.json";

/// Counts from one import run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LegacyImport {
    pub pull_requests: usize,
    pub mappings: usize,
    pub skipped: usize,
}

#[derive(Debug, Deserialize)]
struct LegacyPending {
    #[serde(default)]
    subject: String,
    #[serde(default)]
    subsystem: String,
    #[serde(default, rename = "from")]
    sender: String,
    #[serde(default)]
    date: String,
}

/// A mapping row read from `message_map.json`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyMapping {
    pub message_id: String,
    pub channel: ChannelId,
    pub notification: NotificationId,
}

fn parse_legacy_date(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|ndt| ndt.and_utc())
}

fn snowflake_value(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Parse `message_map.json`. A channel key or notification id that is not a
/// snowflake fails the whole file.
pub fn parse_message_map(text: &str) -> Result<Vec<LegacyMapping>, Error> {
    let raw: BTreeMap<String, BTreeMap<String, Value>> = serde_json::from_str(text)
        .map_err(|e| ConfigError::ParseError(format!("{MESSAGE_MAP_FILE}: {e}")))?;

    let mut out = Vec::new();
    for (message_id, channels) in raw {
        for (key, value) in channels {
            let channel: ChannelId = key.parse().map_err(|e| {
                DatabaseError::Serialization(format!(
                    "{MESSAGE_MAP_FILE}: channel key '{key}' for {message_id}: {e}"
                ))
            })?;
            let notification = snowflake_value(&value).map(NotificationId).ok_or_else(|| {
                DatabaseError::Serialization(format!(
                    "{MESSAGE_MAP_FILE}: notification id {value} for {message_id} in channel {key}"
                ))
            })?;
            out.push(LegacyMapping {
                message_id: message_id.clone(),
                channel,
                notification,
            });
        }
    }
    Ok(out)
}

/// Parse `pending_prs.json` into submissions. Entries with an unusable date
/// are skipped; the second value is how many.
pub fn parse_pending(text: &str) -> Result<(Vec<SubmissionEvent>, usize), Error> {
    let raw: BTreeMap<String, LegacyPending> = serde_json::from_str(text)
        .map_err(|e| ConfigError::ParseError(format!("{PENDING_FILE}: {e}")))?;

    let mut skipped = 0;
    let mut out = Vec::with_capacity(raw.len());
    for (message_id, entry) in raw {
        let Some(submitted_at) = parse_legacy_date(&entry.date) else {
            warn!(message_id = %message_id, date = %entry.date, "Skipping legacy entry with unparseable date");
            skipped += 1;
            continue;
        };
        out.push(SubmissionEvent {
            message_id,
            subsystem: entry.subsystem,
            subject: entry.subject,
            sender: entry.sender,
            submitted_at,
            thread_refs: BTreeSet::new(),
        });
    }
    out.sort_by(|a, b| {
        a.submitted_at
            .cmp(&b.submitted_at)
            .then_with(|| a.message_id.cmp(&b.message_id))
    });
    Ok((out, skipped))
}

/// Import whichever legacy files exist under `dir`.
pub async fn import_legacy_state(
    dir: &Path,
    lifecycle: &LifecycleStore,
    messages: &MessageTracker,
) -> Result<LegacyImport, Error> {
    let mut report = LegacyImport::default();

    let pending_path = dir.join(PENDING_FILE);
    if pending_path.exists() {
        let text = std::fs::read_to_string(&pending_path).map_err(ConfigError::Io)?;
        let (submissions, skipped) = parse_pending(&text)?;
        report.skipped += skipped;
        for submission in submissions {
            lifecycle.record_submission(submission).await?;
            report.pull_requests += 1;
        }
    }

    let map_path = dir.join(MESSAGE_MAP_FILE);
    if map_path.exists() {
        let text = std::fs::read_to_string(&map_path).map_err(ConfigError::Io)?;
        for row in parse_message_map(&text)? {
            messages
                .record(&row.message_id, row.channel, row.notification)
                .await?;
            report.mappings += 1;
        }
    }

    info!(
        dir = %dir.display(),
        pull_requests = report.pull_requests,
        mappings = report.mappings,
        skipped = report.skipped,
        "Legacy state imported"
    );
    Ok(report)
}
