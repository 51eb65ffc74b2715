//! Classifier: raw archive records to typed lifecycle events.

use std::collections::BTreeSet;
use std::sync::Arc;

use regex::Regex;
use tracing::debug;

use crate::archive::MailArchive;
use crate::error::TrackerError;
use crate::tracker::model::{MergeEvent, RawMessage, SubmissionEvent, TrackerEvent};

/// Subject token marking a pull request submission.
pub const SUBMISSION_MARKER: &str = "[git pull]";

/// Default merge-commit URL pattern. Capture group 1 is the commit hash.
pub const DEFAULT_MERGE_URL_PATTERN: &str = r"https://git\.kernel\.org/torvalds/c/([0-9a-f]{12,40})";

/// Whether a subject opens a pull request thread (not a reply to one).
pub fn is_submission_subject(subject: &str) -> bool {
    let lower = subject.trim().to_lowercase();
    lower.contains(SUBMISSION_MARKER) && !lower.starts_with("re:")
}

/// First merge-commit URL in `body` and its hash.
pub fn extract_merge_commit(pattern: &Regex, body: &str) -> Option<(String, String)> {
    let caps = pattern.captures(body)?;
    let url = caps.get(0)?.as_str().to_string();
    let hash = caps.get(1)?.as_str().to_string();
    Some((hash, url))
}

pub struct Classifier {
    archive: Arc<dyn MailArchive>,
    bot_address: String,
    merge_url: Regex,
}

impl Classifier {
    pub fn new(archive: Arc<dyn MailArchive>, bot_address: impl Into<String>, merge_url: Regex) -> Self {
        Self {
            archive,
            bot_address: bot_address.into().to_lowercase(),
            merge_url,
        }
    }

    pub fn bot_address(&self) -> &str {
        &self.bot_address
    }

    pub fn is_from_merge_bot(&self, sender: &str) -> bool {
        sender.to_lowercase().contains(&self.bot_address)
    }

    /// Classify one record seen under `subsystem`. The body is fetched only
    /// for merge-bot messages.
    pub async fn classify(
        &self,
        msg: &RawMessage,
        subsystem: &str,
    ) -> Result<TrackerEvent, TrackerError> {
        if self.is_from_merge_bot(&msg.sender) {
            let body = self.archive.fetch_body(&msg.id).await?;
            return Ok(match extract_merge_commit(&self.merge_url, &body) {
                Some((merge_commit_hash, merge_url)) => TrackerEvent::MergeConfirmation(MergeEvent {
                    confirmation_id: msg.id.clone(),
                    refs: msg.refs.clone(),
                    merge_commit_hash,
                    merge_url,
                    merged_at: msg.date,
                }),
                None => {
                    debug!(message_id = %msg.id, "Merge-bot reply without merge commit URL");
                    TrackerEvent::Ignored
                }
            });
        }

        if is_submission_subject(&msg.subject) {
            return Ok(TrackerEvent::Submission(SubmissionEvent {
                message_id: msg.id.clone(),
                subsystem: subsystem.to_string(),
                subject: msg.subject.clone(),
                sender: msg.sender.clone(),
                submitted_at: msg.date,
                thread_refs: msg.refs.iter().cloned().collect::<BTreeSet<_>>(),
            }));
        }

        Ok(TrackerEvent::Ignored)
    }
}
