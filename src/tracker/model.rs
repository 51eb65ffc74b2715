//! Core lifecycle types: pull requests, classified events, chat identifiers.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a chat channel (a 64-bit snowflake).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub u64);

/// Identifier of a notification posted on the chat surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationId(pub u64);

macro_rules! snowflake_text {
    ($ty:ident) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $ty {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse::<u64>().map($ty)
            }
        }
    };
}

snowflake_text!(ChannelId);
snowflake_text!(NotificationId);

/// Lifecycle state of a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrState {
    Pending,
    Merged,
}

impl PrState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrState::Pending => "pending",
            PrState::Merged => "merged",
        }
    }
}

impl FromStr for PrState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PrState::Pending),
            "merged" => Ok(PrState::Merged),
            other => Err(format!("unknown pull request state '{other}'")),
        }
    }
}

/// A raw record from the mail archive query tool.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    pub id: String,
    pub subject: String,
    /// Display form, e.g. `Jane Doe <jane@example.org>`.
    pub sender: String,
    pub date: DateTime<Utc>,
    /// Ancestor message ids, oldest first (References order).
    pub refs: Vec<String>,
}

/// One tracked pull request, keyed by the message id of its submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PullRequest {
    pub message_id: String,
    pub subsystem: String,
    pub subject: String,
    pub sender: String,
    pub submitted_at: DateTime<Utc>,
    pub state: PrState,
    pub merge_commit_hash: Option<String>,
    pub merge_url: Option<String>,
    pub merged_at: Option<DateTime<Utc>>,
    pub thread_refs: BTreeSet<String>,
}

impl PullRequest {
    pub fn is_merged(&self) -> bool {
        self.state == PrState::Merged
    }
}

/// A `[GIT PULL]` submission.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionEvent {
    pub message_id: String,
    pub subsystem: String,
    pub subject: String,
    pub sender: String,
    pub submitted_at: DateTime<Utc>,
    pub thread_refs: BTreeSet<String>,
}

impl SubmissionEvent {
    pub fn into_pull_request(self) -> PullRequest {
        PullRequest {
            message_id: self.message_id,
            subsystem: self.subsystem,
            subject: self.subject,
            sender: self.sender,
            submitted_at: self.submitted_at,
            state: PrState::Pending,
            merge_commit_hash: None,
            merge_url: None,
            merged_at: None,
            thread_refs: self.thread_refs,
        }
    }
}

/// A merge-bot reply carrying the upstream merge commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeEvent {
    /// Message id of the bot reply itself.
    pub confirmation_id: String,
    /// Ancestors of the bot reply; the submission is one of them.
    pub refs: Vec<String>,
    pub merge_commit_hash: String,
    pub merge_url: String,
    pub merged_at: DateTime<Utc>,
}

/// Classifier output.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    Submission(SubmissionEvent),
    MergeConfirmation(MergeEvent),
    Ignored,
}
