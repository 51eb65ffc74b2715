//! Unified `Database` trait: single async interface for all persistence.
//!
//! Rows are keyed by primitive values only (message ids, numeric channel and
//! notification ids). Components above this trait never hold row handles
//! across calls.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::tracker::model::{ChannelId, MergeEvent, NotificationId, PullRequest};

/// Backend-agnostic database trait covering pull requests and notification mappings.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Pull requests ───────────────────────────────────────────────

    /// Insert a pull request and its ref index rows.
    /// Returns `false` (and writes nothing) if the message id already exists.
    async fn insert_pull_request(&self, pr: &PullRequest) -> Result<bool, DatabaseError>;

    /// Get a pull request by its submission message id.
    async fn get_pull_request(&self, message_id: &str)
    -> Result<Option<PullRequest>, DatabaseError>;

    /// Find the pull request whose thread refs contain `ref_id`.
    async fn find_pull_request_by_thread_ref(
        &self,
        ref_id: &str,
    ) -> Result<Option<PullRequest>, DatabaseError>;

    /// Transition a pending pull request to merged.
    /// Returns `false` if the row is missing or already merged.
    async fn mark_merged(&self, message_id: &str, merge: &MergeEvent)
    -> Result<bool, DatabaseError>;

    /// All pending pull requests, oldest `submitted_at` first.
    async fn list_pending_pull_requests(&self) -> Result<Vec<PullRequest>, DatabaseError>;

    /// Number of stored pull requests.
    async fn count_pull_requests(&self) -> Result<usize, DatabaseError>;

    /// Delete all but the `keep` most recently submitted pull requests.
    /// Returns the number of rows deleted.
    async fn evict_oldest_pull_requests(&self, keep: usize) -> Result<usize, DatabaseError>;

    // ── Unlinked merge confirmations ────────────────────────────────

    /// Retain a merge confirmation that could not be linked yet.
    /// Idempotent on the confirmation's message id.
    async fn insert_unlinked_merge(&self, merge: &MergeEvent) -> Result<(), DatabaseError>;

    /// Earliest retained confirmation whose refs include any of `ids`.
    async fn find_unlinked_merge(&self, ids: &[String])
    -> Result<Option<MergeEvent>, DatabaseError>;

    /// Drop a retained confirmation once it has been applied.
    async fn delete_unlinked_merge(&self, confirmation_id: &str) -> Result<bool, DatabaseError>;

    /// List retained confirmations, newest first.
    async fn list_unlinked_merges(&self) -> Result<Vec<MergeEvent>, DatabaseError>;

    /// Delete all but the `keep` most recent retained confirmations.
    async fn prune_unlinked_merges(&self, keep: usize) -> Result<usize, DatabaseError>;

    // ── Notification mappings ───────────────────────────────────────

    /// Insert or overwrite the notification posted for `(message_id, channel)`.
    async fn upsert_mapping(
        &self,
        message_id: &str,
        channel: ChannelId,
        notification: NotificationId,
    ) -> Result<(), DatabaseError>;

    /// All `(channel -> notification)` pairs recorded for a message id.
    async fn get_mappings(
        &self,
        message_id: &str,
    ) -> Result<BTreeMap<ChannelId, NotificationId>, DatabaseError>;

    /// Reverse lookup: which message id a posted notification belongs to.
    async fn find_message_by_notification(
        &self,
        channel: ChannelId,
        notification: NotificationId,
    ) -> Result<Option<String>, DatabaseError>;
}
