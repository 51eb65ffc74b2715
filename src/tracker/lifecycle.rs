//! Lifecycle store: applies submission and merge events to tracked pull requests.
//!
//! State transitions for a given message id run under a per-key async lock,
//! so a poll-driven merge and a reaction-driven reconciliation of the same
//! pull request serialize. Collaborator I/O happens before the lock is taken.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::error::TrackerError;
use crate::store::Database;
use crate::tracker::model::{MergeEvent, PullRequest, SubmissionEvent};

/// Default retention cap for tracked pull requests.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Per-key mutual exclusion. Idle entries are dropped on the next acquire.
#[derive(Default)]
pub(crate) struct KeyLocks {
    inner: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyLocks {
    pub(crate) async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let slot = {
            let mut map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
            map.retain(|_, m| Arc::strong_count(m) > 1);
            Arc::clone(map.entry(key.to_string()).or_default())
        };
        slot.lock_owned().await
    }
}

/// Ids a merge confirmation may reference to reach `pr`: its own id and
/// every ancestor in its thread.
fn link_ids(pr: &PullRequest) -> Vec<String> {
    std::iter::once(pr.message_id.clone())
        .chain(pr.thread_refs.iter().cloned())
        .collect()
}

/// Result of applying a merge confirmation.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeApplication {
    pub pull_request: PullRequest,
    /// `false` when the pull request was already merged.
    pub applied: bool,
}

/// A pending pull request annotated with its age.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingEntry {
    #[serde(flatten)]
    pub pull_request: PullRequest,
    pub age_days: i64,
}

/// Owns the pull request table.
pub struct LifecycleStore {
    db: Arc<dyn Database>,
    locks: KeyLocks,
    capacity: usize,
}

impl LifecycleStore {
    pub fn new(db: Arc<dyn Database>, capacity: usize) -> Self {
        Self {
            db,
            locks: KeyLocks::default(),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub async fn get(&self, message_id: &str) -> Result<Option<PullRequest>, TrackerError> {
        Ok(self.db.get_pull_request(message_id).await?)
    }

    /// Insert a submission if unseen, otherwise return the stored row.
    ///
    /// A retained merge confirmation referencing the new submission is
    /// adopted immediately, so the returned row may already be merged.
    pub async fn record_submission(
        &self,
        event: SubmissionEvent,
    ) -> Result<PullRequest, TrackerError> {
        let message_id = event.message_id.clone();
        let pr = {
            let _guard = self.locks.lock(&message_id).await;

            if let Some(existing) = self.db.get_pull_request(&message_id).await? {
                debug!(message_id = %message_id, "Submission already tracked");
                return Ok(existing);
            }

            let pr = event.into_pull_request();
            self.db.insert_pull_request(&pr).await?;
            info!(message_id = %message_id, subsystem = %pr.subsystem, "Tracking new pull request");

            match self.db.find_unlinked_merge(&link_ids(&pr)).await? {
                Some(merge) => {
                    self.db.mark_merged(&message_id, &merge).await?;
                    self.db.delete_unlinked_merge(&merge.confirmation_id).await?;
                    info!(
                        message_id = %message_id,
                        confirmation = %merge.confirmation_id,
                        "Adopted retained merge confirmation"
                    );
                    self.db.get_pull_request(&message_id).await?.unwrap_or(pr)
                }
                None => pr,
            }
        };

        self.evict().await?;
        Ok(pr)
    }

    /// Find the tracked pull request a merge confirmation belongs to.
    ///
    /// Refs are tried in order, first as submission ids and then through the
    /// ancestor index.
    pub async fn resolve_target(
        &self,
        merge: &MergeEvent,
    ) -> Result<Option<String>, TrackerError> {
        for ref_id in &merge.refs {
            if self.db.get_pull_request(ref_id).await?.is_some() {
                return Ok(Some(ref_id.clone()));
            }
        }
        for ref_id in &merge.refs {
            if let Some(pr) = self.db.find_pull_request_by_thread_ref(ref_id).await? {
                return Ok(Some(pr.message_id));
            }
        }
        Ok(None)
    }

    /// Apply a merge confirmation to whichever pull request its refs point at.
    /// Unresolvable refs yield `TrackerError::Linkage`.
    pub async fn record_merge(&self, merge: &MergeEvent) -> Result<MergeApplication, TrackerError> {
        match self.resolve_target(merge).await? {
            Some(message_id) => self.record_merge_for(&message_id, merge).await,
            None => Err(TrackerError::Linkage {
                confirmation_id: merge.confirmation_id.clone(),
                refs: merge.refs.clone(),
            }),
        }
    }

    /// Apply a merge confirmation to a known pull request.
    pub async fn record_merge_for(
        &self,
        message_id: &str,
        merge: &MergeEvent,
    ) -> Result<MergeApplication, TrackerError> {
        let _guard = self.locks.lock(message_id).await;

        let applied = self.db.mark_merged(message_id, merge).await?;
        let pull_request = self.db.get_pull_request(message_id).await?.ok_or_else(|| {
            TrackerError::Linkage {
                confirmation_id: merge.confirmation_id.clone(),
                refs: vec![message_id.to_string()],
            }
        })?;

        if applied {
            info!(
                message_id,
                commit = %merge.merge_commit_hash,
                "Pull request merged"
            );
        } else {
            debug!(message_id, "Merge already applied");
        }

        Ok(MergeApplication {
            pull_request,
            applied,
        })
    }

    /// Keep an unlinkable merge confirmation for later adoption.
    pub async fn retain_unlinked(&self, merge: &MergeEvent) -> Result<(), TrackerError> {
        self.db.insert_unlinked_merge(merge).await?;
        let pruned = self.db.prune_unlinked_merges(self.capacity).await?;
        warn!(
            confirmation = %merge.confirmation_id,
            refs = ?merge.refs,
            "Merge confirmation references no tracked pull request, retained"
        );
        if pruned > 0 {
            debug!(pruned, "Pruned retained merge confirmations");
        }
        Ok(())
    }

    /// A retained confirmation that links to `pr`, left in place.
    pub async fn find_unlinked(&self, pr: &PullRequest) -> Result<Option<MergeEvent>, TrackerError> {
        Ok(self.db.find_unlinked_merge(&link_ids(pr)).await?)
    }

    /// Drop a retained confirmation after it has been applied.
    pub async fn discard_unlinked(&self, confirmation_id: &str) -> Result<(), TrackerError> {
        self.db.delete_unlinked_merge(confirmation_id).await?;
        Ok(())
    }

    pub async fn list_unlinked(&self) -> Result<Vec<MergeEvent>, TrackerError> {
        Ok(self.db.list_unlinked_merges().await?)
    }

    /// Pending pull requests whose subsystem passes `accepts`, oldest first.
    pub async fn list_pending<F>(
        &self,
        accepts: F,
        now: DateTime<Utc>,
    ) -> Result<Vec<PendingEntry>, TrackerError>
    where
        F: Fn(&str) -> bool,
    {
        let pending = self.db.list_pending_pull_requests().await?;
        Ok(pending
            .into_iter()
            .filter(|pr| accepts(&pr.subsystem))
            .map(|pr| {
                let age_days = (now - pr.submitted_at).num_days().max(0);
                PendingEntry {
                    pull_request: pr,
                    age_days,
                }
            })
            .collect())
    }

    /// Enforce the retention cap.
    pub async fn evict(&self) -> Result<usize, TrackerError> {
        if self.db.count_pull_requests().await? <= self.capacity {
            return Ok(0);
        }
        Ok(self.db.evict_oldest_pull_requests(self.capacity).await?)
    }
}
