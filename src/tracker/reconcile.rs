//! Reconciliation engine: on-demand merge re-check triggered by a reaction
//! on a posted notification.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::archive::MailArchive;
use crate::error::TrackerError;
use crate::notify::Notifier;
use crate::tracker::classifier::Classifier;
use crate::tracker::fanout;
use crate::tracker::lifecycle::LifecycleStore;
use crate::tracker::messages::MessageTracker;
use crate::tracker::model::{ChannelId, MergeEvent, NotificationId, TrackerEvent};
use crate::tracker::render::Renderer;

/// Reaction placed when reconciliation itself failed.
pub const FAILURE_MARKER: &str = "⚠️";

/// Default archive lookback for reconciliation queries.
pub const DEFAULT_RECONCILE_LOOKBACK: Duration = Duration::from_secs(90 * 24 * 3600);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// Merge recorded (now or earlier). `edited` counts notifications rewritten.
    Updated { message_id: String, edited: usize },
    /// Tracked and still pending; no confirmation found.
    NotMerged { message_id: String },
    /// The notification maps to no tracked pull request.
    MetadataMissing,
}

impl ReconcileOutcome {
    /// Acknowledgement reaction for the triggering notification.
    pub fn marker(&self) -> &'static str {
        match self {
            ReconcileOutcome::Updated { .. } => "✅",
            ReconcileOutcome::NotMerged { .. } => "⏳",
            ReconcileOutcome::MetadataMissing => "❓",
        }
    }
}

pub struct ReconciliationEngine {
    lifecycle: Arc<LifecycleStore>,
    messages: MessageTracker,
    classifier: Arc<Classifier>,
    archive: Arc<dyn MailArchive>,
    notifier: Arc<dyn Notifier>,
    renderer: Renderer,
    lookback: Duration,
}

impl ReconciliationEngine {
    pub fn new(
        lifecycle: Arc<LifecycleStore>,
        messages: MessageTracker,
        classifier: Arc<Classifier>,
        archive: Arc<dyn MailArchive>,
        notifier: Arc<dyn Notifier>,
        lookback: Duration,
    ) -> Self {
        let renderer = Renderer::new(Arc::clone(&archive));
        Self {
            lifecycle,
            messages,
            classifier,
            archive,
            notifier,
            renderer,
            lookback,
        }
    }

    /// Run reconciliation and acknowledge on the triggering notification.
    pub async fn handle_reaction(
        &self,
        channel: ChannelId,
        notification: NotificationId,
    ) -> Result<ReconcileOutcome, TrackerError> {
        let result = self.reconcile(channel, notification).await;
        let marker = match &result {
            Ok(outcome) => outcome.marker(),
            Err(e) => {
                error!(%channel, %notification, "Reconciliation failed: {e}");
                FAILURE_MARKER
            }
        };
        if let Err(e) = self.notifier.react(channel, notification, marker).await {
            warn!(%channel, %notification, "Failed to acknowledge reaction: {e}");
        }
        result
    }

    pub async fn reconcile(
        &self,
        channel: ChannelId,
        notification: NotificationId,
    ) -> Result<ReconcileOutcome, TrackerError> {
        let Some(message_id) = self.messages.reverse_lookup(channel, notification).await? else {
            info!(%channel, %notification, "Reaction on unknown notification");
            return Ok(ReconcileOutcome::MetadataMissing);
        };

        let Some(pr) = self.lifecycle.get(&message_id).await? else {
            info!(message_id = %message_id, "Mapped pull request no longer tracked");
            return Ok(ReconcileOutcome::MetadataMissing);
        };

        if pr.is_merged() {
            debug!(message_id = %message_id, "Already merged");
            return Ok(ReconcileOutcome::Updated {
                message_id,
                edited: 0,
            });
        }

        let retained = self.lifecycle.find_unlinked(&pr).await?;
        let merge = match &retained {
            Some(merge) => Some(merge.clone()),
            None => self.find_confirmation(&message_id, &pr.subsystem).await?,
        };

        let Some(merge) = merge else {
            info!(message_id = %message_id, "No merge confirmation found");
            return Ok(ReconcileOutcome::NotMerged { message_id });
        };

        let application = self.lifecycle.record_merge_for(&message_id, &merge).await?;
        if retained.is_some() {
            self.lifecycle.discard_unlinked(&merge.confirmation_id).await?;
        }
        if !application.applied {
            return Ok(ReconcileOutcome::Updated {
                message_id,
                edited: 0,
            });
        }

        let mappings = self.messages.lookup(&message_id).await?;
        let rendered = self.renderer.merged(&application.pull_request);
        let edited = fanout::edit_all(self.notifier.as_ref(), &message_id, &mappings, &rendered).await;

        info!(message_id = %message_id, edited, "Reconciled merged pull request");
        Ok(ReconcileOutcome::Updated { message_id, edited })
    }

    /// Query the archive for a merge-bot reply referencing `message_id`.
    async fn find_confirmation(
        &self,
        message_id: &str,
        subsystem: &str,
    ) -> Result<Option<MergeEvent>, TrackerError> {
        let query = format!("refid:{message_id} AND f:{}", self.classifier.bot_address());
        let mut candidates = self.archive.query_messages(&query, self.lookback).await?;
        candidates.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));

        for msg in &candidates {
            match self.classifier.classify(msg, subsystem).await? {
                TrackerEvent::MergeConfirmation(merge) => {
                    let linked = merge.refs.iter().any(|r| r == message_id)
                        || self.lifecycle.resolve_target(&merge).await?.as_deref()
                            == Some(message_id);
                    if linked {
                        return Ok(Some(merge));
                    }
                }
                TrackerEvent::Submission(_) | TrackerEvent::Ignored => {}
            }
        }
        Ok(None)
    }
}
