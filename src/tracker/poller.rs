//! Poll driver: periodic ingestion of list traffic per subsystem.
//!
//! Each tick, for every configured subsystem:
//! 1. Query the archive for the recent window
//! 2. Sort chronologically (ties by message id)
//! 3. Classify and apply each event to the lifecycle store
//! 4. Post or edit notifications on the routed channels
//!
//! A failed query aborts that subsystem's cycle only. Progress already
//! written stands and the next tick picks up from the store.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::archive::MailArchive;
use crate::config::SubsystemConfig;
use crate::error::TrackerError;
use crate::notify::Notifier;
use crate::tracker::classifier::Classifier;
use crate::tracker::fanout;
use crate::tracker::lifecycle::LifecycleStore;
use crate::tracker::messages::MessageTracker;
use crate::tracker::model::{ChannelId, MergeEvent, SubmissionEvent, TrackerEvent};
use crate::tracker::render::Renderer;
use crate::tracker::router::SubscriptionRouter;

/// Counters for one cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollSummary {
    pub submissions: usize,
    pub merges: usize,
    pub unlinked: usize,
    pub skipped: usize,
    pub posted: usize,
    pub edited: usize,
    pub failed_subsystems: usize,
}

impl PollSummary {
    fn absorb(&mut self, other: PollSummary) {
        self.submissions += other.submissions;
        self.merges += other.merges;
        self.unlinked += other.unlinked;
        self.skipped += other.skipped;
        self.posted += other.posted;
        self.edited += other.edited;
        self.failed_subsystems += other.failed_subsystems;
    }
}

pub struct PollDriver {
    archive: Arc<dyn MailArchive>,
    classifier: Arc<Classifier>,
    lifecycle: Arc<LifecycleStore>,
    messages: MessageTracker,
    router: Arc<SubscriptionRouter>,
    notifier: Arc<dyn Notifier>,
    renderer: Renderer,
    subsystems: Vec<SubsystemConfig>,
    lookback: Duration,
}

impl PollDriver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        archive: Arc<dyn MailArchive>,
        classifier: Arc<Classifier>,
        lifecycle: Arc<LifecycleStore>,
        messages: MessageTracker,
        router: Arc<SubscriptionRouter>,
        notifier: Arc<dyn Notifier>,
        subsystems: Vec<SubsystemConfig>,
        lookback: Duration,
    ) -> Self {
        let renderer = Renderer::new(Arc::clone(&archive));
        Self {
            archive,
            classifier,
            lifecycle,
            messages,
            router,
            notifier,
            renderer,
            subsystems,
            lookback,
        }
    }

    /// One pass over every subsystem.
    pub async fn poll_once(&self) -> PollSummary {
        let mut total = PollSummary::default();
        for scope in &self.subsystems {
            match self.poll_subsystem(scope).await {
                Ok(summary) => {
                    debug!(subsystem = %scope.name, ?summary, "Subsystem poll complete");
                    total.absorb(summary);
                }
                Err(e) => {
                    error!(subsystem = %scope.name, "Poll cycle aborted: {e}");
                    total.failed_subsystems += 1;
                }
            }
        }
        total
    }

    pub async fn poll_subsystem(&self, scope: &SubsystemConfig) -> Result<PollSummary, TrackerError> {
        let mut batch = self.archive.query_messages(&scope.query, self.lookback).await?;
        batch.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));

        let mut summary = PollSummary::default();
        for msg in &batch {
            let event = match self.classifier.classify(msg, &scope.name).await {
                Ok(event) => event,
                Err(e) => {
                    warn!(message_id = %msg.id, "Skipping message: {e}");
                    summary.skipped += 1;
                    continue;
                }
            };

            match event {
                TrackerEvent::Submission(submission) => {
                    summary.submissions += 1;
                    summary.posted += self.handle_submission(submission).await?;
                }
                TrackerEvent::MergeConfirmation(merge) => {
                    summary.merges += 1;
                    match self.handle_merge(&merge).await {
                        Ok((posted, edited)) => {
                            summary.posted += posted;
                            summary.edited += edited;
                        }
                        Err(TrackerError::Linkage { .. }) => {
                            self.lifecycle.retain_unlinked(&merge).await?;
                            summary.unlinked += 1;
                        }
                        Err(e) => return Err(e),
                    }
                }
                TrackerEvent::Ignored => {}
            }
        }
        Ok(summary)
    }

    /// Record the submission and post to routed channels that have no
    /// notification for it yet.
    async fn handle_submission(&self, submission: SubmissionEvent) -> Result<usize, TrackerError> {
        let pr = self.lifecycle.record_submission(submission).await?;
        let unmapped = self.unmapped_channels(&pr.message_id, &pr.subsystem).await?;
        if unmapped.is_empty() {
            return Ok(0);
        }

        let rendered = self.renderer.current(&pr);
        let posted = fanout::post_all(
            self.notifier.as_ref(),
            &self.messages,
            &pr.message_id,
            &unmapped,
            &rendered,
        )
        .await?;
        info!(message_id = %pr.message_id, posted, "Submission notifications posted");
        Ok(posted)
    }

    /// Apply a merge; on first application edit every mapped notification
    /// and post to routed channels that never got one.
    async fn handle_merge(&self, merge: &MergeEvent) -> Result<(usize, usize), TrackerError> {
        let application = self.lifecycle.record_merge(merge).await?;
        if !application.applied {
            return Ok((0, 0));
        }

        let pr = &application.pull_request;
        let rendered = self.renderer.merged(pr);
        let mappings = self.messages.lookup(&pr.message_id).await?;
        let edited =
            fanout::edit_all(self.notifier.as_ref(), &pr.message_id, &mappings, &rendered).await;

        let unmapped: BTreeSet<ChannelId> = self
            .router
            .resolve(&pr.subsystem)
            .into_iter()
            .filter(|c| !mappings.contains_key(c))
            .collect();
        let posted = fanout::post_all(
            self.notifier.as_ref(),
            &self.messages,
            &pr.message_id,
            &unmapped,
            &rendered,
        )
        .await?;

        Ok((posted, edited))
    }

    async fn unmapped_channels(
        &self,
        message_id: &str,
        subsystem: &str,
    ) -> Result<BTreeSet<ChannelId>, TrackerError> {
        let mapped = self.messages.lookup(message_id).await?;
        Ok(self
            .router
            .resolve(subsystem)
            .into_iter()
            .filter(|c| !mapped.contains_key(c))
            .collect())
    }
}

/// Spawn the poll loop.
///
/// Returns a `JoinHandle` and a shutdown flag. Set the flag to stop polling.
pub fn spawn_poll_driver(
    driver: Arc<PollDriver>,
    interval: Duration,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!(
            subsystems = driver.subsystems.len(),
            "Poll driver started, polling every {}s",
            interval.as_secs()
        );

        let mut tick = tokio::time::interval(interval);

        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Poll driver shutting down");
                return;
            }

            let summary = driver.poll_once().await;
            if summary != PollSummary::default() {
                info!(
                    submissions = summary.submissions,
                    merges = summary.merges,
                    unlinked = summary.unlinked,
                    posted = summary.posted,
                    edited = summary.edited,
                    skipped = summary.skipped,
                    failed = summary.failed_subsystems,
                    "Poll cycle complete"
                );
            }
        }
    });

    (handle, shutdown_flag)
}
