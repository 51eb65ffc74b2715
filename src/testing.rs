//! Recording stubs for the archive, chat, and store collaborators.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::archive::MailArchive;
use crate::error::{ChannelError, DatabaseError, TransportError};
use crate::notify::{Notification, Notifier};
use crate::store::Database;
use crate::tracker::model::{ChannelId, MergeEvent, NotificationId, PullRequest, RawMessage};

pub const BOT: &str = "pr-tracker-bot@kernel.org";
pub const HASH: &str = "abc123def4567890abc123def4567890abc123de";

pub fn at(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap() + chrono::Duration::minutes(minutes)
}

pub fn submission_msg(id: &str, subject: &str, minutes: i64) -> RawMessage {
    RawMessage {
        id: id.into(),
        subject: subject.into(),
        sender: "Dan Maintainer <dan@kernel.org>".into(),
        date: at(minutes),
        refs: Vec::new(),
    }
}

pub fn bot_msg(id: &str, refs: &[&str], minutes: i64) -> RawMessage {
    RawMessage {
        id: id.into(),
        subject: "Re: [GIT PULL] foo".into(),
        sender: BOT.into(),
        date: at(minutes),
        refs: refs.iter().map(|s| s.to_string()).collect(),
    }
}

pub fn bot_body() -> String {
    format!("has been merged into torvalds/linux.git:\nhttps://git.kernel.org/torvalds/c/{HASH}\n")
}

#[derive(Default)]
pub struct StubArchive {
    pub messages: Mutex<Vec<RawMessage>>,
    pub bodies: Mutex<HashMap<String, String>>,
    pub queries: Mutex<Vec<String>>,
    pub fetched: Mutex<Vec<String>>,
    pub fail_queries: AtomicBool,
}

impl StubArchive {
    pub fn push(&self, msg: RawMessage) {
        self.messages.lock().unwrap().push(msg);
    }

    pub fn push_bot_reply(&self, msg: RawMessage) {
        self.bodies
            .lock()
            .unwrap()
            .insert(msg.id.clone(), bot_body());
        self.push(msg);
    }

    pub fn clear(&self) {
        self.messages.lock().unwrap().clear();
    }
}

#[async_trait]
impl MailArchive for StubArchive {
    async fn query_messages(
        &self,
        query: &str,
        _since: Duration,
    ) -> Result<Vec<RawMessage>, TransportError> {
        self.queries.lock().unwrap().push(query.to_string());
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(TransportError::QueryFailed {
                query: query.to_string(),
                reason: "archive unreachable".into(),
            });
        }
        Ok(self.messages.lock().unwrap().clone())
    }

    async fn fetch_body(&self, message_id: &str) -> Result<String, TransportError> {
        self.fetched.lock().unwrap().push(message_id.to_string());
        self.bodies
            .lock()
            .unwrap()
            .get(message_id)
            .cloned()
            .ok_or_else(|| TransportError::FetchFailed {
                message_id: message_id.to_string(),
                reason: "HTTP 404".into(),
            })
    }

    fn message_url(&self, message_id: &str) -> String {
        format!("https://lore.kernel.org/all/{message_id}/")
    }
}

#[derive(Default)]
pub struct StubNotifier {
    next_id: AtomicU64,
    pub posts: Mutex<Vec<(ChannelId, NotificationId, Notification)>>,
    pub edits: Mutex<Vec<(ChannelId, NotificationId, Notification)>>,
    pub reactions: Mutex<Vec<(ChannelId, NotificationId, String)>>,
    pub failing: Mutex<BTreeSet<ChannelId>>,
}

impl StubNotifier {
    pub fn fail_channel(&self, channel: ChannelId) {
        self.failing.lock().unwrap().insert(channel);
    }

    pub fn heal_channel(&self, channel: ChannelId) {
        self.failing.lock().unwrap().remove(&channel);
    }

    fn check(&self, channel: ChannelId) -> Result<(), ChannelError> {
        if self.failing.lock().unwrap().contains(&channel) {
            return Err(ChannelError::SendFailed {
                channel: channel.to_string(),
                reason: "stub failure".into(),
            });
        }
        Ok(())
    }

    pub fn post_count(&self) -> usize {
        self.posts.lock().unwrap().len()
    }

    pub fn edit_count(&self) -> usize {
        self.edits.lock().unwrap().len()
    }

    pub fn last_reaction(&self) -> Option<String> {
        self.reactions.lock().unwrap().last().map(|r| r.2.clone())
    }
}

#[async_trait]
impl Notifier for StubNotifier {
    async fn post(
        &self,
        channel: ChannelId,
        notification: &Notification,
    ) -> Result<NotificationId, ChannelError> {
        self.check(channel)?;
        let id = NotificationId(9_000_000_000_000_000_000 + self.next_id.fetch_add(1, Ordering::SeqCst));
        self.posts
            .lock()
            .unwrap()
            .push((channel, id, notification.clone()));
        Ok(id)
    }

    async fn edit(
        &self,
        channel: ChannelId,
        notification_id: NotificationId,
        notification: &Notification,
    ) -> Result<(), ChannelError> {
        self.check(channel)?;
        self.edits
            .lock()
            .unwrap()
            .push((channel, notification_id, notification.clone()));
        Ok(())
    }

    async fn react(
        &self,
        channel: ChannelId,
        notification_id: NotificationId,
        emoji: &str,
    ) -> Result<(), ChannelError> {
        self.reactions
            .lock()
            .unwrap()
            .push((channel, notification_id, emoji.to_string()));
        Ok(())
    }
}

/// Delegates to a real backend but can be told to fail merge writes.
pub struct FlakyDatabase {
    pub inner: Arc<dyn Database>,
    pub fail_merges: AtomicBool,
}

impl FlakyDatabase {
    pub fn new(inner: Arc<dyn Database>) -> Self {
        Self {
            inner,
            fail_merges: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Database for FlakyDatabase {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        self.inner.run_migrations().await
    }

    async fn insert_pull_request(&self, pr: &PullRequest) -> Result<bool, DatabaseError> {
        self.inner.insert_pull_request(pr).await
    }

    async fn get_pull_request(
        &self,
        message_id: &str,
    ) -> Result<Option<PullRequest>, DatabaseError> {
        self.inner.get_pull_request(message_id).await
    }

    async fn find_pull_request_by_thread_ref(
        &self,
        ref_id: &str,
    ) -> Result<Option<PullRequest>, DatabaseError> {
        self.inner.find_pull_request_by_thread_ref(ref_id).await
    }

    async fn mark_merged(
        &self,
        message_id: &str,
        merge: &MergeEvent,
    ) -> Result<bool, DatabaseError> {
        if self.fail_merges.load(Ordering::SeqCst) {
            return Err(DatabaseError::Query("disk I/O error".into()));
        }
        self.inner.mark_merged(message_id, merge).await
    }

    async fn list_pending_pull_requests(&self) -> Result<Vec<PullRequest>, DatabaseError> {
        self.inner.list_pending_pull_requests().await
    }

    async fn count_pull_requests(&self) -> Result<usize, DatabaseError> {
        self.inner.count_pull_requests().await
    }

    async fn evict_oldest_pull_requests(&self, keep: usize) -> Result<usize, DatabaseError> {
        self.inner.evict_oldest_pull_requests(keep).await
    }

    async fn insert_unlinked_merge(&self, merge: &MergeEvent) -> Result<(), DatabaseError> {
        self.inner.insert_unlinked_merge(merge).await
    }

    async fn find_unlinked_merge(
        &self,
        ids: &[String],
    ) -> Result<Option<MergeEvent>, DatabaseError> {
        self.inner.find_unlinked_merge(ids).await
    }

    async fn delete_unlinked_merge(&self, confirmation_id: &str) -> Result<bool, DatabaseError> {
        self.inner.delete_unlinked_merge(confirmation_id).await
    }

    async fn list_unlinked_merges(&self) -> Result<Vec<MergeEvent>, DatabaseError> {
        self.inner.list_unlinked_merges().await
    }

    async fn prune_unlinked_merges(&self, keep: usize) -> Result<usize, DatabaseError> {
        self.inner.prune_unlinked_merges(keep).await
    }

    async fn upsert_mapping(
        &self,
        message_id: &str,
        channel: ChannelId,
        notification: NotificationId,
    ) -> Result<(), DatabaseError> {
        self.inner
            .upsert_mapping(message_id, channel, notification)
            .await
    }

    async fn get_mappings(
        &self,
        message_id: &str,
    ) -> Result<BTreeMap<ChannelId, NotificationId>, DatabaseError> {
        self.inner.get_mappings(message_id).await
    }

    async fn find_message_by_notification(
        &self,
        channel: ChannelId,
        notification: NotificationId,
    ) -> Result<Option<String>, DatabaseError> {
        self.inner
            .find_message_by_notification(channel, notification)
            .await
    }
}
