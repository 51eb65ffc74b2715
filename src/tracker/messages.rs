//! Message tracker: which notification was posted where for each message id.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::DatabaseError;
use crate::store::Database;
use crate::tracker::model::{ChannelId, NotificationId};

/// Owns the `message_id -> {channel -> notification}` table.
#[derive(Clone)]
pub struct MessageTracker {
    db: Arc<dyn Database>,
}

impl MessageTracker {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// Upsert the notification posted for `(message_id, channel)`.
    pub async fn record(
        &self,
        message_id: &str,
        channel: ChannelId,
        notification: NotificationId,
    ) -> Result<(), DatabaseError> {
        self.db.upsert_mapping(message_id, channel, notification).await
    }

    pub async fn lookup(
        &self,
        message_id: &str,
    ) -> Result<BTreeMap<ChannelId, NotificationId>, DatabaseError> {
        self.db.get_mappings(message_id).await
    }

    /// Message id behind a posted notification.
    pub async fn reverse_lookup(
        &self,
        channel: ChannelId,
        notification: NotificationId,
    ) -> Result<Option<String>, DatabaseError> {
        self.db.find_message_by_notification(channel, notification).await
    }
}
