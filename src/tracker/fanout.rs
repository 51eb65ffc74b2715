//! Concurrent post/edit across channels. A failure on one channel never
//! stops delivery to the others.

use std::collections::{BTreeMap, BTreeSet};

use futures::future::join_all;
use tracing::{debug, warn};

use crate::error::DatabaseError;
use crate::notify::{Notification, Notifier};
use crate::tracker::messages::MessageTracker;
use crate::tracker::model::{ChannelId, NotificationId};

/// Edit every mapped notification in place. Returns how many edits succeeded.
pub async fn edit_all(
    notifier: &dyn Notifier,
    message_id: &str,
    mappings: &BTreeMap<ChannelId, NotificationId>,
    notification: &Notification,
) -> usize {
    let results = join_all(mappings.iter().map(|(&channel, &notification_id)| async move {
        (
            channel,
            notifier.edit(channel, notification_id, notification).await,
        )
    }))
    .await;

    let mut edited = 0;
    for (channel, result) in results {
        match result {
            Ok(()) => edited += 1,
            Err(e) => warn!(message_id, %channel, "Edit failed: {e}"),
        }
    }
    debug!(message_id, edited, total = mappings.len(), "Edit fan-out complete");
    edited
}

/// Post to each channel and record the resulting mapping.
/// Returns how many posts succeeded; mapping writes propagate.
pub async fn post_all(
    notifier: &dyn Notifier,
    messages: &MessageTracker,
    message_id: &str,
    channels: &BTreeSet<ChannelId>,
    notification: &Notification,
) -> Result<usize, DatabaseError> {
    let results = join_all(channels.iter().map(|&channel| async move {
        (channel, notifier.post(channel, notification).await)
    }))
    .await;

    let mut posted = 0;
    for (channel, result) in results {
        match result {
            Ok(notification_id) => {
                messages.record(message_id, channel, notification_id).await?;
                posted += 1;
            }
            Err(e) => warn!(message_id, %channel, "Post failed: {e}"),
        }
    }
    Ok(posted)
}
