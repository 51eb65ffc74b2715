//! Mail archive transport: query recent list traffic and fetch single messages.

pub mod lei;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::TransportError;
use crate::tracker::model::RawMessage;

pub use lei::{LeiArchive, LeiConfig};

/// Read-only access to a public mailing-list archive.
#[async_trait]
pub trait MailArchive: Send + Sync {
    /// Messages matching `query` dated within the last `since`.
    async fn query_messages(
        &self,
        query: &str,
        since: Duration,
    ) -> Result<Vec<RawMessage>, TransportError>;

    /// Plain-text body of one message.
    async fn fetch_body(&self, message_id: &str) -> Result<String, TransportError>;

    /// Public web URL of a message.
    fn message_url(&self, message_id: &str) -> String;
}
