use std::sync::Arc;

use parley_types::{ConversationHandle, Message, MessageId};
use tracing::trace;

use crate::backend::Backend;
use crate::error::Result;
use crate::log::LocalLog;

/// Pulls messages newer than the cursor for a resolved conversation.
///
/// Ordering from the ledger is trusted; deduplication is not, since a retried
/// or overlapping query may repeat ids the log already holds.
pub struct MessageSynchronizer<B> {
    backend: Arc<B>,
}

impl<B> Clone for MessageSynchronizer<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
        }
    }
}

impl<B: Backend> MessageSynchronizer<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    /// Messages strictly newer than `cursor`, as the ledger returned them.
    pub async fn sync(
        &self,
        handle: ConversationHandle,
        cursor: Option<MessageId>,
    ) -> Result<Vec<Message>> {
        let batch = self.backend.fetch_messages_since(handle, cursor).await?;
        trace!(%handle, cursor = ?cursor, fetched = batch.len(), "sync fetched");
        Ok(batch)
    }

    /// Fetch from the log's cursor and merge. Returns the number of messages
    /// appended. On error the log is untouched.
    pub async fn sync_into(&self, handle: ConversationHandle, log: &mut LocalLog) -> Result<usize> {
        let batch = self.sync(handle, log.cursor()).await?;
        Ok(log.merge(batch))
    }
}
