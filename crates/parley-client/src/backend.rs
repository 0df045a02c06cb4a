use std::future::Future;
use std::sync::Arc;

use parley_types::{ConversationHandle, ConversationView, Identity, Message, MessageId};

use crate::error::Result;

/// The coarse query/command surface the ledger exposes.
///
/// There is no "find conversation by participant" query and no push channel;
/// everything above this trait is built from these three calls.
pub trait Backend: Send + Sync + 'static {
    /// Fails with `NotFoundOrUnauthorized` if the handle does not exist or the
    /// caller is not a participant.
    fn fetch_conversation(
        &self,
        handle: ConversationHandle,
    ) -> impl Future<Output = Result<ConversationView>> + Send;

    /// Messages with an id strictly greater than `after` (all of them when
    /// `after` is `None`), in increasing id order.
    fn fetch_messages_since(
        &self,
        handle: ConversationHandle,
        after: Option<MessageId>,
    ) -> impl Future<Output = Result<Vec<Message>>> + Send;

    /// May create the conversation between caller and `recipient` as a side
    /// effect.
    fn send_message(
        &self,
        recipient: &Identity,
        content: &str,
    ) -> impl Future<Output = Result<()>> + Send;
}

impl<B: Backend> Backend for Arc<B> {
    fn fetch_conversation(
        &self,
        handle: ConversationHandle,
    ) -> impl Future<Output = Result<ConversationView>> + Send {
        (**self).fetch_conversation(handle)
    }

    fn fetch_messages_since(
        &self,
        handle: ConversationHandle,
        after: Option<MessageId>,
    ) -> impl Future<Output = Result<Vec<Message>>> + Send {
        (**self).fetch_messages_since(handle, after)
    }

    fn send_message(
        &self,
        recipient: &Identity,
        content: &str,
    ) -> impl Future<Output = Result<()>> + Send {
        (**self).send_message(recipient, content)
    }
}
