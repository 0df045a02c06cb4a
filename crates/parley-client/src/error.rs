use parley_types::ConversationHandle;

/// Errors surfaced by the ledger transport and the chat core.
///
/// Only `send` lets these reach the user. Discovery probes and background
/// polls recover from them locally.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// The conversation does not exist or the caller is not a participant.
    /// Expected while probing; used as a control signal there.
    #[error("conversation {0} not found or not accessible")]
    NotFoundOrUnauthorized(ConversationHandle),

    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    #[error("invalid input: {0}")]
    InvalidInput(&'static str),

    /// The ledger answered with something we could not decode.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("a send is already in progress for this conversation")]
    SendInProgress,

    #[error("chat session is closed")]
    SessionClosed,
}

impl ClientError {
    /// Whether retrying the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

pub type Result<T, E = ClientError> = std::result::Result<T, E>;
