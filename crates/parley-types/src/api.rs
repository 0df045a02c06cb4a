use serde::{Deserialize, Serialize};

use crate::models::{Identity, MessageId};

// -- Messages --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub recipient: Identity,
    pub content: String,
}

/// Query string for `GET /conversations/{handle}/messages`.
/// A missing `after` means "from the beginning".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessagesQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<MessageId>,
}
