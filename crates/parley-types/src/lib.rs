//! Shared data model for the parley messaging client.
//!
//! `models` holds the ledger-side records (messages, conversation snapshots,
//! identifiers). `api` holds the JSON shapes exchanged with the ledger over
//! HTTP.

pub mod api;
pub mod models;

pub use models::{ConversationHandle, ConversationView, Identity, InvalidIdentity, Message, MessageId};
