//! Parley client core: direct messages over a ledger that only offers
//! conversation-indexed queries and a send command.
//!
//! - `resolver`: finds the conversation handle for a recipient by bounded probing
//! - `sync` / `log`: pulls newer messages and merges them without duplicates
//! - `send`: submits messages and reconciles a conversation the send created
//! - `session` / `sessions`: per-recipient state machines with a cancellable
//!   poll task, and a registry of them
//!
//! Transports: `HttpBackend` for the ledger's REST gateway, `MemoryBackend`
//! for tests and embedding.

pub mod backend;
pub mod config;
pub mod error;
pub mod http;
pub mod log;
pub mod memory;
pub mod resolver;
pub mod send;
pub mod session;
pub mod sessions;
pub mod sync;

pub use backend::Backend;
pub use config::ClientConfig;
pub use error::ClientError;
pub use http::{HttpBackend, HttpBackendConfig};
pub use log::LocalLog;
pub use memory::{CallCounts, MemoryBackend, MemoryLedger};
pub use resolver::{ConversationResolver, Discovered};
pub use send::{MessageContent, SendCoordinator, SendOutcome};
pub use session::{ChatSession, ChatSnapshot, ConversationState};
pub use sessions::ChatSessions;
pub use sync::MessageSynchronizer;
