use std::collections::HashSet;

use parley_types::{Message, MessageId};

/// Locally observed messages of one conversation, deduplicated by id.
///
/// Entries keep the order the ledger delivered them in. The cursor is the
/// highest id incorporated so far and bounds the next poll.
#[derive(Debug, Clone, Default)]
pub struct LocalLog {
    entries: Vec<Message>,
    seen: HashSet<MessageId>,
    cursor: Option<MessageId>,
}

impl LocalLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[Message] {
        &self.entries
    }

    pub fn cursor(&self) -> Option<MessageId> {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.seen.contains(&id)
    }

    /// Replace the log with a full conversation fetch.
    pub fn seed(&mut self, messages: Vec<Message>) {
        self.clear();
        self.merge(messages);
    }

    /// Append messages whose id is not present yet. Returns how many were
    /// appended.
    pub fn merge(&mut self, batch: Vec<Message>) -> usize {
        let Some(last) = batch.last().map(|m| m.id) else {
            return 0;
        };

        let before = self.entries.len();
        for message in batch {
            if self.seen.insert(message.id) {
                self.entries.push(message);
            }
        }

        // The ledger returns ascending ids, so `last` is the batch maximum.
        // Never move backwards if a stale batch slips through.
        self.cursor = Some(self.cursor.map_or(last, |c| c.max(last)));

        self.entries.len() - before
    }

    /// Forget everything, including the cursor. Used when the handle changes.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.seen.clear();
        self.cursor = None;
    }
}
