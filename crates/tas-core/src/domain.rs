use std::fmt;

/// Stable identifier of a one-to-one conversation (the peer's id).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversationId(pub i64);

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Message id (numeric, per conversation).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageId(pub i32);

/// A stable reference to a delivered message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub conversation: ConversationId,
    pub message: MessageId,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConversationKind {
    Private,
    Group,
    Channel,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// One delivered message event, inbound or outbound.
///
/// `conversation` is `None` when the backend could not resolve a peer id for
/// the update; such events are out of scope and get ignored.
#[derive(Clone, Debug)]
pub struct MessageEvent {
    pub direction: Direction,
    pub conversation: Option<ConversationId>,
    pub kind: ConversationKind,
    pub message_id: MessageId,
    pub text: String,
}

/// Per-sweep observation of a conversation. Produced fresh each sweep and
/// never retained.
#[derive(Clone, Debug)]
pub struct ConversationSnapshot {
    pub id: ConversationId,
    pub display_name: String,
    pub title: String,
    pub kind: ConversationKind,
    pub archived: bool,
}

impl ConversationSnapshot {
    /// Deleted accounts keep their dialog entry but lose both name fields.
    pub fn is_deleted_account(&self) -> bool {
        self.display_name.trim().is_empty() && self.title.trim().is_empty()
    }
}
