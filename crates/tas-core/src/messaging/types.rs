use crate::domain::MessageId;

/// Options for an outbound message.
#[derive(Clone, Copy, Debug, Default)]
pub struct SendOptions {
    /// Deliver without a client notification sound.
    pub silent: bool,
    /// Send as a reply to this message in the same conversation.
    pub reply_to: Option<MessageId>,
}

#[derive(Clone, Copy, Debug)]
pub struct DeleteOptions {
    /// Remove the message for the other side too, not just locally.
    pub revoke: bool,
}

#[derive(Clone, Copy, Debug)]
pub struct PurgeOptions {
    pub revoke: bool,
}

/// Result of a history purge.
#[derive(Clone, Copy, Debug)]
pub struct PurgeOutcome {
    pub affected: i32,
}
