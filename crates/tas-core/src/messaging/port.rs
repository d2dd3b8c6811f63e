use async_trait::async_trait;

use crate::{
    domain::{ConversationId, ConversationSnapshot, MessageRef},
    messaging::types::{DeleteOptions, PurgeOptions, PurgeOutcome, SendOptions},
    Result,
};

/// Narrow interface to the messaging backend.
///
/// Telegram (MTProto userbot) is the first implementation; the shape is
/// deliberately small so tests can run against an in-memory port and future
/// backends can slot in behind the same trait.
#[async_trait]
pub trait ConversationPort: Send + Sync {
    /// Id of the account this session belongs to.
    async fn self_id(&self) -> Result<ConversationId>;

    /// One-shot listing of all conversations, fresh per call.
    async fn list_conversations(&self) -> Result<Vec<ConversationSnapshot>>;

    async fn send_message(
        &self,
        conversation: ConversationId,
        text: &str,
        opts: SendOptions,
    ) -> Result<MessageRef>;

    async fn delete_message(&self, message: MessageRef, opts: DeleteOptions) -> Result<()>;

    /// Clear the whole history of a conversation.
    async fn purge_history(
        &self,
        conversation: ConversationId,
        opts: PurgeOptions,
    ) -> Result<PurgeOutcome>;
}
