//! Update pump: turns client updates into core message events.

use std::sync::Arc;

use grammers_client::Update;
use tokio::sync::mpsc;

use tas_core::{
    domain::{ConversationId, Direction, MessageEvent, MessageId},
    Result,
};

use crate::{kind_of, map_err, TelegramGateway};

/// Forward new-message updates onto the core's event channel until the
/// receiver is dropped (shutdown) or the connection dies.
pub async fn pump_updates(
    gateway: Arc<TelegramGateway>,
    events: mpsc::Sender<MessageEvent>,
) -> Result<()> {
    loop {
        let update = gateway.client().next_update().await.map_err(map_err)?;

        let Update::NewMessage(message) = update else {
            continue;
        };

        let chat = message.chat();
        gateway.remember(&chat).await;

        let event = MessageEvent {
            direction: if message.outgoing() {
                Direction::Outbound
            } else {
                Direction::Inbound
            },
            conversation: Some(ConversationId(chat.id())),
            kind: kind_of(&chat),
            message_id: MessageId(message.id()),
            text: message.text().to_string(),
        };

        if events.send(event).await.is_err() {
            return Ok(());
        }
    }
}
