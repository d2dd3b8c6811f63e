//! Telegram adapter (grammers, MTProto userbot).
//!
//! This crate implements the `tas-core` ConversationPort over a personal
//! Telegram account session. A bot-API client cannot see the account's own
//! dialogs or archive state, so the gatekeeper runs as a userbot.

use std::collections::HashMap;

use async_trait::async_trait;
use grammers_client::{types::Chat, Client, Config as ClientConfig, InitParams, InputMessage};
use grammers_session::{PackedChat, Session};
use grammers_tl_types as tl;
use tokio::sync::Mutex;

pub mod login;
pub mod updates;

use tas_core::{
    config::Config,
    domain::{ConversationId, ConversationKind, ConversationSnapshot, MessageId, MessageRef},
    errors::Error,
    messaging::{
        port::ConversationPort,
        types::{DeleteOptions, PurgeOptions, PurgeOutcome, SendOptions},
    },
    Result,
};

pub struct TelegramGateway {
    client: Client,
    self_id: ConversationId,
    /// Peers seen in dialogs/updates, kept so the sweeper can address a
    /// conversation outside of an update context.
    chats: Mutex<HashMap<i64, PackedChat>>,
}

impl TelegramGateway {
    /// Connect with the saved session. Fails with a config error when the
    /// session is missing or not authorized; run the login flow first.
    pub async fn connect(cfg: &Config) -> Result<Self> {
        let client = connect_client(cfg).await?;

        if !client.is_authorized().await.map_err(map_err)? {
            return Err(Error::Config(format!(
                "no authorized session at {}; run `tas login` first",
                cfg.session_file.display()
            )));
        }

        // Persist any keys negotiated during connect.
        if let Err(e) = client.session().save_to_file(&cfg.session_file) {
            eprintln!("failed to save session file: {e}");
        }

        let me = client.get_me().await.map_err(map_err)?;
        println!("connected as {} ({})", me.full_name(), me.id());

        Ok(Self {
            client,
            self_id: ConversationId(me.id()),
            chats: Mutex::new(HashMap::new()),
        })
    }

    pub(crate) fn client(&self) -> &Client {
        &self.client
    }

    pub(crate) async fn remember(&self, chat: &Chat) {
        self.chats.lock().await.insert(chat.id(), chat.pack());
    }

    async fn packed(&self, conversation: ConversationId) -> Result<PackedChat> {
        self.chats
            .lock()
            .await
            .get(&conversation.0)
            .cloned()
            .ok_or_else(|| Error::External(format!("unknown conversation {conversation}")))
    }
}

#[async_trait]
impl ConversationPort for TelegramGateway {
    async fn self_id(&self) -> Result<ConversationId> {
        Ok(self.self_id)
    }

    async fn list_conversations(&self) -> Result<Vec<ConversationSnapshot>> {
        let mut snapshots = Vec::new();

        let mut dialogs = self.client.iter_dialogs();
        while let Some(dialog) = dialogs.next().await.map_err(map_err)? {
            let chat = dialog.chat();
            self.remember(chat).await;

            // Folder 1 is the archive.
            let archived = matches!(
                &dialog.raw,
                tl::enums::Dialog::Dialog(d) if d.folder_id == Some(1)
            );

            let kind = kind_of(chat);
            let name = chat.name().to_string();
            let (display_name, title) = match kind {
                ConversationKind::Private => (name, String::new()),
                _ => (String::new(), name),
            };

            snapshots.push(ConversationSnapshot {
                id: ConversationId(chat.id()),
                display_name,
                title,
                kind,
                archived,
            });
        }

        Ok(snapshots)
    }

    async fn send_message(
        &self,
        conversation: ConversationId,
        text: &str,
        opts: SendOptions,
    ) -> Result<MessageRef> {
        let packed = self.packed(conversation).await?;

        let mut message = InputMessage::from(text);
        if opts.silent {
            message = message.silent(true);
        }
        if let Some(reply_to) = opts.reply_to {
            message = message.reply_to(Some(reply_to.0));
        }

        let sent = self
            .client
            .send_message(packed, message)
            .await
            .map_err(map_err)?;

        Ok(MessageRef {
            conversation,
            message: MessageId(sent.id()),
        })
    }

    async fn delete_message(&self, message: MessageRef, _opts: DeleteOptions) -> Result<()> {
        // messages.deleteMessages revokes for both sides in private chats.
        let packed = self.packed(message.conversation).await?;
        self.client
            .delete_messages(packed, &[message.message.0])
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn purge_history(
        &self,
        conversation: ConversationId,
        opts: PurgeOptions,
    ) -> Result<PurgeOutcome> {
        let packed = self.packed(conversation).await?;

        let result = self
            .client
            .invoke(&tl::functions::messages::DeleteHistory {
                just_clear: true,
                revoke: opts.revoke,
                peer: packed.to_input_peer(),
                max_id: 0,
                min_date: None,
                max_date: None,
            })
            .await
            .map_err(map_err)?;

        let affected = match result {
            tl::enums::messages::AffectedHistory::History(h) => h.pts_count,
        };

        Ok(PurgeOutcome { affected })
    }
}

pub(crate) async fn connect_client(cfg: &Config) -> Result<Client> {
    let session = Session::load_file_or_create(&cfg.session_file)?;

    Client::connect(ClientConfig {
        session,
        api_id: cfg.api_id,
        api_hash: cfg.api_hash.clone(),
        params: InitParams {
            device_model: cfg.app_title.clone(),
            catch_up: true,
            ..Default::default()
        },
    })
    .await
    .map_err(map_err)
}

pub(crate) fn kind_of(chat: &Chat) -> ConversationKind {
    match chat {
        Chat::User(_) => ConversationKind::Private,
        Chat::Group(_) => ConversationKind::Group,
        Chat::Channel(_) => ConversationKind::Channel,
    }
}

pub(crate) fn map_err(e: impl std::fmt::Display) -> Error {
    Error::External(format!("telegram error: {e}"))
}
