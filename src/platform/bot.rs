use std::sync::Arc;

use async_trait::async_trait;
use teloxide::payloads::CopyMessageSetters;
use teloxide::prelude::*;
use teloxide::types::{Chat, Message, Recipient};
use tracing::{debug, info};

use crate::error::ForwarderError;
use crate::platform::{
    ChatKind, ChatRef, ChatSummary, Connector, Entity, IncomingMessage, Login, MessageHandler,
};
use crate::prompt::Prompt;

fn delivery(e: teloxide::RequestError) -> ForwarderError {
    ForwarderError::Delivery(e.to_string())
}

/// Kind and bare id of a Bot API chat, whose ids arrive already marked.
fn bare_id(chat: &Chat) -> (ChatKind, i64) {
    let id = chat.id.0;
    if chat.is_channel() || chat.is_supergroup() {
        (ChatKind::Channel, -1_000_000_000_000 - id)
    } else if chat.is_group() {
        (ChatKind::Group, -id)
    } else {
        (ChatKind::User, id)
    }
}

fn has_media(msg: &Message) -> bool {
    msg.photo().is_some()
        || msg.video().is_some()
        || msg.document().is_some()
        || msg.audio().is_some()
        || msg.animation().is_some()
        || msg.voice().is_some()
        || msg.video_note().is_some()
        || msg.sticker().is_some()
}

/// Telegram bot account over the Bot API. The bot has to be a member of
/// the source chat (an admin for channels) to see its messages.
pub struct BotConnector {
    bot: Bot,
}

impl BotConnector {
    pub fn new(token: &str) -> Self {
        Self {
            bot: Bot::new(token),
        }
    }
}

#[async_trait]
impl Connector for BotConnector {
    type Peer = Recipient;
    type Raw = Message;

    fn name(&self) -> &'static str {
        "bot"
    }

    async fn authenticate(
        &self,
        _login: &Login,
        _prompt: &mut (dyn Prompt + Send),
    ) -> Result<String, ForwarderError> {
        let me = self
            .bot
            .get_me()
            .await
            .map_err(|e| ForwarderError::Auth(e.to_string()))?;
        Ok(me.user.first_name.clone())
    }

    async fn list_chats(&self) -> Result<Vec<ChatSummary>, ForwarderError> {
        Err(ForwarderError::Unsupported {
            operation: "listing chats",
            connector: self.name(),
        })
    }

    async fn resolve_entity(&self, chat: &ChatRef) -> Result<Entity<Recipient>, ForwarderError> {
        let (peer, id) = match chat {
            ChatRef::Id(id) => (Recipient::Id(ChatId(*id)), Some(*id)),
            ChatRef::Username(name) => (Recipient::ChannelUsername(format!("@{}", name)), None),
        };
        Ok(Entity {
            peer,
            chat: chat.clone(),
            id,
            name: chat.to_string(),
        })
    }

    async fn subscribe(
        &self,
        source: &Entity<Recipient>,
        handler: Arc<dyn MessageHandler<Message>>,
    ) -> Result<(), ForwarderError> {
        info!("Starting Telegram bot dispatcher...");

        let source = source.chat.clone();
        let tree = dptree::entry()
            .branch(Update::filter_message().endpoint(deliver))
            .branch(Update::filter_channel_post().endpoint(deliver));

        // The dispatcher serializes updates per chat, so messages from the
        // single source chat reach the handler one at a time.
        Dispatcher::builder(self.bot.clone(), tree)
            .dependencies(dptree::deps![source, handler])
            .default_handler(|upd| async move {
                debug!("Unhandled update: {:?}", upd.id);
            })
            .error_handler(LoggingErrorHandler::with_custom_text("forwarder"))
            .enable_ctrlc_handler()
            .build()
            .dispatch()
            .await;

        info!("Dispatcher stopped");
        Ok(())
    }

    async fn send_text(&self, destination: &Recipient, text: &str) -> Result<(), ForwarderError> {
        self.bot
            .send_message(destination.clone(), text)
            .await
            .map_err(delivery)?;
        Ok(())
    }

    async fn send_media_with_caption(
        &self,
        destination: &Recipient,
        message: &IncomingMessage<Message>,
        caption: &str,
    ) -> Result<(), ForwarderError> {
        let mut request =
            self.bot
                .copy_message(destination.clone(), message.raw.chat.id, message.raw.id);
        if !caption.is_empty() {
            request = request.caption(caption);
        }
        request.await.map_err(delivery)?;
        Ok(())
    }

    async fn native_forward(
        &self,
        destination: &Recipient,
        message: &IncomingMessage<Message>,
    ) -> Result<(), ForwarderError> {
        self.bot
            .forward_message(destination.clone(), message.raw.chat.id, message.raw.id)
            .await
            .map_err(delivery)?;
        Ok(())
    }
}

async fn deliver(
    msg: Message,
    source: ChatRef,
    handler: Arc<dyn MessageHandler<Message>>,
) -> ResponseResult<()> {
    let (kind, id) = bare_id(&msg.chat);
    if !source.matches(kind, id, msg.chat.username()) {
        return Ok(());
    }

    debug!(
        "Message {} from {}",
        msg.id.0,
        msg.chat.title().unwrap_or("private chat")
    );

    let incoming = IncomingMessage {
        text: msg.text().or(msg.caption()).map(str::to_owned),
        has_media: has_media(&msg),
        source_chat_id: msg.chat.id.0,
        raw: msg,
    };
    handler.handle(incoming).await;

    Ok(())
}
