use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use grammers_client::types::{Chat, Message, PackedChat};
use grammers_client::{Client, Config, InitParams, InputMessage, SignInError, Update};
use grammers_session::Session;
use tracing::{debug, info, warn};

use crate::config::Credentials;
use crate::error::ForwarderError;
use crate::platform::{
    ChatKind, ChatRef, ChatSummary, Connector, Entity, IncomingMessage, Login, MessageHandler,
};
use crate::prompt::Prompt;

const MAX_CODE_ATTEMPTS: u32 = 3;

fn connection(e: impl std::fmt::Display) -> ForwarderError {
    ForwarderError::Connection(e.to_string())
}

fn delivery(e: impl std::fmt::Display) -> ForwarderError {
    ForwarderError::Delivery(e.to_string())
}

/// Supergroups are channels on the wire and carry the `-100` marked id.
fn kind_of(chat: &Chat) -> ChatKind {
    match chat {
        Chat::User(_) => ChatKind::User,
        Chat::Group(group) if group.is_megagroup() => ChatKind::Channel,
        Chat::Group(_) => ChatKind::Group,
        Chat::Channel(_) => ChatKind::Channel,
    }
}

fn marked_id(chat: &Chat) -> i64 {
    kind_of(chat).marked_id(chat.id())
}

fn summarize(chat: &Chat) -> ChatSummary {
    ChatSummary {
        kind: kind_of(chat),
        name: chat.name().to_string(),
        id: marked_id(chat),
        username: chat.username().map(str::to_owned),
    }
}

fn entity(chat: &Chat, reference: &ChatRef) -> Entity<PackedChat> {
    Entity {
        peer: chat.pack(),
        chat: reference.clone(),
        id: Some(chat.id()),
        name: chat.name().to_string(),
    }
}

/// Telegram user account over MTProto.
pub struct UserConnector {
    client: Client,
    session_path: PathBuf,
}

impl UserConnector {
    /// Open the session file (created if absent) and connect.
    pub async fn connect(
        credentials: &Credentials,
        session_path: &Path,
    ) -> Result<Self, ForwarderError> {
        let session = Session::load_file_or_create(session_path)?;

        info!("Connecting to Telegram as {}...", credentials.phone);
        let client = Client::connect(Config {
            session,
            api_id: credentials.api_id,
            api_hash: credentials.api_hash.clone(),
            params: InitParams {
                catch_up: false,
                ..Default::default()
            },
        })
        .await
        .map_err(connection)?;

        Ok(Self {
            client,
            session_path: session_path.to_path_buf(),
        })
    }

    fn save_session(&self) -> Result<(), ForwarderError> {
        self.client.session().save_to_file(&self.session_path)?;
        debug!("Session saved to {}", self.session_path.display());
        Ok(())
    }

    async fn find_in_dialogs(&self, reference: &ChatRef) -> Result<Option<Chat>, ForwarderError> {
        let mut dialogs = self.client.iter_dialogs();
        while let Some(dialog) = dialogs.next().await.map_err(connection)? {
            let chat = dialog.chat();
            if reference.matches(kind_of(chat), chat.id(), chat.username()) {
                return Ok(Some(chat.clone()));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl Connector for UserConnector {
    type Peer = PackedChat;
    type Raw = Message;

    fn name(&self) -> &'static str {
        "user"
    }

    async fn authenticate(
        &self,
        login: &Login,
        prompt: &mut (dyn Prompt + Send),
    ) -> Result<String, ForwarderError> {
        if !self.client.is_authorized().await.map_err(connection)? {
            info!("Not authorized, sending code request to {}", login.phone);
            let token = self
                .client
                .request_login_code(&login.phone)
                .await
                .map_err(|e| ForwarderError::Auth(e.to_string()))?;

            let mut attempts = 0;
            let signed_in = loop {
                attempts += 1;
                let code = match &login.code {
                    Some(code) => {
                        info!("Using verification code from environment");
                        code.clone()
                    }
                    None => prompt.ask("Enter the verification code sent to your Telegram: ")?,
                };
                match self.client.sign_in(&token, code.trim()).await {
                    Err(SignInError::InvalidCode)
                        if login.code.is_none() && attempts < MAX_CODE_ATTEMPTS =>
                    {
                        warn!("Invalid verification code, try again");
                    }
                    other => break other,
                }
            };

            match signed_in {
                Ok(_) => {}
                Err(SignInError::PasswordRequired(password_token)) => {
                    let password = match &login.password {
                        Some(password) => password.clone(),
                        None => {
                            let hint = password_token.hint().unwrap_or("none").to_string();
                            prompt.ask(&format!(
                                "Two-factor authentication enabled (hint: {}). Enter your password: ",
                                hint
                            ))?
                        }
                    };
                    self.client
                        .check_password(password_token, password.trim())
                        .await
                        .map_err(|e| ForwarderError::Auth(e.to_string()))?;
                }
                Err(e) => return Err(ForwarderError::Auth(e.to_string())),
            }

            self.save_session()?;
            info!("Successfully logged in");
        }

        let me = self.client.get_me().await.map_err(connection)?;
        Ok(me.first_name().to_string())
    }

    async fn list_chats(&self) -> Result<Vec<ChatSummary>, ForwarderError> {
        let mut chats = Vec::new();
        let mut dialogs = self.client.iter_dialogs();
        while let Some(dialog) = dialogs.next().await.map_err(connection)? {
            chats.push(summarize(dialog.chat()));
        }
        Ok(chats)
    }

    async fn resolve_entity(&self, chat: &ChatRef) -> Result<Entity<PackedChat>, ForwarderError> {
        let found = match chat {
            ChatRef::Username(name) => match self.client.resolve_username(name).await {
                Ok(Some(found)) => Some(found),
                Ok(None) => self.find_in_dialogs(chat).await?,
                Err(e) => {
                    warn!("Username lookup for @{} failed: {}", name, e);
                    self.find_in_dialogs(chat).await?
                }
            },
            ChatRef::Id(_) => self.find_in_dialogs(chat).await?,
        };

        found.map(|c| entity(&c, chat)).ok_or_else(|| {
            ForwarderError::Config(format!(
                "chat {} not found; run list-chats to see the chats this account can reach",
                chat
            ))
        })
    }

    async fn subscribe(
        &self,
        source: &Entity<PackedChat>,
        handler: Arc<dyn MessageHandler<Message>>,
    ) -> Result<(), ForwarderError> {
        let source_id = source.peer.id;
        let mut interrupt = std::pin::pin!(tokio::signal::ctrl_c());

        loop {
            let update = tokio::select! {
                _ = &mut interrupt => {
                    info!("Interrupt received, stopping forwarding");
                    return Ok(());
                }
                update = self.client.next_update() => update.map_err(connection)?,
            };

            let Update::NewMessage(message) = update else {
                continue;
            };
            let chat = message.chat();
            if chat.id() != source_id {
                continue;
            }

            let text = message.text().to_string();
            let incoming = IncomingMessage {
                text: (!text.is_empty()).then_some(text),
                has_media: message.media().is_some(),
                source_chat_id: marked_id(&chat),
                raw: message,
            };
            handler.handle(incoming).await;
        }
    }

    async fn send_text(&self, destination: &PackedChat, text: &str) -> Result<(), ForwarderError> {
        self.client
            .send_message(*destination, InputMessage::text(text))
            .await
            .map_err(delivery)?;
        Ok(())
    }

    async fn send_media_with_caption(
        &self,
        destination: &PackedChat,
        message: &IncomingMessage<Message>,
        caption: &str,
    ) -> Result<(), ForwarderError> {
        let media = message
            .raw
            .media()
            .ok_or_else(|| ForwarderError::Delivery("message has no media".into()))?;
        self.client
            .send_message(*destination, InputMessage::text(caption).copy_media(&media))
            .await
            .map_err(delivery)?;
        Ok(())
    }

    async fn native_forward(
        &self,
        destination: &PackedChat,
        message: &IncomingMessage<Message>,
    ) -> Result<(), ForwarderError> {
        let forwarded = self
            .client
            .forward_messages(*destination, &[message.raw.id()], message.raw.chat().pack())
            .await
            .map_err(delivery)?;
        if forwarded.iter().all(Option::is_none) {
            return Err(ForwarderError::Delivery(
                "forward returned no message".into(),
            ));
        }
        Ok(())
    }

    async fn disconnect(&self) {
        if let Err(e) = self.save_session() {
            warn!("Failed to save session: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grammers_client::grammers_tl_types as tl;

    fn channel_chat(id: i64, broadcast: bool) -> Chat {
        Chat::from_raw(
            tl::types::ChannelForbidden {
                broadcast,
                megagroup: !broadcast,
                id,
                access_hash: 0,
                title: "Deals".to_string(),
                until_date: None,
            }
            .into(),
        )
    }

    fn small_group(id: i64) -> Chat {
        Chat::from_raw(
            tl::types::ChatForbidden {
                id,
                title: "Friends".to_string(),
            }
            .into(),
        )
    }

    fn finds(raw: &str, chat: &Chat) -> bool {
        ChatRef::parse(raw)
            .unwrap()
            .matches(kind_of(chat), chat.id(), chat.username())
    }

    #[test]
    fn test_supergroup_matches_marked_id() {
        let chat = channel_chat(1234567890, false);
        assert!(matches!(chat, Chat::Group(_)));
        assert_eq!(kind_of(&chat), ChatKind::Channel);
        assert_eq!(marked_id(&chat), -1001234567890);
        assert!(finds("-1001234567890", &chat));
        assert!(finds("1234567890", &chat));
    }

    #[test]
    fn test_broadcast_channel_matches_marked_id() {
        let chat = channel_chat(987654321, true);
        assert_eq!(kind_of(&chat), ChatKind::Channel);
        assert_eq!(marked_id(&chat), -1000987654321);
        assert!(finds("-1000987654321", &chat));
    }

    #[test]
    fn test_small_group_uses_negated_id() {
        let chat = small_group(555);
        assert_eq!(kind_of(&chat), ChatKind::Group);
        assert_eq!(marked_id(&chat), -555);
        assert!(finds("-555", &chat));
        assert!(!finds("-1000000000555", &chat));
    }

    #[test]
    fn test_summary_reports_kind() {
        let summary = summarize(&channel_chat(42, false));
        assert_eq!(summary.kind, ChatKind::Channel);
        assert_eq!(summary.id, -1000000000042);
        assert_eq!(summary.name, "Deals");
    }
}
