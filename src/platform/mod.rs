pub mod bot;
pub mod user;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ForwarderError;
use crate::prompt::Prompt;

/// A chat identifier as written in the config: a numeric id or a handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatRef {
    Id(i64),
    Username(String),
}

impl ChatRef {
    /// Optionally negative integers are ids; anything else is a handle with
    /// any leading `@` removed.
    pub fn parse(raw: &str) -> Result<Self, ForwarderError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ForwarderError::Config("chat identifier is empty".into()));
        }
        if let Ok(id) = raw.parse::<i64>() {
            return Ok(Self::Id(id));
        }
        let handle = raw.trim_start_matches('@');
        if handle.is_empty() {
            return Err(ForwarderError::Config(format!(
                "'{}' is not a chat id or handle",
                raw
            )));
        }
        Ok(Self::Username(handle.to_string()))
    }

    /// Whether a chat of `kind` with bare id `id` is the one referenced.
    pub fn matches(&self, kind: ChatKind, id: i64, username: Option<&str>) -> bool {
        match self {
            Self::Id(wanted) => *wanted == id || *wanted == kind.marked_id(id),
            Self::Username(wanted) => username.is_some_and(|u| u.eq_ignore_ascii_case(wanted)),
        }
    }
}

impl fmt::Display for ChatRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{}", id),
            Self::Username(name) => write!(f, "@{}", name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    User,
    Group,
    Channel,
}

impl ChatKind {
    /// Bot API style id: groups are negated, channels get a `-100` prefix.
    pub fn marked_id(self, bare: i64) -> i64 {
        match self {
            Self::User => bare,
            Self::Group => -bare,
            Self::Channel => -1_000_000_000_000 - bare,
        }
    }
}

impl fmt::Display for ChatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "User"),
            Self::Group => write!(f, "Group"),
            Self::Channel => write!(f, "Channel"),
        }
    }
}

/// One row of the chat listing.
#[derive(Debug, Clone)]
pub struct ChatSummary {
    pub kind: ChatKind,
    pub name: String,
    pub id: i64,
    pub username: Option<String>,
}

/// A chat resolved by a connector.
#[derive(Debug, Clone)]
pub struct Entity<P> {
    pub peer: P,
    pub chat: ChatRef,
    pub id: Option<i64>,
    pub name: String,
}

/// What a connector needs to sign a user account in.
#[derive(Debug, Clone)]
pub struct Login {
    pub phone: String,
    /// One-time code supplied up front, e.g. from `TELEGRAM_CODE`.
    pub code: Option<String>,
    /// Two-factor password supplied up front, e.g. from `TELEGRAM_PASSWORD`.
    pub password: Option<String>,
}

/// A message received from the source chat
#[derive(Debug, Clone)]
pub struct IncomingMessage<R> {
    /// Message text, or the caption of a media message
    pub text: Option<String>,
    pub has_media: bool,
    /// Marked id of the source chat, as in [`ChatKind::marked_id`].
    pub source_chat_id: i64,
    /// The connector's own message, used to forward or copy its media
    pub raw: R,
}

impl<R> IncomingMessage<R> {
    /// Text if present and not blank.
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref().filter(|t| !t.trim().is_empty())
    }
}

/// Callback invoked for every message the subscription delivers.
#[async_trait]
pub trait MessageHandler<R>: Send + Sync {
    async fn handle(&self, message: IncomingMessage<R>);
}

/// Telegram client seam. Wire protocol, sessions and rate limits stay
/// inside the client library behind it.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Resolved chat handle accepted by the send primitives.
    type Peer: Clone + Send + Sync + 'static;
    /// Native message type carried in [`IncomingMessage::raw`].
    type Raw: Send + Sync + 'static;

    fn name(&self) -> &'static str;

    /// Sign in if needed and return the account's display name.
    async fn authenticate(
        &self,
        login: &Login,
        prompt: &mut (dyn Prompt + Send),
    ) -> Result<String, ForwarderError>;

    async fn list_chats(&self) -> Result<Vec<ChatSummary>, ForwarderError>;

    async fn resolve_entity(&self, chat: &ChatRef) -> Result<Entity<Self::Peer>, ForwarderError>;

    /// Deliver messages from `source` to `handler` one at a time until
    /// interrupted (`Ok`) or the connection fails (`Err`).
    async fn subscribe(
        &self,
        source: &Entity<Self::Peer>,
        handler: Arc<dyn MessageHandler<Self::Raw>>,
    ) -> Result<(), ForwarderError>;

    async fn send_text(&self, destination: &Self::Peer, text: &str) -> Result<(), ForwarderError>;

    async fn send_media_with_caption(
        &self,
        destination: &Self::Peer,
        message: &IncomingMessage<Self::Raw>,
        caption: &str,
    ) -> Result<(), ForwarderError>;

    async fn native_forward(
        &self,
        destination: &Self::Peer,
        message: &IncomingMessage<Self::Raw>,
    ) -> Result<(), ForwarderError>;

    async fn disconnect(&self) {}
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        NativeForward { destination: String },
        MediaResend { destination: String, caption: String },
        Text { destination: String, text: String },
    }

    /// Scriptable connector recording every send attempt.
    #[derive(Default)]
    pub struct MockConnector {
        pub fail_native: bool,
        pub fail_media: bool,
        pub fail_text: bool,
        pub calls: Mutex<Vec<Call>>,
        /// Delivered in order by `subscribe`.
        pub inbox: Mutex<Vec<IncomingMessage<()>>>,
        pub chats: Vec<ChatSummary>,
    }

    impl MockConnector {
        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: Call, fail: bool) -> Result<(), ForwarderError> {
            self.calls.lock().unwrap().push(call);
            if fail {
                Err(ForwarderError::Delivery("simulated failure".into()))
            } else {
                Ok(())
            }
        }
    }

    pub fn message(text: Option<&str>, has_media: bool) -> IncomingMessage<()> {
        IncomingMessage {
            text: text.map(str::to_owned),
            has_media,
            source_chat_id: 42,
            raw: (),
        }
    }

    #[async_trait]
    impl Connector for MockConnector {
        type Peer = String;
        type Raw = ();

        fn name(&self) -> &'static str {
            "mock"
        }

        async fn authenticate(
            &self,
            login: &Login,
            _prompt: &mut (dyn Prompt + Send),
        ) -> Result<String, ForwarderError> {
            Ok(login.phone.clone())
        }

        async fn list_chats(&self) -> Result<Vec<ChatSummary>, ForwarderError> {
            Ok(self.chats.clone())
        }

        async fn resolve_entity(&self, chat: &ChatRef) -> Result<Entity<String>, ForwarderError> {
            let found = self
                .chats
                .iter()
                .find(|c| chat.matches(c.kind, c.id, c.username.as_deref()));
            Ok(Entity {
                peer: chat.to_string(),
                chat: chat.clone(),
                id: found.map(|c| c.id),
                name: found
                    .map(|c| c.name.clone())
                    .unwrap_or_else(|| chat.to_string()),
            })
        }

        async fn subscribe(
            &self,
            _source: &Entity<String>,
            handler: Arc<dyn MessageHandler<()>>,
        ) -> Result<(), ForwarderError> {
            let inbox: Vec<_> = self.inbox.lock().unwrap().drain(..).collect();
            for message in inbox {
                handler.handle(message).await;
            }
            Ok(())
        }

        async fn send_text(&self, destination: &String, text: &str) -> Result<(), ForwarderError> {
            self.record(
                Call::Text {
                    destination: destination.clone(),
                    text: text.to_string(),
                },
                self.fail_text,
            )
        }

        async fn send_media_with_caption(
            &self,
            destination: &String,
            _message: &IncomingMessage<()>,
            caption: &str,
        ) -> Result<(), ForwarderError> {
            self.record(
                Call::MediaResend {
                    destination: destination.clone(),
                    caption: caption.to_string(),
                },
                self.fail_media,
            )
        }

        async fn native_forward(
            &self,
            destination: &String,
            _message: &IncomingMessage<()>,
        ) -> Result<(), ForwarderError> {
            self.record(
                Call::NativeForward {
                    destination: destination.clone(),
                },
                self.fail_native,
            )
        }
    }
}
