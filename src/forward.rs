use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::error::ForwarderError;
use crate::platform::{Connector, Entity, IncomingMessage, MessageHandler};

/// Which stage of the fallback chain delivered the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Forwarded,
    ResentWithMedia,
    TextOnly,
    /// Nothing to send: no text and media forwarding not applicable.
    Nothing,
}

/// True when `keywords` is empty, or `text` contains any keyword ignoring case.
pub fn should_forward(text: Option<&str>, keywords: &[String]) -> bool {
    if keywords.is_empty() {
        return true;
    }
    let Some(text) = text.filter(|t| !t.is_empty()) else {
        return false;
    };
    let text = text.to_lowercase();
    keywords
        .iter()
        .any(|keyword| text.contains(&keyword.to_lowercase()))
}

/// Deliver one message: native forward, then re-send with media, then text
/// only. Each stage failing moves on to the next.
pub async fn forward<C: Connector>(
    connector: &C,
    message: &IncomingMessage<C::Raw>,
    destination: &C::Peer,
    forward_media: bool,
) -> Result<Delivery, ForwarderError> {
    let text = message.text();

    if !(message.has_media && forward_media) {
        return match text {
            Some(text) => {
                connector.send_text(destination, text).await?;
                Ok(Delivery::TextOnly)
            }
            None => Ok(Delivery::Nothing),
        };
    }

    match connector.native_forward(destination, message).await {
        Ok(()) => return Ok(Delivery::Forwarded),
        Err(e) => warn!("Native forward failed, re-sending with media: {}", e),
    }

    match connector
        .send_media_with_caption(destination, message, text.unwrap_or_default())
        .await
    {
        Ok(()) => return Ok(Delivery::ResentWithMedia),
        Err(e) => warn!("Re-sending media failed, falling back to text: {}", e),
    }

    match text {
        Some(text) => {
            connector.send_text(destination, text).await?;
            Ok(Delivery::TextOnly)
        }
        None => Err(ForwarderError::Delivery(
            "message had no text and its media could not be forwarded".into(),
        )),
    }
}

/// The subscription callback: keyword filter, fallback chain, courtesy delay.
pub struct ForwardHandler<C: Connector> {
    connector: Arc<C>,
    destination: Entity<C::Peer>,
    keywords: Vec<String>,
    forward_media: bool,
    delay: Duration,
}

impl<C: Connector> ForwardHandler<C> {
    pub fn new(
        connector: Arc<C>,
        destination: Entity<C::Peer>,
        keywords: Vec<String>,
        forward_media: bool,
        delay: Duration,
    ) -> Self {
        Self {
            connector,
            destination,
            keywords,
            forward_media,
            delay,
        }
    }
}

#[async_trait]
impl<C: Connector> MessageHandler<C::Raw> for ForwardHandler<C> {
    async fn handle(&self, message: IncomingMessage<C::Raw>) {
        let preview: String = message.text().unwrap_or("").chars().take(50).collect();

        if !should_forward(message.text(), &self.keywords) {
            debug!("Message doesn't contain keywords: {}", preview);
            return;
        }

        match forward(
            self.connector.as_ref(),
            &message,
            &self.destination.peer,
            self.forward_media,
        )
        .await
        {
            Ok(Delivery::Nothing) => {
                debug!("Message from {} had nothing to forward", message.source_chat_id);
            }
            Ok(delivery) => {
                info!(
                    "Forwarded to {} ({:?}): {}",
                    self.destination.name, delivery, preview
                );
                if !self.delay.is_zero() {
                    debug!("Waiting {}s before next message", self.delay.as_secs());
                    tokio::time::sleep(self.delay).await;
                }
            }
            Err(e) => error!("Failed to forward message: {}", e),
        }
    }
}
