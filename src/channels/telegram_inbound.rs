//! Telegram update parsing helpers.

use serde::Deserialize;

use crate::channels::InboundMessage;

/// Telegram update payload.
#[derive(Debug, Deserialize)]
pub struct TelegramUpdate {
    #[serde(default)]
    pub update_id: Option<i64>,
    #[serde(default)]
    pub message: Option<TelegramMessage>,
}

/// Telegram message payload.
#[derive(Debug, Deserialize)]
pub struct TelegramMessage {
    #[serde(default)]
    pub text: Option<String>,
    pub chat: TelegramChat,
    #[serde(default)]
    pub from: Option<TelegramUser>,
}

/// Telegram chat metadata.
#[derive(Debug, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
}

/// Telegram user metadata.
#[derive(Debug, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
}

/// Extract a text message from a Telegram update.
///
/// Only new messages with a sender and a non-empty text body are routed;
/// edits, channel posts, media without text and bot senders are skipped.
pub fn extract_inbound(update: &TelegramUpdate) -> Option<InboundMessage> {
    let message = update.message.as_ref()?;
    let from = message.from.as_ref()?;
    if from.is_bot {
        return None;
    }

    let text = message.text.as_ref().filter(|t| !t.is_empty())?;

    Some(InboundMessage {
        sender_id: from.id,
        chat_id: message.chat.id,
        text: text.clone(),
    })
}
