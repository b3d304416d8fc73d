//! Chat transport module
//!
//! Message types shared between the transport and the dispatcher, and the
//! [`ReplySink`] seam the gateway loop delivers replies through. The Telegram
//! Bot API implementation lives in the `telegram*` submodules.

pub mod telegram;
pub mod telegram_inbound;
pub mod telegram_receive;

use async_trait::async_trait;
use thiserror::Error;

/// A text message received from the chat platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Identity of the sending user.
    pub sender_id: i64,
    /// Conversation the reply goes to.
    pub chat_id: i64,
    pub text: String,
}

impl InboundMessage {
    pub fn new(sender_id: i64, chat_id: i64, text: impl Into<String>) -> Self {
        Self {
            sender_id,
            chat_id,
            text: text.into(),
        }
    }
}

/// How the platform should render a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplyFormat {
    #[default]
    Plain,
    Markdown,
}

/// An outbound text reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub chat_id: i64,
    pub text: String,
    pub format: ReplyFormat,
}

impl Reply {
    pub fn plain(chat_id: i64, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            text: text.into(),
            format: ReplyFormat::Plain,
        }
    }

    pub fn markdown(chat_id: i64, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            text: text.into(),
            format: ReplyFormat::Markdown,
        }
    }
}

/// Transport errors
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("HTTP {status}: {description}")]
    Http { status: u16, description: String },

    #[error("API error: {0}")]
    Api(String),

    #[error("failed to decode response: {0}")]
    Decode(String),
}

/// Destination for outbound replies.
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn deliver(&self, reply: &Reply) -> Result<(), ChannelError>;
}
