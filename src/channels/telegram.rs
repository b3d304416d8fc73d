//! Telegram Bot API client.
//!
//! Outbound side of the transport: bot authentication (`getMe`), replies
//! (`sendMessage`) and command-menu registration (`setMyCommands`).

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::channels::{ChannelError, Reply, ReplyFormat, ReplySink};
use crate::logging::targets;

pub const TELEGRAM_DEFAULT_API_BASE_URL: &str = "https://api.telegram.org";
/// Bot API limit for a single message, in characters.
pub const MAX_MESSAGE_CHARS: usize = 4096;
/// Sent instead of an empty reply, which the Bot API rejects.
pub const EMPTY_TEXT_PLACEHOLDER: &str = "(no output)";
const TRUNCATION_MARKER: &str = "\n…(truncated)";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The bot account the token belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BotIdentity {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
}

/// Async client for the Bot API methods the gateway sends.
pub struct TelegramClient {
    client: reqwest::Client,
    base_url: String,
    bot_token: String,
}

impl TelegramClient {
    /// Create a client targeting the given Bot API base URL.
    pub fn new(base_url: &str, bot_token: &str) -> Result<Self, ChannelError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ChannelError::Transport(format!("client init failed: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            bot_token: bot_token.to_string(),
        })
    }

    /// Build the API endpoint URL for a method.
    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.bot_token, method)
    }

    /// Authenticate the token and return the bot account.
    pub async fn get_me(&self) -> Result<BotIdentity, ChannelError> {
        let result = self.call("getMe", json!({})).await?;
        serde_json::from_value(result).map_err(|e| ChannelError::Decode(e.to_string()))
    }

    /// Send a text message, returning the new message id.
    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        format: ReplyFormat,
    ) -> Result<Option<i64>, ChannelError> {
        let result = self
            .call("sendMessage", send_message_body(chat_id, text, format))
            .await?;
        Ok(result.get("message_id").and_then(Value::as_i64))
    }

    /// Register the command menu hints shown by Telegram clients.
    pub async fn set_my_commands(&self, entries: &[(String, String)]) -> Result<(), ChannelError> {
        self.call("setMyCommands", set_my_commands_body(entries))
            .await
            .map(|_| ())
    }

    async fn call(&self, method: &str, body: Value) -> Result<Value, ChannelError> {
        let resp = self
            .client
            .post(self.api_url(method))
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(method, e))?;

        let status = resp.status().as_u16();
        let body_text = resp
            .text()
            .await
            .map_err(|e| transport_error(method, e))?;
        debug!(target: targets::TELEGRAM, method, status, "Bot API call completed");
        parse_api_response(status, &body_text)
    }
}

#[async_trait]
impl ReplySink for TelegramClient {
    async fn deliver(&self, reply: &Reply) -> Result<(), ChannelError> {
        let text = fit_message_text(&reply.text);
        match self.send_message(reply.chat_id, &text, reply.format).await {
            Err(err) if reply.format == ReplyFormat::Markdown && is_markdown_rejection(&err) => {
                warn!(
                    target: targets::TELEGRAM,
                    chat_id = reply.chat_id,
                    error = %err,
                    "Markdown rejected, resending as plain text"
                );
                self.send_message(reply.chat_id, &text, ReplyFormat::Plain)
                    .await
                    .map(|_| ())
            }
            other => other.map(|_| ()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    description: Option<String>,
}

/// Interpret a Bot API response body.
fn parse_api_response(status: u16, body_text: &str) -> Result<Value, ChannelError> {
    let success = (200..300).contains(&status);
    let parsed: ApiResponse = match serde_json::from_str(body_text) {
        Ok(parsed) => parsed,
        Err(e) if success => return Err(ChannelError::Decode(e.to_string())),
        Err(_) => {
            return Err(ChannelError::Http {
                status,
                description: non_empty_or(body_text, "request failed"),
            })
        }
    };

    if parsed.ok {
        return Ok(parsed.result.unwrap_or(Value::Null));
    }

    let description = parsed
        .description
        .unwrap_or_else(|| "request failed".to_string());
    if success {
        Err(ChannelError::Api(description))
    } else {
        Err(ChannelError::Http {
            status,
            description,
        })
    }
}

fn send_message_body(chat_id: i64, text: &str, format: ReplyFormat) -> Value {
    let mut body = json!({
        "chat_id": chat_id,
        "text": text,
    });
    if format == ReplyFormat::Markdown {
        body["parse_mode"] = json!("Markdown");
    }
    body
}

fn set_my_commands_body(entries: &[(String, String)]) -> Value {
    let commands: Vec<Value> = entries
        .iter()
        .map(|(command, description)| json!({ "command": command, "description": description }))
        .collect();
    json!({ "commands": commands })
}

/// Make text acceptable to `sendMessage`: never empty, never over the limit.
pub fn fit_message_text(text: &str) -> String {
    if text.is_empty() {
        return EMPTY_TEXT_PLACEHOLDER.to_string();
    }
    if text.chars().count() <= MAX_MESSAGE_CHARS {
        return text.to_string();
    }
    let keep = MAX_MESSAGE_CHARS - TRUNCATION_MARKER.chars().count();
    let mut fitted: String = text.chars().take(keep).collect();
    fitted.push_str(TRUNCATION_MARKER);
    fitted
}

fn is_markdown_rejection(err: &ChannelError) -> bool {
    let description = match err {
        ChannelError::Http {
            status: 400,
            description,
        } => description,
        ChannelError::Api(description) => description,
        _ => return false,
    };
    description.contains("can't parse entities")
}

fn transport_error(method: &str, err: reqwest::Error) -> ChannelError {
    let kind = classify_transport_error(&err);
    // The URL carries the bot token; drop it from the message.
    ChannelError::Transport(format!("{method}: {kind}: {}", err.without_url()))
}

pub(crate) fn classify_transport_error(err: &reqwest::Error) -> &'static str {
    if err.is_timeout() {
        "request timeout"
    } else if err.is_connect() {
        "connection error"
    } else {
        "request failed"
    }
}

fn non_empty_or(text: &str, fallback: &str) -> String {
    if text.trim().is_empty() {
        fallback.to_string()
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> TelegramClient {
        TelegramClient::new("http://localhost:8080/", "token").unwrap()
    }

    #[test]
    fn test_api_url_trims_trailing_slash() {
        assert_eq!(
            test_client().api_url("sendMessage"),
            "http://localhost:8080/bottoken/sendMessage"
        );
    }

    #[test]
    fn test_parse_api_response_ok() {
        let result =
            parse_api_response(200, r#"{"ok":true,"result":{"message_id":77}}"#).unwrap();
        assert_eq!(result["message_id"], 77);
    }

    #[test]
    fn test_parse_api_response_ok_without_result() {
        assert_eq!(parse_api_response(200, r#"{"ok":true}"#).unwrap(), Value::Null);
    }

    #[test]
    fn test_parse_api_response_http_error_with_description() {
        let err = parse_api_response(
            400,
            r#"{"ok":false,"error_code":400,"description":"Bad Request: chat not found"}"#,
        )
        .unwrap_err();
        match err {
            ChannelError::Http {
                status,
                description,
            } => {
                assert_eq!(status, 400);
                assert_eq!(description, "Bad Request: chat not found");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_parse_api_response_unauthorized() {
        let err = parse_api_response(
            401,
            r#"{"ok":false,"error_code":401,"description":"Unauthorized"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ChannelError::Http { status: 401, .. }));
        assert_eq!(err.to_string(), "HTTP 401: Unauthorized");
    }

    #[test]
    fn test_parse_api_response_non_json_error() {
        let err = parse_api_response(502, "Bad Gateway").unwrap_err();
        assert!(matches!(err, ChannelError::Http { status: 502, .. }));
        assert_eq!(err.to_string(), "HTTP 502: Bad Gateway");
    }

    #[test]
    fn test_parse_api_response_garbage_on_success() {
        let err = parse_api_response(200, "<html>").unwrap_err();
        assert!(matches!(err, ChannelError::Decode(_)));
    }

    #[test]
    fn test_parse_api_response_ok_false_on_200() {
        let err = parse_api_response(200, r#"{"ok":false,"description":"nope"}"#).unwrap_err();
        assert!(matches!(err, ChannelError::Api(ref d) if d == "nope"));
    }

    #[test]
    fn test_send_message_body_plain() {
        let body = send_message_body(42, "hi", ReplyFormat::Plain);
        assert_eq!(body, json!({"chat_id": 42, "text": "hi"}));
    }

    #[test]
    fn test_send_message_body_markdown() {
        let body = send_message_body(42, "`x`", ReplyFormat::Markdown);
        assert_eq!(body["parse_mode"], "Markdown");
    }

    #[test]
    fn test_set_my_commands_body_keeps_order() {
        let entries = vec![
            ("start".to_string(), "Welcome message".to_string()),
            ("status".to_string(), "Show status".to_string()),
        ];
        let body = set_my_commands_body(&entries);
        assert_eq!(
            body,
            json!({"commands": [
                {"command": "start", "description": "Welcome message"},
                {"command": "status", "description": "Show status"}
            ]})
        );
    }

    #[test]
    fn test_fit_message_text_empty() {
        assert_eq!(fit_message_text(""), EMPTY_TEXT_PLACEHOLDER);
    }

    #[test]
    fn test_fit_message_text_short_unchanged() {
        assert_eq!(fit_message_text("hi\n"), "hi\n");
    }

    #[test]
    fn test_fit_message_text_exact_limit_unchanged() {
        let text = "я".repeat(MAX_MESSAGE_CHARS);
        assert_eq!(fit_message_text(&text), text);
    }

    #[test]
    fn test_fit_message_text_truncates_on_char_boundary() {
        let text = "я".repeat(MAX_MESSAGE_CHARS + 100);
        let fitted = fit_message_text(&text);
        assert_eq!(fitted.chars().count(), MAX_MESSAGE_CHARS);
        assert!(fitted.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn test_markdown_rejection_detection() {
        let err = ChannelError::Http {
            status: 400,
            description: "Bad Request: can't parse entities: Can't find end of the entity"
                .to_string(),
        };
        assert!(is_markdown_rejection(&err));
        let other = ChannelError::Http {
            status: 400,
            description: "Bad Request: chat not found".to_string(),
        };
        assert!(!is_markdown_rejection(&other));
        assert!(!is_markdown_rejection(&ChannelError::Transport("x".into())));
    }

    #[tokio::test]
    async fn test_send_connection_failure_is_transport_error() {
        let client = TelegramClient::new("http://127.0.0.1:1", "token").unwrap();
        let err = client
            .send_message(123, "Hello", ReplyFormat::Plain)
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::Transport(_)), "got {err:?}");
        assert!(!err.to_string().contains("bottoken"));
    }
}
