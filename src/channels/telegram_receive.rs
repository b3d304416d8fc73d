//! Telegram inbound receive loop.
//!
//! Uses Bot API long polling (`getUpdates`) and forwards every text message
//! into a bounded channel consumed by the gateway's single dispatcher task.

use std::time::Duration;

use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::channels::telegram::classify_transport_error;
use crate::channels::{telegram_inbound, InboundMessage};
use crate::logging::targets;

/// Long-poll timeout passed to Telegram getUpdates.
pub const POLL_TIMEOUT_SECS: u64 = 30;
/// Client-side request timeout (must exceed poll timeout).
const REQUEST_TIMEOUT: Duration = Duration::from_secs(POLL_TIMEOUT_SECS + 10);
/// Backoff between failed poll attempts.
const ERROR_BACKOFF: Duration = Duration::from_secs(3);
/// Errors logged in a row before further ones are suppressed until recovery.
const MAX_LOGGED_ERRORS: u32 = 3;

#[derive(Debug, Deserialize)]
struct TelegramGetUpdatesResponse {
    ok: bool,
    #[serde(default)]
    result: Vec<telegram_inbound::TelegramUpdate>,
    #[serde(default)]
    description: Option<String>,
}

/// Run the Telegram long-polling receive loop.
///
/// Returns when shutdown is signalled or the message channel is closed.
pub async fn telegram_receive_loop(
    base_url: String,
    bot_token: String,
    messages: mpsc::Sender<InboundMessage>,
    mut shutdown: watch::Receiver<bool>,
) {
    let client = match reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build() {
        Ok(client) => client,
        Err(e) => {
            warn!(target: targets::TELEGRAM, "failed to build receive HTTP client: {}", e.without_url());
            return;
        }
    };
    let updates_url = build_get_updates_url(&base_url, &bot_token);

    info!(
        target: targets::TELEGRAM,
        base_url = %base_url,
        "Telegram receive loop started (long polling)"
    );

    let mut offset: Option<i64> = None;
    let mut consecutive_errors: u32 = 0;

    loop {
        if *shutdown.borrow() {
            info!(target: targets::TELEGRAM, "Telegram receive loop shutting down");
            break;
        }

        let request_url = build_poll_request_url(&updates_url, offset);
        let response = tokio::select! {
            response = client.get(&request_url).send() => response,
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
        };

        let error = match response {
            Ok(resp) if resp.status().is_success() => {
                match resp.json::<TelegramGetUpdatesResponse>().await {
                    Ok(payload) if payload.ok => {
                        if consecutive_errors > 0 {
                            info!(
                                target: targets::TELEGRAM,
                                "Telegram receive loop recovered after {} errors",
                                consecutive_errors
                            );
                            consecutive_errors = 0;
                        }
                        for update in payload.result {
                            offset = next_offset_after_update(offset, update.update_id);
                            let Some(message) = telegram_inbound::extract_inbound(&update) else {
                                continue;
                            };
                            if messages.send(message).await.is_err() {
                                info!(target: targets::TELEGRAM, "message channel closed, stopping receive loop");
                                return;
                            }
                        }
                        debug!(target: targets::TELEGRAM, "long-poll request completed");
                        None
                    }
                    Ok(payload) => Some(payload.description.unwrap_or_else(|| {
                        "telegram getUpdates returned ok=false".to_string()
                    })),
                    Err(err) => Some(format!(
                        "failed to parse getUpdates response: {}",
                        err.without_url()
                    )),
                }
            }
            Ok(resp) => Some(format!("getUpdates HTTP {}", resp.status())),
            Err(err) => Some(classify_transport_error(&err).to_string()),
        };

        let Some(error) = error else {
            continue;
        };

        consecutive_errors += 1;
        if consecutive_errors <= MAX_LOGGED_ERRORS {
            warn!(target: targets::TELEGRAM, "Telegram getUpdates failed: {}", error);
        } else if consecutive_errors == MAX_LOGGED_ERRORS + 1 {
            warn!(
                target: targets::TELEGRAM,
                "Telegram receive errors continuing (suppressing further logs until recovery)"
            );
        }

        tokio::select! {
            _ = tokio::time::sleep(ERROR_BACKOFF) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
}

fn build_get_updates_url(base_url: &str, bot_token: &str) -> String {
    let base = base_url.trim_end_matches('/');
    format!("{base}/bot{bot_token}/getUpdates")
}

fn build_poll_request_url(base_url: &str, offset: Option<i64>) -> String {
    let mut url = format!("{base_url}?timeout={POLL_TIMEOUT_SECS}");
    if let Some(offset) = offset {
        url.push_str("&offset=");
        url.push_str(&offset.to_string());
    }
    url
}

fn next_offset_after_update(current: Option<i64>, update_id: Option<i64>) -> Option<i64> {
    let Some(update_id) = update_id else {
        return current;
    };
    let next = update_id.saturating_add(1);
    Some(current.map_or(next, |current_value| current_value.max(next)))
}
