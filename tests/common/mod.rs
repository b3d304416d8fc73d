//! Fake Telegram Bot API for integration tests, backed by a wiremock server.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, path_regex};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

pub const TEST_TOKEN: &str = "123456:TEST";

/// A Bot API call the fake server received.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub query: Option<String>,
    pub body: Value,
}

impl RecordedRequest {
    fn from_request(request: &Request) -> Self {
        Self {
            method: request
                .url
                .path()
                .rsplit('/')
                .next()
                .unwrap_or_default()
                .to_string(),
            query: request.url.query().map(str::to_string),
            body: serde_json::from_slice(&request.body).unwrap_or(Value::Null),
        }
    }
}

/// Knobs for the fake server's behavior.
#[derive(Debug, Clone, Default)]
pub struct FakeBehavior {
    pub reject_token: bool,
    pub fail_set_my_commands: bool,
    pub reject_markdown: bool,
}

/// Hands out queued updates once, then empty long-poll results.
struct QueuedUpdates {
    pending: Arc<Mutex<VecDeque<Value>>>,
}

impl Respond for QueuedUpdates {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let updates: Vec<Value> = self.pending.lock().unwrap().drain(..).collect();
        let template =
            ResponseTemplate::new(200).set_body_json(json!({"ok": true, "result": updates}));
        if updates.is_empty() {
            // Stand-in for the long-poll wait.
            template.set_delay(Duration::from_millis(50))
        } else {
            template
        }
    }
}

fn api_error(status: u16, description: &str) -> ResponseTemplate {
    ResponseTemplate::new(status).set_body_json(json!({
        "ok": false,
        "error_code": status,
        "description": description,
    }))
}

fn api_method(name: &str) -> impl wiremock::Match {
    path_regex(format!(r"/bot.*/{name}$"))
}

pub struct FakeBotApi {
    server: MockServer,
    pending_updates: Arc<Mutex<VecDeque<Value>>>,
}

impl FakeBotApi {
    pub async fn start(behavior: FakeBehavior) -> Self {
        let server = MockServer::start().await;
        let pending_updates = Arc::new(Mutex::new(VecDeque::new()));

        if behavior.reject_token {
            Mock::given(path_regex(r"^/bot"))
                .respond_with(api_error(401, "Unauthorized"))
                .with_priority(1)
                .mount(&server)
                .await;
        }

        Mock::given(api_method("getMe"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": {"id": 123456, "is_bot": true, "username": "shellgram_test_bot"}
            })))
            .mount(&server)
            .await;

        let menu_response = if behavior.fail_set_my_commands {
            api_error(500, "Internal Server Error")
        } else {
            ResponseTemplate::new(200).set_body_json(json!({"ok": true, "result": true}))
        };
        Mock::given(api_method("setMyCommands"))
            .respond_with(menu_response)
            .mount(&server)
            .await;

        if behavior.reject_markdown {
            Mock::given(api_method("sendMessage"))
                .and(body_partial_json(json!({"parse_mode": "Markdown"})))
                .respond_with(api_error(
                    400,
                    "Bad Request: can't parse entities: Can't find end of the entity starting at byte offset 3",
                ))
                .with_priority(1)
                .mount(&server)
                .await;
        }

        Mock::given(api_method("sendMessage"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"ok": true, "result": {"message_id": 1}})),
            )
            .mount(&server)
            .await;

        Mock::given(api_method("getUpdates"))
            .respond_with(QueuedUpdates {
                pending: pending_updates.clone(),
            })
            .mount(&server)
            .await;

        Self {
            server,
            pending_updates,
        }
    }

    pub fn base_url(&self) -> String {
        self.server.uri()
    }

    /// Queue a text message update to be returned by the next `getUpdates`.
    pub fn push_text_message(&self, update_id: i64, sender_id: i64, chat_id: i64, text: &str) {
        self.pending_updates.lock().unwrap().push_back(json!({
            "update_id": update_id,
            "message": {
                "message_id": update_id * 10,
                "text": text,
                "chat": { "id": chat_id, "type": "private" },
                "from": { "id": sender_id, "is_bot": false, "first_name": "Test" }
            }
        }));
    }

    /// Every request received so far, in arrival order.
    pub async fn requests(&self) -> Vec<RecordedRequest> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .map(RecordedRequest::from_request)
            .collect()
    }

    pub async fn requests_for(&self, method: &str) -> Vec<RecordedRequest> {
        self.requests()
            .await
            .into_iter()
            .filter(|r| r.method == method)
            .collect()
    }

    /// Poll until `count` sendMessage calls were received or the deadline passes.
    pub async fn wait_for_sent(&self, count: usize, deadline: Duration) -> Vec<RecordedRequest> {
        let start = tokio::time::Instant::now();
        loop {
            let sent = self.requests_for("sendMessage").await;
            if sent.len() >= count || start.elapsed() > deadline {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}
