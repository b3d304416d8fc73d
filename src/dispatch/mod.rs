//! Inbound message dispatch.
//!
//! Each message goes through a fixed sequence with no state carried between
//! messages:
//!
//! 1. sender identity check against the single allow-listed user
//! 2. built-in directives `/start` and `/help`
//! 3. registered commands `/name`, run from the commands directory
//! 4. free-form fallback: the raw text goes to the shell when enabled,
//!    otherwise the message is ignored
//!
//! The allow-list check is the only thing standing between the chat and a
//! shell on the host.

use std::sync::Arc;

use tracing::{info, warn};

use crate::channels::{InboundMessage, Reply};
use crate::exec::{run_to_text, CommandRunner, ShellKind};
use crate::logging::targets;
use crate::registry::{CommandRegistry, BUILTIN_HELP, BUILTIN_START};

pub const ACCESS_DENIED_TEXT: &str = "Access denied.";
pub const EXECUTION_FAILED_TEXT: &str = "Command execution failed.";

/// What the dispatcher decided to do with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Denied,
    Start,
    Help,
    Registered { name: String },
    FreeForm,
    Ignored,
}

/// Settings the dispatcher needs; a read-only view of the gateway config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchPolicy {
    pub allowed_user_id: i64,
    pub server_name: String,
    pub free_form_enabled: bool,
}

/// Routes messages and produces replies.
pub struct Dispatcher {
    policy: DispatchPolicy,
    registry: Arc<CommandRegistry>,
    runner: Arc<dyn CommandRunner>,
}

impl Dispatcher {
    pub fn new(
        policy: DispatchPolicy,
        registry: Arc<CommandRegistry>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            policy,
            registry,
            runner,
        }
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    /// Classify a message without running anything.
    pub fn route(&self, message: &InboundMessage) -> Route {
        if message.sender_id != self.policy.allowed_user_id {
            return Route::Denied;
        }
        let text = message.text.as_str();
        if text == format!("/{BUILTIN_START}") {
            return Route::Start;
        }
        if text == format!("/{BUILTIN_HELP}") {
            return Route::Help;
        }
        if let Some(command) = self.registry.match_directive(text) {
            return Route::Registered {
                name: command.name.clone(),
            };
        }
        if self.policy.free_form_enabled {
            Route::FreeForm
        } else {
            Route::Ignored
        }
    }

    /// Handle one message, running at most one subprocess.
    ///
    /// Returns the replies to send, in order. `/start` yields two replies;
    /// an ignored message yields none.
    pub async fn handle(&self, message: &InboundMessage) -> Vec<Reply> {
        let chat_id = message.chat_id;
        let route = self.route(message);

        if route == Route::Denied {
            warn!(
                target: targets::DISPATCH,
                sender_id = message.sender_id,
                chat_id,
                "unauthorized user"
            );
            return vec![Reply::plain(chat_id, ACCESS_DENIED_TEXT)];
        }

        info!(
            target: targets::DISPATCH,
            sender_id = message.sender_id,
            chat_id,
            text = %message.text,
            "received message"
        );

        match route {
            Route::Start => vec![
                Reply::plain(chat_id, self.welcome_text()),
                Reply::markdown(chat_id, self.registry.render_help()),
            ],
            Route::Help => vec![Reply::markdown(chat_id, self.registry.render_help())],
            Route::Registered { name } => vec![self.run_registered(chat_id, &name).await],
            Route::FreeForm => {
                let output = run_to_text(self.runner.as_ref(), &message.text).await;
                vec![Reply::plain(chat_id, output)]
            }
            Route::Denied | Route::Ignored => Vec::new(),
        }
    }

    async fn run_registered(&self, chat_id: i64, name: &str) -> Reply {
        let Some(command) = self.registry.find(name) else {
            return Reply::plain(chat_id, EXECUTION_FAILED_TEXT);
        };
        let script_path = match self.registry.resolve_script(command) {
            Ok(path) => path,
            Err(e) => {
                warn!(target: targets::DISPATCH, command = %name, error = %e, "cannot run command");
                return Reply::plain(chat_id, EXECUTION_FAILED_TEXT);
            }
        };
        let Some(invocation) = ShellKind::detect().quote(&script_path.to_string_lossy()) else {
            warn!(
                target: targets::DISPATCH,
                command = %name,
                path = %script_path.display(),
                "script path cannot be passed to the shell"
            );
            return Reply::plain(chat_id, EXECUTION_FAILED_TEXT);
        };
        let output = run_to_text(self.runner.as_ref(), &invocation).await;
        Reply::plain(chat_id, output)
    }

    fn welcome_text(&self) -> String {
        format!(
            "Welcome! This is the management bot for server {}.\nUse the commands below to get started.",
            self.policy.server_name
        )
    }
}
