//! Gateway wiring.
//!
//! Authenticates the bot, registers the command menu, then runs the Telegram
//! receive loop feeding a single consumer task. The consumer handles one
//! message at a time, so replies to a chat always go out in the order the
//! messages arrived.
//!
//! Shutdown stops the consumer immediately: queued messages are discarded and
//! the command being run, if any, is killed.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::channels::telegram::TelegramClient;
use crate::channels::telegram_receive::telegram_receive_loop;
use crate::channels::{ChannelError, InboundMessage, ReplySink};
use crate::config::GatewayConfig;
use crate::dispatch::{DispatchPolicy, Dispatcher};
use crate::exec::{CommandRunner, ShellRunner};
use crate::logging::redact::RedactedDisplay;
use crate::logging::targets;
use crate::registry::{CommandRegistry, RegistryError};

/// Inbound messages buffered between the receive loop and the consumer.
const MESSAGE_QUEUE_CAPACITY: usize = 64;

/// Fatal startup errors
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("failed to set up Telegram client: {0}")]
    Transport(#[source] ChannelError),

    #[error("bot authentication failed: {0}")]
    Auth(#[source] ChannelError),
}

/// Load the command registry named by the configuration.
pub fn load_registry(config: &GatewayConfig) -> Result<CommandRegistry, RegistryError> {
    CommandRegistry::load(&config.commands_file, config.commands_dir.clone())
}

/// Build a dispatcher from the configuration.
pub fn build_dispatcher(
    config: &GatewayConfig,
    registry: Arc<CommandRegistry>,
    runner: Arc<dyn CommandRunner>,
) -> Dispatcher {
    let policy = DispatchPolicy {
        allowed_user_id: config.allowed_user_id,
        server_name: config.server_name.clone(),
        free_form_enabled: config.free_form_enabled,
    };
    Dispatcher::new(policy, registry, runner)
}

/// Handle one message and deliver its replies in order.
///
/// Delivery failures are logged and do not stop the remaining replies.
/// Returns the number of replies delivered.
pub async fn process_message(
    dispatcher: &Dispatcher,
    sink: &dyn ReplySink,
    message: &InboundMessage,
) -> usize {
    let mut delivered = 0;
    for reply in dispatcher.handle(message).await {
        match sink.deliver(&reply).await {
            Ok(()) => delivered += 1,
            Err(e) => warn!(
                target: targets::GATEWAY,
                chat_id = reply.chat_id,
                error = %RedactedDisplay(&e),
                "failed to send reply"
            ),
        }
    }
    delivered
}

/// Consume messages until shutdown is signalled or the channel closes.
///
/// On shutdown the message being handled is abandoned. Dropping its future
/// drops the child process handle, which kills the command.
pub async fn run_message_loop(
    dispatcher: Dispatcher,
    sink: Arc<dyn ReplySink>,
    mut messages: mpsc::Receiver<InboundMessage>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let message = tokio::select! {
            biased;
            _ = shutdown_signalled(&mut shutdown) => break,
            message = messages.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        tokio::select! {
            biased;
            _ = shutdown_signalled(&mut shutdown) => {
                warn!(
                    target: targets::GATEWAY,
                    chat_id = message.chat_id,
                    "shutdown interrupted message handling"
                );
                break;
            }
            _ = process_message(&dispatcher, sink.as_ref(), &message) => {}
        }
    }

    let discarded = messages.len();
    if discarded > 0 {
        info!(target: targets::GATEWAY, discarded, "dropping queued messages");
    }
    info!(target: targets::GATEWAY, "message loop finished");
}

/// Resolves once shutdown is set or its sender is gone.
async fn shutdown_signalled(shutdown: &mut watch::Receiver<bool>) {
    loop {
        let stop = *shutdown.borrow_and_update();
        if stop || shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Run the gateway until shutdown is signalled.
///
/// Bot authentication failure is fatal; a failed command menu registration
/// is only logged.
pub async fn run(
    config: GatewayConfig,
    registry: CommandRegistry,
    shutdown: watch::Receiver<bool>,
) -> Result<(), GatewayError> {
    let client = Arc::new(
        TelegramClient::new(&config.api_base_url, &config.bot_token)
            .map_err(GatewayError::Transport)?,
    );

    let identity = client.get_me().await.map_err(GatewayError::Auth)?;
    info!(
        target: targets::GATEWAY,
        bot_id = identity.id,
        username = identity.username.as_deref().unwrap_or("<none>"),
        "Authorized on bot account"
    );

    let registry = Arc::new(registry);
    if let Err(e) = client.set_my_commands(&registry.menu_entries()).await {
        warn!(target: targets::GATEWAY, error = %RedactedDisplay(&e), "failed to set bot commands");
    }

    let runner: Arc<dyn CommandRunner> = Arc::new(ShellRunner::detect(config.exec_timeout));
    let dispatcher = build_dispatcher(&config, registry.clone(), runner);

    info!(
        target: targets::GATEWAY,
        commands = registry.len(),
        free_form = config.free_form_enabled,
        allowed_user_id = config.allowed_user_id,
        "Gateway ready"
    );

    let (tx, rx) = mpsc::channel(MESSAGE_QUEUE_CAPACITY);
    let receiver = tokio::spawn(telegram_receive_loop(
        config.api_base_url.clone(),
        config.bot_token.clone(),
        tx,
        shutdown.clone(),
    ));

    run_message_loop(dispatcher, client, rx, shutdown).await;

    if let Err(e) = receiver.await {
        warn!(target: targets::GATEWAY, error = %e, "receive loop task failed");
    }
    Ok(())
}
