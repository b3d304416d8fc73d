//! CLI subcommand definitions and handlers.
//!
//! Uses clap derive to define the subcommands:
//! - `start` (default) -- run the Telegram gateway
//! - `check` -- validate configuration and the command registry offline
//! - `exec` -- run one command line the way the gateway would and print the reply text
//! - `version` -- print version info

use std::io::Write;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::config::GatewayConfig;
use crate::exec::{run_to_text, ShellKind, ShellRunner};
use crate::gateway;
use crate::registry::CommandRegistry;

/// Shellgram: run shell commands on this host from a Telegram chat.
#[derive(Parser, Debug)]
#[command(
    name = "shellgram",
    version = env!("CARGO_PKG_VERSION"),
    about = "Telegram gateway for running shell commands on a server"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the gateway (default when no subcommand is given).
    Start,

    /// Load the configuration and command registry, then print the help
    /// text and command menu without contacting Telegram.
    Check,

    /// Run a single command line through the host shell and print the
    /// normalized output.
    Exec {
        /// Command line passed verbatim to the shell.
        line: String,

        /// Kill the command after this many seconds.
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Print version information.
    Version,
}

/// `check`: fail on the same errors `start` would, minus the network.
pub fn handle_check() -> Result<(), Box<dyn std::error::Error>> {
    let config = GatewayConfig::from_env()?;
    let registry = gateway::load_registry(&config)?;
    let mut stdout = std::io::stdout().lock();
    write_check_report(&mut stdout, &config, &registry)?;
    Ok(())
}

fn write_check_report(
    out: &mut impl Write,
    config: &GatewayConfig,
    registry: &CommandRegistry,
) -> std::io::Result<()> {
    writeln!(out, "Server:          {}", config.server_name)?;
    writeln!(out, "Allowed user:    {}", config.allowed_user_id)?;
    writeln!(
        out,
        "Free-form:       {}",
        if config.free_form_enabled {
            "enabled"
        } else {
            "disabled"
        }
    )?;
    writeln!(out, "Commands file:   {}", config.commands_file.display())?;
    match config.exec_timeout {
        Some(limit) => writeln!(out, "Exec timeout:    {limit:?}")?,
        None => writeln!(out, "Exec timeout:    none")?,
    }
    writeln!(out)?;

    for command in registry.commands() {
        let status = match registry.resolve_script(command) {
            Ok(path) if path.is_file() => "ok".to_string(),
            Ok(path) => format!("missing: {}", path.display()),
            Err(e) => format!("invalid: {e}"),
        };
        writeln!(out, "/{:<16} {}", command.name, status)?;
    }
    writeln!(out)?;

    write!(out, "{}", registry.render_help())?;
    writeln!(out)?;
    writeln!(out, "Menu:")?;
    for (command, description) in registry.menu_entries() {
        writeln!(out, "  {command} - {description}")?;
    }
    Ok(())
}

/// `exec`: run one line and print the text the bot would have replied with.
pub async fn handle_exec(
    line: &str,
    timeout: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let runner = ShellRunner::detect(timeout.map(Duration::from_secs));
    let text = run_to_text(&runner, line).await;
    print!("{text}");
    if !text.ends_with('\n') {
        println!();
    }
    Ok(())
}

/// `version`: print version and platform.
pub fn handle_version() {
    println!("shellgram {}", env!("CARGO_PKG_VERSION"));
    println!(
        "  Platform:   {} ({})",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
    println!("  Shell:      {}", shell_label());
}

fn shell_label() -> String {
    let shell = ShellKind::detect();
    format!("{} {}", shell.program(), shell.flag())
}
