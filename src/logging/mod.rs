//! Logging setup.
//!
//! One `tracing` subscriber for the whole process: JSON lines in production,
//! plaintext when `SHELLGRAM_DEV` is set. Every line goes through
//! [`redact::RedactingMakeWriter`] because Bot API URLs embed the bot token.
//!
//! # Log Targets
//!
//! - `gateway` - startup, shutdown and the message loop
//! - `telegram` - Bot API transport
//! - `dispatch` - per-message routing decisions
//! - `exec` - subprocess execution
//! - `config` - configuration and command registry loading
//!
//! # Environment Variables
//!
//! - `SHELLGRAM_LOG` - filter directives, checked first
//! - `RUST_LOG` - fallback filter directives
//! - `SHELLGRAM_DEV` - plaintext output at debug level
//! - `SHELLGRAM_LOG_FILE` - append to this file instead of stdout

pub mod redact;

use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use tracing::Level;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::logging::redact::RedactingMakeWriter;

static INIT_GUARD: OnceLock<()> = OnceLock::new();

pub const ENV_LOG_FILTER: &str = "SHELLGRAM_LOG";
pub const ENV_RUST_LOG: &str = "RUST_LOG";
pub const ENV_DEV: &str = "SHELLGRAM_DEV";
pub const ENV_LOG_FILE: &str = "SHELLGRAM_LOG_FILE";

/// Crate targets that get the default level; everything else stays at warn.
const OWN_TARGETS: [&str; 6] = [
    "shellgram",
    targets::GATEWAY,
    targets::TELEGRAM,
    targets::DISPATCH,
    targets::EXEC,
    targets::CONFIG,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plaintext,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutput {
    Stdout,
    Stderr,
    /// Appended to; created if missing.
    File(PathBuf),
}

/// Subscriber settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub format: LogFormat,
    pub output: LogOutput,
    /// Level for crate targets when no filter variable is set.
    pub default_level: Level,
    /// Explicit filter directives from `SHELLGRAM_LOG` or `RUST_LOG`.
    pub filter: Option<String>,
}

impl LogConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the settings from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let dev = lookup(ENV_DEV).is_some_and(|v| is_truthy(&v));
        let (format, default_level) = if dev {
            (LogFormat::Plaintext, Level::DEBUG)
        } else {
            (LogFormat::Json, Level::INFO)
        };
        let output = lookup(ENV_LOG_FILE)
            .filter(|v| !v.trim().is_empty())
            .map(|v| LogOutput::File(PathBuf::from(v)))
            .unwrap_or(LogOutput::Stdout);
        let filter = lookup(ENV_LOG_FILTER)
            .or_else(|| lookup(ENV_RUST_LOG))
            .filter(|v| !v.trim().is_empty());

        Self {
            format,
            output,
            default_level,
            filter,
        }
    }

    /// Filter directives the subscriber will be built with.
    pub fn filter_directives(&self) -> String {
        if let Some(filter) = &self.filter {
            return filter.clone();
        }
        let level = self.default_level.as_str().to_lowercase();
        let mut directives = String::from("warn");
        for target in OWN_TARGETS {
            directives.push_str(&format!(",{target}={level}"));
        }
        directives
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("cannot open log file: {0}")]
    FileCreation(#[from] io::Error),
    #[error("invalid log filter: {0}")]
    FilterParse(#[from] tracing_subscriber::filter::ParseError),
    #[error("logging already initialized")]
    AlreadyInitialized,
    #[error("cannot install subscriber: {0}")]
    TryInit(#[from] tracing_subscriber::util::TryInitError),
}

fn is_truthy(value: &str) -> bool {
    let value = value.trim();
    !value.is_empty() && value != "0" && !value.eq_ignore_ascii_case("false")
}

fn build_writer(output: &LogOutput) -> Result<BoxMakeWriter, LoggingError> {
    Ok(match output {
        LogOutput::Stdout => BoxMakeWriter::new(RedactingMakeWriter::new(io::stdout)),
        LogOutput::Stderr => BoxMakeWriter::new(RedactingMakeWriter::new(io::stderr)),
        LogOutput::File(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            BoxMakeWriter::new(RedactingMakeWriter::new(Mutex::new(file)))
        }
    })
}

fn build_fmt_layer(
    format: LogFormat,
    writer: BoxMakeWriter,
    filter: EnvFilter,
) -> Box<dyn Layer<Registry> + Send + Sync> {
    let timer = UtcTime::rfc_3339();
    match format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_timer(timer)
            .with_target(true)
            .with_current_span(false)
            .with_writer(writer)
            .with_filter(filter)
            .boxed(),
        LogFormat::Plaintext => tracing_subscriber::fmt::layer()
            .with_timer(timer)
            .with_target(true)
            .with_ansi(false)
            .with_writer(writer)
            .with_filter(filter)
            .boxed(),
    }
}

/// Install the global subscriber. Only the first call succeeds.
pub fn init_logging(config: &LogConfig) -> Result<(), LoggingError> {
    if INIT_GUARD.set(()).is_err() {
        return Err(LoggingError::AlreadyInitialized);
    }
    let filter = EnvFilter::try_new(config.filter_directives())?;
    let writer = build_writer(&config.output)?;
    tracing_subscriber::registry()
        .with(build_fmt_layer(config.format, writer, filter))
        .try_init()?;
    Ok(())
}

pub mod targets {
    /// Startup, shutdown and the message loop
    pub const GATEWAY: &str = "gateway";
    /// Bot API transport
    pub const TELEGRAM: &str = "telegram";
    /// Per-message routing
    pub const DISPATCH: &str = "dispatch";
    /// Subprocess execution
    pub const EXEC: &str = "exec";
    /// Configuration and registry loading
    pub const CONFIG: &str = "config";
}
