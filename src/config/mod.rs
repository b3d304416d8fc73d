//! Configuration loading module
//!
//! All runtime configuration comes from environment variables, optionally
//! seeded from a `.env` file in the working directory. The result is a single
//! immutable [`GatewayConfig`] built once at startup and passed by reference.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::channels::telegram::TELEGRAM_DEFAULT_API_BASE_URL;

/// Bot API token.
pub const ENV_BOT_TOKEN: &str = "TELEGRAM_BOT_TOKEN";
/// Server label shown in the welcome text.
pub const ENV_SERVER_NAME: &str = "SERVER_NAME";
/// The single Telegram user id allowed to talk to the bot.
pub const ENV_ALLOWED_USER_ID: &str = "ALLOWED_TELEGRAM_USER_ID";
/// Free-form shell switch; only the literal `yes` enables it.
pub const ENV_OTHER_COMMANDS: &str = "OTHER_COMMANDS";
pub const ENV_COMMANDS_DIR: &str = "SHELLGRAM_COMMANDS_DIR";
pub const ENV_COMMANDS_FILE: &str = "SHELLGRAM_COMMANDS_FILE";
pub const ENV_API_BASE_URL: &str = "TELEGRAM_API_BASE_URL";
pub const ENV_EXEC_TIMEOUT_SECS: &str = "SHELLGRAM_EXEC_TIMEOUT_SECS";

/// Default directory holding the command scripts and `commands.json`.
pub const DEFAULT_COMMANDS_DIR: &str = "commands";
/// Registry file name inside the commands directory.
pub const COMMANDS_FILE_NAME: &str = "commands.json";

/// Value of `OTHER_COMMANDS` that enables free-form execution.
const FREE_FORM_ENABLED_VALUE: &str = "yes";

/// Configuration errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} is not set")]
    MissingEnvVar { var: &'static str },

    #[error("{var} must not be empty")]
    EmptyEnvVar { var: &'static str },

    #[error("invalid {var}: {value:?} is not an integer")]
    InvalidUserId { var: &'static str, value: String },

    #[error("invalid {var}: {value:?} is not a positive number of seconds")]
    InvalidTimeout { var: &'static str, value: String },
}

/// Immutable gateway configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub bot_token: String,
    pub server_name: String,
    pub allowed_user_id: i64,
    pub free_form_enabled: bool,
    pub commands_dir: PathBuf,
    pub commands_file: PathBuf,
    pub api_base_url: String,
    pub exec_timeout: Option<Duration>,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("bot_token", &"<redacted>")
            .field("server_name", &self.server_name)
            .field("allowed_user_id", &self.allowed_user_id)
            .field("free_form_enabled", &self.free_form_enabled)
            .field("commands_dir", &self.commands_dir)
            .field("commands_file", &self.commands_file)
            .field("api_base_url", &self.api_base_url)
            .field("exec_timeout", &self.exec_timeout)
            .finish()
    }
}

impl GatewayConfig {
    /// Build the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable lookup.
    ///
    /// `lookup` returns `None` for unset variables. Tests use this to inject
    /// values without mutating the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bot_token = require_non_empty(&lookup, ENV_BOT_TOKEN)?;
        let server_name = require_non_empty(&lookup, ENV_SERVER_NAME)?;

        let raw_user_id = require_non_empty(&lookup, ENV_ALLOWED_USER_ID)?;
        let allowed_user_id =
            raw_user_id
                .trim()
                .parse::<i64>()
                .map_err(|_| ConfigError::InvalidUserId {
                    var: ENV_ALLOWED_USER_ID,
                    value: raw_user_id.clone(),
                })?;

        // Absence is fatal; any value other than "yes" (empty included) disables.
        let other_commands = lookup(ENV_OTHER_COMMANDS).ok_or(ConfigError::MissingEnvVar {
            var: ENV_OTHER_COMMANDS,
        })?;
        let free_form_enabled = other_commands == FREE_FORM_ENABLED_VALUE;

        let commands_dir = optional(&lookup, ENV_COMMANDS_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_COMMANDS_DIR));
        let commands_file = optional(&lookup, ENV_COMMANDS_FILE)
            .map(PathBuf::from)
            .unwrap_or_else(|| commands_dir.join(COMMANDS_FILE_NAME));

        let api_base_url = optional(&lookup, ENV_API_BASE_URL)
            .unwrap_or_else(|| TELEGRAM_DEFAULT_API_BASE_URL.to_string());

        let exec_timeout = match optional(&lookup, ENV_EXEC_TIMEOUT_SECS) {
            Some(raw) => Some(parse_timeout(&raw)?),
            None => None,
        };

        Ok(Self {
            bot_token,
            server_name,
            allowed_user_id,
            free_form_enabled,
            commands_dir,
            commands_file,
            api_base_url,
            exec_timeout,
        })
    }
}

/// Load `.env` from the working directory if one exists.
///
/// Returns the path that was loaded, or `None` when there is no `.env` file.
/// A `.env` that exists but cannot be parsed is still an error.
pub fn load_dotenv() -> Result<Option<PathBuf>, dotenvy::Error> {
    match dotenvy::dotenv() {
        Ok(path) => Ok(Some(path)),
        Err(e) if e.not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

fn require_non_empty<F>(lookup: &F, var: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Err(ConfigError::MissingEnvVar { var }),
        Some(value) if value.trim().is_empty() => Err(ConfigError::EmptyEnvVar { var }),
        Some(value) => Ok(value),
    }
}

fn optional<F>(lookup: &F, var: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(var)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_timeout(raw: &str) -> Result<Duration, ConfigError> {
    match raw.parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(ConfigError::InvalidTimeout {
            var: ENV_EXEC_TIMEOUT_SECS,
            value: raw.to_string(),
        }),
    }
}
