//! Command registry.
//!
//! Loads the list of named commands from `commands.json` once at startup.
//! Each entry maps a chat directive `/name` to a script path relative to the
//! commands directory. The registry is read-only after loading.

use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::logging::targets;

/// Built-in directive that sends the welcome text and the help block.
pub const BUILTIN_START: &str = "start";
/// Built-in directive that sends the help block.
pub const BUILTIN_HELP: &str = "help";

/// Built-ins in the fixed order they are listed in help and menus.
pub const BUILTIN_COMMANDS: [(&str, &str); 2] = [
    (BUILTIN_START, "Welcome message"),
    (BUILTIN_HELP, "Show this help"),
];

const HELP_HEADER: &str = "Available commands:";

/// Registry errors
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("failed to read command list {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse command list {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("script path {script:?} for /{name} escapes the commands directory")]
    ScriptOutsideDir { name: String, script: String },
}

/// A registered command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// Directive name, matched against `/name`.
    #[serde(rename = "command")]
    pub name: String,
    /// Text shown in help and in the bot command menu.
    pub description: String,
    /// Script path relative to the commands directory.
    pub script: String,
}

/// Immutable list of commands plus the directory scripts resolve against.
#[derive(Debug, Clone, Default)]
pub struct CommandRegistry {
    commands: Vec<Command>,
    commands_dir: PathBuf,
}

impl CommandRegistry {
    /// Build a registry from an already loaded list.
    pub fn new(commands: Vec<Command>, commands_dir: impl Into<PathBuf>) -> Self {
        let registry = Self {
            commands,
            commands_dir: commands_dir.into(),
        };
        registry.warn_on_shadowed_names();
        registry
    }

    /// Load the registry from a JSON file.
    ///
    /// Any read error, malformed JSON, or entry with a missing or non-string
    /// field fails the whole load.
    pub fn load(path: &Path, commands_dir: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let content = fs::read_to_string(path).map_err(|source| RegistryError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&content, &path.display().to_string(), commands_dir)
    }

    /// Load the registry from JSON text.
    pub fn from_json(json: &str, commands_dir: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        Self::parse(json, "<inline>", commands_dir)
    }

    fn parse(
        content: &str,
        origin: &str,
        commands_dir: impl Into<PathBuf>,
    ) -> Result<Self, RegistryError> {
        let commands: Vec<Command> =
            serde_json::from_str(content).map_err(|source| RegistryError::Parse {
                path: origin.to_string(),
                source,
            })?;
        Ok(Self::new(commands, commands_dir))
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn commands_dir(&self) -> &Path {
        &self.commands_dir
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Find a command by name. The first entry in load order wins.
    pub fn find(&self, name: &str) -> Option<&Command> {
        self.commands.iter().find(|c| c.name == name)
    }

    /// Match a full message text of the form `/name` against the registry.
    pub fn match_directive(&self, text: &str) -> Option<&Command> {
        text.strip_prefix('/').and_then(|name| self.find(name))
    }

    /// Resolve a command's script against the commands directory.
    ///
    /// Absolute paths and `..` components are rejected; the file itself is
    /// not required to exist.
    pub fn resolve_script(&self, command: &Command) -> Result<PathBuf, RegistryError> {
        let script = Path::new(&command.script);
        let escapes = script.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        if escapes || command.script.trim().is_empty() {
            return Err(RegistryError::ScriptOutsideDir {
                name: command.name.clone(),
                script: command.script.clone(),
            });
        }
        Ok(self.commands_dir.join(script))
    }

    /// Render the help block: built-ins first, then registered commands in
    /// load order. Formatted for Markdown rendering.
    pub fn render_help(&self) -> String {
        let mut help = String::from(HELP_HEADER);
        help.push('\n');
        for (name, description) in self.menu_entries() {
            help.push_str(&format!("- `/{name}`: {description}\n"));
        }
        help
    }

    /// `(name, description)` pairs for the bot command menu, built-ins first.
    pub fn menu_entries(&self) -> Vec<(String, String)> {
        BUILTIN_COMMANDS
            .iter()
            .map(|(name, description)| (name.to_string(), description.to_string()))
            .chain(
                self.commands
                    .iter()
                    .map(|c| (c.name.clone(), c.description.clone())),
            )
            .collect()
    }

    fn warn_on_shadowed_names(&self) {
        let mut seen: HashSet<&str> = BUILTIN_COMMANDS.iter().map(|(name, _)| *name).collect();
        for command in &self.commands {
            if !seen.insert(command.name.as_str()) {
                warn!(
                    target: targets::CONFIG,
                    command = %command.name,
                    "command is shadowed by an earlier entry or a built-in and will never run"
                );
            }
        }
    }
}
