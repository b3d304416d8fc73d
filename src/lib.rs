//! shellgram library
//!
//! Telegram gateway that lets a single allow-listed user run registered
//! scripts, and optionally arbitrary shell command lines, on the host.

pub mod channels;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod exec;
pub mod gateway;
pub mod logging;
pub mod registry;
