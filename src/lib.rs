//! mongo-tail: follow MongoDB collections and emit their documents as flat events.
//!
//! The engine itself lives in the workspace crates; this package wires them
//! to a command line:
//!
//! - [`config`] - `run` flags, TOML settings file and defaults
//! - [`output`] - JSON-lines writer on the receiving end of the event queue

pub mod config;
pub mod output;

pub use config::{RunArgs, RunSettings, SettingsFile};
pub use output::write_events;
