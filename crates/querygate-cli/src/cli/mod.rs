//! # CLI Behavior
//!
//! This is **one possible transport** for querygate, not the gateway itself.
//! It serves the bundled blog entities over a JSON snapshot file, which makes
//! it handy for exploring a configuration and for scripting fixtures.
//!
//! ## Commands
//!
//! - `qgate routes`: the route table an HTTP router would mount
//! - `qgate list <alias> [KEY=VALUE...]`: the list endpoint; keys are the
//!   query-string keys (`status[in]=draft,pending`, `sort=-created_at`,
//!   `version=2024-06-01`, `cursor=...`)
//! - `qgate action <alias> <name> [--id N] [--payload JSON]`: any action
//! - `qgate config show|template`: effective configuration, or a template
//!
//! `--actor ID` and `--role ROLE` set the caller. Without `--actor` requests
//! are anonymous.
//!
//! ## Module Structure
//!
//! - `commands`: context setup and per-command handlers
//! - `render`: output formatting
//! - `setup`: argument parsing via clap

mod commands;
mod render;
pub mod setup;

pub use commands::{report, run};
