//! Palette - a command palette for a remote instance, driven through the
//! session you are already logged in with.
//!
//! Short text commands turn into navigation, REST calls and server-side
//! script runs. Commands never hold credentials: they ask a privileged
//! bridge to do the authenticated work and wait for its correlated reply.
//!
//! # Architecture
//!
//! - [`page`] - the hosting page: bridge request queue, install flag, and the
//!   session state only the bridge may read
//! - [`bridge`] - the privileged service and its wire types
//! - [`client`] - correlated requests to the bridge, script output parsing
//! - [`cache`] - TTL-bound name resolution for tables and remote sources
//! - [`commands`] - the command trait, registry and built-in commands
//! - [`app`] - wires everything together
//!
//! # Example
//!
//! ```ignore
//! use palette::{App, AppServices, Config};
//!
//! let config = Config::load();
//! let services = AppServices::from_config(&config)?;
//! let app = App::new(config, services)?;
//! app.dispatch("impersonate abel.tuter").await?;
//! ```

pub mod app;
pub mod bridge;
pub mod cache;
pub mod cli;
pub mod client;
pub mod commands;
pub mod config;
pub mod feedback;
pub mod navigation;
pub mod page;

mod error;

#[cfg(test)]
mod testing;

pub use app::{App, AppServices};
pub use client::BridgeClient;
pub use commands::{Command, CommandDescriptor, ExecutionContext, Registry};
pub use config::Config;
pub use error::{PaletteError, PaletteResult};
