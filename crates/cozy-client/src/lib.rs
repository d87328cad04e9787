//! Cozy client SDK
//!
//! `Cozy` is the entry point: it owns the transport and the `AuthManager`
//! for one instance and makes authorized JSON requests. Configuration comes
//! from a TOML file (see `Config`) or is assembled by the caller.
//!
//! ```no_run
//! # async fn run() -> cozy_client::Result<()> {
//! let path = cozy_client::Config::resolve_path(None);
//! let config = cozy_client::Config::load(&path)?;
//! let cozy = cozy_client::Cozy::from_config(&config, None)?;
//! let usage = cozy.settings().disk_usage().await?;
//! println!("{:?} bytes used", usage.used);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;

pub use client::{Cozy, DiskUsage, Settings};
pub use config::{Config, CozyConfig, OAuthConfig};
pub use cozy_auth;
pub use error::{Error, Result};
