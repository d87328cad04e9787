//! Types shared by the cozy client crates

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
