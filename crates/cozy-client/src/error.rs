//! Facade error type

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Auth(#[from] cozy_auth::Error),

    #[error(transparent)]
    Config(#[from] common::Error),

    #[error("{method} {path} returned {status}: {body}")]
    Status {
        method: String,
        path: String,
        status: u16,
        body: String,
    },

    #[error("invalid JSON from {path}: {message}")]
    Decode { path: String, message: String },
}

pub type Result<T> = std::result::Result<T, Error>;
