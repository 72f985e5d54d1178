//! Error handling for vellum

use std::io;
use thiserror::Error;

/// The main error type for vellum operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Generic(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid argument: {0}")]
    Argument(String),
    #[error("Limit exceeded: {0}")]
    Limit(String),
    #[error("Unsupported: {0}")]
    Unsupported(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Structure error: {0}")]
    Structure(String),
    #[error("Unexpected end of file")]
    Eof,
}

impl Error {
    pub fn generic<S: Into<String>>(msg: S) -> Self {
        Error::Generic(msg.into())
    }
    pub fn argument<S: Into<String>>(msg: S) -> Self {
        Error::Argument(msg.into())
    }
    pub fn limit<S: Into<String>>(msg: S) -> Self {
        Error::Limit(msg.into())
    }
    pub fn unsupported<S: Into<String>>(msg: S) -> Self {
        Error::Unsupported(msg.into())
    }
    pub fn parse<S: Into<String>>(msg: S) -> Self {
        Error::Parse(msg.into())
    }
    pub fn structure<S: Into<String>>(msg: S) -> Self {
        Error::Structure(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
