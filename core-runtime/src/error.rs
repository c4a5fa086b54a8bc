use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A value is out of range, or the logging setup was rejected.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The configuration document could not be parsed.
    #[error("Invalid configuration document: {0}")]
    InvalidDocument(String),
}

pub type Result<T> = std::result::Result<T, Error>;
