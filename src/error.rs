//! Main Crate Error

#[derive(thiserror::Error, Debug)]
/// Kadwalk crate error enum.
pub enum Error {
    /// Ids are exactly [crate::ID_SIZE] bytes.
    #[error("Invalid Id size, expected 20, got {0}")]
    InvalidIdSize(usize),

    /// Ids are parsed from 40 hexadecimal characters.
    #[error("Invalid Id encoding: {0}")]
    InvalidIdEncoding(String),

    /// Settings that can't drive a lookup.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(&'static str),

    #[error(transparent)]
    /// Transparent [std::io::Error]
    IO(#[from] std::io::Error),
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Dht's actor thread was shutdown")]
/// The actor thread of a [crate::Dht] is no longer running.
pub struct DhtWasShutdown;
