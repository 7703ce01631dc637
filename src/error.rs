use thiserror::Error;
use tokio::sync::mpsc;

use crate::backend::RawItem;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Reqwest Error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Backend body couldn't be decoded: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Backend rate limit hit")]
    RateLimited,

    #[error("Backend answered with status {0}")]
    Status(reqwest::StatusCode),

    #[error("Unknown shape: {0}")]
    UnknownShape(String),

    #[error("Price bounds are inverted: min {0} > max {1}")]
    InvalidPriceBounds(u64, u64),

    #[error("Io Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Tokio Join Error, couldn't await a task! {0}")]
    RuntimeJoin(#[from] tokio::task::JoinError),

    #[error("Couldn't send an item batch through a channel.")]
    RuntimeSendError,
}

impl Error {
    /// Whether retrying the call has any chance of helping.
    ///
    /// Decode failures count as transient: a garbled body is usually a server
    /// glitch, and the per-call retry budget bounds the damage when it isn't.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Reqwest(_) | Error::RateLimited | Error::Decode(_) => true,
            Error::Status(status) => status.is_server_error(),
            _ => false,
        }
    }
}

impl From<mpsc::error::SendError<Vec<RawItem>>> for Error {
    fn from(_value: mpsc::error::SendError<Vec<RawItem>>) -> Self {
        Error::RuntimeSendError
    }
}
