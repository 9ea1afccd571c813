use crate::mqtt::ConnectionError;
use crate::source::SourceError;
use thiserror::Error;

/// Fatal relay errors. Everything else is logged and the loop moves on.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Data source unavailable: {0}")]
    SourceUnavailable(#[from] SourceError),

    #[error("Could not start broker connection: {0}")]
    ConnectionSetup(#[from] ConnectionError),

    #[error("Broker connection to {0} was rejected")]
    ConnectionRejected(String),
}
