use thiserror::Error;

pub type Result<T> = std::result::Result<T, BrokerError>;

#[derive(Error, Debug)]
pub enum BrokerError {
    /// The peer went away (or the read side failed) before a whole frame arrived.
    /// Ends the connection quietly.
    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BrokerError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        BrokerError::MalformedFrame(msg.into())
    }
}
