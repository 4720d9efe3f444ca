/// Error taxonomy shared by the dispatch and correlation engine
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Connect, login, TLS or submission failure. Retried on the next tick or reconnect.
    #[error("network error: {0}")]
    Network(String),
    /// The mailbox server answered something we did not expect (idle handshake, select, fetch).
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Bad input: missing recipient/body, unparsable address.
    #[error("invalid data: {0}")]
    Data(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// The receiving server refused this message for good (5xx reply).
    #[error("rejected by server: {0}")]
    Rejected(String),
    #[error("smtp error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
    #[error("address error: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("message build error: {0}")]
    MessageBuild(#[from] lettre::error::Error),
    #[error("imap error: {0}")]
    Imap(#[from] async_imap::error::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the failure is worth retrying with the same inputs.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Network(_) | Error::Protocol(_) | Error::Imap(_) | Error::Io(_) => true,
            Error::Smtp(e) => !e.is_permanent(),
            Error::Database(_) => true,
            Error::Data(_) | Error::Address(_) | Error::MessageBuild(_) | Error::Rejected(_) => false,
        }
    }
}

impl From<native_tls::Error> for Error {
    fn from(e: native_tls::Error) -> Self {
        Error::Network(format!("tls: {e}"))
    }
}
