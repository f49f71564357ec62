use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    /// Returned by every serve loop once the server has been closed.
    #[error("server closed")]
    ServerClosed,

    #[error("missing dns handler")]
    MissingDnsHandler,

    #[error("missing http handler")]
    MissingHttpHandler,

    #[error("missing tls config")]
    MissingTlsConfig,

    #[error("failed to control socket cmsg, {0}")]
    Cmsg(#[source] io::Error),

    #[error("unexpected read err: {0}")]
    UnexpectedRead(#[source] io::Error),

    #[error("unexpected listener err: {0}")]
    UnexpectedAccept(#[source] io::Error),
}

impl ServerError {
    pub fn is_server_closed(&self) -> bool {
        matches!(self, ServerError::ServerClosed)
    }
}
