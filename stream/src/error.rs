use thiserror::Error;

/// Message-level streaming errors.
///
/// These are answered inline on the connection that sent the bad
/// message; they never close the socket. Only genuine transport
/// failures terminate a connection.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("stream: invalid message: {0}")]
    BadMessage(String),

    #[error("stream: bad image encoding: {0}")]
    BadEncoding(String),
}
