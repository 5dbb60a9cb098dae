//! Connection state machine for a single client session.
//!
//! Each session greets the client, then reads one request per read, answers
//! it, and goes back to reading. The session ends on end-of-stream or on the
//! first I/O error. Malformed requests are answered and do not end it.
//!
//! A request must arrive in one read of at most `READ_BUFFER_SIZE` bytes,
//! and one read is treated as exactly one request. Requests split across
//! reads, or several requests coalesced into one read, are rejected.

use crate::dataset::Dataset;
use crate::protocol::{
    Command, Parser, Response, GREETING, INVALID_COMMAND, NOTHING_FOUND,
};
use bytes::BytesMut;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{error, trace, warn};

/// Read buffer size
pub const READ_BUFFER_SIZE: usize = 4 * 1024;

/// Current state of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnState {
    /// Banner not yet written.
    Greeting,
    /// Waiting for the next request.
    AwaitingCommand,
    /// Running a parsed command.
    Dispatching(Command),
    /// Connection is being closed.
    Closed,
}

/// A single client connection.
pub struct Connection<S> {
    stream: S,
    dataset: Arc<Dataset>,
    buffer: BytesMut,
    state: ConnState,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Create a new connection in the greeting state.
    pub fn new(stream: S, dataset: Arc<Dataset>) -> Self {
        Self {
            stream,
            dataset,
            buffer: BytesMut::with_capacity(READ_BUFFER_SIZE),
            state: ConnState::Greeting,
        }
    }

    /// Drive the session until the client goes away.
    ///
    /// Returns `Ok` on a clean end-of-stream and the I/O error otherwise.
    /// Either way the stream is dropped when this returns.
    pub async fn run(mut self) -> io::Result<()> {
        loop {
            let state = std::mem::replace(&mut self.state, ConnState::Closed);
            self.state = match state {
                ConnState::Greeting => {
                    self.stream.write_all(GREETING).await?;
                    ConnState::AwaitingCommand
                }
                ConnState::AwaitingCommand => self.read_command().await?,
                ConnState::Dispatching(command) => {
                    self.dispatch(command).await?;
                    ConnState::AwaitingCommand
                }
                ConnState::Closed => return Ok(()),
            };
        }
    }

    /// Perform one read and parse it.
    async fn read_command(&mut self) -> io::Result<ConnState> {
        self.buffer.clear();
        let n = (&mut self.stream)
            .take(READ_BUFFER_SIZE as u64)
            .read_buf(&mut self.buffer)
            .await?;
        if n == 0 {
            trace!("Connection closed by client");
            return Ok(ConnState::Closed);
        }

        match Parser::parse(&self.buffer) {
            Ok(command) => {
                trace!(?command, "Processing command");
                Ok(ConnState::Dispatching(command))
            }
            Err(e) => {
                warn!(error = %e, "Parse error");
                self.stream.write_all(INVALID_COMMAND).await?;
                Ok(ConnState::AwaitingCommand)
            }
        }
    }

    /// Execute a command and write its response.
    async fn dispatch(&mut self, command: Command) -> io::Result<()> {
        match command {
            Command::Get { field, term } => {
                let records = self.dataset.find(&term);
                trace!(?field, %term, matches = records.len(), "Lookup complete");

                if records.is_empty() {
                    return self.stream.write_all(NOTHING_FOUND).await;
                }

                match Response::matches(&records) {
                    Ok(response) => self.stream.write_all(&response).await,
                    Err(e) => {
                        error!(error = %e, "Failed to encode response");
                        Ok(())
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::record;
    use tokio_test::io::Builder;

    fn dataset() -> Arc<Dataset> {
        Dataset::new(vec![
            record("Sindh", "4/4/2020"),
            record("Punjab", "5/4/2020"),
        ])
    }

    fn sindh_response() -> BytesMut {
        Response::matches(&[record("Sindh", "4/4/2020")]).unwrap()
    }

    #[tokio::test]
    async fn test_greets_and_closes_on_eof() {
        let stream = Builder::new().write(GREETING).build();
        Connection::new(stream, dataset()).run().await.unwrap();
    }

    #[tokio::test]
    async fn test_region_query() {
        let stream = Builder::new()
            .write(GREETING)
            .read(b"{\"query\": {\"region\": \"Sindh\"}}\n")
            .write(&sindh_response())
            .build();
        Connection::new(stream, dataset()).run().await.unwrap();
    }

    #[tokio::test]
    async fn test_date_query() {
        let stream = Builder::new()
            .write(GREETING)
            .read(b"{\"query\": {\"date\": \"4/4/2020\"}}")
            .write(&sindh_response())
            .build();
        Connection::new(stream, dataset()).run().await.unwrap();
    }

    #[tokio::test]
    async fn test_nothing_found() {
        let stream = Builder::new()
            .write(GREETING)
            .read(b"{\"query\": {\"region\": \"Balochistan\"}}\n")
            .write(NOTHING_FOUND)
            .build();
        Connection::new(stream, dataset()).run().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_command_keeps_session_open() {
        let stream = Builder::new()
            .write(GREETING)
            .read(b"{\"query\": {\"region\":\"Sindh\"}}\n")
            .write(INVALID_COMMAND)
            .read(b"hello\n")
            .write(INVALID_COMMAND)
            .read(b"{\"query\": {\"region\": \"Sindh\"}}\n")
            .write(&sindh_response())
            .build();
        Connection::new(stream, dataset()).run().await.unwrap();
    }

    #[tokio::test]
    async fn test_wildcard_returns_all() {
        let all = Response::matches(dataset().records()).unwrap();
        let stream = Builder::new()
            .write(GREETING)
            .read(b"{\"query\": {\"region\": \"*\"}}\n")
            .write(&all)
            .build();
        Connection::new(stream, dataset()).run().await.unwrap();
    }

    #[tokio::test]
    async fn test_read_error_closes_without_response() {
        let stream = Builder::new()
            .write(GREETING)
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();
        let err = Connection::new(stream, dataset()).run().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }

    #[tokio::test]
    async fn test_greeting_write_error_is_fatal() {
        let stream = Builder::new()
            .write_error(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
            .build();
        let err = Connection::new(stream, dataset()).run().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn test_requests_answered_in_order() {
        let stream = Builder::new()
            .write(GREETING)
            .read(b"{\"query\": {\"region\": \"KPK\"}}\n")
            .write(NOTHING_FOUND)
            .read(b"{\"query\": {\"date\": \"4/4\"}}\n")
            .write(&sindh_response())
            .build();
        Connection::new(stream, dataset()).run().await.unwrap();
    }
}
