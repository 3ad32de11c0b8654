/*
 * Robin mail transfer agent
 *
 * Copyright (C) 2024 - the Robin authors
 * Licensed under the Elastic License 2.0
 *
 * You should have received a copy of the Elastic License 2.0 along with
 * this program. If not, see https://www.elastic.co/licensing/elastic-license.
 *
 */

/// Error raised while reading or writing the wire.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("read timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("buffer is longer than expected: {expected} < {got}")]
    BufferTooLong { expected: usize, got: usize },
    #[error("the peer closed the connection")]
    UnexpectedEof,
    #[error("failed to parse the reply of the server: {0}")]
    ReplyParsing(String),
}

impl Error {
    /// A timeout or a closed socket, as opposed to a malformed exchange.
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Timeout(_) | Self::UnexpectedEof)
    }
}
