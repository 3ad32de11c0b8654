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

use crate::{Error, Reply};
use tokio::io::AsyncReadExt;

/// Hard cap on a single command or reply line, base64 AUTH payloads included.
const MAX_LINE_LENGTH: usize = 8192;

/// Buffered, timeout-aware reader over one side of an SMTP connection.
pub struct Reader<R> {
    inner: R,
    buffer: Vec<u8>,
    timeout: std::time::Duration,
}

impl<R: tokio::io::AsyncRead + Unpin + Send> Reader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buffer: Vec::with_capacity(1024),
            timeout: std::time::Duration::from_secs(30),
        }
    }

    /// Replace the timeout applied to every read. Returns the previous value
    /// so the DATA path can restore it afterwards.
    pub fn set_timeout(&mut self, timeout: std::time::Duration) -> std::time::Duration {
        std::mem::replace(&mut self.timeout, timeout)
    }

    /// Give the transport back, dropping anything still buffered.
    ///
    /// Callers upgrade to TLS only at a point where the peer is waiting for
    /// our reply, so the buffer is empty there.
    pub fn into_inner(self) -> R {
        self.inner
    }

    async fn fill(&mut self) -> Result<(), Error> {
        let mut chunk = [0u8; 1024];
        let read = tokio::time::timeout(self.timeout, self.inner.read(&mut chunk))
            .await
            .map_err(|_elapsed| Error::Timeout(self.timeout))??;

        if read == 0 {
            return Err(Error::UnexpectedEof);
        }
        self.buffer.extend_from_slice(&chunk[..read]);
        Ok(())
    }

    /// Next CRLF-terminated line, terminator stripped.
    pub async fn read_line(&mut self) -> Result<String, Error> {
        let line = self.read_line_bytes().await?;
        Ok(String::from_utf8_lossy(&line).into_owned())
    }

    async fn read_line_bytes(&mut self) -> Result<Vec<u8>, Error> {
        loop {
            if let Some(at) = find_crlf(&self.buffer) {
                let mut line = self.buffer.drain(..at + 2).collect::<Vec<_>>();
                line.truncate(at);
                return Ok(line);
            }
            if self.buffer.len() > MAX_LINE_LENGTH {
                return Err(Error::BufferTooLong {
                    expected: MAX_LINE_LENGTH,
                    got: self.buffer.len(),
                });
            }
            self.fill().await?;
        }
    }

    /// Read a complete (possibly multi-line) reply from the peer.
    pub async fn read_reply(&mut self) -> Result<Reply, Error> {
        let mut raw = String::new();
        loop {
            let line = self.read_line().await?;
            let done = !is_continuation(&line);
            raw.push_str(&line);
            raw.push_str("\r\n");
            if done {
                break;
            }
        }
        raw.parse::<Reply>()
            .map_err(|e| Error::ReplyParsing(e.to_string()))
    }

    /// Read a DATA body up to the bare `.` terminator, transparency dots
    /// removed, CRLF line endings preserved.
    pub async fn read_data_body(&mut self, max_size: usize) -> Result<Vec<u8>, Error> {
        let mut body = Vec::new();
        loop {
            let line = self.read_line_bytes().await?;
            if line == b"." {
                return Ok(body);
            }
            let line = line.strip_prefix(b".").unwrap_or(&line);
            body.extend_from_slice(line);
            body.extend_from_slice(b"\r\n");
            if body.len() > max_size {
                return Err(Error::BufferTooLong {
                    expected: max_size,
                    got: body.len(),
                });
            }
        }
    }

    /// Read exactly `size` octets, as sent by a BDAT chunk.
    pub async fn read_exact_bytes(&mut self, size: usize) -> Result<Vec<u8>, Error> {
        while self.buffer.len() < size {
            self.fill().await?;
        }
        Ok(self.buffer.drain(..size).collect())
    }
}

fn find_crlf(buffer: &[u8]) -> Option<usize> {
    memchr::memchr_iter(b'\r', buffer).find(|&i| buffer.get(i + 1) == Some(&b'\n'))
}

/// A reply line is a continuation when the code is followed by a dash.
fn is_continuation(line: &str) -> bool {
    line.as_bytes().get(3) == Some(&b'-')
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn reader_over(input: &str) -> Reader<std::io::Cursor<Vec<u8>>> {
        Reader::new(std::io::Cursor::new(input.as_bytes().to_vec()))
    }

    #[tokio::test]
    async fn lines_and_eof() {
        let mut reader = reader_over("EHLO client.com\r\nQUIT\r\n").await;
        assert_eq!(reader.read_line().await.unwrap(), "EHLO client.com");
        assert_eq!(reader.read_line().await.unwrap(), "QUIT");
        assert!(matches!(
            reader.read_line().await,
            Err(Error::UnexpectedEof)
        ));
    }

    #[tokio::test]
    async fn multi_line_reply() {
        let mut reader = reader_over("250-one\r\n250-two\r\n250 three\r\n").await;
        let reply = reader.read_reply().await.unwrap();
        assert_eq!(reply.lines().count(), 3);
        assert_eq!(reply.code().value(), 250);
    }

    #[tokio::test]
    async fn data_body_transparency() {
        let mut reader = reader_over("line one\r\n..dotted\r\n.\r\n").await;
        let body = reader.read_data_body(1024).await.unwrap();
        assert_eq!(body, b"line one\r\n.dotted\r\n");
    }

    #[tokio::test]
    async fn bdat_chunk_is_exact() {
        let mut reader = reader_over("12345rest").await;
        assert_eq!(reader.read_exact_bytes(5).await.unwrap(), b"12345");
        assert_eq!(reader.read_exact_bytes(4).await.unwrap(), b"rest");
    }

    #[tokio::test]
    async fn oversized_line_is_rejected() {
        let mut reader = reader_over(&format!("{}\r\n", "x".repeat(MAX_LINE_LENGTH + 2))).await;
        assert!(matches!(
            reader.read_line().await,
            Err(Error::BufferTooLong { .. })
        ));
    }
}
