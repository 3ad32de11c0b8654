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

use crate::Reply;
use tokio::io::AsyncWriteExt;

/// Write half of an SMTP connection.
pub struct Writer<W> {
    inner: W,
}

impl<W: tokio::io::AsyncWrite + Unpin + Send> Writer<W> {
    pub const fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    pub async fn write_all(&mut self, command: &str) -> std::io::Result<()> {
        self.inner.write_all(command.as_bytes()).await?;
        self.inner.flush().await
    }

    pub async fn write_all_bytes(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.inner.write_all(bytes).await?;
        self.inner.flush().await
    }

    pub async fn write_reply(&mut self, reply: &Reply) -> std::io::Result<()> {
        self.write_all(&reply.to_string()).await
    }

    /// Write a message body for DATA: transparency dots added, CRLF line
    /// endings enforced, terminated by the bare dot line.
    pub async fn write_message_body(&mut self, body: &[u8]) -> std::io::Result<()> {
        for line in split_lines(body) {
            if line.first() == Some(&b'.') {
                self.inner.write_all(b".").await?;
            }
            self.inner.write_all(line).await?;
            self.inner.write_all(b"\r\n").await?;
        }
        self.inner.write_all(b".\r\n").await?;
        self.inner.flush().await
    }
}

/// Split on CRLF or bare LF, final unterminated line included.
fn split_lines(body: &[u8]) -> Vec<&[u8]> {
    let mut lines = body
        .split(|&b| b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
        .collect::<Vec<_>>();

    // A trailing newline produces one empty slice, not an empty line.
    if body.last() == Some(&b'\n') {
        lines.pop();
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn written(body: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        {
            let mut writer = Writer::new(&mut out);
            writer.write_message_body(body).await.unwrap();
        }
        out
    }

    #[tokio::test]
    async fn terminates_with_a_bare_dot() {
        assert_eq!(written(b"hello\r\nworld\r\n").await, b"hello\r\nworld\r\n.\r\n");
    }

    #[tokio::test]
    async fn stuffs_leading_dots() {
        assert_eq!(written(b".hidden\r\n").await, b"..hidden\r\n.\r\n");
    }

    #[tokio::test]
    async fn normalizes_bare_lf() {
        assert_eq!(written(b"a\nb").await, b"a\r\nb\r\n.\r\n");
    }
}
