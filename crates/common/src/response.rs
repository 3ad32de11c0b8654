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

use crate::extensions::{self, Extension};
use crate::transfer_error::Delivery;
use robin_protocol::Reply;

/// The parsed reply to an EHLO command.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Ehlo {
    reply: Reply,
    server_name: String,
    extensions: Vec<(Extension, String)>,
}

impl Ehlo {
    #[must_use]
    pub fn contains(&self, extension: Extension) -> bool {
        self.extensions.iter().any(|(e, _)| *e == extension)
    }

    /// Arguments of an advertised extension (e.g. the SIZE limit or the
    /// AUTH mechanism list).
    #[must_use]
    pub fn args(&self, extension: Extension) -> Option<&str> {
        self.extensions
            .iter()
            .find(|(e, _)| *e == extension)
            .map(|(_, args)| args.trim())
    }

    #[must_use]
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    #[must_use]
    pub const fn reply(&self) -> &Reply {
        &self.reply
    }
}

impl TryFrom<Reply> for Ehlo {
    type Error = Delivery;

    fn try_from(reply: Reply) -> Result<Self, Self::Error> {
        let code = reply.code();
        if code.value() != 250 {
            return Err(Delivery::ReplyParsing {
                with_source: Some(format!("expect 250 on EHLO, got {}", code.value())),
            });
        }

        let mut lines = reply.lines();
        let server_name = lines
            .next()
            .ok_or(Delivery::ReplyParsing {
                with_source: Some("servername missing from ehlo response".to_owned()),
            })?
            .split_ascii_whitespace()
            .next()
            .unwrap_or_default()
            .to_owned();

        let extensions = lines
            .map(|l| extensions::from_str(l))
            .map(|(verb, args)| (verb, args.to_owned()))
            .collect::<Vec<_>>();

        Ok(Self {
            reply,
            server_name,
            extensions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_list() {
        let reply = "250-mx.example.com Greetings\r\n250-PIPELINING\r\n250-SIZE 20000000\r\n\
                     250-STARTTLS\r\n250-AUTH PLAIN CRAM-MD5\r\n250 CHUNKING\r\n"
            .parse::<Reply>()
            .unwrap();
        let ehlo = Ehlo::try_from(reply).unwrap();

        assert_eq!(ehlo.server_name(), "mx.example.com");
        assert!(ehlo.contains(Extension::Pipelining));
        assert!(ehlo.contains(Extension::StartTls));
        assert!(ehlo.contains(Extension::Chunking));
        assert_eq!(ehlo.args(Extension::Size), Some("20000000"));
        assert_eq!(ehlo.args(Extension::Auth), Some("PLAIN CRAM-MD5"));
        assert!(!ehlo.contains(Extension::Xclient));
    }

    #[test]
    fn rejects_non_250() {
        let reply = "502 not today\r\n".parse::<Reply>().unwrap();
        assert!(Ehlo::try_from(reply).is_err());
    }
}
