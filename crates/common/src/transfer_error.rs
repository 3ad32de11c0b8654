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

use robin_protocol::ReplyCode;

/// Class of the security policy attached to a next-hop candidate, ordered
/// from weakest to strongest.
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    strum::Display,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum PolicyClass {
    Opportunistic,
    MtaStsTesting,
    MtaStsEnforce,
    DaneMandatory,
}

/// Errors produced by an SMTP exchange with a remote server.
#[derive(Debug, Clone, thiserror::Error, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
    /// Failed to parse the reply of the server
    #[error("failed to parse the reply of the server: source={}",
        with_source
            .as_ref()
            .map_or("null", String::as_str)
    )]
    ReplyParsing {
        /// The source of the error
        with_source: Option<String>,
    },

    /// The server replied with a permanent error `5xx`
    #[error("permanent error: {reply}: {}",
        with_source
            .as_ref()
            .map_or("null", String::as_str)
    )]
    Permanent {
        /// The reply code
        reply: ReplyCode,
        /// The source of the error
        with_source: Option<String>,
    },

    /// The server replied with a transient error `4xx`
    #[error("transient error: {reply}: {}",
        with_source
            .as_ref()
            .map_or("null", String::as_str)
    )]
    Transient {
        /// The reply code
        reply: ReplyCode,
        /// The source of the error
        with_source: Option<String>,
    },

    /// Error caused by the TLS layer
    #[error("tls: {}",
        with_source
            .as_ref()
            .map_or("null", String::as_str)
    )]
    Tls {
        /// The source of the error
        with_source: Option<String>,
    },

    /// The security policy of the candidate could not be satisfied
    #[error("policy {class}: {}",
        with_source
            .as_ref()
            .map_or("null", String::as_str)
    )]
    Policy {
        /// Class of the policy that failed
        class: PolicyClass,
        /// The source of the error
        with_source: Option<String>,
    },

    /// Internal error of the client
    #[error("client: {}",
        with_source
            .as_ref()
            .map_or("null", String::as_str)
    )]
    Client {
        /// The source of the error
        with_source: Option<String>,
    },

    /// Error due to the underlying connection
    #[error("connection: {}",
        with_source
            .as_ref()
            .map_or("null", String::as_str)
    )]
    Connection {
        /// The source of the error
        with_source: Option<String>,
    },
}

impl Delivery {
    /// Classify a non-2xx reply received during the exchange.
    #[must_use]
    pub fn from_reply(reply: &robin_protocol::Reply) -> Self {
        if reply.code().value() / 100 == 5 {
            Self::Permanent {
                reply: reply.code().clone(),
                with_source: Some(reply.text()),
            }
        } else {
            Self::Transient {
                reply: reply.code().clone(),
                with_source: Some(reply.text()),
            }
        }
    }

    /// A permanent failure must not be retried.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent { .. })
    }
}

impl From<std::io::Error> for Delivery {
    #[inline]
    fn from(err: std::io::Error) -> Self {
        Self::Connection {
            with_source: Some(err.to_string()),
        }
    }
}

impl From<robin_protocol::Error> for Delivery {
    #[inline]
    fn from(err: robin_protocol::Error) -> Self {
        match &err {
            robin_protocol::Error::ReplyParsing(source) => Self::ReplyParsing {
                with_source: Some(source.clone()),
            },
            _ => Self::Connection {
                with_source: Some(err.to_string()),
            },
        }
    }
}
