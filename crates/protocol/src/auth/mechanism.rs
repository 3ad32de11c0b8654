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

/// SASL mechanisms supported on both sides of the engine.
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    Hash,
    strum::AsRefStr,
    strum::Display,
    strum::EnumString,
    strum::EnumVariantNames,
    serde_with::SerializeDisplay,
    serde_with::DeserializeFromStr,
)]
pub enum Mechanism {
    /// Single base64 response `\0authcid\0password`.
    #[strum(serialize = "PLAIN")]
    Plain,
    /// Obsolete two-prompt exchange, kept for interoperability.
    #[strum(serialize = "LOGIN")]
    Login,
    /// Server challenge answered by `authcid hex(hmac-md5)`.
    #[strum(serialize = "CRAM-MD5")]
    CramMd5,
    /// RFC 2831 challenge/response, `qop=auth` only.
    #[strum(serialize = "DIGEST-MD5")]
    DigestMd5,
}

impl Mechanism {
    /// Mechanisms sending the password in a reversible form must not be
    /// offered on an unencrypted connection.
    #[must_use]
    pub const fn is_dangerous_in_clair(self) -> bool {
        matches!(self, Self::Plain | Self::Login)
    }

    /// `true` when the exchange starts with a server challenge, so a client
    /// initial response is a protocol violation.
    #[must_use]
    pub const fn is_server_first(self) -> bool {
        matches!(self, Self::CramMd5 | Self::DigestMd5)
    }
}
