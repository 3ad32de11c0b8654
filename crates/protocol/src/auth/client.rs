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

use super::digest::{DigestChallenge, DigestResponse};
use super::server::{base64_decode, base64_encode, cram_md5_hex, AuthError};
use super::{Credentials, Mechanism};

enum State {
    Fresh,
    LoginSentUsername,
    DigestSentResponse,
    Complete,
}

/// Client side of one AUTH command: turns server challenges into responses.
pub struct ClientExchange {
    mechanism: Mechanism,
    credentials: Credentials,
    /// `smtp/<server-name>`, used by DIGEST-MD5 only.
    digest_uri: String,
    state: State,
}

impl ClientExchange {
    #[must_use]
    pub fn new(mechanism: Mechanism, credentials: Credentials, server_name: &str) -> Self {
        Self {
            mechanism,
            credentials,
            digest_uri: format!("smtp/{server_name}"),
            state: State::Fresh,
        }
    }

    /// The initial response to put on the AUTH line itself, when the
    /// mechanism permits one.
    #[must_use]
    pub fn initial_response(&self) -> Option<String> {
        match self.mechanism {
            Mechanism::Plain => Some(base64_encode(&format!(
                "\0{}\0{}",
                self.credentials.authid, self.credentials.authpass
            ))),
            Mechanism::Login | Mechanism::CramMd5 | Mechanism::DigestMd5 => None,
        }
    }

    /// Answer one `334` challenge.
    pub fn respond(&mut self, challenge_b64: &str) -> Result<String, AuthError> {
        match (self.mechanism, &self.state) {
            (Mechanism::Plain, _) => {
                self.state = State::Complete;
                Ok(base64_encode(&format!(
                    "\0{}\0{}",
                    self.credentials.authid, self.credentials.authpass
                )))
            }
            // The two LOGIN prompts are answered in order, whatever their text.
            (Mechanism::Login, State::Fresh) => {
                self.state = State::LoginSentUsername;
                Ok(base64_encode(&self.credentials.authid))
            }
            (Mechanism::Login, _) => {
                self.state = State::Complete;
                Ok(base64_encode(&self.credentials.authpass))
            }
            (Mechanism::CramMd5, _) => {
                let challenge = base64_decode(challenge_b64)?;
                self.state = State::Complete;
                Ok(base64_encode(&format!(
                    "{} {}",
                    self.credentials.authid,
                    cram_md5_hex(&challenge, &self.credentials.authpass)
                )))
            }
            (Mechanism::DigestMd5, State::Fresh) => {
                let challenge = DigestChallenge::parse(&base64_decode(challenge_b64)?)
                    .map_err(|e| AuthError::Malformed(e.to_string()))?;

                let cnonce = format!("{:08x}{:08x}", rand::random::<u32>(), rand::random::<u32>());
                let response = DigestResponse::compute(
                    &challenge,
                    &self.credentials.authid,
                    &self.credentials.authpass,
                    &cnonce,
                    &self.digest_uri,
                );

                self.state = State::DigestSentResponse;
                Ok(base64_encode(&response.to_wire()))
            }
            // The rspauth confirmation is acknowledged with an empty line.
            (Mechanism::DigestMd5, _) => {
                self.state = State::Complete;
                Ok(String::new())
            }
        }
    }
}
