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
use super::Mechanism;
use base64::Engine;
use hmac::{Hmac, Mac};
use md5::Md5;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("response is not valid base64: {0}")]
    Base64(String),
    #[error("authentication canceled by the client")]
    Canceled,
    #[error("the client must not start with this mechanism")]
    ClientMustNotStart,
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// What the client claims to be, plus the material needed to check it
/// against the stored secret.
#[derive(Debug)]
pub enum Proof {
    /// PLAIN and LOGIN transmit the password itself.
    Password { authid: String, password: String },
    /// CRAM-MD5 transmits an HMAC over the challenge we issued.
    CramMd5 {
        authid: String,
        challenge: String,
        response_hex: String,
    },
    /// DIGEST-MD5 transmits the RFC 2831 response value.
    DigestMd5 { response: DigestResponse },
}

impl Proof {
    #[must_use]
    pub fn authid(&self) -> &str {
        match self {
            Self::Password { authid, .. } | Self::CramMd5 { authid, .. } => authid,
            Self::DigestMd5 { response } => &response.username,
        }
    }

    /// Check the proof against the password stored for this identity.
    #[must_use]
    pub fn verify(&self, expected_password: &str) -> bool {
        match self {
            Self::Password { password, .. } => password == expected_password,
            Self::CramMd5 {
                challenge,
                response_hex,
                ..
            } => &cram_md5_hex(challenge, expected_password) == response_hex,
            Self::DigestMd5 { response } => response.verify(expected_password),
        }
    }

    /// The confirmation payload DIGEST-MD5 requires after verification.
    #[must_use]
    pub fn confirmation(&self, expected_password: &str) -> Option<String> {
        match self {
            Self::DigestMd5 { response } => Some(base64_encode(&format!(
                "rspauth={}",
                response.rspauth(expected_password)
            ))),
            Self::Password { .. } | Self::CramMd5 { .. } => None,
        }
    }
}

/// Outcome of one step of the server-side exchange.
#[derive(Debug)]
pub enum ServerStep {
    /// Send `334 <payload>` and feed the next client line back in.
    Challenge(String),
    /// The exchange is complete, the proof awaits verification.
    Done(Proof),
    /// The exchange failed, reply 501/535 and drop the exchange.
    Failed(AuthError),
}

enum State {
    PlainExpectResponse,
    LoginExpectUsername,
    LoginExpectPassword { authid: String },
    CramExpectResponse { challenge: String },
    DigestExpectResponse { challenge: DigestChallenge },
    Complete,
}

/// Server side of one AUTH command.
pub struct ServerExchange {
    state: State,
}

impl ServerExchange {
    /// Begin an exchange, consuming the optional initial response of the
    /// AUTH command.
    #[must_use]
    pub fn start(
        mechanism: Mechanism,
        initial_response: Option<&str>,
        hostname: &str,
    ) -> (Self, ServerStep) {
        if mechanism.is_server_first() && initial_response.is_some() {
            return (
                Self {
                    state: State::Complete,
                },
                ServerStep::Failed(AuthError::ClientMustNotStart),
            );
        }

        let mut exchange = Self {
            state: match mechanism {
                Mechanism::Plain => State::PlainExpectResponse,
                Mechanism::Login => State::LoginExpectUsername,
                Mechanism::CramMd5 => State::CramExpectResponse {
                    challenge: cram_challenge(hostname),
                },
                Mechanism::DigestMd5 => State::DigestExpectResponse {
                    challenge: DigestChallenge::issue(hostname),
                },
            },
        };

        let step = match initial_response {
            // "AUTH PLAIN <response>" completes in one round trip, and
            // "AUTH LOGIN <username>" skips the first prompt.
            Some(initial) => exchange.step(initial),
            None => exchange.first_challenge(),
        };

        (exchange, step)
    }

    fn first_challenge(&self) -> ServerStep {
        match &self.state {
            State::PlainExpectResponse => ServerStep::Challenge(String::new()),
            State::LoginExpectUsername => ServerStep::Challenge(base64_encode("Username:")),
            State::CramExpectResponse { challenge } => {
                ServerStep::Challenge(base64_encode(challenge))
            }
            State::DigestExpectResponse { challenge } => {
                ServerStep::Challenge(base64_encode(&challenge.to_wire()))
            }
            State::LoginExpectPassword { .. } | State::Complete => {
                ServerStep::Failed(AuthError::Canceled)
            }
        }
    }

    /// Feed one client line into the exchange.
    pub fn step(&mut self, line: &str) -> ServerStep {
        if line.trim() == "*" {
            self.state = State::Complete;
            return ServerStep::Failed(AuthError::Canceled);
        }

        let decoded = match base64_decode(line.trim()) {
            Ok(decoded) => decoded,
            Err(e) => {
                self.state = State::Complete;
                return ServerStep::Failed(e);
            }
        };

        match std::mem::replace(&mut self.state, State::Complete) {
            State::PlainExpectResponse => parse_plain(&decoded),
            State::LoginExpectUsername => {
                self.state = State::LoginExpectPassword { authid: decoded };
                ServerStep::Challenge(base64_encode("Password:"))
            }
            State::LoginExpectPassword { authid } => ServerStep::Done(Proof::Password {
                authid,
                password: decoded,
            }),
            State::CramExpectResponse { challenge } => parse_cram(&decoded, challenge),
            State::DigestExpectResponse { .. } => match DigestResponse::parse(&decoded) {
                Ok(response) => ServerStep::Done(Proof::DigestMd5 { response }),
                Err(e) => ServerStep::Failed(AuthError::Malformed(e.to_string())),
            },
            State::Complete => ServerStep::Failed(AuthError::Canceled),
        }
    }
}

/// `authzid \0 authcid \0 password`, the authzid being ignored.
fn parse_plain(decoded: &str) -> ServerStep {
    let mut fields = decoded.split('\0');
    match (fields.next(), fields.next(), fields.next(), fields.next()) {
        (Some(_authzid), Some(authid), Some(password), None) if !authid.is_empty() => {
            ServerStep::Done(Proof::Password {
                authid: authid.to_owned(),
                password: password.to_owned(),
            })
        }
        _ => ServerStep::Failed(AuthError::Malformed(
            "expected authzid\\0authcid\\0password".to_owned(),
        )),
    }
}

fn parse_cram(decoded: &str, challenge: String) -> ServerStep {
    match decoded.rsplit_once(' ') {
        Some((authid, response_hex)) if !authid.is_empty() => ServerStep::Done(Proof::CramMd5 {
            authid: authid.to_owned(),
            challenge,
            response_hex: response_hex.to_owned(),
        }),
        _ => ServerStep::Failed(AuthError::Malformed(
            "expected 'authcid hex-digest'".to_owned(),
        )),
    }
}

/// `<random.unix-time@hostname>` per RFC 2195.
fn cram_challenge(hostname: &str) -> String {
    let pseudo = rand::random::<u32>();
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_secs());
    format!("<{pseudo}.{now}@{hostname}>")
}

pub(super) fn cram_md5_hex(challenge: &str, password: &str) -> String {
    #[allow(clippy::expect_used)]
    let mut mac = <Hmac<Md5> as Mac>::new_from_slice(password.as_bytes())
        .expect("hmac accepts keys of any length");
    mac.update(challenge.as_bytes());
    mac.finalize()
        .into_bytes()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

pub(super) fn base64_encode(payload: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(payload)
}

pub(super) fn base64_decode(line: &str) -> Result<String, AuthError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(line)
        .map_err(|e| AuthError::Base64(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| AuthError::Base64(e.to_string()))
}
