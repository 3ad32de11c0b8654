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

//! DIGEST-MD5 (RFC 2831), restricted to `qop=auth` and `algorithm=md5-sess`.

use md5::{Digest, Md5};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DigestError {
    #[error("missing directive {0:?}")]
    MissingDirective(&'static str),
    #[error("unsupported value {value:?} for directive {directive:?}")]
    Unsupported {
        directive: &'static str,
        value: String,
    },
    #[error("malformed directive list: {0:?}")]
    Malformed(String),
}

/// The server-issued challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
}

impl DigestChallenge {
    /// Issue a fresh challenge for the given realm.
    #[must_use]
    pub fn issue(realm: impl Into<String>) -> Self {
        use rand::Rng;
        let nonce = (0..30)
            .map(|_| {
                let alphabet = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
                alphabet[rand::thread_rng().gen_range(0..alphabet.len())] as char
            })
            .collect::<String>();

        Self {
            realm: realm.into(),
            nonce,
        }
    }

    #[must_use]
    pub fn to_wire(&self) -> String {
        format!(
            "realm=\"{}\",nonce=\"{}\",qop=\"auth\",charset=utf-8,algorithm=md5-sess",
            self.realm, self.nonce
        )
    }

    pub fn parse(raw: &str) -> Result<Self, DigestError> {
        let directives = directives(raw)?;
        let find = |key: &'static str| {
            directives
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
                .ok_or(DigestError::MissingDirective(key))
        };

        if let Ok(qop) = find("qop") {
            if !qop.split(',').any(|q| q.trim() == "auth") {
                return Err(DigestError::Unsupported {
                    directive: "qop",
                    value: qop,
                });
            }
        }

        Ok(Self {
            realm: find("realm").unwrap_or_default(),
            nonce: find("nonce")?,
        })
    }
}

/// The client response, either parsed from the wire or computed locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestResponse {
    pub username: String,
    pub realm: String,
    pub nonce: String,
    pub cnonce: String,
    pub nc: String,
    pub digest_uri: String,
    pub response: String,
}

impl DigestResponse {
    pub fn parse(raw: &str) -> Result<Self, DigestError> {
        let directives = directives(raw)?;
        let find = |key: &'static str| {
            directives
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
                .ok_or(DigestError::MissingDirective(key))
        };

        if let Ok(qop) = find("qop") {
            if qop != "auth" {
                return Err(DigestError::Unsupported {
                    directive: "qop",
                    value: qop,
                });
            }
        }

        Ok(Self {
            username: find("username")?,
            realm: find("realm").unwrap_or_default(),
            nonce: find("nonce")?,
            cnonce: find("cnonce")?,
            nc: find("nc")?,
            digest_uri: find("digest-uri")?,
            response: find("response")?,
        })
    }

    /// Build a response to `challenge` for the given identity.
    #[must_use]
    pub fn compute(
        challenge: &DigestChallenge,
        username: &str,
        password: &str,
        cnonce: &str,
        digest_uri: &str,
    ) -> Self {
        let mut out = Self {
            username: username.to_owned(),
            realm: challenge.realm.clone(),
            nonce: challenge.nonce.clone(),
            cnonce: cnonce.to_owned(),
            nc: "00000001".to_owned(),
            digest_uri: digest_uri.to_owned(),
            response: String::new(),
        };
        out.response = out.expected(password, "AUTHENTICATE");
        out
    }

    #[must_use]
    pub fn to_wire(&self) -> String {
        format!(
            "charset=utf-8,username=\"{}\",realm=\"{}\",nonce=\"{}\",nc={},cnonce=\"{}\",\
             digest-uri=\"{}\",response={},qop=auth",
            self.username, self.realm, self.nonce, self.nc, self.cnonce, self.digest_uri,
            self.response
        )
    }

    /// Check the client-supplied response value against the shared secret.
    #[must_use]
    pub fn verify(&self, password: &str) -> bool {
        self.response == self.expected(password, "AUTHENTICATE")
    }

    /// The `rspauth` value proving the server also knows the secret.
    #[must_use]
    pub fn rspauth(&self, password: &str) -> String {
        self.expected(password, "")
    }

    /// RFC 2831 section 2.1.2.1, `md5-sess` with `qop=auth`.
    fn expected(&self, password: &str, method: &str) -> String {
        let a1_prefix = Md5::digest(format!("{}:{}:{password}", self.username, self.realm));

        let mut a1 = a1_prefix.to_vec();
        a1.extend_from_slice(format!(":{}:{}", self.nonce, self.cnonce).as_bytes());
        let ha1 = hex(&Md5::digest(&a1));

        let ha2 = hex(&Md5::digest(format!("{method}:{}", self.digest_uri)));

        hex(&Md5::digest(format!(
            "{ha1}:{}:{}:{}:auth:{ha2}",
            self.nonce, self.nc, self.cnonce
        )))
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Split a `key=value,key="value"` directive list, quotes removed.
fn directives(raw: &str) -> Result<Vec<(String, String)>, DigestError> {
    let mut out = vec![];
    let mut rest = raw.trim();

    while !rest.is_empty() {
        let (key, after_key) = rest
            .split_once('=')
            .ok_or_else(|| DigestError::Malformed(rest.to_owned()))?;

        let (value, remaining) = if let Some(quoted) = after_key.strip_prefix('"') {
            let end = quoted
                .find('"')
                .ok_or_else(|| DigestError::Malformed(rest.to_owned()))?;
            (&quoted[..end], quoted[end + 1..].trim_start_matches(','))
        } else {
            match after_key.split_once(',') {
                Some((value, remaining)) => (value, remaining),
                None => (after_key, ""),
            }
        };

        out.push((key.trim().to_owned(), value.to_owned()));
        rest = remaining.trim();
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Worked example from RFC 2831 section 4.
    fn rfc_response() -> DigestResponse {
        DigestResponse::compute(
            &DigestChallenge {
                realm: "elwood.innosoft.com".to_owned(),
                nonce: "OA6MG9tEQGm2hh".to_owned(),
            },
            "chris",
            "secret",
            "OA6MHXh6VqTrRk",
            "imap/elwood.innosoft.com",
        )
    }

    #[test]
    fn rfc_2831_response_value() {
        assert_eq!(rfc_response().response, "d388dad90d4bbd760a152321f2143af7");
    }

    #[test]
    fn rfc_2831_rspauth_value() {
        assert_eq!(
            rfc_response().rspauth("secret"),
            "ea40f60335c427b5527b84dbabcdfffd"
        );
    }

    #[test]
    fn verify_round_trip() {
        let response = rfc_response();
        assert!(response.verify("secret"));
        assert!(!response.verify("not-the-secret"));
    }

    #[test]
    fn wire_round_trip() {
        let response = rfc_response();
        let parsed = DigestResponse::parse(&response.to_wire()).unwrap();
        assert_eq!(parsed, response);
    }

    #[test]
    fn challenge_parsing() {
        let parsed = DigestChallenge::parse(
            "realm=\"elwood.innosoft.com\",nonce=\"OA6MG9tEQGm2hh\",qop=\"auth\",\
             algorithm=md5-sess,charset=utf-8",
        )
        .unwrap();
        assert_eq!(parsed.realm, "elwood.innosoft.com");
        assert_eq!(parsed.nonce, "OA6MG9tEQGm2hh");

        assert!(DigestChallenge::parse("realm=\"x\",qop=\"auth\"").is_err());
        assert!(matches!(
            DigestChallenge::parse("nonce=\"x\",qop=\"auth-conf\""),
            Err(DigestError::Unsupported { .. })
        ));
    }
}
