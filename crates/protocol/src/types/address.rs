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

use crate::Domain;

#[derive(Debug, thiserror::Error)]
pub enum AddressFromStrError {
    #[error("cannot parse {reason:?}")]
    CannotParse { reason: String },
}

/// Email address of an envelope path.
#[derive(Clone, Debug, Eq, serde_with::SerializeDisplay, serde_with::DeserializeFromStr)]
pub struct Address {
    at_sign: usize,
    full: String,
}

impl std::str::FromStr for Address {
    type Err = AddressFromStrError;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Err(error) = addr::parse_email_address(s) {
            return Err(AddressFromStrError::CannotParse {
                reason: error.to_string(),
            });
        }
        // `addr` guarantees the presence of the separator.
        s.find('@')
            .map(|at_sign| Self {
                at_sign,
                full: s.to_owned(),
            })
            .ok_or_else(|| AddressFromStrError::CannotParse {
                reason: format!("no '@' in {s:?}"),
            })
    }
}

impl PartialEq for Address {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.full == other.full
    }
}

impl std::hash::Hash for Address {
    #[inline]
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.full.hash(state);
    }
}

impl std::fmt::Display for Address {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full)
    }
}

impl Address {
    /// Get the full email address.
    #[must_use]
    #[inline]
    pub fn full(&self) -> &str {
        &self.full
    }

    /// Get the local part of the address.
    #[must_use]
    #[inline]
    pub fn local_part(&self) -> &str {
        &self.full[..self.at_sign]
    }

    /// Get the fqdn of the address.
    #[must_use]
    #[inline]
    #[allow(clippy::expect_used)]
    pub fn domain(&self) -> Domain {
        Domain::from_utf8(&self.full[self.at_sign + 1..])
            .expect("domain has been validated on construction")
    }
}
