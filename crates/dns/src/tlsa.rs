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

//! TLSA records (RFC 6698), in the subset DANE for SMTP uses (RFC 7672).

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TlsaFromStrError {
    #[error("expected 'usage selector matching-type data', got {got:?}")]
    MissingField { got: String },
    #[error("field {field} is not a number in {got:?}")]
    NotANumber { field: &'static str, got: String },
    #[error("invalid hex data in {got:?}")]
    InvalidHex { got: String },
}

/// One TLSA record: `usage selector matching-type cert-association`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TlsaRecord {
    pub usage: u8,
    pub selector: u8,
    pub matching_type: u8,
    #[serde(with = "serde_hex")]
    pub data: Vec<u8>,
}

impl TlsaRecord {
    /// DANE for SMTP only honours DANE-TA(2) and DANE-EE(3) with known
    /// selectors and matching types; anything else is unusable and ignored.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        matches!(self.usage, 2 | 3)
            && matches!(self.selector, 0 | 1)
            && matches!(self.matching_type, 0 | 1 | 2)
    }

    /// The record constrains the end-entity certificate itself.
    #[must_use]
    pub const fn is_end_entity(&self) -> bool {
        self.usage == 3
    }
}

impl std::str::FromStr for TlsaRecord {
    type Err = TlsaFromStrError;

    /// Parse the presentation form, e.g. `3 1 1 abcdef...`. The certificate
    /// association data may contain whitespace.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut fields = s.split_ascii_whitespace();
        let mut number = |field: &'static str| {
            fields
                .next()
                .ok_or_else(|| TlsaFromStrError::MissingField { got: s.to_owned() })?
                .parse::<u8>()
                .map_err(|_| TlsaFromStrError::NotANumber {
                    field,
                    got: s.to_owned(),
                })
        };

        let usage = number("usage")?;
        let selector = number("selector")?;
        let matching_type = number("matching-type")?;

        let hex = fields.collect::<String>();
        if hex.is_empty() {
            return Err(TlsaFromStrError::MissingField { got: s.to_owned() });
        }

        Ok(Self {
            usage,
            selector,
            matching_type,
            data: decode_hex(&hex).ok_or_else(|| TlsaFromStrError::InvalidHex {
                got: s.to_owned(),
            })?,
        })
    }
}

impl std::fmt::Display for TlsaRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.usage,
            self.selector,
            self.matching_type,
            self.data.iter().map(|b| format!("{b:02x}")).collect::<String>()
        )
    }
}

fn decode_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect()
}

mod serde_hex {
    pub fn serialize<S: serde::Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&data.iter().map(|b| format!("{b:02x}")).collect::<String>())
    }

    pub fn deserialize<'de, D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<u8>, D::Error> {
        let raw = <String as serde::Deserialize>::deserialize(deserializer)?;
        super::decode_hex(&raw).ok_or_else(|| serde::de::Error::custom("invalid hex string"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presentation_round_trip() {
        let raw = "3 1 1 0c72ac70b745ac19998811b131d662c9ac69dbdbe7cb23e5b514b566 64c5d3d6";
        let record = raw.parse::<TlsaRecord>().unwrap();

        assert_eq!(record.usage, 3);
        assert_eq!(record.selector, 1);
        assert_eq!(record.matching_type, 1);
        assert_eq!(record.data.len(), 32);
        assert!(record.is_usable());
        assert!(record.is_end_entity());
    }

    #[rstest::rstest]
    #[case("3 1", "missing data")]
    #[case("3 1 1", "missing data")]
    #[case("x 1 1 aabb", "usage not a number")]
    #[case("3 1 1 xyz1", "bad hex")]
    #[case("3 1 1 abc", "odd hex length")]
    fn rejects_malformed_records(#[case] raw: &str, #[case] _why: &str) {
        assert!(raw.parse::<TlsaRecord>().is_err());
    }

    #[test]
    fn pkix_usages_are_unusable() {
        // PKIX-TA(0) and PKIX-CA(1) do not apply to opportunistic DANE.
        assert!(!"0 0 1 aabb".parse::<TlsaRecord>().unwrap().is_usable());
        assert!(!"1 0 1 aabb".parse::<TlsaRecord>().unwrap().is_usable());
        // Unknown selector.
        assert!(!"3 2 1 aabb".parse::<TlsaRecord>().unwrap().is_usable());
    }
}
