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

//! MTA-STS (RFC 8461): the DNS discovery record and the HTTPS policy body.

/// The `_mta-sts.<domain>` TXT record: `v=STSv1; id=<opaque>;`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StsTxtRecord {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidStsTxt {
    #[error("the id token is empty or missing")]
    EmptyId,
}

/// Interpret one TXT record.
///
/// `None` means the record is not an STS record at all (it does not begin
/// with `v=STSv1`); `Some(Err)` means it is one, but an invalid one.
#[must_use]
pub fn parse_sts_txt(raw: &str) -> Option<Result<StsTxtRecord, InvalidStsTxt>> {
    let mut tokens = raw
        .split(';')
        .map(str::trim)
        .filter(|token| !token.is_empty());

    if tokens.next() != Some("v=STSv1") {
        return None;
    }

    let id = tokens
        .filter_map(|token| token.split_once('='))
        .find(|(key, _)| key.trim() == "id")
        .map(|(_, value)| value.trim());

    Some(match id {
        Some(id) if !id.is_empty() => Ok(StsTxtRecord { id: id.to_owned() }),
        _ => Err(InvalidStsTxt::EmptyId),
    })
}

/// Interpret the whole TXT record set of `_mta-sts.<domain>`.
///
/// Senders must see exactly one STS record; more than one makes the policy
/// undiscoverable, the same as none at all.
#[must_use]
pub fn discover(records: &[String]) -> Option<Result<StsTxtRecord, InvalidStsTxt>> {
    let mut found = records.iter().filter_map(|raw| parse_sts_txt(raw));
    match (found.next(), found.next()) {
        (Some(record), None) => Some(record),
        _ => None,
    }
}

/// Enforcement mode of a fetched policy.
#[derive(Debug, Copy, Clone, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum StsMode {
    Enforce,
    Testing,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidStsPolicy {
    #[error("missing required key {0:?}")]
    MissingKey(&'static str),
    #[error("unsupported version {got:?}")]
    UnsupportedVersion { got: String },
    #[error("invalid value {got:?} for key {key:?}")]
    InvalidValue { key: &'static str, got: String },
}

/// The policy document served at
/// `https://mta-sts.<domain>/.well-known/mta-sts.txt`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StsPolicy {
    pub id: String,
    pub mode: StsMode,
    pub mx: Vec<String>,
    pub max_age: std::time::Duration,
}

impl StsPolicy {
    /// Parse the `key: value` body of the policy document. The `mx` key
    /// repeats, one pattern per line.
    pub fn parse(id: impl Into<String>, body: &str) -> Result<Self, InvalidStsPolicy> {
        let mut version = None;
        let mut mode = None;
        let mut max_age = None;
        let mut mx = vec![];

        for line in body.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();

            match key.trim() {
                "version" => version = Some(value.to_owned()),
                "mode" => {
                    mode = Some(value.parse::<StsMode>().map_err(|_| {
                        InvalidStsPolicy::InvalidValue {
                            key: "mode",
                            got: value.to_owned(),
                        }
                    })?);
                }
                "max_age" => {
                    max_age = Some(value.parse::<u64>().map_err(|_| {
                        InvalidStsPolicy::InvalidValue {
                            key: "max_age",
                            got: value.to_owned(),
                        }
                    })?);
                }
                "mx" => mx.push(value.trim_end_matches('.').to_ascii_lowercase()),
                _ => {}
            }
        }

        match version {
            Some(version) if version == "STSv1" => {}
            Some(got) => return Err(InvalidStsPolicy::UnsupportedVersion { got }),
            None => return Err(InvalidStsPolicy::MissingKey("version")),
        }
        if mx.is_empty() {
            return Err(InvalidStsPolicy::MissingKey("mx"));
        }

        Ok(Self {
            id: id.into(),
            mode: mode.ok_or(InvalidStsPolicy::MissingKey("mode"))?,
            mx,
            max_age: std::time::Duration::from_secs(
                max_age.ok_or(InvalidStsPolicy::MissingKey("max_age"))?,
            ),
        })
    }

    /// `true` when the MX hostname matches one of the policy patterns.
    /// A leading `*.` matches exactly one left-most label.
    #[must_use]
    pub fn matches(&self, mx_host: &str) -> bool {
        let host = mx_host.trim_end_matches('.').to_ascii_lowercase();

        self.mx.iter().any(|pattern| match pattern.strip_prefix("*.") {
            Some(suffix) => host
                .split_once('.')
                .is_some_and(|(label, rest)| !label.is_empty() && rest == suffix),
            None => host == *pattern,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn txt_record_with_an_id_is_valid() {
        assert_eq!(
            parse_sts_txt("v=STSv1; id=19840507T234501;"),
            Some(Ok(StsTxtRecord {
                id: "19840507T234501".to_owned()
            }))
        );
    }

    #[test]
    fn txt_record_with_an_empty_id_is_invalid() {
        assert_eq!(
            parse_sts_txt("v=STSv1; id=;"),
            Some(Err(InvalidStsTxt::EmptyId))
        );
        assert_eq!(parse_sts_txt("v=STSv1;"), Some(Err(InvalidStsTxt::EmptyId)));
    }

    #[test]
    fn txt_record_without_the_version_tag_is_absent() {
        assert_eq!(parse_sts_txt("id=19840507T234501;"), None);
        assert_eq!(parse_sts_txt("v=spf1 -all"), None);
    }

    #[test]
    fn multiple_sts_records_make_the_policy_undiscoverable() {
        let records = vec![
            "v=STSv1; id=1;".to_owned(),
            "v=STSv1; id=2;".to_owned(),
        ];
        assert_eq!(discover(&records), None);

        let records = vec!["v=spf1 -all".to_owned(), "v=STSv1; id=1;".to_owned()];
        assert_eq!(
            discover(&records),
            Some(Ok(StsTxtRecord { id: "1".to_owned() }))
        );
    }

    const POLICY: &str = "version: STSv1\nmode: enforce\nmx: mail.example.com\n\
                          mx: *.backup.example.com\nmax_age: 604800\n";

    #[test]
    fn policy_body_parsing() {
        let policy = StsPolicy::parse("19840507T234501", POLICY).unwrap();
        assert_eq!(policy.mode, StsMode::Enforce);
        assert_eq!(policy.mx, ["mail.example.com", "*.backup.example.com"]);
        assert_eq!(policy.max_age, std::time::Duration::from_secs(604_800));
    }

    #[test]
    fn policy_body_requires_all_keys() {
        assert_eq!(
            StsPolicy::parse("1", "mode: enforce\nmx: a.example.com\nmax_age: 60\n"),
            Err(InvalidStsPolicy::MissingKey("version"))
        );
        assert_eq!(
            StsPolicy::parse("1", "version: STSv1\nmode: someday\nmx: a\nmax_age: 60\n"),
            Err(InvalidStsPolicy::InvalidValue {
                key: "mode",
                got: "someday".to_owned()
            })
        );
    }

    #[test]
    fn mx_pattern_matching() {
        let policy = StsPolicy::parse("1", POLICY).unwrap();

        assert!(policy.matches("mail.example.com"));
        assert!(policy.matches("MAIL.EXAMPLE.COM."));
        assert!(policy.matches("mx1.backup.example.com"));
        // The wildcard covers exactly one label.
        assert!(!policy.matches("backup.example.com"));
        assert!(!policy.matches("a.b.backup.example.com"));
        assert!(!policy.matches("other.example.com"));
    }
}
