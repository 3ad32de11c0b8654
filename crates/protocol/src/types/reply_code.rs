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

/// Code at the start of each line of a reply.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(untagged)]
pub enum ReplyCode {
    /// Simple reply code as defined in RFC 5321.
    Code {
        /// code base
        code: u16,
    },
    /// Enhanced status code as defined in RFC 2034.
    Enhanced {
        /// code base
        code: u16,
        /// class.subject.detail
        enhanced: String,
    },
}

impl ReplyCode {
    /// A reply with a code of 4xx or 5xx denotes an error.
    #[must_use]
    #[inline]
    pub const fn is_error(&self) -> bool {
        match self {
            Self::Code { code } | Self::Enhanced { code, .. } => *code / 100 >= 4,
        }
    }

    /// Return the underlying value of the reply code.
    #[must_use]
    #[inline]
    pub const fn value(&self) -> u16 {
        match self {
            Self::Code { code } | Self::Enhanced { code, .. } => *code,
        }
    }

    /// Return the enhanced part of the reply code, if any.
    #[must_use]
    #[inline]
    pub fn details(&self) -> Option<&str> {
        match self {
            Self::Enhanced { enhanced, .. } => Some(enhanced),
            Self::Code { .. } => None,
        }
    }

    fn parse_enhanced(token: &str) -> Option<String> {
        let mut fields = token.splitn(3, '.');
        for _ in 0..3 {
            fields.next()?.parse::<u16>().ok()?;
        }
        Some(token.to_owned())
    }

    /// Parse the code prefix of a reply line, returning the code and the rest
    /// of the line (separator included).
    pub(crate) fn from_line(line: &str) -> Result<(Self, &str), ReplyCodeFromStrError> {
        let cannot_parse = || ReplyCodeFromStrError::CannotParse {
            line: line.to_string(),
        };

        if line.len() < 3 || !line.as_bytes()[..3].iter().all(u8::is_ascii_digit) {
            return Err(cannot_parse());
        }
        let code = line[..3].parse::<u16>().map_err(|_| cannot_parse())?;
        let rest = &line[3..];

        let enhanced = rest
            .strip_prefix([' ', '-'])
            .and_then(|after| after.split([' ', '-']).next())
            .and_then(Self::parse_enhanced);

        match enhanced {
            Some(enhanced) => {
                let consumed = 3 + 1 + enhanced.len();
                Ok((Self::Enhanced { code, enhanced }, &line[consumed..]))
            }
            None => Ok((Self::Code { code }, rest)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReplyCodeFromStrError {
    #[error("cannot parse reply code in {line:?}")]
    CannotParse { line: String },
}

impl std::fmt::Display for ReplyCode {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Code { code } => write!(f, "{code}"),
            Self::Enhanced { code, enhanced } => write!(f, "{code} {enhanced}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ReplyCode;

    #[rstest::rstest]
    #[case("250 Ok", ReplyCode::Code { code: 250 }, " Ok")]
    #[case(
        "504 5.5.4 unsupported",
        ReplyCode::Enhanced { code: 504, enhanced: "5.5.4".to_owned() },
        " unsupported"
    )]
    #[case(
        "250-2.0.0 done",
        ReplyCode::Enhanced { code: 250, enhanced: "2.0.0".to_owned() },
        " done"
    )]
    #[case("354", ReplyCode::Code { code: 354 }, "")]
    fn parse_code(#[case] input: &str, #[case] expected: ReplyCode, #[case] rest: &str) {
        let (code, remaining) = ReplyCode::from_line(input).unwrap();
        pretty_assertions::assert_eq!(code, expected);
        pretty_assertions::assert_eq!(remaining, rest);
    }

    #[test]
    fn error_threshold() {
        assert!(!ReplyCode::Code { code: 250 }.is_error());
        assert!(!ReplyCode::Code { code: 354 }.is_error());
        assert!(ReplyCode::Code { code: 421 }.is_error());
        assert!(ReplyCode::Code { code: 550 }.is_error());
    }
}
