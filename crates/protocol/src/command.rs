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

use crate::{auth::Mechanism, Address, ClientName};

/// SMTP verbs understood by both sides of the engine.
///
/// The string form is the canonical uppercase command name.
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
    serde_with::SerializeDisplay,
    serde_with::DeserializeFromStr,
)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum Verb {
    Helo,
    Ehlo,
    #[strum(serialize = "STARTTLS")]
    StartTls,
    Auth,
    Mail,
    Rcpt,
    Data,
    Bdat,
    Rset,
    Vrfy,
    Noop,
    Quit,
    Xclient,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseArgsError {
    #[error("unrecognized command {got:?}")]
    UnknownVerb { got: String },
    #[error("cannot parse the path in {got:?}")]
    InvalidPath { got: String },
    #[error("cannot parse the client name {got:?}")]
    InvalidClientName { got: String },
    #[error("unsupported authentication mechanism {got:?}")]
    InvalidMechanism { got: String },
    #[error("the command {verb} requires an argument")]
    MissingArgument { verb: Verb },
    #[error("cannot parse the chunk size in {got:?}")]
    InvalidChunkSize { got: String },
    #[error("cannot parse the attribute {got:?}")]
    InvalidAttribute { got: String },
}

/// XCLIENT attributes announced by a trusted front-end.
///
/// `[UNAVAILABLE]` and `[TEMPUNAVAIL]` collapse to an absent attribute.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XclientAttrs {
    pub addr: Option<std::net::IpAddr>,
    pub port: Option<u16>,
    pub name: Option<String>,
    pub login: Option<String>,
}

/// A fully parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Helo {
        client_name: ClientName,
    },
    Ehlo {
        client_name: ClientName,
    },
    StartTls,
    Auth {
        mechanism: Mechanism,
        initial_response: Option<String>,
    },
    MailFrom {
        reverse_path: Option<Address>,
        params: Vec<String>,
    },
    RcptTo {
        forward_path: Address,
        params: Vec<String>,
    },
    Data,
    Bdat {
        size: usize,
        last: bool,
    },
    Rset,
    Vrfy {
        target: String,
    },
    Noop,
    Quit,
    Xclient {
        attrs: XclientAttrs,
    },
}

impl Command {
    #[must_use]
    pub const fn verb(&self) -> Verb {
        match self {
            Self::Helo { .. } => Verb::Helo,
            Self::Ehlo { .. } => Verb::Ehlo,
            Self::StartTls => Verb::StartTls,
            Self::Auth { .. } => Verb::Auth,
            Self::MailFrom { .. } => Verb::Mail,
            Self::RcptTo { .. } => Verb::Rcpt,
            Self::Data => Verb::Data,
            Self::Bdat { .. } => Verb::Bdat,
            Self::Rset => Verb::Rset,
            Self::Vrfy { .. } => Verb::Vrfy,
            Self::Noop => Verb::Noop,
            Self::Quit => Verb::Quit,
            Self::Xclient { .. } => Verb::Xclient,
        }
    }

    /// Parse one command line, CRLF already stripped.
    pub fn parse(line: &str) -> Result<Self, ParseArgsError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let (verb, args) = match line.split_once(' ') {
            Some((verb, args)) => (verb, args.trim()),
            None => (line, ""),
        };

        let verb = verb
            .parse::<Verb>()
            .map_err(|_| ParseArgsError::UnknownVerb {
                got: verb.to_owned(),
            })?;

        match verb {
            Verb::Helo => Ok(Self::Helo {
                client_name: parse_client_name(verb, args)?,
            }),
            Verb::Ehlo => Ok(Self::Ehlo {
                client_name: parse_client_name(verb, args)?,
            }),
            Verb::StartTls => Ok(Self::StartTls),
            Verb::Auth => {
                let (mechanism, initial_response) = match args.split_once(' ') {
                    Some((mechanism, initial)) => (mechanism, Some(initial.trim().to_owned())),
                    None if args.is_empty() => {
                        return Err(ParseArgsError::MissingArgument { verb })
                    }
                    None => (args, None),
                };
                Ok(Self::Auth {
                    mechanism: mechanism.parse::<Mechanism>().map_err(|_| {
                        ParseArgsError::InvalidMechanism {
                            got: mechanism.to_owned(),
                        }
                    })?,
                    initial_response,
                })
            }
            Verb::Mail => {
                let (path, params) = split_path_and_params(verb, args, "FROM:")?;
                Ok(Self::MailFrom {
                    reverse_path: parse_path(path)?,
                    params,
                })
            }
            Verb::Rcpt => {
                let (path, params) = split_path_and_params(verb, args, "TO:")?;
                Ok(Self::RcptTo {
                    forward_path: parse_path(path)?.ok_or_else(|| ParseArgsError::InvalidPath {
                        got: path.to_owned(),
                    })?,
                    params,
                })
            }
            Verb::Data => Ok(Self::Data),
            Verb::Bdat => {
                let mut words = args.split_ascii_whitespace();
                let size = words
                    .next()
                    .and_then(|i| i.parse::<usize>().ok())
                    .ok_or_else(|| ParseArgsError::InvalidChunkSize {
                        got: args.to_owned(),
                    })?;
                let last = match words.next() {
                    Some(word) if word.eq_ignore_ascii_case("LAST") => true,
                    Some(word) => {
                        return Err(ParseArgsError::InvalidAttribute {
                            got: word.to_owned(),
                        })
                    }
                    None => false,
                };
                Ok(Self::Bdat { size, last })
            }
            Verb::Rset => Ok(Self::Rset),
            Verb::Vrfy => Ok(Self::Vrfy {
                target: args.to_owned(),
            }),
            Verb::Noop => Ok(Self::Noop),
            Verb::Quit => Ok(Self::Quit),
            Verb::Xclient => Ok(Self::Xclient {
                attrs: parse_xclient_attrs(args)?,
            }),
        }
    }
}

fn parse_client_name(verb: Verb, args: &str) -> Result<ClientName, ParseArgsError> {
    if args.is_empty() {
        return Err(ParseArgsError::MissingArgument { verb });
    }
    args.parse::<ClientName>()
        .map_err(|_| ParseArgsError::InvalidClientName {
            got: args.to_owned(),
        })
}

fn split_path_and_params<'args>(
    verb: Verb,
    args: &'args str,
    prefix: &str,
) -> Result<(&'args str, Vec<String>), ParseArgsError> {
    if args.len() < prefix.len() || !args[..prefix.len()].eq_ignore_ascii_case(prefix) {
        return Err(ParseArgsError::MissingArgument { verb });
    }
    let rest = args[prefix.len()..].trim_start();
    match rest.split_once(' ') {
        Some((path, params)) => Ok((
            path,
            params
                .split_ascii_whitespace()
                .map(ToOwned::to_owned)
                .collect(),
        )),
        None => Ok((rest, vec![])),
    }
}

/// Extract the address of an angle-bracketed path.
///
/// `<>` denotes the null reverse path and yields `None`. A source route
/// (`<@relay:user@host>`) is accepted and stripped.
pub fn parse_path(raw: &str) -> Result<Option<Address>, ParseArgsError> {
    let invalid = || ParseArgsError::InvalidPath {
        got: raw.to_owned(),
    };

    let inner = raw
        .strip_prefix('<')
        .and_then(|i| i.strip_suffix('>'))
        .ok_or_else(invalid)?;

    if inner.is_empty() {
        return Ok(None);
    }

    let mailbox = match inner.rsplit_once(':') {
        Some((route, mailbox)) if route.starts_with('@') => mailbox,
        _ => inner,
    };

    mailbox.parse::<Address>().map(Some).map_err(|_| invalid())
}

fn parse_xclient_attrs(args: &str) -> Result<XclientAttrs, ParseArgsError> {
    let mut attrs = XclientAttrs::default();

    for word in args.split_ascii_whitespace() {
        let (key, value) = word
            .split_once('=')
            .ok_or_else(|| ParseArgsError::InvalidAttribute {
                got: word.to_owned(),
            })?;

        // Postfix sends these placeholders when an attribute is unknown.
        if value.eq_ignore_ascii_case("[UNAVAILABLE]") || value.eq_ignore_ascii_case("[TEMPUNAVAIL]")
        {
            continue;
        }

        let invalid = || ParseArgsError::InvalidAttribute {
            got: word.to_owned(),
        };

        match key.to_ascii_uppercase().as_str() {
            "ADDR" => {
                let value = value.strip_prefix("IPV6:").unwrap_or(value);
                attrs.addr = Some(value.parse().map_err(|_| invalid())?);
            }
            "PORT" => attrs.port = Some(value.parse().map_err(|_| invalid())?),
            "NAME" => attrs.name = Some(value.to_owned()),
            "LOGIN" => attrs.login = Some(value.to_owned()),
            // PROTO, HELO, DESTADDR ... are accepted and ignored.
            _ => {}
        }
    }

    Ok(attrs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[rstest::rstest]
    #[case("MAIL FROM:<john@doe.com>", Some("john@doe.com"))]
    #[case("mail from:<>", None)]
    #[case("MAIL FROM:<@relay.example.com:john@doe.com>", Some("john@doe.com"))]
    fn mail_from(#[case] input: &str, #[case] expected: Option<&str>) {
        match Command::parse(input).unwrap() {
            Command::MailFrom { reverse_path, .. } => {
                pretty_assertions::assert_eq!(
                    reverse_path.map(|i| i.full().to_owned()),
                    expected.map(ToOwned::to_owned)
                );
            }
            otherwise => panic!("unexpected command {otherwise:?}"),
        }
    }

    #[test]
    fn mail_from_with_params() {
        match Command::parse("MAIL FROM:<a@b.com> SIZE=1000 BODY=8BITMIME").unwrap() {
            Command::MailFrom { params, .. } => {
                assert_eq!(params, ["SIZE=1000", "BODY=8BITMIME"]);
            }
            otherwise => panic!("unexpected command {otherwise:?}"),
        }
    }

    #[test]
    fn rcpt_to_requires_an_address() {
        assert!(Command::parse("RCPT TO:<>").is_err());
        assert!(Command::parse("RCPT TO:").is_err());
        assert!(matches!(
            Command::parse("RCPT TO:<jane@doe.com>").unwrap(),
            Command::RcptTo { .. }
        ));
    }

    #[test]
    fn bdat_sizes() {
        assert_eq!(
            Command::parse("BDAT 1000").unwrap(),
            Command::Bdat {
                size: 1000,
                last: false
            }
        );
        assert_eq!(
            Command::parse("BDAT 0 LAST").unwrap(),
            Command::Bdat {
                size: 0,
                last: true
            }
        );
        assert!(Command::parse("BDAT").is_err());
        assert!(Command::parse("BDAT x").is_err());
    }

    #[test]
    fn auth_with_initial_response() {
        assert_eq!(
            Command::parse("AUTH PLAIN AGpvaG4Ac2VjcmV0").unwrap(),
            Command::Auth {
                mechanism: Mechanism::Plain,
                initial_response: Some("AGpvaG4Ac2VjcmV0".to_owned()),
            }
        );
        assert!(Command::parse("AUTH").is_err());
        assert!(Command::parse("AUTH GSSAPI").is_err());
    }

    #[test]
    fn xclient_attributes() {
        match Command::parse("XCLIENT ADDR=192.0.2.4 NAME=front.example.com PORT=2525").unwrap() {
            Command::Xclient { attrs } => {
                assert_eq!(attrs.addr, Some("192.0.2.4".parse().unwrap()));
                assert_eq!(attrs.port, Some(2525));
                assert_eq!(attrs.name.as_deref(), Some("front.example.com"));
                assert_eq!(attrs.login, None);
            }
            otherwise => panic!("unexpected command {otherwise:?}"),
        }
    }

    #[test]
    fn xclient_unavailable_attributes() {
        match Command::parse("XCLIENT ADDR=[UNAVAILABLE] LOGIN=relay").unwrap() {
            Command::Xclient { attrs } => {
                assert_eq!(attrs.addr, None);
                assert_eq!(attrs.login.as_deref(), Some("relay"));
            }
            otherwise => panic!("unexpected command {otherwise:?}"),
        }
    }

    #[test]
    fn unknown_verbs_are_rejected() {
        assert!(matches!(
            Command::parse("EXPN list"),
            Err(ParseArgsError::UnknownVerb { .. })
        ));
    }
}
