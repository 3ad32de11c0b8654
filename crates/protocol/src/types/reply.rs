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

use super::reply_code::{ReplyCode, ReplyCodeFromStrError};

/// A complete SMTP reply, multi-line form preserved.
#[derive(
    Debug, Clone, PartialEq, Eq, serde_with::SerializeDisplay, serde_with::DeserializeFromStr,
)]
pub struct Reply {
    code: ReplyCode,
    lines: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ReplyFromStrError {
    #[error("a reply must contain at least one line")]
    Empty,
    #[error(transparent)]
    Code(#[from] ReplyCodeFromStrError),
    #[error("all lines of a reply must carry the same code, got {first} then {got}")]
    CodeMismatch { first: u16, got: u16 },
}

impl Reply {
    /// Build a reply from a code and a single line of text.
    #[must_use]
    pub fn new(code: ReplyCode, text: impl Into<String>) -> Self {
        Self {
            code,
            lines: vec![text.into()],
        }
    }

    #[must_use]
    pub const fn code(&self) -> &ReplyCode {
        &self.code
    }

    /// Text of each line, code prefix stripped.
    pub fn lines(&self) -> impl Iterator<Item = &String> {
        self.lines.iter()
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.code.is_error()
    }

    /// Fold the text of the reply on a single line, for diagnostics.
    #[must_use]
    pub fn text(&self) -> String {
        self.lines.join(" ")
    }

    /// Append the lines of `other`, keeping `other`'s code for the whole
    /// reply. Used to pin a final error on top of an existing diagnostic.
    #[must_use]
    pub fn extended(&self, other: &Self) -> Self {
        Self {
            code: other.code.clone(),
            lines: self
                .lines
                .iter()
                .chain(other.lines.iter())
                .cloned()
                .collect(),
        }
    }
}

impl std::str::FromStr for Reply {
    type Err = ReplyFromStrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut code = None;
        let mut lines = vec![];

        for line in s.split("\r\n").filter(|l| !l.is_empty()) {
            let (line_code, rest) = ReplyCode::from_line(line)?;

            match &code {
                None => code = Some(line_code),
                Some(first) if first.value() != line_code.value() => {
                    return Err(ReplyFromStrError::CodeMismatch {
                        first: first.value(),
                        got: line_code.value(),
                    })
                }
                Some(_) => {}
            }

            // The separator (space or dash) belongs to the wire form only.
            lines.push(
                rest.strip_prefix([' ', '-'])
                    .unwrap_or(rest)
                    .to_owned(),
            );
        }

        Ok(Self {
            code: code.ok_or(ReplyFromStrError::Empty)?,
            lines,
        })
    }
}

impl std::fmt::Display for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let value = self.code.value();
        let enhanced = self.code.details();

        for (i, line) in self.lines.iter().enumerate() {
            let sep = if i + 1 == self.lines.len() { ' ' } else { '-' };
            match enhanced {
                Some(enhanced) => write!(f, "{value}{sep}{enhanced} {line}\r\n")?,
                None => write!(f, "{value}{sep}{line}\r\n")?,
            }
        }
        Ok(())
    }
}
