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

#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    strum::AsRefStr,
    strum::Display,
    strum::EnumString,
    strum::EnumVariantNames,
    serde_with::DeserializeFromStr,
    serde_with::SerializeDisplay,
)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Extension {
    StartTls,
    Auth,
    Pipelining,
    #[strum(serialize = "8BITMIME")]
    BitMime8,
    EnhancedStatusCodes,
    Size,
    Chunking,
    Xclient,
    Unknown,
}

/// Match the leading keyword of an EHLO capability line, returning the
/// extension and its arguments.
#[must_use]
pub fn from_str(input: &str) -> (Extension, &str) {
    <Extension as strum::VariantNames>::VARIANTS
        .iter()
        .find(|i| {
            input.len() >= i.len()
                && input[..i.len()].eq_ignore_ascii_case(i)
                && !input[i.len()..].starts_with(|c: char| c.is_ascii_alphanumeric())
        })
        .map_or((Extension::Unknown, input), |keyword| {
            #[allow(clippy::expect_used)]
            (
                keyword.parse().expect("keyword found in the variant list"),
                &input[keyword.len()..],
            )
        })
}
