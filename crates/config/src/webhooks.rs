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

use robin_protocol::Verb;

/// `webhooks.json5`: synchronous callbacks consulted before replying to
/// selected verbs.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Webhooks {
    pub hooks: Vec<Webhook>,
}

impl crate::Config for Webhooks {
    const FILE_NAME: &'static str = "webhooks.json5";
}

impl Webhooks {
    /// Hooks subscribed to the given verb, in declaration order.
    pub fn matching(&self, verb: Verb) -> impl Iterator<Item = &Webhook> {
        self.hooks.iter().filter(move |h| h.verbs.contains(&verb))
    }
}

#[derive(Debug, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Webhook {
    pub url: url::Url,
    /// Verbs this endpoint wants to see.
    pub verbs: Vec<Verb>,
    /// The reply to the client is blocked for at most this long.
    #[serde(default = "Webhook::default_timeout", with = "humantime_serde")]
    pub timeout: std::time::Duration,
}

impl Webhook {
    const fn default_timeout() -> std::time::Duration {
        std::time::Duration::from_secs(5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;

    #[test]
    fn hook_selection() {
        let webhooks = Webhooks::from_json5(
            r#"{
                hooks: [
                    { url: "https://hooks.example.com/rcpt", verbs: ["RCPT"], timeout: "2s" },
                    { url: "https://hooks.example.com/all", verbs: ["MAIL", "RCPT"] },
                ],
            }"#,
        )
        .unwrap();

        assert_eq!(webhooks.matching(Verb::Rcpt).count(), 2);
        assert_eq!(webhooks.matching(Verb::Mail).count(), 1);
        assert_eq!(webhooks.matching(Verb::Data).count(), 0);
        assert_eq!(
            webhooks.matching(Verb::Rcpt).next().unwrap().timeout,
            std::time::Duration::from_secs(2)
        );
    }
}
