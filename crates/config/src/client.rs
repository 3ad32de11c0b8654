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

use robin_protocol::auth::Mechanism;

/// `client.json`: the scriptable client and the outbound defaults.
#[derive(Debug, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Next hops to try, in order. Empty means resolve the recipient domain.
    #[serde(default)]
    pub mx: Vec<String>,
    #[serde(default = "ClientConfig::default_port")]
    pub port: u16,
    /// Require STARTTLS on the outbound session.
    #[serde(default)]
    pub tls: bool,
    /// TLS protocol versions offered, newest first.
    #[serde(default)]
    pub protocols: Vec<String>,
    /// TLS cipher suites offered.
    #[serde(default)]
    pub ciphers: Vec<String>,
    /// Name presented on EHLO.
    #[serde(default = "crate::default_hostname")]
    pub ehlo: String,
    /// Default MAIL FROM address.
    #[serde(default)]
    pub mail: String,
    /// Default RCPT TO addresses.
    #[serde(default)]
    pub rcpt: Vec<String>,
    /// Named routes overriding MX resolution per destination.
    #[serde(default)]
    pub routes: Vec<Route>,
}

impl ClientConfig {
    const fn default_port() -> u16 {
        25
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            mx: vec![],
            port: Self::default_port(),
            tls: false,
            protocols: vec![],
            ciphers: vec![],
            ehlo: crate::default_hostname(),
            mail: String::new(),
            rcpt: vec![],
            routes: vec![],
        }
    }
}

impl crate::Config for ClientConfig {
    const FILE_NAME: &'static str = "client.json";
}

/// One named outbound route. Credentials may reference session variables
/// with `{{name}}` placeholders, resolved at send time.
#[derive(Debug, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Route {
    pub name: String,
    pub mx: String,
    #[serde(default = "ClientConfig::default_port")]
    pub port: u16,
    #[serde(default)]
    pub auth: Option<Mechanism>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub pass: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;

    #[test]
    fn json5_document() {
        // JSON5: comments, trailing commas, unquoted keys.
        let config = ClientConfig::from_json5(
            r#"{
                // talk to the local relay
                mx: ["relay.example.com"],
                port: 2525,
                tls: true,
                ehlo: "tester.example.com",
                mail: "probe@example.com",
                rcpt: ["target@example.net"],
                routes: [
                    { name: "smarthost", mx: "smart.example.org", auth: "CRAM-MD5",
                      user: "{{user}}", pass: "{{pass}}", },
                ],
            }"#,
        )
        .unwrap();

        assert_eq!(config.mx, ["relay.example.com"]);
        assert_eq!(config.port, 2525);
        assert!(config.tls);
        assert_eq!(config.routes.len(), 1);
        assert_eq!(config.routes[0].auth, Some(Mechanism::CramMd5));
        assert_eq!(config.routes[0].port, 25);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(ClientConfig::from_json5(r#"{ mxes: [] }"#).is_err());
    }
}
