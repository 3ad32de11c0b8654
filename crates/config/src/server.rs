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

/// `server.json`: the inbound SMTP service.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ServerConfig {
    /// Name of the server. Used when identifying itself to the client.
    pub name: ServerName,
    /// Listeners.
    pub interfaces: Interfaces,
    /// Extensions to enable and display on the EHLO command.
    pub esmtp: Esmtp,
    /// Error counts handling.
    pub errors: Errors,
    /// Read timeouts.
    pub timeouts: Timeouts,
    /// TLS parameters; absent disables STARTTLS.
    pub tls: Option<Tls>,
    /// Peers allowed to use XCLIENT.
    pub xclient_trust: Vec<std::net::IpAddr>,
    /// DNS blocklist zones consulted on connect.
    pub rbl_zones: Vec<String>,
    /// Local delivery agent handling recipients of local domains.
    pub lda: Option<Lda>,
    /// Domains delivered locally instead of being relayed.
    pub local_domains: Vec<String>,
    /// Retry cap; past it the envelope bounces.
    pub queue: Queue,
}

impl crate::Config for ServerConfig {
    const FILE_NAME: &'static str = "server.json";
}

#[derive(Debug, serde::Deserialize)]
#[serde(transparent)]
pub struct ServerName(pub String);

impl Default for ServerName {
    fn default() -> Self {
        Self(crate::default_hostname())
    }
}

/// Listeners that receive traffic via SMTP.
#[derive(Debug, serde::Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Interfaces {
    /// 25.
    pub addr: Vec<std::net::SocketAddr>,
    /// 587.
    pub addr_submission: Vec<std::net::SocketAddr>,
}

impl Default for Interfaces {
    fn default() -> Self {
        Self {
            addr: vec!["0.0.0.0:25".parse().expect("valid literal")],
            addr_submission: vec![],
        }
    }
}

/// Error handling for clients.
#[derive(Debug, serde::Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Errors {
    /// Soft error count before slowing the client down. -1 to disable.
    pub soft_count: i64,
    /// Hard error count before closing the connection. -1 to disable.
    pub hard_count: i64,
    /// Delay applied past the soft error count.
    #[serde(with = "humantime_serde")]
    pub delay: std::time::Duration,
}

impl Default for Errors {
    fn default() -> Self {
        Self {
            soft_count: 10,
            hard_count: 20,
            delay: std::time::Duration::from_secs(1),
        }
    }
}

/// Read timeouts, per RFC 5321 section 4.5.3.2.
#[derive(Debug, serde::Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Timeouts {
    /// Commands.
    #[serde(with = "humantime_serde")]
    pub read: std::time::Duration,
    /// Message content during DATA/BDAT.
    #[serde(with = "humantime_serde")]
    pub data_read: std::time::Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            read: std::time::Duration::from_secs(30),
            data_read: std::time::Duration::from_secs(5 * 60),
        }
    }
}

/// TLS parameters for STARTTLS and the tunneled listeners.
#[derive(Debug, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Tls {
    /// PEM certificate chain.
    pub certificate: std::path::PathBuf,
    /// PEM private key.
    pub private_key: std::path::PathBuf,
    /// Timeout for the TLS handshake.
    #[serde(default = "Tls::default_handshake_timeout", with = "humantime_serde")]
    pub handshake_timeout: std::time::Duration,
}

impl Tls {
    const fn default_handshake_timeout() -> std::time::Duration {
        std::time::Duration::from_secs(5)
    }
}

/// Extended Simple Mail Transfer Protocol (ESMTP) options.
#[derive(Debug, serde::Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Esmtp {
    /// Authentication policy; absent disables AUTH.
    pub auth: Option<Auth>,
    /// Enable starttls.
    pub starttls: bool,
    /// Enable pipelining.
    pub pipelining: bool,
    /// Enable chunking (BDAT).
    pub chunking: bool,
    /// Maximum size of the message in bytes.
    pub size: usize,
}

impl Default for Esmtp {
    fn default() -> Self {
        Self {
            auth: None,
            starttls: true,
            pipelining: true,
            chunking: true,
            size: 20_000_000,
        }
    }
}

/// Authentication options.
#[derive(Debug, serde::Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Auth {
    /// Some mechanisms are considered unsecure under non-TLS connections.
    /// If `false`, the server will allow to use them even on clair connections.
    pub enable_dangerous_mechanism_in_clair: bool,
    /// List of mechanisms supported by the server.
    pub mechanisms: Vec<Mechanism>,
    /// Failed AUTH exchanges tolerated before the session is closed.
    pub attempt_count_max: i64,
    /// Accepted credentials. A deployment fronts this with a directory; the
    /// inline map covers testing and small sites.
    pub users: std::collections::HashMap<String, String>,
}

impl Default for Auth {
    fn default() -> Self {
        Self {
            enable_dangerous_mechanism_in_clair: false,
            mechanisms: vec![
                Mechanism::Plain,
                Mechanism::Login,
                Mechanism::CramMd5,
                Mechanism::DigestMd5,
            ],
            attempt_count_max: 3,
            users: std::collections::HashMap::new(),
        }
    }
}

/// The external local delivery agent.
#[derive(Debug, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Lda {
    /// Path of the executable, e.g. `/usr/libexec/dovecot/dovecot-lda`.
    pub path: std::path::PathBuf,
    /// Flag introducing the recipient argument.
    #[serde(default = "Lda::default_recipient_flag")]
    pub recipient_flag: String,
}

impl Lda {
    fn default_recipient_flag() -> String {
        "-d".to_owned()
    }
}

/// Queue behavior.
#[derive(Debug, serde::Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Queue {
    /// Where deferred envelope bodies are spooled.
    pub spool: std::path::PathBuf,
}

impl Default for Queue {
    fn default() -> Self {
        Self {
            spool: "/var/spool/robin".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;

    #[test]
    fn defaults_are_usable() {
        let config = ServerConfig::from_json5("{}").unwrap();
        assert!(config.esmtp.starttls);
        assert!(config.esmtp.chunking);
        assert_eq!(config.timeouts.read, std::time::Duration::from_secs(30));
        assert_eq!(
            config.timeouts.data_read,
            std::time::Duration::from_secs(300)
        );
        assert!(config.tls.is_none());
    }

    #[test]
    fn full_document() {
        let config = ServerConfig::from_json5(
            r#"{
                name: "mx.example.com",
                interfaces: { addr: ["127.0.0.1:2525"], addr_submission: [] },
                esmtp: {
                    auth: { mechanisms: ["PLAIN", "CRAM-MD5"], users: { jane: "hunter2" } },
                    starttls: false,
                    pipelining: true,
                    chunking: true,
                    size: 1048576,
                },
                timeouts: { read: "30s", data_read: "5m" },
                xclient_trust: ["10.0.0.1"],
                rbl_zones: ["zen.spamhaus.org"],
                local_domains: ["example.com"],
                lda: { path: "/usr/libexec/dovecot/dovecot-lda" },
            }"#,
        )
        .unwrap();

        assert_eq!(config.name.0, "mx.example.com");
        let auth = config.esmtp.auth.unwrap();
        assert_eq!(auth.mechanisms, [Mechanism::Plain, Mechanism::CramMd5]);
        assert_eq!(auth.users["jane"], "hunter2");
        assert_eq!(config.lda.unwrap().recipient_flag, "-d");
    }
}
