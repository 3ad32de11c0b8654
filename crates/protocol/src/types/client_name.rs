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

/// Identity announced by the client on HELO/EHLO.
#[derive(
    Debug, Clone, PartialOrd, Ord, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(untagged)]
pub enum ClientName {
    /// FQDN of the client.
    Domain(Domain),
    /// IPv4 address literal.
    Ip4(std::net::Ipv4Addr),
    /// IPv6 address literal.
    Ip6(std::net::Ipv6Addr),
}

impl std::fmt::Display for ClientName {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Domain(domain) => write!(f, "{domain}"),
            Self::Ip4(ip) => write!(f, "{ip}"),
            Self::Ip6(ip) => write!(f, "{ip}"),
        }
    }
}

impl std::str::FromStr for ClientName {
    type Err = <Domain as std::str::FromStr>::Err;

    /// Parse the HELO/EHLO argument, accepting `[1.2.3.4]` and `[IPv6:...]`
    /// address literals.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(literal) = s.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            if let Some(v6) = literal.strip_prefix("IPv6:") {
                if let Ok(ip) = v6.parse::<std::net::Ipv6Addr>() {
                    return Ok(Self::Ip6(ip));
                }
            }
            if let Ok(ip) = literal.parse::<std::net::Ipv4Addr>() {
                return Ok(Self::Ip4(ip));
            }
        }
        s.parse::<Domain>().map(Self::Domain)
    }
}

#[cfg(test)]
mod tests {
    use super::ClientName;

    #[test]
    fn address_literals() {
        assert_eq!(
            "[127.0.0.1]".parse::<ClientName>().unwrap(),
            ClientName::Ip4(std::net::Ipv4Addr::LOCALHOST)
        );
        assert_eq!(
            "[IPv6:::1]".parse::<ClientName>().unwrap(),
            ClientName::Ip6(std::net::Ipv6Addr::LOCALHOST)
        );
        assert!(matches!(
            "client.example.com".parse::<ClientName>().unwrap(),
            ClientName::Domain(_)
        ));
    }
}
