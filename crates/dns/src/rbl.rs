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

//! DNS blocklists: `<reversed-ip>.<zone>` answering an A record when listed.

use crate::{DnsClient, Lookup};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RblError {
    #[error("{got:?} is not a valid IPv4 address")]
    InvalidIp { got: String },
    #[error(transparent)]
    Lookup(#[from] Lookup),
}

/// Reverse the octets of a dotted-quad address, RBL style:
/// `192.168.1.1` becomes `1.1.168.192`.
pub fn reverse_ip(ip: &str) -> Result<String, RblError> {
    let parsed = ip
        .parse::<std::net::Ipv4Addr>()
        .map_err(|_| RblError::InvalidIp { got: ip.to_owned() })?;

    let [a, b, c, d] = parsed.octets();
    Ok(format!("{d}.{c}.{b}.{a}"))
}

/// Result of querying one blocklist zone for one address.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RblLookup {
    pub zone: String,
    pub listed: bool,
    /// The A records returned by the zone, usually in `127.0.0.0/8`.
    pub records: Vec<String>,
}

/// Query `zone` for `ip`. An `NXDOMAIN` answer means not listed; a present
/// answer means listed, with the returned codes kept for diagnostics.
pub async fn lookup(client: &DnsClient, ip: &str, zone: &str) -> Result<RblLookup, RblError> {
    let query = format!("{}.{}", reverse_ip(ip)?, zone);

    match client.lookup_a(&query).await {
        Ok(records) => Ok(RblLookup {
            zone: zone.to_owned(),
            listed: !records.is_empty(),
            records: records.iter().map(ToString::to_string).collect(),
        }),
        Err(Lookup::NxDomain) => Ok(RblLookup {
            zone: zone.to_owned(),
            listed: false,
            records: vec![],
        }),
        Err(e) => Err(e.into()),
    }
}
