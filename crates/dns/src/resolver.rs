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

use crate::tlsa::TlsaRecord;

/// Record types the client knows how to query and parse.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum RecordType {
    A,
    Mx,
    Txt,
    Tlsa,
    Ptr,
}

impl From<RecordType> for trust_dns_proto::rr::RecordType {
    fn from(value: RecordType) -> Self {
        match value {
            RecordType::A => Self::A,
            RecordType::Mx => Self::MX,
            RecordType::Txt => Self::TXT,
            RecordType::Tlsa => Self::TLSA,
            RecordType::Ptr => Self::PTR,
        }
    }
}

/// Error produced by a lookup.
///
/// A name that definitively does not exist (`NXDOMAIN`) is a different fact
/// from a resolution that failed (`SERVFAIL`, timeout): the security policy
/// layers must never treat the latter as the former.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lookup {
    /// The name does not exist.
    #[error("name does not exist")]
    NxDomain,
    /// The upstream resolver failed to answer.
    #[error("server failed: {}", with_source.as_ref().map_or("null", String::as_str))]
    ServFail { with_source: Option<String> },
    /// The lookup timed out.
    #[error("timed out")]
    TimedOut,
    #[error("no connections available")]
    NoConnections,
    #[error("io error: {0}")]
    Io(String),
    #[error("dns-proto error: {0}")]
    Proto(String),
    #[error("message: {0}")]
    Message(String),
}

impl Lookup {
    /// A denial that proves the record set does not exist, as opposed to a
    /// transient failure to learn anything.
    #[must_use]
    pub const fn is_definitive_absence(&self) -> bool {
        matches!(self, Self::NxDomain)
    }
}

/// One answer section, in presentation form, which [`DnsClient`] parses.
type Records = Vec<String>;

/// The resolver seam: production goes through trust-dns, tests map
/// `(name, type)` to literal strings.
#[async_trait::async_trait]
pub trait Resolve: Send + Sync {
    async fn query(&self, name: &str, rtype: RecordType) -> Result<Records, Lookup>;
}

/// Resolver backed by the system configuration.
pub struct SystemResolver {
    resolver: trust_dns_resolver::TokioAsyncResolver,
}

impl SystemResolver {
    pub fn from_system_conf() -> Result<Self, Lookup> {
        trust_dns_resolver::TokioAsyncResolver::tokio_from_system_conf()
            .map(|resolver| Self { resolver })
            .map_err(Lookup::from)
    }

    #[must_use]
    pub fn google() -> Self {
        Self {
            resolver: trust_dns_resolver::TokioAsyncResolver::tokio(
                trust_dns_resolver::config::ResolverConfig::google(),
                trust_dns_resolver::config::ResolverOpts::default(),
            ),
        }
    }
}

#[async_trait::async_trait]
impl Resolve for SystemResolver {
    async fn query(&self, name: &str, rtype: RecordType) -> Result<Records, Lookup> {
        match self.resolver.lookup(name, rtype.into()).await {
            Ok(lookup) => Ok(lookup
                .record_iter()
                .filter_map(|record| record.data().map(ToString::to_string))
                .collect()),
            Err(error) => {
                // An empty answer with NOERROR is a present, empty record set.
                if let trust_dns_resolver::error::ResolveErrorKind::NoRecordsFound {
                    response_code: trust_dns_proto::op::ResponseCode::NoError,
                    ..
                } = error.kind()
                {
                    return Ok(vec![]);
                }
                Err(error.into())
            }
        }
    }
}

impl From<trust_dns_resolver::error::ResolveError> for Lookup {
    #[inline]
    fn from(error: trust_dns_resolver::error::ResolveError) -> Self {
        use trust_dns_resolver::error::ResolveErrorKind;
        match error.kind() {
            ResolveErrorKind::NoRecordsFound { response_code, .. } => match response_code {
                trust_dns_proto::op::ResponseCode::NXDomain => Self::NxDomain,
                otherwise => Self::ServFail {
                    with_source: Some(otherwise.to_string()),
                },
            },
            ResolveErrorKind::Timeout => Self::TimedOut,
            ResolveErrorKind::NoConnections => Self::NoConnections,
            ResolveErrorKind::Io(io) => Self::Io(io.to_string()),
            ResolveErrorKind::Proto(proto) => Self::Proto(proto.to_string()),
            ResolveErrorKind::Message(e) => Self::Message((*e).to_owned()),
            ResolveErrorKind::Msg(e) => Self::Message(e.clone()),
            // NOTE: non_exhaustive
            _ => Self::Message(error.to_string()),
        }
    }
}

/// Test resolver keyed by `(name, type)`, answering literal strings.
#[derive(Debug, Default)]
pub struct StaticResolver {
    records: std::collections::HashMap<(String, RecordType), Result<Records, Lookup>>,
}

impl StaticResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_records<const N: usize>(
        mut self,
        name: &str,
        rtype: RecordType,
        records: [&str; N],
    ) -> Self {
        self.records.insert(
            (name.trim_end_matches('.').to_owned(), rtype),
            Ok(records.iter().map(ToString::to_string).collect()),
        );
        self
    }

    /// Make a query fail with the given error instead of `NXDOMAIN`.
    #[must_use]
    pub fn with_failure(mut self, name: &str, rtype: RecordType, error: Lookup) -> Self {
        self.records
            .insert((name.trim_end_matches('.').to_owned(), rtype), Err(error));
        self
    }
}

#[async_trait::async_trait]
impl Resolve for StaticResolver {
    async fn query(&self, name: &str, rtype: RecordType) -> Result<Records, Lookup> {
        self.records
            .get(&(name.trim_end_matches('.').to_owned(), rtype))
            .cloned()
            .unwrap_or(Err(Lookup::NxDomain))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MxRecord {
    pub preference: u16,
    pub exchange: String,
}

/// DNS client: queries a [`Resolve`] implementation and parses the answers.
#[derive(Clone)]
pub struct DnsClient {
    resolver: std::sync::Arc<dyn Resolve>,
}

impl DnsClient {
    #[must_use]
    pub fn new(resolver: std::sync::Arc<dyn Resolve>) -> Self {
        Self { resolver }
    }

    pub async fn lookup_a(&self, name: &str) -> Result<Vec<std::net::IpAddr>, Lookup> {
        Ok(self
            .resolver
            .query(name, RecordType::A)
            .await?
            .iter()
            .filter_map(|record| record.parse().ok())
            .collect())
    }

    /// MX records sorted by ascending preference; the DNS answer order is
    /// kept for equal preferences.
    pub async fn lookup_mx(&self, domain: &str) -> Result<Vec<MxRecord>, Lookup> {
        let mut records = self
            .resolver
            .query(domain, RecordType::Mx)
            .await?
            .iter()
            .filter_map(|record| {
                let (preference, exchange) = record.split_once(' ')?;
                Some(MxRecord {
                    preference: preference.parse().ok()?,
                    exchange: exchange.trim().trim_end_matches('.').to_owned(),
                })
            })
            .collect::<Vec<_>>();

        records.sort_by_key(|record| record.preference);
        Ok(records)
    }

    pub async fn lookup_txt(&self, name: &str) -> Result<Vec<String>, Lookup> {
        self.resolver.query(name, RecordType::Txt).await
    }

    pub async fn lookup_tlsa(&self, name: &str) -> Result<Vec<TlsaRecord>, Lookup> {
        Ok(self
            .resolver
            .query(name, RecordType::Tlsa)
            .await?
            .iter()
            .filter_map(|record| record.parse().ok())
            .collect())
    }

    /// Reverse lookup of an address; an absent PTR is not an error.
    pub async fn lookup_ptr(&self, ip: std::net::IpAddr) -> Result<Option<String>, Lookup> {
        let name = match ip {
            std::net::IpAddr::V4(v4) => {
                let [a, b, c, d] = v4.octets();
                format!("{d}.{c}.{b}.{a}.in-addr.arpa")
            }
            std::net::IpAddr::V6(v6) => {
                let mut name = v6
                    .octets()
                    .iter()
                    .rev()
                    .flat_map(|byte| [byte & 0x0f, byte >> 4])
                    .map(|nibble| format!("{nibble:x}."))
                    .collect::<String>();
                name.push_str("ip6.arpa");
                name
            }
        };

        match self.resolver.query(&name, RecordType::Ptr).await {
            Ok(records) => Ok(records
                .first()
                .map(|record| record.trim_end_matches('.').to_owned())),
            Err(Lookup::NxDomain) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(resolver: StaticResolver) -> DnsClient {
        DnsClient::new(std::sync::Arc::new(resolver))
    }

    #[tokio::test]
    async fn mx_sorting_is_stable() {
        let client = client(StaticResolver::new().with_records(
            "example.com",
            RecordType::Mx,
            [
                "20 backup.example.com.",
                "10 first.example.com.",
                "10 second.example.com.",
            ],
        ));

        let records = client.lookup_mx("example.com").await.unwrap();
        assert_eq!(
            records
                .iter()
                .map(|r| r.exchange.as_str())
                .collect::<Vec<_>>(),
            ["first.example.com", "second.example.com", "backup.example.com"]
        );
    }

    #[tokio::test]
    async fn absent_and_failed_are_distinct() {
        let client = client(StaticResolver::new().with_failure(
            "flaky.example.com",
            RecordType::Tlsa,
            Lookup::ServFail { with_source: None },
        ));

        assert!(matches!(
            client.lookup_mx("unknown.example.com").await,
            Err(Lookup::NxDomain)
        ));
        assert!(matches!(
            client.lookup_tlsa("flaky.example.com").await,
            Err(Lookup::ServFail { .. })
        ));
        assert!(Lookup::NxDomain.is_definitive_absence());
        assert!(!Lookup::TimedOut.is_definitive_absence());
    }

    #[tokio::test]
    async fn ptr_of_a_known_address() {
        let client = client(StaticResolver::new().with_records(
            "7.2.0.192.in-addr.arpa",
            RecordType::Ptr,
            ["client.example.net."],
        ));

        assert_eq!(
            client
                .lookup_ptr("192.0.2.7".parse().unwrap())
                .await
                .unwrap()
                .as_deref(),
            Some("client.example.net")
        );
        assert_eq!(
            client.lookup_ptr("192.0.2.8".parse().unwrap()).await.unwrap(),
            None
        );
    }
}
