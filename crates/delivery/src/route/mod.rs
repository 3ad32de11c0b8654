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

//! Next-hop resolution with the layered security policy:
//! DANE first, then MTA-STS, then opportunistic TLS.

pub mod dane;
pub mod mta_sts;

use mta_sts::{FetchError, StsPolicyCache};
use robin_common::transfer_error::PolicyClass;
use robin_dns::sts::{StsMode, StsPolicy};
use robin_dns::tlsa::TlsaRecord;
use robin_dns::{DnsClient, Lookup};
use std::sync::Arc;

/// The TLS discipline attached to one candidate.
#[derive(Debug, Clone)]
pub enum SecurityPolicy {
    /// TLSA records pin the server certificate; no downgrade permitted.
    DaneMandatory { tlsa: Vec<TlsaRecord> },
    /// The domain publishes an enforced MTA-STS policy.
    MtaStsEnforce { policy: Arc<StsPolicy> },
    /// The domain publishes a testing policy; violations are recorded only.
    MtaStsTesting {
        policy: Arc<StsPolicy>,
        matches_policy: bool,
    },
    /// No published policy: TLS when offered, cleartext otherwise.
    Opportunistic,
}

impl SecurityPolicy {
    #[must_use]
    pub const fn class(&self) -> PolicyClass {
        match self {
            Self::DaneMandatory { .. } => PolicyClass::DaneMandatory,
            Self::MtaStsEnforce { .. } => PolicyClass::MtaStsEnforce,
            Self::MtaStsTesting { .. } => PolicyClass::MtaStsTesting,
            Self::Opportunistic => PolicyClass::Opportunistic,
        }
    }

    /// STARTTLS is mandatory and the certificate must check out.
    #[must_use]
    pub const fn requires_tls(&self) -> bool {
        matches!(self, Self::DaneMandatory { .. } | Self::MtaStsEnforce { .. })
    }
}

/// One next-hop candidate, in preference order.
#[derive(Debug, Clone)]
pub struct MxCandidate {
    pub hostname: String,
    pub port: u16,
    pub preference: u16,
    pub policy: SecurityPolicy,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum RouteError {
    #[error("no mail exchanger for {domain}")]
    NoMx { domain: String },
    #[error("mx lookup failed: {0}")]
    MxLookup(Lookup),
    /// The TLSA lookup failed in a way that proves nothing. Downgrading to
    /// a weaker policy here would let an attacker strip DANE, so the
    /// attempt is deferred instead.
    #[error("tlsa lookup for {mx} is inconclusive: {source}")]
    TlsaInconclusive { mx: String, source: Lookup },
    #[error("mta-sts policy for {domain} unavailable: {source}")]
    Policy { domain: String, source: FetchError },
}

/// Resolver producing the ordered, policy-annotated candidate list.
pub struct MxResolver {
    dns: DnsClient,
    sts_cache: StsPolicyCache,
}

impl MxResolver {
    #[must_use]
    pub const fn new(dns: DnsClient, sts_cache: StsPolicyCache) -> Self {
        Self { dns, sts_cache }
    }

    #[must_use]
    pub const fn dns(&self) -> &DnsClient {
        &self.dns
    }

    /// Resolve the next hops of `domain` with their security policy.
    #[tracing::instrument(skip(self))]
    pub async fn resolve_secure_mx(&self, domain: &str) -> Result<Vec<MxCandidate>, RouteError> {
        let mut hosts = match self.dns.lookup_mx(domain).await {
            Ok(records) => records
                .into_iter()
                .map(|record| (record.preference, record.exchange))
                .collect::<Vec<_>>(),
            // No MX record set: fall back to the implicit MX (RFC 5321 5.1).
            Err(Lookup::NxDomain) => vec![(0, domain.trim_end_matches('.').to_owned())],
            Err(e) => return Err(RouteError::MxLookup(e)),
        };
        if hosts.is_empty() {
            hosts = vec![(0, domain.trim_end_matches('.').to_owned())];
        }
        // A single null MX means the domain refuses mail (RFC 7505).
        if hosts.len() == 1 && hosts[0].1.is_empty() {
            return Err(RouteError::NoMx {
                domain: domain.to_owned(),
            });
        }

        // DANE takes precedence over MTA-STS (RFC 8461 section 2).
        let mut tlsa_sets = Vec::with_capacity(hosts.len());
        let mut any_dane = false;
        for (_, host) in &hosts {
            let tlsa = self.lookup_tlsa(host).await?;
            any_dane |= tlsa.iter().any(TlsaRecord::is_usable);
            tlsa_sets.push(tlsa);
        }

        if any_dane {
            tracing::debug!("TLSA published, candidates are DANE-mandatory");
            return Ok(hosts
                .into_iter()
                .zip(tlsa_sets)
                .map(|((preference, hostname), tlsa)| MxCandidate {
                    hostname,
                    port: 25,
                    preference,
                    policy: SecurityPolicy::DaneMandatory { tlsa },
                })
                .collect());
        }

        match self.lookup_sts_policy(domain).await? {
            Some(policy) => Ok(apply_sts_policy(&policy, hosts)),
            None => Ok(hosts
                .into_iter()
                .map(|(preference, hostname)| MxCandidate {
                    hostname,
                    port: 25,
                    preference,
                    policy: SecurityPolicy::Opportunistic,
                })
                .collect()),
        }
    }

    async fn lookup_tlsa(&self, mx_host: &str) -> Result<Vec<TlsaRecord>, RouteError> {
        match self.dns.lookup_tlsa(&format!("_25._tcp.{mx_host}")).await {
            Ok(records) => Ok(records),
            Err(e) if e.is_definitive_absence() => Ok(vec![]),
            Err(source) => Err(RouteError::TlsaInconclusive {
                mx: mx_host.to_owned(),
                source,
            }),
        }
    }

    async fn lookup_sts_policy(&self, domain: &str) -> Result<Option<Arc<StsPolicy>>, RouteError> {
        let records = match self.dns.lookup_txt(&format!("_mta-sts.{domain}")).await {
            Ok(records) => records,
            Err(Lookup::NxDomain) => return Ok(None),
            Err(e) => {
                // The TXT probe failing transiently is not a proof of
                // absence either, but unlike DANE the policy may simply not
                // exist; record and continue unprotected.
                tracing::warn!(%domain, error = %e, "mta-sts discovery failed");
                return Ok(None);
            }
        };

        match robin_dns::sts::discover(&records) {
            Some(Ok(record)) => self
                .sts_cache
                .get(domain, &record.id)
                .await
                .map(Some)
                .map_err(|source| RouteError::Policy {
                    domain: domain.to_owned(),
                    source,
                }),
            // Present-but-invalid or several v=STSv1 records: no policy.
            Some(Err(_)) | None => Ok(None),
        }
    }
}

fn apply_sts_policy(policy: &Arc<StsPolicy>, hosts: Vec<(u16, String)>) -> Vec<MxCandidate> {
    hosts
        .into_iter()
        .filter_map(|(preference, hostname)| {
            let matches_policy = policy.matches(&hostname);
            let security = match policy.mode {
                // Enforced: non-matching MX hosts are not candidates at all.
                StsMode::Enforce if matches_policy => SecurityPolicy::MtaStsEnforce {
                    policy: policy.clone(),
                },
                StsMode::Enforce => return None,
                StsMode::Testing => SecurityPolicy::MtaStsTesting {
                    policy: policy.clone(),
                    matches_policy,
                },
                StsMode::None => SecurityPolicy::Opportunistic,
            };
            Some(MxCandidate {
                hostname,
                port: 25,
                preference,
                policy: security,
            })
        })
        .collect()
}
