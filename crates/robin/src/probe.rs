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

//! `--mtasts` and `--dane`: one-shot diagnostics of a domain's published
//! transport security.

use crate::{emit, usage_error, AnyError, Args};
use robin_delivery::route::mta_sts::{HttpsFetcher, PolicyFetcher};
use robin_dns::{sts, DnsClient, SystemResolver};
use std::sync::Arc;

fn dns() -> Result<DnsClient, AnyError> {
    Ok(DnsClient::new(Arc::new(SystemResolver::from_system_conf()?)))
}

pub async fn mtasts(args: &Args) -> Result<(), AnyError> {
    let Some(domain) = &args.domain else {
        usage_error("--mtasts requires a domain (-d <domain>)");
    };

    let records = dns()?.lookup_txt(&format!("_mta-sts.{domain}")).await?;
    let record = match sts::discover(&records) {
        Some(Ok(record)) => record,
        Some(Err(error)) => return Err(format!("invalid sts record: {error}").into()),
        None => return Err(format!("{domain} does not publish an MTA-STS policy").into()),
    };

    let body = HttpsFetcher::new()?.fetch(domain).await?;
    let policy = sts::StsPolicy::parse(record.id.clone(), &body)?;

    let mx_match = args.mx.as_ref().map(|mx| policy.matches(mx));

    if args.json {
        let payload = serde_json::json!({
            "domain": domain,
            "id": policy.id,
            "mode": policy.mode.to_string(),
            "mx": policy.mx,
            "max_age": policy.max_age.as_secs(),
            "mx_match": mx_match,
        });
        emit(args, &serde_json::to_string_pretty(&payload)?)?;
    } else {
        let mut out = format!(
            "domain: {domain}\nid: {}\nmode: {}\nmax_age: {}\n",
            policy.id,
            policy.mode,
            policy.max_age.as_secs()
        );
        for mx in &policy.mx {
            out.push_str(&format!("mx: {mx}\n"));
        }
        if let (Some(mx), Some(matched)) = (&args.mx, mx_match) {
            out.push_str(&format!(
                "{mx}: {}\n",
                if matched { "matches the policy" } else { "does NOT match the policy" }
            ));
        }
        emit(args, out.trim_end())?;
    }
    Ok(())
}

pub async fn dane(args: &Args) -> Result<(), AnyError> {
    let dns = dns()?;

    // A single host, or every MX of a domain.
    let hosts = match (&args.mx, &args.domain) {
        (Some(mx), None) => vec![mx.clone()],
        (None, Some(domain)) => dns
            .lookup_mx(domain)
            .await?
            .into_iter()
            .map(|record| record.exchange)
            .collect(),
        _ => usage_error("--dane requires either --domain <d> or --mx <host>"),
    };

    let mut report = vec![];
    for host in hosts {
        let records = match dns.lookup_tlsa(&format!("_25._tcp.{host}")).await {
            Ok(records) => records,
            Err(error) if error.is_definitive_absence() => vec![],
            Err(error) => return Err(format!("tlsa lookup for {host} failed: {error}").into()),
        };
        report.push((host, records));
    }

    if args.json {
        let payload = report
            .iter()
            .map(|(host, records)| {
                serde_json::json!({
                    "mx": host,
                    "dane": records.iter().any(robin_dns::tlsa::TlsaRecord::is_usable),
                    "tlsa": records,
                })
            })
            .collect::<Vec<_>>();
        emit(args, &serde_json::to_string_pretty(&payload)?)?;
    } else {
        let mut out = String::new();
        for (host, records) in &report {
            if records.is_empty() {
                out.push_str(&format!("{host}: no TLSA record\n"));
            } else {
                for record in records {
                    out.push_str(&format!("{host}: {record}\n"));
                }
            }
        }
        emit(args, out.trim_end())?;
    }
    Ok(())
}
