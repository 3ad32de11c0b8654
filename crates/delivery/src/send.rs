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

//! The delivery coordinator: walk the candidate list in policy order, run
//! the exchange, classify every recipient.

use crate::route::dane::DaneVerifier;
use crate::route::{MxCandidate, MxResolver, SecurityPolicy};
use crate::smtp::{deliver_mail, SenderHandler, UpgradeTls};
use robin_common::envelope::{Action, Envelope};
use robin_common::extensions::Extension;
use robin_common::response::Ehlo;
use robin_common::transfer_error::{Delivery, PolicyClass};
use robin_common::Mailbox;
use robin_protocol::{rustls, tokio_rustls, Reply, Transaction, Verb};
use std::sync::Arc;

const CONNECT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

struct RemoteSender<'a> {
    client_name: &'a str,
    envelope: &'a mut Envelope,
    hostname: &'a str,
    policy: &'a SecurityPolicy,
    force_plaintext: bool,
    tls_active: bool,
    ehlo: Option<Ehlo>,
    accepted: Vec<Mailbox>,
}

impl RemoteSender<'_> {
    fn set_action(&mut self, rcpt: &Mailbox, action: Action) {
        if let Some(recipient) = self
            .envelope
            .recipients
            .iter_mut()
            .find(|r| r.forward_path == *rcpt)
        {
            recipient.action = Some(action);
        }
    }

    fn settle_accepted(&mut self, reply: &Reply) {
        let action = match reply.code().value() / 100 {
            2 => Action::Delivered,
            5 => Action::Failed {
                diagnostic_code: Some(reply.text()),
            },
            _ => Action::Delayed {
                diagnostic_code: Some(reply.text()),
            },
        };
        for rcpt in std::mem::take(&mut self.accepted) {
            self.set_action(&rcpt, action.clone());
        }
    }
}

#[async_trait::async_trait]
impl SenderHandler for RemoteSender<'_> {
    fn get_client_name(&self) -> String {
        self.client_name.to_owned()
    }

    fn get_server_hostname(&self) -> String {
        self.hostname.to_owned()
    }

    fn get_mail_from(&self) -> Option<Mailbox> {
        self.envelope.reverse_path.clone()
    }

    fn get_rcpt_to(&self) -> Vec<Mailbox> {
        self.envelope
            .pending_recipients()
            .map(|r| r.forward_path.clone())
            .collect()
    }

    async fn get_message(&mut self) -> Result<Vec<u8>, Delivery> {
        self.envelope.body.read().await.map_err(|e| Delivery::Client {
            with_source: Some(format!("cannot read the spooled message: {e}")),
        })
    }

    async fn on_ehlo(&mut self, response: Ehlo) -> Result<UpgradeTls, Delivery> {
        let offers_starttls = response.contains(Extension::StartTls);
        self.ehlo = Some(response);

        if self.tls_active {
            return Ok(UpgradeTls::No);
        }

        if self.policy.requires_tls() {
            if offers_starttls {
                return Ok(UpgradeTls::Yes);
            }
            return Err(Delivery::Policy {
                class: self.policy.class(),
                with_source: Some(
                    "an encrypted connection is required, but the server did not \
                     advertise the STARTTLS extension"
                        .to_owned(),
                ),
            });
        }

        if offers_starttls && !self.force_plaintext {
            Ok(UpgradeTls::Yes)
        } else {
            Ok(UpgradeTls::No)
        }
    }

    fn get_tls_connector(
        &self,
    ) -> Result<(tokio_rustls::TlsConnector, rustls::ServerName), Delivery> {
        let builder = rustls::ClientConfig::builder().with_safe_defaults();

        let config = match self.policy {
            // The TLSA set is the whole trust decision.
            SecurityPolicy::DaneMandatory { tlsa } => builder
                .with_custom_certificate_verifier(Arc::new(DaneVerifier::new(tlsa.clone())))
                .with_no_client_auth(),
            // Everything else chains to the public roots.
            _ => {
                let mut root_store = rustls::RootCertStore::empty();
                root_store.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
                    rustls::OwnedTrustAnchor::from_subject_spki_name_constraints(
                        ta.subject,
                        ta.spki,
                        ta.name_constraints,
                    )
                }));
                builder
                    .with_root_certificates(root_store)
                    .with_no_client_auth()
            }
        };

        let server_name =
            rustls::ServerName::try_from(self.hostname).map_err(|e| Delivery::Tls {
                with_source: Some(format!("invalid server name {:?}: {e}", self.hostname)),
            })?;

        Ok((
            tokio_rustls::TlsConnector::from(Arc::new(config)),
            server_name,
        ))
    }

    fn on_tls_established(&mut self) {
        self.tls_active = true;
    }

    fn has_extension(&self, extension: Extension) -> bool {
        self.ehlo.as_ref().is_some_and(|e| e.contains(extension))
    }

    fn use_chunking(&self) -> bool {
        self.envelope.chunked && self.has_extension(Extension::Chunking)
    }

    fn has_accepted_recipient(&self) -> bool {
        !self.accepted.is_empty()
    }

    async fn on_mail_from(&mut self, reply: Reply) -> Result<(), Delivery> {
        if reply.is_error() {
            return Err(Delivery::from_reply(&reply));
        }
        Ok(())
    }

    async fn on_rcpt_to(&mut self, rcpt: &Mailbox, reply: Reply) -> Result<(), Delivery> {
        match reply.code().value() / 100 {
            2 => self.accepted.push(rcpt.clone()),
            5 => self.set_action(
                rcpt,
                Action::Failed {
                    diagnostic_code: Some(reply.text()),
                },
            ),
            _ => self.set_action(
                rcpt,
                Action::Delayed {
                    diagnostic_code: Some(reply.text()),
                },
            ),
        }
        Ok(())
    }

    async fn on_data_start(&mut self, reply: Reply) -> Result<(), Delivery> {
        // Reached only when the 354 go-ahead did not come.
        self.settle_accepted(&reply);
        Ok(())
    }

    async fn on_data_end(&mut self, reply: Reply) -> Result<(), Delivery> {
        self.settle_accepted(&reply);
        Ok(())
    }

    fn record(&mut self, transaction: Transaction) {
        self.envelope.log.push(transaction);
    }
}

/// One connection attempt against one candidate, behind a seam so the
/// candidate-walk logic is testable without sockets.
#[async_trait::async_trait]
pub(crate) trait Attempt: Send + Sync {
    async fn attempt(
        &self,
        client_name: &str,
        envelope: &mut Envelope,
        candidate: &MxCandidate,
        force_plaintext: bool,
    ) -> Result<(), Delivery>;
}

pub(crate) struct SmtpAttempt;

#[async_trait::async_trait]
impl Attempt for SmtpAttempt {
    async fn attempt(
        &self,
        client_name: &str,
        envelope: &mut Envelope,
        candidate: &MxCandidate,
        force_plaintext: bool,
    ) -> Result<(), Delivery> {
        let target = (candidate.hostname.as_str(), candidate.port);
        let socket = tokio::time::timeout(CONNECT_TIMEOUT, tokio::net::TcpStream::connect(target))
            .await
            .map_err(|_elapsed| Delivery::Connection {
                with_source: Some(format!(
                    "connection to {}:{} timed out",
                    candidate.hostname, candidate.port
                )),
            })?
            .map_err(Delivery::from)?;

        let mut handler = RemoteSender {
            client_name,
            envelope,
            hostname: &candidate.hostname,
            policy: &candidate.policy,
            force_plaintext,
            tls_active: false,
            ehlo: None,
            accepted: vec![],
        };

        let result = deliver_mail(socket, &mut handler).await;

        // A failed TLS negotiation under a mandatory policy is a policy
        // failure, which forbids falling back to weaker candidates.
        match result {
            Err(Delivery::Tls { with_source }) if candidate.policy.requires_tls() => {
                Err(Delivery::Policy {
                    class: candidate.policy.class(),
                    with_source,
                })
            }
            otherwise => otherwise,
        }
    }
}

/// Walk the candidates of `domain` and update the envelope in place.
#[tracing::instrument(skip(resolver, envelope), fields(message = %envelope.message_uuid))]
pub async fn deliver_envelope(
    resolver: &MxResolver,
    client_name: &str,
    envelope: &mut Envelope,
    domain: &str,
) {
    let candidates = match resolver.resolve_secure_mx(domain).await {
        Ok(candidates) => candidates,
        Err(error) => {
            tracing::warn!(%error, "cannot resolve the next hop");
            record_failure(envelope, &error.to_string());
            return;
        }
    };

    deliver_with(&SmtpAttempt, client_name, envelope, &candidates).await;
}

/// The candidate walk: honours the policy floor (a failed DANE-mandatory or
/// STS-enforce candidate forbids weaker ones for this envelope attempt).
pub(crate) async fn deliver_with(
    attempt: &dyn Attempt,
    client_name: &str,
    envelope: &mut Envelope,
    candidates: &[MxCandidate],
) {
    let mut floor: Option<PolicyClass> = None;
    let mut last_error: Option<Delivery> = None;

    for candidate in candidates {
        if envelope.pending_recipients().next().is_none() {
            break;
        }
        if floor.is_some_and(|floor| candidate.policy.class() < floor) {
            tracing::warn!(
                candidate = %candidate.hostname,
                class = %candidate.policy.class(),
                "skipped: weaker than an already-failed mandatory policy"
            );
            continue;
        }

        tracing::debug!(
            candidate = %candidate.hostname,
            class = %candidate.policy.class(),
            "trying candidate"
        );

        match attempt
            .attempt(client_name, envelope, candidate, false)
            .await
        {
            Ok(()) => return,
            Err(Delivery::Policy { class, with_source }) => {
                tracing::warn!(
                    candidate = %candidate.hostname,
                    %class,
                    "candidate failed its security policy"
                );
                floor = Some(floor.map_or(class, |f| f.max(class)));
                last_error = Some(Delivery::Policy { class, with_source });
            }
            // An optional TLS upgrade failed: one more try in the clear.
            Err(Delivery::Tls { with_source: _ }) if !candidate.policy.requires_tls() => {
                tracing::debug!(candidate = %candidate.hostname, "retrying in cleartext");
                match attempt.attempt(client_name, envelope, candidate, true).await {
                    Ok(()) => return,
                    Err(error) => last_error = Some(error),
                }
            }
            Err(error @ Delivery::Permanent { .. }) => {
                // The server refused the envelope outright.
                for recipient in &mut envelope.recipients {
                    if recipient.action.is_none() {
                        recipient.action = Some(Action::Failed {
                            diagnostic_code: Some(error.to_string()),
                        });
                    }
                }
                return;
            }
            Err(error) => {
                tracing::debug!(candidate = %candidate.hostname, %error, "candidate failed");
                last_error = Some(error);
            }
        }
    }

    if let Some(error) = last_error {
        record_failure(envelope, &error.to_string());
    }
}

/// Recipients that never reached a terminal outcome stay deferred, with the
/// last error as their diagnostic.
fn record_failure(envelope: &mut Envelope, diagnostic: &str) {
    for recipient in &mut envelope.recipients {
        if !recipient.action.as_ref().is_some_and(Action::is_terminal) {
            recipient.action = Some(Action::Delayed {
                diagnostic_code: Some(diagnostic.to_owned()),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use robin_dns::tlsa::TlsaRecord;
    use std::sync::Mutex;

    fn mailbox(addr: &str) -> Mailbox {
        Mailbox(addr.parse().unwrap())
    }

    fn envelope() -> Envelope {
        let mut envelope = Envelope::new(Some(mailbox("sender@example.com")));
        envelope.add_recipient(mailbox("rcpt@example.net"));
        envelope
    }

    fn dane_candidate(hostname: &str) -> MxCandidate {
        MxCandidate {
            hostname: hostname.to_owned(),
            port: 25,
            preference: 10,
            policy: SecurityPolicy::DaneMandatory {
                tlsa: vec![TlsaRecord {
                    usage: 3,
                    selector: 1,
                    matching_type: 1,
                    data: vec![0; 32],
                }],
            },
        }
    }

    fn opportunistic_candidate(hostname: &str) -> MxCandidate {
        MxCandidate {
            hostname: hostname.to_owned(),
            port: 25,
            preference: 20,
            policy: SecurityPolicy::Opportunistic,
        }
    }

    /// Records which candidates were tried and fails them all the same way.
    struct ScriptedAttempt {
        tried: Mutex<Vec<String>>,
        outcome: fn(&MxCandidate) -> Result<(), Delivery>,
    }

    #[async_trait::async_trait]
    impl Attempt for ScriptedAttempt {
        async fn attempt(
            &self,
            _client_name: &str,
            _envelope: &mut Envelope,
            candidate: &MxCandidate,
            _force_plaintext: bool,
        ) -> Result<(), Delivery> {
            self.tried.lock().unwrap().push(candidate.hostname.clone());
            (self.outcome)(candidate)
        }
    }

    #[tokio::test]
    async fn dane_failure_never_falls_back_to_a_weaker_candidate() {
        let attempt = ScriptedAttempt {
            tried: Mutex::new(vec![]),
            outcome: |candidate| {
                Err(Delivery::Policy {
                    class: candidate.policy.class(),
                    with_source: Some("no TLSA record matched".to_owned()),
                })
            },
        };

        let mut envelope = envelope();
        let candidates = [
            dane_candidate("mx1.example.net"),
            dane_candidate("mx2.example.net"),
            opportunistic_candidate("fallback.example.net"),
        ];

        deliver_with(&attempt, "robin.example.com", &mut envelope, &candidates).await;

        // Both DANE candidates may be tried; the opportunistic one must not.
        assert_eq!(
            *attempt.tried.lock().unwrap(),
            ["mx1.example.net", "mx2.example.net"]
        );
        // The envelope is deferred, not rejected.
        assert!(matches!(
            envelope.recipients[0].action,
            Some(Action::Delayed { .. })
        ));
    }

    #[tokio::test]
    async fn connection_failures_walk_the_whole_list() {
        let attempt = ScriptedAttempt {
            tried: Mutex::new(vec![]),
            outcome: |_| {
                Err(Delivery::Connection {
                    with_source: Some("connection refused".to_owned()),
                })
            },
        };

        let mut envelope = envelope();
        let candidates = [
            opportunistic_candidate("mx1.example.net"),
            opportunistic_candidate("mx2.example.net"),
        ];

        deliver_with(&attempt, "robin.example.com", &mut envelope, &candidates).await;

        assert_eq!(
            *attempt.tried.lock().unwrap(),
            ["mx1.example.net", "mx2.example.net"]
        );
        assert!(matches!(
            envelope.recipients[0].action,
            Some(Action::Delayed { .. })
        ));
    }

    #[tokio::test]
    async fn a_permanent_envelope_rejection_stops_the_walk() {
        let attempt = ScriptedAttempt {
            tried: Mutex::new(vec![]),
            outcome: |_| {
                Err(Delivery::Permanent {
                    reply: robin_protocol::ReplyCode::Code { code: 550 },
                    with_source: Some("sender denied".to_owned()),
                })
            },
        };

        let mut envelope = envelope();
        let candidates = [
            opportunistic_candidate("mx1.example.net"),
            opportunistic_candidate("mx2.example.net"),
        ];

        deliver_with(&attempt, "robin.example.com", &mut envelope, &candidates).await;

        assert_eq!(*attempt.tried.lock().unwrap(), ["mx1.example.net"]);
        assert!(matches!(
            envelope.recipients[0].action,
            Some(Action::Failed { .. })
        ));
    }
}
