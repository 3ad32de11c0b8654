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

//! `--client`: one scripted outbound session driven by client.json, the
//! message taken from standard input.

use crate::AnyError;
use robin_common::envelope::{Action, Envelope, MessageBody};
use robin_common::extensions::Extension;
use robin_common::response::Ehlo;
use robin_common::template::substitute;
use robin_common::transfer_error::Delivery;
use robin_common::Mailbox;
use robin_config::{ClientConfig, Config, Route};
use robin_delivery::smtp::{deliver_mail, SenderHandler, UpgradeTls};
use robin_dns::{DnsClient, SystemResolver};
use robin_protocol::auth::{Credentials, Mechanism};
use robin_protocol::{rustls, tokio_rustls, Reply, Transaction};
use std::sync::Arc;

struct CliSender {
    config: ClientConfig,
    target: String,
    credentials: Option<(Mechanism, Credentials)>,
    envelope: Envelope,
    tls_active: bool,
    ehlo: Option<Ehlo>,
    accepted: usize,
}

#[async_trait::async_trait]
impl SenderHandler for CliSender {
    fn get_client_name(&self) -> String {
        self.config.ehlo.clone()
    }

    fn get_server_hostname(&self) -> String {
        self.target.clone()
    }

    fn get_mail_from(&self) -> Option<Mailbox> {
        self.envelope.reverse_path.clone()
    }

    fn get_rcpt_to(&self) -> Vec<Mailbox> {
        self.envelope
            .recipients
            .iter()
            .map(|r| r.forward_path.clone())
            .collect()
    }

    async fn get_message(&mut self) -> Result<Vec<u8>, Delivery> {
        self.envelope.body.read().await.map_err(|e| Delivery::Client {
            with_source: Some(e.to_string()),
        })
    }

    async fn on_ehlo(&mut self, response: Ehlo) -> Result<UpgradeTls, Delivery> {
        let offers_starttls = response.contains(Extension::StartTls);
        self.ehlo = Some(response);

        if self.tls_active {
            return Ok(UpgradeTls::No);
        }
        if self.config.tls {
            if offers_starttls {
                return Ok(UpgradeTls::Yes);
            }
            return Err(Delivery::Tls {
                with_source: Some(
                    "tls is required by the client configuration, but the server \
                     did not advertise STARTTLS"
                        .to_owned(),
                ),
            });
        }
        Ok(UpgradeTls::No)
    }

    fn get_tls_connector(
        &self,
    ) -> Result<(tokio_rustls::TlsConnector, rustls::ServerName), Delivery> {
        let mut root_store = rustls::RootCertStore::empty();
        root_store.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
            rustls::OwnedTrustAnchor::from_subject_spki_name_constraints(
                ta.subject,
                ta.spki,
                ta.name_constraints,
            )
        }));

        let config = rustls::ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        let server_name =
            rustls::ServerName::try_from(self.target.as_str()).map_err(|e| Delivery::Tls {
                with_source: Some(e.to_string()),
            })?;

        Ok((
            tokio_rustls::TlsConnector::from(Arc::new(config)),
            server_name,
        ))
    }

    fn on_tls_established(&mut self) {
        self.tls_active = true;
    }

    fn get_credentials(&self) -> Option<(Mechanism, Credentials)> {
        self.credentials.clone()
    }

    fn has_extension(&self, extension: Extension) -> bool {
        self.ehlo.as_ref().is_some_and(|e| e.contains(extension))
    }

    fn use_chunking(&self) -> bool {
        false
    }

    fn has_accepted_recipient(&self) -> bool {
        self.accepted > 0
    }

    async fn on_mail_from(&mut self, reply: Reply) -> Result<(), Delivery> {
        if reply.is_error() {
            return Err(Delivery::from_reply(&reply));
        }
        Ok(())
    }

    async fn on_rcpt_to(&mut self, rcpt: &Mailbox, reply: Reply) -> Result<(), Delivery> {
        let action = match reply.code().value() / 100 {
            2 => {
                self.accepted += 1;
                return Ok(());
            }
            5 => Action::Failed {
                diagnostic_code: Some(reply.text()),
            },
            _ => Action::Delayed {
                diagnostic_code: Some(reply.text()),
            },
        };
        if let Some(recipient) = self
            .envelope
            .recipients
            .iter_mut()
            .find(|r| r.forward_path == *rcpt)
        {
            recipient.action = Some(action);
        }
        Ok(())
    }

    async fn on_data_start(&mut self, reply: Reply) -> Result<(), Delivery> {
        Err(Delivery::from_reply(&reply))
    }

    async fn on_data_end(&mut self, reply: Reply) -> Result<(), Delivery> {
        let action = match reply.code().value() / 100 {
            2 => Action::Delivered,
            5 => Action::Failed {
                diagnostic_code: Some(reply.text()),
            },
            _ => Action::Delayed {
                diagnostic_code: Some(reply.text()),
            },
        };
        for recipient in &mut self.envelope.recipients {
            if recipient.action.is_none() {
                recipient.action = Some(action.clone());
            }
        }
        Ok(())
    }

    fn record(&mut self, transaction: Transaction) {
        self.envelope.log.push(transaction);
    }
}

/// Pick the next hop: a route named after the recipient domain wins, then
/// the static mx list, then MX resolution of the recipient domain.
async fn pick_target(
    config: &ClientConfig,
    domain: &str,
) -> Result<(String, u16, Option<(Mechanism, Credentials)>), AnyError> {
    if let Some(route) = config.routes.iter().find(|r| r.name == domain) {
        return Ok((
            route.mx.clone(),
            route.port,
            route_credentials(route)?,
        ));
    }

    if let Some(mx) = config.mx.first() {
        return Ok((mx.clone(), config.port, None));
    }

    let dns = DnsClient::new(Arc::new(SystemResolver::from_system_conf()?));
    let records = dns.lookup_mx(domain).await?;
    let mx = records
        .first()
        .map_or_else(|| domain.to_owned(), |r| r.exchange.clone());
    Ok((mx, config.port, None))
}

/// Resolve a route's credential templates against the environment.
fn route_credentials(route: &Route) -> Result<Option<(Mechanism, Credentials)>, AnyError> {
    let Some(mechanism) = route.auth else {
        return Ok(None);
    };
    let (Some(user), Some(pass)) = (&route.user, &route.pass) else {
        return Err(format!("route {:?} declares auth but no user/pass", route.name).into());
    };

    let bindings = std::env::vars().collect();
    Ok(Some((
        mechanism,
        Credentials::new(substitute(user, &bindings)?, substitute(pass, &bindings)?),
    )))
}

pub async fn run(config_dir: &std::path::Path) -> Result<(), AnyError> {
    let config = ClientConfig::from_dir(&config_dir)?;

    if config.rcpt.is_empty() {
        return Err("client.json does not declare any rcpt".into());
    }

    let mut envelope = Envelope::new(if config.mail.is_empty() {
        None
    } else {
        Some(Mailbox(config.mail.parse()?))
    });
    for rcpt in &config.rcpt {
        envelope.add_recipient(Mailbox(rcpt.parse()?));
    }

    let message = {
        use tokio::io::AsyncReadExt;
        let mut body = Vec::new();
        tokio::io::stdin().read_to_end(&mut body).await?;
        body
    };
    envelope.body = MessageBody::Bytes(message);

    let domain = envelope.recipients[0].forward_path.domain().to_string();
    let domain = domain.trim_end_matches('.').to_owned();
    let (target, port, credentials) = pick_target(&config, &domain).await?;

    tracing::info!(%target, port, %domain, "starting client session");
    let socket = tokio::net::TcpStream::connect((target.as_str(), port)).await?;

    let mut sender = CliSender {
        config,
        target,
        credentials,
        envelope,
        tls_active: false,
        ehlo: None,
        accepted: 0,
    };

    let outcome = deliver_mail(socket, &mut sender).await;

    for transaction in sender.envelope.log.as_log().iter() {
        println!(
            "{} {} -> {}",
            if transaction.is_error() { "!!" } else { "ok" },
            transaction.payload(),
            transaction.reply().text(),
        );
    }

    outcome?;
    match sender.envelope.disposition() {
        robin_common::envelope::Disposition::Delivered => Ok(()),
        disposition => Err(format!("session finished with disposition {disposition}").into()),
    }
}
