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

use robin_common::{extensions::Extension, response::Ehlo, transfer_error::Delivery, Mailbox};
use robin_protocol::auth::{Credentials, Mechanism};
use robin_protocol::{rustls, tokio_rustls, Reply, Transaction};

/// Whether the exchange should negotiate TLS after EHLO.
#[derive(Debug, PartialEq, Eq)]
pub enum UpgradeTls {
    Yes,
    No,
}

/// Callbacks driving one outbound session.
///
/// The exchange records every verb into the handler and asks it for the
/// envelope pieces; the handler decides what replies mean.
#[async_trait::async_trait]
pub trait SenderHandler: Send {
    /// `false` when the exchange resumes an already-greeted connection.
    fn has_just_connected(&self) -> bool {
        true
    }

    async fn on_greetings(&mut self, reply: Reply) -> Result<(), Delivery> {
        if reply.code().value() == 220 {
            Ok(())
        } else {
            Err(Delivery::from_reply(&reply))
        }
    }

    fn get_client_name(&self) -> String;

    /// Hostname of the next hop, for SNI and the DIGEST-MD5 digest-uri.
    fn get_server_hostname(&self) -> String;

    fn get_mail_from(&self) -> Option<Mailbox>;
    fn get_rcpt_to(&self) -> Vec<Mailbox>;
    async fn get_message(&mut self) -> Result<Vec<u8>, Delivery>;

    /// Decide on STARTTLS from the advertised capability list, per the
    /// security policy of the candidate.
    async fn on_ehlo(&mut self, response: Ehlo) -> Result<UpgradeTls, Delivery>;

    /// The connector and server name to use when upgrading.
    fn get_tls_connector(&self) -> Result<(tokio_rustls::TlsConnector, rustls::ServerName), Delivery>;

    /// The TLS handshake completed.
    fn on_tls_established(&mut self);

    /// Credentials to present once the channel is settled, for routes that
    /// authenticate against their next hop. The placeholders of configured
    /// credentials are resolved before this is called.
    fn get_credentials(&self) -> Option<(Mechanism, Credentials)> {
        None
    }

    fn has_extension(&self, extension: Extension) -> bool;

    fn has_pipelining(&self) -> bool {
        self.has_extension(Extension::Pipelining)
    }

    /// Prefer BDAT over DATA when the peer offers CHUNKING.
    fn use_chunking(&self) -> bool {
        self.has_extension(Extension::Chunking)
    }

    /// At least one RCPT was accepted, so the message may be sent.
    fn has_accepted_recipient(&self) -> bool;

    async fn on_mail_from(&mut self, reply: Reply) -> Result<(), Delivery>;
    async fn on_rcpt_to(&mut self, rcpt: &Mailbox, reply: Reply) -> Result<(), Delivery>;
    async fn on_data_start(&mut self, reply: Reply) -> Result<(), Delivery>;
    async fn on_data_end(&mut self, reply: Reply) -> Result<(), Delivery>;

    /// Sink for the per-verb record of the session.
    fn record(&mut self, transaction: Transaction);
}
