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

use crate::envelope::Envelope;
use crate::Mailbox;
use robin_protocol::{
    auth::Mechanism, ClientName, Domain, EnvelopeLog, SessionLog, Stage, Transaction,
    TransactionLog, Verb, XclientAttrs,
};

macro_rules! exactly {
    ($i:expr) => {
        $i..=$i
    };
}

#[derive(Debug, thiserror::Error)]
#[error("invalid state, operation valid at {expected:?}, but got {got:?}")]
pub struct StateError {
    expected: std::ops::RangeInclusive<Stage>,
    got: Stage,
}

impl StateError {
    #[must_use]
    pub const fn new(expected: std::ops::RangeInclusive<Stage>, got: Stage) -> Self {
        Self { expected, got }
    }
}

/// Parameters of the TLS tunnel protecting a session.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct TlsProps {
    pub protocol_version: String,
    pub cipher_suite: String,
    pub sni: Option<String>,
}

/// Authentication state of the session.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SaslProps {
    /// `None` when the identity was declared by a trusted front-end.
    pub mechanism: Option<Mechanism>,
    pub authid: String,
}

/// Facts established when the connection was accepted. A trusted front-end
/// may overwrite the client identity through XCLIENT.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ConnectProps {
    #[serde(with = "time::serde::iso8601")]
    pub connect_timestamp: time::OffsetDateTime,
    pub connect_uuid: uuid::Uuid,
    pub client_addr: std::net::SocketAddr,
    pub server_addr: std::net::SocketAddr,
    pub server_name: Domain,
    /// Reverse DNS of the peer, when it resolves.
    pub client_ptr: Option<Domain>,
    pub tls: Option<TlsProps>,
    pub sasl: Option<SaslProps>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct HeloProps {
    pub client_name: ClientName,
    /// The client used HELO instead of EHLO.
    pub using_deprecated: bool,
}

/// Per-connection context: identity, handshake state, the envelope being
/// built and the transaction record. Owned by exactly one session task.
#[derive(Debug)]
pub struct SessionCtx {
    connect: ConnectProps,
    helo: Option<HeloProps>,
    envelope: Option<Envelope>,
    /// Logs of the envelopes already sealed, in order.
    completed: Vec<EnvelopeLog>,
    /// Session-level transactions (greeting, EHLO, STARTTLS, AUTH, ...).
    log: TransactionLog,
    auth_failures: usize,
}

impl SessionCtx {
    #[must_use]
    pub const fn new(connect: ConnectProps) -> Self {
        Self {
            connect,
            helo: None,
            envelope: None,
            completed: vec![],
            log: TransactionLog::new(),
            auth_failures: 0,
        }
    }

    #[must_use]
    pub fn stage(&self) -> Stage {
        match (&self.helo, &self.envelope) {
            (_, Some(envelope)) if !envelope.recipients.is_empty() => Stage::RcptTo,
            (_, Some(_)) => Stage::MailFrom,
            (Some(_), None) => Stage::Helo,
            (None, None) => Stage::Connect,
        }
    }

    #[must_use]
    pub const fn connect(&self) -> &ConnectProps {
        &self.connect
    }

    pub fn mut_connect(&mut self) -> &mut ConnectProps {
        &mut self.connect
    }

    #[must_use]
    pub const fn server_name(&self) -> &Domain {
        &self.connect.server_name
    }

    pub fn helo(&self) -> Result<&HeloProps, StateError> {
        self.helo
            .as_ref()
            .ok_or_else(|| StateError::new(Stage::Helo..=Stage::Finished, self.stage()))
    }

    #[must_use]
    pub const fn is_secured(&self) -> bool {
        self.connect.tls.is_some()
    }

    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.connect.sasl.is_some()
    }

    /// HELO/EHLO: valid at any point, resets any open envelope.
    pub fn set_helo(&mut self, client_name: ClientName, using_deprecated: bool) {
        self.abort_envelope();
        self.helo = Some(HeloProps {
            client_name,
            using_deprecated,
        });
    }

    /// A successful STARTTLS discards everything learned on the clear
    /// channel; the client must EHLO again.
    pub fn set_secured(&mut self, tls: TlsProps) -> Result<(), StateError> {
        if self.envelope.is_some() || self.is_secured() || self.is_authenticated() {
            return Err(StateError::new(
                Stage::Connect..=Stage::Helo,
                self.stage(),
            ));
        }
        self.connect.tls = Some(tls);
        self.helo = None;
        Ok(())
    }

    pub fn set_authenticated(
        &mut self,
        mechanism: Mechanism,
        authid: String,
    ) -> Result<(), StateError> {
        if self.is_authenticated() || self.envelope.is_some() {
            return Err(StateError::new(exactly!(Stage::Helo), self.stage()));
        }
        self.helo()?;
        self.connect.sasl = Some(SaslProps {
            mechanism: Some(mechanism),
            authid,
        });
        Ok(())
    }

    /// Count a failed AUTH exchange, returning the total so far.
    pub fn record_auth_failure(&mut self) -> usize {
        self.auth_failures += 1;
        self.auth_failures
    }

    /// MAIL FROM: opens the envelope.
    pub fn open_envelope(&mut self, reverse_path: Option<Mailbox>) -> Result<(), StateError> {
        if self.envelope.is_some() {
            return Err(StateError::new(exactly!(Stage::Helo), self.stage()));
        }
        self.helo()?;
        self.envelope = Some(Envelope::new(reverse_path));
        Ok(())
    }

    /// RCPT TO: appends an accepted recipient.
    pub fn add_recipient(&mut self, forward_path: Mailbox) -> Result<(), StateError> {
        self.mut_envelope()?.add_recipient(forward_path);
        Ok(())
    }

    pub fn envelope(&self) -> Result<&Envelope, StateError> {
        self.envelope
            .as_ref()
            .ok_or_else(|| StateError::new(Stage::MailFrom..=Stage::RcptTo, self.stage()))
    }

    pub fn mut_envelope(&mut self) -> Result<&mut Envelope, StateError> {
        let stage = self.stage();
        self.envelope
            .as_mut()
            .ok_or_else(|| StateError::new(Stage::MailFrom..=Stage::RcptTo, stage))
    }

    /// End of DATA/BDAT LAST: the envelope leaves the session for the queue,
    /// its log stays on record.
    pub fn seal_envelope(&mut self) -> Result<Envelope, StateError> {
        let stage = self.stage();
        let envelope = self
            .envelope
            .take()
            .ok_or_else(|| StateError::new(exactly!(Stage::RcptTo), stage))?;

        self.completed.push(envelope.log.clone());
        Ok(envelope)
    }

    /// RSET or a new HELO: drop the open envelope, keep its log.
    pub fn abort_envelope(&mut self) {
        if let Some(envelope) = self.envelope.take() {
            self.completed.push(envelope.log);
        }
    }

    /// Record a verb exchange. MAIL, RCPT, DATA and BDAT belong to the open
    /// envelope; everything else is session-level.
    pub fn record(&mut self, transaction: Transaction) {
        let envelope_verb = matches!(
            transaction.verb(),
            Verb::Mail | Verb::Rcpt | Verb::Data | Verb::Bdat
        );
        match &mut self.envelope {
            Some(envelope) if envelope_verb => envelope.log.push(transaction),
            _ => self.log.push(transaction),
        }
    }

    /// Assemble the complete transaction record of the session.
    #[must_use]
    pub fn session_log(&self) -> SessionLog {
        let mut log = SessionLog::new(self.log.clone());
        for envelope in &self.completed {
            log.push_envelope(envelope.clone());
        }
        if let Some(open) = &self.envelope {
            log.push_envelope(open.log.clone());
        }
        log
    }

    /// XCLIENT from a trusted front-end: adopt the declared identity and
    /// start the session over.
    pub fn apply_xclient(&mut self, attrs: XclientAttrs) {
        self.abort_envelope();
        self.helo = None;

        if let Some(addr) = attrs.addr {
            let port = attrs.port.unwrap_or_else(|| self.connect.client_addr.port());
            self.connect.client_addr = std::net::SocketAddr::new(addr, port);
        }
        if let Some(name) = attrs.name {
            self.connect.client_ptr = name.parse::<Domain>().ok();
        }
        if let Some(login) = attrs.login {
            self.connect.sasl = Some(SaslProps {
                mechanism: None,
                authid: login,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> SessionCtx {
        SessionCtx::new(ConnectProps {
            connect_timestamp: time::OffsetDateTime::now_utc(),
            connect_uuid: uuid::Uuid::new_v4(),
            client_addr: "192.0.2.7:52341".parse().unwrap(),
            server_addr: "198.51.100.2:25".parse().unwrap(),
            server_name: "mx.example.com".parse().unwrap(),
            client_ptr: None,
            tls: None,
            sasl: None,
        })
    }

    fn client_name() -> ClientName {
        ClientName::Domain("client.example.com".parse().unwrap())
    }

    fn mailbox(addr: &str) -> Mailbox {
        Mailbox(addr.parse().unwrap())
    }

    #[test]
    fn verbs_are_gated_by_stage() {
        let mut ctx = ctx();
        assert_eq!(ctx.stage(), Stage::Connect);

        // MAIL before EHLO.
        assert!(ctx.open_envelope(None).is_err());
        // RCPT before MAIL.
        assert!(ctx.add_recipient(mailbox("jane@doe.com")).is_err());

        ctx.set_helo(client_name(), false);
        assert_eq!(ctx.stage(), Stage::Helo);

        ctx.open_envelope(Some(mailbox("john@doe.com"))).unwrap();
        assert_eq!(ctx.stage(), Stage::MailFrom);

        // Nested MAIL.
        assert!(ctx.open_envelope(None).is_err());

        ctx.add_recipient(mailbox("jane@doe.com")).unwrap();
        assert_eq!(ctx.stage(), Stage::RcptTo);

        let envelope = ctx.seal_envelope().unwrap();
        assert_eq!(envelope.recipients.len(), 1);
        assert_eq!(ctx.stage(), Stage::Helo);
    }

    #[test]
    fn starttls_discards_the_helo() {
        let mut ctx = ctx();
        ctx.set_helo(client_name(), false);

        ctx.set_secured(TlsProps {
            protocol_version: "TLSv1_3".to_owned(),
            cipher_suite: "TLS13_AES_256_GCM_SHA384".to_owned(),
            sni: None,
        })
        .unwrap();

        assert!(ctx.is_secured());
        assert_eq!(ctx.stage(), Stage::Connect);

        // A second STARTTLS is invalid.
        assert!(ctx
            .set_secured(TlsProps {
                protocol_version: String::new(),
                cipher_suite: String::new(),
                sni: None,
            })
            .is_err());
    }

    #[test]
    fn auth_is_rejected_when_already_authenticated() {
        let mut ctx = ctx();
        ctx.set_helo(client_name(), false);

        ctx.set_authenticated(Mechanism::Plain, "jane".to_owned())
            .unwrap();
        assert!(ctx.is_authenticated());
        assert!(ctx
            .set_authenticated(Mechanism::Plain, "jane".to_owned())
            .is_err());
    }

    #[test]
    fn helo_resets_an_open_envelope() {
        let mut ctx = ctx();
        ctx.set_helo(client_name(), false);
        ctx.open_envelope(None).unwrap();

        ctx.set_helo(client_name(), true);
        assert_eq!(ctx.stage(), Stage::Helo);
        assert_eq!(ctx.session_log().envelopes().len(), 1);
    }

    #[test]
    fn xclient_overwrites_the_identity() {
        let mut ctx = ctx();
        ctx.set_helo(client_name(), false);

        ctx.apply_xclient(XclientAttrs {
            addr: Some("203.0.113.9".parse().unwrap()),
            port: Some(4242),
            name: Some("real-client.example.net".to_owned()),
            login: Some("relay".to_owned()),
        });

        assert_eq!(
            ctx.connect().client_addr,
            "203.0.113.9:4242".parse().unwrap()
        );
        assert_eq!(
            ctx.connect().client_ptr.as_ref().unwrap().to_string(),
            "real-client.example.net"
        );
        assert_eq!(ctx.connect().sasl.as_ref().unwrap().authid, "relay");
        assert_eq!(ctx.stage(), Stage::Connect);
    }
}
