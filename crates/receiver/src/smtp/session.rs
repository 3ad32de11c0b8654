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

//! The server side of the verb engine: one connection, one session, verbs
//! dispatched against the staged context, every exchange recorded.

use crate::webhook::{Dispatcher, WebhookEvent};
use robin_common::envelope::{Envelope, MessageBody};
use robin_common::session::{SessionCtx, TlsProps};
use robin_common::Mailbox;
use robin_config::server::ServerConfig;
use robin_protocol::auth::{AuthError, Mechanism, ServerExchange, ServerStep};
use robin_protocol::{
    Command, Error, ParseArgsError, Reader, Reply, Transaction, Verb, Writer,
};
use std::sync::Arc;

/// Where sealed envelopes go: the delivery queue in production, a vec in
/// tests.
pub trait EnvelopeSink: Send + Sync {
    fn submit(&self, envelope: Envelope);
}

/// How a handled verb affects the session loop.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
    UpgradeTls,
}

/// What ends one pass of the loop over a transport.
#[derive(Debug, PartialEq, Eq)]
pub enum LoopEnd {
    Quit,
    UpgradeTls,
}

pub struct Session {
    ctx: SessionCtx,
    config: Arc<ServerConfig>,
    webhooks: Arc<Dispatcher>,
    sink: Arc<dyn EnvelopeSink>,
    tls_acceptor: Option<tokio_rustls::TlsAcceptor>,
    /// The real TCP peer, before any XCLIENT overwrite.
    peer_ip: std::net::IpAddr,
    errors: i64,
}

impl Session {
    #[must_use]
    pub fn new(
        ctx: SessionCtx,
        config: Arc<ServerConfig>,
        webhooks: Arc<Dispatcher>,
        sink: Arc<dyn EnvelopeSink>,
        tls_acceptor: Option<tokio_rustls::TlsAcceptor>,
    ) -> Self {
        let peer_ip = ctx.connect().client_addr.ip();
        Self {
            ctx,
            config,
            webhooks,
            sink,
            tls_acceptor,
            peer_ip,
            errors: 0,
        }
    }

    #[must_use]
    pub const fn ctx(&self) -> &SessionCtx {
        &self.ctx
    }

    fn reply(raw: impl AsRef<str>) -> Reply {
        #[allow(clippy::expect_used)]
        raw.as_ref().parse().expect("server replies are well-formed")
    }

    /// Run the session over a transport, upgrading to TLS in place when the
    /// client negotiates STARTTLS.
    pub async fn serve<S>(mut self, stream: S) -> std::io::Result<()>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
    {
        let (read, write) = tokio::io::split(stream);
        let mut reader = Reader::new(read);
        reader.set_timeout(self.config.timeouts.read);
        let mut writer = Writer::new(write);

        writer
            .write_all(&format!(
                "220 {} Service ready\r\n",
                self.ctx.server_name()
            ))
            .await?;

        match self.run(&mut reader, &mut writer).await? {
            LoopEnd::Quit => Ok(()),
            LoopEnd::UpgradeTls => {
                let Some(acceptor) = self.tls_acceptor.clone() else {
                    return Ok(());
                };
                let handshake_timeout = self
                    .config
                    .tls
                    .as_ref()
                    .map_or(std::time::Duration::from_secs(5), |tls| {
                        tls.handshake_timeout
                    });

                let stream = reader.into_inner().unsplit(writer.into_inner());
                let tls_stream =
                    match tokio::time::timeout(handshake_timeout, acceptor.accept(stream)).await {
                        Ok(Ok(tls_stream)) => tls_stream,
                        Ok(Err(error)) => {
                            tracing::debug!(%error, "TLS handshake failed");
                            return Ok(());
                        }
                        Err(_elapsed) => {
                            tracing::debug!("TLS handshake timed out");
                            return Ok(());
                        }
                    };

                {
                    let (_, connection) = tls_stream.get_ref();
                    let props = TlsProps {
                        protocol_version: connection
                            .protocol_version()
                            .map_or_else(String::new, |v| format!("{v:?}")),
                        cipher_suite: connection
                            .negotiated_cipher_suite()
                            .map_or_else(String::new, |suite| format!("{:?}", suite.suite())),
                        sni: connection.server_name().map(ToOwned::to_owned),
                    };
                    if let Err(error) = self.ctx.set_secured(props) {
                        tracing::warn!(%error, "STARTTLS accepted in an invalid state");
                        return Ok(());
                    }
                }

                let (read, write) = tokio::io::split(tls_stream);
                let mut reader = Reader::new(read);
                reader.set_timeout(self.config.timeouts.read);
                let mut writer = Writer::new(write);

                // No second upgrade: set_secured above now refuses it.
                let _end = self.run(&mut reader, &mut writer).await?;
                Ok(())
            }
        }
    }

    async fn run<R, W>(
        &mut self,
        reader: &mut Reader<R>,
        writer: &mut Writer<W>,
    ) -> std::io::Result<LoopEnd>
    where
        R: tokio::io::AsyncRead + Unpin + Send,
        W: tokio::io::AsyncWrite + Unpin + Send,
    {
        loop {
            let line = match reader.read_line().await {
                Ok(line) => line,
                Err(Error::Timeout(_)) => {
                    let _ = writer
                        .write_all("421 4.4.2 connection timed out, closing\r\n")
                        .await;
                    return Ok(LoopEnd::Quit);
                }
                Err(Error::BufferTooLong { .. }) => {
                    let _ = writer.write_all("500 5.5.2 line too long\r\n").await;
                    return Ok(LoopEnd::Quit);
                }
                Err(_) => return Ok(LoopEnd::Quit),
            };

            let command = match Command::parse(&line) {
                Ok(command) => command,
                Err(error) => {
                    let reply = Self::reply(match &error {
                        ParseArgsError::UnknownVerb { .. } => {
                            "500 5.5.2 command not recognized\r\n"
                        }
                        _ => "501 5.5.4 invalid arguments\r\n",
                    });
                    tracing::debug!(%error, line = %line, "unparsable command");
                    match self.count_error(writer, &reply).await? {
                        Flow::Quit => return Ok(LoopEnd::Quit),
                        _ => continue,
                    }
                }
            };

            let flow = match command {
                Command::Data => self.on_data(reader, writer).await?,
                Command::Bdat { size, last } => {
                    self.on_bdat(reader, writer, size, last).await?
                }
                Command::Auth {
                    mechanism,
                    initial_response,
                } => {
                    self.on_auth(reader, writer, &line, mechanism, initial_response)
                        .await?
                }
                other => {
                    let (verb, reply, drop) = self.dispatch(other, &line).await;
                    self.finish(writer, verb, &line, reply, drop).await?
                }
            };

            match flow {
                Flow::Continue => {}
                Flow::Quit => return Ok(LoopEnd::Quit),
                Flow::UpgradeTls => return Ok(LoopEnd::UpgradeTls),
            }
        }
    }

    /// The simple verbs: one command, one reply, no extra reads.
    async fn dispatch(&mut self, command: Command, line: &str) -> (Verb, Reply, bool) {
        let verb = command.verb();
        match command {
            Command::Helo { client_name } => {
                self.ctx.set_helo(client_name.clone(), true);
                let reply = Self::reply(format!(
                    "250 {} Greetings {client_name}\r\n",
                    self.ctx.server_name()
                ));
                (verb, reply, false)
            }
            Command::Ehlo { client_name } => {
                self.ctx.set_helo(client_name.clone(), false);
                (verb, self.build_ehlo_reply(&client_name.to_string()), false)
            }
            Command::StartTls => (verb, self.starttls_reply(), false),
            Command::MailFrom { reverse_path, .. } => {
                if self.ctx.helo().is_err() || self.ctx.envelope().is_ok() {
                    return (verb, Self::reply("503 5.5.1 bad sequence of commands\r\n"), false);
                }

                let default = Self::reply(reverse_path.as_ref().map_or_else(
                    || "250 sender <> Ok\r\n".to_owned(),
                    |path| format!("250 sender <{path}> Ok\r\n"),
                ));
                let (reply, drop) = self.consult(verb, line, default).await;

                if !reply.is_error() {
                    #[allow(clippy::expect_used)]
                    self.ctx
                        .open_envelope(reverse_path.map(Mailbox))
                        .expect("stage was checked above");
                }
                (verb, reply, drop)
            }
            Command::RcptTo { forward_path, .. } => {
                if self.ctx.envelope().is_err() {
                    return (verb, Self::reply("503 5.5.1 bad sequence of commands\r\n"), false);
                }

                let default = Self::reply(format!("250 recipient <{forward_path}> Ok\r\n"));
                let (reply, drop) = self.consult(verb, line, default).await;

                if !reply.is_error() {
                    #[allow(clippy::expect_used)]
                    self.ctx
                        .add_recipient(Mailbox(forward_path))
                        .expect("an envelope is open");
                }
                (verb, reply, drop)
            }
            Command::Rset => {
                self.ctx.abort_envelope();
                (verb, Self::reply("250 Ok\r\n"), false)
            }
            // No mailbox disclosure.
            Command::Vrfy { .. } => (
                verb,
                Self::reply("252 2.5.2 cannot VRFY user, but will accept message\r\n"),
                false,
            ),
            Command::Noop => (verb, Self::reply("250 Ok\r\n"), false),
            Command::Quit => (
                verb,
                Self::reply(format!(
                    "221 {} Service closing transmission channel\r\n",
                    self.ctx.server_name()
                )),
                true,
            ),
            Command::Xclient { attrs } => {
                if !self.config.xclient_trust.contains(&self.peer_ip) {
                    return (verb, Self::reply("550 5.7.1 XCLIENT not allowed\r\n"), false);
                }
                self.ctx.apply_xclient(attrs);
                tracing::info!(
                    client_addr = %self.ctx.connect().client_addr,
                    "session identity overwritten by XCLIENT"
                );
                (
                    verb,
                    Self::reply(format!(
                        "220 {} Service ready\r\n",
                        self.ctx.server_name()
                    )),
                    false,
                )
            }
            // Handled by the dedicated paths in `run`.
            Command::Data | Command::Bdat { .. } | Command::Auth { .. } => (
                verb,
                Self::reply("451 4.3.0 internal dispatch error\r\n"),
                false,
            ),
        }
    }

    fn starttls_reply(&self) -> Reply {
        if !self.config.esmtp.starttls {
            // https://www.ietf.org/rfc/rfc5321.txt#4.2.4
            Self::reply("502 5.5.1 command not implemented\r\n")
        } else if self.ctx.is_secured() {
            Self::reply("554 5.5.1 Error: TLS already active\r\n")
        } else if self.ctx.is_authenticated() || self.ctx.envelope().is_ok() {
            Self::reply("503 5.5.1 bad sequence of commands\r\n")
        } else if self.tls_acceptor.is_none() {
            Self::reply("454 4.7.0 TLS not available due to temporary reason\r\n")
        } else {
            Self::reply("220 Ready to start TLS\r\n")
        }
    }

    fn build_ehlo_reply(&self, client_name: &str) -> Reply {
        let esmtp = &self.config.esmtp;

        let capabilities = [
            Some(format!(
                "250-{} Greetings {client_name}\r\n",
                self.ctx.server_name()
            )),
            Some("250-ENHANCEDSTATUSCODES\r\n".to_owned()),
            esmtp.pipelining.then(|| "250-PIPELINING\r\n".to_owned()),
            Some("250-8BITMIME\r\n".to_owned()),
            Some(format!("250-SIZE {}\r\n", esmtp.size)),
            esmtp.chunking.then(|| "250-CHUNKING\r\n".to_owned()),
            (esmtp.starttls && self.tls_acceptor.is_some() && !self.ctx.is_secured())
                .then(|| "250-STARTTLS\r\n".to_owned()),
            esmtp.auth.as_ref().map(|auth| {
                format!(
                    "250-AUTH {}\r\n",
                    self.offered_mechanisms(auth)
                        .map(|m| m.to_string())
                        .collect::<Vec<_>>()
                        .join(" ")
                )
            }),
            self.config
                .xclient_trust
                .contains(&self.peer_ip)
                .then(|| "250-XCLIENT ADDR NAME PORT LOGIN\r\n".to_owned()),
            Some("250 Ok\r\n".to_owned()),
        ]
        .into_iter()
        .flatten()
        .collect::<String>();

        Self::reply(capabilities)
    }

    fn offered_mechanisms<'a>(
        &'a self,
        auth: &'a robin_config::server::Auth,
    ) -> impl Iterator<Item = Mechanism> + 'a {
        let secured = self.ctx.is_secured();
        auth.mechanisms
            .iter()
            .copied()
            .filter(move |m| {
                secured || auth.enable_dangerous_mechanism_in_clair || !m.is_dangerous_in_clair()
            })
    }

    /// DATA: 354 go-ahead, dot-terminated body, seal and queue.
    async fn on_data<R, W>(
        &mut self,
        reader: &mut Reader<R>,
        writer: &mut Writer<W>,
    ) -> std::io::Result<Flow>
    where
        R: tokio::io::AsyncRead + Unpin + Send,
        W: tokio::io::AsyncWrite + Unpin + Send,
    {
        if !self
            .ctx
            .envelope()
            .map(|e| !e.recipients.is_empty())
            .unwrap_or(false)
        {
            let reply = Self::reply("503 5.5.1 bad sequence of commands (need RCPT)\r\n");
            return self.finish(writer, Verb::Data, "DATA", reply, false).await;
        }

        writer
            .write_all("354 Start mail input; end with <CRLF>.<CRLF>\r\n")
            .await?;

        let previous = reader.set_timeout(self.config.timeouts.data_read);
        let body = reader.read_data_body(self.config.esmtp.size).await;
        reader.set_timeout(previous);

        let body = match body {
            Ok(body) => body,
            Err(Error::BufferTooLong { .. }) => {
                let reply =
                    Self::reply("552 5.3.4 message size exceeds fixed maximum message size\r\n");
                self.ctx.abort_envelope();
                let _flow = self.finish(writer, Verb::Data, "DATA", reply, true).await?;
                return Ok(Flow::Quit);
            }
            Err(Error::Timeout(_)) => {
                let _ = writer
                    .write_all("421 4.4.2 connection timed out, closing\r\n")
                    .await;
                return Ok(Flow::Quit);
            }
            Err(_) => return Ok(Flow::Quit),
        };

        self.seal_and_queue(writer, Verb::Data, "DATA", MessageBody::Bytes(body), false)
            .await
    }

    /// BDAT: exact-size chunks, one reply per chunk, LAST seals.
    async fn on_bdat<R, W>(
        &mut self,
        reader: &mut Reader<R>,
        writer: &mut Writer<W>,
        size: usize,
        last: bool,
    ) -> std::io::Result<Flow>
    where
        R: tokio::io::AsyncRead + Unpin + Send,
        W: tokio::io::AsyncWrite + Unpin + Send,
    {
        if !self.config.esmtp.chunking {
            let reply = Self::reply("502 5.5.1 command not implemented\r\n");
            return self
                .finish(writer, Verb::Bdat, &format!("BDAT {size}"), reply, false)
                .await;
        }

        let payload = if last {
            format!("BDAT {size} LAST")
        } else {
            format!("BDAT {size}")
        };

        // The chunk must be consumed even when it is going to be refused.
        let previous = reader.set_timeout(self.config.timeouts.data_read);
        let chunk = reader.read_exact_bytes(size).await;
        reader.set_timeout(previous);

        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(Error::Timeout(_)) => {
                let _ = writer
                    .write_all("421 4.4.2 connection timed out, closing\r\n")
                    .await;
                return Ok(Flow::Quit);
            }
            Err(_) => return Ok(Flow::Quit),
        };

        let Ok(envelope) = self.ctx.mut_envelope() else {
            let reply = Self::reply("503 5.5.1 bad sequence of commands\r\n");
            return self.finish(writer, Verb::Bdat, &payload, reply, false).await;
        };

        envelope.chunked = true;
        let total = match &mut envelope.body {
            MessageBody::Bytes(bytes) => {
                bytes.extend_from_slice(&chunk);
                bytes.len()
            }
            MessageBody::File(_) => chunk.len(),
        };

        if total > self.config.esmtp.size {
            let reply =
                Self::reply("552 5.3.4 message size exceeds fixed maximum message size\r\n");
            self.ctx.abort_envelope();
            let _flow = self.finish(writer, Verb::Bdat, &payload, reply, true).await?;
            return Ok(Flow::Quit);
        }

        if last {
            self.seal_and_queue(writer, Verb::Bdat, &payload, MessageBody::Bytes(vec![]), true)
                .await
        } else {
            let reply = Self::reply(format!("250 2.0.0 {size} octets received\r\n"));
            self.finish(writer, Verb::Bdat, &payload, reply, false).await
        }
    }

    /// Common tail of DATA and BDAT LAST: webhook, record, seal, queue.
    async fn seal_and_queue<W>(
        &mut self,
        writer: &mut Writer<W>,
        verb: Verb,
        payload: &str,
        body: MessageBody,
        body_already_in_envelope: bool,
    ) -> std::io::Result<Flow>
    where
        W: tokio::io::AsyncWrite + Unpin + Send,
    {
        #[allow(clippy::expect_used)]
        let message_uuid = self
            .ctx
            .envelope()
            .expect("an envelope is open here")
            .message_uuid;

        let default = Self::reply(format!("250 2.0.0 message queued as {message_uuid}\r\n"));
        let (reply, drop) = self.consult(verb, payload, default).await;

        if reply.is_error() {
            self.ctx.abort_envelope();
            return self.finish(writer, verb, payload, reply, drop).await;
        }

        if !body_already_in_envelope {
            #[allow(clippy::expect_used)]
            let envelope = self.ctx.mut_envelope().expect("an envelope is open here");
            envelope.body = body;
        }

        // Recorded while the envelope is still open, so the transaction
        // lands in the envelope's own log.
        self.ctx
            .record(Transaction::new(verb, payload, reply.clone()));

        #[allow(clippy::expect_used)]
        let envelope = self
            .ctx
            .seal_envelope()
            .expect("an envelope is open here");

        tracing::info!(
            message = %envelope.message_uuid,
            recipients = envelope.recipients.len(),
            size = envelope.body.size_hint().unwrap_or(0),
            "message accepted"
        );
        self.sink.submit(envelope);

        writer.write_reply(&reply).await?;
        Ok(if drop { Flow::Quit } else { Flow::Continue })
    }

    /// AUTH: run the SASL exchange inline, then verify the proof.
    async fn on_auth<R, W>(
        &mut self,
        reader: &mut Reader<R>,
        writer: &mut Writer<W>,
        line: &str,
        mechanism: Mechanism,
        initial_response: Option<String>,
    ) -> std::io::Result<Flow>
    where
        R: tokio::io::AsyncRead + Unpin + Send,
        W: tokio::io::AsyncWrite + Unpin + Send,
    {
        let config = self.config.clone();
        let Some(auth) = config.esmtp.auth.as_ref() else {
            let reply = Self::reply("502 5.5.1 command not implemented\r\n");
            return self.finish(writer, Verb::Auth, line, reply, false).await;
        };

        if self.ctx.is_authenticated() || self.ctx.envelope().is_ok() {
            let reply = Self::reply("503 5.5.1 bad sequence of commands\r\n");
            return self.finish(writer, Verb::Auth, line, reply, false).await;
        }
        if !auth.mechanisms.contains(&mechanism) {
            let reply = Self::reply("504 5.5.4 mechanism is not supported\r\n");
            return self.finish(writer, Verb::Auth, line, reply, false).await;
        }
        if mechanism.is_dangerous_in_clair()
            && !self.ctx.is_secured()
            && !auth.enable_dangerous_mechanism_in_clair
        {
            let reply = Self::reply(
                "538 5.7.11 encryption required for requested authentication mechanism\r\n",
            );
            return self.finish(writer, Verb::Auth, line, reply, false).await;
        }

        let attempt_count_max = auth.attempt_count_max;
        let users = auth.users.clone();

        let (mut exchange, mut step) = ServerExchange::start(
            mechanism,
            initial_response.as_deref(),
            &self.ctx.server_name().to_string(),
        );

        let outcome = loop {
            match step {
                ServerStep::Challenge(challenge) => {
                    writer.write_all(&format!("334 {challenge}\r\n")).await?;
                    match reader.read_line().await {
                        Ok(response) => step = exchange.step(&response),
                        Err(Error::Timeout(_)) => {
                            let _ = writer
                                .write_all("421 4.4.2 connection timed out, closing\r\n")
                                .await;
                            return Ok(Flow::Quit);
                        }
                        Err(_) => return Ok(Flow::Quit),
                    }
                }
                ServerStep::Done(proof) => {
                    let verified = users
                        .get(proof.authid())
                        .is_some_and(|password| proof.verify(password));

                    if verified {
                        // DIGEST-MD5 mutual authentication: prove we also
                        // know the secret, then wait for the empty ack.
                        if let Some(confirmation) = users
                            .get(proof.authid())
                            .and_then(|password| proof.confirmation(password))
                        {
                            writer.write_all(&format!("334 {confirmation}\r\n")).await?;
                            if reader.read_line().await.is_err() {
                                return Ok(Flow::Quit);
                            }
                        }

                        #[allow(clippy::expect_used)]
                        self.ctx
                            .set_authenticated(mechanism, proof.authid().to_owned())
                            .expect("auth preconditions were checked above");
                        tracing::info!(authid = proof.authid(), %mechanism, "client authenticated");
                        break Self::reply("235 2.7.0 authentication succeeded\r\n");
                    }
                    tracing::debug!(authid = proof.authid(), "authentication rejected");
                    break Self::reply("535 5.7.8 authentication credentials invalid\r\n");
                }
                ServerStep::Failed(error) => {
                    break Self::reply(match error {
                        AuthError::Base64(_) => "501 5.5.2 invalid response, not base64\r\n",
                        AuthError::Canceled => "501 authentication canceled by client\r\n",
                        AuthError::ClientMustNotStart => {
                            "501 5.7.0 client must not start with this mechanism\r\n"
                        }
                        AuthError::Malformed(_) => {
                            "535 5.7.8 authentication credentials invalid\r\n"
                        }
                    })
                }
            }
        };

        let failed_auth = outcome.code().value() == 535;
        let flow = self.finish(writer, Verb::Auth, line, outcome, false).await?;
        if flow == Flow::Quit {
            return Ok(flow);
        }

        if failed_auth {
            let failures = i64::try_from(self.ctx.record_auth_failure()).unwrap_or(i64::MAX);
            if attempt_count_max != -1 && failures >= attempt_count_max {
                let _ = writer
                    .write_all("421 4.7.0 too many failed authentication attempts\r\n")
                    .await;
                return Ok(Flow::Quit);
            }
        }
        Ok(Flow::Continue)
    }

    /// Consult the webhooks subscribed to this verb.
    async fn consult(&self, verb: Verb, payload: &str, default: Reply) -> (Reply, bool) {
        let connect = self.ctx.connect();
        self.webhooks
            .consult(
                verb,
                WebhookEvent {
                    verb: verb.as_ref(),
                    session_id: connect.connect_uuid,
                    remote_ip: connect.client_addr.ip(),
                    payload,
                    tls: self.ctx.is_secured(),
                    auth: connect.sasl.as_ref().map(|sasl| sasl.authid.as_str()),
                },
                default,
            )
            .await
    }

    /// Record the exchange, apply the error budget, send the reply.
    async fn finish<W>(
        &mut self,
        writer: &mut Writer<W>,
        verb: Verb,
        payload: &str,
        reply: Reply,
        drop: bool,
    ) -> std::io::Result<Flow>
    where
        W: tokio::io::AsyncWrite + Unpin + Send,
    {
        self.ctx
            .record(Transaction::new(verb, payload, reply.clone()));

        if reply.is_error() {
            return match self.count_error(writer, &reply).await? {
                Flow::Quit => Ok(Flow::Quit),
                _ if drop => Ok(Flow::Quit),
                flow => Ok(flow),
            };
        }

        if verb == Verb::StartTls && reply.code().value() == 220 {
            writer.write_reply(&reply).await?;
            return Ok(Flow::UpgradeTls);
        }

        writer.write_reply(&reply).await?;
        Ok(if drop || verb == Verb::Quit {
            Flow::Quit
        } else {
            Flow::Continue
        })
    }

    /// Error budget: slow the peer past the soft limit, close past the hard
    /// one.
    async fn count_error<W>(
        &mut self,
        writer: &mut Writer<W>,
        reply: &Reply,
    ) -> std::io::Result<Flow>
    where
        W: tokio::io::AsyncWrite + Unpin + Send,
    {
        self.errors += 1;
        let errors = &self.config.errors;

        if errors.hard_count != -1 && self.errors >= errors.hard_count {
            let hard = reply.extended(&Self::reply("421 4.7.0 too many errors from the client\r\n"));
            let _ = writer.write_reply(&hard).await;
            return Ok(Flow::Quit);
        }
        if errors.soft_count != -1 && self.errors >= errors.soft_count {
            tokio::time::sleep(errors.delay).await;
        }

        writer.write_reply(reply).await?;
        Ok(Flow::Continue)
    }
}
