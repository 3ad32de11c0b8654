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

use crate::smtp::session::{EnvelopeSink, Session};
use crate::webhook::Dispatcher;
use robin_common::session::{ConnectProps, SessionCtx};
use robin_dns::DnsClient;
use robin_protocol::Domain;
use std::sync::Arc;

/// The listening side: sockets, the per-connection gate and session spawn.
pub struct Server {
    pub config: Arc<robin_config::ServerConfig>,
    pub webhooks: Arc<Dispatcher>,
    pub sink: Arc<dyn EnvelopeSink>,
    pub dns: DnsClient,
    pub tls_acceptor: Option<tokio_rustls::TlsAcceptor>,
}

impl Server {
    /// Build the rustls acceptor from the configured PEM files.
    pub fn load_tls_acceptor(
        tls: &robin_config::server::Tls,
    ) -> Result<tokio_rustls::TlsAcceptor, Box<dyn std::error::Error>> {
        use robin_protocol::rustls;

        let certs = rustls_pemfile::certs(&mut std::io::BufReader::new(std::fs::File::open(
            &tls.certificate,
        )?))?
        .into_iter()
        .map(rustls::Certificate)
        .collect::<Vec<_>>();

        let key = rustls_pemfile::pkcs8_private_keys(&mut std::io::BufReader::new(
            std::fs::File::open(&tls.private_key)?,
        ))?
        .into_iter()
        .map(rustls::PrivateKey)
        .next()
        .ok_or("no PKCS#8 private key found")?;

        let config = rustls::ServerConfig::builder()
            .with_safe_defaults()
            .with_no_client_auth()
            .with_single_cert(certs, key)?;

        Ok(tokio_rustls::TlsAcceptor::from(Arc::new(config)))
    }

    pub async fn bind(&self) -> std::io::Result<Vec<tokio::net::TcpListener>> {
        let mut listeners = vec![];
        for addr in self
            .config
            .interfaces
            .addr
            .iter()
            .chain(&self.config.interfaces.addr_submission)
        {
            listeners.push(tokio::net::TcpListener::bind(addr).await?);
            tracing::info!(%addr, "listening");
        }
        Ok(listeners)
    }

    /// Accept until the process stops; one task per connection.
    pub async fn listen(self: Arc<Self>, listeners: Vec<tokio::net::TcpListener>) {
        let mut accepts = tokio::task::JoinSet::new();
        for listener in listeners {
            let server = self.clone();
            accepts.spawn(async move {
                loop {
                    match listener.accept().await {
                        Ok((stream, client_addr)) => {
                            tracing::info!(%client_addr, "accepted connection");
                            let server = server.clone();
                            tokio::spawn(async move {
                                if let Err(error) = server.serve_connection(stream, client_addr).await
                                {
                                    tracing::warn!(%error, %client_addr, "session ended with an error");
                                }
                            });
                        }
                        Err(error) => {
                            tracing::warn!(%error, "error accepting connection");
                        }
                    }
                }
            });
        }
        while accepts.join_next().await.is_some() {}
    }

    async fn serve_connection(
        &self,
        stream: tokio::net::TcpStream,
        client_addr: std::net::SocketAddr,
    ) -> std::io::Result<()> {
        let server_addr = stream.local_addr()?;

        // DNS blocklist gate, before any SMTP banter.
        for zone in &self.config.rbl_zones {
            match robin_dns::rbl::lookup(&self.dns, &client_addr.ip().to_string(), zone).await {
                Ok(result) if result.listed => {
                    tracing::info!(%client_addr, %zone, records = ?result.records, "peer is listed, rejecting");
                    use tokio::io::AsyncWriteExt;
                    let mut stream = stream;
                    let _ = stream
                        .write_all(format!("554 5.7.1 rejected by {zone}\r\n").as_bytes())
                        .await;
                    return Ok(());
                }
                Ok(_) => {}
                Err(error) => {
                    tracing::warn!(%error, %zone, "blocklist lookup failed, letting the peer in");
                }
            }
        }

        let client_ptr = match self.dns.lookup_ptr(client_addr.ip()).await {
            Ok(ptr) => ptr.and_then(|name| name.parse::<Domain>().ok()),
            Err(error) => {
                tracing::debug!(%error, "reverse lookup failed");
                None
            }
        };

        let ctx = SessionCtx::new(ConnectProps {
            connect_timestamp: time::OffsetDateTime::now_utc(),
            connect_uuid: uuid::Uuid::new_v4(),
            client_addr,
            server_addr,
            server_name: self
                .config
                .name
                .0
                .parse::<Domain>()
                .unwrap_or_else(|_| Domain::root()),
            client_ptr,
            tls: None,
            sasl: None,
        });

        Session::new(
            ctx,
            self.config.clone(),
            self.webhooks.clone(),
            self.sink.clone(),
            self.tls_acceptor.clone(),
        )
        .serve(stream)
        .await
    }
}
