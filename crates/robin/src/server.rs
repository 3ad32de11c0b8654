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

//! `--server`: the full MTA wired together — receiver, queue, deliverer.

use crate::AnyError;
use robin_config::Config;
use robin_delivery::lda::LdaProcess;
use robin_delivery::queue::{self, Queue};
use robin_delivery::route::mta_sts::{HttpsFetcher, StsPolicyCache};
use robin_delivery::route::MxResolver;
use robin_delivery::SmtpDeliverer;
use robin_dns::{DnsClient, SystemResolver};
use robin_receiver::webhook::HttpCaller;
use robin_receiver::{Dispatcher, EnvelopeSink, Server};
use std::sync::Arc;

/// Bridges sealed envelopes from the receiver into the delivery queue.
struct QueueSink(Queue);

impl EnvelopeSink for QueueSink {
    fn submit(&self, envelope: robin_common::envelope::Envelope) {
        self.0.submit(envelope);
    }
}

pub async fn run(config_dir: &std::path::Path) -> Result<(), AnyError> {
    let config = Arc::new(robin_config::ServerConfig::from_dir(&config_dir)?);
    let webhooks = robin_config::Webhooks::from_dir(&config_dir)?;

    let dns = DnsClient::new(Arc::new(SystemResolver::from_system_conf()?));

    let tls_acceptor = config
        .tls
        .as_ref()
        .map(Server::load_tls_acceptor)
        .transpose()?;

    let resolver = MxResolver::new(
        dns.clone(),
        StsPolicyCache::new(Arc::new(HttpsFetcher::new()?)),
    );
    let deliverer = Arc::new(SmtpDeliverer::new(
        resolver,
        config.name.0.clone(),
        config.local_domains.clone(),
        config.lda.as_ref().map(|lda| {
            Arc::new(LdaProcess::from_config(lda)) as Arc<dyn robin_delivery::lda::LdaRunner>
        }),
    ));

    let (queue, rx) = Queue::new();
    let queue_runner = tokio::spawn(queue::run(rx, deliverer, queue.clone()));

    let server = Arc::new(Server {
        config: config.clone(),
        webhooks: Arc::new(Dispatcher::new(webhooks, Arc::new(HttpCaller::new()?))),
        sink: Arc::new(QueueSink(queue)),
        dns,
        tls_acceptor,
    });

    let listeners = server.bind().await?;
    tracing::info!(name = %config.name.0, "SMTP server is running");
    server.listen(listeners).await;
    tracing::info!("SMTP server has stopped");

    queue_runner.abort();
    Ok(())
}
