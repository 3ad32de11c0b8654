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

pub mod bounce;
pub mod lda;
pub mod queue;
pub mod route;
pub mod schedule;

pub mod smtp {
    mod exchange;
    mod handler;

    pub use exchange::deliver_mail;
    pub use handler::{SenderHandler, UpgradeTls};
}

mod send;
pub use send::deliver_envelope;

use lda::LdaRunner;
use queue::Deliver;
use robin_common::envelope::Envelope;
use route::MxResolver;
use std::sync::Arc;

/// The production deliverer: local domains go through the LDA, everything
/// else over SMTP with the resolved security policy.
pub struct SmtpDeliverer {
    resolver: MxResolver,
    client_name: String,
    local_domains: Vec<String>,
    lda: Option<Arc<dyn LdaRunner>>,
}

impl SmtpDeliverer {
    #[must_use]
    pub fn new(
        resolver: MxResolver,
        client_name: String,
        local_domains: Vec<String>,
        lda: Option<Arc<dyn LdaRunner>>,
    ) -> Self {
        Self {
            resolver,
            client_name,
            local_domains,
            lda,
        }
    }

    fn is_local(&self, domain: &str) -> bool {
        self.local_domains
            .iter()
            .any(|local| local.eq_ignore_ascii_case(domain))
    }
}

#[async_trait::async_trait]
impl Deliver for SmtpDeliverer {
    async fn deliver(&self, envelope: &mut Envelope, domain: &str) {
        match (&self.lda, self.is_local(domain)) {
            (Some(lda), true) => lda::deliver_local(lda.as_ref(), envelope).await,
            _ => deliver_envelope(&self.resolver, &self.client_name, envelope, domain).await,
        }
    }

    fn server_name(&self) -> &str {
        &self.client_name
    }
}
