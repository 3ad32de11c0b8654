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

pub mod envelope;
pub mod extensions;
pub mod response;
pub mod session;
pub mod template;
pub mod transfer_error;

pub use time;
pub use uuid;

use robin_protocol::{Address, Domain};

/// Initialize the tracing stack for a service. The `RUST_LOG` environment
/// variable takes precedence over the configured default.
pub fn init_logs(default_directive: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(default_directive))?;

    tracing_subscriber::fmt().with_env_filter(filter).try_init()?;

    std::panic::set_hook(Box::new(|e| {
        tracing::error!(?e, "panic occurred");
    }));

    Ok(())
}

/// A mailbox taking part in an envelope.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Mailbox(pub Address);

impl std::fmt::Display for Mailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Mailbox {
    #[must_use]
    pub fn local_part(&self) -> &str {
        self.0.local_part()
    }

    #[must_use]
    pub fn domain(&self) -> Domain {
        self.0.domain()
    }
}
