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

//! Synchronous webhooks: the reply to a verb is held until the configured
//! endpoints have spoken, bounded by their timeout.

use robin_config::{Webhook, Webhooks};
use robin_protocol::{Reply, Verb};
use std::sync::Arc;

/// What the endpoint sees about the exchange in flight.
#[derive(Debug, serde::Serialize)]
pub struct WebhookEvent<'a> {
    pub verb: &'a str,
    pub session_id: uuid::Uuid,
    pub remote_ip: std::net::IpAddr,
    pub payload: &'a str,
    pub tls: bool,
    pub auth: Option<&'a str>,
}

/// The endpoint's verdict. When present it replaces the default reply;
/// `drop` closes the connection after the reply is sent.
#[derive(Debug, serde::Deserialize)]
pub struct WebhookDecision {
    pub code: u16,
    pub message: String,
    #[serde(default)]
    pub drop: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("webhook call failed: {0}")]
    Http(String),
    #[error("webhook call timed out")]
    Timeout,
    #[error("webhook answered garbage: {0}")]
    BadPayload(String),
}

/// The HTTP side of the dispatcher, pluggable for tests.
#[async_trait::async_trait]
pub trait WebhookCaller: Send + Sync {
    async fn call(
        &self,
        hook: &Webhook,
        event: &WebhookEvent<'_>,
    ) -> Result<WebhookDecision, WebhookError>;
}

pub struct HttpCaller {
    client: reqwest::Client,
}

impl HttpCaller {
    pub fn new() -> Result<Self, WebhookError> {
        reqwest::Client::builder()
            .build()
            .map(|client| Self { client })
            .map_err(|e| WebhookError::Http(e.to_string()))
    }
}

#[async_trait::async_trait]
impl WebhookCaller for HttpCaller {
    async fn call(
        &self,
        hook: &Webhook,
        event: &WebhookEvent<'_>,
    ) -> Result<WebhookDecision, WebhookError> {
        let response = self
            .client
            .post(hook.url.clone())
            .timeout(hook.timeout)
            .json(event)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    WebhookError::Timeout
                } else {
                    WebhookError::Http(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(WebhookError::Http(format!(
                "endpoint answered {}",
                response.status()
            )));
        }

        response
            .json::<WebhookDecision>()
            .await
            .map_err(|e| WebhookError::BadPayload(e.to_string()))
    }
}

/// Consults every hook subscribed to a verb and folds their decisions over
/// the default reply.
pub struct Dispatcher {
    webhooks: Webhooks,
    caller: Arc<dyn WebhookCaller>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(webhooks: Webhooks, caller: Arc<dyn WebhookCaller>) -> Self {
        Self { webhooks, caller }
    }

    /// A dispatcher with nothing configured, always keeping the default.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            webhooks: Webhooks::default(),
            caller: Arc::new(NoCaller),
        }
    }

    /// Run the hooks for `verb`. An endpoint failure keeps the default
    /// reply in place; a decision overrides it, the last one winning.
    pub async fn consult(
        &self,
        verb: Verb,
        event: WebhookEvent<'_>,
        default: Reply,
    ) -> (Reply, bool) {
        let mut reply = default;
        let mut drop = false;

        for hook in self.webhooks.matching(verb) {
            match self.caller.call(hook, &event).await {
                Ok(decision) => {
                    match format!("{} {}\r\n", decision.code, decision.message).parse::<Reply>() {
                        Ok(overridden) if (200..600).contains(&decision.code) => {
                            tracing::debug!(%verb, url = %hook.url, code = decision.code, "webhook overrode the reply");
                            reply = overridden;
                            drop = drop || decision.drop;
                        }
                        _ => {
                            tracing::warn!(%verb, url = %hook.url, code = decision.code, "webhook decision is not a valid reply, keeping the default");
                        }
                    }
                }
                Err(error) => {
                    tracing::warn!(%verb, url = %hook.url, %error, "webhook failed, keeping the default reply");
                }
            }
        }

        (reply, drop)
    }
}

struct NoCaller;

#[async_trait::async_trait]
impl WebhookCaller for NoCaller {
    async fn call(
        &self,
        _hook: &Webhook,
        _event: &WebhookEvent<'_>,
    ) -> Result<WebhookDecision, WebhookError> {
        Err(WebhookError::Http("no caller configured".to_owned()))
    }
}
