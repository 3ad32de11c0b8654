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

//! The shared delivery queue. One task per queued envelope runs its
//! attempts strictly in sequence, sleeping the scheduled delay in between;
//! an envelope is never in flight twice.

use crate::bounce::build_bounce;
use crate::schedule::next_retry;
use robin_common::envelope::{Action, Envelope};
use robin_common::transfer_error::PolicyClass;

/// Where an envelope stands on the retry ladder.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RetryState {
    pub attempt_count: i64,
    #[serde(with = "time::serde::iso8601::option")]
    pub next_attempt: Option<time::OffsetDateTime>,
    pub last_error: Option<String>,
    pub last_policy: Option<PolicyClass>,
}

/// An envelope split per destination domain, owned by the queue.
#[derive(Debug)]
pub struct QueuedMessage {
    pub envelope: Envelope,
    pub domain: String,
    pub retry: RetryState,
}

/// One delivery attempt over a whole envelope, already split per domain.
#[async_trait::async_trait]
pub trait Deliver: Send + Sync {
    async fn deliver(&self, envelope: &mut Envelope, domain: &str);

    /// Name the bounce reports are issued under.
    fn server_name(&self) -> &str;

    /// Class of the policy used on the last attempt, for the retry record.
    fn last_policy(&self) -> Option<PolicyClass> {
        None
    }
}

/// Producer half of the queue.
#[derive(Clone)]
pub struct Queue {
    tx: tokio::sync::mpsc::UnboundedSender<QueuedMessage>,
}

impl Queue {
    #[must_use]
    pub fn new() -> (Self, tokio::sync::mpsc::UnboundedReceiver<QueuedMessage>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Split an envelope per recipient domain and queue each part.
    pub fn submit(&self, envelope: Envelope) {
        let mut domains = vec![];
        for recipient in &envelope.recipients {
            let domain = recipient.forward_path.domain().to_string();
            let domain = domain.trim_end_matches('.').to_owned();
            if !domains.contains(&domain) {
                domains.push(domain);
            }
        }

        for domain in domains {
            let mut part = envelope.clone();
            part.recipients
                .retain(|r| r.forward_path.domain().to_string().trim_end_matches('.') == domain);

            if self
                .tx
                .send(QueuedMessage {
                    envelope: part,
                    domain: domain.clone(),
                    retry: RetryState::default(),
                })
                .is_err()
            {
                tracing::error!(%domain, "the delivery queue is gone, dropping the envelope");
            }
        }
    }
}

/// Consume the queue until every producer is dropped.
pub async fn run(
    mut rx: tokio::sync::mpsc::UnboundedReceiver<QueuedMessage>,
    deliverer: std::sync::Arc<dyn Deliver>,
    queue: Queue,
) {
    while let Some(message) = rx.recv().await {
        let deliverer = deliverer.clone();
        let queue = queue.clone();
        tokio::spawn(drive_message(message, deliverer, queue));
    }
}

/// Attempts of one envelope, strictly sequential.
#[tracing::instrument(skip_all, fields(message = %message.envelope.message_uuid, domain = %message.domain))]
async fn drive_message(
    mut message: QueuedMessage,
    deliverer: std::sync::Arc<dyn Deliver>,
    queue: Queue,
) {
    loop {
        deliverer
            .deliver(&mut message.envelope, &message.domain)
            .await;

        message.retry.attempt_count += 1;
        message.retry.last_policy = deliverer.last_policy();
        message.retry.last_error = message
            .envelope
            .recipients
            .iter()
            .find_map(|r| match &r.action {
                Some(Action::Delayed { diagnostic_code } | Action::Failed { diagnostic_code }) => {
                    diagnostic_code.clone()
                }
                _ => None,
            });

        if message.envelope.is_complete() {
            tracing::info!(
                attempts = message.retry.attempt_count,
                disposition = %message.envelope.disposition(),
                "envelope settled"
            );
            return;
        }

        match next_retry(message.retry.attempt_count) {
            Some(delay) => {
                message.retry.next_attempt =
                    Some(time::OffsetDateTime::now_utc() + delay);
                tracing::debug!(
                    attempt = message.retry.attempt_count,
                    "deferred, next attempt in {}",
                    humantime::format_duration(delay)
                );
                tokio::time::sleep(delay).await;
            }
            None => {
                tracing::warn!(
                    attempts = message.retry.attempt_count,
                    "out of retries, bouncing"
                );
                if let Some(bounce) = build_bounce(&message.envelope, deliverer.server_name()) {
                    queue.submit(bounce);
                }
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use robin_common::Mailbox;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;

    fn envelope_to(addrs: &[&str]) -> Envelope {
        let mut envelope = Envelope::new(Some(Mailbox("sender@origin.example".parse().unwrap())));
        for addr in addrs {
            envelope.add_recipient(Mailbox(addr.parse().unwrap()));
        }
        envelope
    }

    #[test]
    fn submit_splits_envelopes_per_domain() {
        let (queue, mut rx) = Queue::new();
        queue.submit(envelope_to(&[
            "a@one.example",
            "b@two.example",
            "c@one.example",
        ]));

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert!(rx.try_recv().is_err());

        assert_eq!(first.domain, "one.example");
        assert_eq!(first.envelope.recipients.len(), 2);
        assert_eq!(second.domain, "two.example");
        assert_eq!(second.envelope.recipients.len(), 1);
        assert_eq!(first.retry.attempt_count, 0);
    }

    /// Succeeds on the configured attempt, defers before that.
    struct FlakyDeliverer {
        calls: AtomicI64,
        succeed_on: i64,
    }

    #[async_trait::async_trait]
    impl Deliver for FlakyDeliverer {
        async fn deliver(&self, envelope: &mut Envelope, _domain: &str) {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            for recipient in &mut envelope.recipients {
                recipient.action = Some(if call >= self.succeed_on {
                    Action::Delivered
                } else {
                    Action::Delayed {
                        diagnostic_code: Some("4.4.1 connection timed out".to_owned()),
                    }
                });
            }
        }

        fn server_name(&self) -> &str {
            "mx.example.com"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_the_envelope_settles() {
        let deliverer = Arc::new(FlakyDeliverer {
            calls: AtomicI64::new(0),
            succeed_on: 3,
        });
        let (queue, _rx) = Queue::new();

        let message = QueuedMessage {
            envelope: envelope_to(&["rcpt@far.example"]),
            domain: "far.example".to_owned(),
            retry: RetryState::default(),
        };

        drive_message(message, deliverer.clone(), queue).await;
        assert_eq!(deliverer.calls.load(Ordering::SeqCst), 3);
    }

    /// Always defers, to exhaust the ladder.
    struct NeverDeliverer;

    #[async_trait::async_trait]
    impl Deliver for NeverDeliverer {
        async fn deliver(&self, envelope: &mut Envelope, _domain: &str) {
            for recipient in &mut envelope.recipients {
                recipient.action = Some(Action::Delayed {
                    diagnostic_code: Some("4.4.1 host unreachable".to_owned()),
                });
            }
        }

        fn server_name(&self) -> &str {
            "mx.example.com"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn an_exhausted_envelope_bounces_to_its_sender() {
        let (queue, mut rx) = Queue::new();

        let message = QueuedMessage {
            envelope: envelope_to(&["rcpt@far.example"]),
            domain: "far.example".to_owned(),
            retry: RetryState::default(),
        };

        drive_message(message, Arc::new(NeverDeliverer), queue).await;

        let bounce = rx.try_recv().unwrap();
        assert_eq!(bounce.domain, "origin.example");
        assert!(bounce.envelope.reverse_path.is_none());
        assert_eq!(
            bounce.envelope.recipients[0].forward_path.to_string(),
            "sender@origin.example"
        );
    }
}
