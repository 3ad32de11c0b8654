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

use crate::Mailbox;
use robin_protocol::EnvelopeLog;

/// The message payload of an envelope, spooled or in memory.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum MessageBody {
    Bytes(Vec<u8>),
    File(std::path::PathBuf),
}

impl Default for MessageBody {
    fn default() -> Self {
        Self::Bytes(vec![])
    }
}

impl MessageBody {
    pub async fn read(&self) -> std::io::Result<Vec<u8>> {
        match self {
            Self::Bytes(bytes) => Ok(bytes.clone()),
            Self::File(path) => tokio::fs::read(path).await,
        }
    }

    #[must_use]
    pub fn size_hint(&self) -> Option<usize> {
        match self {
            Self::Bytes(bytes) => Some(bytes.len()),
            Self::File(_) => None,
        }
    }
}

/// Outcome of one delivery attempt for one recipient.
/// <https://www.rfc-editor.org/rfc/rfc3464#section-2.3.3>
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase", tag = "value")]
pub enum Action {
    Delivered,
    Failed {
        diagnostic_code: Option<String>,
    },
    Delayed {
        diagnostic_code: Option<String>,
    },
}

impl Action {
    /// Delivered and failed recipients are settled; delayed ones retry.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Failed { .. })
    }

    #[must_use]
    pub const fn is_successful(&self) -> bool {
        matches!(self, Self::Delivered)
    }
}

/// Classification of a whole envelope, derived from its recipients.
#[derive(Debug, Copy, Clone, PartialEq, Eq, strum::Display, serde::Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Disposition {
    Delivered,
    Partial,
    Rejected,
    Deferred,
}

/// A recipient of an envelope and what happened to it so far.
/// `action` is `None` until a delivery attempt settles it.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Recipient {
    pub forward_path: Mailbox,
    pub action: Option<Action>,
}

impl Recipient {
    #[must_use]
    pub const fn new(forward_path: Mailbox) -> Self {
        Self {
            forward_path,
            action: None,
        }
    }
}

/// A single message attempt: reverse path, recipients, payload and the
/// transactions that built it.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Envelope {
    pub message_uuid: uuid::Uuid,
    pub reverse_path: Option<Mailbox>,
    pub recipients: Vec<Recipient>,
    pub body: MessageBody,
    /// The body was received through BDAT chunks.
    pub chunked: bool,
    pub log: EnvelopeLog,
}

impl Envelope {
    #[must_use]
    pub fn new(reverse_path: Option<Mailbox>) -> Self {
        Self {
            message_uuid: uuid::Uuid::new_v4(),
            reverse_path,
            recipients: vec![],
            body: MessageBody::default(),
            chunked: false,
            log: EnvelopeLog::default(),
        }
    }

    pub fn add_recipient(&mut self, forward_path: Mailbox) {
        self.recipients.push(Recipient::new(forward_path));
    }

    /// Recipients still waiting for a terminal outcome.
    pub fn pending_recipients(&self) -> impl Iterator<Item = &Recipient> {
        self.recipients
            .iter()
            .filter(|r| !r.action.as_ref().is_some_and(Action::is_terminal))
    }

    /// An envelope is complete when every recipient is settled.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.pending_recipients().next().is_none()
    }

    /// Fold the per-recipient outcomes into the envelope classification.
    #[must_use]
    pub fn disposition(&self) -> Disposition {
        let mut delivered = 0_usize;
        let mut failed = 0_usize;
        let mut pending = 0_usize;

        for recipient in &self.recipients {
            match &recipient.action {
                Some(Action::Delivered) => delivered += 1,
                Some(Action::Failed { .. }) => failed += 1,
                Some(Action::Delayed { .. }) | None => pending += 1,
            }
        }

        match (delivered, failed, pending) {
            (_, _, 1..) => Disposition::Deferred,
            (0, _, 0) => Disposition::Rejected,
            (1.., 0, 0) => Disposition::Delivered,
            (1.., 1.., 0) => Disposition::Partial,
        }
    }
}
