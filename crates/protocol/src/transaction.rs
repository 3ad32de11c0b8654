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

use crate::{parse_path, Address, Reply, Verb};

/// One SMTP verb exchange: the command, its reply, and the derived facts.
///
/// Immutable after insertion in a log. The error flag is derived from the
/// reply code on construction, so it can never disagree with it.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Transaction {
    verb: Verb,
    payload: String,
    reply: Reply,
    address: Option<Address>,
    error: bool,
}

impl Transaction {
    /// Record a verb exchange. The address is re-derived from the payload
    /// for MAIL and RCPT commands.
    #[must_use]
    pub fn new(verb: Verb, payload: impl Into<String>, reply: Reply) -> Self {
        let payload = payload.into();
        let address = match verb {
            Verb::Mail | Verb::Rcpt => payload
                .split_once(':')
                .map(|(_, path)| path.trim())
                .and_then(|path| {
                    let path = path.split_ascii_whitespace().next().unwrap_or(path);
                    parse_path(path).ok().flatten()
                }),
            _ => None,
        };

        Self {
            verb,
            payload,
            error: reply.is_error(),
            reply,
            address,
        }
    }

    #[must_use]
    pub const fn verb(&self) -> Verb {
        self.verb
    }

    #[must_use]
    pub fn payload(&self) -> &str {
        &self.payload
    }

    #[must_use]
    pub const fn reply(&self) -> &Reply {
        &self.reply
    }

    #[must_use]
    pub const fn address(&self) -> Option<&Address> {
        self.address.as_ref()
    }

    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.error
    }
}

/// Ordered sequence of transactions, append only.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct TransactionLog(Vec<Transaction>);

impl TransactionLog {
    #[must_use]
    pub const fn new() -> Self {
        Self(vec![])
    }

    pub fn push(&mut self, transaction: Transaction) {
        self.0.push(transaction);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Transaction> {
        self.0.iter()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// All transactions recorded for a command, in insertion order.
    /// The comparison on the command name is case-insensitive.
    pub fn find<'log>(&'log self, name: &'log str) -> impl Iterator<Item = &'log Transaction> {
        self.iter()
            .filter(move |t| t.verb().as_ref().eq_ignore_ascii_case(name))
    }
}

/// Transactions of a single envelope, with the selectors the delivery and
/// reporting paths rely on.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct EnvelopeLog(TransactionLog);

impl EnvelopeLog {
    pub fn push(&mut self, transaction: Transaction) {
        self.0.push(transaction);
    }

    #[must_use]
    pub const fn as_log(&self) -> &TransactionLog {
        &self.0
    }

    /// The first MAIL transaction of the envelope.
    #[must_use]
    pub fn mail(&self) -> Option<&Transaction> {
        self.0.find(Verb::Mail.as_ref()).next()
    }

    /// Every RCPT transaction, accepted or not.
    pub fn rcpt(&self) -> impl Iterator<Item = &Transaction> {
        self.0.find(Verb::Rcpt.as_ref())
    }

    /// Addresses of the recipients the peer accepted.
    pub fn recipients(&self) -> impl Iterator<Item = &Address> {
        self.rcpt()
            .filter(|t| !t.is_error())
            .filter_map(Transaction::address)
    }

    /// Addresses of the recipients the peer refused.
    pub fn failed_recipients(&self) -> impl Iterator<Item = &Address> {
        self.rcpt()
            .filter(|t| t.is_error())
            .filter_map(Transaction::address)
    }

    pub fn data(&self) -> impl Iterator<Item = &Transaction> {
        self.0.find(Verb::Data.as_ref())
    }

    pub fn bdat(&self) -> impl Iterator<Item = &Transaction> {
        self.0.find(Verb::Bdat.as_ref())
    }
}

/// The transactions of a whole session: the session-level exchanges plus one
/// sub-list per envelope, in the order the envelopes were opened.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct SessionLog {
    session: TransactionLog,
    envelopes: Vec<EnvelopeLog>,
}

impl SessionLog {
    /// Build a session log from the session-level transactions.
    #[must_use]
    pub const fn new(session: TransactionLog) -> Self {
        Self {
            session,
            envelopes: vec![],
        }
    }

    /// Record a session-level exchange (greeting, EHLO, STARTTLS, AUTH, ...).
    pub fn push(&mut self, transaction: Transaction) {
        self.session.push(transaction);
    }

    /// Seal an envelope log once the envelope is done or aborted.
    pub fn push_envelope(&mut self, envelope: EnvelopeLog) {
        self.envelopes.push(envelope);
    }

    #[must_use]
    pub const fn session(&self) -> &TransactionLog {
        &self.session
    }

    #[must_use]
    pub fn envelopes(&self) -> &[EnvelopeLog] {
        &self.envelopes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(raw: &str) -> Reply {
        raw.parse().unwrap()
    }

    fn sample_envelope() -> EnvelopeLog {
        let mut log = EnvelopeLog::default();
        log.push(Transaction::new(
            Verb::Mail,
            "MAIL FROM:<john@doe.com>",
            reply("250 sender ok\r\n"),
        ));
        log.push(Transaction::new(
            Verb::Rcpt,
            "RCPT TO:<jane@doe.com>",
            reply("250 recipient ok\r\n"),
        ));
        log.push(Transaction::new(
            Verb::Rcpt,
            "RCPT TO:<nobody@doe.com>",
            reply("550 5.1.1 no such user\r\n"),
        ));
        log.push(Transaction::new(
            Verb::Data,
            "DATA",
            reply("250 message queued\r\n"),
        ));
        log
    }

    #[test]
    fn error_flag_follows_the_reply_code() {
        let log = sample_envelope();
        for t in log.as_log().iter() {
            assert_eq!(t.is_error(), t.reply().code().value() >= 400);
        }
    }

    #[test]
    fn recipients_partition_on_the_error_flag() {
        let log = sample_envelope();

        assert_eq!(
            log.recipients().map(Address::full).collect::<Vec<_>>(),
            ["jane@doe.com"]
        );
        assert_eq!(
            log.failed_recipients()
                .map(Address::full)
                .collect::<Vec<_>>(),
            ["nobody@doe.com"]
        );
        assert_eq!(log.rcpt().count(), 2);
    }

    #[test]
    fn address_is_derived_from_the_payload() {
        let log = sample_envelope();
        assert_eq!(
            log.mail().unwrap().address().unwrap().full(),
            "john@doe.com"
        );
    }

    #[test]
    fn selection_is_case_insensitive_and_ordered() {
        let log = sample_envelope();
        let rcpt = log.as_log().find("rcpt").collect::<Vec<_>>();
        assert_eq!(rcpt.len(), 2);
        assert_eq!(rcpt[0].address().unwrap().full(), "jane@doe.com");
        assert_eq!(rcpt[1].address().unwrap().full(), "nobody@doe.com");
    }

    #[test]
    fn clones_are_deep_and_equal() {
        let mut log = SessionLog::default();
        log.push(Transaction::new(
            Verb::Ehlo,
            "EHLO client.example.com",
            reply("250-mx.example.com\r\n250 PIPELINING\r\n"),
        ));
        log.push_envelope(sample_envelope());

        let clone = log.clone();
        pretty_assertions::assert_eq!(log, clone);
        assert_eq!(
            clone.session().find("EHLO").count(),
            log.session().find("EHLO").count()
        );
        assert_eq!(
            clone.envelopes()[0].recipients().count(),
            log.envelopes()[0].recipients().count()
        );
    }
}
