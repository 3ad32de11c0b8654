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

//! Non-delivery reports for envelopes that ran out of retries.

use robin_common::envelope::{Action, Envelope, MessageBody};

/// Build the bounce envelope for an undeliverable message.
///
/// Returns `None` when the original came from the null reverse path:
/// bounces never bounce.
#[must_use]
pub fn build_bounce(original: &Envelope, server_name: &str) -> Option<Envelope> {
    let sender = original.reverse_path.as_ref()?;

    let mut report = String::new();
    report.push_str(&format!(
        "From: Mail Delivery System <MAILER-DAEMON@{server_name}>\r\n"
    ));
    report.push_str(&format!("To: <{sender}>\r\n"));
    report.push_str("Subject: Undelivered Mail Returned to Sender\r\n");
    report.push_str("Auto-Submitted: auto-replied\r\n");
    report.push_str(&format!(
        "Message-ID: <{}@{server_name}>\r\n\r\n",
        uuid::Uuid::new_v4()
    ));

    report.push_str(&format!(
        "This is the mail system at host {server_name}.\r\n\r\n\
         Your message (id {}) could not be delivered to the following\r\n\
         recipients after repeated attempts:\r\n\r\n",
        original.message_uuid
    ));

    for recipient in &original.recipients {
        let diagnostic = match &recipient.action {
            Some(Action::Failed {
                diagnostic_code: Some(code),
            })
            | Some(Action::Delayed {
                diagnostic_code: Some(code),
            }) => code.clone(),
            Some(Action::Failed { .. }) => "permanent failure".to_owned(),
            _ => "delivery timed out".to_owned(),
        };
        report.push_str(&format!("  <{}>: {diagnostic}\r\n", recipient.forward_path));
    }

    // The null reverse path marks the report itself as undeliverable-safe.
    let mut bounce = Envelope::new(None);
    bounce.add_recipient(sender.clone());
    bounce.body = MessageBody::Bytes(report.into_bytes());
    Some(bounce)
}

#[cfg(test)]
mod tests {
    use super::*;
    use robin_common::Mailbox;

    #[test]
    fn reports_the_failed_recipients_to_the_sender() {
        let mut original = Envelope::new(Some(Mailbox("sender@example.com".parse().unwrap())));
        original.add_recipient(Mailbox("gone@example.net".parse().unwrap()));
        original.recipients[0].action = Some(Action::Delayed {
            diagnostic_code: Some("4.4.1 connection timed out".to_owned()),
        });

        let bounce = build_bounce(&original, "mx.example.com").unwrap();

        assert!(bounce.reverse_path.is_none());
        assert_eq!(
            bounce.recipients[0].forward_path.to_string(),
            "sender@example.com"
        );

        let MessageBody::Bytes(body) = &bounce.body else {
            panic!("bounce body must be in memory");
        };
        let body = String::from_utf8_lossy(body);
        assert!(body.contains("<gone@example.net>: 4.4.1 connection timed out"));
        assert!(body.contains("MAILER-DAEMON@mx.example.com"));
    }

    #[test]
    fn bounces_never_bounce() {
        let mut original = Envelope::new(None);
        original.add_recipient(Mailbox("someone@example.com".parse().unwrap()));
        assert!(build_bounce(&original, "mx.example.com").is_none());
    }
}
