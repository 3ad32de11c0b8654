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

//! Full conversations against the server engine, over an in-process
//! duplex stream: scripted client input, asserted reply sequence.

use robin_common::envelope::{Envelope, MessageBody};
use robin_common::session::{ConnectProps, SessionCtx};
use robin_config::Config;
use robin_receiver::{Dispatcher, EnvelopeSink, Session};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct VecSink(Mutex<Vec<Envelope>>);

impl EnvelopeSink for VecSink {
    fn submit(&self, envelope: Envelope) {
        self.0.lock().unwrap().push(envelope);
    }
}

fn test_config(raw: &str) -> Arc<robin_config::ServerConfig> {
    Arc::new(robin_config::ServerConfig::from_json5(raw).unwrap())
}

fn test_ctx() -> SessionCtx {
    SessionCtx::new(ConnectProps {
        connect_timestamp: time::OffsetDateTime::now_utc(),
        connect_uuid: uuid::Uuid::new_v4(),
        client_addr: "192.0.2.7:52341".parse().unwrap(),
        server_addr: "198.51.100.2:25".parse().unwrap(),
        server_name: "testserver.com".parse().unwrap(),
        client_ptr: None,
        tls: None,
        sasl: None,
    })
}

/// Feed `input` to a fresh session and return the replies, one per line,
/// along with everything the session queued.
async fn run_session(config: Arc<robin_config::ServerConfig>, input: &[&str]) -> (Vec<String>, Vec<Envelope>) {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let sink = Arc::new(VecSink::default());
    let session = Session::new(
        test_ctx(),
        config,
        Arc::new(Dispatcher::disabled()),
        sink.clone(),
        None,
    );

    let (client, server) = tokio::io::duplex(1 << 16);
    let serving = tokio::spawn(session.serve(server));

    let (mut read, mut write) = tokio::io::split(client);
    for line in input {
        write.write_all(line.as_bytes()).await.unwrap();
    }

    let mut output = String::new();
    read.read_to_string(&mut output).await.unwrap();
    serving.await.unwrap().unwrap();

    let replies = output
        .split("\r\n")
        .filter(|l| !l.is_empty())
        .map(ToOwned::to_owned)
        .collect();
    let queued = std::mem::take(&mut *sink.0.lock().unwrap());
    (replies, queued)
}

fn assert_replies(replies: &[String], expected: &[&str]) {
    assert_eq!(
        replies.len(),
        expected.len(),
        "reply count mismatch: {replies:#?}"
    );
    for (reply, prefix) in replies.iter().zip(expected) {
        assert!(
            reply.starts_with(prefix),
            "expected a reply starting with {prefix:?}, got {reply:?}"
        );
    }
}

#[tokio::test]
async fn simple_transaction() {
    let (replies, queued) = run_session(
        test_config("{}"),
        &[
            "EHLO client.example.com\r\n",
            "MAIL FROM:<john@doe.com>\r\n",
            "RCPT TO:<jane@doe.com>\r\n",
            "DATA\r\n",
            "Subject: test\r\n",
            "\r\n",
            "hello\r\n",
            ".\r\n",
            "QUIT\r\n",
        ],
    )
    .await;

    assert_replies(
        &replies,
        &[
            "220 testserver.com Service ready",
            "250-testserver.com Greetings client.example.com",
            "250-ENHANCEDSTATUSCODES",
            "250-PIPELINING",
            "250-8BITMIME",
            "250-SIZE 20000000",
            "250-CHUNKING",
            "250 Ok",
            "250 sender <john@doe.com> Ok",
            "250 recipient <jane@doe.com> Ok",
            "354 Start mail input",
            "250 2.0.0 message queued as ",
            "221 testserver.com Service closing transmission channel",
        ],
    );

    assert_eq!(queued.len(), 1);
    let envelope = &queued[0];
    assert_eq!(envelope.reverse_path.as_ref().unwrap().to_string(), "john@doe.com");
    assert_eq!(envelope.recipients.len(), 1);
    assert!(!envelope.chunked);
    assert_eq!(
        envelope.body,
        MessageBody::Bytes(b"Subject: test\r\n\r\nhello\r\n".to_vec())
    );

    // The envelope log holds its MAIL, RCPT and DATA exchanges.
    assert_eq!(envelope.log.mail().unwrap().address().unwrap().full(), "john@doe.com");
    assert_eq!(envelope.log.recipients().count(), 1);
    assert_eq!(envelope.log.data().count(), 1);
}

#[tokio::test]
async fn out_of_sequence_commands_get_503() {
    let (replies, queued) = run_session(
        test_config("{}"),
        &[
            "MAIL FROM:<john@doe.com>\r\n",
            "EHLO client.example.com\r\n",
            "RCPT TO:<jane@doe.com>\r\n",
            "MAIL FROM:<john@doe.com>\r\n",
            "MAIL FROM:<other@doe.com>\r\n",
            "QUIT\r\n",
        ],
    )
    .await;

    assert_replies(
        &replies,
        &[
            "220 ",
            "503 5.5.1 bad sequence of commands", // MAIL before EHLO
            "250-testserver.com",
            "250-ENHANCEDSTATUSCODES",
            "250-PIPELINING",
            "250-8BITMIME",
            "250-SIZE",
            "250-CHUNKING",
            "250 Ok",
            "503 5.5.1 bad sequence of commands", // RCPT before MAIL
            "250 sender <john@doe.com> Ok",
            "503 5.5.1 bad sequence of commands", // MAIL inside an envelope
            "221 ",
        ],
    );
    assert!(queued.is_empty());
}

#[tokio::test]
async fn data_without_an_accepted_recipient_is_refused() {
    let (replies, queued) = run_session(
        test_config("{}"),
        &[
            "EHLO client.example.com\r\n",
            "MAIL FROM:<john@doe.com>\r\n",
            "DATA\r\n",
            "QUIT\r\n",
        ],
    )
    .await;

    assert_eq!(replies[9], "503 5.5.1 bad sequence of commands (need RCPT)");
    assert!(queued.is_empty());
}

#[tokio::test]
async fn rset_aborts_the_envelope() {
    let (replies, queued) = run_session(
        test_config("{}"),
        &[
            "EHLO client.example.com\r\n",
            "MAIL FROM:<john@doe.com>\r\n",
            "RCPT TO:<jane@doe.com>\r\n",
            "RSET\r\n",
            "MAIL FROM:<second@doe.com>\r\n",
            "QUIT\r\n",
        ],
    )
    .await;

    let tail = &replies[8..];
    assert_replies(
        tail,
        &[
            "250 sender <john@doe.com> Ok",
            "250 recipient <jane@doe.com> Ok",
            "250 Ok",
            "250 sender <second@doe.com> Ok",
            "221 ",
        ],
    );
    assert!(queued.is_empty());
}

#[tokio::test]
async fn chunked_message_via_bdat() {
    let (replies, queued) = run_session(
        test_config("{}"),
        &[
            "EHLO client.example.com\r\n",
            "MAIL FROM:<john@doe.com>\r\n",
            "RCPT TO:<jane@doe.com>\r\n",
            "BDAT 7\r\nchunk1\n",
            "BDAT 6 LAST\r\nchunk2",
            "QUIT\r\n",
        ],
    )
    .await;

    let tail = &replies[8..];
    assert_replies(
        tail,
        &[
            "250 sender <john@doe.com> Ok",
            "250 recipient <jane@doe.com> Ok",
            "250 2.0.0 7 octets received",
            "250 2.0.0 message queued as ",
            "221 ",
        ],
    );

    assert_eq!(queued.len(), 1);
    assert!(queued[0].chunked);
    assert_eq!(
        queued[0].body,
        MessageBody::Bytes(b"chunk1\nchunk2".to_vec())
    );
    assert_eq!(queued[0].log.bdat().count(), 2);
}

#[tokio::test]
async fn vrfy_and_noop_and_unknown() {
    let (replies, _) = run_session(
        test_config("{}"),
        &[
            "NOOP\r\n",
            "VRFY jane\r\n",
            "EXPN list\r\n",
            "QUIT\r\n",
        ],
    )
    .await;

    assert_replies(
        &replies,
        &[
            "220 ",
            "250 Ok",
            "252 2.5.2 cannot VRFY user",
            "500 5.5.2 command not recognized",
            "221 ",
        ],
    );
}

const AUTH_CONFIG: &str = r#"{
    esmtp: {
        auth: {
            enable_dangerous_mechanism_in_clair: true,
            users: { jane: "hunter2" },
            attempt_count_max: 3,
        },
    },
}"#;

fn b64(raw: &str) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(raw)
}

#[tokio::test]
async fn auth_plain_with_initial_response() {
    let (replies, queued) = run_session(
        test_config(AUTH_CONFIG),
        &[
            "EHLO client.example.com\r\n",
            &format!("AUTH PLAIN {}\r\n", b64("\0jane\0hunter2")),
            "MAIL FROM:<jane@doe.com>\r\n",
            "RCPT TO:<john@doe.com>\r\n",
            "DATA\r\n",
            ".\r\n",
            "QUIT\r\n",
        ],
    )
    .await;

    // EHLO advertises AUTH with the dangerous mechanisms allowed in clair.
    assert!(replies.iter().any(|l| l.starts_with("250-AUTH PLAIN LOGIN CRAM-MD5 DIGEST-MD5")));
    assert!(replies.iter().any(|l| l.starts_with("235 2.7.0 authentication succeeded")));
    assert_eq!(queued.len(), 1);
}

#[tokio::test]
async fn auth_login_prompts() {
    let (replies, _) = run_session(
        test_config(AUTH_CONFIG),
        &[
            "EHLO client.example.com\r\n",
            "AUTH LOGIN\r\n",
            &format!("{}\r\n", b64("jane")),
            &format!("{}\r\n", b64("hunter2")),
            "QUIT\r\n",
        ],
    )
    .await;

    let tail = &replies[replies.len() - 4..];
    assert_replies(
        tail,
        &[
            &format!("334 {}", b64("Username:")),
            &format!("334 {}", b64("Password:")),
            "235 2.7.0 authentication succeeded",
            "221 ",
        ],
    );
}

#[tokio::test]
async fn auth_failures_close_the_session_past_the_quota() {
    let bad = format!("AUTH PLAIN {}\r\n", b64("\0jane\0wrong"));
    let (replies, _) = run_session(
        test_config(AUTH_CONFIG),
        &[
            "EHLO client.example.com\r\n",
            &bad,
            &bad,
            &bad,
            // Never reached: the third failure closes the connection.
            "NOOP\r\n",
        ],
    )
    .await;

    assert_eq!(
        replies
            .iter()
            .filter(|l| l.starts_with("535 5.7.8"))
            .count(),
        3
    );
    assert!(replies
        .last()
        .unwrap()
        .starts_with("421 4.7.0 too many failed authentication attempts"));
}

#[tokio::test]
async fn auth_twice_is_a_sequence_error() {
    let (replies, _) = run_session(
        test_config(AUTH_CONFIG),
        &[
            "EHLO client.example.com\r\n",
            &format!("AUTH PLAIN {}\r\n", b64("\0jane\0hunter2")),
            &format!("AUTH PLAIN {}\r\n", b64("\0jane\0hunter2")),
            "QUIT\r\n",
        ],
    )
    .await;

    let tail = &replies[replies.len() - 3..];
    assert_replies(
        tail,
        &[
            "235 2.7.0 authentication succeeded",
            "503 5.5.1 bad sequence of commands",
            "221 ",
        ],
    );
}

#[tokio::test]
async fn dangerous_mechanisms_are_refused_in_clair_by_default() {
    let (replies, _) = run_session(
        test_config(r#"{ esmtp: { auth: { users: { jane: "hunter2" } } } }"#),
        &[
            "EHLO client.example.com\r\n",
            &format!("AUTH PLAIN {}\r\n", b64("\0jane\0hunter2")),
            "QUIT\r\n",
        ],
    )
    .await;

    // PLAIN and LOGIN are not advertised without TLS, and refused outright.
    assert!(replies.iter().any(|l| l.starts_with("250-AUTH CRAM-MD5 DIGEST-MD5")));
    assert!(replies
        .iter()
        .any(|l| l.starts_with("538 5.7.11 encryption required")));
}

#[tokio::test]
async fn auth_cram_md5_exchange() {
    use hmac::Mac;

    let config = test_config(AUTH_CONFIG);

    // Drive the exchange by hand: the challenge is generated by the server.
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    let sink = Arc::new(VecSink::default());
    let session = Session::new(
        test_ctx(),
        config,
        Arc::new(Dispatcher::disabled()),
        sink,
        None,
    );
    let (client, server) = tokio::io::duplex(1 << 16);
    let serving = tokio::spawn(session.serve(server));

    let (read, mut write) = tokio::io::split(client);
    let mut lines = BufReader::new(read).lines();

    assert!(lines.next_line().await.unwrap().unwrap().starts_with("220 "));
    write.write_all(b"EHLO client.example.com\r\n").await.unwrap();
    loop {
        let line = lines.next_line().await.unwrap().unwrap();
        if line.starts_with("250 ") {
            break;
        }
    }

    write.write_all(b"AUTH CRAM-MD5\r\n").await.unwrap();
    let challenge_line = lines.next_line().await.unwrap().unwrap();
    let challenge_b64 = challenge_line.strip_prefix("334 ").unwrap();

    use base64::Engine;
    let challenge = base64::engine::general_purpose::STANDARD
        .decode(challenge_b64)
        .unwrap();

    let mut mac = <hmac::Hmac<md5::Md5> as Mac>::new_from_slice(b"hunter2").unwrap();
    mac.update(&challenge);
    let digest = mac
        .finalize()
        .into_bytes()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<String>();

    let response = b64(&format!("jane {digest}"));
    write
        .write_all(format!("{response}\r\n").as_bytes())
        .await
        .unwrap();

    let verdict = lines.next_line().await.unwrap().unwrap();
    assert!(verdict.starts_with("235 2.7.0"), "got {verdict:?}");

    write.write_all(b"QUIT\r\n").await.unwrap();
    assert!(lines.next_line().await.unwrap().unwrap().starts_with("221 "));
    serving.await.unwrap().unwrap();
}

#[tokio::test]
async fn xclient_requires_trust() {
    let (replies, _) = run_session(
        test_config("{}"),
        &[
            "XCLIENT ADDR=203.0.113.9 NAME=real.example.net\r\n",
            "QUIT\r\n",
        ],
    )
    .await;

    assert_replies(&replies, &["220 ", "550 5.7.1 XCLIENT not allowed", "221 "]);
}

#[tokio::test]
async fn xclient_from_a_trusted_peer_restarts_the_session() {
    let (replies, queued) = run_session(
        test_config(r#"{ xclient_trust: ["192.0.2.7"] }"#),
        &[
            "EHLO front.example.net\r\n",
            "XCLIENT ADDR=203.0.113.9 NAME=real.example.net LOGIN=relay\r\n",
            "EHLO real.example.net\r\n",
            "MAIL FROM:<john@doe.com>\r\n",
            "RCPT TO:<jane@doe.com>\r\n",
            "DATA\r\n",
            ".\r\n",
            "QUIT\r\n",
        ],
    )
    .await;

    // The trusted peer sees XCLIENT advertised and gets a fresh greeting.
    assert!(replies.iter().any(|l| l.starts_with("250-XCLIENT ADDR NAME PORT LOGIN")));
    assert!(replies.iter().filter(|l| l.starts_with("220 ")).count() >= 2);
    assert_eq!(queued.len(), 1);
}

#[tokio::test]
async fn helo_still_works() {
    let (replies, _) = run_session(
        test_config("{}"),
        &["HELO client.example.com\r\n", "QUIT\r\n"],
    )
    .await;

    assert_replies(
        &replies,
        &["220 ", "250 testserver.com Greetings client.example.com", "221 "],
    );
}
