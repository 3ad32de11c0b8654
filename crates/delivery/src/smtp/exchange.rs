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

use super::handler::{SenderHandler, UpgradeTls};
use robin_common::{response::Ehlo, transfer_error::Delivery};
use robin_protocol::{Reader, Reply, Transaction, Verb, Writer};

/// Drive one complete outbound session over a fresh connection: greeting,
/// EHLO, optional STARTTLS (with the second EHLO it mandates), envelope,
/// payload, QUIT.
pub async fn deliver_mail<H>(
    socket: tokio::net::TcpStream,
    handler: &mut H,
) -> Result<(), Delivery>
where
    H: SenderHandler,
{
    let (read, write) = socket.into_split();
    let mut reader = Reader::new(read);
    let mut writer = Writer::new(write);

    if handler.has_just_connected() {
        let greeting = reader.read_reply().await.map_err(Delivery::from)?;
        handler.on_greetings(greeting).await?;
    }

    match ehlo(&mut reader, &mut writer, handler).await? {
        UpgradeTls::Yes => {
            let (mut reader, mut writer) = starttls(reader, writer, handler).await?;
            // RFC 3207: the previous EHLO no longer stands.
            ehlo(&mut reader, &mut writer, handler).await?;
            authenticate(&mut reader, &mut writer, handler).await?;
            send_envelope(&mut reader, &mut writer, handler).await
        }
        UpgradeTls::No => {
            authenticate(&mut reader, &mut writer, handler).await?;
            send_envelope(&mut reader, &mut writer, handler).await
        }
    }
}

/// AUTH against the next hop, when the route carries credentials.
async fn authenticate<R, W, H>(
    reader: &mut Reader<R>,
    writer: &mut Writer<W>,
    handler: &mut H,
) -> Result<(), Delivery>
where
    H: SenderHandler,
    R: tokio::io::AsyncRead + Unpin + Send,
    W: tokio::io::AsyncWrite + Unpin + Send,
{
    let Some((mechanism, credentials)) = handler.get_credentials() else {
        return Ok(());
    };

    let mut exchange = robin_protocol::auth::ClientExchange::new(
        mechanism,
        credentials,
        &handler.get_server_hostname(),
    );

    // The payload recorded for AUTH never carries the credentials.
    let payload = format!("AUTH {mechanism}");
    match exchange.initial_response() {
        Some(initial) => {
            writer
                .write_all(&format!("{payload} {initial}\r\n"))
                .await?;
        }
        None => writer.write_all(&format!("{payload}\r\n")).await?,
    }

    loop {
        let reply = reader.read_reply().await.map_err(Delivery::from)?;
        match reply.code().value() {
            334 => {
                let challenge = reply.lines().next().cloned().unwrap_or_default();
                let response =
                    exchange
                        .respond(challenge.trim())
                        .map_err(|e| Delivery::Client {
                            with_source: Some(e.to_string()),
                        })?;
                writer.write_all(&format!("{response}\r\n")).await?;
            }
            235 => {
                handler.record(Transaction::new(Verb::Auth, payload, reply));
                return Ok(());
            }
            _ => {
                handler.record(Transaction::new(Verb::Auth, payload, reply.clone()));
                return Err(Delivery::from_reply(&reply));
            }
        }
    }
}

async fn command_round_trip<R, W, H>(
    reader: &mut Reader<R>,
    writer: &mut Writer<W>,
    handler: &mut H,
    verb: Verb,
    payload: String,
) -> Result<Reply, Delivery>
where
    H: SenderHandler,
    R: tokio::io::AsyncRead + Unpin + Send,
    W: tokio::io::AsyncWrite + Unpin + Send,
{
    writer.write_all(&format!("{payload}\r\n")).await?;
    let reply = reader.read_reply().await.map_err(Delivery::from)?;
    handler.record(Transaction::new(verb, payload, reply.clone()));
    Ok(reply)
}

async fn ehlo<R, W, H>(
    reader: &mut Reader<R>,
    writer: &mut Writer<W>,
    handler: &mut H,
) -> Result<UpgradeTls, Delivery>
where
    H: SenderHandler,
    R: tokio::io::AsyncRead + Unpin + Send,
    W: tokio::io::AsyncWrite + Unpin + Send,
{
    let payload = format!("EHLO {}", handler.get_client_name());
    let reply = command_round_trip(reader, writer, handler, Verb::Ehlo, payload).await?;
    handler.on_ehlo(Ehlo::try_from(reply)?).await
}

type TlsHalves = (
    Reader<tokio::io::ReadHalf<robin_protocol::tokio_rustls::client::TlsStream<tokio::net::TcpStream>>>,
    Writer<tokio::io::WriteHalf<robin_protocol::tokio_rustls::client::TlsStream<tokio::net::TcpStream>>>,
);

async fn starttls<H>(
    mut reader: Reader<tokio::net::tcp::OwnedReadHalf>,
    mut writer: Writer<tokio::net::tcp::OwnedWriteHalf>,
    handler: &mut H,
) -> Result<TlsHalves, Delivery>
where
    H: SenderHandler,
{
    let reply =
        command_round_trip(&mut reader, &mut writer, handler, Verb::StartTls, "STARTTLS".to_owned())
            .await?;

    if reply.code().value() != 220 {
        return Err(Delivery::Tls {
            with_source: Some(format!("STARTTLS was not accepted: {}", reply.text())),
        });
    }

    #[allow(clippy::expect_used)]
    let stream = writer
        .into_inner()
        .reunite(reader.into_inner())
        .expect("halves come from the same stream");

    let (connector, server_name) = handler.get_tls_connector()?;
    let tls_stream = connector
        .connect(server_name, stream)
        .await
        .map_err(|error| Delivery::Tls {
            with_source: Some(error.to_string()),
        })?;

    handler.on_tls_established();

    let (read, write) = tokio::io::split(tls_stream);
    Ok((Reader::new(read), Writer::new(write)))
}

async fn send_envelope<R, W, H>(
    reader: &mut Reader<R>,
    writer: &mut Writer<W>,
    handler: &mut H,
) -> Result<(), Delivery>
where
    H: SenderHandler,
    R: tokio::io::AsyncRead + Unpin + Send,
    W: tokio::io::AsyncWrite + Unpin + Send,
{
    let rcpt_to = handler.get_rcpt_to();
    if rcpt_to.is_empty() {
        return Err(Delivery::Client {
            with_source: Some("the envelope does not contain any recipient".to_owned()),
        });
    }

    let mail_payload = format!(
        "MAIL FROM:<{}>",
        handler
            .get_mail_from()
            .as_ref()
            .map_or_else(String::new, ToString::to_string)
    );

    if handler.has_pipelining() {
        let commands = std::iter::once(mail_payload.clone())
            .chain(rcpt_to.iter().map(|r| format!("RCPT TO:<{r}>")))
            .map(|c| format!("{c}\r\n"))
            .collect::<String>();
        writer.write_all(&commands).await?;

        let reply = reader.read_reply().await.map_err(Delivery::from)?;
        handler.record(Transaction::new(Verb::Mail, mail_payload, reply.clone()));
        handler.on_mail_from(reply).await?;

        for rcpt in &rcpt_to {
            let reply = reader.read_reply().await.map_err(Delivery::from)?;
            handler.record(Transaction::new(
                Verb::Rcpt,
                format!("RCPT TO:<{rcpt}>"),
                reply.clone(),
            ));
            handler.on_rcpt_to(rcpt, reply).await?;
        }
    } else {
        let reply =
            command_round_trip(reader, writer, handler, Verb::Mail, mail_payload).await?;
        handler.on_mail_from(reply).await?;

        for rcpt in &rcpt_to {
            let reply = command_round_trip(
                reader,
                writer,
                handler,
                Verb::Rcpt,
                format!("RCPT TO:<{rcpt}>"),
            )
            .await?;
            handler.on_rcpt_to(rcpt, reply).await?;
        }
    }

    // Sending the payload requires at least one accepted recipient.
    if handler.has_accepted_recipient() {
        if handler.use_chunking() {
            send_bdat(reader, writer, handler).await?;
        } else {
            send_data(reader, writer, handler).await?;
        }
    }

    quit(reader, writer, handler).await;
    Ok(())
}

async fn send_data<R, W, H>(
    reader: &mut Reader<R>,
    writer: &mut Writer<W>,
    handler: &mut H,
) -> Result<(), Delivery>
where
    H: SenderHandler,
    R: tokio::io::AsyncRead + Unpin + Send,
    W: tokio::io::AsyncWrite + Unpin + Send,
{
    writer.write_all("DATA\r\n").await?;
    let go_ahead = reader.read_reply().await.map_err(Delivery::from)?;
    if go_ahead.code().value() != 354 {
        handler.record(Transaction::new(Verb::Data, "DATA", go_ahead.clone()));
        return handler.on_data_start(go_ahead).await;
    }

    let message = handler.get_message().await?;
    writer.write_message_body(&message).await?;

    let reply = reader.read_reply().await.map_err(Delivery::from)?;
    handler.record(Transaction::new(Verb::Data, "DATA", reply.clone()));
    handler.on_data_end(reply).await
}

async fn send_bdat<R, W, H>(
    reader: &mut Reader<R>,
    writer: &mut Writer<W>,
    handler: &mut H,
) -> Result<(), Delivery>
where
    H: SenderHandler,
    R: tokio::io::AsyncRead + Unpin + Send,
    W: tokio::io::AsyncWrite + Unpin + Send,
{
    let message = handler.get_message().await?;
    let payload = format!("BDAT {} LAST", message.len());

    writer.write_all(&format!("{payload}\r\n")).await?;
    writer.write_all_bytes(&message).await?;

    let reply = reader.read_reply().await.map_err(Delivery::from)?;
    handler.record(Transaction::new(Verb::Bdat, payload, reply.clone()));
    handler.on_data_end(reply).await
}

/// Best-effort QUIT; the outcome of the envelope is already settled.
async fn quit<R, W, H>(reader: &mut Reader<R>, writer: &mut Writer<W>, handler: &mut H)
where
    H: SenderHandler,
    R: tokio::io::AsyncRead + Unpin + Send,
    W: tokio::io::AsyncWrite + Unpin + Send,
{
    if writer.write_all("QUIT\r\n").await.is_ok() {
        if let Ok(reply) = reader.read_reply().await {
            handler.record(Transaction::new(Verb::Quit, "QUIT", reply));
        }
    }
}
