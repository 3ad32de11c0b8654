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

mod command;
mod error;
mod reader;
mod transaction;
mod writer;

mod stage;
pub use stage::Stage;

pub mod auth {
    mod client;
    mod credentials;
    mod digest;
    mod mechanism;
    mod server;

    pub use client::ClientExchange;
    pub use credentials::Credentials;
    pub use digest::{DigestChallenge, DigestResponse};
    pub use mechanism::Mechanism;
    pub use server::{AuthError, Proof, ServerExchange, ServerStep};
}

mod types {
    pub mod address;
    pub mod client_name;
    pub mod domain;
    pub mod reply;
    pub mod reply_code;
}

pub use command::{parse_path, Command, ParseArgsError, Verb, XclientAttrs};
pub use error::Error;
pub use reader::Reader;
pub use tokio_rustls;
pub use tokio_rustls::rustls;
pub use transaction::{EnvelopeLog, SessionLog, Transaction, TransactionLog};
pub use types::{
    address::Address, client_name::ClientName, domain::Domain, reply::Reply, reply_code::ReplyCode,
};
pub use writer::Writer;
