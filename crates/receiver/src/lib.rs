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

pub mod smtp {
    pub mod server;
    pub mod session;
}

pub mod webhook;

pub use smtp::server::Server;
pub use smtp::session::{EnvelopeSink, Session};
pub use webhook::Dispatcher;
