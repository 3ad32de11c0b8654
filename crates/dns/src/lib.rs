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

mod resolver;

pub mod rbl;
pub mod sts;
pub mod tlsa;

pub use resolver::{
    DnsClient, Lookup, MxRecord, RecordType, Resolve, StaticResolver, SystemResolver,
};
