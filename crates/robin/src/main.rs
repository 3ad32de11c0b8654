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

mod client;
mod probe;
mod server;

use clap::Parser;

/// Robin, an SMTP mail transfer agent and protocol tester.
#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Args {
    /// Run the scriptable client configured in client.json.
    #[arg(long)]
    client: bool,

    /// Run the server; reads server.json and webhooks.json5 from the given
    /// configuration directory.
    #[arg(long, value_name = "cfgDir", num_args = 0..=1, default_missing_value = "/etc/robin")]
    server: Option<std::path::PathBuf>,

    /// Resolve and print the MTA-STS policy of a domain.
    #[arg(long)]
    mtasts: bool,

    /// Query the TLSA record sets backing DANE for a domain or MX host.
    #[arg(long)]
    dane: bool,

    /// Target domain for --mtasts / --dane.
    #[arg(short, long)]
    domain: Option<String>,

    /// A single MX host: matched against the policy with --mtasts, queried
    /// directly with --dane.
    #[arg(short, long)]
    mx: Option<String>,

    /// Print the result as JSON.
    #[arg(short, long)]
    json: bool,

    /// Write the result to a file instead of standard output.
    #[arg(short, long)]
    file: Option<std::path::PathBuf>,

    /// Configuration directory for --client.
    #[arg(short, long, default_value = "/etc/robin")]
    config: std::path::PathBuf,
}

const EXIT_USAGE: i32 = 1;
const EXIT_FAILURE: i32 = 2;

fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(error) => {
            // clap prints help/version through the error path too.
            let code = if error.use_stderr() { EXIT_USAGE } else { 0 };
            let _ = error.print();
            std::process::exit(code);
        }
    };

    let modes =
        usize::from(args.client) + usize::from(args.server.is_some()) + usize::from(args.mtasts)
            + usize::from(args.dane);
    if modes != 1 {
        eprintln!("exactly one of --client, --server, --mtasts or --dane is required");
        std::process::exit(EXIT_USAGE);
    }

    if let Err(error) = robin_common::init_logs("info") {
        eprintln!("failed to initialize logging: {error}");
        std::process::exit(EXIT_FAILURE);
    }

    #[allow(clippy::expect_used)]
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("tokio runtime boots");

    let outcome = runtime.block_on(async {
        if let Some(config_dir) = &args.server {
            server::run(config_dir).await
        } else if args.client {
            client::run(&args.config).await
        } else if args.mtasts {
            probe::mtasts(&args).await
        } else {
            probe::dane(&args).await
        }
    });

    match outcome {
        Ok(()) => {}
        Err(error) => {
            eprintln!("{error}");
            std::process::exit(EXIT_FAILURE);
        }
    }
}

pub(crate) type AnyError = Box<dyn std::error::Error>;

pub(crate) fn usage_error(message: &str) -> ! {
    eprintln!("{message}");
    std::process::exit(EXIT_USAGE);
}

/// Print to stdout or the `--file` target.
pub(crate) fn emit(args: &Args, payload: &str) -> Result<(), AnyError> {
    match &args.file {
        Some(path) => std::fs::write(path, payload)?,
        None => println!("{payload}"),
    }
    Ok(())
}
