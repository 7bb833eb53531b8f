use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Arg, Command};
use flatdb::engine::Store;
use flatdb::server::{Server, ServerConfig};
use tracing_subscriber::{fmt, EnvFilter};

/// Entry point for the flatdb server.
///
/// Parses the command line, initializes logging, opens the data directory
/// and runs the TCP accept loop until the process is killed.
///
/// # Example usage
/// ```bash
/// cargo run -- --data ./dbdata --listen 127.0.0.1:54330 --workers 8
/// ```
fn main() -> Result<()> {
    let matches = Command::new("flatdb")
        .about("Flat-file relational store served over TCP")
        .arg(
            Arg::new("data")
                .long("data")
                .value_name("DIR")
                .required(true)
                .help("Data directory for the catalog and table files"),
        )
        .arg(
            Arg::new("listen")
                .long("listen")
                .value_name("ADDR")
                .default_value("127.0.0.1:54330")
                .help("Listen address for client connections"),
        )
        .arg(
            Arg::new("workers")
                .long("workers")
                .value_name("N")
                .default_value("8")
                .value_parser(clap::value_parser!(usize))
                .help("Number of worker threads"),
        )
        .arg(
            Arg::new("queue")
                .long("queue")
                .value_name("N")
                .default_value("32")
                .value_parser(clap::value_parser!(usize))
                .help("Request queue capacity"),
        )
        .arg(
            Arg::new("log")
                .long("log")
                .value_name("FILE")
                .help("Append logs to FILE instead of stderr"),
        )
        .get_matches();

    let data_dir = PathBuf::from(matches.get_one::<String>("data").expect("required"));
    let listen = matches.get_one::<String>("listen").expect("defaulted");
    let config = ServerConfig {
        workers: *matches.get_one::<usize>("workers").expect("defaulted"),
        queue_capacity: *matches.get_one::<usize>("queue").expect("defaulted"),
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match matches.get_one::<String>("log") {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("could not open log file {path}"))?;
            fmt()
                .with_env_filter(filter)
                .with_writer(Arc::new(file))
                .with_ansi(false)
                .init();
        }
        None => fmt().with_env_filter(filter).init(),
    }

    let store = Arc::new(Store::open(&data_dir)?);
    Server::bind(store, listen.as_str(), config)?.run()
}
