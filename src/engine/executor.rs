//! Executes parsed requests against the [`Store`] and writes the response.
//!
//! Each request produces exactly one response write on the client's stream,
//! except SELECT, which streams its rows in chunks (an empty table writes
//! nothing at all, a quirk of the wire format kept for compatibility).

use std::io::Write;
use std::net::{Shutdown, SocketAddr, TcpStream};

use tracing::{error, info, warn};

use crate::engine::{DbError, Request, Store};

/// Runs one request end to end: execute against the store, send the
/// response. Parse failures arrive as `Err(message)` and are sent verbatim
/// without touching the store.
pub fn execute(
    store: &Store,
    parsed: Result<Request, String>,
    peer: SocketAddr,
    stream: &mut TcpStream,
) {
    let request = match parsed {
        Ok(request) => request,
        Err(message) => {
            warn!(%peer, %message, "rejected statement");
            respond(stream, peer, &message);
            return;
        }
    };

    match request {
        Request::Create { table, columns } => {
            let reply = match store.create_table(&table, columns) {
                Ok(()) => {
                    info!(%peer, table, "created table");
                    format!("successfully created table '{table}'\n")
                }
                Err(e) => client_line(&e, peer),
            };
            respond(stream, peer, &reply);
        }
        Request::Insert { table, values } => {
            let reply = match store.insert(&table, &values) {
                Ok(key) => {
                    info!(%peer, table, key, "inserted row");
                    format!("successfully inserted row into table '{table}'\n")
                }
                // INSERT has its own wording for a missing table
                Err(DbError::NotFound(t)) => format!("error: table '{t}' doesn't exist\n"),
                Err(e) => client_line(&e, peer),
            };
            respond(stream, peer, &reply);
        }
        Request::Select { table } => match store.select(&table, stream) {
            Ok(()) => {}
            Err(e) => respond(stream, peer, &client_line(&e, peer)),
        },
        Request::Drop { table } => {
            let reply = match store.drop_table(&table) {
                Ok(()) => {
                    info!(%peer, table, "dropped table");
                    format!("successfully dropped table '{table}'\n")
                }
                Err(e) => client_line(&e, peer),
            };
            respond(stream, peer, &reply);
        }
        Request::Update {
            table,
            assignments,
            key_column,
            key,
        } => {
            let reply = match store.update(&table, &assignments, &key_column, key) {
                Ok(()) => {
                    info!(%peer, table, key, "updated row");
                    format!("successfully updated row in table '{table}'\n")
                }
                Err(e) => client_line(&e, peer),
            };
            respond(stream, peer, &reply);
        }
        Request::Tables => {
            let reply = match store.tables() {
                Ok(listing) => listing,
                Err(e) => client_line(&e, peer),
            };
            respond(stream, peer, &reply);
        }
        Request::Schema { table } => {
            let reply = match store.schema_text(&table) {
                Ok(listing) => listing,
                // SCHEMA has its own wording for a missing table
                Err(DbError::NotFound(t)) => format!("error: table '{t}' does not exists\n"),
                Err(e) => client_line(&e, peer),
            };
            respond(stream, peer, &reply);
        }
        Request::Quit => {
            info!(%peer, "client quit");
            if let Err(e) = stream.shutdown(Shutdown::Both) {
                warn!(%peer, error = %e, "shutdown failed");
            }
        }
    }
}

/// Maps an engine error to its client line, logging I/O detail server-side.
fn client_line(err: &DbError, peer: SocketAddr) -> String {
    if let DbError::Io(e) = err {
        error!(%peer, error = %e, "request failed");
    }
    err.client_message()
}

fn respond(stream: &mut TcpStream, peer: SocketAddr, reply: &str) {
    if let Err(e) = stream.write_all(reply.as_bytes()) {
        error!(%peer, error = %e, "failed to send response");
    }
}
