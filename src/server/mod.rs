//! TCP front end: accept loop, per-connection statement readers, and the
//! dispatcher thread feeding the worker pool.
//!
//! The pipeline has three stages. Reader threads (one per connection)
//! accumulate bytes until a `;`-terminated statement, parse it, and push
//! the result onto the bounded queue; when the queue is full the push
//! blocks, so overload parks readers instead of buffering requests without
//! limit. A single dispatcher thread pops requests and hands them to the
//! worker pool, whose threads execute against the store and write the
//! response on a cloned stream handle.

mod pool;
mod queue;

pub use pool::ThreadPool;
pub use queue::BoundedQueue;

use std::io::{BufRead, BufReader};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::engine::{executor, Request, Store};
use crate::sql;

/// Tunables for the request pipeline.
#[derive(Clone, Copy, Debug)]
pub struct ServerConfig {
    pub workers: usize,
    pub queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            queue_capacity: 32,
        }
    }
}

/// One parsed statement waiting for a worker.
struct ClientRequest {
    parsed: std::result::Result<Request, String>,
    peer: SocketAddr,
    stream: TcpStream,
}

pub struct Server {
    store: Arc<Store>,
    listener: TcpListener,
    config: ServerConfig,
}

impl Server {
    /// Binds the listen socket. `addr` may be any resolvable address;
    /// binding port 0 picks a free port (see [`local_addr`](Self::local_addr)).
    pub fn bind<A: ToSocketAddrs>(store: Arc<Store>, addr: A, config: ServerConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr).context("failed to bind listen address")?;
        Ok(Self {
            store,
            listener,
            config,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Runs the accept loop forever (or until the listener fails).
    pub fn run(self) -> Result<()> {
        info!(
            addr = %self.local_addr()?,
            workers = self.config.workers,
            queue = self.config.queue_capacity,
            "listening"
        );

        let queue: Arc<BoundedQueue<ClientRequest>> =
            Arc::new(BoundedQueue::new(self.config.queue_capacity));
        let pool = ThreadPool::new(self.config.workers);

        // dispatcher: queue -> pool, for the server's lifetime
        {
            let queue = Arc::clone(&queue);
            let store = Arc::clone(&self.store);
            thread::Builder::new()
                .name("dispatcher".to_string())
                .spawn(move || loop {
                    let ClientRequest {
                        parsed,
                        peer,
                        mut stream,
                    } = queue.pop();
                    let store = Arc::clone(&store);
                    pool.submit(move || executor::execute(&store, parsed, peer, &mut stream));
                })
                .context("failed to spawn dispatcher thread")?;
        }

        for incoming in self.listener.incoming() {
            let stream = match incoming {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            };
            let peer = match stream.peer_addr() {
                Ok(peer) => peer,
                Err(e) => {
                    warn!(error = %e, "dropping connection without peer address");
                    continue;
                }
            };
            info!(%peer, "client connected");

            let queue = Arc::clone(&queue);
            thread::Builder::new()
                .name(format!("client-{peer}"))
                .spawn(move || handle_client(stream, peer, &queue))
                .context("failed to spawn client thread")?;
        }
        Ok(())
    }
}

/// Reads `;`-terminated statements off one connection until EOF.
///
/// A statement may span several lines; lines are joined with single spaces.
/// Each complete statement is parsed and pushed (blocking) onto the queue
/// together with a cloned stream handle for the response.
fn handle_client(stream: TcpStream, peer: SocketAddr, queue: &BoundedQueue<ClientRequest>) {
    let reader = match stream.try_clone() {
        Ok(clone) => BufReader::new(clone),
        Err(e) => {
            warn!(%peer, error = %e, "could not clone client stream");
            return;
        }
    };

    let mut statement = String::new();
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(%peer, error = %e, "read failed");
                break;
            }
        };
        if !statement.is_empty() {
            statement.push(' ');
        }
        statement.push_str(line.trim());
        if !statement.trim_end().ends_with(';') {
            continue;
        }

        let text = std::mem::take(&mut statement);
        let parsed = sql::parse(&text);
        let response_stream = match stream.try_clone() {
            Ok(clone) => clone,
            Err(e) => {
                warn!(%peer, error = %e, "could not clone client stream");
                break;
            }
        };
        queue.push(ClientRequest {
            parsed,
            peer,
            stream: response_stream,
        });
    }
    info!(%peer, "client disconnected");
}
