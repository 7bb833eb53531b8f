//! # flatdb - a tiny flat-file relational store
//!
//! A single-node relational store that keeps each table in one flat file of
//! fixed-width text records and serves a small SQL dialect over a
//! line-oriented TCP protocol. Supported statements: CREATE TABLE, INSERT,
//! SELECT *, UPDATE by primary key, DROP TABLE, plus the commands TABLES,
//! SCHEMA and QUIT.
//!
//! ## Architecture
//!
//! 1. **Server layer** (`server` module): TCP accept loop, per-connection
//!    statement readers, a bounded request queue and a fixed worker pool
//! 2. **Engine layer** (`engine` module): schema catalog, fixed-width row
//!    codec and per-table data files coordinated by advisory file locks
//! 3. **SQL layer** (`sql` module): statement text to request translation
//!
//! There is no WAL, no transactions and no planner; every operation is a
//! single locked pass over one catalog or data file.
//!
//! ## Usage example
//!
//! ```bash
//! # Start the server
//! cargo run -- --data ./dbdata --listen 127.0.0.1:54330
//!
//! # Connect and run statements
//! echo "CREATE TABLE users (id INT PRIMARY KEY, name VARCHAR(20));" | nc 127.0.0.1 54330
//! echo "INSERT INTO users VALUES ('Alice');" | nc 127.0.0.1 54330
//! echo "SELECT * FROM users;" | nc 127.0.0.1 54330
//! ```

/// TCP server, request queue and worker pool
pub mod server;

/// Catalog, row codec, data files and request execution
pub mod engine;

/// Statement parsing
pub mod sql;
