//! Per-table data files and advisory locking.
//!
//! Each table stores its rows in one flat file of fixed-width records (see
//! [`crate::engine::codec`]). Cross-process coordination uses OS advisory
//! whole-file locks: writers take an exclusive lock, readers a shared one,
//! always scoped to a single operation.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::engine::catalog::{TableSchema, INT_WIDTH};
use crate::engine::codec::{decode_field, decode_row, encode_row, encode_value};
use crate::engine::error::{DbError, Result};

/// SELECT responses are flushed in chunks of at most this many bytes. A chunk
/// always ends on a row boundary; a single row longer than this is sent whole
/// in its own write, so the bound holds per chunk, not per row.
pub const SEND_CHUNK: usize = 2048;

/// Scoped advisory lock over an open file.
///
/// Acquiring blocks until the lock is granted. Dropping the guard releases
/// the lock, so early returns and `?` cannot leak a held lock.
pub struct FileLock {
    file: File,
}

impl FileLock {
    /// Takes the exclusive (write) lock.
    pub fn exclusive(file: File) -> Result<Self> {
        file.lock()?;
        Ok(Self { file })
    }

    /// Takes the shared (read) lock.
    pub fn shared(file: File) -> Result<Self> {
        file.lock_shared()?;
        Ok(Self { file })
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    pub fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// Handle to one table's data file. Holds no open descriptor; every
/// operation opens, locks, works and releases.
pub struct TableFile {
    name: String,
    path: PathBuf,
}

impl TableFile {
    pub fn new(dir: &Path, name: &str) -> Self {
        Self {
            name: name.to_string(),
            path: dir.join(format!("{name}.tbl")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creates the (empty) data file. Fails if it already exists.
    pub fn create(&self) -> Result<()> {
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)?;
        Ok(())
    }

    /// Deletes the data file.
    pub fn remove(&self) -> Result<()> {
        fs::remove_file(&self.path)
            .map_err(|_| DbError::DataFileRemoval(self.name.clone()))
    }

    /// Appends one row.
    ///
    /// When the schema has a primary-key column, `values` covers the other
    /// columns and the key is assigned from [`next_key`](Self::next_key);
    /// the key read and the append happen under one exclusive lock so two
    /// concurrent inserts can never mint the same key. Returns the assigned
    /// key, if any.
    pub fn insert(&self, schema: &TableSchema, values: &[String]) -> Result<Option<i64>> {
        let file = match OpenOptions::new().read(true).write(true).open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(DbError::NotFound(self.name.clone()));
            }
            Err(e) => return Err(e.into()),
        };
        let mut lock = FileLock::exclusive(file)?;

        let (row, key) = match schema.key_column() {
            Some((key_idx, _)) => {
                if values.len() != schema.columns.len() - 1 {
                    return Err(DbError::ArityMismatch {
                        expected: schema.columns.len() - 1,
                        got: values.len(),
                    });
                }
                let key = next_key(lock.file_mut(), schema, key_idx)?;
                let mut full = values.to_vec();
                full.insert(key_idx, key.to_string());
                (encode_row(schema, &full)?, Some(key))
            }
            None => (encode_row(schema, values)?, None),
        };

        let file = lock.file_mut();
        file.seek(SeekFrom::End(0))?;
        file.write_all(&row)?;
        Ok(key)
    }

    /// Streams every row to `out`, tab-joined, one line per row.
    ///
    /// Rows are accumulated into buffers of at most [`SEND_CHUNK`] bytes and
    /// flushed whole; a row is never split across two writes. An empty table
    /// writes nothing at all.
    pub fn stream_rows<W: Write>(&self, schema: &TableSchema, out: &mut W) -> Result<()> {
        let file = match OpenOptions::new().read(true).open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(DbError::NotFound(self.name.clone()));
            }
            Err(e) => return Err(e.into()),
        };
        let lock = FileLock::shared(file)?;

        let row_width = schema.row_width();
        let mut reader = BufReader::new(lock.file());
        let mut raw = vec![0u8; row_width];
        let mut chunk = Vec::with_capacity(SEND_CHUNK);
        loop {
            match reader.read_exact(&mut raw) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let line = decode_row(schema, &raw).join("\t") + "\n";
            if line.len() >= SEND_CHUNK {
                // a row wider than a chunk goes out whole, by itself
                if !chunk.is_empty() {
                    out.write_all(&chunk)?;
                    chunk.clear();
                }
                out.write_all(line.as_bytes())?;
                continue;
            }
            if chunk.len() + line.len() > SEND_CHUNK && !chunk.is_empty() {
                out.write_all(&chunk)?;
                chunk.clear();
            }
            chunk.extend_from_slice(line.as_bytes());
        }
        if !chunk.is_empty() {
            out.write_all(&chunk)?;
        }
        out.flush()?;
        Ok(())
    }

    /// Rewrites the row whose key column equals `key`, applying the given
    /// `column = literal` assignments in place.
    ///
    /// Scans sequentially under the exclusive lock, decodes the matching
    /// row, re-encodes the assigned columns and writes the full row back at
    /// its original offset. The file length never changes.
    pub fn update_row(
        &self,
        schema: &TableSchema,
        key_idx: usize,
        key: i64,
        assignments: &[(String, String)],
    ) -> Result<()> {
        let file = match OpenOptions::new().read(true).write(true).open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(DbError::NotFound(self.name.clone()));
            }
            Err(e) => return Err(e.into()),
        };
        let mut lock = FileLock::exclusive(file)?;

        let row_width = schema.row_width();
        let key_offset = schema.offset_of(key_idx);
        let mut raw = vec![0u8; row_width];
        let mut offset = 0u64;
        loop {
            let file = lock.file_mut();
            file.seek(SeekFrom::Start(offset))?;
            match file.read_exact(&mut raw) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                    return Err(DbError::KeyNotFound(key));
                }
                Err(e) => return Err(e.into()),
            }
            let field = decode_field(&raw[key_offset..key_offset + INT_WIDTH]);
            if field.parse::<i64>() == Ok(key) {
                break;
            }
            offset += row_width as u64;
        }

        // splice only the assigned fields; untouched columns keep their
        // exact stored bytes (re-encoding a decoded value is lossy for
        // text that itself starts with a quote or a pad byte)
        for (column, literal) in assignments {
            let (idx, col) = schema
                .column(column)
                .ok_or_else(|| DbError::UnknownColumn(column.clone()))?;
            let field = encode_value(col, literal)?;
            let start = schema.offset_of(idx);
            raw[start..start + col.width()].copy_from_slice(&field);
        }

        let file = lock.file_mut();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&raw)?;
        Ok(())
    }
}

/// Reads the key field of the last row and returns it plus one, or 1 for an
/// empty file. The caller must already hold the exclusive lock.
fn next_key(file: &mut File, schema: &TableSchema, key_idx: usize) -> Result<i64> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(1);
    }
    let row_width = schema.row_width() as u64;
    // a crash mid-append can leave a partial row behind
    if len < row_width || len % row_width != 0 {
        return Err(DbError::Io(std::io::Error::new(
            ErrorKind::InvalidData,
            "data file length is not a whole number of rows",
        )));
    }
    let key_offset = schema.offset_of(key_idx) as u64;
    file.seek(SeekFrom::Start(len - row_width + key_offset))?;
    let mut field = [0u8; INT_WIDTH];
    file.read_exact(&mut field)?;
    let last: i64 = decode_field(&field).parse().map_err(|_| {
        DbError::Io(std::io::Error::new(
            ErrorKind::InvalidData,
            "corrupt key field in data file",
        ))
    })?;
    Ok(last + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::catalog::{Column, ColumnType};
    use tempfile::TempDir;

    /// Records each write separately so chunk boundaries are observable.
    struct SplitCheck {
        writes: Vec<Vec<u8>>,
    }

    impl Write for SplitCheck {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.writes.push(buf.to_vec());
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn keyed_schema() -> TableSchema {
        TableSchema {
            name: "t".to_string(),
            columns: vec![
                Column {
                    name: "id".to_string(),
                    ty: ColumnType::Int,
                    primary_key: true,
                },
                Column {
                    name: "name".to_string(),
                    ty: ColumnType::Varchar(5),
                    primary_key: false,
                },
            ],
        }
    }

    #[test]
    fn keys_are_assigned_sequentially_from_one() {
        let dir = TempDir::new().unwrap();
        let table = TableFile::new(dir.path(), "t");
        table.create().unwrap();
        let schema = keyed_schema();

        for (i, name) in ["'a'", "'b'", "'c'"].iter().enumerate() {
            let key = table.insert(&schema, &[name.to_string()]).unwrap();
            assert_eq!(key, Some(i as i64 + 1));
        }
        let len = fs::metadata(table.path()).unwrap().len();
        assert_eq!(len, 3 * schema.row_width() as u64);
    }

    #[test]
    fn insert_on_truncated_file_reports_corruption() {
        let dir = TempDir::new().unwrap();
        let table = TableFile::new(dir.path(), "t");
        table.create().unwrap();
        let schema = keyed_schema();
        // shorter than one row, as a crash mid-append would leave it
        fs::write(table.path(), b"0000").unwrap();

        let err = table.insert(&schema, &["'a'".to_string()]).unwrap_err();
        assert!(matches!(err, DbError::Io(_)));

        // a dangling partial row after whole rows is caught too
        fs::write(table.path(), b"0000000001000ab\n0000").unwrap();
        let err = table.insert(&schema, &["'b'".to_string()]).unwrap_err();
        assert!(matches!(err, DbError::Io(_)));
    }

    #[test]
    fn insert_without_file_reports_missing_table() {
        let dir = TempDir::new().unwrap();
        let table = TableFile::new(dir.path(), "t");
        let err = table
            .insert(&keyed_schema(), &["'a'".to_string()])
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound(_)));
    }

    #[test]
    fn streamed_rows_are_tab_joined_lines() {
        let dir = TempDir::new().unwrap();
        let table = TableFile::new(dir.path(), "t");
        table.create().unwrap();
        let schema = keyed_schema();
        table.insert(&schema, &["'ab'".to_string()]).unwrap();
        table.insert(&schema, &["'cd'".to_string()]).unwrap();

        let mut out = Vec::new();
        table.stream_rows(&schema, &mut out).unwrap();
        assert_eq!(out, b"1\tab\n2\tcd\n".to_vec());
    }

    #[test]
    fn empty_table_streams_nothing() {
        let dir = TempDir::new().unwrap();
        let table = TableFile::new(dir.path(), "t");
        table.create().unwrap();

        let mut out = Vec::new();
        table.stream_rows(&keyed_schema(), &mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn chunks_never_split_a_row() {
        let dir = TempDir::new().unwrap();
        let table = TableFile::new(dir.path(), "t");
        table.create().unwrap();
        let schema = keyed_schema();
        // enough rows that the output spans several chunks
        for _ in 0..1000 {
            table.insert(&schema, &["'x'".to_string()]).unwrap();
        }

        let mut out = SplitCheck { writes: Vec::new() };
        table.stream_rows(&schema, &mut out).unwrap();
        assert!(out.writes.len() > 1);
        for chunk in &out.writes {
            assert!(chunk.len() <= SEND_CHUNK);
            assert_eq!(chunk.last(), Some(&b'\n'));
        }
    }

    #[test]
    fn a_row_wider_than_a_chunk_is_sent_whole() {
        let dir = TempDir::new().unwrap();
        let table = TableFile::new(dir.path(), "t");
        table.create().unwrap();
        let schema = TableSchema {
            name: "t".to_string(),
            columns: vec![
                Column {
                    name: "id".to_string(),
                    ty: ColumnType::Int,
                    primary_key: true,
                },
                Column {
                    name: "body".to_string(),
                    ty: ColumnType::Varchar(3000),
                    primary_key: false,
                },
            ],
        };
        let big = format!("'{}'", "a".repeat(2500));
        table.insert(&schema, &[big]).unwrap();
        table.insert(&schema, &["'b'".to_string()]).unwrap();

        let mut out = SplitCheck { writes: Vec::new() };
        table.stream_rows(&schema, &mut out).unwrap();
        assert_eq!(out.writes.len(), 2);
        // the oversized row is one whole write, never sliced mid-row
        assert!(out.writes[0].len() > SEND_CHUNK);
        assert_eq!(out.writes[0].iter().filter(|b| **b == b'\n').count(), 1);
        assert_eq!(out.writes[1], b"2\tb\n".to_vec());
    }

    #[test]
    fn update_rewrites_one_row_in_place() {
        let dir = TempDir::new().unwrap();
        let table = TableFile::new(dir.path(), "t");
        table.create().unwrap();
        let schema = keyed_schema();
        table.insert(&schema, &["'a'".to_string()]).unwrap();
        table.insert(&schema, &["'b'".to_string()]).unwrap();
        let before = fs::metadata(table.path()).unwrap().len();

        table
            .update_row(&schema, 0, 2, &[("name".to_string(), "'zz'".to_string())])
            .unwrap();

        assert_eq!(fs::metadata(table.path()).unwrap().len(), before);
        let mut out = Vec::new();
        table.stream_rows(&schema, &mut out).unwrap();
        assert_eq!(out, b"1\ta\n2\tzz\n".to_vec());
    }

    #[test]
    fn update_keeps_stored_quote_characters_in_untouched_columns() {
        let dir = TempDir::new().unwrap();
        let table = TableFile::new(dir.path(), "t");
        table.create().unwrap();
        let schema = TableSchema {
            name: "t".to_string(),
            columns: vec![
                Column {
                    name: "id".to_string(),
                    ty: ColumnType::Int,
                    primary_key: true,
                },
                Column {
                    name: "a".to_string(),
                    ty: ColumnType::Varchar(8),
                    primary_key: false,
                },
                Column {
                    name: "b".to_string(),
                    ty: ColumnType::Varchar(3),
                    primary_key: false,
                },
            ],
        };
        // stored value is 'quoted', quotes included
        table
            .insert(&schema, &["''quoted''".to_string(), "'x'".to_string()])
            .unwrap();

        table
            .update_row(&schema, 0, 1, &[("b".to_string(), "'y'".to_string())])
            .unwrap();

        let mut out = Vec::new();
        table.stream_rows(&schema, &mut out).unwrap();
        assert_eq!(out, b"1\t'quoted'\ty\n".to_vec());
    }

    #[test]
    fn update_with_absent_key_fails() {
        let dir = TempDir::new().unwrap();
        let table = TableFile::new(dir.path(), "t");
        table.create().unwrap();
        let schema = keyed_schema();
        table.insert(&schema, &["'a'".to_string()]).unwrap();

        let err = table
            .update_row(&schema, 0, 9, &[("name".to_string(), "'b'".to_string())])
            .unwrap_err();
        assert!(matches!(err, DbError::KeyNotFound(9)));
    }

    #[test]
    fn update_with_unknown_column_fails() {
        let dir = TempDir::new().unwrap();
        let table = TableFile::new(dir.path(), "t");
        table.create().unwrap();
        let schema = keyed_schema();
        table.insert(&schema, &["'a'".to_string()]).unwrap();

        let err = table
            .update_row(&schema, 0, 1, &[("nope".to_string(), "'b'".to_string())])
            .unwrap_err();
        assert!(matches!(err, DbError::UnknownColumn(_)));
    }

    #[test]
    fn concurrent_inserts_interleave_whole_rows() {
        use std::sync::Arc;
        use std::thread;

        let dir = TempDir::new().unwrap();
        let table = Arc::new(TableFile::new(dir.path(), "t"));
        table.create().unwrap();
        let schema = Arc::new(keyed_schema());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let table = Arc::clone(&table);
                let schema = Arc::clone(&schema);
                thread::spawn(move || {
                    for _ in 0..16 {
                        table.insert(&schema, &["'row'".to_string()]).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let len = fs::metadata(table.path()).unwrap().len();
        assert_eq!(len, 128 * schema.row_width() as u64);

        let mut out = Vec::new();
        table.stream_rows(&schema, &mut out).unwrap();
        let mut keys: Vec<i64> = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| l.split('\t').next().unwrap().parse().unwrap())
            .collect();
        keys.sort_unstable();
        assert_eq!(keys, (1..=128).collect::<Vec<i64>>());
    }
}
