//! The storage engine: schema catalog, fixed-width row codec, flat data
//! files and the [`Store`] facade the server executes requests against.
//!
//! All shared mutable state lives in the filesystem (the catalog file and
//! one data file per table); the engine itself holds nothing but paths, so
//! any number of threads can share one `Store` behind an `Arc` and rely on
//! the per-file advisory locks for coordination.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

mod catalog;
mod codec;
mod error;
pub mod executor;
mod storage;

pub use catalog::{Catalog, Column, ColumnType, TableSchema, INT_WIDTH};
pub use error::{DbError, Result};
pub use storage::{FileLock, TableFile, SEND_CHUNK};

/// A fully parsed client request, ready for execution.
#[derive(Clone, Debug, PartialEq)]
pub enum Request {
    Create {
        table: String,
        columns: Vec<Column>,
    },
    /// Positional literals in source form (text literals keep their quotes).
    Insert {
        table: String,
        values: Vec<String>,
    },
    Select {
        table: String,
    },
    Drop {
        table: String,
    },
    Update {
        table: String,
        assignments: Vec<(String, String)>,
        key_column: String,
        key: i64,
    },
    Tables,
    Schema {
        table: String,
    },
    Quit,
}

/// Facade over the catalog and the per-table data files.
pub struct Store {
    catalog: Catalog,
    tables_dir: PathBuf,
}

impl Store {
    /// Opens (creating if needed) the data directory: `catalog.txt` plus a
    /// `tables/` subdirectory holding one `.tbl` file per table.
    pub fn open(data_dir: &Path) -> Result<Self> {
        let tables_dir = data_dir.join("tables");
        fs::create_dir_all(&tables_dir)?;
        let catalog_path = data_dir.join("catalog.txt");
        if !catalog_path.exists() {
            fs::File::create(&catalog_path)?;
        }
        Ok(Self {
            catalog: Catalog::new(catalog_path),
            tables_dir,
        })
    }

    fn table_file(&self, name: &str) -> TableFile {
        TableFile::new(&self.tables_dir, name)
    }

    /// Creates a table: catalog entry first, then the empty data file.
    pub fn create_table(&self, table: &str, columns: Vec<Column>) -> Result<()> {
        for col in &columns {
            if col.ty == ColumnType::Varchar(0) {
                return Err(DbError::BadVarchar(0));
            }
        }
        let schema = TableSchema {
            name: table.to_string(),
            columns,
        };
        self.catalog.add(&schema)?;
        self.table_file(table).create()?;
        Ok(())
    }

    /// Appends one row; the store assigns the primary key when the schema
    /// has one.
    pub fn insert(&self, table: &str, values: &[String]) -> Result<Option<i64>> {
        let schema = self
            .catalog
            .lookup(table)?
            .ok_or_else(|| DbError::NotFound(table.to_string()))?;
        self.table_file(table).insert(&schema, values)
    }

    /// Streams every row of `table` to `out`.
    pub fn select<W: Write>(&self, table: &str, out: &mut W) -> Result<()> {
        let schema = self
            .catalog
            .lookup(table)?
            .ok_or_else(|| DbError::NotFound(table.to_string()))?;
        self.table_file(table).stream_rows(&schema, out)
    }

    /// Drops a table: catalog line first, then the data file.
    ///
    /// If the data-file delete fails the catalog change stands and the
    /// caller gets `DataFileRemoval`; the table is gone from the catalog
    /// but its bytes remain on disk until an operator removes them.
    pub fn drop_table(&self, table: &str) -> Result<()> {
        self.catalog.remove(table)?;
        self.table_file(table).remove()?;
        Ok(())
    }

    /// Rewrites one row selected by primary key.
    pub fn update(
        &self,
        table: &str,
        assignments: &[(String, String)],
        key_column: &str,
        key: i64,
    ) -> Result<()> {
        let schema = self
            .catalog
            .lookup(table)?
            .ok_or_else(|| DbError::NotFound(table.to_string()))?;
        let (key_idx, key_col) = schema
            .key_column()
            .ok_or_else(|| DbError::NoPrimaryKey(table.to_string()))?;
        if key_col.name != key_column {
            return Err(DbError::WhereNotKey(key_column.to_string()));
        }
        self.table_file(table)
            .update_row(&schema, key_idx, key, assignments)
    }

    /// One table name per line, in catalog order.
    pub fn tables(&self) -> Result<String> {
        let mut out = String::new();
        for name in self.catalog.list()? {
            out.push_str(&name);
            out.push('\n');
        }
        Ok(out)
    }

    /// The SCHEMA command's listing for one table.
    pub fn schema_text(&self, table: &str) -> Result<String> {
        self.catalog.print_schema(table)
    }
}
