use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::engine::error::{DbError, Result};
use crate::engine::storage::FileLock;

/// On-disk width of an INT field: ten ASCII digits.
pub const INT_WIDTH: usize = 10;

/// Marker digit prefixed to a primary-key column name in the catalog file.
const KEY_MARKER: char = '1';

/// Data types a column can hold.
///
/// `Int` always occupies [`INT_WIDTH`] bytes on disk; `Varchar(n)` occupies
/// exactly `n` bytes. There is no NULL and no variable-width storage: the
/// declared width *is* the field width.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnType {
    /// 64-bit signed integer, rendered as a zero-padded decimal field.
    Int,
    /// Text of at most the given byte width, left-padded to that width.
    Varchar(usize),
}

impl ColumnType {
    /// Number of bytes this type occupies within a row.
    pub fn width(self) -> usize {
        match self {
            ColumnType::Int => INT_WIDTH,
            ColumnType::Varchar(n) => n,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Int => write!(f, "INT"),
            ColumnType::Varchar(n) => write!(f, "VARCHAR({n})"),
        }
    }
}

/// A single column of a table schema.
#[derive(Clone, Debug, PartialEq)]
pub struct Column {
    /// Column name (unique within a table, never starts with a digit).
    pub name: String,
    /// Data type, which also fixes the on-disk field width.
    pub ty: ColumnType,
    /// Whether this column is the table's primary key (INT only, at most one).
    pub primary_key: bool,
}

impl Column {
    pub fn width(&self) -> usize {
        self.ty.width()
    }
}

/// Ordered schema of one table.
///
/// Column order determines the row layout: each column's field starts at the
/// sum of the widths of the columns before it, and every row ends with one
/// newline byte. Schemas are immutable once created; there is no ALTER.
#[derive(Clone, Debug, PartialEq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<Column>,
}

impl TableSchema {
    /// Total byte length of one encoded row, including the trailing newline.
    pub fn row_width(&self) -> usize {
        self.columns.iter().map(Column::width).sum::<usize>() + 1
    }

    /// Byte offset of column `idx` within a row.
    pub fn offset_of(&self, idx: usize) -> usize {
        self.columns[..idx].iter().map(Column::width).sum()
    }

    /// The primary-key column and its index, if the table has one.
    pub fn key_column(&self) -> Option<(usize, &Column)> {
        self.columns.iter().enumerate().find(|(_, c)| c.primary_key)
    }

    /// Looks up a column by name.
    pub fn column(&self, name: &str) -> Option<(usize, &Column)> {
        self.columns.iter().enumerate().find(|(_, c)| c.name == name)
    }
}

/// The schema catalog: one text file, one line per table.
///
/// ## File format
///
/// ```text
/// name,colA TYPE,colB TYPE,...\n
/// ```
///
/// where TYPE is `INT` or `VARCHAR(<n>)` and a primary-key column's name
/// carries a leading `1` marker digit. The catalog file is the single source
/// of truth for decoding any data file. Every operation re-reads it under an
/// advisory lock rather than caching schemas in memory, so concurrent
/// processes always agree on the current schema set.
pub struct Catalog {
    path: PathBuf,
}

impl Catalog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a table with this name is recorded in the catalog.
    pub fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.lookup(name)?.is_some())
    }

    /// Records a new table, validating its schema first.
    ///
    /// Fails with `DuplicatePrimaryKey` if more than one column is marked
    /// primary, `PrimaryKeyOnText` if the key column is not an INT, and
    /// `AlreadyExists` if the catalog already has a line for this name. The
    /// existence check and the append happen under one exclusive lock so two
    /// concurrent CREATEs cannot both slip past the check.
    pub fn add(&self, schema: &TableSchema) -> Result<()> {
        let keys: Vec<&Column> = schema.columns.iter().filter(|c| c.primary_key).collect();
        if keys.len() > 1 {
            return Err(DbError::DuplicatePrimaryKey);
        }
        if keys.iter().any(|c| !matches!(c.ty, ColumnType::Int)) {
            return Err(DbError::PrimaryKeyOnText);
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&self.path)?;
        let mut lock = FileLock::exclusive(file)?;

        for line in BufReader::new(lock.file()).lines() {
            if let Some(parsed) = parse_line(&line?) {
                if parsed.name == schema.name {
                    return Err(DbError::AlreadyExists(schema.name.clone()));
                }
            }
        }

        let file = lock.file_mut();
        file.seek(SeekFrom::End(0))?;
        file.write_all(render_line(schema).as_bytes())?;
        Ok(())
    }

    /// Finds a table's schema by scanning the catalog file.
    pub fn lookup(&self, name: &str) -> Result<Option<TableSchema>> {
        let file = match OpenOptions::new().read(true).open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let lock = FileLock::shared(file)?;

        for line in BufReader::new(lock.file()).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match parse_line(&line) {
                Some(schema) if schema.name == name => return Ok(Some(schema)),
                Some(_) => {}
                None => warn!(%line, "skipping malformed catalog line"),
            }
        }
        Ok(None)
    }

    /// Removes a table's catalog line, leaving every other line untouched.
    ///
    /// Non-matching lines are copied to a temporary file that is then renamed
    /// over the catalog, so a crash mid-rewrite never leaves a half-written
    /// catalog behind. Fails with `NotFound` if no line matched. Deleting the
    /// table's data file is the caller's job.
    pub fn remove(&self, name: &str) -> Result<()> {
        let file = match OpenOptions::new().read(true).open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DbError::NotFound(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let lock = FileLock::exclusive(file)?;

        let tmp_path = self.path.with_extension("tmp");
        let mut tmp = fs::File::create(&tmp_path)?;
        let mut found = false;
        for line in BufReader::new(lock.file()).lines() {
            let line = line?;
            match line.split_once(',') {
                Some((table, _)) if table == name => found = true,
                _ => {
                    tmp.write_all(line.as_bytes())?;
                    tmp.write_all(b"\n")?;
                }
            }
        }

        if !found {
            let _ = fs::remove_file(&tmp_path);
            return Err(DbError::NotFound(name.to_string()));
        }
        tmp.flush()?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    /// All table names, in catalog-file order.
    pub fn list(&self) -> Result<Vec<String>> {
        let file = match OpenOptions::new().read(true).open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let lock = FileLock::shared(file)?;

        let mut names = Vec::new();
        for line in BufReader::new(lock.file()).lines() {
            let line = line?;
            if let Some((table, _)) = line.split_once(',') {
                names.push(table.to_string());
            }
        }
        Ok(names)
    }

    /// Renders a table's columns for the SCHEMA command.
    ///
    /// One column per line, name and type separated by a tab, with a second
    /// tab after names shorter than eight characters so types line up in a
    /// terminal. No trailing newline.
    pub fn print_schema(&self, name: &str) -> Result<String> {
        let schema = self
            .lookup(name)?
            .ok_or_else(|| DbError::NotFound(name.to_string()))?;

        let mut out = String::new();
        for col in &schema.columns {
            out.push_str(&col.name);
            out.push('\t');
            if col.name.len() < 8 {
                out.push('\t');
            }
            out.push_str(&col.ty.to_string());
            out.push('\n');
        }
        out.pop();
        Ok(out)
    }
}

/// Renders one catalog line, including the trailing newline.
fn render_line(schema: &TableSchema) -> String {
    let mut line = schema.name.clone();
    for col in &schema.columns {
        line.push(',');
        if col.primary_key {
            line.push(KEY_MARKER);
        }
        line.push_str(&col.name);
        line.push(' ');
        line.push_str(&col.ty.to_string());
    }
    line.push('\n');
    line
}

/// Parses one catalog line back into a schema. Returns `None` on any
/// malformed token; the caller decides whether to skip or complain.
fn parse_line(line: &str) -> Option<TableSchema> {
    let mut parts = line.trim_end().split(',');
    let name = parts.next()?.to_string();
    if name.is_empty() {
        return None;
    }

    let mut columns = Vec::new();
    for part in parts {
        let (raw_name, ty) = part.split_once(' ')?;
        let (col_name, primary_key) = match raw_name.strip_prefix(KEY_MARKER) {
            Some(rest) => (rest, true),
            None => (raw_name, false),
        };
        let ty = parse_type(ty)?;
        columns.push(Column {
            name: col_name.to_string(),
            ty,
            primary_key,
        });
    }
    if columns.is_empty() {
        return None;
    }
    Some(TableSchema { name, columns })
}

fn parse_type(token: &str) -> Option<ColumnType> {
    if token == "INT" {
        return Some(ColumnType::Int);
    }
    let width = token.strip_prefix("VARCHAR(")?.strip_suffix(')')?;
    Some(ColumnType::Varchar(width.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_schema() -> TableSchema {
        TableSchema {
            name: "t".to_string(),
            columns: vec![
                Column {
                    name: "id".to_string(),
                    ty: ColumnType::Int,
                    primary_key: false,
                },
                Column {
                    name: "name".to_string(),
                    ty: ColumnType::Varchar(5),
                    primary_key: false,
                },
            ],
        }
    }

    fn catalog(dir: &TempDir) -> Catalog {
        Catalog::new(dir.path().join("catalog.txt"))
    }

    #[test]
    fn line_format_is_byte_exact() {
        assert_eq!(render_line(&sample_schema()), "t,id INT,name VARCHAR(5)\n");
    }

    #[test]
    fn key_marker_round_trips() {
        let mut schema = sample_schema();
        schema.columns[0].primary_key = true;
        let line = render_line(&schema);
        assert_eq!(line, "t,1id INT,name VARCHAR(5)\n");

        let parsed = parse_line(&line).unwrap();
        assert_eq!(parsed, schema);
        assert_eq!(parsed.key_column().unwrap().0, 0);
    }

    #[test]
    fn row_width_counts_newline() {
        assert_eq!(sample_schema().row_width(), 16);
        assert_eq!(sample_schema().offset_of(1), 10);
    }

    #[test]
    fn add_then_lookup_and_list() {
        let dir = TempDir::new().unwrap();
        let cat = catalog(&dir);
        assert!(!cat.exists("t").unwrap());

        cat.add(&sample_schema()).unwrap();
        assert!(cat.exists("t").unwrap());
        assert_eq!(cat.lookup("t").unwrap().unwrap(), sample_schema());
        assert_eq!(cat.list().unwrap(), vec!["t".to_string()]);
    }

    #[test]
    fn duplicate_add_is_rejected() {
        let dir = TempDir::new().unwrap();
        let cat = catalog(&dir);
        cat.add(&sample_schema()).unwrap();
        assert!(matches!(
            cat.add(&sample_schema()),
            Err(DbError::AlreadyExists(_))
        ));
        assert_eq!(cat.list().unwrap().len(), 1);
    }

    #[test]
    fn remove_deletes_only_the_matching_line() {
        let dir = TempDir::new().unwrap();
        let cat = catalog(&dir);
        cat.add(&sample_schema()).unwrap();
        let mut other = sample_schema();
        other.name = "u".to_string();
        cat.add(&other).unwrap();

        cat.remove("t").unwrap();
        assert!(!cat.exists("t").unwrap());
        assert!(cat.exists("u").unwrap());
    }

    #[test]
    fn remove_missing_fails_not_found() {
        let dir = TempDir::new().unwrap();
        let cat = catalog(&dir);
        cat.add(&sample_schema()).unwrap();
        assert!(matches!(cat.remove("nope"), Err(DbError::NotFound(_))));
    }

    #[test]
    fn two_primary_keys_are_rejected() {
        let dir = TempDir::new().unwrap();
        let cat = catalog(&dir);
        let mut schema = sample_schema();
        schema.columns[0].primary_key = true;
        schema.columns[1] = Column {
            name: "b".to_string(),
            ty: ColumnType::Int,
            primary_key: true,
        };
        assert!(matches!(cat.add(&schema), Err(DbError::DuplicatePrimaryKey)));
    }

    #[test]
    fn varchar_primary_key_is_rejected() {
        let dir = TempDir::new().unwrap();
        let cat = catalog(&dir);
        let mut schema = sample_schema();
        schema.columns[1].primary_key = true;
        assert!(matches!(cat.add(&schema), Err(DbError::PrimaryKeyOnText)));
    }

    #[test]
    fn print_schema_tabs_short_names_twice() {
        let dir = TempDir::new().unwrap();
        let cat = catalog(&dir);
        let mut schema = sample_schema();
        schema.columns.push(Column {
            name: "longername".to_string(),
            ty: ColumnType::Varchar(3),
            primary_key: false,
        });
        cat.add(&schema).unwrap();
        assert_eq!(
            cat.print_schema("t").unwrap(),
            "id\t\tINT\nname\t\tVARCHAR(5)\nlongername\tVARCHAR(3)"
        );
    }
}
