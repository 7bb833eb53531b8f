//! Fixed-width row codec.
//!
//! Every row is the concatenation of its fields in schema order plus one
//! newline byte. INT fields are ten ASCII digits left-padded with `0`
//! (negative values keep the sign inside the ten bytes); VARCHAR fields are
//! exactly the declared width, left-padded with `0`. Decoding strips the
//! leading pad bytes but never consumes the final byte of a field, so a
//! one-character value survives even when it is `0` itself. Values that
//! legitimately *start* with `0` lose that prefix on decode; the format has
//! no way to tell padding from data and this codec keeps that behavior
//! rather than breaking existing files.

use crate::engine::catalog::{Column, ColumnType, TableSchema};
use crate::engine::error::{DbError, Result};

/// Padding byte shared by every field type.
pub const PAD: u8 = b'0';

/// Strips one pair of surrounding single quotes, if present.
pub fn strip_quotes(value: &str) -> &str {
    value
        .strip_prefix('\'')
        .and_then(|v| v.strip_suffix('\''))
        .unwrap_or(value)
}

/// Encodes one literal into a column's fixed-width field.
///
/// INT columns reject quoted literals and anything that does not parse as a
/// signed 64-bit integer. VARCHAR columns accept quoted or bare text; the
/// length check applies after quote stripping.
pub fn encode_value(column: &Column, value: &str) -> Result<Vec<u8>> {
    match column.ty {
        ColumnType::Int => {
            if value.starts_with('\'') {
                return Err(DbError::TypeMismatch {
                    column: column.name.clone(),
                    value: value.to_string(),
                });
            }
            let n: i64 = value.parse().map_err(|_| DbError::TypeMismatch {
                column: column.name.clone(),
                value: value.to_string(),
            })?;
            let field = format!("{n:0width$}", width = column.width());
            if field.len() > column.width() {
                return Err(DbError::ValueTooLarge {
                    column: column.name.clone(),
                    value: value.to_string(),
                });
            }
            Ok(field.into_bytes())
        }
        ColumnType::Varchar(width) => {
            let text = strip_quotes(value);
            if text.len() > width {
                return Err(DbError::ValueTooLarge {
                    column: column.name.clone(),
                    value: text.to_string(),
                });
            }
            let mut field = vec![PAD; width - text.len()];
            field.extend_from_slice(text.as_bytes());
            Ok(field)
        }
    }
}

/// Encodes a full row, newline terminator included.
///
/// `values` must cover the schema's columns in order, one literal each.
pub fn encode_row(schema: &TableSchema, values: &[String]) -> Result<Vec<u8>> {
    if values.len() != schema.columns.len() {
        return Err(DbError::ArityMismatch {
            expected: schema.columns.len(),
            got: values.len(),
        });
    }
    let mut row = Vec::with_capacity(schema.row_width());
    for (column, value) in schema.columns.iter().zip(values) {
        row.extend_from_slice(&encode_value(column, value)?);
    }
    row.push(b'\n');
    Ok(row)
}

/// Decodes one field by skipping its leading pad bytes.
///
/// Stops before the field's last byte so an all-pad field decodes as `"0"`
/// rather than the empty string.
pub fn decode_field(field: &[u8]) -> String {
    let mut start = 0;
    while start < field.len().saturating_sub(1) && field[start] == PAD {
        start += 1;
    }
    String::from_utf8_lossy(&field[start..]).into_owned()
}

/// Decodes an encoded row (with or without its trailing newline) into one
/// string per column.
pub fn decode_row(schema: &TableSchema, row: &[u8]) -> Vec<String> {
    let mut values = Vec::with_capacity(schema.columns.len());
    let mut offset = 0;
    for column in &schema.columns {
        let field = &row[offset..offset + column.width()];
        values.push(decode_field(field));
        offset += column.width();
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::catalog::{Column, ColumnType, TableSchema};

    fn schema() -> TableSchema {
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

    #[test]
    fn encodes_the_documented_example_row() {
        let row = encode_row(&schema(), &["7".to_string(), "'ab'".to_string()]).unwrap();
        assert_eq!(row, b"0000000007000ab\n".to_vec());
        assert_eq!(row.len(), 16);
    }

    #[test]
    fn row_round_trips() {
        let row = encode_row(&schema(), &["42".to_string(), "'hi'".to_string()]).unwrap();
        assert_eq!(
            decode_row(&schema(), &row),
            vec!["42".to_string(), "hi".to_string()]
        );
    }

    #[test]
    fn leading_zero_text_loses_its_prefix() {
        // Padding and data are indistinguishable; '0ab' comes back as "ab".
        let row = encode_row(&schema(), &["1".to_string(), "'0ab'".to_string()]).unwrap();
        assert_eq!(decode_row(&schema(), &row)[1], "ab");
    }

    #[test]
    fn zero_survives_decoding() {
        let row = encode_row(&schema(), &["0".to_string(), "'0'".to_string()]).unwrap();
        let values = decode_row(&schema(), &row);
        assert_eq!(values, vec!["0".to_string(), "0".to_string()]);
    }

    #[test]
    fn negative_int_keeps_its_sign_in_ten_bytes() {
        let col = &schema().columns[0].clone();
        assert_eq!(encode_value(col, "-7").unwrap(), b"-000000007".to_vec());
        assert_eq!(decode_field(b"-000000007"), "-000000007");
    }

    #[test]
    fn quoted_literal_is_not_an_int() {
        let col = schema().columns[0].clone();
        assert!(matches!(
            encode_value(&col, "'7'"),
            Err(DbError::TypeMismatch { .. })
        ));
        assert!(matches!(
            encode_value(&col, "seven"),
            Err(DbError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn oversized_values_are_rejected() {
        let int_col = schema().columns[0].clone();
        assert!(matches!(
            encode_value(&int_col, "12345678901"),
            Err(DbError::ValueTooLarge { .. })
        ));

        let text_col = schema().columns[1].clone();
        assert!(matches!(
            encode_value(&text_col, "'toolong'"),
            Err(DbError::ValueTooLarge { .. })
        ));
    }

    #[test]
    fn wrong_value_count_is_rejected() {
        assert!(matches!(
            encode_row(&schema(), &["1".to_string()]),
            Err(DbError::ArityMismatch { .. })
        ));
    }
}
