//! Statement text to [`Request`] translation.
//!
//! The commands `TABLES`, `SCHEMA <t>` and `QUIT` predate the SQL surface
//! and are matched before parsing; everything else goes through `sqlparser`
//! with the generic dialect and is mapped onto the small subset the engine
//! executes. Unsupported constructs fail with an `error: ...` line that the
//! server sends back verbatim.

use sqlparser::ast::{self, CharacterLength, ColumnOption, DataType, ObjectType, SetExpr, Statement};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

use crate::engine::{Column, ColumnType, Request};

/// Parses one `;`-terminated statement into a request.
///
/// The error string is the exact line to send to the client.
pub fn parse(statement: &str) -> Result<Request, String> {
    let text = statement.trim().trim_end_matches(';').trim();

    if text.eq_ignore_ascii_case("quit") {
        return Ok(Request::Quit);
    }
    if text.eq_ignore_ascii_case("tables") {
        return Ok(Request::Tables);
    }
    if let Some(rest) = strip_keyword(text, "schema") {
        return Ok(Request::Schema {
            table: rest.trim().to_string(),
        });
    }

    let dialect = GenericDialect {};
    let mut statements = Parser::parse_sql(&dialect, text)
        .map_err(|e| reject(&format!("could not parse statement: {e}")))?;
    if statements.len() != 1 {
        return Err(reject("expected exactly one statement"));
    }

    match statements.remove(0) {
        Statement::CreateTable { name, columns, .. } => parse_create(name, columns),
        Statement::Insert {
            table_name,
            columns,
            source,
            ..
        } => parse_insert(table_name, columns, source),
        Statement::Query(query) => parse_select(*query),
        Statement::Drop {
            object_type, names, ..
        } => parse_drop(object_type, names),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        other => Err(reject(&format!("unsupported statement: {other}"))),
    }
}

/// Matches a leading case-insensitive keyword followed by whitespace.
///
/// The keyword boundary may fall inside a multi-byte character of
/// client-supplied text, so the check stays on bytes and only slices after
/// confirming a char boundary.
fn strip_keyword<'a>(text: &'a str, keyword: &str) -> Option<&'a str> {
    if text.len() > keyword.len()
        && text.is_char_boundary(keyword.len())
        && text[..keyword.len()].eq_ignore_ascii_case(keyword)
        && text.as_bytes()[keyword.len()].is_ascii_whitespace()
    {
        Some(&text[keyword.len()..])
    } else {
        None
    }
}

fn reject(message: &str) -> String {
    format!("error: {message}\n")
}

fn table_name(name: &ast::ObjectName) -> Result<String, String> {
    name.0
        .last()
        .map(|ident| ident.value.clone())
        .ok_or_else(|| reject("missing table name"))
}

fn parse_create(
    name: ast::ObjectName,
    column_defs: Vec<ast::ColumnDef>,
) -> Result<Request, String> {
    let table = table_name(&name)?;
    let mut columns = Vec::with_capacity(column_defs.len());
    for def in column_defs {
        let ast::ColumnDef {
            name,
            data_type,
            options,
            ..
        } = def;
        let ty = match data_type {
            DataType::Int(_) | DataType::Integer(_) => ColumnType::Int,
            DataType::Varchar(Some(CharacterLength::IntegerLength { length, .. }))
            | DataType::CharacterVarying(Some(CharacterLength::IntegerLength {
                length, ..
            })) => ColumnType::Varchar(length as usize),
            other => {
                return Err(reject(&format!(
                    "unsupported column type '{other}' for column '{name}'"
                )))
            }
        };
        let primary_key = options.iter().any(|opt| {
            matches!(
                opt.option,
                ColumnOption::Unique {
                    is_primary: true,
                    ..
                }
            )
        });
        columns.push(Column {
            name: name.value,
            ty,
            primary_key,
        });
    }
    if columns.is_empty() {
        return Err(reject("a table needs at least one column"));
    }
    Ok(Request::Create { table, columns })
}

fn parse_insert(
    name: ast::ObjectName,
    columns: Vec<ast::Ident>,
    source: Option<Box<ast::Query>>,
) -> Result<Request, String> {
    let table = table_name(&name)?;
    if !columns.is_empty() {
        return Err(reject("INSERT with a column list is not supported"));
    }
    let source = source.ok_or_else(|| reject("INSERT needs a VALUES clause"))?;
    let rows = match *source.body {
        SetExpr::Values(values) => values.rows,
        _ => return Err(reject("INSERT supports VALUES only")),
    };
    if rows.len() != 1 {
        return Err(reject("INSERT takes exactly one row of values"));
    }
    let values = rows
        .into_iter()
        .next()
        .unwrap_or_default()
        .into_iter()
        .map(|expr| literal(&expr))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Request::Insert { table, values })
}

/// Renders a literal expression back to its source form: numbers bare,
/// strings re-quoted so the codec can tell the two apart.
fn literal(expr: &ast::Expr) -> Result<String, String> {
    match expr {
        ast::Expr::Value(ast::Value::Number(n, _)) => Ok(n.clone()),
        ast::Expr::Value(ast::Value::SingleQuotedString(s)) => Ok(format!("'{s}'")),
        ast::Expr::UnaryOp {
            op: ast::UnaryOperator::Minus,
            expr,
        } => match expr.as_ref() {
            ast::Expr::Value(ast::Value::Number(n, _)) => Ok(format!("-{n}")),
            other => Err(reject(&format!("unsupported literal: -{other}"))),
        },
        other => Err(reject(&format!("unsupported literal: {other}"))),
    }
}

fn parse_select(query: ast::Query) -> Result<Request, String> {
    let select = match *query.body {
        SetExpr::Select(select) => select,
        _ => return Err(reject("only plain SELECT is supported")),
    };
    if select.selection.is_some() {
        return Err(reject("SELECT does not support WHERE"));
    }
    let all_wildcard = select
        .projection
        .iter()
        .all(|item| matches!(item, ast::SelectItem::Wildcard(_)));
    if !all_wildcard || select.projection.is_empty() {
        return Err(reject("only SELECT * is supported"));
    }
    if select.from.len() != 1 {
        return Err(reject("SELECT reads exactly one table"));
    }
    let table = match &select.from[0].relation {
        ast::TableFactor::Table { name, .. } => table_name(name)?,
        _ => return Err(reject("SELECT reads a plain table")),
    };
    Ok(Request::Select { table })
}

fn parse_drop(object_type: ObjectType, names: Vec<ast::ObjectName>) -> Result<Request, String> {
    if object_type != ObjectType::Table {
        return Err(reject("only DROP TABLE is supported"));
    }
    if names.len() != 1 {
        return Err(reject("DROP takes exactly one table"));
    }
    Ok(Request::Drop {
        table: table_name(&names[0])?,
    })
}

fn parse_update(
    table: ast::TableWithJoins,
    assignments: Vec<ast::Assignment>,
    selection: Option<ast::Expr>,
) -> Result<Request, String> {
    let table = match &table.relation {
        ast::TableFactor::Table { name, .. } => table_name(name)?,
        _ => return Err(reject("UPDATE writes a plain table")),
    };

    let mut set = Vec::with_capacity(assignments.len());
    for assignment in assignments {
        let column = match assignment.id.as_slice() {
            [ident] => ident.value.clone(),
            _ => return Err(reject("SET targets a plain column name")),
        };
        set.push((column, literal(&assignment.value)?));
    }
    if set.is_empty() {
        return Err(reject("UPDATE needs at least one SET assignment"));
    }

    let selection =
        selection.ok_or_else(|| reject("UPDATE needs WHERE <key column> = <value>"))?;
    let (key_column, key) = match selection {
        ast::Expr::BinaryOp { left, op, right } if op == ast::BinaryOperator::Eq => {
            let column = match *left {
                ast::Expr::Identifier(ident) => ident.value,
                other => return Err(reject(&format!("unsupported WHERE column: {other}"))),
            };
            let key = literal(&right)?
                .parse::<i64>()
                .map_err(|_| reject("WHERE compares the key against an integer"))?;
            (column, key)
        }
        other => return Err(reject(&format!("unsupported WHERE clause: {other}"))),
    };

    Ok(Request::Update {
        table,
        assignments: set,
        key_column,
        key,
    })
}
