use chrono::{DateTime, NaiveDate};
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SelectItem, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    SelectRooms,
    SelectBookings { id: Option<BookingId> },
    InsertBooking { request: BookingRequest },
    CancelBooking { id: BookingId },
    SelectRoomUsage { from: NaiveDate, to: NaiveDate },
}

/// Column order assumed by an INSERT without a column list.
const BOOKING_COLUMNS: [&str; 4] = ["room_id", "user_name", "start_time", "end_time"];

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    if table != "bookings" {
        return Err(SqlError::UnknownTable(table));
    }
    let values = extract_insert_values(insert)?;

    let columns: Vec<String> = if insert.columns.is_empty() {
        BOOKING_COLUMNS.iter().map(|c| c.to_string()).collect()
    } else {
        insert.columns.iter().map(|c| canonical_column(&c.value)).collect()
    };
    if columns.len() != values.len() {
        return Err(SqlError::WrongArity("bookings", columns.len(), values.len()));
    }

    let (mut room_id, mut user_name, mut start, mut end) = (None, None, None, None);
    for (col, expr) in columns.iter().zip(&values) {
        match col.as_str() {
            "room_id" => room_id = Some(parse_text(expr)?),
            "user_name" => user_name = Some(parse_text(expr)?),
            "start_time" => start = Some(parse_timestamp(expr)?),
            "end_time" => end = Some(parse_timestamp(expr)?),
            other => return Err(SqlError::UnknownColumn(other.to_string())),
        }
    }

    Ok(Command::InsertBooking {
        request: BookingRequest {
            room_id: room_id.ok_or(SqlError::MissingColumn("room_id"))?,
            user_name: user_name.ok_or(SqlError::MissingColumn("user_name"))?,
            start: start.ok_or(SqlError::MissingColumn("start_time"))?,
            end: end.ok_or(SqlError::MissingColumn("end_time"))?,
        },
    })
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    if table != "bookings" {
        return Err(SqlError::UnknownTable(table));
    }
    let id = extract_where_id(&delete.selection)?;
    Ok(Command::CancelBooking { id })
}

/// `UPDATE bookings SET status = 'CANCELLED' WHERE id = ...` is the only
/// update accepted.
fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let name = table_factor_name(&table.relation)?;
    if name != "bookings" {
        return Err(SqlError::UnknownTable(name));
    }
    let [assignment] = assignments else {
        return Err(SqlError::Unsupported("UPDATE must set status only".into()));
    };
    let target = match &assignment.target {
        AssignmentTarget::ColumnName(name) => object_name_last(name),
        _ => None,
    };
    if target.as_deref() != Some("status") {
        return Err(SqlError::Unsupported("UPDATE must set status only".into()));
    }
    let status: BookingStatus = parse_text(&assignment.value)?
        .parse()
        .map_err(SqlError::Parse)?;
    if status != BookingStatus::Cancelled {
        return Err(SqlError::Unsupported(format!("cannot set status to {status}")));
    }
    let id = extract_where_id(selection)?;
    Ok(Command::CancelBooking { id })
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    if !select
        .projection
        .iter()
        .all(|item| matches!(item, SelectItem::Wildcard(_)))
    {
        return Err(SqlError::Unsupported("only SELECT * is supported".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    match table.as_str() {
        "rooms" => Ok(Command::SelectRooms),
        "bookings" => {
            let id = match &select.selection {
                Some(_) => Some(extract_where_id(&select.selection)?),
                None => None,
            };
            Ok(Command::SelectBookings { id })
        }
        "room_usage" => {
            let (mut from, mut to) = (None, None);
            let selection = select
                .selection
                .as_ref()
                .ok_or(SqlError::MissingFilter("day"))?;
            extract_day_filters(selection, &mut from, &mut to)?;
            Ok(Command::SelectRoomUsage {
                from: from.ok_or(SqlError::MissingFilter("day >="))?,
                to: to.ok_or(SqlError::MissingFilter("day <="))?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn extract_day_filters(
    expr: &Expr,
    from: &mut Option<NaiveDate>,
    to: &mut Option<NaiveDate>,
) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => extract_day_filters(inner, from, to)?,
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                extract_day_filters(left, from, to)?;
                extract_day_filters(right, from, to)?;
            }
            ast::BinaryOperator::GtEq if is_day(left) => *from = Some(parse_date(right)?),
            ast::BinaryOperator::LtEq if is_day(left) => *to = Some(parse_date(right)?),
            ast::BinaryOperator::Eq if is_day(left) => {
                let day = parse_date(right)?;
                *from = Some(day);
                *to = Some(day);
            }
            _ => return Err(SqlError::Unsupported(format!("filter {expr}"))),
        },
        Expr::Between {
            expr: col,
            negated: false,
            low,
            high,
        } if is_day(col) => {
            *from = Some(parse_date(low)?);
            *to = Some(parse_date(high)?);
        }
        _ => return Err(SqlError::Unsupported(format!("filter {expr}"))),
    }
    Ok(())
}

fn is_day(expr: &Expr) -> bool {
    expr_column_name(expr).as_deref() == Some("day")
}

// ── Helpers ───────────────────────────────────────────────────

/// Accept a few spellings of each booking column.
fn canonical_column(name: &str) -> String {
    let lower = name.to_lowercase();
    match lower.as_str() {
        "roomid" | "room" => "room_id".into(),
        "username" | "user" | "requester" => "user_name".into(),
        "starttime" | "start" => "start_time".into(),
        "endtime" | "end" => "end_time".into(),
        _ => lower,
    }
}

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.clone()),
            _ => Err(SqlError::Unsupported("one booking per INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::Nested(inner) => extract_where_id(&Some((**inner).clone())),
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            if expr_column_name(left).as_deref() == Some("id") {
                parse_ulid_expr(right)
            } else {
                Err(SqlError::MissingFilter("id"))
            }
        }
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    let text = parse_text(expr)?;
    Ulid::from_string(text.trim()).map_err(|e| SqlError::Parse(format!("bad booking id {text:?}: {e}")))
}

/// A quoted string or a bare number, as text.
fn parse_text(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => Ok(s.clone()),
        Some(Value::Null) => Err(SqlError::Parse("unexpected NULL".into())),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

/// RFC 3339 text with an offset, or integer Unix milliseconds.
fn parse_timestamp(expr: &Expr) -> Result<Ms, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr: inner,
    } = expr
    {
        return parse_timestamp(inner)?
            .checked_neg()
            .ok_or_else(|| SqlError::BadTimestamp(format!("{expr} is out of range")));
    }
    let text = parse_text(expr)?;
    let text = text.trim();
    if let Ok(ms) = text.parse::<i64>() {
        return Ok(ms);
    }
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.timestamp_millis())
        .map_err(|e| SqlError::BadTimestamp(format!("{text:?}: {e}")))
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let text = parse_text(expr)?;
    NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d")
        .map_err(|e| SqlError::BadTimestamp(format!("{text:?}: {e}")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
    WrongArity(&'static str, usize, usize),
    MissingColumn(&'static str),
    MissingFilter(&'static str),
    BadTimestamp(String),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(c) => write!(f, "unknown column: {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingColumn(col) => write!(f, "missing column: {col}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
            SqlError::BadTimestamp(s) => write!(f, "invalid timestamp: {s}"),
        }
    }
}

impl std::error::Error for SqlError {}
