use chrono::{Datelike, NaiveDate};
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::ledger::NewReservation;
use crate::limits::{MAX_YEAR, MIN_YEAR};
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertRoom {
        id: RoomId,
        kind: RoomKind,
        price: u32,
    },
    UpdateRoom {
        id: RoomId,
        kind: RoomKind,
        price: u32,
    },
    InsertReservations {
        rows: Vec<NewReservation>,
    },
    DeleteReservation {
        id: Ulid,
    },
    SelectRooms,
    SelectReservations {
        room_id: Option<RoomId>,
    },
    SelectAvailability {
        from: NaiveDate,
        to: NaiveDate,
        room_id: Option<RoomId>,
    },
    /// Dry run of a booking: the occupied days it would collide with.
    SelectConflicts {
        room_id: RoomId,
        from: NaiveDate,
        to: NaiveDate,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let all_rows = extract_all_insert_rows(insert)?;

    match table.as_str() {
        "rooms" => {
            let [values] = all_rows.as_slice() else {
                return Err(SqlError::Unsupported(format!(
                    "INSERT INTO rooms takes one row, got {}",
                    all_rows.len()
                )));
            };
            if values.len() != 3 {
                return Err(SqlError::WrongArity("rooms", 3, values.len()));
            }
            Ok(Command::InsertRoom {
                id: parse_u32(&values[0])?,
                kind: parse_kind(&values[1])?,
                price: parse_u32(&values[2])?,
            })
        }
        "reservations" => {
            let mut rows = Vec::with_capacity(all_rows.len());
            for (i, row) in all_rows.iter().enumerate() {
                let r = parse_reservation_row(row)
                    .map_err(|e| SqlError::Parse(format!("row {i}: {e}")))?;
                rows.push(r);
            }
            Ok(Command::InsertReservations { rows })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// `(id, room_id, from_date, to_date, holder, phone)`, or the same without
/// the leading id, in which case one is generated.
fn parse_reservation_row(row: &[Expr]) -> Result<NewReservation, SqlError> {
    let (id, rest) = match row.len() {
        6 => (parse_ulid_expr(&row[0])?, &row[1..]),
        5 => (Ulid::new(), row),
        n => return Err(SqlError::WrongArity("reservations", 6, n)),
    };
    Ok(NewReservation {
        id,
        room_id: parse_u32(&rest[0])?,
        from_date: parse_date_expr(&rest[1])?,
        to_date: parse_date_expr(&rest[2])?,
        holder: parse_string_expr(&rest[3])?,
        phone: parse_string_expr(&rest[4])?,
    })
}

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    if table != "rooms" {
        return Err(SqlError::UnknownTable(table));
    }

    let (mut kind, mut price) = (None, None);
    for a in assignments {
        let col = match &a.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name),
            AssignmentTarget::Tuple(_) => None,
        };
        match col.as_deref() {
            Some("kind") => kind = Some(parse_kind(&a.value)?),
            Some("price") => price = Some(parse_u32(&a.value)?),
            _ => return Err(SqlError::Unsupported(format!("SET {}", a.target))),
        }
    }

    let id = match selection {
        Some(Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        }) if expr_column_name(left).as_deref() == Some("id") => parse_u32(right)?,
        _ => return Err(SqlError::MissingFilter("id")),
    };

    Ok(Command::UpdateRoom {
        id,
        kind: kind.ok_or(SqlError::MissingFilter("kind"))?,
        price: price.ok_or(SqlError::MissingFilter("price"))?,
    })
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    match table.as_str() {
        "reservations" => Ok(Command::DeleteReservation {
            id: extract_where_id(&delete.selection)?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

#[derive(Default)]
struct Filters {
    room_id: Option<RoomId>,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    let mut f = Filters::default();
    if let Some(selection) = &select.selection {
        extract_filters(selection, &mut f)?;
    }

    match table.as_str() {
        "rooms" => Ok(Command::SelectRooms),
        "reservations" => Ok(Command::SelectReservations { room_id: f.room_id }),
        "availability" => Ok(Command::SelectAvailability {
            from: f.from.ok_or(SqlError::MissingFilter("from_date"))?,
            to: f.to.ok_or(SqlError::MissingFilter("to_date"))?,
            room_id: f.room_id,
        }),
        "conflicts" => Ok(Command::SelectConflicts {
            room_id: f.room_id.ok_or(SqlError::MissingFilter("room_id"))?,
            from: f.from.ok_or(SqlError::MissingFilter("from_date"))?,
            to: f.to.ok_or(SqlError::MissingFilter("to_date"))?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn extract_filters(expr: &Expr, f: &mut Filters) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => extract_filters(inner, f)?,
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                extract_filters(left, f)?;
                extract_filters(right, f)?;
            }
            ast::BinaryOperator::Eq => {
                if expr_column_name(left).as_deref() == Some("room_id") {
                    f.room_id = Some(parse_u32(right)?);
                }
            }
            ast::BinaryOperator::GtEq => {
                if expr_column_name(left).as_deref() == Some("from_date") {
                    f.from = Some(parse_date_expr(right)?);
                }
            }
            ast::BinaryOperator::LtEq => {
                if expr_column_name(left).as_deref() == Some("to_date") {
                    f.to = Some(parse_date_expr(right)?);
                }
            }
            _ => {}
        },
        _ => {}
    }
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────

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

fn extract_all_insert_rows(insert: &ast::Insert) -> Result<Vec<Vec<Expr>>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows.clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some("id") => parse_ulid_expr(right),
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

fn parse_string_expr(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_string_expr(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
}

fn parse_kind(expr: &Expr) -> Result<RoomKind, SqlError> {
    parse_string_expr(expr)?.parse().map_err(SqlError::Parse)
}

/// `'YYYY-MM-DD'`, within the supported year range.
fn parse_date_expr(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string_expr(expr)?;
    let day = parse_day(&s).ok_or_else(|| SqlError::Parse(format!("bad date: {s}")))?;
    if !(MIN_YEAR..=MAX_YEAR).contains(&day.year()) {
        return Err(SqlError::Parse(format!("date out of range: {s}")));
    }
    Ok(day)
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad integer: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";

    fn d(s: &str) -> NaiveDate {
        parse_day(s).unwrap()
    }

    /// One command of every kind, for tests that enumerate them.
    pub(crate) fn one_of_each() -> Vec<Command> {
        vec![
            Command::InsertRoom { id: 1, kind: RoomKind::Single, price: 1 },
            Command::UpdateRoom { id: 1, kind: RoomKind::Single, price: 1 },
            Command::InsertReservations { rows: vec![] },
            Command::DeleteReservation { id: Ulid::nil() },
            Command::SelectRooms,
            Command::SelectReservations { room_id: None },
            Command::SelectAvailability {
                from: d("2024-01-01"),
                to: d("2024-01-01"),
                room_id: None,
            },
            Command::SelectConflicts {
                room_id: 1,
                from: d("2024-01-01"),
                to: d("2024-01-01"),
            },
        ]
    }

    #[test]
    fn parse_insert_room() {
        let cmd = parse_sql("INSERT INTO rooms (id, kind, price) VALUES (101, 'vip', 450)").unwrap();
        assert_eq!(
            cmd,
            Command::InsertRoom { id: 101, kind: RoomKind::Vip, price: 450 }
        );
    }

    #[test]
    fn parse_insert_room_bad_kind() {
        let err = parse_sql("INSERT INTO rooms (id, kind, price) VALUES (1, 'suite', 10)").unwrap_err();
        assert!(err.to_string().contains("unknown room kind"));
    }

    #[test]
    fn parse_insert_room_rejects_several_rows() {
        let err = parse_sql(
            "INSERT INTO rooms (id, kind, price) VALUES (1, 'double', 100), (2, 'single', 80)",
        )
        .unwrap_err();
        assert!(matches!(err, SqlError::Unsupported(_)), "{err}");
    }

    #[test]
    fn parse_insert_room_exact_arity() {
        let err = parse_sql("INSERT INTO rooms VALUES (1, 'double', 100, 'sea view')").unwrap_err();
        assert!(matches!(err, SqlError::WrongArity("rooms", 3, 4)));
        let err = parse_sql("INSERT INTO rooms (id, kind) VALUES (1, 'double')").unwrap_err();
        assert!(matches!(err, SqlError::WrongArity("rooms", 3, 2)));
    }

    #[test]
    fn parse_insert_room_negative_price() {
        assert!(parse_sql("INSERT INTO rooms (id, kind, price) VALUES (1, 'single', -5)").is_err());
    }

    #[test]
    fn parse_update_room() {
        let cmd = parse_sql("UPDATE rooms SET kind = 'triple', price = 180 WHERE id = 7").unwrap();
        assert_eq!(
            cmd,
            Command::UpdateRoom { id: 7, kind: RoomKind::Triple, price: 180 }
        );
    }

    #[test]
    fn parse_update_room_needs_id() {
        let err = parse_sql("UPDATE rooms SET kind = 'triple', price = 180").unwrap_err();
        assert!(matches!(err, SqlError::MissingFilter("id")));
    }

    #[test]
    fn parse_insert_reservation_with_id() {
        let sql = format!(
            "INSERT INTO reservations (id, room_id, from_date, to_date, holder, phone) \
             VALUES ('{ID}', 1, '2024-04-01', '2024-04-05', 'Ana Lima', '+3519123')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertReservations { rows } => {
                assert_eq!(rows.len(), 1);
                let r = &rows[0];
                assert_eq!(r.id.to_string(), ID);
                assert_eq!(r.room_id, 1);
                assert_eq!(r.from_date, d("2024-04-01"));
                assert_eq!(r.to_date, d("2024-04-05"));
                assert_eq!(r.holder, "Ana Lima");
                assert_eq!(r.phone, "+3519123");
            }
            cmd => panic!("expected InsertReservations, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_reservations_batch_generates_ids() {
        let sql = "INSERT INTO reservations (room_id, from_date, to_date, holder, phone) VALUES \
                   (1, '2024-04-01', '2024-04-02', 'A', '1'), \
                   (2, '2024-04-03', '2024-04-04', 'B', '2')";
        match parse_sql(sql).unwrap() {
            Command::InsertReservations { rows } => {
                assert_eq!(rows.len(), 2);
                assert_ne!(rows[0].id, rows[1].id);
                assert_eq!(rows[1].room_id, 2);
            }
            cmd => panic!("expected InsertReservations, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_reservation_wrong_arity() {
        let sql = "INSERT INTO reservations (room_id, from_date) VALUES (1, '2024-04-01')";
        assert!(parse_sql(sql).is_err());
    }

    #[test]
    fn parse_insert_reservation_bad_date() {
        let sql = "INSERT INTO reservations (room_id, from_date, to_date, holder, phone) \
                   VALUES (1, '2024-02-30', '2024-03-02', 'A', '1')";
        let err = parse_sql(sql).unwrap_err();
        assert!(err.to_string().contains("bad date"));
    }

    #[test]
    fn parse_date_out_of_range() {
        let sql = "SELECT * FROM availability WHERE from_date >= '1900-01-01' AND to_date <= '1900-01-05'";
        let err = parse_sql(sql).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn parse_delete_reservation() {
        let cmd = parse_sql(&format!("DELETE FROM reservations WHERE id = '{ID}'")).unwrap();
        match cmd {
            Command::DeleteReservation { id } => assert_eq!(id.to_string(), ID),
            _ => panic!("expected DeleteReservation, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_delete_rooms_unsupported() {
        let err = parse_sql("DELETE FROM rooms WHERE id = '1'").unwrap_err();
        assert!(matches!(err, SqlError::UnknownTable(_)));
    }

    #[test]
    fn parse_select_rooms_and_reservations() {
        assert_eq!(parse_sql("SELECT * FROM rooms").unwrap(), Command::SelectRooms);
        assert_eq!(
            parse_sql("SELECT * FROM reservations").unwrap(),
            Command::SelectReservations { room_id: None }
        );
        assert_eq!(
            parse_sql("SELECT * FROM reservations WHERE room_id = 3").unwrap(),
            Command::SelectReservations { room_id: Some(3) }
        );
    }

    #[test]
    fn parse_select_availability() {
        let sql = "SELECT * FROM availability WHERE from_date >= '2024-03-01' AND to_date <= '2024-03-15'";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectAvailability {
                from: d("2024-03-01"),
                to: d("2024-03-15"),
                room_id: None,
            }
        );
    }

    #[test]
    fn parse_select_availability_for_room() {
        let sql = "SELECT * FROM availability WHERE room_id = 2 AND (from_date >= '2024-03-01' AND to_date <= '2024-03-15')";
        match parse_sql(sql).unwrap() {
            Command::SelectAvailability { room_id, .. } => assert_eq!(room_id, Some(2)),
            cmd => panic!("expected SelectAvailability, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_availability_missing_bound() {
        let err = parse_sql("SELECT * FROM availability WHERE from_date >= '2024-03-01'").unwrap_err();
        assert!(matches!(err, SqlError::MissingFilter("to_date")));
    }

    #[test]
    fn parse_select_conflicts() {
        let sql = "SELECT * FROM conflicts WHERE room_id = 1 AND from_date >= '2024-04-01' AND to_date <= '2024-04-05'";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectConflicts {
                room_id: 1,
                from: d("2024-04-01"),
                to: d("2024-04-05"),
            }
        );
    }

    #[test]
    fn parse_select_conflicts_needs_room() {
        let sql = "SELECT * FROM conflicts WHERE from_date >= '2024-04-01' AND to_date <= '2024-04-05'";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("room_id"))));
    }

    #[test]
    fn parse_unknown_table_errors() {
        assert!(parse_sql("SELECT * FROM guests").is_err());
        assert!(parse_sql("INSERT INTO guests (id) VALUES (1)").is_err());
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
