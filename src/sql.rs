use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    InsertBooking {
        spot_id: String,
        start: Ms,
        end: Ms,
        user_id: Option<String>,
    },
    DeleteBooking {
        id: BookingId,
    },
    SelectLots {
        start: Ms,
        end: Ms,
    },
    SelectArrival {
        spot_id: String,
        arrival: Ms,
        user_id: String,
    },
    SelectSpotStatus {
        spot_id: String,
        at: Ms,
    },
    SelectBookings {
        spot_id: Option<String>,
    },
    SelectHealth,
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };
    if stmts.len() > 1 {
        return Err(SqlError::Unsupported("multiple statements".into()));
    }

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Values are positional: `(spot_id, start, "end" [, user_id])`.
fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    if table != "bookings" {
        return Err(SqlError::UnknownTable(table));
    }

    let rows = extract_insert_rows(insert)?;
    if rows.len() > 1 {
        return Err(SqlError::Unsupported("multi-row INSERT into bookings".into()));
    }
    let values = &rows[0];
    if values.len() < 3 || values.len() > 4 {
        return Err(SqlError::WrongArity("bookings", 4, values.len()));
    }

    Ok(Command::InsertBooking {
        spot_id: parse_string(&values[0])?,
        start: parse_i64(&values[1])?,
        end: parse_i64(&values[2])?,
        user_id: match values.get(3) {
            Some(expr) => parse_string_or_null(expr)?,
            None => None,
        },
    })
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    if table != "bookings" {
        return Err(SqlError::UnknownTable(table));
    }
    let filters = Filters::collect(delete.selection.as_ref())?;
    let id = filters.eq("id").ok_or(SqlError::MissingFilter("id"))?;
    Ok(Command::DeleteBooking { id: parse_u64(id)? })
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
    let filters = Filters::collect(select.selection.as_ref())?;

    match table.as_str() {
        "lots" => {
            let start = filters
                .ge("start")
                .or_else(|| filters.eq("start"))
                .ok_or(SqlError::MissingFilter("start"))?;
            let end = filters
                .le("end")
                .or_else(|| filters.eq("end"))
                .ok_or(SqlError::MissingFilter("end"))?;
            Ok(Command::SelectLots {
                start: parse_i64(start)?,
                end: parse_i64(end)?,
            })
        }
        "arrivals" => Ok(Command::SelectArrival {
            spot_id: parse_string(filters.eq("spot_id").ok_or(SqlError::MissingFilter("spot_id"))?)?,
            arrival: parse_i64(filters.eq("arrival").ok_or(SqlError::MissingFilter("arrival"))?)?,
            user_id: parse_string(filters.eq("user_id").ok_or(SqlError::MissingFilter("user_id"))?)?,
        }),
        "spot_status" => Ok(Command::SelectSpotStatus {
            spot_id: parse_string(filters.eq("spot_id").ok_or(SqlError::MissingFilter("spot_id"))?)?,
            at: parse_i64(filters.eq("at_time").ok_or(SqlError::MissingFilter("at_time"))?)?,
        }),
        "bookings" => Ok(Command::SelectBookings {
            spot_id: filters.eq("spot_id").map(parse_string).transpose()?,
        }),
        "health" => Ok(Command::SelectHealth),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── WHERE clauses ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterOp {
    Eq,
    GtEq,
    LtEq,
}

/// `column op literal` terms of a conjunction. Later terms win.
#[derive(Debug, Default)]
struct Filters<'a> {
    terms: Vec<(String, FilterOp, &'a Expr)>,
}

impl<'a> Filters<'a> {
    fn collect(selection: Option<&'a Expr>) -> Result<Self, SqlError> {
        let mut filters = Filters::default();
        if let Some(expr) = selection {
            filters.walk(expr)?;
        }
        Ok(filters)
    }

    fn walk(&mut self, expr: &'a Expr) -> Result<(), SqlError> {
        match expr {
            Expr::Nested(inner) => self.walk(inner),
            Expr::BinaryOp { left, op, right } => {
                let op = match op {
                    ast::BinaryOperator::And => {
                        self.walk(left)?;
                        return self.walk(right);
                    }
                    ast::BinaryOperator::Eq => FilterOp::Eq,
                    ast::BinaryOperator::GtEq => FilterOp::GtEq,
                    ast::BinaryOperator::LtEq => FilterOp::LtEq,
                    other => return Err(SqlError::Unsupported(format!("operator {other}"))),
                };
                let col = expr_column_name(left)
                    .ok_or_else(|| SqlError::Parse(format!("expected column, got {left}")))?;
                self.terms.push((col, op, right.as_ref()));
                Ok(())
            }
            other => Err(SqlError::Unsupported(format!("filter {other}"))),
        }
    }

    fn find(&self, column: &str, op: FilterOp) -> Option<&'a Expr> {
        self.terms
            .iter()
            .rev()
            .find(|(c, o, _)| c == column && *o == op)
            .map(|(_, _, e)| *e)
    }

    fn eq(&self, column: &str) -> Option<&'a Expr> {
        self.find(column, FilterOp::Eq)
    }

    fn ge(&self, column: &str) -> Option<&'a Expr> {
        self.find(column, FilterOp::GtEq)
    }

    fn le(&self, column: &str) -> Option<&'a Expr> {
        self.find(column, FilterOp::LtEq)
    }
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

fn extract_insert_rows(insert: &ast::Insert) -> Result<&[Vec<Expr>], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(&values.rows)
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
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

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            // bound parameters arrive as quoted text
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .trim()
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad integer '{s}': {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        parse_i64(expr)?
            .checked_neg()
            .ok_or_else(|| SqlError::Parse("integer out of range".into()))
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

fn parse_u64(expr: &Expr) -> Result<u64, SqlError> {
    let v = parse_i64(expr)?;
    u64::try_from(v).map_err(|_| SqlError::Parse(format!("{v} is not a valid id")))
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_string(expr).map(Some),
    }
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
                write!(f, "{t}: expected up to {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_insert_booking() {
        let sql = r#"INSERT INTO bookings (spot_id, start, "end", user_id) VALUES ('Lot-A-01', 1000, 2000, 'alice')"#;
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::InsertBooking {
                spot_id: "Lot-A-01".into(),
                start: 1000,
                end: 2000,
                user_id: Some("alice".into()),
            }
        );
    }

    #[test]
    fn parse_insert_booking_without_user() {
        let sql = r#"INSERT INTO bookings (spot_id, start, "end") VALUES ('Lot-A-01', 1000, 2000)"#;
        match parse_sql(sql).unwrap() {
            Command::InsertBooking { user_id, .. } => assert_eq!(user_id, None),
            cmd => panic!("expected InsertBooking, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_booking_null_user() {
        let sql = "INSERT INTO bookings VALUES ('Lot-A-01', 1000, 2000, NULL)";
        match parse_sql(sql).unwrap() {
            Command::InsertBooking { user_id, .. } => assert_eq!(user_id, None),
            cmd => panic!("expected InsertBooking, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_booking_quoted_numbers() {
        // what the extended protocol produces after parameter substitution
        let sql = "INSERT INTO bookings VALUES ('Lot-B-07', '1000', '2000', 'bob')";
        match parse_sql(sql).unwrap() {
            Command::InsertBooking { start, end, .. } => {
                assert_eq!(start, 1000);
                assert_eq!(end, 2000);
            }
            cmd => panic!("expected InsertBooking, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_rejects_multi_row() {
        let sql = "INSERT INTO bookings VALUES ('Lot-A-01', 1, 2), ('Lot-A-02', 1, 2)";
        assert!(matches!(parse_sql(sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_insert_wrong_arity() {
        let sql = "INSERT INTO bookings VALUES ('Lot-A-01', 1000)";
        assert!(matches!(parse_sql(sql), Err(SqlError::WrongArity("bookings", 4, 2))));
    }

    #[test]
    fn parse_insert_spot_must_be_string() {
        let sql = "INSERT INTO bookings VALUES (17, 1000, 2000)";
        assert!(matches!(parse_sql(sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_delete_booking() {
        let sql = "DELETE FROM bookings WHERE id = 7";
        assert_eq!(parse_sql(sql).unwrap(), Command::DeleteBooking { id: 7 });
    }

    #[test]
    fn parse_delete_rejects_negative_id() {
        let sql = "DELETE FROM bookings WHERE id = -1";
        assert!(matches!(parse_sql(sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_delete_needs_id() {
        let sql = "DELETE FROM bookings WHERE spot_id = 'Lot-A-01'";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("id"))));
    }

    #[test]
    fn parse_select_lots() {
        let sql = r#"SELECT * FROM lots WHERE start >= 1000 AND "end" <= 2000"#;
        assert_eq!(parse_sql(sql).unwrap(), Command::SelectLots { start: 1000, end: 2000 });
    }

    #[test]
    fn parse_select_lots_missing_end() {
        let sql = "SELECT * FROM lots WHERE start >= 1000";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("end"))));
    }

    #[test]
    fn parse_select_arrival() {
        let sql = "SELECT * FROM arrivals WHERE spot_id = 'Lot-A-01' AND arrival = 1500 AND user_id = 'bob'";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectArrival {
                spot_id: "Lot-A-01".into(),
                arrival: 1500,
                user_id: "bob".into(),
            }
        );
    }

    #[test]
    fn parse_select_arrival_needs_user() {
        let sql = "SELECT * FROM arrivals WHERE spot_id = 'Lot-A-01' AND arrival = 1500";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("user_id"))));
    }

    #[test]
    fn parse_select_spot_status() {
        let sql = "SELECT * FROM spot_status WHERE (spot_id = 'Lot-C-02') AND at_time = 42";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectSpotStatus { spot_id: "Lot-C-02".into(), at: 42 }
        );
    }

    #[test]
    fn parse_select_bookings() {
        assert_eq!(
            parse_sql("SELECT * FROM bookings").unwrap(),
            Command::SelectBookings { spot_id: None }
        );
        assert_eq!(
            parse_sql("SELECT * FROM bookings WHERE spot_id = 'Lot-A-01'").unwrap(),
            Command::SelectBookings { spot_id: Some("Lot-A-01".into()) }
        );
    }

    #[test]
    fn parse_select_health() {
        assert_eq!(parse_sql("SELECT * FROM health").unwrap(), Command::SelectHealth);
    }

    #[test]
    fn parse_rejects_or() {
        let sql = "SELECT * FROM bookings WHERE spot_id = 'a' OR spot_id = 'b'";
        assert!(matches!(parse_sql(sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = "SELECT * FROM resources";
        assert!(matches!(parse_sql(sql), Err(SqlError::UnknownTable(t)) if t == "resources"));
        let sql = "INSERT INTO holds VALUES ('x', 1, 2)";
        assert!(matches!(parse_sql(sql), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }

    #[test]
    fn parse_garbage_errors() {
        assert!(matches!(parse_sql("BOOK ME A SPOT"), Err(SqlError::Parse(_))));
    }
}
