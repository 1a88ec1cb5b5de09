use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertBlockedDay {
        date: CalendarDate,
        reason: Option<String>,
    },
    DeleteBlockedDay {
        date: CalendarDate,
    },
    InsertBlockedTimes {
        date: CalendarDate,
        slots: Vec<String>,
        reason: Option<String>,
    },
    DeleteBlockedTimes {
        date: CalendarDate,
        slots: Vec<String>,
    },
    InsertRecurringBlock {
        id: Option<Ulid>,
        day_of_week: u8,
        start_slot: String,
        end_slot: String,
        until_date: CalendarDate,
        reason: Option<String>,
    },
    DeleteRecurringBlock {
        id: Ulid,
    },
    SelectAvailability {
        range: DateRange,
    },
    SelectBlockedDays {
        range: DateRange,
    },
    SelectBlockedTimes {
        range: DateRange,
    },
    SelectRecurringBlocks,
    SelectSlots {
        date: CalendarDate,
    },
    /// Raw gateway JSON, decoded by the wire layer.
    AdminCommand {
        payload: String,
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
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let rows = extract_all_insert_rows(insert)?;

    match table.as_str() {
        "blocked_days" => {
            let values = single_row(&rows, "blocked_days")?;
            if values.is_empty() {
                return Err(SqlError::WrongArity("blocked_days", 1, 0));
            }
            Ok(Command::InsertBlockedDay {
                date: parse_date_expr(&values[0])?,
                reason: optional_text(values.get(1))?,
            })
        }
        "blocked_times" => {
            let mut date = None;
            let mut reason = None;
            let mut slots = Vec::with_capacity(rows.len());
            for (i, row) in rows.iter().enumerate() {
                if row.len() < 2 {
                    return Err(SqlError::WrongArity("blocked_times row", 2, row.len()));
                }
                let row_date = parse_date_expr(&row[0]).map_err(|e| SqlError::Parse(format!("row {i}: {e}")))?;
                match date {
                    None => date = Some(row_date),
                    Some(d) if d != row_date => {
                        return Err(SqlError::Parse("blocked_times rows must share one date".into()));
                    }
                    Some(_) => {}
                }
                slots.push(parse_text_expr(&row[1]).map_err(|e| SqlError::Parse(format!("row {i}: {e}")))?);
                if reason.is_none() {
                    reason = optional_text(row.get(2))?;
                }
            }
            Ok(Command::InsertBlockedTimes {
                date: date.ok_or_else(|| SqlError::Parse("empty VALUES".into()))?,
                slots,
                reason,
            })
        }
        "recurring_blocks" => {
            let values = single_row(&rows, "recurring_blocks")?;
            if values.len() < 5 {
                return Err(SqlError::WrongArity("recurring_blocks", 5, values.len()));
            }
            Ok(Command::InsertRecurringBlock {
                id: parse_ulid_or_null(&values[0])?,
                day_of_week: parse_u8(&values[1])?,
                start_slot: parse_text_expr(&values[2])?,
                end_slot: parse_text_expr(&values[3])?,
                until_date: parse_date_expr(&values[4])?,
                reason: optional_text(values.get(5))?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;

    match table.as_str() {
        "blocked_days" => {
            let mut filters = Filters::default();
            collect_filters(delete.selection.as_ref(), &mut filters)?;
            Ok(Command::DeleteBlockedDay {
                date: filters.exact_date()?,
            })
        }
        "blocked_times" => {
            let mut filters = Filters::default();
            collect_filters(delete.selection.as_ref(), &mut filters)?;
            if filters.slots.is_empty() {
                return Err(SqlError::MissingFilter("slot"));
            }
            Ok(Command::DeleteBlockedTimes {
                date: filters.exact_date()?,
                slots: filters.slots,
            })
        }
        "recurring_blocks" => Ok(Command::DeleteRecurringBlock {
            id: extract_where_id(&delete.selection)?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
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

    let mut filters = Filters::default();
    collect_filters(select.selection.as_ref(), &mut filters)?;

    match table.as_str() {
        "availability" => Ok(Command::SelectAvailability {
            range: filters.range()?,
        }),
        "blocked_days" => Ok(Command::SelectBlockedDays {
            range: filters.range()?,
        }),
        "blocked_times" => Ok(Command::SelectBlockedTimes {
            range: filters.range()?,
        }),
        "recurring_blocks" => Ok(Command::SelectRecurringBlocks),
        "slots" => Ok(Command::SelectSlots {
            date: filters.exact_date()?,
        }),
        "admin_command" => Ok(Command::AdminCommand {
            payload: filters.payload.ok_or(SqlError::MissingFilter("payload"))?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── WHERE clause filters ──────────────────────────────────────

#[derive(Debug, Default)]
struct Filters {
    start: Option<CalendarDate>,
    end: Option<CalendarDate>,
    exact: Option<CalendarDate>,
    slots: Vec<String>,
    payload: Option<String>,
}

impl Filters {
    fn range(&self) -> Result<DateRange, SqlError> {
        let (start, end) = match (self.exact, self.start, self.end) {
            (Some(d), None, None) => (d, d),
            (None, Some(s), Some(e)) => (s, e),
            (None, None, _) => return Err(SqlError::MissingFilter("start_date")),
            (None, Some(_), None) => return Err(SqlError::MissingFilter("end_date")),
            (Some(_), _, _) => {
                return Err(SqlError::Parse("date = cannot be combined with a range".into()));
            }
        };
        DateRange::new(start, end)
            .ok_or_else(|| SqlError::Parse(format!("start {start} is after end {end}")))
    }

    fn exact_date(&self) -> Result<CalendarDate, SqlError> {
        self.exact.ok_or(SqlError::MissingFilter("date"))
    }
}

fn collect_filters(expr: Option<&Expr>, filters: &mut Filters) -> Result<(), SqlError> {
    let Some(expr) = expr else { return Ok(()) };
    match expr {
        Expr::Nested(inner) => collect_filters(Some(inner.as_ref()), filters)?,
        Expr::BinaryOp { left, op, right } => {
            let col = expr_column_name(left);
            match (op, col.as_deref()) {
                (ast::BinaryOperator::And, _) => {
                    collect_filters(Some(left.as_ref()), filters)?;
                    collect_filters(Some(right.as_ref()), filters)?;
                }
                (ast::BinaryOperator::Eq, Some("date")) => filters.exact = Some(parse_date_expr(right)?),
                (ast::BinaryOperator::Eq | ast::BinaryOperator::GtEq, Some("start_date"))
                | (ast::BinaryOperator::GtEq, Some("date")) => {
                    filters.start = Some(parse_date_expr(right)?);
                }
                (ast::BinaryOperator::Eq | ast::BinaryOperator::LtEq, Some("end_date"))
                | (ast::BinaryOperator::LtEq, Some("date")) => {
                    filters.end = Some(parse_date_expr(right)?);
                }
                (ast::BinaryOperator::Eq, Some("slot")) => filters.slots.push(parse_text_expr(right)?),
                (ast::BinaryOperator::Eq, Some("payload")) => {
                    filters.payload = Some(parse_text_expr(right)?);
                }
                _ => return Err(SqlError::Unsupported(format!("filter {expr}"))),
            }
        }
        Expr::Between {
            expr: col,
            negated: false,
            low,
            high,
        } if expr_column_name(col).as_deref() == Some("date") => {
            filters.start = Some(parse_date_expr(low)?);
            filters.end = Some(parse_date_expr(high)?);
        }
        Expr::InList {
            expr: col,
            list,
            negated: false,
        } if expr_column_name(col).as_deref() == Some("slot") => {
            for item in list {
                filters.slots.push(parse_text_expr(item)?);
            }
        }
        other => return Err(SqlError::Unsupported(format!("filter {other}"))),
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

fn single_row<'a>(rows: &'a [Vec<Expr>], table: &'static str) -> Result<&'a [Expr], SqlError> {
    match rows {
        [row] => Ok(row),
        _ => Err(SqlError::Unsupported(format!("multi-row INSERT into {table}"))),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
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

fn parse_text_expr(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn optional_text(expr: Option<&Expr>) -> Result<Option<String>, SqlError> {
    match expr {
        None => Ok(None),
        Some(e) if matches!(extract_value(e), Some(Value::Null)) => Ok(None),
        Some(e) => parse_text_expr(e).map(Some),
    }
}

fn parse_date_expr(expr: &Expr) -> Result<CalendarDate, SqlError> {
    let text = parse_text_expr(expr)?;
    text.parse()
        .map_err(|e| SqlError::Parse(format!("bad date {text:?}: {e}")))
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_ulid_expr(expr).map(Some),
    }
}

fn parse_u8(expr: &Expr) -> Result<u8, SqlError> {
    let s = match extract_value(expr) {
        Some(Value::Number(s, _)) | Some(Value::SingleQuotedString(s)) => s,
        Some(value) => return Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        None => return Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    };
    s.parse()
        .map_err(|e| SqlError::Parse(format!("bad day_of_week {s:?}: {e}")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("{0}: expected {1} values, got {2}")]
    WrongArity(&'static str, usize, usize),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> CalendarDate {
        s.parse().unwrap()
    }

    #[test]
    fn parse_select_availability_range() {
        let sql = "SELECT * FROM availability WHERE date >= '2030-01-01' AND date <= '2030-01-31'";
        let cmd = parse_sql(sql).unwrap();
        match cmd {
            Command::SelectAvailability { range } => {
                assert_eq!(range.start, d("2030-01-01"));
                assert_eq!(range.end, d("2030-01-31"));
            }
            _ => panic!("expected SelectAvailability, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_availability_single_date() {
        let sql = "SELECT * FROM availability WHERE date = '2030-01-05'";
        let cmd = parse_sql(sql).unwrap();
        assert_eq!(
            cmd,
            Command::SelectAvailability {
                range: DateRange::single(d("2030-01-05"))
            }
        );
    }

    #[test]
    fn parse_select_availability_between_and_named_bounds() {
        let between = parse_sql(
            "SELECT * FROM availability WHERE date BETWEEN '2030-01-01' AND '2030-01-07'",
        )
        .unwrap();
        let named = parse_sql(
            "SELECT * FROM availability WHERE start_date = '2030-01-01' AND end_date = '2030-01-07'",
        )
        .unwrap();
        assert_eq!(between, named);
    }

    #[test]
    fn parse_select_availability_inverted_range_errors() {
        let sql = "SELECT * FROM availability WHERE date >= '2030-02-01' AND date <= '2030-01-01'";
        assert!(matches!(parse_sql(sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_select_availability_missing_end() {
        let sql = "SELECT * FROM availability WHERE date >= '2030-02-01'";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("end_date"))));
    }

    #[test]
    fn parse_select_bad_date() {
        let sql = "SELECT * FROM availability WHERE date = '2030-02-30'";
        assert!(matches!(parse_sql(sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_select_other_tables() {
        assert!(matches!(
            parse_sql("SELECT * FROM blocked_days WHERE date BETWEEN '2030-01-01' AND '2030-12-31'").unwrap(),
            Command::SelectBlockedDays { .. }
        ));
        assert!(matches!(
            parse_sql("SELECT * FROM blocked_times WHERE date = '2030-01-05'").unwrap(),
            Command::SelectBlockedTimes { .. }
        ));
        assert_eq!(
            parse_sql("SELECT * FROM recurring_blocks").unwrap(),
            Command::SelectRecurringBlocks
        );
        assert_eq!(
            parse_sql("SELECT * FROM slots WHERE date = '2030-01-05'").unwrap(),
            Command::SelectSlots { date: d("2030-01-05") }
        );
    }

    #[test]
    fn parse_insert_blocked_day() {
        let sql = "INSERT INTO blocked_days (date, reason) VALUES ('2030-01-05', 'Holiday')";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::InsertBlockedDay {
                date: d("2030-01-05"),
                reason: Some("Holiday".into()),
            }
        );
    }

    #[test]
    fn parse_insert_blocked_day_without_reason() {
        let with_null = parse_sql("INSERT INTO blocked_days (date, reason) VALUES ('2030-01-05', NULL)").unwrap();
        let bare = parse_sql("INSERT INTO blocked_days (date) VALUES ('2030-01-05')").unwrap();
        assert_eq!(with_null, bare);
    }

    #[test]
    fn parse_delete_blocked_day() {
        let sql = "DELETE FROM blocked_days WHERE date = '2030-01-05'";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::DeleteBlockedDay { date: d("2030-01-05") }
        );
    }

    #[test]
    fn parse_batch_insert_blocked_times() {
        let sql = "INSERT INTO blocked_times (date, slot, reason) VALUES \
                   ('2030-01-05', '11:00 AM', 'Staff'), ('2030-01-05', '11:30 AM', 'Staff')";
        match parse_sql(sql).unwrap() {
            Command::InsertBlockedTimes { date, slots, reason } => {
                assert_eq!(date, d("2030-01-05"));
                assert_eq!(slots, vec!["11:00 AM".to_string(), "11:30 AM".to_string()]);
                assert_eq!(reason.as_deref(), Some("Staff"));
            }
            other => panic!("expected InsertBlockedTimes, got {other:?}"),
        }
    }

    #[test]
    fn parse_blocked_times_rows_must_share_date() {
        let sql = "INSERT INTO blocked_times (date, slot) VALUES ('2030-01-05', '11:00 AM'), ('2030-01-06', '11:00 AM')";
        assert!(matches!(parse_sql(sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_delete_blocked_times_in_list() {
        let sql = "DELETE FROM blocked_times WHERE date = '2030-01-05' AND slot IN ('11:00 AM', '11:30 AM')";
        match parse_sql(sql).unwrap() {
            Command::DeleteBlockedTimes { date, slots } => {
                assert_eq!(date, d("2030-01-05"));
                assert_eq!(slots.len(), 2);
            }
            other => panic!("expected DeleteBlockedTimes, got {other:?}"),
        }
    }

    #[test]
    fn parse_delete_blocked_times_requires_slot() {
        let sql = "DELETE FROM blocked_times WHERE date = '2030-01-05'";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("slot"))));
    }

    #[test]
    fn parse_insert_recurring_block() {
        let sql = "INSERT INTO recurring_blocks (id, day_of_week, start_slot, end_slot, until_date, reason) \
                   VALUES ('01ARZ3NDEKTSV4RRFFQ69G5FAV', 1, '6:30 PM', '8:00 PM', '2030-03-31', 'Class')";
        match parse_sql(sql).unwrap() {
            Command::InsertRecurringBlock {
                id,
                day_of_week,
                start_slot,
                end_slot,
                until_date,
                reason,
            } => {
                assert_eq!(id.map(|u| u.to_string()).as_deref(), Some("01ARZ3NDEKTSV4RRFFQ69G5FAV"));
                assert_eq!(day_of_week, 1);
                assert_eq!(start_slot, "6:30 PM");
                assert_eq!(end_slot, "8:00 PM");
                assert_eq!(until_date, d("2030-03-31"));
                assert_eq!(reason.as_deref(), Some("Class"));
            }
            other => panic!("expected InsertRecurringBlock, got {other:?}"),
        }
    }

    #[test]
    fn parse_insert_recurring_block_null_id() {
        let sql = "INSERT INTO recurring_blocks (id, day_of_week, start_slot, end_slot, until_date) \
                   VALUES (NULL, 6, '11:00 AM', '1:00 PM', '2030-03-31')";
        assert!(matches!(
            parse_sql(sql).unwrap(),
            Command::InsertRecurringBlock { id: None, day_of_week: 6, reason: None, .. }
        ));
    }

    #[test]
    fn parse_delete_recurring_block() {
        let sql = "DELETE FROM recurring_blocks WHERE id = '01ARZ3NDEKTSV4RRFFQ69G5FAV'";
        match parse_sql(sql).unwrap() {
            Command::DeleteRecurringBlock { id } => {
                assert_eq!(id.to_string(), "01ARZ3NDEKTSV4RRFFQ69G5FAV");
            }
            other => panic!("expected DeleteRecurringBlock, got {other:?}"),
        }
    }

    #[test]
    fn parse_admin_command_payload() {
        let sql = r#"SELECT * FROM admin_command WHERE payload = '{"action":"unblockFullDay","data":{"date":"2030-01-05"}}'"#;
        match parse_sql(sql).unwrap() {
            Command::AdminCommand { payload } => assert!(payload.contains("unblockFullDay")),
            other => panic!("expected AdminCommand, got {other:?}"),
        }
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = "INSERT INTO foobar (id) VALUES ('x')";
        assert!(matches!(parse_sql(sql), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn parse_unsupported_filter_errors() {
        let sql = "SELECT * FROM availability WHERE date > '2030-01-01'";
        assert!(matches!(parse_sql(sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
