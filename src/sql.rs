use std::collections::HashMap;

use sqlparser::ast::{
    self, BinaryOperator, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, UnaryOperator, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;
use crate::time::parse_instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentOutcome {
    Success,
    Failure,
    Retry,
}

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertVehicleType {
        id: Ulid,
        draft: VehicleTypeDraft,
    },
    UpdateVehicleProfile {
        id: Ulid,
        profile: VehicleProfile,
    },
    ToggleVehicleType {
        id: Ulid,
    },
    DeleteVehicleType {
        id: Ulid,
    },
    SelectVehicleTypes {
        filter: VehicleTypeFilter,
    },
    SelectVehicleTypesByCategory {
        category: CategoryKind,
    },
    UpsertCategory {
        vehicle_type_id: Ulid,
        category: RentalCategory,
    },
    SetCategoryAvailability {
        vehicle_type_id: Ulid,
        kind: CategoryKind,
        available: bool,
    },
    InsertUnit {
        vehicle_type_id: Ulid,
        unit: UnitDraft,
    },
    SetUnitAvailability {
        vehicle_type_id: Ulid,
        plate: String,
        available: bool,
    },
    DeleteUnit {
        vehicle_type_id: Ulid,
        plate: String,
    },
    InsertBlackout {
        vehicle_type_id: Ulid,
        plate: String,
        span: Span,
    },
    InsertUnavailability {
        id: Ulid,
        vehicle_type_id: Ulid,
        plate: String,
        span: Span,
    },
    DeleteUnavailability {
        id: Ulid,
    },
    SelectUnavailability {
        vehicle_type_id: Ulid,
    },
    InsertReservation {
        draft: ReservationDraft,
        plate: Option<String>,
    },
    SelectReservations {
        category: Option<CategoryKind>,
    },
    /// No plate means pick the first free unit.
    InsertAssignment {
        reservation_id: Ulid,
        plate: Option<String>,
    },
    InsertPaymentEvent {
        reservation_id: Ulid,
        outcome: PaymentOutcome,
    },
    SelectAvailableUnits {
        vehicle_type_id: Ulid,
        span: Span,
    },
    SelectAvailableVehicleTypes {
        category: CategoryKind,
        span: Span,
    },
    SelectCalendar {
        year: i32,
        month: u32,
    },
    SelectUnavailableDates {
        vehicle_type_id: Ulid,
    },
    /// Per-unit reservation and unavailable periods behind the month grid.
    SelectCalendarPeriods {
        year: i32,
        month: u32,
    },
    InsertRating {
        vehicle_type_id: Ulid,
        rating: RatingDraft,
    },
    SelectRatings {
        vehicle_type_id: Ulid,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(first) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match first {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── INSERT ────────────────────────────────────────────────────

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let row = Row::from_insert(insert)?;

    match table.as_str() {
        "vehicle_types" => Ok(Command::InsertVehicleType {
            id: row.ulid("id")?,
            draft: VehicleTypeDraft {
                profile: row.profile()?,
                available: row.opt_bool("available")?.unwrap_or(true),
                category: row.opt_category("category")?,
                price: row.opt_money("price")?,
                categories: row
                    .opt_text("categories")?
                    .map(|s| parse_categories_json(&s))
                    .transpose()?
                    .unwrap_or_default(),
                units: row
                    .opt_text("units")?
                    .map(|s| parse_units_json(&s))
                    .transpose()?
                    .unwrap_or_default(),
            },
        }),
        "vehicle_type_profiles" => Ok(Command::UpdateVehicleProfile {
            id: row.ulid("id")?,
            profile: row.profile()?,
        }),
        "vehicle_type_status" => Ok(Command::ToggleVehicleType { id: row.ulid("id")? }),
        "categories" => Ok(Command::UpsertCategory {
            vehicle_type_id: row.ulid("vehicle_type_id")?,
            category: RentalCategory {
                kind: row.category("kind")?,
                price: row.money("price")?,
                available: row.opt_bool("available")?.unwrap_or(true),
            },
        }),
        "category_status" => Ok(Command::SetCategoryAvailability {
            vehicle_type_id: row.ulid("vehicle_type_id")?,
            kind: row.category("kind")?,
            available: row.bool("available")?,
        }),
        "units" => Ok(Command::InsertUnit {
            vehicle_type_id: row.ulid("vehicle_type_id")?,
            unit: UnitDraft {
                plate: row.text("plate")?,
                available: row.opt_bool("available")?.unwrap_or(true),
            },
        }),
        "unit_status" => Ok(Command::SetUnitAvailability {
            vehicle_type_id: row.ulid("vehicle_type_id")?,
            plate: row.text("plate")?,
            available: row.bool("available")?,
        }),
        "blackouts" => Ok(Command::InsertBlackout {
            vehicle_type_id: row.ulid("vehicle_type_id")?,
            plate: row.text("plate")?,
            span: row.span()?,
        }),
        "unavailability" => Ok(Command::InsertUnavailability {
            id: row.ulid("id")?,
            vehicle_type_id: row.ulid("vehicle_type_id")?,
            plate: row.text("plate")?,
            span: row.span()?,
        }),
        "reservations" => parse_reservation(&row),
        "assignments" => Ok(Command::InsertAssignment {
            reservation_id: row.ulid("reservation_id")?,
            plate: row.opt_text("plate")?,
        }),
        "ratings" => Ok(Command::InsertRating {
            vehicle_type_id: row.ulid("vehicle_type_id")?,
            rating: RatingDraft {
                full_name: row.text("full_name")?,
                score: row.opt_u8("rating")?.ok_or(SqlError::MissingColumn("rating"))?,
                comment: row.opt_text("comment")?.unwrap_or_default(),
            },
        }),
        "payment_events" => {
            let outcome = match row.text("outcome")?.to_lowercase().as_str() {
                "success" => PaymentOutcome::Success,
                "failure" => PaymentOutcome::Failure,
                "retry" => PaymentOutcome::Retry,
                other => return Err(SqlError::Parse(format!("unknown payment outcome: {other}"))),
            };
            Ok(Command::InsertPaymentEvent {
                reservation_id: row.ulid("reservation_id")?,
                outcome,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_reservation(row: &Row) -> Result<Command, SqlError> {
    let payment_type = row
        .text("payment_type")?
        .parse::<PaymentType>()
        .map_err(SqlError::Parse)?;
    let payment_percentage = row
        .opt_i64("payment_percentage")?
        .map(|p| u8::try_from(p).map_err(|_| SqlError::Parse(format!("{p} out of percentage range"))))
        .transpose()?;
    let age = row.opt_i64("age")?.unwrap_or(0);
    let draft = ReservationDraft {
        id: row.ulid("id")?,
        vehicle_type_id: row.ulid("vehicle_type_id")?,
        customer: Customer {
            first_name: row.text("first_name")?,
            last_name: row.text("last_name")?,
            email: row.text("email")?,
            phone: row.opt_text("phone")?.unwrap_or_default(),
            whatsapp: row.opt_text("whatsapp")?.unwrap_or_default(),
            address: row.opt_text("address")?.unwrap_or_default(),
            city: row.opt_text("city")?.unwrap_or_default(),
            age: u32::try_from(age).map_err(|_| SqlError::Parse(format!("bad age: {age}")))?,
        },
        category: row.category("category")?,
        span: row.span()?,
        total_price: row.money("total_price")?,
        pickup_location: row.opt_text("pickup_location")?.unwrap_or_default(),
        dropoff_location: row.opt_text("dropoff_location")?.unwrap_or_default(),
        child_seat: row.opt_bool("child_seat")?.unwrap_or(false),
        flight_number: row.opt_text("flight_number")?,
        payment_type,
        payment_percentage,
    };
    Ok(Command::InsertReservation {
        draft,
        plate: row.opt_text("plate")?,
    })
}

/// `["123TUN456", {"plate": "124TUN1", "available": false}]`
fn parse_units_json(s: &str) -> Result<Vec<UnitDraft>, SqlError> {
    let items: Vec<serde_json::Value> =
        serde_json::from_str(s).map_err(|e| SqlError::Parse(format!("units: {e}")))?;
    items
        .into_iter()
        .map(|item| match item {
            serde_json::Value::String(plate) => Ok(UnitDraft {
                plate,
                available: true,
            }),
            serde_json::Value::Object(obj) => {
                let plate = obj
                    .get("plate")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| SqlError::Parse("units: object without plate".into()))?;
                Ok(UnitDraft {
                    plate: plate.to_string(),
                    available: obj.get("available").and_then(|v| v.as_bool()).unwrap_or(true),
                })
            }
            other => Err(SqlError::Parse(format!("units: unexpected {other}"))),
        })
        .collect()
}

/// `[{"kind": "courteduree", "price": 80, "available": true}]`
fn parse_categories_json(s: &str) -> Result<Vec<RentalCategory>, SqlError> {
    let items: Vec<serde_json::Value> =
        serde_json::from_str(s).map_err(|e| SqlError::Parse(format!("categories: {e}")))?;
    items
        .into_iter()
        .map(|item| {
            let kind = item
                .get("kind")
                .or_else(|| item.get("type"))
                .and_then(|v| v.as_str())
                .ok_or_else(|| SqlError::Parse("categories: entry without kind".into()))?
                .parse::<CategoryKind>()
                .map_err(SqlError::Parse)?;
            let price = match item.get("price") {
                Some(serde_json::Value::Number(n)) => parse_money(&n.to_string())?,
                Some(serde_json::Value::String(s)) => parse_money(s)?,
                _ => return Err(SqlError::Parse("categories: entry without price".into())),
            };
            Ok(RentalCategory {
                kind,
                price,
                available: item.get("available").and_then(|v| v.as_bool()).unwrap_or(true),
            })
        })
        .collect()
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let filters = Filters::from_selection(delete.selection.as_ref())?;

    match table.as_str() {
        "vehicle_types" => Ok(Command::DeleteVehicleType { id: filters.ulid("id")? }),
        "units" => Ok(Command::DeleteUnit {
            vehicle_type_id: filters.ulid("vehicle_type_id")?,
            plate: filters.text("plate")?,
        }),
        "unavailability" => Ok(Command::DeleteUnavailability { id: filters.ulid("id")? }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;
    let filters = Filters::from_selection(select.selection.as_ref())?;

    match table.as_str() {
        "vehicle_types" => {
            if let Some(category) = filters.opt_category("category")? {
                return Ok(Command::SelectVehicleTypesByCategory { category });
            }
            let seats = filters
                .opt_i64("seats")?
                .map(|s| u8::try_from(s).map_err(|_| SqlError::Parse(format!("bad seats: {s}"))))
                .transpose()?;
            Ok(Command::SelectVehicleTypes {
                filter: VehicleTypeFilter {
                    seats,
                    car_type: filters.opt_text("car_type")?,
                },
            })
        }
        "reservations" => Ok(Command::SelectReservations {
            category: filters.opt_category("category")?,
        }),
        "unavailability" => Ok(Command::SelectUnavailability {
            vehicle_type_id: filters.ulid("vehicle_type_id")?,
        }),
        "available_units" => Ok(Command::SelectAvailableUnits {
            vehicle_type_id: filters.ulid("vehicle_type_id")?,
            span: filters.window()?,
        }),
        "available_vehicle_types" => Ok(Command::SelectAvailableVehicleTypes {
            category: filters.category("category")?,
            span: filters.window()?,
        }),
        "calendar" => {
            let (year, month) = filters.year_month()?;
            Ok(Command::SelectCalendar { year, month })
        }
        "calendar_periods" => {
            let (year, month) = filters.year_month()?;
            Ok(Command::SelectCalendarPeriods { year, month })
        }
        "unavailable_dates" => Ok(Command::SelectUnavailableDates {
            vehicle_type_id: filters.ulid("vehicle_type_id")?,
        }),
        "ratings" => Ok(Command::SelectRatings {
            vehicle_type_id: filters.ulid("vehicle_type_id")?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── Result shapes ─────────────────────────────────────────────

/// Row shape a statement returns. `None` means a bare command tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    VehicleTypes,
    PricedVehicleTypes,
    Receipt,
    Assignment,
    Reservations,
    Unavailability,
    AvailableUnits,
    AvailableVehicleTypes,
    Calendar,
    UnavailableDates,
    CalendarPeriods,
    RatingSummary,
    Ratings,
}

impl Command {
    pub fn result_kind(&self) -> Option<ResultKind> {
        match self {
            Command::SelectVehicleTypes { .. } => Some(ResultKind::VehicleTypes),
            Command::SelectVehicleTypesByCategory { .. } => Some(ResultKind::PricedVehicleTypes),
            Command::InsertReservation { .. } | Command::InsertPaymentEvent { .. } => {
                Some(ResultKind::Receipt)
            }
            Command::InsertAssignment { .. } => Some(ResultKind::Assignment),
            Command::SelectReservations { .. } => Some(ResultKind::Reservations),
            Command::SelectUnavailability { .. } => Some(ResultKind::Unavailability),
            Command::SelectAvailableUnits { .. } => Some(ResultKind::AvailableUnits),
            Command::SelectAvailableVehicleTypes { .. } => Some(ResultKind::AvailableVehicleTypes),
            Command::SelectCalendar { .. } => Some(ResultKind::Calendar),
            Command::SelectUnavailableDates { .. } => Some(ResultKind::UnavailableDates),
            Command::SelectCalendarPeriods { .. } => Some(ResultKind::CalendarPeriods),
            Command::InsertRating { .. } => Some(ResultKind::RatingSummary),
            Command::SelectRatings { .. } => Some(ResultKind::Ratings),
            _ => None,
        }
    }
}

/// Result shape of a statement that may still hold `$n` placeholders.
/// Only the table name and filter columns are inspected.
pub fn describe_sql(sql: &str) -> Option<ResultKind> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).ok()?;
    match stmts.first()? {
        Statement::Insert(insert) => match insert_table_name(insert).ok()?.as_str() {
            "reservations" | "payment_events" => Some(ResultKind::Receipt),
            "assignments" => Some(ResultKind::Assignment),
            "ratings" => Some(ResultKind::RatingSummary),
            _ => None,
        },
        Statement::Query(query) => {
            let SetExpr::Select(select) = query.body.as_ref() else {
                return None;
            };
            let table = table_factor_name(&select.from.first()?.relation).ok()?;
            let mut columns = Vec::new();
            if let Some(expr) = &select.selection {
                filter_columns(expr, &mut columns);
            }
            match table.as_str() {
                "vehicle_types" if columns.iter().any(|c| c == "category") => {
                    Some(ResultKind::PricedVehicleTypes)
                }
                "vehicle_types" => Some(ResultKind::VehicleTypes),
                "reservations" => Some(ResultKind::Reservations),
                "unavailability" => Some(ResultKind::Unavailability),
                "available_units" => Some(ResultKind::AvailableUnits),
                "available_vehicle_types" => Some(ResultKind::AvailableVehicleTypes),
                "calendar" => Some(ResultKind::Calendar),
                "unavailable_dates" => Some(ResultKind::UnavailableDates),
                "calendar_periods" => Some(ResultKind::CalendarPeriods),
                "ratings" => Some(ResultKind::Ratings),
                _ => None,
            }
        }
        _ => None,
    }
}

fn filter_columns(expr: &Expr, out: &mut Vec<String>) {
    match expr {
        Expr::Nested(inner) => filter_columns(inner, out),
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            filter_columns(left, out);
            filter_columns(right, out);
        }
        Expr::BinaryOp { left, .. } => out.extend(expr_column_name(left)),
        _ => {}
    }
}

// ── Literals ──────────────────────────────────────────────────

/// A SQL literal reduced to the shapes this surface accepts.
#[derive(Debug, Clone, PartialEq)]
enum Literal {
    Null,
    Str(String),
    Num(String),
    Bool(bool),
}

fn literal(expr: &Expr) -> Result<Literal, SqlError> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => match value {
            Value::Null => Ok(Literal::Null),
            Value::SingleQuotedString(s) => Ok(Literal::Str(s.clone())),
            Value::Number(n, _) => Ok(Literal::Num(n.to_string())),
            Value::Boolean(b) => Ok(Literal::Bool(*b)),
            other => Err(SqlError::Parse(format!("unsupported literal {other}"))),
        },
        Expr::UnaryOp {
            op: UnaryOperator::Minus,
            expr,
        } => match literal(expr)? {
            Literal::Num(n) => Ok(Literal::Num(format!("-{n}"))),
            other => Err(SqlError::Parse(format!("cannot negate {other:?}"))),
        },
        Expr::Nested(inner) => literal(inner),
        other => Err(SqlError::Parse(format!("expected literal, got {other}"))),
    }
}

fn lit_ulid(col: &str, lit: Literal) -> Result<Ulid, SqlError> {
    match lit {
        Literal::Str(s) | Literal::Num(s) => {
            Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("{col}: bad ULID: {e}")))
        }
        other => Err(SqlError::Parse(format!("{col}: expected ULID, got {other:?}"))),
    }
}

fn lit_text(col: &str, lit: Literal) -> Result<Option<String>, SqlError> {
    match lit {
        Literal::Null => Ok(None),
        Literal::Str(s) | Literal::Num(s) => Ok(Some(s)),
        Literal::Bool(b) => Err(SqlError::Parse(format!("{col}: expected text, got {b}"))),
    }
}

fn lit_i64(col: &str, lit: Literal) -> Result<Option<i64>, SqlError> {
    match lit {
        Literal::Null => Ok(None),
        Literal::Str(s) | Literal::Num(s) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| SqlError::Parse(format!("{col}: bad integer: {e}"))),
        Literal::Bool(b) => Err(SqlError::Parse(format!("{col}: expected integer, got {b}"))),
    }
}

fn lit_bool(col: &str, lit: Literal) -> Result<Option<bool>, SqlError> {
    match lit {
        Literal::Null => Ok(None),
        Literal::Bool(b) => Ok(Some(b)),
        Literal::Str(s) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" => Ok(Some(true)),
            "false" | "f" | "0" => Ok(Some(false)),
            _ => Err(SqlError::Parse(format!("{col}: bad bool: {s}"))),
        },
        Literal::Num(n) => Ok(Some(n != "0")),
    }
}

fn lit_instant(col: &str, lit: Literal) -> Result<Option<Ms>, SqlError> {
    match lit {
        Literal::Null => Ok(None),
        Literal::Num(n) => n
            .parse()
            .map(Some)
            .map_err(|e| SqlError::Parse(format!("{col}: bad timestamp: {e}"))),
        Literal::Str(s) => parse_instant(&s)
            .map(Some)
            .ok_or_else(|| SqlError::Parse(format!("{col}: bad date: {s}"))),
        Literal::Bool(b) => Err(SqlError::Parse(format!("{col}: expected date, got {b}"))),
    }
}

fn lit_category(col: &str, lit: Literal) -> Result<Option<CategoryKind>, SqlError> {
    lit_text(col, lit)?
        .map(|s| s.parse::<CategoryKind>().map_err(SqlError::Parse))
        .transpose()
}

/// Decimal DT amount → millimes. At most three decimals.
pub fn parse_money(s: &str) -> Result<Millimes, SqlError> {
    let s = s.trim();
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let (whole, frac) = digits.split_once('.').unwrap_or((digits, ""));
    let bad = || SqlError::Parse(format!("bad amount: {s}"));
    if whole.is_empty() && frac.is_empty() {
        return Err(bad());
    }
    if frac.len() > 3 || !frac.chars().all(|c| c.is_ascii_digit()) {
        return Err(bad());
    }
    let whole: i64 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| bad())?
    };
    let frac_millimes: i64 = format!("{frac:0<3}").parse().map_err(|_| bad())?;
    let value = whole
        .checked_mul(1000)
        .and_then(|w| w.checked_add(frac_millimes))
        .ok_or_else(bad)?;
    Ok(if negative { -value } else { value })
}

fn lit_money(col: &str, lit: Literal) -> Result<Option<Millimes>, SqlError> {
    match lit {
        Literal::Null => Ok(None),
        Literal::Str(s) | Literal::Num(s) => parse_money(&s)
            .map(Some)
            .map_err(|e| SqlError::Parse(format!("{col}: {e}"))),
        Literal::Bool(b) => Err(SqlError::Parse(format!("{col}: expected amount, got {b}"))),
    }
}

// ── Named-column row ──────────────────────────────────────────

/// First VALUES row of an INSERT, keyed by the column list.
struct Row {
    values: HashMap<String, Literal>,
}

impl Row {
    fn from_insert(insert: &ast::Insert) -> Result<Self, SqlError> {
        let body = insert
            .source
            .as_ref()
            .ok_or(SqlError::Parse("no VALUES".into()))?;
        let rows = match body.body.as_ref() {
            SetExpr::Values(values) => &values.rows,
            _ => return Err(SqlError::Parse("expected VALUES".into())),
        };
        let Some(first) = rows.first() else {
            return Err(SqlError::Parse("empty VALUES".into()));
        };
        if rows.len() > 1 {
            return Err(SqlError::Unsupported("multi-row INSERT".into()));
        }
        if insert.columns.is_empty() {
            return Err(SqlError::Parse("INSERT needs an explicit column list".into()));
        }
        if insert.columns.len() != first.len() {
            return Err(SqlError::WrongArity(insert.columns.len(), first.len()));
        }
        let mut values = HashMap::with_capacity(first.len());
        for (col, expr) in insert.columns.iter().zip(first) {
            values.insert(col.value.to_lowercase(), literal(expr)?);
        }
        Ok(Self { values })
    }

    fn get(&self, col: &str) -> Literal {
        self.values.get(col).cloned().unwrap_or(Literal::Null)
    }

    fn ulid(&self, col: &'static str) -> Result<Ulid, SqlError> {
        match self.get(col) {
            Literal::Null => Err(SqlError::MissingColumn(col)),
            lit => lit_ulid(col, lit),
        }
    }

    fn opt_text(&self, col: &str) -> Result<Option<String>, SqlError> {
        lit_text(col, self.get(col))
    }

    fn text(&self, col: &'static str) -> Result<String, SqlError> {
        self.opt_text(col)?.ok_or(SqlError::MissingColumn(col))
    }

    fn opt_i64(&self, col: &str) -> Result<Option<i64>, SqlError> {
        lit_i64(col, self.get(col))
    }

    fn opt_u8(&self, col: &str) -> Result<Option<u8>, SqlError> {
        self.opt_i64(col)?
            .map(|v| u8::try_from(v).map_err(|_| SqlError::Parse(format!("{col}: {v} out of range"))))
            .transpose()
    }

    fn opt_bool(&self, col: &str) -> Result<Option<bool>, SqlError> {
        lit_bool(col, self.get(col))
    }

    fn bool(&self, col: &'static str) -> Result<bool, SqlError> {
        self.opt_bool(col)?.ok_or(SqlError::MissingColumn(col))
    }

    fn instant(&self, col: &'static str) -> Result<Ms, SqlError> {
        lit_instant(col, self.get(col))?.ok_or(SqlError::MissingColumn(col))
    }

    fn span(&self) -> Result<Span, SqlError> {
        Ok(Span::new(self.instant("start")?, self.instant("end")?))
    }

    fn opt_category(&self, col: &str) -> Result<Option<CategoryKind>, SqlError> {
        lit_category(col, self.get(col))
    }

    fn category(&self, col: &'static str) -> Result<CategoryKind, SqlError> {
        self.opt_category(col)?.ok_or(SqlError::MissingColumn(col))
    }

    fn opt_money(&self, col: &str) -> Result<Option<Millimes>, SqlError> {
        lit_money(col, self.get(col))
    }

    fn money(&self, col: &'static str) -> Result<Millimes, SqlError> {
        self.opt_money(col)?.ok_or(SqlError::MissingColumn(col))
    }

    fn profile(&self) -> Result<VehicleProfile, SqlError> {
        Ok(VehicleProfile {
            title: self.text("title")?,
            description: self.opt_text("description")?.unwrap_or_default(),
            car_type: self.opt_text("car_type")?.unwrap_or_default(),
            gear: self.opt_text("gear")?.unwrap_or_default(),
            fuel: self.opt_text("fuel")?.unwrap_or_default(),
            doors: self.opt_u8("doors")?.unwrap_or(0),
            seats: self.opt_u8("seats")?.unwrap_or(0),
            guarantee: self.opt_money("guarantee")?.unwrap_or(0),
            air_conditioning: self.opt_bool("air_conditioning")?.unwrap_or(false),
            is_new: self.opt_bool("is_new")?.unwrap_or(false),
        })
    }
}

// ── WHERE filters ─────────────────────────────────────────────

/// Conjunction of `column <op> literal` terms.
struct Filters {
    terms: Vec<(String, BinaryOperator, Literal)>,
}

impl Filters {
    fn from_selection(selection: Option<&Expr>) -> Result<Self, SqlError> {
        let mut terms = Vec::new();
        if let Some(expr) = selection {
            collect_terms(expr, &mut terms)?;
        }
        Ok(Self { terms })
    }

    fn find(&self, col: &str, op: BinaryOperator) -> Literal {
        self.terms
            .iter()
            .find(|(c, o, _)| c == col && *o == op)
            .map(|(_, _, lit)| lit.clone())
            .unwrap_or(Literal::Null)
    }

    fn ulid(&self, col: &'static str) -> Result<Ulid, SqlError> {
        match self.find(col, BinaryOperator::Eq) {
            Literal::Null => Err(SqlError::MissingFilter(col)),
            lit => lit_ulid(col, lit),
        }
    }

    fn opt_text(&self, col: &str) -> Result<Option<String>, SqlError> {
        lit_text(col, self.find(col, BinaryOperator::Eq))
    }

    fn text(&self, col: &'static str) -> Result<String, SqlError> {
        self.opt_text(col)?.ok_or(SqlError::MissingFilter(col))
    }

    fn opt_i64(&self, col: &str) -> Result<Option<i64>, SqlError> {
        lit_i64(col, self.find(col, BinaryOperator::Eq))
    }

    fn i64(&self, col: &'static str) -> Result<i64, SqlError> {
        self.opt_i64(col)?.ok_or(SqlError::MissingFilter(col))
    }

    fn opt_category(&self, col: &str) -> Result<Option<CategoryKind>, SqlError> {
        lit_category(col, self.find(col, BinaryOperator::Eq))
    }

    fn category(&self, col: &'static str) -> Result<CategoryKind, SqlError> {
        self.opt_category(col)?.ok_or(SqlError::MissingFilter(col))
    }

    fn year_month(&self) -> Result<(i32, u32), SqlError> {
        let year = self.i64("year")?;
        let month = self.i64("month")?;
        Ok((
            i32::try_from(year).map_err(|_| SqlError::Parse(format!("bad year: {year}")))?,
            u32::try_from(month).map_err(|_| SqlError::Parse(format!("bad month: {month}")))?,
        ))
    }

    /// `start >= a AND "end" <= b` → `[a, b]`.
    fn window(&self) -> Result<Span, SqlError> {
        let start = lit_instant("start", self.find("start", BinaryOperator::GtEq))?
            .ok_or(SqlError::MissingFilter("start"))?;
        let end = lit_instant("end", self.find("end", BinaryOperator::LtEq))?
            .ok_or(SqlError::MissingFilter("end"))?;
        Ok(Span::new(start, end))
    }
}

fn collect_terms(
    expr: &Expr,
    terms: &mut Vec<(String, BinaryOperator, Literal)>,
) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_terms(inner, terms),
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            collect_terms(left, terms)?;
            collect_terms(right, terms)
        }
        Expr::BinaryOp { left, op, right } => {
            let col = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter {expr}")))?;
            terms.push((col, op.clone(), literal(right)?));
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
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
    match tables_with_joins.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
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

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(usize, usize),
    MissingColumn(&'static str),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(cols, vals) => {
                write!(f, "{cols} columns but {vals} values")
            }
            SqlError::MissingColumn(col) => write!(f, "missing column: {col}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
