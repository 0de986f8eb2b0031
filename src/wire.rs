use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::NaiveDate;
use futures::Sink;
use futures::stream;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tracing::debug;

use crate::auth::FleetbookAuthSource;
use crate::booking::{BookingService, ReservationReceipt};
use crate::engine::{EngineError, ErrorKind};
use crate::model::*;
use crate::observability::{QUERIES_TOTAL, QUERY_DURATION_SECONDS, command_label};
use crate::sql::{self, Command, PaymentOutcome, ResultKind};
use crate::time::ms_to_rfc3339;

pub struct FleetbookHandler {
    service: Arc<BookingService>,
    diagnostics: bool,
    query_parser: Arc<FleetbookQueryParser>,
}

impl FleetbookHandler {
    pub fn new(service: Arc<BookingService>, diagnostics: bool) -> Self {
        Self {
            service,
            diagnostics,
            query_parser: Arc::new(FleetbookQueryParser),
        }
    }

    fn engine_err(&self, e: EngineError) -> PgWireError {
        PgWireError::UserError(Box::new(ErrorInfo::new(
            "ERROR".into(),
            sqlstate(e.kind()).into(),
            e.public_message(self.diagnostics),
        )))
    }

    /// Parse, execute, and record RED metrics for one statement.
    async fn run(&self, sql: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(sql).map_err(sql_err)?;
        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        debug!(command = label, status, "statement executed");
        result
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Response> {
        let kind = cmd.result_kind();
        let engine = self.service.engine();
        match cmd {
            Command::InsertVehicleType { id, draft } => {
                engine
                    .create_vehicle_type(id, draft)
                    .await
                    .map_err(|e| self.engine_err(e))?;
                Ok(insert_tag(1))
            }
            Command::UpdateVehicleProfile { id, profile } => {
                engine
                    .update_vehicle_profile(id, profile)
                    .await
                    .map_err(|e| self.engine_err(e))?;
                Ok(insert_tag(1))
            }
            Command::ToggleVehicleType { id } => {
                engine
                    .toggle_vehicle_type_status(id)
                    .await
                    .map_err(|e| self.engine_err(e))?;
                Ok(insert_tag(1))
            }
            Command::DeleteVehicleType { id } => {
                engine
                    .delete_vehicle_type(id)
                    .await
                    .map_err(|e| self.engine_err(e))?;
                Ok(delete_tag(1))
            }
            Command::SelectVehicleTypes { filter } => {
                let types = engine.list_vehicle_types(&filter).await;
                rows(kind, types.iter().map(vehicle_type_row))
            }
            Command::SelectVehicleTypesByCategory { category } => {
                let types = engine.vehicle_types_by_category(category).await;
                rows(
                    kind,
                    types.iter().map(|p| {
                        let vt = &p.vehicle_type;
                        let available = vt
                            .categories
                            .iter()
                            .find(|c| c.kind == category)
                            .map_or(vt.available, |c| c.available);
                        vec![
                            Cell::Text(vt.id.to_string()),
                            Cell::Text(vt.profile.title.clone()),
                            Cell::Text(category.as_str().into()),
                            Cell::Int(p.price),
                            Cell::Bool(available),
                        ]
                    }),
                )
            }
            Command::UpsertCategory {
                vehicle_type_id,
                category,
            } => {
                engine
                    .upsert_category(vehicle_type_id, category)
                    .await
                    .map_err(|e| self.engine_err(e))?;
                Ok(insert_tag(1))
            }
            Command::SetCategoryAvailability {
                vehicle_type_id,
                kind: category,
                available,
            } => {
                let changed = engine
                    .set_category_availability(vehicle_type_id, category, available)
                    .await
                    .map_err(|e| self.engine_err(e))?;
                Ok(insert_tag(usize::from(changed)))
            }
            Command::InsertUnit {
                vehicle_type_id,
                unit,
            } => {
                engine
                    .add_unit(vehicle_type_id, unit)
                    .await
                    .map_err(|e| self.engine_err(e))?;
                Ok(insert_tag(1))
            }
            Command::SetUnitAvailability {
                vehicle_type_id,
                plate,
                available,
            } => {
                engine
                    .set_unit_availability(vehicle_type_id, &plate, available)
                    .await
                    .map_err(|e| self.engine_err(e))?;
                Ok(insert_tag(1))
            }
            Command::DeleteUnit {
                vehicle_type_id,
                plate,
            } => {
                engine
                    .remove_unit(vehicle_type_id, &plate)
                    .await
                    .map_err(|e| self.engine_err(e))?;
                Ok(delete_tag(1))
            }
            Command::InsertBlackout {
                vehicle_type_id,
                plate,
                span,
            } => {
                engine
                    .add_blackout(vehicle_type_id, &plate, span)
                    .await
                    .map_err(|e| self.engine_err(e))?;
                Ok(insert_tag(1))
            }
            Command::InsertUnavailability {
                id,
                vehicle_type_id,
                plate,
                span,
            } => {
                engine
                    .record_unavailability(id, vehicle_type_id, &plate, span)
                    .await
                    .map_err(|e| self.engine_err(e))?;
                Ok(insert_tag(1))
            }
            Command::DeleteUnavailability { id } => {
                engine
                    .remove_unavailability(id)
                    .await
                    .map_err(|e| self.engine_err(e))?;
                Ok(delete_tag(1))
            }
            Command::SelectUnavailability { vehicle_type_id } => {
                let records = engine
                    .list_unavailability(vehicle_type_id)
                    .await
                    .map_err(|e| self.engine_err(e))?;
                rows(
                    kind,
                    records.iter().map(|r| {
                        vec![
                            Cell::Text(r.id.to_string()),
                            Cell::Text(r.vehicle_type_id.to_string()),
                            Cell::Text(r.plate.clone()),
                            Cell::Int(r.span.start),
                            Cell::Int(r.span.end),
                        ]
                    }),
                )
            }
            Command::InsertReservation { draft, plate } => {
                let receipt = self
                    .service
                    .create_reservation(draft, plate.as_deref())
                    .await
                    .map_err(|e| self.engine_err(e))?;
                rows(kind, std::iter::once(receipt_row(&receipt)))
            }
            Command::SelectReservations { category } => {
                let reservations = engine.list_reservations(category).await;
                rows(kind, reservations.iter().map(reservation_row))
            }
            Command::InsertAssignment {
                reservation_id,
                plate,
            } => {
                let reservation = match plate {
                    Some(plate) => self.service.assign(reservation_id, &plate).await,
                    None => self.service.auto_assign(reservation_id).await,
                }
                .map_err(|e| self.engine_err(e))?;
                let row = vec![
                    Cell::Text(reservation.id.to_string()),
                    Cell::Text(reservation.vehicle_type_id.to_string()),
                    Cell::Opt(reservation.assigned_plate().map(str::to_string)),
                ];
                rows(kind, std::iter::once(row))
            }
            Command::InsertPaymentEvent {
                reservation_id,
                outcome,
            } => {
                let receipt = match outcome {
                    PaymentOutcome::Success => self
                        .service
                        .payment_succeeded(reservation_id)
                        .await
                        .map(|reservation| ReservationReceipt {
                            reservation,
                            redirect_to: None,
                        }),
                    PaymentOutcome::Failure => self
                        .service
                        .payment_failed(reservation_id)
                        .await
                        .map(|reservation| ReservationReceipt {
                            reservation,
                            redirect_to: None,
                        }),
                    PaymentOutcome::Retry => self.service.retry_payment(reservation_id).await,
                }
                .map_err(|e| self.engine_err(e))?;
                rows(kind, std::iter::once(receipt_row(&receipt)))
            }
            Command::SelectAvailableUnits {
                vehicle_type_id,
                span,
            } => {
                let plates = engine
                    .list_available_units(vehicle_type_id, span)
                    .await
                    .map_err(|e| self.engine_err(e))?;
                let id = vehicle_type_id.to_string();
                rows(
                    kind,
                    plates
                        .into_iter()
                        .map(|plate| vec![Cell::Text(id.clone()), Cell::Text(plate)]),
                )
            }
            Command::SelectAvailableVehicleTypes { category, span } => {
                let types = engine
                    .list_available_vehicle_types(category, span)
                    .await
                    .map_err(|e| self.engine_err(e))?;
                rows(
                    kind,
                    types.iter().map(|t| {
                        vec![
                            Cell::Text(t.vehicle_type_id.to_string()),
                            Cell::Text(t.title.clone()),
                            Cell::Text(t.category.as_str().into()),
                            Cell::Int(t.price),
                            Cell::Int(t.available_unit_count() as i64),
                            Cell::Text(t.plates.join(",")),
                        ]
                    }),
                )
            }
            Command::SelectCalendar { year, month } => {
                let calendars = engine
                    .project_month(year, month)
                    .await
                    .map_err(|e| self.engine_err(e))?;
                let mut out = Vec::new();
                for cal in &calendars {
                    for unit in &cal.units {
                        for (i, status) in unit.days.iter().enumerate() {
                            let date = NaiveDate::from_ymd_opt(year, month, i as u32 + 1)
                                .map(|d| d.to_string())
                                .unwrap_or_default();
                            out.push(vec![
                                Cell::Text(cal.vehicle_type_id.to_string()),
                                Cell::Text(cal.title.clone()),
                                Cell::Text(unit.plate.clone()),
                                Cell::Text(date),
                                Cell::Text(status.as_str().into()),
                            ]);
                        }
                    }
                }
                rows(kind, out.into_iter())
            }
            Command::SelectUnavailableDates { vehicle_type_id } => {
                let dates = engine
                    .unavailable_dates(vehicle_type_id)
                    .await
                    .map_err(|e| self.engine_err(e))?;
                rows(
                    kind,
                    dates.into_iter().map(|d| vec![Cell::Text(d.to_string())]),
                )
            }
            Command::SelectCalendarPeriods { year, month } => {
                let calendars = engine
                    .project_month(year, month)
                    .await
                    .map_err(|e| self.engine_err(e))?;
                let mut out = Vec::new();
                for cal in &calendars {
                    for unit in &cal.units {
                        let id = cal.vehicle_type_id.to_string();
                        for r in &unit.reservations {
                            out.push(vec![
                                Cell::Text(id.clone()),
                                Cell::Text(unit.plate.clone()),
                                Cell::Text("reservation".into()),
                                Cell::Opt(Some(r.reservation_id.to_string())),
                                Cell::Int(r.span.start),
                                Cell::Int(r.span.end),
                            ]);
                        }
                        for span in &unit.unavailable {
                            out.push(vec![
                                Cell::Text(id.clone()),
                                Cell::Text(unit.plate.clone()),
                                Cell::Text("unavailable".into()),
                                Cell::Opt(None),
                                Cell::Int(span.start),
                                Cell::Int(span.end),
                            ]);
                        }
                    }
                }
                rows(kind, out.into_iter())
            }
            Command::InsertRating {
                vehicle_type_id,
                rating,
            } => {
                let vt = engine
                    .add_rating(vehicle_type_id, rating)
                    .await
                    .map_err(|e| self.engine_err(e))?;
                let row = vec![
                    Cell::Text(vt.id.to_string()),
                    Cell::Int(vt.ratings.len() as i64),
                    Cell::Float(vt.average_rating()),
                ];
                rows(kind, std::iter::once(row))
            }
            Command::SelectRatings { vehicle_type_id } => {
                let vt = engine
                    .get_vehicle_type(vehicle_type_id)
                    .await
                    .map_err(|e| self.engine_err(e))?;
                rows(
                    kind,
                    vt.ratings.iter().map(|r| {
                        vec![
                            Cell::Text(r.full_name.clone()),
                            Cell::Int(i64::from(r.score)),
                            Cell::Text(r.comment.clone()),
                            Cell::Text(ms_to_rfc3339(r.created_at)),
                        ]
                    }),
                )
            }
        }
    }
}

// ── Result encoding ──────────────────────────────────────────────

enum Cell {
    Text(String),
    Opt(Option<String>),
    Int(i64),
    Float(f64),
    Bool(bool),
}

fn insert_tag(n: usize) -> Response {
    Response::Execution(Tag::new("INSERT").with_rows(n))
}

fn delete_tag(n: usize) -> Response {
    Response::Execution(Tag::new("DELETE").with_rows(n))
}

fn rows(kind: Option<ResultKind>, data: impl Iterator<Item = Vec<Cell>>) -> PgWireResult<Response> {
    let schema = Arc::new(kind.map(schema).unwrap_or_default());
    let encoded: Vec<PgWireResult<_>> = data
        .map(|cells| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            for cell in cells {
                match cell {
                    Cell::Text(s) => encoder.encode_field(&s)?,
                    Cell::Opt(s) => encoder.encode_field(&s)?,
                    Cell::Int(n) => encoder.encode_field(&n)?,
                    Cell::Float(x) => encoder.encode_field(&x)?,
                    Cell::Bool(b) => encoder.encode_field(&b)?,
                }
            }
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(
        schema,
        stream::iter(encoded),
    )))
}

fn vehicle_type_row(vt: &VehicleType) -> Vec<Cell> {
    let categories = serde_json::Value::Array(
        vt.categories
            .iter()
            .map(|c| {
                serde_json::json!({
                    "kind": c.kind.as_str(),
                    "price": c.price,
                    "available": c.available,
                })
            })
            .collect(),
    );
    let units = serde_json::Value::Array(
        vt.units
            .iter()
            .map(|u| serde_json::json!({ "plate": u.plate, "available": u.available }))
            .collect(),
    );
    let p = &vt.profile;
    vec![
        Cell::Text(vt.id.to_string()),
        Cell::Text(p.title.clone()),
        Cell::Text(p.description.clone()),
        Cell::Text(p.car_type.clone()),
        Cell::Text(p.gear.clone()),
        Cell::Text(p.fuel.clone()),
        Cell::Int(i64::from(p.doors)),
        Cell::Int(i64::from(p.seats)),
        Cell::Int(p.guarantee),
        Cell::Bool(p.air_conditioning),
        Cell::Bool(p.is_new),
        Cell::Bool(vt.available),
        Cell::Text(categories.to_string()),
        Cell::Text(units.to_string()),
        Cell::Int(vt.ratings.len() as i64),
        Cell::Float(vt.average_rating()),
    ]
}

fn reservation_row(r: &Reservation) -> Vec<Cell> {
    vec![
        Cell::Text(r.id.to_string()),
        Cell::Text(r.vehicle_type_id.to_string()),
        Cell::Text(r.customer.first_name.clone()),
        Cell::Text(r.customer.last_name.clone()),
        Cell::Text(r.customer.email.clone()),
        Cell::Text(r.customer.phone.clone()),
        Cell::Text(r.category.as_str().into()),
        Cell::Int(r.span.start),
        Cell::Int(r.span.end),
        Cell::Int(r.total_price),
        Cell::Text(r.payment.kind.as_str().into()),
        Cell::Text(r.payment.status.as_str().into()),
        Cell::Int(r.payment.paid_amount),
        Cell::Opt(r.assigned_plate().map(str::to_string)),
        Cell::Text(ms_to_rfc3339(r.created_at)),
    ]
}

fn receipt_row(receipt: &ReservationReceipt) -> Vec<Cell> {
    let r = &receipt.reservation;
    vec![
        Cell::Text(r.id.to_string()),
        Cell::Text(r.payment.status.as_str().into()),
        Cell::Int(r.payment.paid_amount),
        Cell::Opt(r.assigned_plate().map(str::to_string)),
        Cell::Opt(receipt.redirect_to.clone()),
    ]
}

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn text_fields(names: &[&str]) -> Vec<FieldInfo> {
    names.iter().map(|n| field(n, Type::VARCHAR)).collect()
}

pub fn schema(kind: ResultKind) -> Vec<FieldInfo> {
    match kind {
        ResultKind::VehicleTypes => {
            let mut f = text_fields(&["id", "title", "description", "car_type", "gear", "fuel"]);
            f.push(field("doors", Type::INT8));
            f.push(field("seats", Type::INT8));
            f.push(field("guarantee", Type::INT8));
            f.push(field("air_conditioning", Type::BOOL));
            f.push(field("is_new", Type::BOOL));
            f.push(field("available", Type::BOOL));
            f.push(field("categories", Type::VARCHAR));
            f.push(field("units", Type::VARCHAR));
            f.push(field("ratings", Type::INT8));
            f.push(field("average_rating", Type::FLOAT8));
            f
        }
        ResultKind::PricedVehicleTypes => {
            let mut f = text_fields(&["id", "title", "category"]);
            f.push(field("price", Type::INT8));
            f.push(field("available", Type::BOOL));
            f
        }
        ResultKind::Receipt => {
            let mut f = text_fields(&["id", "payment_status"]);
            f.push(field("paid_amount", Type::INT8));
            f.extend(text_fields(&["plate", "redirect_to"]));
            f
        }
        ResultKind::Assignment => text_fields(&["reservation_id", "vehicle_type_id", "plate"]),
        ResultKind::Reservations => {
            let mut f = text_fields(&[
                "id",
                "vehicle_type_id",
                "first_name",
                "last_name",
                "email",
                "phone",
                "category",
            ]);
            f.push(field("start", Type::INT8));
            f.push(field("end", Type::INT8));
            f.push(field("total_price", Type::INT8));
            f.extend(text_fields(&["payment_type", "payment_status"]));
            f.push(field("paid_amount", Type::INT8));
            f.extend(text_fields(&["plate", "created_at"]));
            f
        }
        ResultKind::Unavailability => {
            let mut f = text_fields(&["id", "vehicle_type_id", "plate"]);
            f.push(field("start", Type::INT8));
            f.push(field("end", Type::INT8));
            f
        }
        ResultKind::AvailableUnits => text_fields(&["vehicle_type_id", "plate"]),
        ResultKind::AvailableVehicleTypes => {
            let mut f = text_fields(&["vehicle_type_id", "title", "category"]);
            f.push(field("price", Type::INT8));
            f.push(field("available_units", Type::INT8));
            f.push(field("plates", Type::VARCHAR));
            f
        }
        ResultKind::Calendar => {
            text_fields(&["vehicle_type_id", "title", "plate", "date", "status"])
        }
        ResultKind::UnavailableDates => text_fields(&["date"]),
        ResultKind::CalendarPeriods => {
            let mut f = text_fields(&["vehicle_type_id", "plate", "kind", "reservation_id"]);
            f.push(field("start", Type::INT8));
            f.push(field("end", Type::INT8));
            f
        }
        ResultKind::RatingSummary => {
            let mut f = text_fields(&["vehicle_type_id"]);
            f.push(field("ratings", Type::INT8));
            f.push(field("average_rating", Type::FLOAT8));
            f
        }
        ResultKind::Ratings => {
            let mut f = text_fields(&["full_name"]);
            f.push(field("rating", Type::INT8));
            f.extend(text_fields(&["comment", "created_at"]));
            f
        }
    }
}

fn schema_for_sql(sql: &str) -> Vec<FieldInfo> {
    sql::describe_sql(sql).map(schema).unwrap_or_default()
}

/// SQLSTATE per engine error class.
fn sqlstate(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::NotFound => "P0002",
        ErrorKind::Validation => "22023",
        ErrorKind::Unavailable => "55000",
        ErrorKind::Conflict => "23505",
        ErrorKind::Upstream => "58000",
    }
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}

#[async_trait]
impl SimpleQueryHandler for FleetbookHandler {
    async fn do_query<C>(&self, _client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(vec![self.run(query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct FleetbookQueryParser;

#[async_trait]
impl QueryParser for FleetbookQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(schema_for_sql(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for FleetbookHandler {
    type Statement = String;
    type QueryParser = FleetbookQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = substitute_params(portal);
        self.run(&sql).await
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            schema_for_sql(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(schema_for_sql(
            &target.statement.statement,
        )))
    }
}

/// Highest `$N` placeholder in the statement.
fn count_params(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if let Ok(n) = sql[start..i].parse::<usize>() {
            max = max.max(n);
        }
    }
    max
}

/// Inline bound text parameters as quoted literals. Highest index first so
/// `$1` never clobbers `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let mut sql = portal.statement.statement.clone();
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        let value = match param {
            Some(bytes) => format!("'{}'", String::from_utf8_lossy(bytes).replace('\'', "''")),
            None => "NULL".to_string(),
        };
        sql = sql.replace(&format!("${}", i + 1), &value);
    }
    sql
}

// ── Factory ──────────────────────────────────────────────────────

pub struct FleetbookFactory {
    handler: Arc<FleetbookHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<FleetbookAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl FleetbookFactory {
    pub fn new(service: Arc<BookingService>, password: String, diagnostics: bool) -> Self {
        Self {
            handler: Arc::new(FleetbookHandler::new(service, diagnostics)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                FleetbookAuthSource::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for FleetbookFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client socket until it disconnects.
pub async fn process_connection(
    socket: TcpStream,
    service: Arc<BookingService>,
    password: String,
    tls: Option<TlsAcceptor>,
    diagnostics: bool,
) -> std::io::Result<()> {
    let factory = FleetbookFactory::new(service, password, diagnostics);
    pgwire::tokio::process_socket(socket, tls, factory).await
}
