use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::noop::NoopStartupHandler;
use pgwire::api::auth::StartupHandler;
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
use tokio::net::TcpStream;

use crate::engine::{Engine, EngineError, ErrorKind, RateSchedule};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, SqlError};
use crate::store::StoreError;

pub struct RoomDeskHandler {
    engine: Arc<Engine>,
    query_parser: Arc<RoomDeskQueryParser>,
}

impl RoomDeskHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(RoomDeskQueryParser),
        }
    }

    /// Parse, execute and record metrics for one statement.
    async fn run(&self, sql_text: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(sql_text).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Response> {
        let engine = &self.engine;
        match cmd {
            Command::SelectRooms => {
                let rooms = engine.list_rooms().await.map_err(engine_err)?;
                let schema = Arc::new(rooms_schema());
                let rows: Vec<PgWireResult<_>> = rooms
                    .iter()
                    .map(|room| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&room.id)?;
                        encoder.encode_field(&room.name)?;
                        encoder.encode_field(&room.base_hourly_rate.to_string())?;
                        encoder.encode_field(&room.capacity.to_string())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::SelectBookings { id: None } => {
                let bookings = engine.list_bookings().await.map_err(engine_err)?;
                Ok(booking_rows(engine.schedule(), &bookings))
            }
            Command::SelectBookings { id: Some(id) } => {
                // Unknown id is an empty result, not an error.
                let bookings = match engine.get_booking(id).await {
                    Ok(b) => vec![b],
                    Err(EngineError::BookingNotFound(_)) => vec![],
                    Err(e) => return Err(engine_err(e)),
                };
                Ok(booking_rows(engine.schedule(), &bookings))
            }
            Command::InsertBooking { request } => {
                let view = engine.create_booking(request).await.map_err(engine_err)?;
                let booking = engine.get_booking(view.id).await.map_err(engine_err)?;
                Ok(booking_rows(engine.schedule(), &[booking]))
            }
            Command::CancelBooking { id } => {
                engine.cancel_booking(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::SelectRoomUsage { from, to } => {
                let usage = engine.room_usage(from, to).await.map_err(engine_err)?;
                let schema = Arc::new(room_usage_schema());
                let rows: Vec<PgWireResult<_>> = usage
                    .iter()
                    .map(|u| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&u.room_id)?;
                        encoder.encode_field(&u.room_name)?;
                        encoder.encode_field(&u.total_hours.to_string())?;
                        encoder.encode_field(&u.total_revenue.to_string())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
        }
    }
}

fn booking_rows(schedule: &RateSchedule, bookings: &[Booking]) -> Response {
    let schema = Arc::new(bookings_schema());
    let rows: Vec<PgWireResult<_>> = bookings
        .iter()
        .map(|b| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&b.id.to_string())?;
            encoder.encode_field(&b.room_id)?;
            encoder.encode_field(&b.user_name)?;
            encoder.encode_field(&schedule.format_rfc3339(b.span.start))?;
            encoder.encode_field(&schedule.format_rfc3339(b.span.end))?;
            encoder.encode_field(&b.total_price.to_string())?;
            encoder.encode_field(&b.status.as_str())?;
            encoder.encode_field(&schedule.format_rfc3339(b.created_at))?;
            encoder.encode_field(&b.cancelled_at.map(|t| schedule.format_rfc3339(t)))?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn rooms_schema() -> Vec<FieldInfo> {
    ["id", "name", "base_hourly_rate", "capacity"]
        .into_iter()
        .map(text_field)
        .collect()
}

fn bookings_schema() -> Vec<FieldInfo> {
    [
        "id",
        "room_id",
        "user_name",
        "start_time",
        "end_time",
        "total_price",
        "status",
        "created_at",
        "cancelled_at",
    ]
    .into_iter()
    .map(text_field)
    .collect()
}

fn room_usage_schema() -> Vec<FieldInfo> {
    ["room_id", "room_name", "total_hours", "total_revenue"]
        .into_iter()
        .map(text_field)
        .collect()
}

/// Result columns for a statement that may still hold `$N` placeholders.
fn result_schema(stmt: &str) -> Vec<FieldInfo> {
    let upper = stmt.to_uppercase();
    if upper.contains("ROOM_USAGE") {
        room_usage_schema()
    } else if upper.contains("SELECT") && upper.contains("ROOMS") {
        rooms_schema()
    } else if upper.contains("BOOKINGS") && (upper.contains("SELECT") || upper.contains("INSERT")) {
        bookings_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for RoomDeskHandler {
    async fn do_query<C>(
        &self,
        _client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
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
pub struct RoomDeskQueryParser;

#[async_trait]
impl QueryParser for RoomDeskQueryParser {
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
        param_types(stmt)
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for RoomDeskHandler {
    type Statement = String;
    type QueryParser = RoomDeskQueryParser;

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
        Ok(DescribeStatementResponse::new(
            param_types(&target.statement)?,
            result_schema(&target.statement),
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
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
        )))
    }
}

/// Bind messages carry a 16-bit parameter count.
const MAX_PARAMS: usize = u16::MAX as usize;

fn param_types(stmt: &str) -> PgWireResult<Vec<Type>> {
    let n = count_params(stmt);
    if n > MAX_PARAMS {
        return Err(user_error(
            "42601",
            format!("too many parameters: ${n} (at most {MAX_PARAMS})"),
        ));
    }
    Ok(vec![Type::VARCHAR; n])
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start
                && let Ok(n) = sql[start..i].parse::<usize>()
            {
                max = max.max(n);
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let params: Vec<Option<String>> = portal
        .parameters
        .iter()
        .map(|p| p.as_ref().map(|bytes| String::from_utf8_lossy(bytes).into_owned()))
        .collect();
    substitute_text(&portal.statement.statement, &params)
}

fn substitute_text(sql: &str, params: &[Option<String>]) -> String {
    let mut result = sql.to_string();
    // Highest index first so $1 never clobbers the prefix of $10.
    for (i, param) in params.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(text) => format!("'{}'", text.replace('\'', "''")),
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct RoomDeskFactory {
    handler: Arc<RoomDeskHandler>,
    startup: Arc<TrustStartup>,
    noop: Arc<NoopHandler>,
}

/// Accepts every startup without credentials.
pub struct TrustStartup;

impl NoopStartupHandler for TrustStartup {}

impl RoomDeskFactory {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            handler: Arc::new(RoomDeskHandler::new(engine)),
            startup: Arc::new(TrustStartup),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for RoomDeskFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.startup.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(socket: TcpStream, engine: Arc<Engine>) -> std::io::Result<()> {
    let factory = Arc::new(RoomDeskFactory::new(engine));
    pgwire::tokio::process_socket(socket, None, factory).await
}

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

/// SQLSTATE by error kind.
fn engine_sqlstate(e: &EngineError) -> &'static str {
    match e.kind() {
        ErrorKind::Validation => "22023",
        ErrorKind::NotFound => "P0002",
        ErrorKind::Conflict => "23P01",
        ErrorKind::Store => match e {
            EngineError::Store(StoreError::Timeout(_)) => "57014",
            _ => "58000",
        },
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    if e.kind() == ErrorKind::Store {
        tracing::warn!("store failure: {e}");
    }
    user_error(engine_sqlstate(&e), e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    let code = match e {
        SqlError::BadTimestamp(_) => "22007",
        _ => "42601",
    };
    user_error(code, e.to_string())
}
