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
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldInfo,
    QueryResponse, Response,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use tokio::net::TcpStream;

use crate::arrival::ArrivalResolver;
use crate::engine::{Engine, ParkError};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, SqlError};

pub struct ParkHandler {
    engine: Arc<Engine>,
    resolver: Arc<ArrivalResolver>,
    query_parser: Arc<ParkQueryParser>,
}

impl ParkHandler {
    pub fn new(resolver: Arc<ArrivalResolver>) -> Self {
        Self {
            engine: resolver.engine().clone(),
            resolver,
            query_parser: Arc::new(ParkQueryParser),
        }
    }

    async fn execute_command(&self, cmd: Command, format: &Format) -> PgWireResult<Response> {
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.dispatch(cmd, format).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn dispatch(&self, cmd: Command, format: &Format) -> PgWireResult<Response> {
        match cmd {
            Command::InsertBooking {
                spot_id,
                start,
                end,
                user_id,
            } => {
                let booking = self
                    .engine
                    .create_booking(&spot_id, start, end, user_id)
                    .await
                    .map_err(park_err)?;
                Ok(booking_rows(vec![booking], format))
            }
            Command::DeleteBooking { id } => {
                let booking = self.engine.cancel_booking(id).await.map_err(park_err)?;
                Ok(booking_rows(vec![booking], format))
            }
            Command::SelectBookings { spot_id } => {
                let bookings = self
                    .engine
                    .list_bookings(spot_id.as_deref())
                    .await
                    .map_err(park_err)?;
                Ok(booking_rows(bookings, format))
            }
            Command::SelectLots { start, end } => {
                let lots = self.engine.search_lots(start, end).await.map_err(park_err)?;
                let schema = Arc::new(lots_schema(format));
                let rows: Vec<PgWireResult<_>> = lots
                    .iter()
                    .map(|lot| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&lot.lot_id)?;
                        encoder.encode_field(&lot.name)?;
                        encoder.encode_field(&lot.location.lat)?;
                        encoder.encode_field(&lot.location.lng)?;
                        encoder.encode_field(&(lot.total_spots as i64))?;
                        encoder.encode_field(&(lot.available_count as i64))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::SelectArrival {
                spot_id,
                arrival,
                user_id,
            } => {
                let outcome = self
                    .resolver
                    .resolve(&spot_id, arrival, &user_id)
                    .await
                    .map_err(park_err)?;
                let payload = serde_json::to_string(&outcome)
                    .map_err(|e| park_err(ParkError::Internal(format!("encode arrival: {e}"))))?;

                let schema = Arc::new(arrival_schema(format));
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&outcome.flow().to_string())?;
                encoder.encode_field(&outcome.message().to_string())?;
                encoder.encode_field(&payload)?;
                let rows = vec![Ok(encoder.take_row())];
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::SelectSpotStatus { spot_id, at } => {
                let status = self.engine.status_at(&spot_id, at).await.map_err(park_err)?;
                let (is_overstay, booking_id, user_id) = match &status {
                    SpotStatus::Free => (false, None, None),
                    SpotStatus::Occupied { booking, is_overstay } => {
                        (*is_overstay, Some(booking.id as i64), Some(booking.user_id.clone()))
                    }
                };

                let schema = Arc::new(spot_status_schema(format));
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&spot_id)?;
                encoder.encode_field(&status.label().to_string())?;
                encoder.encode_field(&is_overstay)?;
                encoder.encode_field(&booking_id)?;
                encoder.encode_field(&user_id)?;
                let rows = vec![Ok(encoder.take_row())];
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::SelectHealth => {
                let schema = Arc::new(health_schema(format));
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&"ok".to_string())?;
                encoder.encode_field(&"parkpredict".to_string())?;
                encoder.encode_field(&(self.engine.booking_count() as i64))?;
                let rows = vec![Ok(encoder.take_row())];
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
        }
    }
}

fn booking_rows(bookings: Vec<Booking>, format: &Format) -> Response {
    let schema = Arc::new(booking_schema(format));
    let rows: Vec<PgWireResult<_>> = bookings
        .iter()
        .map(|b| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&(b.id as i64))?;
            encoder.encode_field(&b.spot_id)?;
            encoder.encode_field(&b.user_id)?;
            encoder.encode_field(&b.start)?;
            encoder.encode_field(&b.end)?;
            encoder.encode_field(&b.actual_departure)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

// ── Result schemas ───────────────────────────────────────────────

fn fields(columns: &[(&str, Type)], format: &Format) -> Vec<FieldInfo> {
    columns
        .iter()
        .enumerate()
        .map(|(i, (name, ty))| {
            FieldInfo::new((*name).into(), None, None, ty.clone(), format.format_for(i))
        })
        .collect()
}

fn booking_schema(format: &Format) -> Vec<FieldInfo> {
    fields(
        &[
            ("id", Type::INT8),
            ("spot_id", Type::VARCHAR),
            ("user_id", Type::VARCHAR),
            ("start", Type::INT8),
            ("end", Type::INT8),
            ("actual_departure", Type::INT8),
        ],
        format,
    )
}

fn lots_schema(format: &Format) -> Vec<FieldInfo> {
    fields(
        &[
            ("lot_id", Type::VARCHAR),
            ("name", Type::VARCHAR),
            ("lat", Type::FLOAT8),
            ("lng", Type::FLOAT8),
            ("total_spots", Type::INT8),
            ("available_count", Type::INT8),
        ],
        format,
    )
}

fn arrival_schema(format: &Format) -> Vec<FieldInfo> {
    fields(
        &[
            ("flow", Type::VARCHAR),
            ("message", Type::VARCHAR),
            ("payload", Type::VARCHAR),
        ],
        format,
    )
}

fn spot_status_schema(format: &Format) -> Vec<FieldInfo> {
    fields(
        &[
            ("spot_id", Type::VARCHAR),
            ("status", Type::VARCHAR),
            ("is_overstay", Type::BOOL),
            ("booking_id", Type::INT8),
            ("user_id", Type::VARCHAR),
        ],
        format,
    )
}

fn health_schema(format: &Format) -> Vec<FieldInfo> {
    fields(
        &[
            ("status", Type::VARCHAR),
            ("service", Type::VARCHAR),
            ("bookings", Type::INT8),
        ],
        format,
    )
}

/// Result columns for a statement that may still contain `$n` placeholders.
fn result_schema(sql: &str, format: &Format) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    let words: Vec<&str> = upper
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .collect();
    match words.first().copied() {
        Some("INSERT") | Some("DELETE") => booking_schema(format),
        Some("SELECT") => {
            let table = words.iter().skip_while(|w| **w != "FROM").nth(1).copied();
            match table {
                Some("BOOKINGS") => booking_schema(format),
                Some("LOTS") => lots_schema(format),
                Some("ARRIVALS") => arrival_schema(format),
                Some("SPOT_STATUS") => spot_status_schema(format),
                Some("HEALTH") => health_schema(format),
                _ => vec![],
            }
        }
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for ParkHandler {
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
        if query.trim().trim_end_matches(';').trim().is_empty() {
            return Ok(vec![Response::EmptyQuery]);
        }
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        Ok(vec![self.execute_command(cmd, &Format::UnifiedText).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct ParkQueryParser;

#[async_trait]
impl QueryParser for ParkQueryParser {
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
        column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt, column_format.unwrap_or(&Format::UnifiedText)))
    }
}

#[async_trait]
impl ExtendedQueryHandler for ParkHandler {
    type Statement = String;
    type QueryParser = ParkQueryParser;

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
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        self.execute_command(cmd, &portal.result_column_format).await
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
            result_schema(&target.statement, &Format::UnifiedText),
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
            &target.result_column_format,
        )))
    }
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
    substitute(&portal.statement.statement, &params)
}

/// Single left-to-right pass; substituted text is never rescanned, so a
/// value containing `$N` stays literal. Placeholders without a bound
/// parameter are left as written.
fn substitute(sql: &str, params: &[Option<String>]) -> String {
    let mut result = String::with_capacity(sql.len());
    let bytes = sql.as_bytes();
    let mut copied = 0;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        let start = i + 1;
        let mut end = start;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
        let param = sql[start..end]
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|idx| params.get(idx));
        match param {
            Some(param) => {
                result.push_str(&sql[copied..i]);
                match param {
                    Some(text) => {
                        result.push('\'');
                        result.push_str(&text.replace('\'', "''"));
                        result.push('\'');
                    }
                    None => result.push_str("NULL"),
                }
                copied = end;
                i = end;
            }
            None => i = end,
        }
    }
    result.push_str(&sql[copied..]);
    result
}

// ── Factory ──────────────────────────────────────────────────────

impl NoopStartupHandler for ParkHandler {}

pub struct ParkFactory {
    handler: Arc<ParkHandler>,
    noop: Arc<NoopHandler>,
}

impl ParkFactory {
    pub fn new(resolver: Arc<ArrivalResolver>) -> Self {
        Self {
            handler: Arc::new(ParkHandler::new(resolver)),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for ParkFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    resolver: Arc<ArrivalResolver>,
) -> Result<(), std::io::Error> {
    let factory = Arc::new(ParkFactory::new(resolver));
    pgwire::tokio::process_socket(socket, None, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

/// SQLSTATE and client-facing message for an engine error.
fn park_sqlstate(e: &ParkError) -> (&'static str, String) {
    match e {
        ParkError::Validation(_) => ("22023", e.to_string()),
        ParkError::UnknownSpot(_) | ParkError::NotFound(_) => ("P0002", e.to_string()),
        ParkError::Conflict(_) => ("23P01", e.to_string()),
        ParkError::Internal(_) => ("XX000", "an internal error occurred".into()),
    }
}

fn park_err(e: ParkError) -> PgWireError {
    match &e {
        ParkError::Internal(detail) => tracing::error!("internal error: {detail}"),
        other => tracing::debug!(kind = other.kind(), "request rejected: {other}"),
    }
    let (code, message) = park_sqlstate(&e);
    user_error(code, message)
}

fn sql_sqlstate(e: &SqlError) -> &'static str {
    match e {
        SqlError::MissingFilter(_) => "22023",
        _ => "42601",
    }
}

fn sql_err(e: SqlError) -> PgWireError {
    user_error(sql_sqlstate(&e), e.to_string())
}
