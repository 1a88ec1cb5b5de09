use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
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
use pgwire::messages::data::DataRow;
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::admin::{AdminCommand, AuthenticatedActor, CommandReport, TargetStatus};
use crate::auth::AvaildAuthSource;
use crate::engine::{Engine, EngineError};
use crate::observability;
use crate::sql::{self, Command, SqlError};
use crate::tenant::TenantManager;

pub struct AvaildHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<AvaildQueryParser>,
}

impl AvaildHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(AvaildQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("tenant error: {e}"),
            )))
        })
    }

    fn actor<C: ClientInfo>(client: &C) -> AuthenticatedActor {
        AuthenticatedActor::new(
            client
                .metadata()
                .get("user")
                .cloned()
                .unwrap_or_else(|| "unknown".to_string()),
        )
    }

    async fn run<C: ClientInfo>(&self, client: &C, sql_text: &str) -> PgWireResult<Response> {
        let engine = self.resolve_engine(client)?;
        let cmd = sql::parse_sql(sql_text).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = std::time::Instant::now();

        let result = self.execute_command(&engine, &Self::actor(client), cmd).await;

        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(
        &self,
        engine: &Engine,
        actor: &AuthenticatedActor,
        cmd: Command,
    ) -> PgWireResult<Response> {
        match cmd {
            Command::InsertBlockedDay { date, reason } => {
                admin_write(engine, actor, "INSERT", AdminCommand::BlockFullDay { date, reason }).await
            }
            Command::DeleteBlockedDay { date } => {
                admin_write(engine, actor, "DELETE", AdminCommand::UnblockFullDay { date }).await
            }
            Command::InsertBlockedTimes { date, slots, reason } => {
                let cmd = AdminCommand::BlockTimeSlot { date, slots, reason };
                admin_write(engine, actor, "INSERT", cmd).await
            }
            Command::DeleteBlockedTimes { date, slots } => {
                admin_write(engine, actor, "DELETE", AdminCommand::UnblockTimeSlot { date, slots }).await
            }
            Command::InsertRecurringBlock {
                id,
                day_of_week,
                start_slot,
                end_slot,
                until_date,
                reason,
            } => {
                let cmd = AdminCommand::SetRecurringBlock {
                    id,
                    day_of_week,
                    start_slot,
                    end_slot,
                    until_date,
                    reason,
                };
                admin_write(engine, actor, "INSERT", cmd).await
            }
            Command::DeleteRecurringBlock { id } => {
                admin_write(engine, actor, "DELETE", AdminCommand::RemoveRecurringBlock { id }).await
            }
            Command::AdminCommand { payload } => {
                let cmd: AdminCommand = serde_json::from_str(&payload).map_err(|e| {
                    PgWireError::UserError(Box::new(ErrorInfo::new(
                        "ERROR".into(),
                        "22P02".into(),
                        format!("bad admin command payload: {e}"),
                    )))
                })?;
                let report = engine.admin().handle(actor, cmd).await.map_err(engine_err)?;
                let schema = Arc::new(admin_command_schema());
                let rows: Vec<PgWireResult<DataRow>> = report
                    .results
                    .into_iter()
                    .map(|r| {
                        let (code, message) = match &r.status {
                            TargetStatus::Rejected { code, message } => {
                                (Some(code.to_string()), Some(message.clone()))
                            }
                            _ => (None, None),
                        };
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&r.target)?;
                        encoder.encode_field(&r.status.label())?;
                        encoder.encode_field(&code)?;
                        encoder.encode_field(&message)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(query_response(schema, rows))
            }
            Command::SelectAvailability { range } => {
                let snapshots = engine.resolve(range).await.map_err(engine_err)?;
                let schema = Arc::new(availability_schema());
                let rows: Vec<PgWireResult<DataRow>> = snapshots
                    .into_iter()
                    .map(|snap| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&snap.date.to_string())?;
                        encoder.encode_field(&snap.is_fully_blocked)?;
                        encoder.encode_field(&label_list(&snap.available_slot_labels))?;
                        encoder.encode_field(&label_list(&snap.blocked_slot_labels))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(query_response(schema, rows))
            }
            Command::SelectBlockedDays { range } => {
                let blocks = engine.full_day_block_details(range).await;
                let schema = Arc::new(blocked_days_schema());
                let rows: Vec<PgWireResult<DataRow>> = blocks
                    .into_iter()
                    .map(|b| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&b.date.to_string())?;
                        encoder.encode_field(&b.reason)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(query_response(schema, rows))
            }
            Command::SelectBlockedTimes { range } => {
                let times = engine.blocked_times_in(range).await.map_err(engine_err)?;
                let schema = Arc::new(blocked_times_schema());
                let rows: Vec<PgWireResult<DataRow>> = times
                    .into_iter()
                    .map(|t| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&t.date.to_string())?;
                        encoder.encode_field(&t.slot_label)?;
                        encoder.encode_field(&t.source.as_str())?;
                        encoder.encode_field(&t.reason)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(query_response(schema, rows))
            }
            Command::SelectRecurringBlocks => {
                let blocks = engine.recurring_blocks().await;
                let schema = Arc::new(recurring_blocks_schema());
                let rows: Vec<PgWireResult<DataRow>> = blocks
                    .into_iter()
                    .map(|b| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&b.id.to_string())?;
                        encoder.encode_field(&(b.day_of_week as i32))?;
                        encoder.encode_field(&b.start_slot_label)?;
                        encoder.encode_field(&b.end_slot_label)?;
                        encoder.encode_field(&b.effective_from.to_string())?;
                        encoder.encode_field(&b.effective_until.to_string())?;
                        encoder.encode_field(&b.reason)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(query_response(schema, rows))
            }
            Command::SelectSlots { date } => {
                let schema = Arc::new(slots_schema());
                let rows: Vec<PgWireResult<DataRow>> = engine
                    .catalog
                    .slots_for(date)
                    .iter()
                    .map(|s| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&(s.ordinal as i32))?;
                        encoder.encode_field(&s.label)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(query_response(schema, rows))
            }
        }
    }
}

/// Apply a write through the admin handler. Rows = targets actually changed.
async fn admin_write(
    engine: &Engine,
    actor: &AuthenticatedActor,
    tag: &str,
    cmd: AdminCommand,
) -> PgWireResult<Response> {
    let report = engine.admin().handle(actor, cmd).await.map_err(engine_err)?;
    if !report.all_succeeded() {
        return Err(rejected_err(&report));
    }
    Ok(Response::Execution(Tag::new(tag).with_rows(report.applied())))
}

fn query_response(schema: Arc<Vec<FieldInfo>>, rows: Vec<PgWireResult<DataRow>>) -> Response {
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

/// Slot labels as a JSON array, so labels never need escaping by the client.
fn label_list(labels: &[String]) -> String {
    serde_json::to_string(labels).unwrap_or_else(|_| "[]".into())
}

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        text_field("date"),
        FieldInfo::new("fully_blocked".into(), None, None, Type::BOOL, FieldFormat::Text),
        text_field("available_slots"),
        text_field("blocked_slots"),
    ]
}

fn blocked_days_schema() -> Vec<FieldInfo> {
    vec![text_field("date"), text_field("reason")]
}

fn blocked_times_schema() -> Vec<FieldInfo> {
    vec![
        text_field("date"),
        text_field("slot"),
        text_field("source"),
        text_field("reason"),
    ]
}

fn recurring_blocks_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        FieldInfo::new("day_of_week".into(), None, None, Type::INT4, FieldFormat::Text),
        text_field("start_slot"),
        text_field("end_slot"),
        text_field("effective_from"),
        text_field("effective_until"),
        text_field("reason"),
    ]
}

fn slots_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("ordinal".into(), None, None, Type::INT4, FieldFormat::Text),
        text_field("label"),
    ]
}

fn admin_command_schema() -> Vec<FieldInfo> {
    vec![
        text_field("target"),
        text_field("status"),
        text_field("code"),
        text_field("message"),
    ]
}

/// Result columns for a statement, judged from the table named after FROM.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    if !upper.trim_start().starts_with("SELECT") {
        return vec![];
    }
    let table = upper
        .split_once(" FROM ")
        .and_then(|(_, rest)| rest.split_whitespace().next())
        .map(|t| t.trim_end_matches(';').to_string())
        .unwrap_or_default();
    match table.as_str() {
        "AVAILABILITY" => availability_schema(),
        "BLOCKED_DAYS" => blocked_days_schema(),
        "BLOCKED_TIMES" => blocked_times_schema(),
        "RECURRING_BLOCKS" => recurring_blocks_schema(),
        "SLOTS" => slots_schema(),
        "ADMIN_COMMAND" => admin_command_schema(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for AvaildHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(vec![self.run(client, query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct AvaildQueryParser;

#[async_trait]
impl QueryParser for AvaildQueryParser {
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
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for AvaildHandler {
    type Statement = String;
    type QueryParser = AvaildQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
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
        self.run(client, &sql).await
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

/// `$N` placeholders as `(start, end, n)` byte spans, skipping anything inside
/// quoted literals or identifiers.
fn placeholders(sql: &str) -> Vec<(usize, usize, usize)> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            // A doubled quote closes and immediately reopens the literal.
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'\'' || b == b'"' => quote = Some(b),
            None if b == b'$' => {
                let start = i;
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                if let Ok(n) = sql[start + 1..i].parse::<usize>() {
                    found.push((start, i, n));
                }
                continue;
            }
            None => {}
        }
        i += 1;
    }
    found
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    placeholders(sql).iter().map(|&(_, _, n)| n).max().unwrap_or(0)
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    bind_params(&portal.statement.statement, &portal.parameters)
}

/// Single pass over the statement text: bound values are written straight to
/// the output and never scanned again.
fn bind_params<P: AsRef<[u8]>>(sql: &str, params: &[Option<P>]) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut copied = 0;
    for (start, end, n) in placeholders(sql) {
        let Some(param) = n.checked_sub(1).and_then(|idx| params.get(idx)) else {
            continue;
        };
        result.push_str(&sql[copied..start]);
        match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes.as_ref());
                result.push('\'');
                result.push_str(&text.replace('\'', "''"));
                result.push('\'');
            }
            None => result.push_str("NULL"),
        }
        copied = end;
    }
    result.push_str(&sql[copied..]);
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct AvaildFactory {
    handler: Arc<AvaildHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<AvaildAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl AvaildFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = AvaildAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(AvaildHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for AvaildFactory {
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

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = Arc::new(AvaildFactory::new(tenant_manager, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "P0001".into(),
        format!("{}: {e}", e.code()),
    )))
}

fn rejected_err(report: &CommandReport) -> PgWireError {
    let rejected: Vec<String> = report
        .results
        .iter()
        .filter_map(|r| match &r.status {
            TargetStatus::Rejected { code, message } => Some(format!("{}: {code}: {message}", r.target)),
            _ => None,
        })
        .collect();
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "P0001".into(),
        format!(
            "{} applied, rejected {}",
            report.applied(),
            rejected.join("; ")
        ),
    )))
}

fn sql_err(e: SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
