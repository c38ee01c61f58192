//! 스크립트 기반 스텁 클러스터 (테스트 전용)
//!
//! 주소별 [`StubServer`]에 ROUTE / RUN / BEGIN / COMMIT 응답을 순서대로
//! 등록합니다. 마지막으로 남은 응답은 계속 반복됩니다.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::address::ServerAddress;
use super::connector::{
    ConnectSettings, Connection, Connector, ProtocolVersion, RequestContext, RoutingReply,
    RunResponse,
};
use super::error::{DriverError, DriverResult};
use super::session::Query;
use super::types::Value;

/// 순서대로 소비되는 응답 목록
struct Script<T: Clone> {
    entries: Mutex<VecDeque<T>>,
}

impl<T: Clone> Script<T> {
    fn new() -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
        }
    }

    fn push(&self, entry: T) {
        self.entries.lock().push_back(entry);
    }

    fn next(&self) -> Option<T> {
        let mut entries = self.entries.lock();
        if entries.len() > 1 {
            entries.pop_front()
        } else {
            entries.front().cloned()
        }
    }
}

// ============================================================================
// StubCluster
// ============================================================================

/// 스텁 클러스터 (Connector 구현)
pub(crate) struct StubCluster {
    servers: Mutex<HashMap<ServerAddress, Arc<StubServer>>>,
}

impl StubCluster {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            servers: Mutex::new(HashMap::new()),
        })
    }

    /// 주소의 서버 (없으면 생성)
    pub(crate) fn server(&self, address: &str) -> Arc<StubServer> {
        let address = ServerAddress::parse(address).unwrap();
        let mut servers = self.servers.lock();
        Arc::clone(
            servers
                .entry(address.clone())
                .or_insert_with(|| Arc::new(StubServer::new(address))),
        )
    }
}

#[async_trait]
impl Connector for StubCluster {
    async fn open(
        &self,
        address: &ServerAddress,
        settings: &ConnectSettings,
    ) -> DriverResult<Box<dyn Connection>> {
        let server = self.servers.lock().get(address).cloned();
        match server {
            Some(server) if !server.refusing.load(Ordering::SeqCst) => {
                server.accepts.fetch_add(1, Ordering::SeqCst);
                server.connect_settings.lock().push(settings.clone());
                let agent = server.agent.lock().clone();
                Ok(Box::new(StubConnection {
                    server,
                    agent,
                    healthy: true,
                }))
            }
            _ => Err(DriverError::connection(format!(
                "Connection refused: {}",
                address
            ))),
        }
    }
}

// ============================================================================
// StubServer
// ============================================================================

/// 스크립트 서버
pub(crate) struct StubServer {
    address: ServerAddress,
    protocol_version: Mutex<ProtocolVersion>,
    agent: Mutex<String>,
    refusing: AtomicBool,
    route_delay: Mutex<Option<Duration>>,

    routes: Script<DriverResult<RoutingReply>>,
    routes_by_db: Mutex<HashMap<String, Arc<Script<DriverResult<RoutingReply>>>>>,
    runs: Script<DriverResult<RunResponse>>,
    begins: Script<DriverResult<()>>,
    commits: Script<DriverResult<Option<String>>>,

    accepts: AtomicUsize,
    route_calls: AtomicUsize,
    run_calls: AtomicUsize,
    begin_calls: AtomicUsize,
    commit_calls: AtomicUsize,
    rollback_calls: AtomicUsize,

    connect_settings: Mutex<Vec<ConnectSettings>>,
    route_bookmarks: Mutex<Vec<Vec<String>>>,
    route_contexts: Mutex<Vec<HashMap<String, String>>>,
    route_databases: Mutex<Vec<Option<String>>>,
    begin_bookmarks: Mutex<Vec<Vec<String>>>,
    run_bookmarks: Mutex<Vec<Vec<String>>>,
}

impl StubServer {
    fn new(address: ServerAddress) -> Self {
        Self {
            address,
            protocol_version: Mutex::new(ProtocolVersion::V4_3),
            agent: Mutex::new("Zeta4G/4.3.0".to_string()),
            refusing: AtomicBool::new(false),
            route_delay: Mutex::new(None),
            routes: Script::new(),
            routes_by_db: Mutex::new(HashMap::new()),
            runs: Script::new(),
            begins: Script::new(),
            commits: Script::new(),
            accepts: AtomicUsize::new(0),
            route_calls: AtomicUsize::new(0),
            run_calls: AtomicUsize::new(0),
            begin_calls: AtomicUsize::new(0),
            commit_calls: AtomicUsize::new(0),
            rollback_calls: AtomicUsize::new(0),
            connect_settings: Mutex::new(Vec::new()),
            route_bookmarks: Mutex::new(Vec::new()),
            route_contexts: Mutex::new(Vec::new()),
            route_databases: Mutex::new(Vec::new()),
            begin_bookmarks: Mutex::new(Vec::new()),
            run_bookmarks: Mutex::new(Vec::new()),
        }
    }

    // ------------------------------------------------------------------
    // 스크립트
    // ------------------------------------------------------------------

    pub(crate) fn route_reply(&self, reply: RoutingReply) -> &Self {
        self.routes.push(Ok(reply));
        self
    }

    pub(crate) fn route_failure(&self, err: DriverError) -> &Self {
        self.routes.push(Err(err));
        self
    }

    /// 특정 데이터베이스에 대한 ROUTE 응답
    pub(crate) fn route_result_for(&self, database: &str, result: DriverResult<RoutingReply>) -> &Self {
        let script = Arc::clone(
            self.routes_by_db
                .lock()
                .entry(database.to_string())
                .or_insert_with(|| Arc::new(Script::new())),
        );
        script.push(result);
        self
    }

    pub(crate) fn run_reply(&self, response: RunResponse) -> &Self {
        self.runs.push(Ok(response));
        self
    }

    pub(crate) fn run_failure(&self, err: DriverError) -> &Self {
        self.runs.push(Err(err));
        self
    }

    pub(crate) fn begin_failure(&self, err: DriverError) -> &Self {
        self.begins.push(Err(err));
        self
    }

    pub(crate) fn commit_bookmark(&self, bookmark: &str) -> &Self {
        self.commits.push(Ok(Some(bookmark.to_string())));
        self
    }

    pub(crate) fn commit_failure(&self, err: DriverError) -> &Self {
        self.commits.push(Err(err));
        self
    }

    pub(crate) fn with_protocol(&self, version: ProtocolVersion) -> &Self {
        *self.protocol_version.lock() = version;
        self
    }

    pub(crate) fn with_agent(&self, agent: &str) -> &Self {
        *self.agent.lock() = agent.to_string();
        self
    }

    pub(crate) fn with_route_delay(&self, delay: Duration) -> &Self {
        *self.route_delay.lock() = Some(delay);
        self
    }

    /// 이후 연결 거부
    pub(crate) fn refuse(&self) -> &Self {
        self.refusing.store(true, Ordering::SeqCst);
        self
    }

    // ------------------------------------------------------------------
    // 관찰
    // ------------------------------------------------------------------

    pub(crate) fn accepts(&self) -> usize {
        self.accepts.load(Ordering::SeqCst)
    }

    pub(crate) fn route_calls(&self) -> usize {
        self.route_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn run_calls(&self) -> usize {
        self.run_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn begin_calls(&self) -> usize {
        self.begin_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn commit_calls(&self) -> usize {
        self.commit_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn rollback_calls(&self) -> usize {
        self.rollback_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn connect_settings(&self) -> Vec<ConnectSettings> {
        self.connect_settings.lock().clone()
    }

    pub(crate) fn route_bookmarks(&self) -> Vec<Vec<String>> {
        self.route_bookmarks.lock().clone()
    }

    pub(crate) fn route_contexts(&self) -> Vec<HashMap<String, String>> {
        self.route_contexts.lock().clone()
    }

    pub(crate) fn route_databases(&self) -> Vec<Option<String>> {
        self.route_databases.lock().clone()
    }

    pub(crate) fn begin_bookmarks(&self) -> Vec<Vec<String>> {
        self.begin_bookmarks.lock().clone()
    }

    pub(crate) fn run_bookmarks(&self) -> Vec<Vec<String>> {
        self.run_bookmarks.lock().clone()
    }

    fn next_route(&self, database: Option<&str>) -> DriverResult<RoutingReply> {
        let by_db = self
            .routes_by_db
            .lock()
            .get(database.unwrap_or(""))
            .cloned();
        by_db
            .and_then(|script| script.next())
            .or_else(|| self.routes.next())
            .unwrap_or_else(|| {
                Err(DriverError::server(
                    "Neo.ClientError.Procedure.ProcedureNotFound",
                    "There is no procedure with the name `dbms.routing.getRoutingTable`",
                ))
            })
    }
}

// ============================================================================
// StubConnection
// ============================================================================

struct StubConnection {
    server: Arc<StubServer>,
    agent: String,
    healthy: bool,
}

impl StubConnection {
    fn observe<T>(&mut self, result: DriverResult<T>) -> DriverResult<T> {
        if let Err(e) = &result {
            if e.is_connection_failure() {
                self.healthy = false;
            }
        }
        result
    }
}

#[async_trait]
impl Connection for StubConnection {
    fn address(&self) -> &ServerAddress {
        &self.server.address
    }

    fn protocol_version(&self) -> ProtocolVersion {
        *self.server.protocol_version.lock()
    }

    fn server_agent(&self) -> &str {
        &self.agent
    }

    fn is_healthy(&self) -> bool {
        self.healthy
    }

    async fn route(
        &mut self,
        routing_context: &HashMap<String, String>,
        database: Option<&str>,
        bookmarks: &[String],
    ) -> DriverResult<RoutingReply> {
        let delay = *self.server.route_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.server.route_calls.fetch_add(1, Ordering::SeqCst);
        self.server.route_bookmarks.lock().push(bookmarks.to_vec());
        self.server.route_contexts.lock().push(routing_context.clone());
        self.server
            .route_databases
            .lock()
            .push(database.map(str::to_string));

        let result = self.server.next_route(database);
        self.observe(result)
    }

    async fn run(&mut self, _query: &Query, request: &RequestContext) -> DriverResult<RunResponse> {
        self.server.run_calls.fetch_add(1, Ordering::SeqCst);
        self.server.run_bookmarks.lock().push(request.bookmarks.clone());
        let result = self.server.runs.next().unwrap_or_else(|| Ok(RunResponse::default()));
        self.observe(result)
    }

    async fn begin(&mut self, request: &RequestContext) -> DriverResult<()> {
        self.server.begin_calls.fetch_add(1, Ordering::SeqCst);
        self.server.begin_bookmarks.lock().push(request.bookmarks.clone());
        let result = self.server.begins.next().unwrap_or(Ok(()));
        self.observe(result)
    }

    async fn run_in_transaction(&mut self, _query: &Query) -> DriverResult<RunResponse> {
        self.server.run_calls.fetch_add(1, Ordering::SeqCst);
        let result = self.server.runs.next().unwrap_or_else(|| Ok(RunResponse::default()));
        self.observe(result)
    }

    async fn commit(&mut self) -> DriverResult<Option<String>> {
        self.server.commit_calls.fetch_add(1, Ordering::SeqCst);
        let result = self.server.commits.next().unwrap_or(Ok(None));
        self.observe(result)
    }

    async fn rollback(&mut self) -> DriverResult<()> {
        self.server.rollback_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&mut self) {
        self.healthy = false;
    }
}

// ============================================================================
// 헬퍼
// ============================================================================

/// 라우팅 응답 생성
pub(crate) fn routing_reply(
    ttl: u64,
    routers: &[&str],
    readers: &[&str],
    writers: &[&str],
) -> RoutingReply {
    RoutingReply::from_roles(
        ttl,
        vec![
            ("ROUTE", routers.to_vec()),
            ("READ", readers.to_vec()),
            ("WRITE", writers.to_vec()),
        ],
    )
}

/// 단일 컬럼 정수 레코드 응답
pub(crate) fn int_records(key: &str, values: &[i64]) -> RunResponse {
    RunResponse {
        keys: vec![key.to_string()],
        records: values.iter().map(|v| vec![Value::Integer(*v)]).collect(),
        bookmark: None,
        database: None,
    }
}
