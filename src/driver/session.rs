//! 세션 관리
//!
//! 세션은 한 번에 하나의 작업만 순차적으로 실행합니다. 드라이버의 라우팅
//! 테이블 캐시와 연결 레지스트리를 공유하며, 인과적 일관성 북마크를
//! 세션 단위로 이어갑니다.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use super::address::ServerAddress;
use super::bookmarks::{Bookmark, BookmarkManager};
use super::classify::{classify, Classification};
use super::connector::RequestContext;
use super::driver::DriverCore;
use super::error::{DiscoveryErrorKind, DriverError, DriverResult};
use super::record::{QueryResult, ServerInfo};
use super::registry::ConnectionLease;
use super::retry::WorkContext;
use super::transaction::{Transaction, TransactionConfig};
use super::types::Value;

// ============================================================================
// AccessMode - 접근 모드
// ============================================================================

/// 접근 모드
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    /// 읽기
    #[default]
    Read,
    /// 쓰기
    Write,
}

impl AccessMode {
    /// 모드 이름
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessMode::Read => "READ",
            AccessMode::Write => "WRITE",
        }
    }
}

// ============================================================================
// SessionConfig - 세션 설정
// ============================================================================

/// 세션 설정
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// 데이터베이스 이름 (None = 서버 기본 데이터베이스)
    pub database: Option<String>,
    /// Fetch Size (None = 드라이버 설정 사용)
    pub fetch_size: Option<usize>,
    /// 기본 접근 모드
    pub default_access_mode: AccessMode,
    /// 초기 북마크
    pub bookmarks: Vec<Bookmark>,
}

impl SessionConfig {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 빌더 시작
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::new()
    }

    /// 데이터베이스 설정
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Fetch Size 설정
    pub fn with_fetch_size(mut self, size: usize) -> Self {
        self.fetch_size = Some(size);
        self
    }

    /// 접근 모드 설정
    pub fn with_access_mode(mut self, mode: AccessMode) -> Self {
        self.default_access_mode = mode;
        self
    }

    /// 북마크 설정
    pub fn with_bookmarks(mut self, bookmarks: Vec<Bookmark>) -> Self {
        self.bookmarks = bookmarks;
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            database: None,
            fetch_size: None,
            default_access_mode: AccessMode::Write,
            bookmarks: Vec::new(),
        }
    }
}

// ============================================================================
// SessionConfigBuilder - 세션 설정 빌더
// ============================================================================

/// 세션 설정 빌더
#[derive(Debug, Default)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    /// 새 빌더 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 데이터베이스 설정
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.config.database = Some(database.into());
        self
    }

    /// Fetch Size 설정
    pub fn with_fetch_size(mut self, size: usize) -> Self {
        self.config.fetch_size = Some(size);
        self
    }

    /// 읽기 모드로 설정
    pub fn with_read_access(mut self) -> Self {
        self.config.default_access_mode = AccessMode::Read;
        self
    }

    /// 쓰기 모드로 설정
    pub fn with_write_access(mut self) -> Self {
        self.config.default_access_mode = AccessMode::Write;
        self
    }

    /// 북마크 설정
    pub fn with_bookmarks(mut self, bookmarks: Vec<Bookmark>) -> Self {
        self.config.bookmarks = bookmarks;
        self
    }

    /// 북마크 추가
    pub fn with_bookmark(mut self, bookmark: impl Into<Bookmark>) -> Self {
        self.config.bookmarks.push(bookmark.into());
        self
    }

    /// 빌드
    pub fn build(self) -> SessionConfig {
        self.config
    }
}

// ============================================================================
// Query - 쿼리
// ============================================================================

/// 쿼리
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// 쿼리 텍스트
    pub text: String,
    /// 파라미터
    pub parameters: HashMap<String, Value>,
}

impl Query {
    /// 새 쿼리 생성
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            parameters: HashMap::new(),
        }
    }

    /// 파라미터 추가
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// 파라미터들 추가
    pub fn with_params(mut self, params: HashMap<String, Value>) -> Self {
        self.parameters.extend(params);
        self
    }
}

impl From<&str> for Query {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Query {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

// ============================================================================
// Session - 세션
// ============================================================================

/// 데이터베이스 세션
pub struct Session {
    /// 드라이버 공유 상태
    core: Arc<DriverCore>,
    /// 세션 설정
    config: SessionConfig,
    /// 대상 데이터베이스 ("" = 기본 데이터베이스)
    database: String,
    /// 세션 북마크
    bookmarks: Arc<Mutex<BookmarkManager>>,
    /// 닫힐 때 진행 중인 작업을 중단시키는 토큰
    cancel: CancellationToken,
    /// 열린 상태
    open: RwLock<bool>,
}

impl Session {
    /// 새 세션 생성
    pub(crate) fn new(core: Arc<DriverCore>, config: SessionConfig) -> Self {
        let database = config.database.clone().unwrap_or_default();
        let bookmarks = BookmarkManager::with_bookmarks(database.clone(), config.bookmarks.clone());

        Self {
            core,
            config,
            database,
            bookmarks: Arc::new(Mutex::new(bookmarks)),
            cancel: CancellationToken::new(),
            open: RwLock::new(true),
        }
    }

    /// 쿼리 실행 (auto-commit)
    ///
    /// 재시도하지 않습니다. 클러스터 구성 관련 실패는 해당 서버를 잊고
    /// `SessionExpired`로 보고합니다.
    pub async fn run(
        &self,
        query: impl Into<Query>,
        params: Option<HashMap<String, Value>>,
    ) -> DriverResult<QueryResult> {
        self.ensure_open()?;

        let mut query = query.into();
        if let Some(p) = params {
            query = query.with_params(p);
        }

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(DriverError::cancelled("Session closed during query")),
            result = self.run_auto_commit(&query) => result,
        }
    }

    async fn run_auto_commit(&self, query: &Query) -> DriverResult<QueryResult> {
        let mode = self.config.default_access_mode;
        let mut lease = self.acquire(mode).await?;
        let address = lease.address().clone();

        let request = self.request_context(mode);
        let connection = lease.connection()?;
        let server = ServerInfo {
            address: address.clone(),
            agent: connection.server_agent().to_string(),
            protocol_version: connection.protocol_version(),
        };

        match connection.run(query, &request).await {
            Ok(response) => {
                self.bookmarks.lock().update_from_server(response.bookmark.clone());
                Ok(QueryResult::from_response(response, server))
            }
            Err(e) => {
                lease.set_reusable(false);
                Err(self.on_server_failure(&address, e))
            }
        }
    }

    /// 트랜잭션 시작
    pub async fn begin_transaction(
        &self,
        config: Option<TransactionConfig>,
    ) -> DriverResult<Transaction> {
        self.ensure_open()?;

        let mode = self.config.default_access_mode;
        let lease = self.acquire(mode).await?;
        let address = lease.address().clone();

        Transaction::begin(
            lease,
            config.unwrap_or_default(),
            self.request_context(mode),
            Arc::clone(&self.bookmarks),
        )
        .await
        .map_err(|e| self.on_server_failure(&address, e))
    }

    /// 읽기 트랜잭션 함수 (재시도 포함)
    pub async fn read_transaction<F, Fut, T>(&self, work: F) -> DriverResult<T>
    where
        F: FnMut(Transaction) -> Fut,
        Fut: Future<Output = DriverResult<T>>,
    {
        self.execute_transaction(AccessMode::Read, TransactionConfig::default(), work)
            .await
    }

    /// 쓰기 트랜잭션 함수 (재시도 포함)
    pub async fn write_transaction<F, Fut, T>(&self, work: F) -> DriverResult<T>
    where
        F: FnMut(Transaction) -> Fut,
        Fut: Future<Output = DriverResult<T>>,
    {
        self.execute_transaction(AccessMode::Write, TransactionConfig::default(), work)
            .await
    }

    /// 트랜잭션 함수 실행
    ///
    /// 작업은 재시도마다 새 트랜잭션으로 처음부터 다시 실행됩니다.
    pub async fn execute_transaction<F, Fut, T>(
        &self,
        mode: AccessMode,
        tx_config: TransactionConfig,
        work: F,
    ) -> DriverResult<T>
    where
        F: FnMut(Transaction) -> Fut,
        Fut: Future<Output = DriverResult<T>>,
    {
        self.ensure_open()?;

        let wc = WorkContext {
            database: self.database.clone(),
            mode,
            bookmarks: Arc::clone(&self.bookmarks),
            tx_config,
            fetch_size: self.fetch_size(),
            cancel: self.cancel.clone(),
        };
        self.core.executor.run(&wc, work).await
    }

    /// 마지막 북마크
    pub fn last_bookmark(&self) -> Option<Bookmark> {
        self.bookmarks.lock().snapshot().pop()
    }

    /// 대상 데이터베이스의 모든 북마크
    pub fn last_bookmarks(&self) -> Vec<Bookmark> {
        self.bookmarks.lock().snapshot()
    }

    /// 세션 닫기
    ///
    /// 진행 중인 재시도는 중단되고, 잡고 있던 연결은 반환됩니다.
    pub async fn close(&self) -> DriverResult<()> {
        let mut open = self.open.write();
        if !*open {
            return Ok(());
        }
        *open = false;
        self.cancel.cancel();
        tracing::debug!("Session for database '{}' closed", self.database);
        Ok(())
    }

    /// 열린 상태 여부
    pub fn is_open(&self) -> bool {
        *self.open.read()
    }

    /// 세션 설정
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// 대상 데이터베이스 ("" = 기본 데이터베이스)
    pub fn database(&self) -> &str {
        &self.database
    }

    fn fetch_size(&self) -> usize {
        self.config.fetch_size.unwrap_or(self.core.fetch_size)
    }

    fn request_context(&self, mode: AccessMode) -> RequestContext {
        RequestContext {
            database: (!self.database.is_empty()).then(|| self.database.clone()),
            bookmarks: self.bookmarks.lock().values(),
            mode,
            fetch_size: self.fetch_size(),
            metadata: HashMap::new(),
        }
    }

    /// 라우팅 테이블 조회, 서버 선택, 연결 대여
    async fn acquire(&self, mode: AccessMode) -> DriverResult<ConnectionLease> {
        let route_bookmarks = self.bookmarks.lock().values_for(&self.database);
        let lookup = self
            .core
            .provider
            .get_or_refresh(&self.database, mode, &route_bookmarks, false)
            .await
            .map_err(surface_routing_error)?;

        let address = self
            .core
            .selector
            .select(&lookup.table, mode)
            .map_err(surface_routing_error)?;

        self.core
            .registry
            .acquire(&address)
            .await
            .map_err(|e| self.on_server_failure(&address, e))
    }

    /// 재시도하지 않는 경로의 서버 실패 처리
    fn on_server_failure(&self, address: &ServerAddress, err: DriverError) -> DriverError {
        if classify(&err) != Classification::RetryableRediscover {
            return err;
        }

        tracing::warn!("Forgetting {} after failure on non-retried path: {}", address, err);
        self.core.registry.forget(address);
        DriverError::session_expired(format!("Server at {} is no longer available: {}", address, err))
    }

    fn ensure_open(&self) -> DriverResult<()> {
        if !*self.open.read() {
            return Err(DriverError::session("Session is closed"));
        }
        if !self.core.is_open() {
            return Err(DriverError::session("Driver is closed"));
        }
        Ok(())
    }
}

/// 라우팅 실패를 호출자에게 보일 에러로 변환
fn surface_routing_error(err: DriverError) -> DriverError {
    match err {
        DriverError::Discovery {
            kind: DiscoveryErrorKind::RoutersExhausted,
            message,
        } => DriverError::service_unavailable(message),
        DriverError::Routing { .. } => DriverError::session_expired(err.to_string()),
        other => other,
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("database", &self.database)
            .field("mode", &self.config.default_access_mode)
            .field("open", &*self.open.read())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
