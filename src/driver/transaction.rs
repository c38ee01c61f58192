//! Transaction API
//!
//! 명시적 트랜잭션. 재시도 실행기가 작업 클로저에 넘길 수 있도록 복제
//! 가능한 핸들이며, 모든 복제본이 같은 연결과 상태를 공유합니다.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::address::ServerAddress;
use super::bookmarks::{Bookmark, BookmarkManager};
use super::connector::RequestContext;
use super::error::{DriverError, DriverResult};
use super::record::{QueryResult, ServerInfo};
use super::registry::ConnectionLease;
use super::session::Query;
use super::types::Value;

// ============================================================================
// TransactionConfig - 트랜잭션 설정
// ============================================================================

/// 트랜잭션 설정
#[derive(Debug, Clone, Default)]
pub struct TransactionConfig {
    /// 타임아웃
    pub timeout: Option<Duration>,
    /// 메타데이터
    pub metadata: HashMap<String, Value>,
}

impl TransactionConfig {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 타임아웃 설정
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// 메타데이터 추가
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

// ============================================================================
// TransactionState - 트랜잭션 상태
// ============================================================================

/// 트랜잭션 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// 활성 상태
    Active,
    /// 커밋됨
    Committed,
    /// 롤백됨
    RolledBack,
    /// 실패 (커밋 시 실패 원인을 다시 보고)
    Failed,
}

impl TransactionState {
    /// 완료 상태 여부
    pub fn is_terminated(&self) -> bool {
        !matches!(self, Self::Active)
    }
}

// ============================================================================
// Transaction - 트랜잭션
// ============================================================================

struct TransactionInner {
    lease: Option<ConnectionLease>,
    state: TransactionState,
    deferred: Option<DriverError>,
}

impl TransactionInner {
    fn ensure_active(&self) -> DriverResult<()> {
        match self.state {
            TransactionState::Active => Ok(()),
            TransactionState::Committed => {
                Err(DriverError::transaction("Transaction already committed"))
            }
            TransactionState::RolledBack => {
                Err(DriverError::transaction("Transaction already rolled back"))
            }
            TransactionState::Failed => Err(self
                .deferred
                .clone()
                .unwrap_or_else(|| DriverError::transaction("Transaction in failed state"))),
        }
    }

    fn lease(&mut self) -> DriverResult<&mut ConnectionLease> {
        self.lease
            .as_mut()
            .ok_or_else(|| DriverError::transaction("No connection available"))
    }

    fn fail(&mut self, err: &DriverError) {
        self.state = TransactionState::Failed;
        self.deferred = Some(err.clone());
    }

    /// 연결 반환 (정상 종료 시에만 재사용)
    fn release(&mut self, reusable: bool) {
        if let Some(mut lease) = self.lease.take() {
            lease.set_reusable(reusable);
        }
    }
}

/// 명시적 트랜잭션
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<tokio::sync::Mutex<TransactionInner>>,
    bookmarks: Arc<parking_lot::Mutex<BookmarkManager>>,
    server: ServerInfo,
    database: String,
}

impl Transaction {
    /// 트랜잭션 시작 (BEGIN)
    pub(crate) async fn begin(
        mut lease: ConnectionLease,
        config: TransactionConfig,
        mut request: RequestContext,
        bookmarks: Arc<parking_lot::Mutex<BookmarkManager>>,
    ) -> DriverResult<Self> {
        lease.set_reusable(false);
        request.metadata.extend(config.metadata);

        let address = lease.address().clone();
        let connection = lease.connection()?;
        let server = ServerInfo {
            address,
            agent: connection.server_agent().to_string(),
            protocol_version: connection.protocol_version(),
        };
        connection.begin(&request).await?;

        Ok(Self {
            inner: Arc::new(tokio::sync::Mutex::new(TransactionInner {
                lease: Some(lease),
                state: TransactionState::Active,
                deferred: None,
            })),
            bookmarks,
            server,
            database: request.database.unwrap_or_default(),
        })
    }

    /// 쿼리 실행
    ///
    /// 실패하면 트랜잭션은 Failed 상태가 되고, 이후 `commit`이 같은 에러를
    /// 다시 보고합니다.
    pub async fn run(&self, query: impl Into<Query>) -> DriverResult<QueryResult> {
        let query = query.into();
        let mut inner = self.inner.lock().await;
        inner.ensure_active()?;

        let result = inner.lease()?.connection()?.run_in_transaction(&query).await;
        match result {
            Ok(response) => Ok(QueryResult::from_response(response, self.server.clone())),
            Err(e) => {
                inner.fail(&e);
                Err(e)
            }
        }
    }

    /// 커밋
    ///
    /// 성공하면 서버가 돌려준 북마크로 세션 북마크를 교체합니다.
    pub async fn commit(&self) -> DriverResult<Option<Bookmark>> {
        let mut inner = self.inner.lock().await;
        if let Err(e) = inner.ensure_active() {
            inner.release(false);
            return Err(e);
        }

        let result = inner.lease()?.connection()?.commit().await;
        match result {
            Ok(bookmark) => {
                inner.state = TransactionState::Committed;
                inner.release(true);
                self.bookmarks.lock().update_from_server(bookmark.clone());
                Ok(bookmark.map(|b| Bookmark::for_database(b, self.database.clone())))
            }
            Err(e) => {
                inner.fail(&e);
                inner.release(false);
                Err(e)
            }
        }
    }

    /// 롤백
    pub async fn rollback(&self) -> DriverResult<()> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            TransactionState::Active => {}
            TransactionState::Failed => {
                inner.release(false);
                return Ok(());
            }
            TransactionState::Committed | TransactionState::RolledBack => return Ok(()),
        }

        let result = inner.lease()?.connection()?.rollback().await;
        match result {
            Ok(()) => {
                inner.state = TransactionState::RolledBack;
                inner.release(true);
                Ok(())
            }
            Err(e) => {
                inner.fail(&e);
                inner.release(false);
                Err(e)
            }
        }
    }

    /// 트랜잭션 닫기 (활성 상태면 롤백)
    pub async fn close(&self) -> DriverResult<()> {
        self.rollback().await
    }

    /// 트랜잭션 상태
    pub async fn state(&self) -> TransactionState {
        self.inner.lock().await.state
    }

    /// 트랜잭션이 실행 중인 서버
    pub fn server(&self) -> &ServerInfo {
        &self.server
    }

    /// 서버 주소
    pub fn server_address(&self) -> &ServerAddress {
        &self.server.address
    }

    /// 데이터베이스 ("" = 기본 데이터베이스)
    pub fn database(&self) -> &str {
        &self.database
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("database", &self.database)
            .field("server", &self.server.address)
            .finish()
    }
}
