//! Driver Module
//!
//! 클러스터 라우팅 드라이버 코어
//!
//! # 구성
//!
//! - 주소 해석 (ServerAddress, AddressResolver)
//! - 에러 분류 (ServerErrorCode, FailureCondition, Classification)
//! - 연결 레지스트리 (ConnectionRegistry, ConnectionLease)
//! - 라우팅 테이블 조회 / 캐시 / 서버 선택 (routing)
//! - 북마크 관리 (Bookmark, BookmarkManager)
//! - 트랜잭션 재시도 (RetryConfig, TransactionRetryExecutor)
//! - 드라이버 / 세션 / 트랜잭션 API
//!
//! # Example
//!
//! ```ignore
//! use zeta4g_cluster_driver::driver::{Driver, SessionConfig};
//!
//! // 와이어 프로토콜 계층은 Connector 구현으로 주입
//! let driver = Driver::new("zeta4g://server1:7687,server2:7687", connector)?;
//! driver.verify_connectivity().await?;
//!
//! let session = driver.session(SessionConfig::builder().with_database("adb").build())?;
//!
//! // 재시도 포함 쓰기 트랜잭션
//! let count = session.write_transaction(|tx| async move {
//!     let result = tx.run("CREATE (n:Person) RETURN count(n) AS c").await?;
//!     result.single()?.get_as::<i64>("c")
//! }).await?;
//!
//! // 인과적 일관성 북마크
//! let bookmarks = session.last_bookmarks();
//!
//! session.close().await?;
//! driver.close().await?;
//! ```

pub mod routing;
mod address;
mod bookmarks;
mod classify;
mod connector;
mod driver;
mod error;
mod record;
mod registry;
mod retry;
mod session;
mod transaction;
mod types;

#[cfg(test)]
mod stub;

// Re-exports
pub use address::{AddressResolver, NameResolverFn, ResolverFn, ServerAddress, DEFAULT_PORT};
pub use bookmarks::{Bookmark, BookmarkManager, SYSTEM_DATABASE};
pub use classify::{
    classify, classify_discovery, Classification, DiscoveryOutcome, FailureCondition,
    ServerErrorCode,
};
pub use connector::{
    default_user_agent, ConnectSettings, Connection, Connector, ProtocolVersion, RequestContext,
    RoutingReply, RunResponse, TrustStrategy,
};
pub use driver::{
    is_routing_uri, parse_routing_uri, Driver, DriverConfig, DriverConfigBuilder, DriverMetrics,
    RoutingUri, ROUTING_CONTEXT_ADDRESS_KEY,
};
pub use error::{
    DiscoveryErrorKind, DriverError, DriverResult, RoutingErrorKind, DATABASE_NOT_FOUND_CODE,
};
pub use record::{QueryResult, Record, ResultSummary, ServerInfo};
pub use registry::{ConnectionLease, ConnectionRegistry, RegistryMetrics};
pub use retry::{
    decide, AttemptFailure, RetryConfig, RetryContext, RetryDecision, TransactionRetryExecutor,
    WorkContext,
};
pub use session::{AccessMode, Query, Session, SessionConfig, SessionConfigBuilder};
pub use transaction::{Transaction, TransactionConfig, TransactionState};
pub use types::Value;

/// 파라미터 맵 생성 매크로
#[macro_export]
macro_rules! params {
    () => {
        std::collections::HashMap::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = std::collections::HashMap::new();
        $(
            map.insert($key.into(), $crate::driver::Value::from($value));
        )+
        map
    }};
}
