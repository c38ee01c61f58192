//! 와이어 프로토콜 연결 경계
//!
//! 메시지 인코딩과 핸드셰이크는 이 크레이트 밖의 Bolt 계층이 담당합니다.
//! 드라이버는 [`Connector`]로 서버 연결을 열고, [`Connection`]으로
//! ROUTE / RUN / BEGIN / COMMIT 요청을 보냅니다.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;

use super::address::ServerAddress;
use super::error::DriverResult;
use super::routing::ServerRole;
use super::session::{AccessMode, Query};
use super::types::Value;

// ============================================================================
// ProtocolVersion - 협상된 프로토콜 버전
// ============================================================================

/// 협상된 Bolt 프로토콜 버전
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProtocolVersion {
    /// 메이저 버전
    pub major: u8,
    /// 마이너 버전
    pub minor: u8,
}

impl ProtocolVersion {
    /// Bolt 3.0
    pub const V3_0: Self = Self::new(3, 0);
    /// Bolt 4.0 - 멀티 데이터베이스
    pub const V4_0: Self = Self::new(4, 0);
    /// Bolt 4.3 - ROUTE 메시지
    pub const V4_3: Self = Self::new(4, 3);
    /// Bolt 4.4
    pub const V4_4: Self = Self::new(4, 4);
    /// Bolt 5.0
    pub const V5_0: Self = Self::new(5, 0);

    /// 새 버전 생성
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// 멀티 데이터베이스 지원 여부
    pub fn supports_multi_database(self) -> bool {
        self >= Self::V4_0
    }

    /// ROUTE 메시지 지원 여부
    pub fn supports_route_message(self) -> bool {
        self >= Self::V4_3
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

// ============================================================================
// ConnectSettings - 연결 수립 설정
// ============================================================================

/// TLS 신뢰 전략
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TrustStrategy {
    /// 시스템 인증서 사용
    #[default]
    TrustSystemCas,
    /// 모든 인증서 신뢰 (`+ssc`, 개발용)
    TrustAllCertificates,
    /// 특정 인증서만 신뢰
    TrustCustomCas {
        /// DER 인증서
        certificates: Vec<Vec<u8>>,
    },
}

/// 새 연결마다 [`Connector`]로 전달되는 설정
///
/// 암호화 여부와 신뢰 전략은 전송 계층이, User Agent는 HELLO가 사용합니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectSettings {
    /// HELLO에 실리는 User Agent
    pub user_agent: String,
    /// TLS 암호화
    pub encrypted: bool,
    /// TLS 신뢰 전략
    pub trust_strategy: TrustStrategy,
}

impl Default for ConnectSettings {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            encrypted: false,
            trust_strategy: TrustStrategy::default(),
        }
    }
}

/// 기본 User Agent
pub fn default_user_agent() -> String {
    format!("Zeta4G/{}", env!("CARGO_PKG_VERSION"))
}

// ============================================================================
// RoutingReply - ROUTE 응답
// ============================================================================

/// ROUTE 응답에서 읽은 라우팅 정보
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingReply {
    /// TTL (초)
    pub ttl: u64,
    /// 라우터 주소
    pub routers: Vec<ServerAddress>,
    /// 라이터 주소
    pub writers: Vec<ServerAddress>,
    /// 리더 주소
    pub readers: Vec<ServerAddress>,
    /// 서버가 알려준 데이터베이스 이름
    pub database: Option<String>,
}

impl RoutingReply {
    /// 역할별 주소 문자열 목록에서 생성
    ///
    /// 알 수 없는 역할과 파싱할 수 없는 주소는 건너뜁니다.
    pub fn from_roles<'a, I>(ttl: u64, servers: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, Vec<&'a str>)>,
    {
        let mut reply = Self {
            ttl,
            routers: Vec::new(),
            writers: Vec::new(),
            readers: Vec::new(),
            database: None,
        };

        for (role, addresses) in servers {
            let parsed = addresses
                .into_iter()
                .filter_map(|a| ServerAddress::parse(a).ok());
            match ServerRole::from_str(role) {
                Some(ServerRole::Route) => reply.routers.extend(parsed),
                Some(ServerRole::Write) => reply.writers.extend(parsed),
                Some(ServerRole::Read) => reply.readers.extend(parsed),
                None => {}
            }
        }

        reply
    }

    /// 데이터베이스 이름 설정
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }
}

// ============================================================================
// RequestContext / RunResponse
// ============================================================================

/// RUN / BEGIN 요청에 첨부되는 세션 정보
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// 대상 데이터베이스 (None이면 기본 데이터베이스)
    pub database: Option<String>,
    /// 인과적 일관성 북마크
    pub bookmarks: Vec<String>,
    /// 접근 모드
    pub mode: AccessMode,
    /// Fetch Size
    pub fetch_size: usize,
    /// 트랜잭션 메타데이터
    pub metadata: HashMap<String, Value>,
}

/// RUN + PULL 응답 (전체 결과를 버퍼링)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunResponse {
    /// 컬럼 키
    pub keys: Vec<String>,
    /// 레코드
    pub records: Vec<Vec<Value>>,
    /// auto-commit 완료 시 서버가 돌려준 북마크
    pub bookmark: Option<String>,
    /// 데이터베이스 이름
    pub database: Option<String>,
}

// ============================================================================
// Connector / Connection
// ============================================================================

/// 서버 연결 생성기
#[async_trait]
pub trait Connector: Send + Sync {
    /// 주소로 연결을 열고 핸드셰이크와 인증을 마칩니다.
    async fn open(
        &self,
        address: &ServerAddress,
        settings: &ConnectSettings,
    ) -> DriverResult<Box<dyn Connection>>;
}

/// 열린 서버 연결
#[async_trait]
pub trait Connection: Send {
    /// 연결된 주소
    fn address(&self) -> &ServerAddress;

    /// 협상된 프로토콜 버전
    fn protocol_version(&self) -> ProtocolVersion;

    /// 서버 에이전트 문자열
    fn server_agent(&self) -> &str;

    /// 재사용 가능 여부 (연결 수준 실패 후 false)
    fn is_healthy(&self) -> bool;

    /// 라우팅 테이블 조회 (ROUTE)
    async fn route(
        &mut self,
        routing_context: &HashMap<String, String>,
        database: Option<&str>,
        bookmarks: &[String],
    ) -> DriverResult<RoutingReply>;

    /// auto-commit 쿼리 실행
    async fn run(&mut self, query: &Query, request: &RequestContext) -> DriverResult<RunResponse>;

    /// 트랜잭션 시작
    async fn begin(&mut self, request: &RequestContext) -> DriverResult<()>;

    /// 트랜잭션 내 쿼리 실행
    async fn run_in_transaction(&mut self, query: &Query) -> DriverResult<RunResponse>;

    /// 커밋, 서버 북마크 반환
    async fn commit(&mut self) -> DriverResult<Option<String>>;

    /// 롤백
    async fn rollback(&mut self) -> DriverResult<()>;

    /// 연결 닫기
    async fn close(&mut self);
}
