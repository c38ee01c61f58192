//! Driver Error Types
//!
//! 드라이버 에러 정의

use std::fmt;

use thiserror::Error;

use super::routing::ServerRole;

/// 데이터베이스 없음 서버 코드
pub const DATABASE_NOT_FOUND_CODE: &str = "Neo.ClientError.Database.DatabaseNotFound";

// ============================================================================
// DiscoveryErrorKind / RoutingErrorKind
// ============================================================================

/// 라우팅 테이블 조회 실패 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryErrorKind {
    /// 모든 라우터 시도 실패
    RoutersExhausted,
    /// 데이터베이스 없음 (재시도 불가)
    DatabaseNotFound,
}

impl fmt::Display for DiscoveryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RoutersExhausted => write!(f, "routers exhausted"),
            Self::DatabaseNotFound => write!(f, "database not found"),
        }
    }
}

/// 서버 선택 실패 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingErrorKind {
    /// 역할에 해당하는 서버 없음
    NoServersAvailable(ServerRole),
}

impl fmt::Display for RoutingErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoServersAvailable(role) => write!(f, "no {} servers available", role.as_str()),
        }
    }
}

// ============================================================================
// DriverError - 드라이버 에러
// ============================================================================

/// 드라이버 에러
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DriverError {
    /// 연결 에러 (거부, 리셋, 응답 전 종료)
    #[error("Connection error: {0}")]
    Connection(String),

    /// 타임아웃 에러
    #[error("Timeout: {0}")]
    Timeout(String),

    /// 결과 수신 중 연결 끊김
    #[error("Stream interrupted: {message}")]
    StreamInterrupted {
        /// 호출자가 이미 레코드를 소비했는지 여부
        consumed: bool,
        /// 메시지
        message: String,
    },

    /// 클라이언트 에러 (서버 코드 `Neo.ClientError.*`, 변경 없이 전달)
    #[error("Client error: {code} - {message}")]
    Client {
        /// 서버 에러 코드
        code: String,
        /// 메시지
        message: String,
    },

    /// 서버 에러
    #[error("Server error: {code} - {message}")]
    Server {
        /// 서버 에러 코드
        code: String,
        /// 메시지
        message: String,
    },

    /// 라우팅 테이블 조회 실패
    #[error("Discovery error ({kind}): {message}")]
    Discovery {
        /// 실패 종류
        kind: DiscoveryErrorKind,
        /// 메시지
        message: String,
    },

    /// 서버 선택 실패
    #[error("Routing error: {kind} for database '{database}'")]
    Routing {
        /// 실패 종류
        kind: RoutingErrorKind,
        /// 데이터베이스
        database: String,
    },

    /// 재시도 예산 소진
    #[error("Retry budget exhausted after {attempts} attempts: {source}")]
    RetryBudgetExhausted {
        /// 시도 횟수
        attempts: u32,
        /// 마지막 에러
        source: Box<DriverError>,
    },

    /// 서비스 불가
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// 세션 만료 (라우팅 실패, 재시도 없는 경로)
    #[error("Session expired: {0}")]
    SessionExpired(String),

    /// 인증 에러
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// 프로토콜 에러
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// 세션 에러
    #[error("Session error: {0}")]
    Session(String),

    /// 트랜잭션 에러
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// 설정 에러
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// 타입 변환 에러
    #[error("Type conversion error: {0}")]
    TypeConversion(String),

    /// 취소됨
    #[error("Cancelled: {0}")]
    Cancelled(String),
}

impl DriverError {
    /// 연결 에러 생성
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// 타임아웃 에러 생성
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// 스트림 중단 에러 생성
    pub fn stream_interrupted(consumed: bool, msg: impl Into<String>) -> Self {
        Self::StreamInterrupted {
            consumed,
            message: msg.into(),
        }
    }

    /// 서버 응답 코드로 에러 생성
    ///
    /// `Neo.ClientError.*` 코드는 [`DriverError::Client`], 나머지는
    /// [`DriverError::Server`]가 됩니다.
    pub fn server(code: impl Into<String>, message: impl Into<String>) -> Self {
        let code = code.into();
        let message = message.into();
        if code.starts_with("Neo.ClientError") {
            Self::Client { code, message }
        } else {
            Self::Server { code, message }
        }
    }

    /// 조회 실패 에러 생성
    pub fn discovery(kind: DiscoveryErrorKind, msg: impl Into<String>) -> Self {
        Self::Discovery {
            kind,
            message: msg.into(),
        }
    }

    /// 서버 없음 에러 생성
    pub fn no_servers(role: ServerRole, database: impl Into<String>) -> Self {
        Self::Routing {
            kind: RoutingErrorKind::NoServersAvailable(role),
            database: database.into(),
        }
    }

    /// 서비스 불가 에러 생성
    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Self::ServiceUnavailable(msg.into())
    }

    /// 세션 만료 에러 생성
    pub fn session_expired(msg: impl Into<String>) -> Self {
        Self::SessionExpired(msg.into())
    }

    /// 인증 에러 생성
    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// 프로토콜 에러 생성
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// 세션 에러 생성
    pub fn session(msg: impl Into<String>) -> Self {
        Self::Session(msg.into())
    }

    /// 트랜잭션 에러 생성
    pub fn transaction(msg: impl Into<String>) -> Self {
        Self::Transaction(msg.into())
    }

    /// 설정 에러 생성
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// 타입 변환 에러 생성
    pub fn type_conversion(msg: impl Into<String>) -> Self {
        Self::TypeConversion(msg.into())
    }

    /// 취소 에러 생성
    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    /// 서버 에러 코드 (있는 경우)
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Client { code, .. } | Self::Server { code, .. } => Some(code),
            Self::Discovery {
                kind: DiscoveryErrorKind::DatabaseNotFound,
                ..
            } => Some(DATABASE_NOT_FOUND_CODE),
            Self::RetryBudgetExhausted { source, .. } => source.code(),
            _ => None,
        }
    }

    /// 연결 수준 에러 여부 (연결을 재사용할 수 없음)
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Timeout(_) | Self::StreamInterrupted { .. }
        )
    }

    /// 재시도 가능 여부
    pub fn is_retryable(&self) -> bool {
        super::classify::classify(self).is_retryable()
    }

    /// 클라이언트 에러 여부
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Client { .. }
                | Self::Authentication(_)
                | Self::Configuration(_)
                | Self::TypeConversion(_)
        )
    }
}

// ============================================================================
// Result Type
// ============================================================================

/// 드라이버 결과 타입
pub type DriverResult<T> = Result<T, DriverError>;

// ============================================================================
// Tests
// ============================================================================
