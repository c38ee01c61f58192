//! 에러 분류
//!
//! 연결 또는 서버 응답에서 관찰된 실패를 재시도 정책이 사용하는
//! 세 가지 분류로 바꿉니다. 서버 코드는 먼저 닫힌 열거형
//! [`ServerErrorCode`]로 파싱되고, 분류는 [`FailureCondition`]에 대한
//! 하나의 완전한 `match`로 결정됩니다.

use super::error::{DiscoveryErrorKind, DriverError};

// ============================================================================
// ServerErrorCode - 서버 에러 코드
// ============================================================================

/// 알려진 서버 에러 코드
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerErrorCode {
    /// `Neo.ClientError.Cluster.NotALeader`
    NotALeader,
    /// `Neo.ClientError.General.ForbiddenOnReadOnlyDatabase`
    ForbiddenOnReadOnlyDatabase,
    /// `Neo.TransientError.General.DatabaseUnavailable`
    DatabaseUnavailable,
    /// `Neo.ClientError.Database.DatabaseNotFound`
    DatabaseNotFound,
    /// `Neo.ClientError.Procedure.ProcedureNotFound`
    ProcedureNotFound,
    /// `Neo.TransientError.Transaction.Terminated` / `LockClientStopped`
    TransactionTerminated,
    /// 그 밖의 `Neo.TransientError.*`
    Transient,
    /// `Neo.ClientError.Security.*`
    Security,
    /// 그 밖의 `Neo.ClientError.*`
    Client,
    /// `Neo.DatabaseError.*`
    Database,
    /// 알 수 없는 코드
    Unknown,
}

impl ServerErrorCode {
    /// 코드 문자열 파싱
    pub fn parse(code: &str) -> Self {
        match code {
            "Neo.ClientError.Cluster.NotALeader" => Self::NotALeader,
            "Neo.ClientError.General.ForbiddenOnReadOnlyDatabase" => {
                Self::ForbiddenOnReadOnlyDatabase
            }
            "Neo.TransientError.General.DatabaseUnavailable" => Self::DatabaseUnavailable,
            "Neo.ClientError.Database.DatabaseNotFound" => Self::DatabaseNotFound,
            "Neo.ClientError.Procedure.ProcedureNotFound" => Self::ProcedureNotFound,
            "Neo.TransientError.Transaction.Terminated"
            | "Neo.TransientError.Transaction.LockClientStopped" => Self::TransactionTerminated,
            c if c.starts_with("Neo.TransientError.") => Self::Transient,
            c if c.starts_with("Neo.ClientError.Security.") => Self::Security,
            c if c.starts_with("Neo.ClientError.") => Self::Client,
            c if c.starts_with("Neo.DatabaseError.") => Self::Database,
            _ => Self::Unknown,
        }
    }
}

// ============================================================================
// FailureCondition - 관찰된 실패 조건
// ============================================================================

/// 관찰된 실패 조건
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCondition {
    /// 응답 전 연결 거부/리셋/타임아웃
    ConnectionLost,
    /// 리더 아님 / 리더 변경
    NotALeader,
    /// 데이터베이스 일시적 사용 불가
    DatabaseUnavailable,
    /// 일시적 서버 실패
    Transient,
    /// 라우팅 프로시저 없음
    ProcedureNotFound,
    /// 데이터베이스 없음
    DatabaseNotFound,
    /// 인증 / 구문 / 클라이언트 에러
    ClientFault,
    /// 결과 수신 중 연결 끊김
    StreamInterrupted {
        /// 호출자가 이미 레코드를 소비했는지 여부
        consumed: bool,
    },
    /// 라우팅 테이블에 해당 역할 서버 없음
    NoServersAvailable,
    /// 모든 라우터 실패 또는 세션 만료
    ClusterUnreachable,
    /// 드라이버 내부 또는 사용 오류
    Terminal,
}

impl FailureCondition {
    /// 드라이버 에러에서 조건 추출
    pub fn of(err: &DriverError) -> Self {
        match err {
            DriverError::Connection(_) | DriverError::Timeout(_) => Self::ConnectionLost,
            DriverError::StreamInterrupted { consumed, .. } => Self::StreamInterrupted {
                consumed: *consumed,
            },
            DriverError::Client { code, .. } | DriverError::Server { code, .. } => {
                Self::from_code(ServerErrorCode::parse(code))
            }
            DriverError::Discovery {
                kind: DiscoveryErrorKind::DatabaseNotFound,
                ..
            } => Self::DatabaseNotFound,
            DriverError::Discovery {
                kind: DiscoveryErrorKind::RoutersExhausted,
                ..
            }
            | DriverError::ServiceUnavailable(_)
            | DriverError::SessionExpired(_) => Self::ClusterUnreachable,
            DriverError::Routing { .. } => Self::NoServersAvailable,
            DriverError::Authentication(_)
            | DriverError::Configuration(_)
            | DriverError::TypeConversion(_) => Self::ClientFault,
            DriverError::RetryBudgetExhausted { .. }
            | DriverError::Protocol(_)
            | DriverError::Session(_)
            | DriverError::Transaction(_)
            | DriverError::Cancelled(_) => Self::Terminal,
        }
    }

    fn from_code(code: ServerErrorCode) -> Self {
        match code {
            ServerErrorCode::NotALeader | ServerErrorCode::ForbiddenOnReadOnlyDatabase => {
                Self::NotALeader
            }
            ServerErrorCode::DatabaseUnavailable => Self::DatabaseUnavailable,
            ServerErrorCode::Transient => Self::Transient,
            ServerErrorCode::ProcedureNotFound => Self::ProcedureNotFound,
            ServerErrorCode::DatabaseNotFound => Self::DatabaseNotFound,
            ServerErrorCode::TransactionTerminated
            | ServerErrorCode::Security
            | ServerErrorCode::Client => Self::ClientFault,
            ServerErrorCode::Database | ServerErrorCode::Unknown => Self::Terminal,
        }
    }
}

// ============================================================================
// Classification - 재시도 분류
// ============================================================================

/// 재시도 분류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// 같은 라우팅 테이블로 재시도
    RetryableSameServer,
    /// 주소를 잊고 라우팅 테이블을 갱신한 뒤 재시도
    RetryableRediscover,
    /// 즉시 전파
    Fatal,
}

impl Classification {
    /// 재시도 가능 여부
    pub fn is_retryable(self) -> bool {
        !matches!(self, Self::Fatal)
    }
}

/// 실패 조건 분류표
pub fn classify_condition(condition: FailureCondition) -> Classification {
    match condition {
        FailureCondition::ConnectionLost
        | FailureCondition::NotALeader
        | FailureCondition::DatabaseUnavailable
        | FailureCondition::NoServersAvailable
        | FailureCondition::ClusterUnreachable
        | FailureCondition::StreamInterrupted { consumed: false } => {
            Classification::RetryableRediscover
        }
        FailureCondition::Transient => Classification::RetryableSameServer,
        FailureCondition::ProcedureNotFound
        | FailureCondition::DatabaseNotFound
        | FailureCondition::ClientFault
        | FailureCondition::StreamInterrupted { consumed: true }
        | FailureCondition::Terminal => Classification::Fatal,
    }
}

/// 드라이버 에러 분류
pub fn classify(err: &DriverError) -> Classification {
    classify_condition(FailureCondition::of(err))
}

// ============================================================================
// DiscoveryOutcome - 라우팅 조회 경로의 분류
// ============================================================================

/// 라우터 하나에 대한 조회 실패 처리
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryOutcome {
    /// 라우터를 잊고 다음 후보로
    NextRouter,
    /// 조회 중단, 데이터베이스 없음
    DatabaseNotFound,
    /// 조회 중단, 에러 그대로 전파
    Abort,
}

/// 라우팅 조회 실패 분류
///
/// 프로시저 없음과 일시적 실패는 해당 라우터만 포기하게 합니다.
pub fn classify_discovery(err: &DriverError) -> DiscoveryOutcome {
    match FailureCondition::of(err) {
        FailureCondition::DatabaseNotFound => DiscoveryOutcome::DatabaseNotFound,
        FailureCondition::ClientFault => DiscoveryOutcome::Abort,
        FailureCondition::ConnectionLost
        | FailureCondition::NotALeader
        | FailureCondition::DatabaseUnavailable
        | FailureCondition::Transient
        | FailureCondition::ProcedureNotFound
        | FailureCondition::StreamInterrupted { .. }
        | FailureCondition::NoServersAvailable
        | FailureCondition::ClusterUnreachable
        | FailureCondition::Terminal => DiscoveryOutcome::NextRouter,
    }
}
