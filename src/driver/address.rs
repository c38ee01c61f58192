//! 서버 주소와 주소 해석
//!
//! 논리 시드 주소를 실제 접속 주소로 확장합니다. 사용자 리졸버 훅은
//! 후보 라우터마다 한 번, 이름 해석 훅은 연결 시도마다 호출됩니다.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::error::{DriverError, DriverResult};

/// 기본 Bolt 포트
pub const DEFAULT_PORT: u16 = 7687;

// ============================================================================
// ServerAddress - 서버 주소
// ============================================================================

/// 서버 주소
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServerAddress {
    /// 호스트
    pub host: String,
    /// 포트
    pub port: u16,
}

impl ServerAddress {
    /// 새 서버 주소 생성
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `host[:port]` 문자열 파싱
    pub fn parse(s: &str) -> DriverResult<Self> {
        let s = s.trim();
        let (host, port) = match s.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse()
                    .map_err(|_| DriverError::configuration(format!("Invalid port in '{}'", s)))?;
                (host, port)
            }
            None => (s, DEFAULT_PORT),
        };

        if host.is_empty() {
            return Err(DriverError::configuration(format!("Missing host in '{}'", s)));
        }

        Ok(Self::new(host, port))
    }

    /// 소켓 주소로 변환
    pub fn to_socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for ServerAddress {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Default for ServerAddress {
    fn default() -> Self {
        Self::new("localhost", DEFAULT_PORT)
    }
}

// ============================================================================
// AddressResolver - 주소 해석기
// ============================================================================

/// 사용자 주소 리졸버 훅
pub type ResolverFn = Arc<dyn Fn(&ServerAddress) -> Vec<ServerAddress> + Send + Sync>;

/// 호스트 이름 해석 훅
pub type NameResolverFn = Arc<dyn Fn(&str) -> Vec<String> + Send + Sync>;

/// 주소 해석기
///
/// 상태가 없으며, 설정된 훅이 없으면 입력 주소를 그대로 돌려줍니다.
#[derive(Clone, Default)]
pub struct AddressResolver {
    resolver: Option<ResolverFn>,
    name_resolver: Option<NameResolverFn>,
}

impl AddressResolver {
    /// 훅 없는 해석기 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 사용자 리졸버 설정
    pub fn with_resolver<F>(mut self, f: F) -> Self
    where
        F: Fn(&ServerAddress) -> Vec<ServerAddress> + Send + Sync + 'static,
    {
        self.resolver = Some(Arc::new(f));
        self
    }

    /// 이름 해석 훅 설정
    pub fn with_name_resolver<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> Vec<String> + Send + Sync + 'static,
    {
        self.name_resolver = Some(Arc::new(f));
        self
    }

    /// 논리 주소를 하나 이상의 후보 주소로 확장
    pub fn resolve(&self, address: &ServerAddress) -> Vec<ServerAddress> {
        match &self.resolver {
            Some(resolver) => resolver(address),
            None => vec![address.clone()],
        }
    }

    /// 연결 직전 호스트 이름 해석 (포트 유지)
    pub fn resolve_host(&self, address: &ServerAddress) -> Vec<ServerAddress> {
        match &self.name_resolver {
            Some(name_resolver) => name_resolver(&address.host)
                .into_iter()
                .map(|host| ServerAddress::new(host, address.port))
                .collect(),
            None => vec![address.clone()],
        }
    }

    /// 사용자 리졸버 설정 여부
    pub fn has_resolver(&self) -> bool {
        self.resolver.is_some()
    }
}

impl fmt::Debug for AddressResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddressResolver")
            .field("resolver", &self.resolver.is_some())
            .field("name_resolver", &self.name_resolver.is_some())
            .finish()
    }
}
