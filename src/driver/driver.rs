//! 클러스터 드라이버
//!
//! `zeta4g://` URI로 클러스터에 접속하는 드라이버. 라우팅 테이블 캐시와
//! 연결 레지스트리는 드라이버마다 하나씩 만들어지고 모든 세션이 공유합니다.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use super::address::{AddressResolver, ServerAddress};
use super::connector::{default_user_agent, ConnectSettings, Connector, TrustStrategy};
use super::error::{DriverError, DriverResult};
use super::registry::ConnectionRegistry;
use super::retry::{RetryConfig, TransactionRetryExecutor};
use super::routing::{
    RoutingPolicy, RoutingTable, RoutingTableCache, RoutingTableProvider, ServerSelector,
};
use super::session::{AccessMode, Session, SessionConfig};

/// 라우팅 컨텍스트에 시드 주소를 기록하는 키
pub const ROUTING_CONTEXT_ADDRESS_KEY: &str = "address";

// ============================================================================
// URI 파싱
// ============================================================================

/// 파싱된 라우팅 URI
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingUri {
    /// 시드 라우터
    pub routers: Vec<ServerAddress>,
    /// TLS 암호화
    pub encrypted: bool,
    /// TLS 신뢰 전략 (`+ssc`이면 모든 인증서 신뢰)
    pub trust_strategy: TrustStrategy,
    /// 라우팅 컨텍스트 (쿼리 문자열 + `address`)
    pub routing_context: HashMap<String, String>,
}

/// URI가 라우팅 드라이버용인지 확인
pub fn is_routing_uri(uri: &str) -> bool {
    uri.starts_with("zeta4g://") || uri.starts_with("zeta4g+s://") || uri.starts_with("zeta4g+ssc://")
}

/// `zeta4g[+s|+ssc]://host[:port][,host[:port]...][?key=value&...]` 파싱
pub fn parse_routing_uri(uri: &str) -> DriverResult<RoutingUri> {
    let (scheme, rest) = uri
        .split_once("://")
        .ok_or_else(|| DriverError::configuration(format!("Invalid URI '{}'", uri)))?;

    let (encrypted, trust_strategy) = match scheme {
        "zeta4g" => (false, TrustStrategy::default()),
        "zeta4g+s" => (true, TrustStrategy::TrustSystemCas),
        "zeta4g+ssc" => (true, TrustStrategy::TrustAllCertificates),
        other => {
            return Err(DriverError::configuration(format!(
                "Unsupported scheme '{}', expected zeta4g, zeta4g+s or zeta4g+ssc",
                other
            )))
        }
    };

    let (hosts, query) = match rest.split_once('?') {
        Some((hosts, query)) => (hosts, Some(query)),
        None => (rest, None),
    };
    let hosts = hosts.trim_end_matches('/');

    let routers = hosts
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ServerAddress::parse)
        .collect::<DriverResult<Vec<_>>>()?;

    let Some(first) = routers.first() else {
        return Err(DriverError::configuration("No routers specified"));
    };

    let mut routing_context = HashMap::new();
    for pair in query.into_iter().flat_map(|q| q.split('&')).filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').ok_or_else(|| {
            DriverError::configuration(format!("Invalid routing context parameter '{}'", pair))
        })?;
        if key.is_empty() || value.is_empty() {
            return Err(DriverError::configuration(format!(
                "Invalid routing context parameter '{}'",
                pair
            )));
        }
        if key == ROUTING_CONTEXT_ADDRESS_KEY {
            return Err(DriverError::configuration(
                "Routing context key 'address' is reserved",
            ));
        }
        if routing_context.insert(key.to_string(), value.to_string()).is_some() {
            return Err(DriverError::configuration(format!(
                "Duplicated routing context key '{}'",
                key
            )));
        }
    }
    routing_context.insert(ROUTING_CONTEXT_ADDRESS_KEY.to_string(), first.to_string());

    Ok(RoutingUri {
        routers,
        encrypted,
        trust_strategy,
        routing_context,
    })
}

// ============================================================================
// DriverConfig - 드라이버 설정
// ============================================================================

/// 드라이버 설정
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// 시드 라우터
    pub routers: Vec<ServerAddress>,
    /// TLS 암호화
    pub encrypted: bool,
    /// TLS 신뢰 전략
    pub trust_strategy: TrustStrategy,
    /// ROUTE 요청마다 첨부되는 라우팅 컨텍스트
    pub routing_context: HashMap<String, String>,
    /// 주소 해석기 (리졸버 / 이름 해석 훅)
    pub resolver: AddressResolver,
    /// 서버 선택 정책
    pub routing_policy: RoutingPolicy,
    /// 연결 시도당 타임아웃
    pub connection_timeout: Duration,
    /// 트랜잭션 재시도 설정
    pub retry: RetryConfig,
    /// User Agent
    pub user_agent: String,
    /// Fetch Size
    pub fetch_size: usize,
}

impl DriverConfig {
    /// URI로 설정 생성
    pub fn new(uri: &str) -> DriverResult<Self> {
        let parsed = parse_routing_uri(uri)?;

        Ok(Self {
            routers: parsed.routers,
            encrypted: parsed.encrypted,
            trust_strategy: parsed.trust_strategy,
            routing_context: parsed.routing_context,
            resolver: AddressResolver::new(),
            routing_policy: RoutingPolicy::default(),
            connection_timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
            user_agent: default_user_agent(),
            fetch_size: 1000,
        })
    }

    /// 연결마다 커넥터로 전달되는 설정
    pub fn connect_settings(&self) -> ConnectSettings {
        ConnectSettings {
            user_agent: self.user_agent.clone(),
            encrypted: self.encrypted,
            trust_strategy: self.trust_strategy.clone(),
        }
    }

    /// 빌더 시작
    pub fn builder(uri: &str) -> DriverResult<DriverConfigBuilder> {
        let config = Self::new(uri)?;
        Ok(DriverConfigBuilder { config })
    }
}

// ============================================================================
// DriverConfigBuilder - 설정 빌더
// ============================================================================

/// 드라이버 설정 빌더
pub struct DriverConfigBuilder {
    config: DriverConfig,
}

impl DriverConfigBuilder {
    /// TLS 암호화 설정
    pub fn with_encrypted(mut self, encrypted: bool) -> Self {
        self.config.encrypted = encrypted;
        self
    }

    /// TLS 신뢰 전략 설정
    pub fn with_trust_strategy(mut self, strategy: TrustStrategy) -> Self {
        self.config.trust_strategy = strategy;
        self
    }

    /// 사용자 주소 리졸버 설정
    pub fn with_resolver<F>(mut self, f: F) -> Self
    where
        F: Fn(&ServerAddress) -> Vec<ServerAddress> + Send + Sync + 'static,
    {
        self.config.resolver = self.config.resolver.with_resolver(f);
        self
    }

    /// 호스트 이름 해석 훅 설정
    pub fn with_name_resolver<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> Vec<String> + Send + Sync + 'static,
    {
        self.config.resolver = self.config.resolver.with_name_resolver(f);
        self
    }

    /// 라우팅 컨텍스트 항목 추가
    pub fn with_routing_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.routing_context.insert(key.into(), value.into());
        self
    }

    /// 라우팅 정책 설정
    pub fn with_routing_policy(mut self, policy: RoutingPolicy) -> Self {
        self.config.routing_policy = policy;
        self
    }

    /// 연결 타임아웃 설정
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection_timeout = timeout;
        self
    }

    /// 최대 트랜잭션 재시도 시간 설정
    pub fn with_max_transaction_retry_time(mut self, time: Duration) -> Self {
        self.config.retry = self.config.retry.with_max_retry_time(time);
        self
    }

    /// 최대 재시도 횟수 설정
    pub fn with_max_retry_attempts(mut self, attempts: u32) -> Self {
        self.config.retry = self.config.retry.with_max_attempts(attempts);
        self
    }

    /// 재시도 대기 시간 설정 (첫 대기, 최대 대기)
    pub fn with_retry_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.config.retry = self
            .config
            .retry
            .with_initial_delay(initial)
            .with_max_delay(max);
        self
    }

    /// 재시도 대기 증가 배수 설정
    pub fn with_retry_multiplier(mut self, multiplier: f64) -> Self {
        self.config.retry = self.config.retry.with_multiplier(multiplier);
        self
    }

    /// 재시도 지터 비율 설정
    pub fn with_retry_jitter_factor(mut self, factor: f64) -> Self {
        self.config.retry = self.config.retry.with_jitter_factor(factor);
        self
    }

    /// 재시도 설정 교체
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    /// User Agent 설정
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Fetch Size 설정
    pub fn with_fetch_size(mut self, size: usize) -> Self {
        self.config.fetch_size = size;
        self
    }

    /// 빌드
    pub fn build(self) -> DriverConfig {
        self.config
    }
}

// ============================================================================
// DriverCore - 세션이 공유하는 상태
// ============================================================================

/// 드라이버와 세션이 공유하는 구성 요소
pub(crate) struct DriverCore {
    pub(crate) cache: Arc<RoutingTableCache>,
    pub(crate) registry: Arc<ConnectionRegistry>,
    pub(crate) provider: Arc<RoutingTableProvider>,
    pub(crate) selector: Arc<ServerSelector>,
    pub(crate) executor: TransactionRetryExecutor,
    pub(crate) fetch_size: usize,
    open: RwLock<bool>,
}

impl DriverCore {
    pub(crate) fn is_open(&self) -> bool {
        *self.open.read()
    }
}

// ============================================================================
// Driver - 드라이버
// ============================================================================

/// 클러스터 라우팅 드라이버
pub struct Driver {
    /// 설정
    config: DriverConfig,
    /// 공유 상태
    core: Arc<DriverCore>,
}

impl Driver {
    /// 새 드라이버 생성
    ///
    /// 네트워크 연결은 `connector`가 담당합니다.
    pub fn new(uri: &str, connector: Arc<dyn Connector>) -> DriverResult<Self> {
        let config = DriverConfig::new(uri)?;
        Self::with_config(config, connector)
    }

    /// 설정으로 드라이버 생성
    pub fn with_config(config: DriverConfig, connector: Arc<dyn Connector>) -> DriverResult<Self> {
        if config.routers.is_empty() {
            return Err(DriverError::configuration("At least one router is required"));
        }

        let cache = Arc::new(RoutingTableCache::new());
        let registry = Arc::new(
            ConnectionRegistry::new(connector, config.resolver.clone(), config.connection_timeout)
                .with_settings(config.connect_settings()),
        );
        let provider = Arc::new(RoutingTableProvider::new(
            config.routers.clone(),
            config.routing_context.clone(),
            Arc::clone(&cache),
            Arc::clone(&registry),
        ));
        let selector = Arc::new(ServerSelector::new(
            config.routing_policy,
            Arc::clone(&registry),
        ));
        let executor = TransactionRetryExecutor::new(
            config.retry.clone(),
            Arc::clone(&provider),
            Arc::clone(&selector),
            Arc::clone(&registry),
        );

        tracing::debug!(
            "Driver created with routers {:?} (encrypted: {}, policy: {:?})",
            config.routers,
            config.encrypted,
            config.routing_policy
        );

        let core = Arc::new(DriverCore {
            cache,
            registry,
            provider,
            selector,
            executor,
            fetch_size: config.fetch_size,
            open: RwLock::new(true),
        });

        Ok(Self { config, core })
    }

    /// 세션 생성
    pub fn session(&self, config: SessionConfig) -> DriverResult<Session> {
        self.ensure_open()?;
        Ok(Session::new(Arc::clone(&self.core), config))
    }

    /// 기본 설정으로 세션 생성
    pub fn default_session(&self) -> DriverResult<Session> {
        self.session(SessionConfig::default())
    }

    /// 드라이버 설정
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// 연결 레지스트리
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.core.registry
    }

    /// 드라이버 종료
    ///
    /// 유휴 연결을 닫고 이후 세션 생성을 거부합니다.
    pub async fn close(&self) -> DriverResult<()> {
        {
            let mut open = self.core.open.write();
            if !*open {
                return Ok(());
            }
            *open = false;
        }

        self.core.registry.close().await;
        self.core.cache.clear();
        self.core.selector.clear();
        tracing::debug!("Driver closed");
        Ok(())
    }

    /// 연결 테스트
    ///
    /// 기본 데이터베이스의 라우팅 테이블을 강제로 다시 조회합니다. 쿼리는
    /// 실행하지 않습니다.
    pub async fn verify_connectivity(&self) -> DriverResult<()> {
        self.ensure_open()?;

        match self
            .core
            .provider
            .get_or_refresh("", AccessMode::Read, &[], true)
            .await
        {
            Ok(_) => Ok(()),
            Err(DriverError::Discovery { message, .. }) => {
                Err(DriverError::service_unavailable(message))
            }
            Err(e) => Err(e),
        }
    }

    /// 다중 데이터베이스 지원 여부
    ///
    /// 시드 라우터와 협상한 프로토콜 버전으로 판단하며 라우팅 테이블은
    /// 건드리지 않습니다.
    pub async fn supports_multi_db(&self) -> DriverResult<bool> {
        self.ensure_open()?;

        let mut last_error = None;
        for seed in &self.config.routers {
            for address in self.core.registry.resolver().resolve(seed) {
                match self.core.registry.acquire(&address).await {
                    Ok(mut lease) => {
                        let version = lease.connection()?.protocol_version();
                        return Ok(version.supports_multi_database());
                    }
                    Err(e) => {
                        tracing::debug!("Could not reach {} for capability check: {}", address, e);
                        last_error = Some(e);
                    }
                }
            }
        }

        Err(DriverError::service_unavailable(match last_error {
            Some(e) => format!("Unable to connect to any router: {}", e),
            None => "Unable to connect to any router".to_string(),
        }))
    }

    /// 캐시된 라우팅 테이블 조회
    pub fn get_routing_table(&self, database: &str) -> Option<Arc<RoutingTable>> {
        self.core.cache.get(database)
    }

    /// 라우팅 테이블 무효화
    ///
    /// 데이터베이스의 테이블, 갱신 잠금, 선택 커서를 버리고 다른 테이블에
    /// 나열되지 않은 잊혀진 주소도 정리합니다. 다음 요청은 다시 조회합니다.
    pub fn invalidate_routing_table(&self, database: &str) -> Option<Arc<RoutingTable>> {
        let removed = self.core.cache.invalidate(database);
        self.core.selector.forget_database(database);
        self.core
            .registry
            .retain_forgotten(&self.core.cache.listed_servers());
        removed
    }

    fn ensure_open(&self) -> DriverResult<()> {
        if self.core.is_open() {
            Ok(())
        } else {
            Err(DriverError::session("Driver is closed"))
        }
    }

    /// 메트릭 조회
    pub fn metrics(&self) -> DriverMetrics {
        let registry = self.core.registry.metrics();
        DriverMetrics {
            routing_tables: self.core.cache.len(),
            databases: self.core.cache.databases(),
            in_use_connections: registry.in_use,
            idle_connections: registry.idle,
            forgotten_addresses: registry.forgotten,
            total_acquisitions: registry.total_acquisitions,
            total_connections_created: registry.total_created,
            discovery_count: self.core.provider.discovery_count(),
        }
    }
}

impl fmt::Debug for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("routers", &self.config.routers)
            .field("open", &self.core.is_open())
            .finish()
    }
}

// ============================================================================
// DriverMetrics - 드라이버 메트릭
// ============================================================================

/// 드라이버 메트릭
#[derive(Debug, Clone, Default)]
pub struct DriverMetrics {
    /// 캐시된 라우팅 테이블 수
    pub routing_tables: usize,
    /// 캐시된 데이터베이스 이름
    pub databases: Vec<String>,
    /// 주소별 사용 중 연결 수
    pub in_use_connections: HashMap<ServerAddress, usize>,
    /// 유휴 연결 수
    pub idle_connections: usize,
    /// 잊혀진 주소 수
    pub forgotten_addresses: usize,
    /// 총 연결 획득 횟수
    pub total_acquisitions: u64,
    /// 총 생성된 연결 수
    pub total_connections_created: u64,
    /// 총 ROUTE 요청 수
    pub discovery_count: u64,
}

// ============================================================================
// Tests
// ============================================================================
