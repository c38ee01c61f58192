//! 연결 레지스트리
//!
//! 주소별 사용 중 참조 수와 유휴 연결을 관리합니다. 클러스터 수준에서
//! 도달 불가로 분류된 주소는 "잊혀진" 주소로 기록되어, 라우팅 테이블이
//! 갱신될 때까지 서버 선택에서 제외됩니다.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use super::address::{AddressResolver, ServerAddress};
use super::connector::{ConnectSettings, Connection, Connector};
use super::error::{DriverError, DriverResult};

// ============================================================================
// RegistryMetrics - 레지스트리 메트릭
// ============================================================================

/// 레지스트리 메트릭
#[derive(Debug, Clone, Default)]
pub struct RegistryMetrics {
    /// 주소별 사용 중 참조 수
    pub in_use: HashMap<ServerAddress, usize>,
    /// 유휴 연결 수
    pub idle: usize,
    /// 잊혀진 주소 수
    pub forgotten: usize,
    /// 총 획득 횟수
    pub total_acquisitions: u64,
    /// 총 생성 횟수
    pub total_created: u64,
}

// ============================================================================
// ConnectionRegistry - 연결 레지스트리
// ============================================================================

/// 연결 레지스트리
pub struct ConnectionRegistry {
    /// 연결 생성기
    connector: Arc<dyn Connector>,
    /// 주소 해석기
    resolver: AddressResolver,
    /// 연결 시도당 타임아웃
    connection_timeout: Duration,
    /// 연결 수립 설정
    settings: ConnectSettings,
    /// 주소별 사용 중 참조 수
    in_use: Mutex<HashMap<ServerAddress, usize>>,
    /// 잊혀진 주소 (잊혀진 시점의 epoch)
    forgotten: Mutex<HashMap<ServerAddress, u64>>,
    /// forget 호출마다 증가하는 epoch
    epoch: AtomicU64,
    /// 유휴 연결
    idle: Mutex<HashMap<ServerAddress, Vec<Box<dyn Connection>>>>,
    /// 열린 상태
    open: RwLock<bool>,
    /// 총 획득 횟수
    total_acquisitions: AtomicU64,
    /// 총 생성 횟수
    total_created: AtomicU64,
}

impl ConnectionRegistry {
    /// 새 레지스트리 생성
    pub fn new(
        connector: Arc<dyn Connector>,
        resolver: AddressResolver,
        connection_timeout: Duration,
    ) -> Self {
        Self {
            connector,
            resolver,
            connection_timeout,
            settings: ConnectSettings::default(),
            in_use: Mutex::new(HashMap::new()),
            forgotten: Mutex::new(HashMap::new()),
            epoch: AtomicU64::new(0),
            idle: Mutex::new(HashMap::new()),
            open: RwLock::new(true),
            total_acquisitions: AtomicU64::new(0),
            total_created: AtomicU64::new(0),
        }
    }

    /// 연결 수립 설정 지정
    pub fn with_settings(mut self, settings: ConnectSettings) -> Self {
        self.settings = settings;
        self
    }

    /// 주소 해석기
    pub fn resolver(&self) -> &AddressResolver {
        &self.resolver
    }

    /// 연결 수립 설정
    pub fn settings(&self) -> &ConnectSettings {
        &self.settings
    }

    /// 연결 획득
    ///
    /// 유휴 연결이 있으면 재사용하고, 없으면 이름 해석 훅을 거친 각
    /// 엔드포인트로 순서대로 연결을 시도합니다.
    pub async fn acquire(self: &Arc<Self>, address: &ServerAddress) -> DriverResult<ConnectionLease> {
        if !*self.open.read() {
            return Err(DriverError::service_unavailable("Driver is closed"));
        }

        let connection = match self.take_idle(address) {
            Some(conn) => conn,
            None => self.open_connection(address).await?,
        };

        *self.in_use.lock().entry(address.clone()).or_insert(0) += 1;
        self.total_acquisitions.fetch_add(1, Ordering::Relaxed);

        Ok(ConnectionLease {
            registry: Arc::clone(self),
            address: address.clone(),
            connection: Some(connection),
            reusable: true,
        })
    }

    fn take_idle(&self, address: &ServerAddress) -> Option<Box<dyn Connection>> {
        let mut idle = self.idle.lock();
        let connections = idle.get_mut(address)?;

        while let Some(conn) = connections.pop() {
            if conn.is_healthy() {
                return Some(conn);
            }
        }

        None
    }

    async fn open_connection(&self, address: &ServerAddress) -> DriverResult<Box<dyn Connection>> {
        let endpoints = self.resolver.resolve_host(address);
        let mut last_error =
            DriverError::connection(format!("No endpoints resolved for {}", address));

        for endpoint in endpoints {
            let attempt = tokio::time::timeout(
                self.connection_timeout,
                self.connector.open(&endpoint, &self.settings),
            );
            match attempt.await {
                Ok(Ok(conn)) => {
                    self.total_created.fetch_add(1, Ordering::Relaxed);
                    return Ok(conn);
                }
                Ok(Err(e)) => {
                    tracing::debug!("Failed to connect to {}: {}", endpoint, e);
                    last_error = e;
                }
                Err(_) => {
                    tracing::debug!("Connection to {} timed out", endpoint);
                    last_error = DriverError::timeout(format!(
                        "Connection to {} timed out after {:?}",
                        endpoint, self.connection_timeout
                    ));
                }
            }
        }

        Err(last_error)
    }

    fn release(&self, address: &ServerAddress, conn: Option<Box<dyn Connection>>, reusable: bool) {
        {
            let mut in_use = self.in_use.lock();
            if let Some(count) = in_use.get_mut(address) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    in_use.remove(address);
                }
            }
        }

        let Some(conn) = conn else { return };
        if reusable && conn.is_healthy() && *self.open.read() && !self.is_forgotten(address) {
            self.idle.lock().entry(address.clone()).or_default().push(conn);
        }
    }

    /// 주소 잊기
    ///
    /// 참조 수 항목을 제거하고 유휴 연결을 버립니다.
    pub fn forget(&self, address: &ServerAddress) {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.forgotten.lock().insert(address.clone(), epoch);
        self.in_use.lock().remove(address);
        self.idle.lock().remove(address);
        tracing::debug!("Forgot server {}", address);
    }

    /// 잊혀진 주소 여부
    pub fn is_forgotten(&self, address: &ServerAddress) -> bool {
        self.forgotten.lock().contains_key(address)
    }

    /// 현재 epoch
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// 새 라우팅 테이블에 다시 나타난 주소 복원
    ///
    /// `before_epoch` 이전에 잊혀진 주소만 복원합니다. 조회 도중에 잊혀진
    /// 주소는 그대로 남습니다.
    pub fn restore_listed<'a, I>(&self, listed: I, before_epoch: u64)
    where
        I: IntoIterator<Item = &'a ServerAddress>,
    {
        let mut forgotten = self.forgotten.lock();
        if forgotten.is_empty() {
            return;
        }
        for address in listed {
            if forgotten.get(address).is_some_and(|&epoch| epoch <= before_epoch) {
                forgotten.remove(address);
            }
        }
    }

    /// 캐시된 라우팅 테이블 어디에도 없는 잊혀진 주소 정리
    ///
    /// 서버 선택은 테이블에 나열된 주소만 보므로, 나열되지 않은 주소의
    /// 기록은 더 이상 쓸모가 없습니다.
    pub fn retain_forgotten(&self, listed: &HashSet<ServerAddress>) {
        let mut forgotten = self.forgotten.lock();
        let before = forgotten.len();
        forgotten.retain(|address, _| listed.contains(address));
        if forgotten.len() < before {
            tracing::trace!(
                "Dropped {} forgotten addresses no longer listed",
                before - forgotten.len()
            );
        }
    }

    /// 주소의 사용 중 참조 수
    pub fn in_use(&self, address: &ServerAddress) -> usize {
        self.in_use.lock().get(address).copied().unwrap_or(0)
    }

    /// 열린 상태 여부
    pub fn is_open(&self) -> bool {
        *self.open.read()
    }

    /// 레지스트리 닫기 (유휴 연결 종료)
    pub async fn close(&self) {
        *self.open.write() = false;
        self.forgotten.lock().clear();

        let drained: Vec<Box<dyn Connection>> = {
            let mut idle = self.idle.lock();
            idle.drain().flat_map(|(_, conns)| conns).collect()
        };

        for mut conn in drained {
            conn.close().await;
        }
    }

    /// 메트릭 스냅샷
    pub fn metrics(&self) -> RegistryMetrics {
        RegistryMetrics {
            in_use: self.in_use.lock().clone(),
            idle: self.idle.lock().values().map(Vec::len).sum(),
            forgotten: self.forgotten.lock().len(),
            total_acquisitions: self.total_acquisitions.load(Ordering::Relaxed),
            total_created: self.total_created.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("resolver", &self.resolver)
            .field("connection_timeout", &self.connection_timeout)
            .field("in_use", &*self.in_use.lock())
            .field("forgotten", &self.forgotten.lock().len())
            .finish()
    }
}

// ============================================================================
// ConnectionLease - 대여된 연결
// ============================================================================

/// 대여된 연결
///
/// Drop 시 레지스트리로 반환됩니다.
pub struct ConnectionLease {
    registry: Arc<ConnectionRegistry>,
    address: ServerAddress,
    connection: Option<Box<dyn Connection>>,
    reusable: bool,
}

impl ConnectionLease {
    /// 대여한 주소 (라우팅 테이블상의 주소)
    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    /// 연결 참조
    pub fn connection(&mut self) -> DriverResult<&mut (dyn Connection + 'static)> {
        self.connection
            .as_deref_mut()
            .ok_or_else(|| DriverError::session("Connection already released"))
    }

    /// 반환 시 재사용 여부 설정 (트랜잭션 진행 중이면 false)
    pub fn set_reusable(&mut self, reusable: bool) {
        self.reusable = reusable;
    }

    /// 연결을 닫고 반환
    pub async fn close(mut self) {
        if let Some(mut conn) = self.connection.take() {
            conn.close().await;
        }
    }
}

impl Drop for ConnectionLease {
    fn drop(&mut self) {
        self.registry
            .release(&self.address, self.connection.take(), self.reusable);
    }
}

impl std::fmt::Debug for ConnectionLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionLease")
            .field("address", &self.address)
            .field("reusable", &self.reusable)
            .finish()
    }
}
