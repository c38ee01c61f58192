//! 라우팅 테이블 제공자
//!
//! 캐시에서 테이블을 찾고, 없거나 오래되었으면 라우터에 ROUTE 요청을
//! 보내 새 테이블을 가져옵니다.
//!
//! # 조회 순서
//!
//! 1. 캐시된 테이블에 라우터가 있으면 그 라우터들을, 없으면 시드 라우터를
//!    후보로 사용합니다.
//! 2. 각 후보는 주소 해석기로 확장된 뒤 순서대로 시도됩니다.
//! 3. 연결 실패나 라우터 역할을 할 수 없는 응답은 후보를 잊고 다음으로
//!    넘어갑니다. 데이터베이스 없음은 즉시 중단합니다.
//! 4. 캐시된 라우터가 모두 실패하면 시드 라우터로 한 번 더 시도합니다.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::super::address::ServerAddress;
use super::super::classify::{classify_discovery, DiscoveryOutcome};
use super::super::connector::RoutingReply;
use super::super::error::{DiscoveryErrorKind, DriverError, DriverResult};
use super::super::registry::ConnectionRegistry;
use super::super::session::AccessMode;
use super::cache::RoutingTableCache;
use super::table::RoutingTable;

/// 조회 결과
#[derive(Debug, Clone)]
pub struct RoutingLookup {
    /// 라우팅 테이블
    pub table: Arc<RoutingTable>,
    /// 이번 호출에서 (또는 대기 중 다른 호출이) 새로 가져온 테이블인지 여부
    pub refreshed: bool,
}

/// 라우팅 테이블 제공자
pub struct RoutingTableProvider {
    /// 시드 라우터
    seeds: Vec<ServerAddress>,
    /// 라우팅 컨텍스트
    routing_context: HashMap<String, String>,
    /// 테이블 캐시
    cache: Arc<RoutingTableCache>,
    /// 연결 레지스트리
    registry: Arc<ConnectionRegistry>,
    /// ROUTE 요청 수
    discovery_count: AtomicU64,
}

impl RoutingTableProvider {
    /// 새 제공자 생성
    pub fn new(
        seeds: Vec<ServerAddress>,
        routing_context: HashMap<String, String>,
        cache: Arc<RoutingTableCache>,
        registry: Arc<ConnectionRegistry>,
    ) -> Self {
        Self {
            seeds,
            routing_context,
            cache,
            registry,
            discovery_count: AtomicU64::new(0),
        }
    }

    /// 시드 라우터
    pub fn seeds(&self) -> &[ServerAddress] {
        &self.seeds
    }

    /// 라우팅 컨텍스트
    pub fn routing_context(&self) -> &HashMap<String, String> {
        &self.routing_context
    }

    /// 테이블 캐시
    pub fn cache(&self) -> &Arc<RoutingTableCache> {
        &self.cache
    }

    /// 지금까지 보낸 ROUTE 요청 수
    pub fn discovery_count(&self) -> u64 {
        self.discovery_count.load(Ordering::Relaxed)
    }

    /// 라우팅 테이블 조회 또는 갱신
    ///
    /// `force`가 false이고 캐시된 테이블이 `mode`에 대해 stale이 아니면
    /// 네트워크 요청 없이 돌려줍니다. 같은 데이터베이스에 대한 동시 갱신은
    /// 하나로 합쳐지며, 기다린 호출자는 먼저 끝난 갱신 결과를 재사용합니다.
    /// `bookmarks`는 시드 라우터 경로에서만 ROUTE 요청에 첨부됩니다.
    pub async fn get_or_refresh(
        &self,
        database: &str,
        mode: AccessMode,
        bookmarks: &[String],
        force: bool,
    ) -> DriverResult<RoutingLookup> {
        let observed = self.cache.get_with_generation(database);

        if !force {
            if let Some((table, _)) = &observed {
                if !table.is_stale_for(mode) {
                    tracing::trace!("Routing table cache hit for database '{}'", database);
                    return Ok(RoutingLookup {
                        table: Arc::clone(table),
                        refreshed: false,
                    });
                }
            }
        }

        let observed_generation = observed.as_ref().map(|(_, g)| *g).unwrap_or(0);
        let lock = self.cache.refresh_lock(database);
        let guard = lock.lock().await;

        if let Some((table, generation)) = self.cache.get_with_generation(database) {
            if generation != observed_generation && !table.is_expired() {
                tracing::debug!(
                    "Reusing routing table for database '{}' refreshed concurrently",
                    database
                );
                return Ok(RoutingLookup {
                    table,
                    refreshed: true,
                });
            }
        }

        let existing = self.cache.get(database);
        let table = match self.discover(database, existing.as_deref(), bookmarks).await {
            Ok(table) => table,
            Err(e) => {
                if Self::is_database_not_found(&e) {
                    // 없는 데이터베이스의 테이블과 잠금은 남기지 않음
                    drop(guard);
                    drop(lock);
                    self.cache.invalidate(database);
                }
                return Err(e);
            }
        };
        let (table, _) = self.cache.put(table);

        Ok(RoutingLookup {
            table,
            refreshed: true,
        })
    }

    async fn discover(
        &self,
        database: &str,
        existing: Option<&RoutingTable>,
        bookmarks: &[String],
    ) -> DriverResult<RoutingTable> {
        let episode = self.registry.epoch();

        let table = match existing.filter(|t| t.has_routers()) {
            Some(existing) => {
                match self.try_routers(database, &existing.routers, false, bookmarks).await {
                    Ok(table) => table,
                    Err(e) if Self::is_exhausted(&e) => {
                        tracing::warn!(
                            "Known routers failed for database '{}', falling back to seed routers",
                            database
                        );
                        self.try_routers(database, &self.seeds, true, bookmarks).await?
                    }
                    Err(e) => return Err(e),
                }
            }
            None => self.try_routers(database, &self.seeds, true, bookmarks).await?,
        };

        self.registry.restore_listed(table.all_servers(), episode);
        tracing::debug!(
            "Routing table for database '{}': routers={:?} writers={:?} readers={:?} ttl={:?}",
            database,
            table.routers,
            table.writers,
            table.readers,
            table.ttl
        );

        Ok(table)
    }

    fn is_database_not_found(err: &DriverError) -> bool {
        matches!(
            err,
            DriverError::Discovery {
                kind: DiscoveryErrorKind::DatabaseNotFound,
                ..
            }
        )
    }

    fn is_exhausted(err: &DriverError) -> bool {
        matches!(
            err,
            DriverError::Discovery {
                kind: DiscoveryErrorKind::RoutersExhausted,
                ..
            }
        )
    }

    async fn try_routers(
        &self,
        database: &str,
        candidates: &[ServerAddress],
        initial: bool,
        bookmarks: &[String],
    ) -> DriverResult<RoutingTable> {
        let mut tried = HashSet::new();
        let mut last_error: Option<DriverError> = None;

        for candidate in candidates {
            for router in self.registry.resolver().resolve(candidate) {
                if !tried.insert(router.clone()) {
                    continue;
                }

                let attached: &[String] = if initial { bookmarks } else { &[] };
                match self.fetch(&router, database, attached).await {
                    Ok(reply) if reply.routers.is_empty() => {
                        tracing::warn!("Router {} returned no routers, trying next", router);
                        self.registry.forget(&router);
                        last_error = Some(DriverError::protocol(format!(
                            "Router {} returned a routing table without routers",
                            router
                        )));
                    }
                    Ok(reply) => {
                        return Ok(RoutingTable::from_reply(
                            database,
                            reply,
                            self.routing_context.clone(),
                        ));
                    }
                    Err(e) => match classify_discovery(&e) {
                        DiscoveryOutcome::NextRouter => {
                            tracing::warn!("Routing discovery on {} failed: {}", router, e);
                            self.registry.forget(&router);
                            last_error = Some(e);
                        }
                        DiscoveryOutcome::DatabaseNotFound => {
                            return Err(DriverError::discovery(
                                DiscoveryErrorKind::DatabaseNotFound,
                                format!("Database '{}' not found: {}", database, e),
                            ));
                        }
                        DiscoveryOutcome::Abort => return Err(e),
                    },
                }
            }
        }

        let reason = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no routers to query".to_string());
        Err(DriverError::discovery(
            DiscoveryErrorKind::RoutersExhausted,
            format!(
                "Unable to retrieve routing information for database '{}': {}",
                database, reason
            ),
        ))
    }

    async fn fetch(
        &self,
        router: &ServerAddress,
        database: &str,
        bookmarks: &[String],
    ) -> DriverResult<RoutingReply> {
        let mut lease = self.registry.acquire(router).await?;
        self.discovery_count.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Fetching routing table for database '{}' from {}", database, router);

        let target = if database.is_empty() { None } else { Some(database) };
        lease
            .connection()?
            .route(&self.routing_context, target, bookmarks)
            .await
    }
}

impl std::fmt::Debug for RoutingTableProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingTableProvider")
            .field("seeds", &self.seeds)
            .field("routing_context", &self.routing_context)
            .field("discovery_count", &self.discovery_count())
            .finish()
    }
}
