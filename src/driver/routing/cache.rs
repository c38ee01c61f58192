//! 라우팅 테이블 캐시
//!
//! 데이터베이스별 라우팅 테이블을 보관합니다. 맵 자체는 짧은 읽기/쓰기
//! 잠금으로 보호하고, 같은 데이터베이스에 대한 조회는 데이터베이스별
//! 비동기 잠금으로 하나로 합칩니다.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::super::address::ServerAddress;
use super::table::RoutingTable;

#[derive(Debug, Clone)]
struct CacheEntry {
    table: Arc<RoutingTable>,
    generation: u64,
}

/// 라우팅 테이블 캐시
#[derive(Debug, Default)]
pub struct RoutingTableCache {
    tables: RwLock<HashMap<String, CacheEntry>>,
    refresh_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    next_generation: AtomicU64,
}

impl RoutingTableCache {
    /// 빈 캐시 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 테이블 조회
    pub fn get(&self, database: &str) -> Option<Arc<RoutingTable>> {
        self.tables.read().get(database).map(|e| Arc::clone(&e.table))
    }

    /// 테이블과 세대 번호 조회
    pub fn get_with_generation(&self, database: &str) -> Option<(Arc<RoutingTable>, u64)> {
        self.tables
            .read()
            .get(database)
            .map(|e| (Arc::clone(&e.table), e.generation))
    }

    /// 테이블 저장, 새 세대 번호 반환
    pub fn put(&self, table: RoutingTable) -> (Arc<RoutingTable>, u64) {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let table = Arc::new(table);
        self.tables.write().insert(
            table.database.clone(),
            CacheEntry {
                table: Arc::clone(&table),
                generation,
            },
        );
        (table, generation)
    }

    /// 테이블 무효화
    ///
    /// 대기 중인 갱신이 없으면 데이터베이스의 갱신 잠금도 함께 제거합니다.
    pub fn invalidate(&self, database: &str) -> Option<Arc<RoutingTable>> {
        let removed = self.tables.write().remove(database).map(|e| e.table);
        let mut locks = self.refresh_locks.lock();
        if locks.get(database).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(database);
        }
        removed
    }

    /// 데이터베이스의 현재 세대 번호 (없으면 0)
    pub fn generation(&self, database: &str) -> u64 {
        self.tables
            .read()
            .get(database)
            .map(|e| e.generation)
            .unwrap_or(0)
    }

    /// 데이터베이스별 갱신 잠금
    pub fn refresh_lock(&self, database: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.refresh_locks.lock();
        Arc::clone(locks.entry(database.to_string()).or_default())
    }

    /// 캐시된 테이블 수
    pub fn len(&self) -> usize {
        self.tables.read().len()
    }

    /// 비어 있는지 확인
    pub fn is_empty(&self) -> bool {
        self.tables.read().is_empty()
    }

    /// 캐시된 데이터베이스 이름
    pub fn databases(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// 캐시된 모든 테이블에 나열된 주소
    pub fn listed_servers(&self) -> HashSet<ServerAddress> {
        self.tables
            .read()
            .values()
            .flat_map(|e| e.table.all_servers().cloned())
            .collect()
    }

    /// 갱신 잠금 수
    pub fn refresh_lock_count(&self) -> usize {
        self.refresh_locks.lock().len()
    }

    /// 전체 비우기 (사용 중인 갱신 잠금은 유지)
    pub fn clear(&self) {
        self.tables.write().clear();
        self.refresh_locks
            .lock()
            .retain(|_, lock| Arc::strong_count(lock) > 1);
    }
}
