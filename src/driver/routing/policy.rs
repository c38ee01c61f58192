//! 라우팅 정책
//!
//! 서버 선택 전략을 정의합니다.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::Rng;

use super::super::address::ServerAddress;
use super::super::error::{DriverError, DriverResult};
use super::super::registry::ConnectionRegistry;
use super::super::session::AccessMode;
use super::table::{RoutingTable, ServerRole};

/// 라우팅 정책
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RoutingPolicy {
    /// 라운드 로빈 (기본값)
    #[default]
    RoundRobin,
    /// 최소 연결 (동률이면 라운드 로빈 순서)
    LeastConnections,
    /// 랜덤
    Random,
}

/// 서버 선택기
///
/// 데이터베이스와 역할별 커서를 유지하며, 잊혀진 주소는 건너뜁니다.
pub struct ServerSelector {
    /// 라우팅 정책
    policy: RoutingPolicy,
    /// 연결 레지스트리
    registry: Arc<ConnectionRegistry>,
    /// (데이터베이스, 역할)별 커서
    cursors: Mutex<HashMap<(String, ServerRole), usize>>,
}

impl ServerSelector {
    /// 새 선택기 생성
    pub fn new(policy: RoutingPolicy, registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            policy,
            registry,
            cursors: Mutex::new(HashMap::new()),
        }
    }

    /// 현재 정책 조회
    pub fn policy(&self) -> RoutingPolicy {
        self.policy
    }

    /// 접근 모드에 맞는 서버 선택
    pub fn select(&self, table: &RoutingTable, mode: AccessMode) -> DriverResult<ServerAddress> {
        self.select_excluding(table, mode, &HashSet::new())
    }

    /// 특정 서버들을 제외하고 선택
    ///
    /// 제외 후 후보가 없으면 제외 목록 없이 다시 고릅니다 (후보가 하나뿐이면
    /// 같은 서버가 다시 선택될 수 있음).
    pub fn select_excluding(
        &self,
        table: &RoutingTable,
        mode: AccessMode,
        excluded: &HashSet<ServerAddress>,
    ) -> DriverResult<ServerAddress> {
        let role = ServerRole::from(mode);
        let live: Vec<&ServerAddress> = table
            .servers_for(role)
            .iter()
            .filter(|a| !self.registry.is_forgotten(a))
            .collect();

        let preferred: Vec<&ServerAddress> = live
            .iter()
            .copied()
            .filter(|a| !excluded.contains(*a))
            .collect();

        let candidates = if preferred.is_empty() { live } else { preferred };
        if candidates.is_empty() {
            return Err(DriverError::no_servers(role, table.database.clone()));
        }

        let start = self.next_cursor(&table.database, role);
        let chosen = match self.policy {
            RoutingPolicy::RoundRobin => candidates[start % candidates.len()],
            RoutingPolicy::Random => candidates[rand::thread_rng().gen_range(0..candidates.len())],
            RoutingPolicy::LeastConnections => {
                let n = candidates.len();
                (0..n)
                    .map(|offset| candidates[(start + offset) % n])
                    .min_by_key(|a| self.registry.in_use(a))
                    .unwrap_or(candidates[start % n])
            }
        };

        tracing::trace!(
            "Selected {} server {} for database '{}'",
            role.as_str(),
            chosen,
            table.database
        );
        Ok(chosen.clone())
    }

    /// 데이터베이스의 선택 커서 제거
    pub fn forget_database(&self, database: &str) {
        self.cursors.lock().retain(|(db, _), _| db != database);
    }

    /// 모든 선택 커서 제거
    pub fn clear(&self) {
        self.cursors.lock().clear();
    }

    /// 커서가 있는 데이터베이스 수
    pub fn tracked_databases(&self) -> usize {
        let cursors = self.cursors.lock();
        cursors.keys().map(|(db, _)| db).collect::<HashSet<_>>().len()
    }

    fn next_cursor(&self, database: &str, role: ServerRole) -> usize {
        let mut cursors = self.cursors.lock();
        let cursor = cursors.entry((database.to_string(), role)).or_insert(0);
        let current = *cursor;
        *cursor = cursor.wrapping_add(1);
        current
    }
}

impl std::fmt::Debug for ServerSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerSelector")
            .field("policy", &self.policy)
            .finish()
    }
}
