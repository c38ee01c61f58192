//! 라우팅 테이블
//!
//! 클러스터의 서버 역할별 목록을 관리합니다.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::super::address::ServerAddress;
use super::super::connector::RoutingReply;
use super::super::session::AccessMode;

/// 서버 역할
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerRole {
    /// 라우팅 테이블 제공자
    Route,
    /// 쓰기 트랜잭션 처리 (리더)
    Write,
    /// 읽기 트랜잭션 처리 (팔로워)
    Read,
}

impl ServerRole {
    /// 문자열에서 역할 파싱
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "ROUTE" => Some(Self::Route),
            "WRITE" => Some(Self::Write),
            "READ" => Some(Self::Read),
            _ => None,
        }
    }

    /// 역할을 문자열로 변환
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Route => "ROUTE",
            Self::Write => "WRITE",
            Self::Read => "READ",
        }
    }
}

impl From<AccessMode> for ServerRole {
    fn from(mode: AccessMode) -> Self {
        match mode {
            AccessMode::Read => Self::Read,
            AccessMode::Write => Self::Write,
        }
    }
}

/// 라우팅 테이블
///
/// 값 타입이며 캐시는 `Arc<RoutingTable>`로 공유합니다. 갱신은 항상 새
/// 테이블로 교체합니다.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    /// 데이터베이스 이름 (빈 문자열이면 기본 데이터베이스)
    pub database: String,
    /// 라우터 목록 (라우팅 테이블 조회용)
    pub routers: Vec<ServerAddress>,
    /// 라이터 목록 (쓰기 트랜잭션용)
    pub writers: Vec<ServerAddress>,
    /// 리더 목록 (읽기 트랜잭션용)
    pub readers: Vec<ServerAddress>,
    /// 조회 시 서버로 되돌려 보내는 라우팅 컨텍스트
    pub routing_context: HashMap<String, String>,
    /// TTL
    pub ttl: Duration,
    /// 생성 시간
    pub updated_at: Instant,
}

impl RoutingTable {
    /// ROUTE 응답으로 테이블 생성
    ///
    /// 역할별 목록의 중복 주소는 첫 항목만 남깁니다.
    pub fn from_reply(
        database: impl Into<String>,
        reply: RoutingReply,
        routing_context: HashMap<String, String>,
    ) -> Self {
        Self {
            database: database.into(),
            routers: dedup(reply.routers),
            writers: dedup(reply.writers),
            readers: dedup(reply.readers),
            routing_context,
            ttl: Duration::from_secs(reply.ttl),
            updated_at: Instant::now(),
        }
    }

    /// 만료 시각 (표현할 수 없을 만큼 먼 TTL이면 None, 만료되지 않음)
    pub fn expires_at(&self) -> Option<Instant> {
        self.updated_at.checked_add(self.ttl)
    }

    /// 라우팅 테이블이 만료되었는지 확인
    pub fn is_expired(&self) -> bool {
        self.updated_at.elapsed() >= self.ttl
    }

    /// 접근 모드 기준 stale 여부
    ///
    /// 만료되었거나 라우터가 없거나, 해당 역할 목록이 비어 있으면 stale입니다.
    pub fn is_stale_for(&self, mode: AccessMode) -> bool {
        self.is_expired()
            || self.routers.is_empty()
            || self.servers_for(ServerRole::from(mode)).is_empty()
    }

    /// 역할별 서버 목록
    pub fn servers_for(&self, role: ServerRole) -> &[ServerAddress] {
        match role {
            ServerRole::Route => &self.routers,
            ServerRole::Write => &self.writers,
            ServerRole::Read => &self.readers,
        }
    }

    /// 쓰기 가능한 서버가 있는지 확인
    pub fn has_writers(&self) -> bool {
        !self.writers.is_empty()
    }

    /// 읽기 가능한 서버가 있는지 확인
    pub fn has_readers(&self) -> bool {
        !self.readers.is_empty()
    }

    /// 라우터가 있는지 확인
    pub fn has_routers(&self) -> bool {
        !self.routers.is_empty()
    }

    /// 테이블에 나타난 모든 주소
    pub fn all_servers(&self) -> impl Iterator<Item = &ServerAddress> {
        self.routers
            .iter()
            .chain(self.writers.iter())
            .chain(self.readers.iter())
    }
}

fn dedup(addresses: Vec<ServerAddress>) -> Vec<ServerAddress> {
    let mut unique = Vec::with_capacity(addresses.len());
    for address in addresses {
        if !unique.contains(&address) {
            unique.push(address);
        }
    }
    unique
}
