//! Record - 쿼리 결과
//!
//! 버퍼링된 결과 레코드와 결과 요약

use std::collections::HashMap;
use std::fmt;

use super::address::ServerAddress;
use super::bookmarks::Bookmark;
use super::connector::{ProtocolVersion, RunResponse};
use super::error::{DriverError, DriverResult};
use super::types::Value;

// ============================================================================
// Record - 단일 레코드
// ============================================================================

/// 쿼리 결과 레코드
#[derive(Debug, Clone)]
pub struct Record {
    /// 컬럼 키
    keys: Vec<String>,
    /// 값들
    values: Vec<Value>,
}

impl Record {
    /// 새 레코드 생성
    pub fn new(keys: Vec<String>, values: Vec<Value>) -> Self {
        Self { keys, values }
    }

    /// 키 목록
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// 값 목록
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// 키로 값 가져오기
    pub fn get(&self, key: &str) -> Option<&Value> {
        let index = self.keys.iter().position(|k| k == key)?;
        self.values.get(index)
    }

    /// 키로 타입 변환된 값 가져오기
    pub fn get_as<T>(&self, key: &str) -> DriverResult<T>
    where
        T: TryFrom<Value, Error = DriverError>,
    {
        self.get(key)
            .cloned()
            .ok_or_else(|| DriverError::type_conversion(format!("Key '{}' not found", key)))
            .and_then(T::try_from)
    }

    /// Map으로 변환
    pub fn to_map(&self) -> HashMap<String, Value> {
        self.keys
            .iter()
            .cloned()
            .zip(self.values.iter().cloned())
            .collect()
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pairs: Vec<String> = self
            .keys
            .iter()
            .zip(self.values.iter())
            .map(|(k, v)| format!("{}: {}", k, v))
            .collect();
        write!(f, "{{{}}}", pairs.join(", "))
    }
}

// ============================================================================
// ServerInfo / ResultSummary
// ============================================================================

/// 결과를 돌려준 서버 정보
#[derive(Debug, Clone, PartialEq)]
pub struct ServerInfo {
    /// 서버 주소 (라우팅 테이블상의 주소)
    pub address: ServerAddress,
    /// 서버 에이전트
    pub agent: String,
    /// 프로토콜 버전
    pub protocol_version: ProtocolVersion,
}

/// 결과 요약
#[derive(Debug, Clone)]
pub struct ResultSummary {
    /// 데이터베이스 (서버가 알려준 경우)
    pub database: Option<String>,
    /// 서버 정보
    pub server: ServerInfo,
    /// auto-commit 완료 시 받은 북마크
    pub bookmark: Option<Bookmark>,
}

// ============================================================================
// QueryResult - 쿼리 결과
// ============================================================================

/// 쿼리 결과
#[derive(Debug, Clone)]
pub struct QueryResult {
    /// 컬럼 키
    pub keys: Vec<String>,
    /// 레코드
    pub records: Vec<Record>,
    /// 결과 요약
    pub summary: ResultSummary,
}

impl QueryResult {
    /// 응답과 서버 정보로 결과 생성
    pub(crate) fn from_response(response: RunResponse, server: ServerInfo) -> Self {
        let RunResponse {
            keys,
            records,
            bookmark,
            database,
        } = response;

        let records = records
            .into_iter()
            .map(|values| Record::new(keys.clone(), values))
            .collect();

        Self {
            keys,
            records,
            summary: ResultSummary {
                database,
                server,
                bookmark: bookmark.map(Bookmark::new),
            },
        }
    }

    /// 레코드 수
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// 빈 결과 여부
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// 단일 레코드
    pub fn single(mut self) -> DriverResult<Record> {
        if self.records.len() != 1 {
            return Err(DriverError::type_conversion(format!(
                "Expected single record, got {}",
                self.records.len()
            )));
        }
        Ok(self.records.remove(0))
    }

    /// 한 컬럼의 값들
    pub fn column(&self, key: &str) -> Vec<Value> {
        self.records
            .iter()
            .filter_map(|r| r.get(key).cloned())
            .collect()
    }
}

// ============================================================================
// Tests
// ============================================================================
