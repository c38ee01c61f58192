//! 라우팅 모듈
//!
//! 클러스터 라우팅 테이블의 조회, 캐시, 서버 선택을 담당합니다.
//!
//! # 개요
//!
//! - [`RoutingTableProvider`]: 라우터에 ROUTE 요청을 보내 테이블을 가져오고,
//!   같은 데이터베이스에 대한 동시 갱신을 하나로 합칩니다.
//! - [`RoutingTableCache`]: 데이터베이스별 테이블 캐시
//! - [`ServerSelector`]: 접근 모드에 맞는 서버를 정책에 따라 선택
//!
//! # 예시
//!
//! ```ignore
//! use zeta4g_cluster_driver::driver::routing::RoutingPolicy;
//! use zeta4g_cluster_driver::driver::{AccessMode, DriverConfig, Driver, SessionConfig};
//!
//! let config = DriverConfig::builder("zeta4g://server1:7687,server2:7687")?
//!     .with_routing_policy(RoutingPolicy::LeastConnections)
//!     .build();
//! let driver = Driver::with_config(config, connector)?;
//!
//! // 읽기 세션 (READ 서버로 라우팅)
//! let session = driver.session(
//!     SessionConfig::builder().with_read_access().build()
//! )?;
//! ```

mod cache;
mod policy;
mod provider;
mod table;

#[cfg(test)]
mod scenarios;

pub use cache::RoutingTableCache;
pub use policy::{RoutingPolicy, ServerSelector};
pub use provider::{RoutingLookup, RoutingTableProvider};
pub use table::{RoutingTable, ServerRole};
