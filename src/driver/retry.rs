//! 트랜잭션 재시도 실행기
//!
//! 작업 클로저를 선택된 서버의 트랜잭션 안에서 실행하고, 실패하면 에러
//! 분류에 따라 재시도하거나 라우팅 테이블을 다시 조회합니다.
//!
//! 재시도 여부는 순수 함수 [`decide`]가 결정하므로 실제 네트워크나 시간
//! 없이 테스트할 수 있습니다.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio_util::sync::CancellationToken;

use super::address::ServerAddress;
use super::bookmarks::BookmarkManager;
use super::classify::{classify, Classification};
use super::connector::RequestContext;
use super::error::{DriverError, DriverResult, RoutingErrorKind};
use super::registry::ConnectionRegistry;
use super::routing::{RoutingTableProvider, ServerSelector};
use super::session::AccessMode;
use super::transaction::{Transaction, TransactionConfig, TransactionState};

// ============================================================================
// RetryConfig - 재시도 설정
// ============================================================================

/// 재시도 설정
///
/// | 필드 | 기본값 |
/// |------|--------|
/// | `max_retry_time` | 30초 |
/// | `max_attempts` | 제한 없음 |
/// | `initial_delay` | 1초 |
/// | `multiplier` | 2.0 |
/// | `max_delay` | 30초 |
/// | `jitter_factor` | 0.2 |
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// 최대 재시도 시간
    pub max_retry_time: Duration,
    /// 최대 시도 횟수
    pub max_attempts: Option<u32>,
    /// 첫 대기 시간
    pub initial_delay: Duration,
    /// 대기 시간 증가 배수
    pub multiplier: f64,
    /// 최대 대기 시간
    pub max_delay: Duration,
    /// 지터 비율 (0.0 ~ 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retry_time: Duration::from_secs(30),
            max_attempts: None,
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.2,
        }
    }
}

impl RetryConfig {
    /// 최대 재시도 시간 설정
    pub fn with_max_retry_time(mut self, duration: Duration) -> Self {
        self.max_retry_time = duration;
        self
    }

    /// 최대 시도 횟수 설정
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// 첫 대기 시간 설정
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// 증가 배수 설정
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// 최대 대기 시간 설정
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// 지터 비율 설정
    pub fn with_jitter_factor(mut self, factor: f64) -> Self {
        self.jitter_factor = factor.clamp(0.0, 1.0);
        self
    }

    /// `attempt`번째 실패 후 대기 시간 (지터 제외)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// 지터를 적용한 대기 시간 (`jitter`는 -1.0 ~ 1.0)
    pub fn jittered_delay(&self, attempt: u32, jitter: f64) -> Duration {
        let base = self.delay_for(attempt).as_secs_f64();
        let factor = 1.0 + self.jitter_factor * jitter.clamp(-1.0, 1.0);
        Duration::from_secs_f64((base * factor).max(0.0))
    }
}

// ============================================================================
// RetryContext / AttemptFailure / RetryDecision
// ============================================================================

/// 실행 한 번의 재시도 상태
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// 시작 시간
    pub started_at: Instant,
    /// 실패한 시도 수
    pub attempts: u32,
    /// 마지막 에러
    pub last_error: Option<DriverError>,
    /// 이번 실행에서 실패한 서버
    pub dead_servers: HashSet<ServerAddress>,
    /// 다음 시도에서 라우팅 테이블 강제 갱신 여부
    pub force_refresh: bool,
}

impl RetryContext {
    /// 새 컨텍스트
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            attempts: 0,
            last_error: None,
            dead_servers: HashSet::new(),
            force_refresh: false,
        }
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

impl Default for RetryContext {
    fn default() -> Self {
        Self::new()
    }
}

/// 시도 한 번의 실패
#[derive(Debug, Clone)]
pub struct AttemptFailure {
    /// 에러
    pub error: DriverError,
    /// 실패한 서버 (서버 선택 전 실패면 None)
    pub address: Option<ServerAddress>,
    /// 이번 시도에서 라우팅 테이블을 새로 가져왔는지 여부
    pub fresh_table: bool,
}

impl AttemptFailure {
    fn before_selection(error: DriverError, fresh_table: bool) -> Self {
        Self {
            error,
            address: None,
            fresh_table,
        }
    }

    fn at(error: DriverError, address: &ServerAddress) -> Self {
        Self {
            error,
            address: Some(address.clone()),
            fresh_table: false,
        }
    }
}

/// 재시도 결정
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// 대기 후 재시도
    Retry {
        /// 대기 시간
        delay: Duration,
        /// 주소를 잊고 라우팅 테이블을 강제 갱신할지 여부
        rediscover: bool,
    },
    /// 에러 전파
    Fail(DriverError),
}

/// 재시도 결정 (순수 함수)
///
/// `ctx.attempts`는 이번 실패를 포함한 실패 수, `jitter`는 -1.0 ~ 1.0입니다.
pub fn decide(
    config: &RetryConfig,
    ctx: &RetryContext,
    failure: &AttemptFailure,
    elapsed: Duration,
    jitter: f64,
) -> RetryDecision {
    let rediscover = match classify(&failure.error) {
        Classification::Fatal => return RetryDecision::Fail(failure.error.clone()),
        Classification::RetryableSameServer => false,
        Classification::RetryableRediscover => true,
    };

    // 방금 가져온 테이블에 역할 서버가 없으면 즉시 실패
    if failure.fresh_table
        && matches!(
            failure.error,
            DriverError::Routing {
                kind: RoutingErrorKind::NoServersAvailable(_),
                ..
            }
        )
    {
        return RetryDecision::Fail(failure.error.clone());
    }

    let attempts_exhausted = config.max_attempts.is_some_and(|max| ctx.attempts >= max);
    if attempts_exhausted || elapsed >= config.max_retry_time {
        return RetryDecision::Fail(DriverError::RetryBudgetExhausted {
            attempts: ctx.attempts,
            source: Box::new(failure.error.clone()),
        });
    }

    RetryDecision::Retry {
        delay: config.jittered_delay(ctx.attempts, jitter),
        rediscover,
    }
}

// ============================================================================
// TransactionRetryExecutor - 재시도 실행기
// ============================================================================

/// 작업 실행 환경
#[derive(Debug, Clone)]
pub struct WorkContext {
    /// 대상 데이터베이스 ("" = 기본 데이터베이스)
    pub database: String,
    /// 접근 모드
    pub mode: AccessMode,
    /// 세션 북마크
    pub bookmarks: Arc<parking_lot::Mutex<BookmarkManager>>,
    /// 트랜잭션 설정
    pub tx_config: TransactionConfig,
    /// Fetch Size
    pub fetch_size: usize,
    /// 취소 토큰
    pub cancel: CancellationToken,
}

/// 트랜잭션 재시도 실행기
pub struct TransactionRetryExecutor {
    config: RetryConfig,
    provider: Arc<RoutingTableProvider>,
    selector: Arc<ServerSelector>,
    registry: Arc<ConnectionRegistry>,
}

impl TransactionRetryExecutor {
    /// 새 실행기 생성
    pub fn new(
        config: RetryConfig,
        provider: Arc<RoutingTableProvider>,
        selector: Arc<ServerSelector>,
        registry: Arc<ConnectionRegistry>,
    ) -> Self {
        Self {
            config,
            provider,
            selector,
            registry,
        }
    }

    /// 재시도 설정
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// 작업 실행
    ///
    /// 작업은 시도마다 새 트랜잭션으로 처음부터 다시 실행됩니다. 작업이
    /// 커밋하지 않고 성공하면 실행기가 커밋합니다.
    pub async fn run<F, Fut, T>(&self, wc: &WorkContext, mut work: F) -> DriverResult<T>
    where
        F: FnMut(Transaction) -> Fut,
        Fut: Future<Output = DriverResult<T>>,
    {
        let mut ctx = RetryContext::new();

        loop {
            let outcome = tokio::select! {
                biased;
                _ = wc.cancel.cancelled() => {
                    return Err(DriverError::cancelled("Session closed during transaction"));
                }
                outcome = self.attempt(wc, &ctx, &mut work) => outcome,
            };

            let failure = match outcome {
                Ok(value) => return Ok(value),
                Err(failure) => failure,
            };

            ctx.attempts += 1;
            let jitter = rand::thread_rng().gen_range(-1.0..=1.0);
            match decide(&self.config, &ctx, &failure, ctx.elapsed(), jitter) {
                RetryDecision::Fail(err) => {
                    tracing::debug!("Transaction failed after {} attempts: {}", ctx.attempts, err);
                    return Err(err);
                }
                RetryDecision::Retry { delay, rediscover } => {
                    tracing::warn!(
                        "Transaction attempt {} failed, retrying in {:?} (rediscover: {}): {}",
                        ctx.attempts,
                        delay,
                        rediscover,
                        failure.error
                    );

                    if rediscover {
                        if let Some(address) = &failure.address {
                            self.registry.forget(address);
                            ctx.dead_servers.insert(address.clone());
                        }
                    }
                    ctx.force_refresh = rediscover;
                    ctx.last_error = Some(failure.error);

                    tokio::select! {
                        biased;
                        _ = wc.cancel.cancelled() => {
                            return Err(DriverError::cancelled("Session closed during retry backoff"));
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn attempt<F, Fut, T>(
        &self,
        wc: &WorkContext,
        ctx: &RetryContext,
        work: &mut F,
    ) -> Result<T, AttemptFailure>
    where
        F: FnMut(Transaction) -> Fut,
        Fut: Future<Output = DriverResult<T>>,
    {
        let (route_bookmarks, begin_bookmarks) = {
            let bookmarks = wc.bookmarks.lock();
            (bookmarks.values_for(&wc.database), bookmarks.values())
        };

        let lookup = self
            .provider
            .get_or_refresh(&wc.database, wc.mode, &route_bookmarks, ctx.force_refresh)
            .await
            .map_err(|e| AttemptFailure::before_selection(e, false))?;

        let address = self
            .selector
            .select_excluding(&lookup.table, wc.mode, &ctx.dead_servers)
            .map_err(|e| AttemptFailure::before_selection(e, lookup.refreshed))?;

        let lease = self
            .registry
            .acquire(&address)
            .await
            .map_err(|e| AttemptFailure::at(e, &address))?;

        let request = RequestContext {
            database: (!wc.database.is_empty()).then(|| wc.database.clone()),
            bookmarks: begin_bookmarks,
            mode: wc.mode,
            fetch_size: wc.fetch_size,
            metadata: Default::default(),
        };
        let tx = Transaction::begin(lease, wc.tx_config.clone(), request, Arc::clone(&wc.bookmarks))
            .await
            .map_err(|e| AttemptFailure::at(e, &address))?;

        match work(tx.clone()).await {
            Ok(value) => {
                // Failed 상태의 commit은 보류된 실패를 다시 보고
                if matches!(
                    tx.state().await,
                    TransactionState::Active | TransactionState::Failed
                ) {
                    tx.commit().await.map_err(|e| AttemptFailure::at(e, &address))?;
                }
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::debug!("Rollback after failed work also failed: {}", rollback_err);
                }
                Err(AttemptFailure::at(e, &address))
            }
        }
    }
}

impl std::fmt::Debug for TransactionRetryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionRetryExecutor")
            .field("config", &self.config)
            .finish()
    }
}
