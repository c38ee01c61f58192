//! 클러스터 시나리오 테스트
//!
//! 스텁 클러스터 위에서 드라이버, 세션, 재시도 실행기, 라우팅 계층을
//! 함께 실행합니다.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use crate::driver::connector::ProtocolVersion;
use crate::driver::stub::{int_records, routing_reply, StubCluster};
use crate::driver::{
    AccessMode, Bookmark, DiscoveryErrorKind, Driver, DriverConfig, DriverError,
    RoutingErrorKind, ServerAddress, SessionConfig,
};

use super::ServerRole;

fn config(uri: &str) -> DriverConfig {
    DriverConfig::builder(uri)
        .unwrap()
        .with_retry_delays(Duration::from_millis(1), Duration::from_millis(5))
        .with_retry_jitter_factor(0.0)
        .with_connection_timeout(Duration::from_millis(200))
        .build()
}

fn driver(cluster: &Arc<StubCluster>, uri: &str) -> Driver {
    Driver::with_config(config(uri), cluster.clone()).unwrap()
}

fn addr(s: &str) -> ServerAddress {
    ServerAddress::parse(s).unwrap()
}

fn standard_cluster() -> Arc<StubCluster> {
    let cluster = StubCluster::new();
    cluster.server("router1:9001").route_reply(routing_reply(
        300,
        &["router1:9001"],
        &["reader1:9010", "reader2:9011"],
        &["writer1:9020", "writer2:9021"],
    ));
    cluster
}

fn read_session() -> SessionConfig {
    SessionConfig::builder().with_read_access().build()
}

// ============================================================================
// 라우팅 조회
// ============================================================================

#[tokio::test]
async fn discovery_survives_all_but_one_router_failing() {
    let cluster = StubCluster::new();
    cluster
        .server("router1:9001")
        .route_failure(DriverError::connection("connection reset"));
    cluster.server("router2:9002").refuse();
    let router3 = cluster.server("router3:9003");
    router3
        .route_reply(routing_reply(
            300,
            &["router3:9003"],
            &["reader1:9010"],
            &["writer1:9020"],
        ))
        .with_route_delay(Duration::from_millis(20));
    cluster.server("reader1:9010");

    let driver = driver(&cluster, "zeta4g://router1:9001,router2:9002,router3:9003");
    let sessions: Vec<_> = (0..4).map(|_| driver.session(read_session()).unwrap()).collect();

    let results = join_all(
        sessions
            .iter()
            .map(|s| s.read_transaction(|tx| async move { tx.run("RETURN 1").await })),
    )
    .await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(router3.route_calls(), 1);
    assert_eq!(cluster.server("router1:9001").route_calls(), 1);
    assert_eq!(driver.metrics().discovery_count, 2);
}

#[tokio::test]
async fn concurrent_leader_switch_shares_one_rediscovery() {
    let cluster = StubCluster::new();
    let router = cluster.server("router1:9001");
    router
        .route_reply(routing_reply(
            300,
            &["router1:9001"],
            &["reader1:9010"],
            &["writer1:9020"],
        ))
        .route_reply(routing_reply(
            300,
            &["router1:9001"],
            &["reader1:9010"],
            &["writer2:9021"],
        ))
        .with_route_delay(Duration::from_millis(30));
    let writer1 = cluster.server("writer1:9020");
    writer1.begin_failure(DriverError::server(
        "Neo.ClientError.Cluster.NotALeader",
        "No write operations are allowed on this database",
    ));
    let writer2 = cluster.server("writer2:9021");

    let driver = driver(&cluster, "zeta4g://router1:9001");
    driver.verify_connectivity().await.unwrap();
    assert_eq!(router.route_calls(), 1);

    let sessions: Vec<_> = (0..4)
        .map(|_| driver.session(SessionConfig::default()).unwrap())
        .collect();
    let results = join_all(
        sessions
            .iter()
            .map(|s| s.write_transaction(|tx| async move { tx.run("CREATE ()").await })),
    )
    .await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(writer1.begin_calls(), 4);
    assert_eq!(writer2.commit_calls(), 4);
    assert_eq!(router.route_calls(), 2);
    assert_eq!(driver.metrics().discovery_count, 2);
    assert_eq!(
        driver.get_routing_table("").unwrap().writers,
        vec![addr("writer2:9021")]
    );
}

#[tokio::test]
async fn write_on_table_without_writers_fails_fast() {
    let cluster = StubCluster::new();
    let router = cluster.server("router1:9001");
    router.route_reply(routing_reply(300, &["router1:9001"], &["reader1:9010"], &[]));
    let reader = cluster.server("reader1:9010");

    let driver = driver(&cluster, "zeta4g://router1:9001");
    let session = driver.session(SessionConfig::default()).unwrap();

    // 읽기는 writer 없는 테이블로도 처리
    session
        .read_transaction(|tx| async move { tx.run("RETURN 1").await })
        .await
        .unwrap();
    assert_eq!(router.route_calls(), 1);

    let calls = AtomicUsize::new(0);
    let err = session
        .write_transaction(|tx| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { tx.run("CREATE ()").await }
        })
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        DriverError::Routing {
            kind: RoutingErrorKind::NoServersAvailable(ServerRole::Write),
            ..
        }
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(router.route_calls(), 2);
    assert_eq!(reader.begin_calls(), 1);
}

#[tokio::test]
async fn resolver_fan_out_skips_unreachable_address() {
    let cluster = StubCluster::new();
    let good = cluster.server("good:9001");
    good.route_reply(routing_reply(
        300,
        &["good:9001"],
        &["reader1:9010"],
        &["writer1:9020"],
    ));
    let reader = cluster.server("reader1:9010");

    let config = DriverConfig::builder("zeta4g://seed:9001")
        .unwrap()
        .with_resolver(|_| vec![addr("bad:9001"), addr("good:9001")])
        .build();
    let driver = Driver::with_config(config, cluster.clone()).unwrap();
    let session = driver.session(read_session()).unwrap();

    for _ in 0..3 {
        session
            .read_transaction(|tx| async move { tx.run("RETURN 1").await })
            .await
            .unwrap();
    }

    assert_eq!(good.route_calls(), 1);
    assert_eq!(driver.metrics().discovery_count, 1);
    assert_eq!(reader.begin_calls(), 3);
    assert!(driver.registry().is_forgotten(&addr("bad:9001")));

    let table = driver.get_routing_table("").unwrap();
    assert!(!table.all_servers().any(|a| a == &addr("bad:9001")));
}

#[tokio::test]
async fn falls_back_to_seed_when_known_routers_fail() {
    let cluster = StubCluster::new();
    let seed = cluster.server("seed:9001");
    // TTL 0: 다음 요청에서 곧바로 다시 조회
    seed.route_reply(routing_reply(0, &["router2:9002"], &["reader1:9010"], &[]));
    cluster.server("router2:9002").refuse();
    cluster.server("reader1:9010");

    let driver = driver(&cluster, "zeta4g://seed:9001");
    let session = driver.session(read_session()).unwrap();

    for _ in 0..2 {
        session
            .read_transaction(|tx| async move { tx.run("RETURN 1").await })
            .await
            .unwrap();
    }

    assert_eq!(seed.route_calls(), 2);
}

#[tokio::test]
async fn empty_discovery_reply_moves_to_next_router() {
    let cluster = StubCluster::new();
    let router1 = cluster.server("router1:9001");
    router1.route_reply(routing_reply(300, &[], &["reader1:9010"], &[]));
    let router2 = cluster.server("router2:9002");
    router2.route_reply(routing_reply(
        300,
        &["router2:9002"],
        &["reader1:9010"],
        &["writer1:9020"],
    ));
    cluster.server("reader1:9010");

    let driver = driver(&cluster, "zeta4g://router1:9001,router2:9002");
    let session = driver.session(read_session()).unwrap();
    session
        .read_transaction(|tx| async move { tx.run("RETURN 1").await })
        .await
        .unwrap();

    assert_eq!(router1.route_calls(), 1);
    assert_eq!(router2.route_calls(), 1);
    assert_eq!(
        driver.get_routing_table("").unwrap().routers,
        vec![addr("router2:9002")]
    );
}

#[tokio::test]
async fn database_not_found_is_not_retried() {
    let cluster = standard_cluster();
    let router = cluster.server("router1:9001");
    router.route_result_for(
        "nodb",
        Err(DriverError::server(
            "Neo.ClientError.Database.DatabaseNotFound",
            "Database does not exist",
        )),
    );

    let driver = driver(&cluster, "zeta4g://router1:9001");
    let session = driver
        .session(SessionConfig::builder().with_database("nodb").build())
        .unwrap();

    let calls = AtomicUsize::new(0);
    let err = session
        .write_transaction(|tx| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { tx.run("CREATE ()").await }
        })
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        DriverError::Discovery {
            kind: DiscoveryErrorKind::DatabaseNotFound,
            ..
        }
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(router.route_calls(), 1);
    assert_eq!(router.route_databases(), vec![Some("nodb".to_string())]);
}

#[tokio::test]
async fn routing_context_sent_with_every_discovery() {
    let cluster = standard_cluster();
    let router = cluster.server("router1:9001");

    let driver = driver(&cluster, "zeta4g://router1:9001?region=west");
    driver.verify_connectivity().await.unwrap();
    driver.verify_connectivity().await.unwrap();

    let contexts = router.route_contexts();
    assert_eq!(contexts.len(), 2);
    for context in contexts {
        assert_eq!(context["region"], "west");
        assert_eq!(context["address"], "router1:9001");
    }
}

// ============================================================================
// 연결 확인
// ============================================================================

#[tokio::test]
async fn verify_connectivity_without_routing_procedure() {
    let cluster = StubCluster::new();
    let router = cluster.server("router1:9001");

    let driver = driver(&cluster, "zeta4g://router1:9001");
    let err = driver.verify_connectivity().await.unwrap_err();

    assert!(matches!(err, DriverError::ServiceUnavailable(_)));
    assert_eq!(router.route_calls(), 1);
    assert_eq!(router.run_calls(), 0);
    assert_eq!(router.begin_calls(), 0);
}

#[tokio::test]
async fn supports_multi_db_does_not_touch_routing() {
    let cluster = standard_cluster();
    let router = cluster.server("router1:9001");
    router.with_protocol(ProtocolVersion::V4_4);

    let driver = driver(&cluster, "zeta4g://router1:9001");
    assert!(driver.supports_multi_db().await.unwrap());
    assert_eq!(router.route_calls(), 0);
    assert_eq!(driver.metrics().routing_tables, 0);
}

// ============================================================================
// 서버 선택
// ============================================================================

#[tokio::test]
async fn readers_rotate_before_repeating() {
    let cluster = standard_cluster();
    let reader1 = cluster.server("reader1:9010");
    let reader2 = cluster.server("reader2:9011");

    let driver = driver(&cluster, "zeta4g://router1:9001");
    let session = driver.session(read_session()).unwrap();

    for _ in 0..2 {
        session
            .read_transaction(|tx| async move { tx.run("RETURN 1").await })
            .await
            .unwrap();
    }

    assert_eq!(reader1.begin_calls(), 1);
    assert_eq!(reader2.begin_calls(), 1);
}

#[tokio::test]
async fn summary_reports_serving_server() {
    let cluster = standard_cluster();
    cluster
        .server("writer1:9020")
        .with_agent("Zeta4G/5.1.0")
        .with_protocol(ProtocolVersion::V5_0)
        .run_reply(int_records("n", &[7]));

    let driver = driver(&cluster, "zeta4g://router1:9001");
    let session = driver.session(SessionConfig::default()).unwrap();

    let summary = session
        .write_transaction(|tx| async move {
            let result = tx.run("RETURN 7 AS n").await?;
            Ok::<_, DriverError>(result.summary)
        })
        .await
        .unwrap();

    assert_eq!(summary.server.address, addr("writer1:9020"));
    assert_eq!(summary.server.agent, "Zeta4G/5.1.0");
    assert_eq!(summary.server.protocol_version, ProtocolVersion::V5_0);
}

// ============================================================================
// 재시도
// ============================================================================

#[tokio::test]
async fn leader_switch_retries_on_second_writer() {
    let cluster = standard_cluster();
    let router = cluster.server("router1:9001");
    let writer1 = cluster.server("writer1:9020");
    writer1.run_failure(DriverError::server(
        "Neo.ClientError.Cluster.NotALeader",
        "No write operations are allowed on this database",
    ));
    let writer2 = cluster.server("writer2:9021");
    writer2.commit_bookmark("NewBookmark");

    let driver = driver(&cluster, "zeta4g://router1:9001");
    let session = driver.session(SessionConfig::default()).unwrap();

    let calls = AtomicUsize::new(0);
    session
        .write_transaction(|tx| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { tx.run("CREATE ()").await }
        })
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(writer1.commit_calls(), 0);
    assert_eq!(writer2.commit_calls(), 1);
    assert_eq!(router.route_calls(), 2);
    assert_eq!(session.last_bookmarks(), vec![Bookmark::new("NewBookmark")]);
}

#[tokio::test]
async fn transient_failure_retries_without_rediscovery() {
    let cluster = StubCluster::new();
    let router = cluster.server("router1:9001");
    router.route_reply(routing_reply(
        300,
        &["router1:9001"],
        &[],
        &["writer1:9020"],
    ));
    let writer = cluster.server("writer1:9020");
    writer
        .run_failure(DriverError::server(
            "Neo.TransientError.General.TemporarilyUnavailable",
            "busy",
        ))
        .run_reply(int_records("n", &[1]));

    let driver = driver(&cluster, "zeta4g://router1:9001");
    let session = driver.session(SessionConfig::default()).unwrap();

    let calls = AtomicUsize::new(0);
    let value = session
        .write_transaction(|tx| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { tx.run("RETURN 1 AS n").await?.single()?.get_as::<i64>("n") }
        })
        .await
        .unwrap();

    assert_eq!(value, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(router.route_calls(), 1);
    assert!(!driver.registry().is_forgotten(&addr("writer1:9020")));
}

#[tokio::test]
async fn leader_switch_at_begin_skips_work() {
    let cluster = standard_cluster();
    let router = cluster.server("router1:9001");
    let writer1 = cluster.server("writer1:9020");
    writer1.begin_failure(DriverError::server(
        "Neo.ClientError.Cluster.NotALeader",
        "No write operations are allowed on this database",
    ));
    let writer2 = cluster.server("writer2:9021");

    let driver = driver(&cluster, "zeta4g://router1:9001");
    let session = driver.session(SessionConfig::default()).unwrap();

    let calls = AtomicUsize::new(0);
    session
        .write_transaction(|tx| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { tx.run("CREATE ()").await }
        })
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(writer1.begin_calls(), 1);
    assert_eq!(writer2.begin_calls(), 1);
    assert_eq!(writer2.commit_calls(), 1);
    assert_eq!(router.route_calls(), 2);
}

#[tokio::test]
async fn transient_commit_failure_reruns_whole_unit() {
    let cluster = StubCluster::new();
    cluster.server("router1:9001").route_reply(routing_reply(
        300,
        &["router1:9001"],
        &[],
        &["writer1:9020"],
    ));
    let writer = cluster.server("writer1:9020");
    writer
        .commit_failure(DriverError::server(
            "Neo.TransientError.Transaction.DeadlockDetected",
            "deadlock detected",
        ))
        .commit_bookmark("bm:2");

    let driver = driver(&cluster, "zeta4g://router1:9001");
    let session = driver.session(SessionConfig::default()).unwrap();

    let calls = AtomicUsize::new(0);
    session
        .write_transaction(|tx| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                tx.run("CREATE (:A)").await?;
                tx.run("CREATE (:B)").await
            }
        })
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(writer.run_calls(), 4);
    assert_eq!(writer.commit_calls(), 2);
    assert_eq!(session.last_bookmarks(), vec![Bookmark::new("bm:2")]);
}

#[tokio::test]
async fn retry_budget_exhausted_after_max_attempts() {
    let cluster = StubCluster::new();
    cluster.server("router1:9001").route_reply(routing_reply(
        300,
        &["router1:9001"],
        &[],
        &["writer1:9020"],
    ));
    cluster.server("writer1:9020").refuse();

    let config = DriverConfig::builder("zeta4g://router1:9001")
        .unwrap()
        .with_retry_delays(Duration::from_millis(1), Duration::from_millis(2))
        .with_max_retry_attempts(3)
        .build();
    let driver = Driver::with_config(config, cluster.clone()).unwrap();
    let session = driver.session(SessionConfig::default()).unwrap();

    let calls = AtomicUsize::new(0);
    let err = session
        .write_transaction(|tx| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { tx.run("CREATE ()").await }
        })
        .await
        .unwrap_err();

    match err {
        DriverError::RetryBudgetExhausted { attempts, source } => {
            assert_eq!(attempts, 3);
            assert!(source.is_connection_failure());
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn client_error_propagates_on_first_attempt() {
    let cluster = standard_cluster();
    let failure = DriverError::server("Neo.ClientError.Statement.SyntaxError", "Invalid input");
    cluster.server("writer1:9020").run_failure(failure.clone());

    let driver = driver(&cluster, "zeta4g://router1:9001");
    let session = driver.session(SessionConfig::default()).unwrap();

    let calls = AtomicUsize::new(0);
    let err = session
        .write_transaction(|tx| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { tx.run("CRATE ()").await }
        })
        .await
        .unwrap_err();

    assert_eq!(err, failure);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cluster.server("writer1:9020").rollback_calls(), 0);
}

#[tokio::test]
async fn swallowed_failure_surfaces_at_commit() {
    let cluster = standard_cluster();
    let writer = cluster.server("writer1:9020");
    let failure = DriverError::server("Neo.ClientError.Statement.SyntaxError", "Invalid input");
    writer.run_failure(failure.clone());

    let driver = driver(&cluster, "zeta4g://router1:9001");
    let session = driver.session(SessionConfig::default()).unwrap();

    let err = session
        .write_transaction(|tx| async move {
            let _ignored = tx.run("CRATE ()").await;
            Ok::<_, DriverError>(())
        })
        .await
        .unwrap_err();

    assert_eq!(err, failure);
    assert_eq!(writer.commit_calls(), 0);
}

#[tokio::test]
async fn closing_session_cancels_retry() {
    let cluster = standard_cluster();
    let writer1 = addr("writer1:9020");

    let driver = driver(&cluster, "zeta4g://router1:9001");
    let session = driver.session(SessionConfig::default()).unwrap();

    let (result, _) = tokio::join!(
        session.write_transaction(|_tx| async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, DriverError>(())
        }),
        async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            session.close().await
        }
    );

    assert!(matches!(result, Err(DriverError::Cancelled(_))));
    assert_eq!(driver.registry().in_use(&writer1), 0);
    assert_eq!(cluster.server("writer1:9020").commit_calls(), 0);
}

// ============================================================================
// 북마크
// ============================================================================

#[tokio::test]
async fn committed_bookmark_supersedes_seed() {
    let cluster = standard_cluster();
    let writer = cluster.server("writer1:9020");
    writer.commit_bookmark("B");

    let driver = driver(&cluster, "zeta4g://router1:9001");
    let session = driver
        .session(SessionConfig::builder().with_bookmark("A").build())
        .unwrap();

    session
        .write_transaction(|tx| async move { tx.run("CREATE ()").await })
        .await
        .unwrap();

    assert_eq!(writer.begin_bookmarks(), vec![vec!["A".to_string()]]);
    assert_eq!(session.last_bookmarks(), vec![Bookmark::new("B")]);
}

#[tokio::test]
async fn system_bookmarks_stay_out_of_user_database() {
    let cluster = standard_cluster();
    let router = cluster.server("router1:9001");
    router.route_result_for(
        "adb",
        Ok(routing_reply(
            300,
            &["router1:9001"],
            &["reader1:9010"],
            &["writer1:9020"],
        )),
    );
    let writer = cluster.server("writer1:9020");
    writer.commit_bookmark("foo:6678");

    let driver = driver(&cluster, "zeta4g://router1:9001");
    let session = driver
        .session(
            SessionConfig::builder()
                .with_database("adb")
                .with_bookmark(Bookmark::system("sys:1234"))
                .with_bookmark("foo:5678")
                .build(),
        )
        .unwrap();
    assert_eq!(session.last_bookmarks(), vec![Bookmark::new("foo:5678")]);

    session
        .write_transaction(|tx| async move { tx.run("CREATE ()").await })
        .await
        .unwrap();

    assert_eq!(router.route_bookmarks(), vec![vec!["foo:5678".to_string()]]);
    assert_eq!(writer.begin_bookmarks(), vec![vec!["foo:5678".to_string()]]);
    assert_eq!(session.last_bookmarks(), vec![Bookmark::new("foo:6678")]);
}

#[tokio::test]
async fn bookmarks_chain_across_sessions() {
    let cluster = standard_cluster();
    let writer = cluster.server("writer1:9020");
    writer.commit_bookmark("tx95");
    let reader1 = cluster.server("reader1:9010");

    let driver = driver(&cluster, "zeta4g://router1:9001");
    let seeds: Vec<Bookmark> = (90..95).map(|i| Bookmark::new(format!("tx{}", i))).collect();

    let writes = driver
        .session(SessionConfig::builder().with_bookmarks(seeds).build())
        .unwrap();
    writes
        .write_transaction(|tx| async move { tx.run("CREATE ()").await })
        .await
        .unwrap();
    assert_eq!(writer.begin_bookmarks()[0].len(), 5);

    let reads = driver
        .session(
            SessionConfig::builder()
                .with_read_access()
                .with_bookmarks(writes.last_bookmarks())
                .build(),
        )
        .unwrap();
    reads
        .execute_transaction(AccessMode::Read, Default::default(), |tx| async move {
            tx.run("MATCH (n) RETURN n").await
        })
        .await
        .unwrap();

    assert_eq!(reader1.begin_bookmarks(), vec![vec!["tx95".to_string()]]);
}

#[tokio::test]
async fn name_resolver_applies_to_each_connection() {
    let cluster = standard_cluster();
    let lookups = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&lookups);

    let config = DriverConfig::builder("zeta4g://router1:9001")
        .unwrap()
        .with_name_resolver(move |host| {
            counter.fetch_add(1, Ordering::SeqCst);
            vec![host.to_string()]
        })
        .build();
    let driver = Driver::with_config(config, cluster.clone()).unwrap();
    driver.verify_connectivity().await.unwrap();
    assert_eq!(lookups.load(Ordering::SeqCst), 1);

    // 유휴 연결 재사용 시에는 이름 해석 없음
    driver.verify_connectivity().await.unwrap();
    assert_eq!(lookups.load(Ordering::SeqCst), 1);
}
