//! Capability detection tests

use chpro_pool::{detect_allow_distributed, detect_allow_replicated, Pool, Row};
use chpro_test_utils::MockCluster;
use serde_json::json;

async fn pool_for(cluster: &MockCluster) -> Pool {
    Pool::connect(&cluster.config(), cluster).await.unwrap()
}

#[tokio::test]
async fn test_replicated_when_every_host_has_zookeeper() {
    let cluster = MockCluster::new(&["ch1", "ch2", "ch3"]);
    for host in cluster.addresses() {
        cluster.host(host.as_str()).set_zookeeper(true);
    }
    let pool = pool_for(&cluster).await;
    let mut config = cluster.config();

    assert!(detect_allow_replicated(&pool, &mut config).await);
    assert!(config.use_replicated);
    assert_eq!(config.table_suffix, "_replicated");
}

#[tokio::test]
async fn test_one_host_without_zookeeper_disables_replication() {
    let cluster = MockCluster::new(&["ch1", "ch2", "ch3"]);
    cluster.host("ch1").set_zookeeper(true);
    cluster.host("ch3").set_zookeeper(true);
    let pool = pool_for(&cluster).await;
    let mut config = cluster.config();

    assert!(!detect_allow_replicated(&pool, &mut config).await);
    assert!(!config.use_replicated);
    assert_eq!(config.table_suffix, "_local");
}

#[tokio::test]
async fn test_first_disagreeing_host_short_circuits() {
    let cluster = MockCluster::new(&["ch1", "ch2", "ch3"]);
    cluster.host("ch1").set_zookeeper(true);
    cluster.host("ch3").set_zookeeper(true);
    cluster.host("ch3").fail_queries(true);
    let pool = pool_for(&cluster).await;
    let mut config = cluster.config();

    assert!(!detect_allow_replicated(&pool, &mut config).await);
    // ch2 said no, ch3 was never asked
    assert!(cluster.host("ch3").queries().is_empty());
}

#[tokio::test]
async fn test_query_error_disables_replication() {
    let cluster = MockCluster::new(&["ch1"]);
    cluster.host("ch1").set_zookeeper(true);
    cluster.host("ch1").fail_queries(true);
    let pool = pool_for(&cluster).await;
    let mut config = cluster.config();

    assert!(!detect_allow_replicated(&pool, &mut config).await);
    assert_eq!(config.table_suffix, "_local");
}

#[tokio::test]
async fn test_unexpected_value_disables_replication() {
    let cluster = MockCluster::new(&["ch1", "ch2"]);
    cluster.host("ch1").set_zookeeper(true);
    cluster
        .host("ch2")
        .set_query_rows("system.tables", vec![Row::new(vec![json!(42)])]);
    let pool = pool_for(&cluster).await;
    let mut config = cluster.config();

    assert!(!detect_allow_replicated(&pool, &mut config).await);
}

#[tokio::test]
async fn test_detection_uses_live_hosts_only() {
    let cluster = MockCluster::new(&["ch1", "ch2"]);
    cluster.host("ch1").set_zookeeper(true);
    let pool = pool_for(&cluster).await;

    cluster.host("ch2").kill();
    pool.check_health().await.unwrap();

    let mut config = cluster.config();
    assert!(detect_allow_replicated(&pool, &mut config).await);
}

#[tokio::test]
async fn test_distributed_when_every_host_knows_cluster() {
    let cluster = MockCluster::new(&["ch1", "ch2"]);
    for host in cluster.addresses() {
        cluster.host(host.as_str()).add_cluster("metrika");
    }
    let pool = pool_for(&cluster).await;
    let mut config = cluster.config();
    config.cluster_name = "metrika".to_string();

    assert!(detect_allow_distributed(&pool, &mut config).await);
    assert!(config.use_distributed);
}

#[tokio::test]
async fn test_distributed_agreement_required() {
    let cluster = MockCluster::new(&["ch1", "ch2", "ch3"]);
    cluster.host("ch1").add_cluster("metrika");
    cluster.host("ch2").add_cluster("other");
    cluster.host("ch3").add_cluster("metrika");
    let pool = pool_for(&cluster).await;
    let mut config = cluster.config();
    config.cluster_name = "metrika".to_string();
    config.use_distributed = true;

    assert!(!detect_allow_distributed(&pool, &mut config).await);
    assert!(!config.use_distributed);
    assert!(cluster.host("ch3").queries().is_empty());
}

#[tokio::test]
async fn test_empty_cluster_name_skips_probe() {
    let cluster = MockCluster::new(&["ch1"]);
    cluster.host("ch1").add_cluster("");
    let pool = pool_for(&cluster).await;
    let mut config = cluster.config();
    config.cluster_name = String::new();

    assert!(!detect_allow_distributed(&pool, &mut config).await);
    assert!(!config.use_distributed);
    assert!(cluster.host("ch1").queries().is_empty());
}
