//! HTTP connection tests against an in-process fake server

use std::sync::Arc;

use chpro_core::{ClusterConfig, ConnectionError, HostAddress};
use chpro_pool::{create_database, Connection, ConnectionOptions, Connector, HttpConnector, Pool};
use serde_json::json;

#[allow(dead_code)]
#[path = "support/fake_clickhouse.rs"]
mod fake_clickhouse;

use fake_clickhouse::{closed_port, FakeClickHouse};

fn config(hosts: &[&str], http_port: u16) -> ClusterConfig {
    ClusterConfig {
        hosts: hosts.iter().map(|h| HostAddress::new(*h, 9000)).collect(),
        http_port,
        database: "stats".to_string(),
        username: "loader".to_string(),
        password: "s3cret".to_string(),
        block_size: 5000,
        ..Default::default()
    }
}

async fn connect(config: &ClusterConfig, index: usize) -> Arc<dyn Connection> {
    let options = ConnectionOptions::for_host(config, index).unwrap();
    HttpConnector::new().connect(options).await.unwrap()
}

#[tokio::test]
async fn test_ping() {
    let server = FakeClickHouse::start().await;
    let conn = connect(&config(&["127.0.0.1"], server.port()), 0).await;
    conn.ping().await.unwrap();
    assert_eq!(conn.host().as_str(), "127.0.0.1:9000");
}

#[tokio::test]
async fn test_ping_refused() {
    let port = closed_port().await;
    let conn = connect(&config(&["127.0.0.1"], port), 0).await;
    let err = conn.ping().await.unwrap_err();
    assert!(matches!(err, ConnectionError::Transport { ref host, .. } if host == &format!("127.0.0.1:{}", port)));
}

#[tokio::test]
async fn test_query_binds_parameters_and_settings() {
    let server = FakeClickHouse::start().await;
    server.set_rows(vec![vec![json!("metrika")]]);
    let conn = connect(&config(&["127.0.0.1"], server.port()), 0).await;

    let rows = conn
        .query(
            "SELECT cluster FROM system.clusters WHERE cluster = {cluster:String}",
            &[("cluster", "metrika")],
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get_str(0), Some("metrika"));

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(
        request.sql(),
        "SELECT cluster FROM system.clusters WHERE cluster = {cluster:String} FORMAT JSONCompact"
    );
    assert_eq!(request.params["param_cluster"], "metrika");
    assert!(!request.params.contains_key("database"));
    assert_eq!(request.params["user"], "loader");
    assert_eq!(request.params["password"], "s3cret");
    assert_eq!(request.params["max_block_size"], "5000");
}

#[tokio::test]
async fn test_query_strips_trailing_semicolon() {
    let server = FakeClickHouse::start().await;
    let conn = connect(&config(&["127.0.0.1"], server.port()), 0).await;
    let rows = conn.query("SELECT 1;", &[]).await.unwrap();
    assert!(rows.is_empty());
    assert_eq!(server.requests()[0].sql(), "SELECT 1 FORMAT JSONCompact");
}

#[tokio::test]
async fn test_server_error() {
    let server = FakeClickHouse::start().await;
    server.respond_with(500, "Code: 60. DB::Exception: Table stats.nope doesn't exist\n");
    let conn = connect(&config(&["127.0.0.1"], server.port()), 0).await;

    let err = conn.execute("DROP TABLE stats.nope").await.unwrap_err();
    match err {
        ConnectionError::Server { status, body, .. } => {
            assert_eq!(status, 500);
            assert_eq!(body, "Code: 60. DB::Exception: Table stats.nope doesn't exist");
        }
        other => panic!("Expected Server error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_undecodable_response() {
    let server = FakeClickHouse::start().await;
    server.respond_with(200, "not json");
    let conn = connect(&config(&["127.0.0.1"], server.port()), 0).await;
    let err = conn.query("SELECT 1", &[]).await.unwrap_err();
    assert!(matches!(err, ConnectionError::Decode { .. }));
}

#[tokio::test]
async fn test_transaction_runs_statements() {
    let server = FakeClickHouse::start().await;
    let conn = connect(&config(&["127.0.0.1"], server.port()), 0).await;

    let mut tx = conn.begin().await.unwrap();
    tx.execute("CREATE DATABASE IF NOT EXISTS stats").await.unwrap();
    tx.commit().await.unwrap();

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].sql(), "CREATE DATABASE IF NOT EXISTS stats");
    assert!(!requests[0].params.contains_key("param_cluster"));
}

#[tokio::test]
async fn test_statements_fail_over_in_order() {
    // The fake listens on 127.0.0.1 only, so 127.0.0.2 refuses the connection
    let server = FakeClickHouse::start().await;
    let cfg = config(&["127.0.0.2", "127.0.0.1"], server.port());
    let conn = connect(&cfg, 0).await;

    conn.execute("CREATE DATABASE IF NOT EXISTS stats").await.unwrap();
    assert_eq!(server.requests().len(), 1);

    // Ping reports the primary host only
    assert!(conn.ping().await.is_err());
}

#[tokio::test]
async fn test_all_endpoints_refused() {
    let port = closed_port().await;
    let conn = connect(&config(&["127.0.0.1", "127.0.0.2"], port), 0).await;
    let err = conn.execute("SELECT 1").await.unwrap_err();
    assert!(matches!(err, ConnectionError::Transport { .. }));
}

#[tokio::test]
async fn test_create_database_on_fresh_server() {
    let server = FakeClickHouse::start().await;
    let config = config(&["127.0.0.1"], server.port());
    assert!(!server.databases().contains("stats"));

    let pool = Pool::connect(&config, &HttpConnector::new()).await.unwrap();
    create_database(&pool, &config).await.unwrap();

    assert!(server.databases().contains("stats"));
    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].sql(), "CREATE DATABASE IF NOT EXISTS stats");
    assert!(!requests[0].params.contains_key("database"));
}
