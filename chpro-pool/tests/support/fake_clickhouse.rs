use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use tokio::task::JoinHandle;

/// One request received by the fake server.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub params: HashMap<String, String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RecordedRequest {
    pub fn sql(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

#[derive(Clone)]
struct FakeState {
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    reply: Arc<Mutex<Option<(u16, String)>>>,
    rows: Arc<Mutex<Vec<Vec<serde_json::Value>>>>,
    databases: Arc<Mutex<BTreeSet<String>>>,
    delete_on_receive: Arc<Mutex<Option<PathBuf>>>,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            requests: Arc::default(),
            reply: Arc::default(),
            rows: Arc::default(),
            databases: Arc::new(Mutex::new(BTreeSet::from(["default".to_string()]))),
            delete_on_receive: Arc::default(),
        }
    }
}

/// In-process stand-in for the ClickHouse HTTP interface.
///
/// `GET /ping` answers `Ok.`; `POST /` records the request and answers
/// with the configured reply, or with the configured rows in `JSONCompact`
/// when the statement asks for that format.
///
/// Like the real server, a `database` URL setting naming a database that
/// does not exist fails the request with code 81. Only `default` exists at
/// start; `CREATE DATABASE IF NOT EXISTS <name>` adds one.
pub struct FakeClickHouse {
    addr: SocketAddr,
    state: FakeState,
    handle: JoinHandle<()>,
}

impl FakeClickHouse {
    pub async fn start() -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind fake server");
        let addr = listener.local_addr().expect("Failed to read local address");

        let state = FakeState::default();
        let app = Router::new()
            .route("/ping", get(ping))
            .route("/", post(statement))
            .with_state(state.clone());

        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { addr, state, handle }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Answer every following POST with `status` and `body`.
    pub fn respond_with(&self, status: u16, body: &str) {
        *self.state.reply.lock().unwrap() = Some((status, body.to_string()));
    }

    pub fn set_rows(&self, rows: Vec<Vec<serde_json::Value>>) {
        *self.state.rows.lock().unwrap() = rows;
    }

    /// Delete `path` as soon as the next POST body has been received.
    pub fn delete_on_receive(&self, path: PathBuf) {
        *self.state.delete_on_receive.lock().unwrap() = Some(path);
    }

    pub fn databases(&self) -> BTreeSet<String> {
        self.state.databases.lock().unwrap().clone()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }
}

impl Drop for FakeClickHouse {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Port on 127.0.0.1 with nothing listening.
pub async fn closed_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind probe listener");
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

async fn ping() -> &'static str {
    "Ok.\n"
}

async fn statement(
    State(state): State<FakeState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, String) {
    let sql = String::from_utf8_lossy(&body).into_owned();
    let session_database = params.get("database").cloned();
    if let Some(path) = state.delete_on_receive.lock().unwrap().take() {
        let _ = std::fs::remove_file(path);
    }
    state.requests.lock().unwrap().push(RecordedRequest {
        params,
        headers,
        body,
    });

    if let Some(database) = session_database {
        if !state.databases.lock().unwrap().contains(&database) {
            return (
                StatusCode::NOT_FOUND,
                format!("Code: 81. DB::Exception: Database {} does not exist. (UNKNOWN_DATABASE)", database),
            );
        }
    }

    if let Some(name) = sql.trim().strip_prefix("CREATE DATABASE IF NOT EXISTS ") {
        state.databases.lock().unwrap().insert(name.trim().to_string());
    }

    if let Some((status, reply)) = state.reply.lock().unwrap().clone() {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return (status, reply);
    }

    if sql.contains("FORMAT JSONCompact") {
        let rows = state.rows.lock().unwrap().clone();
        let reply = serde_json::json!({
            "meta": [],
            "data": rows,
            "rows": rows.len(),
        });
        return (StatusCode::OK, reply.to_string());
    }

    (StatusCode::OK, String::new())
}
