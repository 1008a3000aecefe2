//! Shared helpers for integration tests.
//!
//! [`spawn_server`] starts an in-process axum server that speaks the SSE
//! transport: `GET /health`, `GET /sse` (endpoint event followed by replies),
//! and `POST /messages/` (records the request, answers with the scripted
//! status, and pushes replies onto the open event stream).

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::Stream;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use readium_probe::config::ClientConfig;

/// Maps one posted request to the messages pushed back on the stream.
pub type Responder = Arc<dyn Fn(&Value) -> Vec<Value> + Send + Sync>;

/// Server behaviour for one test.
#[derive(Clone)]
pub struct Scenario {
    /// Status returned by `/health`.
    pub health_status: StatusCode,
    /// Payload of the endpoint event; `None` sends no endpoint event.
    pub endpoint: Option<String>,
    /// Keep the event stream open after the endpoint event.
    pub hold_open: bool,
    /// Delay before `/sse` answers with its headers.
    pub stream_delay: Option<Duration>,
    /// Status returned for every POST.
    pub post_status: StatusCode,
    /// Replies per request; consulted only when the POST is accepted.
    pub responder: Responder,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            health_status: StatusCode::OK,
            endpoint: Some("/messages/?session_id=abc123".into()),
            hold_open: true,
            stream_delay: None,
            post_status: StatusCode::ACCEPTED,
            responder: Arc::new(|request: &Value| -> Vec<Value> {
                standard_reply(request).into_iter().collect()
            }),
        }
    }
}

/// Replies of a well-behaved server offering `analyze_docs`.
pub fn standard_reply(request: &Value) -> Option<Value> {
    let id = request.get("id")?.clone();
    let result = match request.get("method")?.as_str()? {
        "initialize" => json!({
            "protocolVersion": "1.0.0",
            "capabilities": {"tools": {}},
            "serverInfo": {"name": "readium", "version": "0.1.0"}
        }),
        "tools/list" => json!({
            "tools": [
                {"name": "analyze_docs", "description": "Analyze documentation"},
                {"name": "list_files", "description": "List files"}
            ]
        }),
        "call_tool" => json!({
            "content": [{"type": "text", "text": format!("analyzed {}", request["params"]["arguments"]["path"])}],
            "isError": false
        }),
        _ => return None,
    };
    Some(json!({"jsonrpc": "2.0", "id": id, "result": result}))
}

/// One recorded POST to the side channel.
#[derive(Debug, Clone)]
pub struct RecordedPost {
    /// `session_id` query parameter.
    pub session_id: Option<String>,
    /// Parsed JSON body.
    pub body: Value,
}

impl RecordedPost {
    pub fn method(&self) -> &str {
        self.body["method"].as_str().unwrap_or("")
    }
}

struct ServerState {
    scenario: Scenario,
    events: Mutex<Option<mpsc::UnboundedSender<Event>>>,
    posts: Mutex<Vec<RecordedPost>>,
    health_hits: AtomicUsize,
    stream_opens: AtomicUsize,
}

/// Handle to a running fake server.
pub struct FakeServer {
    pub base_url: String,
    state: Arc<ServerState>,
}

impl FakeServer {
    pub fn posts(&self) -> Vec<RecordedPost> {
        self.state.posts.lock().unwrap().clone()
    }

    pub fn health_hits(&self) -> usize {
        self.state.health_hits.load(Ordering::SeqCst)
    }

    pub fn stream_opens(&self) -> usize {
        self.state.stream_opens.load(Ordering::SeqCst)
    }

    /// Client configuration pointed at this server with short timeouts.
    pub fn config(&self) -> ClientConfig {
        let mut config = ClientConfig {
            base_url: self.base_url.clone(),
            ..ClientConfig::default()
        };
        config.timeouts.settle_seconds = 0;
        config.timeouts.handshake_seconds = 1;
        config.timeouts.health_seconds = 2;
        config.timeouts.request_seconds = 5;
        config.timeouts.list_seconds = 1;
        config.timeouts.invoke_seconds = 5;
        config.dispatch.max_attempts = 3;
        config.dispatch.backoff_millis = 10;
        config
    }
}

/// Spawn the fake server on an ephemeral port.
pub async fn spawn_server(scenario: Scenario) -> FakeServer {
    let state = Arc::new(ServerState {
        scenario,
        events: Mutex::new(None),
        posts: Mutex::new(Vec::new()),
        health_hits: AtomicUsize::new(0),
        stream_opens: AtomicUsize::new(0),
    });

    let app = Router::new()
        .route("/health", get(health))
        .route("/sse", get(sse))
        .route("/messages/", post(messages))
        .with_state(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral");
    let addr = listener.local_addr().expect("local addr");

    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    FakeServer {
        base_url: format!("http://{addr}"),
        state,
    }
}

/// A base URL nothing listens on.
pub async fn unreachable_base_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);
    format!("http://{addr}")
}

async fn health(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    state.health_hits.fetch_add(1, Ordering::SeqCst);
    (
        state.scenario.health_status,
        Json(json!({"status": "ok", "service": "readium"})),
    )
}

async fn sse(
    State(state): State<Arc<ServerState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    state.stream_opens.fetch_add(1, Ordering::SeqCst);
    if let Some(delay) = state.scenario.stream_delay {
        tokio::time::sleep(delay).await;
    }

    let (tx, rx) = mpsc::unbounded_channel::<Event>();
    let _ = tx.send(Event::default().comment("connected"));
    if let Some(endpoint) = &state.scenario.endpoint {
        let _ = tx.send(Event::default().event("endpoint").data(endpoint));
    }
    if state.scenario.hold_open {
        *state.events.lock().unwrap() = Some(tx);
    }

    let stream = futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (Ok::<Event, Infallible>(event), rx))
    });
    Sse::new(stream)
}

async fn messages(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> StatusCode {
    state.posts.lock().unwrap().push(RecordedPost {
        session_id: query.get("session_id").cloned(),
        body: body.clone(),
    });

    let status = state.scenario.post_status;
    if status == StatusCode::ACCEPTED {
        let replies = (state.scenario.responder)(&body);
        if let Some(tx) = state.events.lock().unwrap().as_ref() {
            for reply in replies {
                let _ = tx.send(Event::default().event("message").data(reply.to_string()));
            }
        }
    }
    status
}
