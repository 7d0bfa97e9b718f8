//! Transport tests against an in-process fake backend.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::Stream;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use playground_sim::{
    ChannelKind, ClientConfig, EventHandler, FallbackPolicy, HttpTransport, Phase, ResponseSource, ScenarioId,
    SimulationApi, SimulationId, SimulationSession, StartRequest, StreamEvent, StreamEventKind, TransportError,
    PlaygroundError,
};

#[derive(Default)]
struct Backend {
    polls: AtomicUsize,
    fail_first_poll: bool,
    /// Answer polls with no updates.
    quiet: bool,
    start_bodies: Mutex<Vec<Value>>,
}

/// Envelopes every realtime route delivers, in order.
fn script() -> Vec<String> {
    vec![
        json!({"type": "pipeline_update", "payload": {"steps": [{"index": 2, "status": "completed"}]}}).to_string(),
        json!({"type": "heartbeat", "payload": {}}).to_string(),
        json!({"type": "metric_update", "payload": {"metrics": {"recall": 0.93}}}).to_string(),
        json!({"type": "complete", "payload": {"metrics": {"impactScore": 0.9}}, "timestamp": 1_700_000_000_000_i64})
            .to_string(),
    ]
}

async fn ws_route(ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(|mut socket| async move {
        for frame in script() {
            if socket.send(Message::Text(frame.into())).await.is_err() {
                return;
            }
        }
        // Hold the socket open until the client closes it.
        while let Some(Ok(_)) = socket.recv().await {}
    })
}

async fn sse_route() -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = script().into_iter().map(|data| Ok(Event::default().data(data)));
    Sse::new(futures_util::stream::iter(events))
}

async fn status_route(State(backend): State<Arc<Backend>>, Path(_id): Path<String>) -> Response {
    let n = backend.polls.fetch_add(1, Ordering::SeqCst);
    if backend.fail_first_poll && n == 0 {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    if backend.quiet {
        return Json(json!({ "updates": [] })).into_response();
    }
    let updates: Vec<Value> = script()
        .iter()
        .map(|s| {
            let mut envelope: Value = serde_json::from_str(s).unwrap();
            let payload = envelope.as_object_mut().unwrap().remove("payload").unwrap();
            envelope["data"] = payload;
            envelope
        })
        .collect();
    Json(json!({ "updates": updates })).into_response()
}

async fn start_route(State(backend): State<Arc<Backend>>, Json(body): Json<Value>) -> Json<Value> {
    backend.start_bodies.lock().unwrap().push(body);
    Json(json!({
        "success": true,
        "simulationId": "sim_backend",
        "pipelineUpdates": [
            {"index": 0, "status": "completed"},
            {"index": 1, "status": "in_progress"}
        ],
        "metrics": {"accuracy": 0.9}
    }))
}

async fn decision_route() -> Json<Value> {
    Json(json!({"success": true, "metrics": {"costSavings": 1000}}))
}

fn router(backend: Arc<Backend>, websocket: bool, sse: bool) -> Router {
    let mut app = Router::new()
        .route("/api/interactive/start", post(start_route))
        .route("/api/interactive/decision", post(decision_route))
        .route("/api/interactive/status/{id}", get(status_route));
    if websocket {
        app = app.route("/ws/interactive/{id}", get(ws_route));
    }
    if sse {
        app = app.route("/api/interactive/stream/{id}", get(sse_route));
    }
    app.with_state(backend)
}

async fn serve(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn transport(addr: SocketAddr) -> HttpTransport {
    let config = ClientConfig::default()
        .with_base_url(&format!("http://{addr}"))
        .unwrap()
        .with_poll_interval(Duration::from_millis(50))
        .with_connect_timeout(Duration::from_secs(2));
    HttpTransport::new(config).unwrap()
}

fn collector() -> (EventHandler, mpsc::UnboundedReceiver<StreamEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler: EventHandler = Arc::new(move |event| {
        let _ = tx.send(event);
    });
    (handler, rx)
}

/// Collect events up to and including `complete`.
async fn until_complete(rx: &mut mpsc::UnboundedReceiver<StreamEvent>) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for stream")
            .expect("stream handler dropped");
        let done = event.is_complete();
        events.push(event);
        if done {
            return events;
        }
    }
}

fn assert_scripted_run(events: &[StreamEvent]) {
    let kinds: Vec<&str> = events.iter().map(|e| e.kind.type_name()).collect();
    assert_eq!(kinds, vec!["pipeline_update", "metric_update", "complete"]);
    let StreamEventKind::Complete { metrics } = &events[2].kind else {
        panic!("expected complete");
    };
    assert_eq!(metrics["impactScore"], json!(0.9));
}

#[tokio::test]
async fn websocket_is_preferred() {
    let addr = serve(router(Arc::default(), true, true)).await;
    let (handler, mut rx) = collector();

    let conn = transport(addr)
        .connect_realtime(&SimulationId::new("sim_ws"), handler)
        .await
        .unwrap();
    assert_eq!(conn.kind(), ChannelKind::WebSocket);
    assert_scripted_run(&until_complete(&mut rx).await);
}

#[tokio::test]
async fn falls_back_to_sse_without_websocket() {
    let addr = serve(router(Arc::default(), false, true)).await;
    let (handler, mut rx) = collector();

    let conn = transport(addr)
        .connect_realtime(&SimulationId::new("sim_sse"), handler)
        .await
        .unwrap();
    assert_eq!(conn.kind(), ChannelKind::ServerSentEvents);
    assert_scripted_run(&until_complete(&mut rx).await);
}

#[tokio::test]
async fn falls_back_to_polling_and_survives_failed_poll() {
    let backend = Arc::new(Backend {
        fail_first_poll: true,
        ..Backend::default()
    });
    let addr = serve(router(Arc::clone(&backend), false, false)).await;
    let (handler, mut rx) = collector();

    let conn = transport(addr)
        .connect_realtime(&SimulationId::new("sim_poll"), handler)
        .await
        .unwrap();
    assert_eq!(conn.kind(), ChannelKind::Polling);

    let events = until_complete(&mut rx).await;
    assert!(matches!(events[0].kind, StreamEventKind::Error { .. }));
    assert_scripted_run(&events[1..]);
    assert_eq!(conn.kind(), ChannelKind::Polling);
    assert!(backend.polls.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn close_stops_polling() {
    let backend_polls = Arc::new(Backend {
        quiet: true,
        ..Backend::default()
    });
    let addr = serve(router(Arc::clone(&backend_polls), false, false)).await;

    let (handler, _rx) = collector();
    let conn = transport(addr)
        .connect_realtime(&SimulationId::new("sim_close"), handler)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(backend_polls.polls.load(Ordering::SeqCst) >= 1);

    conn.close();
    conn.close();
    tokio::time::sleep(Duration::from_millis(200)).await;
    let after_close = backend_polls.polls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(backend_polls.polls.load(Ordering::SeqCst), after_close);
}

#[tokio::test]
async fn start_posts_camel_case_body() {
    let backend = Arc::new(Backend::default());
    let addr = serve(router(Arc::clone(&backend), false, false)).await;

    let resp = transport(addr)
        .start_simulation(&StartRequest {
            industry: "fintech".to_string(),
            solution_id: "fraud-detection".to_string(),
            scenario_id: ScenarioId::from("aggressive"),
        })
        .await
        .unwrap();
    assert_eq!(resp.source, ResponseSource::Backend);
    assert_eq!(resp.simulation_id, Some(SimulationId::new("sim_backend")));
    assert_eq!(resp.completed_steps(), vec![0]);

    let bodies = backend.start_bodies.lock().unwrap();
    assert_eq!(
        bodies[0],
        json!({"industry": "fintech", "solutionId": "fraud-detection", "scenarioId": "aggressive"})
    );
}

async fn failing_backend() -> SocketAddr {
    let app = Router::new().route(
        "/api/interactive/start",
        post(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
    );
    serve(app).await
}

fn aggressive() -> StartRequest {
    StartRequest {
        industry: "fintech".to_string(),
        solution_id: "fraud-detection".to_string(),
        scenario_id: ScenarioId::from("aggressive"),
    }
}

#[tokio::test]
async fn http_500_falls_back_to_mock_success() {
    let addr = failing_backend().await;
    let resp = transport(addr).start_simulation(&aggressive()).await.unwrap();
    assert!(resp.success);
    assert_eq!(resp.source, ResponseSource::Mock);
    assert_eq!(resp.completed_steps(), vec![0, 1]);
}

#[tokio::test]
async fn http_500_is_an_error_under_strict_policy() {
    let addr = failing_backend().await;
    let config = transport(addr).config().clone().with_fallback(FallbackPolicy::Strict);
    let err = HttpTransport::new(config)
        .unwrap()
        .start_simulation(&aggressive())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PlaygroundError::Transport(TransportError::HttpStatus { code: 500, .. })
    ));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn session_runs_to_impact_against_backend() {
    let addr = serve(router(Arc::default(), true, true)).await;
    let session = SimulationSession::new(Arc::new(transport(addr)), "fintech", "fraud-detection");
    let mut updates = session.subscribe();

    session.select_scenario(ScenarioId::from("aggressive"), None, None).await;
    assert_eq!(session.state().simulation_id, Some(SimulationId::new("sim_backend")));

    tokio::time::timeout(Duration::from_secs(5), updates.wait_for(|s| s.phase == Phase::Impact))
        .await
        .unwrap()
        .unwrap();

    let state = session.state();
    assert_eq!(state.pipeline_progress, vec![0, 2]);
    assert_eq!(state.metrics["accuracy"], json!(0.9));
    assert_eq!(state.metrics["recall"], json!(0.93));
    assert_eq!(state.metrics["impactScore"], json!(0.9));
    assert!(!state.loading);
    assert!(session.active_channel().is_none());
}
