use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{SecondsFormat, Utc};
use futures_util::{SinkExt, StreamExt};
use rand::distr::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shipnav::constants::{get_tick_safety_limit, SCENARIO_START_INDEX, TICK_MS};
use shipnav::engine::{FleetEngine, FleetOptions};
use shipnav::grid::TerrainGrid;
use shipnav::logging::now_ms;
use shipnav::server_protocol::{parse_client_message, ParsedClientMessage, PlanRequest, RunRequest};
use shipnav::server_utils::{
    normalize_max_ticks, normalize_ship_count, parse_recent_limit, tiles_within_bounds,
    MAX_REQUEST_SHIPS,
};
use shipnav::types::{BatchSummary, ScenarioEntry};
use shipnav::world::{grid_from_rows, load_map, load_scenarios, random_entries, validate_entry};
use tokio::sync::{mpsc, Mutex};
use tower_http::services::{ServeDir, ServeFile};

const RECENT_RUN_CAPACITY: usize = 50;
const DEFAULT_RECENT_LIMIT: usize = 10;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

type SharedState = Arc<Mutex<ServerState>>;
type ApiError = (StatusCode, Json<Value>);

struct ClientContext {
    tx: mpsc::Sender<OutboundMessage>,
    session: Option<ClientSession>,
}

struct ClientSession {
    run_id: String,
    engine: FleetEngine,
    max_ticks: u64,
}

#[derive(Clone, Debug)]
enum OutboundMessage {
    Text(String),
    Close { code: u16, reason: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum QueuePolicy {
    DropOnFull,
    DisconnectOnFull,
}

struct PreloadedWorld {
    grid: TerrainGrid,
    scenarios: Vec<ScenarioEntry>,
}

#[derive(Clone, Debug, Serialize)]
struct StoredRun {
    #[serde(rename = "runId")]
    run_id: String,
    source: &'static str,
    #[serde(rename = "generatedAt")]
    generated_at: String,
    completed: bool,
    summary: BatchSummary,
}

struct ServerState {
    clients: HashMap<String, ClientContext>,
    world: Option<Arc<PreloadedWorld>>,
    recent_runs: VecDeque<StoredRun>,
}

impl ServerState {
    fn new(world: Option<PreloadedWorld>) -> Self {
        Self {
            clients: HashMap::new(),
            world: world.map(Arc::new),
            recent_runs: VecDeque::new(),
        }
    }

    fn record_run(&mut self, run: StoredRun) {
        self.recent_runs.push_front(run);
        self.recent_runs.truncate(RECENT_RUN_CAPACITY);
    }

    /// Cheap handle to the preloaded world so planning can run without the lock.
    fn world(&self) -> Option<Arc<PreloadedWorld>> {
        self.world.clone()
    }

    fn recent_runs(&self, limit: Option<usize>) -> Vec<StoredRun> {
        self.recent_runs
            .iter()
            .take(limit.unwrap_or(DEFAULT_RECENT_LIMIT))
            .cloned()
            .collect()
    }
}

/// Fleet description shared by the HTTP and websocket entry points.
struct FleetRequest {
    tiles: Option<Vec<String>>,
    ships: Vec<ScenarioEntry>,
    random_ships: Option<i64>,
    scenario_ships: Option<i64>,
    seed: Option<u64>,
    replanning: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RecentRunsQuery {
    limit: Option<String>,
}

#[tokio::main]
async fn main() {
    let port = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let state = Arc::new(Mutex::new(ServerState::new(load_world())));
    start_tick_loop(state.clone());

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/api/plan", post(plan_handler))
        .route("/api/runs", get(list_runs_handler).post(create_run_handler))
        .route("/ws", get(ws_handler))
        .with_state(state);

    let app = if let Some(static_dir) = resolve_static_dir() {
        let index_file = static_dir.join("index.html");
        println!(
            "[server] static file root: {}",
            static_dir.to_string_lossy()
        );
        app.fallback_service(
            ServeDir::new(static_dir).not_found_service(ServeFile::new(index_file)),
        )
    } else {
        eprintln!("[server] static file root not found. set STATIC_DIR to serve a viewer.");
        app
    };

    let bind_addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("failed to bind server socket");

    println!("[server] listening on :{port}");
    axum::serve(listener, app)
        .await
        .expect("server runtime failed");
}

fn load_world() -> Option<PreloadedWorld> {
    let map_path = PathBuf::from(std::env::var("MAP_PATH").ok()?);
    let grid = match load_map(&map_path) {
        Ok(grid) => grid,
        Err(error) => {
            eprintln!("[server] map not loaded: {error}");
            return None;
        }
    };
    println!(
        "[server] map loaded: {} ({}x{})",
        map_path.to_string_lossy(),
        grid.width,
        grid.height
    );

    let scenarios = match std::env::var("SCENARIO_PATH") {
        Ok(raw) => match load_scenarios(&PathBuf::from(&raw)) {
            Ok(scenarios) => {
                println!("[server] scenario rows loaded: {}", scenarios.len());
                scenarios
            }
            Err(error) => {
                eprintln!("[server] scenarios not loaded: {error}");
                Vec::new()
            }
        },
        Err(_) => Vec::new(),
    };
    Some(PreloadedWorld { grid, scenarios })
}

fn resolve_static_dir() -> Option<PathBuf> {
    if let Ok(raw) = std::env::var("STATIC_DIR") {
        let path = PathBuf::from(raw);
        if path.join("index.html").is_file() {
            return Some(path);
        }
    }

    let candidates = [PathBuf::from("web"), PathBuf::from("static")];
    candidates
        .into_iter()
        .find(|path| path.join("index.html").is_file())
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

async fn plan_handler(
    State(state): State<SharedState>,
    Json(request): Json<PlanRequest>,
) -> Result<Json<Value>, ApiError> {
    let world = state.lock().await.world();
    let planned = tokio::task::spawn_blocking(move || plan_single(world.as_deref(), request))
        .await
        .map_err(internal_error)?;
    planned.map(Json).map_err(bad_request)
}

fn plan_single(world: Option<&PreloadedWorld>, request: PlanRequest) -> Result<Value, String> {
    let grid = resolve_grid(world, request.tiles)?;
    let entry = ScenarioEntry {
        start: request.start,
        goal: request.goal,
    };
    let mut engine =
        FleetEngine::new(grid, &[entry], FleetOptions::default()).map_err(|error| error.to_string())?;
    let plan = engine.compute_paths();
    let path = engine.ship_path(0);

    Ok(json!({
        "reachable": !path.is_empty() || entry.start == entry.goal,
        "path": path,
        "plannedCost": plan.total_planned_cost,
        "cellsSearched": plan.cells_expanded,
    }))
}

async fn create_run_handler(
    State(state): State<SharedState>,
    Json(request): Json<RunRequest>,
) -> Result<Json<StoredRun>, ApiError> {
    let max_ticks = request.max_ticks;
    let fleet = FleetRequest {
        tiles: request.tiles,
        ships: request.ships,
        random_ships: request.random_ships,
        scenario_ships: request.scenario_ships,
        seed: request.seed,
        replanning: request.replanning,
    };
    let world = state.lock().await.world();
    let run = tokio::task::spawn_blocking(move || run_headless(world.as_deref(), fleet, max_ticks))
        .await
        .map_err(internal_error)?
        .map_err(bad_request)?;
    println!(
        "[server] run {} finished: {} ships, {} at goal, {} ticks",
        run.run_id, run.summary.ship_count, run.summary.ships_at_goal, run.summary.ticks
    );

    state.lock().await.record_run(run.clone());
    Ok(Json(run))
}

/// Plans and steps a whole batch to completion. Blocking; run off the async workers.
fn run_headless(
    world: Option<&PreloadedWorld>,
    fleet: FleetRequest,
    max_ticks: Option<i64>,
) -> Result<StoredRun, String> {
    let mut engine = build_engine(world, fleet)?;
    engine.compute_paths();
    let max_ticks = normalize_max_ticks(max_ticks, session_tick_limit(&engine));
    let completed = engine.run_until_complete(max_ticks);
    Ok(StoredRun {
        run_id: make_run_id(),
        source: "http",
        generated_at: iso_now(),
        completed,
        summary: engine.build_summary(),
    })
}

async fn list_runs_handler(
    State(state): State<SharedState>,
    Query(query): Query<RecentRunsQuery>,
) -> impl IntoResponse {
    let guard = state.lock().await;
    Json(json!({
        "runs": guard.recent_runs(parse_recent_limit(query.limit.as_deref())),
    }))
}

fn bad_request(error: impl ToString) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": error.to_string() })),
    )
}

fn internal_error(error: impl ToString) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": error.to_string() })),
    )
}

fn resolve_grid(
    world: Option<&PreloadedWorld>,
    tiles: Option<Vec<String>>,
) -> Result<TerrainGrid, String> {
    match tiles {
        Some(rows) => {
            if !tiles_within_bounds(&rows) {
                return Err("tiles must be non-empty rows within the map size limit".to_string());
            }
            grid_from_rows(&rows).map_err(|error| error.to_string())
        }
        None => world
            .map(|world| world.grid.clone())
            .ok_or_else(|| "no map loaded; send tiles".to_string()),
    }
}

/// Explicit ships win, then random ships, then rows from the preloaded
/// scenario file starting at the default first row.
fn resolve_entries(
    grid: &TerrainGrid,
    scenarios: &[ScenarioEntry],
    request: &FleetRequest,
) -> Result<Vec<ScenarioEntry>, String> {
    if !request.ships.is_empty() {
        if request.ships.len() > MAX_REQUEST_SHIPS {
            return Err(format!("at most {MAX_REQUEST_SHIPS} ships per run"));
        }
        for entry in &request.ships {
            validate_entry(grid, entry).map_err(|error| error.to_string())?;
        }
        return Ok(request.ships.clone());
    }

    let random = normalize_ship_count(request.random_ships);
    if random > 0 {
        let seed = request.seed.unwrap_or_else(now_ms);
        return random_entries(grid, random, seed).map_err(|error| error.to_string());
    }

    let count = normalize_ship_count(request.scenario_ships);
    if count > 0 {
        let rows = scenarios
            .get(SCENARIO_START_INDEX..SCENARIO_START_INDEX + count)
            .ok_or_else(|| "not enough preloaded scenario rows".to_string())?;
        for entry in rows {
            validate_entry(grid, entry).map_err(|error| error.to_string())?;
        }
        return Ok(rows.to_vec());
    }

    Err("no ships requested".to_string())
}

fn build_engine(world: Option<&PreloadedWorld>, request: FleetRequest) -> Result<FleetEngine, String> {
    let scenarios = if request.tiles.is_some() {
        &[][..]
    } else {
        world.map(|world| world.scenarios.as_slice()).unwrap_or(&[])
    };
    let grid = resolve_grid(world, request.tiles.clone())?;
    let entries = resolve_entries(&grid, scenarios, &request)?;
    let options = FleetOptions {
        replanning: request.replanning.unwrap_or(true),
        ..FleetOptions::default()
    };
    FleetEngine::new(grid, &entries, options).map_err(|error| error.to_string())
}

fn session_tick_limit(engine: &FleetEngine) -> u64 {
    let grid = engine.grid();
    get_tick_safety_limit(engine.ship_count(), grid.width, grid.height)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<SharedState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: SharedState, socket: WebSocket) {
    let client_id = make_id("client");
    let (tx, mut rx) = mpsc::channel::<OutboundMessage>(256);

    {
        let mut guard = state.lock().await;
        guard.clients.insert(
            client_id.clone(),
            ClientContext {
                tx: tx.clone(),
                session: None,
            },
        );
    }

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let writer = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            let should_close = matches!(outbound, OutboundMessage::Close { .. });
            let result = match outbound {
                OutboundMessage::Text(payload) => {
                    ws_sender.send(Message::Text(payload.into())).await
                }
                OutboundMessage::Close { code, reason } => {
                    let frame = CloseFrame {
                        code,
                        reason: reason.into(),
                    };
                    ws_sender.send(Message::Close(Some(frame))).await
                }
            };
            if result.is_err() || should_close {
                break;
            }
        }
    });

    while let Some(received) = ws_receiver.next().await {
        let Ok(message) = received else {
            break;
        };

        match message {
            Message::Text(raw) => {
                handle_client_message(state.clone(), &client_id, raw.to_string()).await;
            }
            Message::Binary(raw) => {
                if let Ok(text) = String::from_utf8(raw.to_vec()) {
                    handle_client_message(state.clone(), &client_id, text).await;
                } else {
                    send_error_to_client(&state, &client_id, "invalid utf8 message").await;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    state.lock().await.clients.remove(&client_id);
    drop(tx);
    let _ = writer.await;
}

async fn handle_client_message(state: SharedState, client_id: &str, raw: String) {
    let Some(message) = parse_client_message(&raw) else {
        send_error_to_client(&state, client_id, "invalid message").await;
        return;
    };

    match message {
        ParsedClientMessage::Start {
            tiles,
            ships,
            random_ships,
            scenario_ships,
            seed,
            replanning,
        } => {
            let request = FleetRequest {
                tiles,
                ships,
                random_ships,
                scenario_ships,
                seed,
                replanning,
            };
            handle_start(state, client_id, request).await;
        }
        ParsedClientMessage::Stop => {
            let mut guard = state.lock().await;
            let stopped = guard
                .clients
                .get_mut(client_id)
                .and_then(|client| client.session.take())
                .map(|session| session.run_id);
            send_to_client(
                &mut guard,
                client_id,
                &json!({
                    "type": "stopped",
                    "runId": stopped,
                }),
                QueuePolicy::DisconnectOnFull,
            );
        }
        ParsedClientMessage::Ping { t } => {
            let mut guard = state.lock().await;
            send_to_client(
                &mut guard,
                client_id,
                &json!({
                    "type": "pong",
                    "t": t,
                    "serverTime": now_ms(),
                }),
                QueuePolicy::DropOnFull,
            );
        }
    }
}

struct PlannedSession {
    session: ClientSession,
    message: Value,
}

/// Builds and plans a websocket session. Blocking; run off the async workers.
fn plan_session(world: Option<&PreloadedWorld>, request: FleetRequest) -> Result<PlannedSession, String> {
    let mut engine = build_engine(world, request)?;
    let plan = engine.compute_paths();
    let snapshot = engine.build_snapshot(true);
    let run_id = make_run_id();
    let max_ticks = normalize_max_ticks(None, session_tick_limit(&engine));
    let message = json!({
        "type": "plan",
        "runId": run_id,
        "tiles": engine.grid().rows(),
        "plan": plan,
        "snapshot": snapshot,
    });
    Ok(PlannedSession {
        session: ClientSession {
            run_id,
            engine,
            max_ticks,
        },
        message,
    })
}

async fn handle_start(state: SharedState, client_id: &str, request: FleetRequest) {
    let world = state.lock().await.world();
    let planned = tokio::task::spawn_blocking(move || plan_session(world.as_deref(), request))
        .await
        .map_err(|error| error.to_string())
        .and_then(|planned| planned);

    let mut guard = state.lock().await;
    let planned = match planned {
        Ok(planned) => planned,
        Err(message) => {
            send_to_client(
                &mut guard,
                client_id,
                &json!({
                    "type": "error",
                    "message": message,
                }),
                QueuePolicy::DisconnectOnFull,
            );
            return;
        }
    };

    let Some(client) = guard.clients.get_mut(client_id) else {
        return;
    };
    println!(
        "[server] {client_id} started {} with {} ships",
        planned.session.run_id,
        planned.session.engine.ship_count()
    );
    client.session = Some(planned.session);
    send_to_client(
        &mut guard,
        client_id,
        &planned.message,
        QueuePolicy::DisconnectOnFull,
    );
}

fn start_tick_loop(state: SharedState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(TICK_MS));
        loop {
            interval.tick().await;
            let mut guard = state.lock().await;
            tick_sessions(&mut guard);
        }
    });
}

fn tick_sessions(state: &mut ServerState) {
    let client_ids: Vec<String> = state
        .clients
        .iter()
        .filter(|(_, client)| client.session.is_some())
        .map(|(client_id, _)| client_id.clone())
        .collect();

    for client_id in client_ids {
        let Some(session) = state
            .clients
            .get_mut(&client_id)
            .and_then(|client| client.session.as_mut())
        else {
            continue;
        };
        session.engine.step(TICK_MS);
        let snapshot = session.engine.build_snapshot(true);
        let completed = session.engine.is_complete();
        let finished = if completed || session.engine.tick() >= session.max_ticks {
            Some(StoredRun {
                run_id: session.run_id.clone(),
                source: "ws",
                generated_at: iso_now(),
                completed,
                summary: session.engine.build_summary(),
            })
        } else {
            None
        };

        send_to_client(
            state,
            &client_id,
            &json!({
                "type": "state",
                "snapshot": snapshot,
            }),
            QueuePolicy::DropOnFull,
        );

        if let Some(run) = finished {
            if let Some(client) = state.clients.get_mut(&client_id) {
                client.session = None;
            }
            send_to_client(
                state,
                &client_id,
                &json!({
                    "type": "run_over",
                    "run": run,
                }),
                QueuePolicy::DisconnectOnFull,
            );
            state.record_run(run);
        }
    }
}

fn send_to_client(state: &mut ServerState, client_id: &str, message: &Value, policy: QueuePolicy) {
    let send_failed = if let Some(client) = state.clients.get(client_id) {
        client
            .tx
            .try_send(OutboundMessage::Text(message.to_string()))
            .is_err()
    } else {
        false
    };
    if send_failed && policy == QueuePolicy::DisconnectOnFull {
        disconnect_client_internal(state, client_id);
    }
}

fn disconnect_client_internal(state: &mut ServerState, client_id: &str) {
    if let Some(client) = state.clients.remove(client_id) {
        let _ = client.tx.try_send(OutboundMessage::Close {
            code: 1013,
            reason: "send queue overflow".to_string(),
        });
    }
}

async fn send_error_to_client(state: &SharedState, client_id: &str, message: &str) {
    let mut guard = state.lock().await;
    send_to_client(
        &mut guard,
        client_id,
        &json!({
            "type": "error",
            "message": message,
        }),
        QueuePolicy::DisconnectOnFull,
    );
}

fn make_id(prefix: &str) -> String {
    let seq = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_{seq}")
}

fn make_run_id() -> String {
    let suffix: String = rand::rng()
        .sample_iter(Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    format!("run_{}", suffix.to_ascii_lowercase())
}

fn iso_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
