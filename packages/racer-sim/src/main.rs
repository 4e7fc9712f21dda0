//! main.rs — Buoy racer simulator entry point
//!
//! Runs two concurrent tasks:
//!   1. Sim loop: ticks the session at frame_rate_hz with the latest input
//!      sample, broadcasts telemetry, lap events and commentary cues
//!   2. WebSocket server: control clients send input and commands on /ws and
//!      receive the broadcast stream plus direct replies
//!
//! High scores and stored ghosts are written to the state file whenever they
//! change. Snapshots are queued under the state lock and written by a single
//! writer task, so files land in change order. A failed write is logged and
//! the simulation carries on.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{
    Router,
    extract::{State, WebSocketUpgrade, ws::{Message, WebSocket}},
    response::Response,
    routing::get,
};
use clap::Parser;
use course_types::{CommentaryKey, GhostFrame, InputIntent};
use serde_json::{Value, json};
use tokio::sync::{RwLock, broadcast, mpsc};
use tokio::time::interval;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use racer_sim::commentary::CommentarySelector;
use racer_sim::config;
use racer_sim::highscores::ScoreEntry;
use racer_sim::persistence::{self, PersistedState};
use racer_sim::session::{Session, SimEvent};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "racer-sim", about = "Arcade buoy-racing simulator")]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
    /// Course catalog path
    #[arg(long, default_value = "courses.toml")]
    courses: PathBuf,
    /// Course to load on startup (overrides simulation.default_course)
    #[arg(long)]
    course: Option<String>,
    /// Simulation speed multiplier (1.0 = real-time)
    #[arg(long, default_value = "1.0")]
    speed: f64,
    /// Control panel WebSocket port
    #[arg(long, default_value = "9090")]
    ctrl_port: u16,
    /// High score and ghost store (overrides persistence.state_file)
    #[arg(long)]
    state_file: Option<PathBuf>,
    /// Fixed seed for commentary clip selection
    #[arg(long)]
    seed: Option<u64>,
}

// ── Shared state ──────────────────────────────────────────────────────────────

/// A clean lap good enough for the table, waiting for a nickname.
#[derive(Debug)]
struct PendingScore {
    course_key: String,
    time_s: f64,
    distance_m: f64,
    frames: Vec<GhostFrame>,
}

struct SimState {
    session: Session,
    /// Latest input sample from the controlling client
    input: InputIntent,
    speed: f64,
    /// Simulated seconds since startup; frozen while paused
    sim_time_s: f64,
    frame: u64,
    commentary: CommentarySelector,
    persisted: PersistedState,
    /// Queue feeding the state writer task
    saves: mpsc::UnboundedSender<PersistedState>,
    pending_score: Option<PendingScore>,
    last_telemetry: Option<String>,
}

impl SimState {
    /// Queue the current persisted state for writing. Must be called with the
    /// state lock held.
    fn queue_save(&self) {
        if self.saves.send(self.persisted.clone()).is_err() {
            warn!("State writer stopped, change not saved");
        }
    }
}

type SharedState = Arc<RwLock<SimState>>;
type TelemetryTx = Arc<broadcast::Sender<String>>;

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "racer_sim=info".into()),
        )
        .init();

    let args = Args::parse();

    let cfg = config::load_config(&args.config)?;
    let catalog = config::load_courses(&args.courses)?;
    let state_file = args.state_file.clone().unwrap_or_else(|| cfg.persistence.state_file.clone());

    let persisted = persistence::load_state(&state_file).await;
    let mut session = Session::new(cfg.session_config(), catalog)?;
    session.restore_ghosts(persisted.ghosts.clone());
    if let Some(key) = args.course.as_deref().or(cfg.simulation.default_course.as_deref()) {
        if let Err(e) = session.load_course(key) {
            warn!("{e}, staying on '{}'", session.course_key());
        }
    }

    info!(
        "🏁 Racer sim starting: {} courses, on '{}', {} Hz",
        session.courses().courses.len(),
        session.course_key(),
        cfg.simulation.frame_rate_hz
    );

    let commentary = match args.seed {
        Some(seed) => CommentarySelector::seeded(&cfg.commentary, seed),
        None => CommentarySelector::new(&cfg.commentary),
    };

    let (saves, save_rx) = mpsc::unbounded_channel();
    tokio::spawn(state_writer(state_file, save_rx));

    let shared: SharedState = Arc::new(RwLock::new(SimState {
        session,
        input: InputIntent::default(),
        speed: args.speed.clamp(0.1, 20.0),
        sim_time_s: 0.0,
        frame: 0,
        commentary,
        persisted,
        saves,
        pending_score: None,
        last_telemetry: None,
    }));

    // Broadcast channel for telemetry, events and commentary cues
    let (telem_tx, _) = broadcast::channel::<String>(64);
    let telem_tx = Arc::new(telem_tx);

    let shared_loop = shared.clone();
    let telem_tx_loop = telem_tx.clone();
    let frame_rate = cfg.simulation.frame_rate_hz;
    let telemetry_every = cfg.simulation.telemetry_every.max(1);
    tokio::spawn(async move {
        sim_loop(shared_loop, telem_tx_loop, frame_rate, telemetry_every).await;
    });

    let ctrl_addr = format!("0.0.0.0:{}", args.ctrl_port);
    info!("🖥  Control WebSocket at ws://{ctrl_addr}/ws");

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(|| async { "racer-sim ok" }))
        .with_state((shared.clone(), telem_tx.clone()))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any));

    let listener = tokio::net::TcpListener::bind(&ctrl_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

// ── Simulation loop ───────────────────────────────────────────────────────────

async fn sim_loop(state: SharedState, telem: TelemetryTx, frame_rate_hz: f64, telemetry_every: u32) {
    let frame_ms = (1000.0 / frame_rate_hz).round().max(1.0) as u64;
    let mut ticker = interval(Duration::from_millis(frame_ms));

    info!("⚓ Sim loop running at {frame_rate_hz} Hz ({frame_ms}ms frame)");

    loop {
        ticker.tick().await;

        let mut outbox = Vec::new();
        {
            let mut s = state.write().await;
            if s.session.is_paused() {
                continue;
            }

            // Simulated time = real frame time × speed multiplier
            let step_s = frame_ms as f64 / 1000.0 * s.speed;
            s.sim_time_s += step_s;
            s.frame += 1;
            let (now, input) = (s.sim_time_s, s.input);

            let mut changed = false;
            for event in s.session.tick(now, &input) {
                changed |= on_event(&mut s, &event, &mut outbox);
            }

            if s.frame % u64::from(telemetry_every) == 0 {
                let msg = json!({
                    "type": "telemetry",
                    "frame": s.frame,
                    "data": s.session.snapshot(),
                })
                .to_string();
                s.last_telemetry = Some(msg.clone());
                outbox.push(msg);
            }

            if changed {
                s.queue_save();
            }
        }

        for msg in outbox {
            let _ = telem.send(msg);
        }
    }
}

/// Fan one session event out to clients. Returns `true` when persisted state
/// changed.
fn on_event(s: &mut SimState, event: &SimEvent, outbox: &mut Vec<String>) -> bool {
    outbox.push(json!({ "type": "event", "event": event }).to_string());

    match event {
        SimEvent::LapStarted { commentary, .. } => {
            cue(s, *commentary, outbox);
            false
        }
        SimEvent::ApexReached { outcome, .. } => {
            cue(s, outcome.key, outbox);
            false
        }
        SimEvent::LapCompleted { course_key, record, ghost: Some(ghost) } => {
            if s.persisted.high_scores.qualifies(course_key, record.final_time_s) {
                s.pending_score = Some(PendingScore {
                    course_key: course_key.clone(),
                    time_s: record.final_time_s,
                    distance_m: record.distance_m,
                    frames: ghost.frames.clone(),
                });
                outbox.push(
                    json!({
                        "type": "score_prompt",
                        "course_key": course_key,
                        "time_s": record.final_time_s,
                    })
                    .to_string(),
                );
            }
            s.persisted.ghosts = s.session.stored_ghosts().clone();
            true
        }
        _ => false,
    }
}

fn cue(s: &mut SimState, key: CommentaryKey, outbox: &mut Vec<String>) {
    if let Some(clip) = s.commentary.pick(key) {
        outbox.push(json!({ "type": "commentary", "key": key, "clip": clip }).to_string());
    }
}

// ── State writer ──────────────────────────────────────────────────────────────

/// Sole writer of the state file. Runs until every sender is dropped.
async fn state_writer(path: PathBuf, mut rx: mpsc::UnboundedReceiver<PersistedState>) {
    while let Some(mut snapshot) = rx.recv().await {
        // Only the newest queued snapshot needs writing
        while let Ok(newer) = rx.try_recv() {
            snapshot = newer;
        }
        if let Err(e) = persistence::save_state(&path, &snapshot).await {
            warn!("Failed to save state: {e:#}");
        }
    }
}

// ── WebSocket control handler ─────────────────────────────────────────────────

async fn ws_handler(
    ws: WebSocketUpgrade,
    State((state, telem_tx)): State<(SharedState, TelemetryTx)>,
) -> Response {
    ws.on_upgrade(move |socket| handle_ws(socket, state, telem_tx))
}

async fn handle_ws(mut socket: WebSocket, state: SharedState, telem_tx: TelemetryTx) {
    let mut telem_rx = telem_tx.subscribe();

    // Course list and current telemetry on connect
    let hello = {
        let s = state.read().await;
        let courses = json!({
            "type": "courses",
            "keys": s.session.courses().keys(),
            "current": s.session.course_key(),
            "buoys": s.session.geometry().buoys,
        })
        .to_string();
        (courses, s.last_telemetry.clone())
    };
    let _ = socket.send(Message::Text(hello.0)).await;
    if let Some(telem) = hello.1 {
        let _ = socket.send(Message::Text(telem)).await;
    }

    loop {
        tokio::select! {
            // Relay broadcast stream to client
            Ok(msg) = telem_rx.recv() => {
                if socket.send(Message::Text(msg)).await.is_err() { break; }
            }
            // Handle commands from client
            Some(Ok(Message::Text(cmd))) = socket.recv() => {
                if let Some(reply) = handle_command(&state, &cmd).await {
                    if socket.send(Message::Text(reply)).await.is_err() { break; }
                }
            }
            else => break,
        }
    }
}

/// Handle one control message: `{ "cmd": "...", "args": {...} }`.
async fn handle_command(state: &SharedState, raw: &str) -> Option<String> {
    let v: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            warn!("Unparseable control message: {e}");
            return None;
        }
    };
    let cmd = v["cmd"].as_str().unwrap_or("");

    let mut s = state.write().await;
    let outcome = apply_command(&mut s, cmd, &v["args"]);
    if outcome.save {
        s.queue_save();
    }
    outcome.reply
}

#[derive(Debug, Default)]
struct CommandOutcome {
    reply: Option<String>,
    /// Persisted state changed and should be written out
    save: bool,
}

impl CommandOutcome {
    fn reply(body: Value) -> Self {
        Self { reply: Some(body.to_string()), save: false }
    }

    fn error(message: impl std::fmt::Display) -> Self {
        Self::reply(json!({ "type": "error", "message": message.to_string() }))
    }

    fn saved(mut self) -> Self {
        self.save = true;
        self
    }
}

fn apply_command(s: &mut SimState, cmd: &str, args: &Value) -> CommandOutcome {
    match cmd {
        "input" => match serde_json::from_value::<InputIntent>(args.clone()) {
            Ok(input) => {
                s.input = input;
                CommandOutcome::default()
            }
            Err(e) => CommandOutcome::error(format!("bad input: {e}")),
        },
        "pause" => {
            s.session.pause();
            info!("⏸ Sim paused");
            CommandOutcome::default()
        }
        "resume" => {
            let now = s.sim_time_s;
            s.session.resume(now);
            info!("▶ Sim resumed");
            CommandOutcome::default()
        }
        "load_course" | "next_course" => {
            let key = if cmd == "next_course" {
                s.session.courses().next_key(s.session.course_key()).map(str::to_string)
            } else {
                args["key"].as_str().map(str::to_string)
            };
            let Some(key) = key else {
                return CommandOutcome::error("load_course needs a key");
            };
            match s.session.load_course(&key) {
                Ok(()) => {
                    s.pending_score = None;
                    s.input = InputIntent::default();
                    CommandOutcome::reply(json!({
                        "type": "course_loaded",
                        "key": key,
                        "buoys": s.session.geometry().buoys,
                    }))
                }
                Err(e) => CommandOutcome::error(e),
            }
        }
        "keep_ghost" => {
            let keep = args["keep"].as_bool().unwrap_or(!s.session.keep_current_ghost());
            s.session.set_keep_current_ghost(keep);
            CommandOutcome::reply(json!({ "type": "keep_ghost", "keep": keep }))
        }
        "challenge" => {
            let Some(rank) = args["rank"].as_u64() else {
                return CommandOutcome::error("challenge needs a rank");
            };
            let course = s.session.course_key().to_string();
            match s.persisted.high_scores.challenge(&course, rank as usize) {
                Some(trace) => {
                    s.session.set_reference_ghost(trace);
                    CommandOutcome::reply(json!({ "type": "challenge", "key": course, "rank": rank }))
                }
                None => CommandOutcome::error(format!("no ghost stored for rank {rank} on '{course}'")),
            }
        }
        "clear_ghosts" => {
            s.session.clear_ghosts();
            s.persisted.ghosts.clear();
            CommandOutcome::reply(json!({ "type": "ghosts_cleared" })).saved()
        }
        "export_ghosts" => match s.session.export_ghosts() {
            Ok(data) => CommandOutcome::reply(json!({ "type": "ghost_export", "data": data })),
            Err(e) => CommandOutcome::error(e),
        },
        "import_ghosts" => {
            let data = args["data"].as_str().unwrap_or("");
            match s.session.import_ghosts(data) {
                Ok(count) => {
                    s.persisted.ghosts = s.session.stored_ghosts().clone();
                    CommandOutcome::reply(json!({ "type": "ghosts_imported", "count": count })).saved()
                }
                Err(e) => CommandOutcome::error(e),
            }
        }
        "submit_score" => {
            let nickname = args["nickname"].as_str().unwrap_or("").trim();
            if nickname.is_empty() {
                return CommandOutcome::error("nickname required");
            }
            let Some(p) = s.pending_score.take() else {
                return CommandOutcome::error("no lap waiting for a score");
            };
            let entry = ScoreEntry::new(nickname, p.time_s, p.distance_m, Some(&p.frames));
            let rank = s.persisted.high_scores.submit(&p.course_key, entry);
            CommandOutcome::reply(json!({
                "type": "score_submitted",
                "key": p.course_key,
                "rank": rank.map(|r| r + 1),
            }))
            .saved()
        }
        "high_scores" => {
            let course = args["key"].as_str().unwrap_or(s.session.course_key()).to_string();
            let entries = s
                .persisted
                .high_scores
                .table(&course)
                .map(|t| t.entries.clone())
                .unwrap_or_default();
            CommandOutcome::reply(json!({ "type": "high_scores", "key": course, "entries": entries }))
        }
        "set_speed" => {
            if let Some(sp) = args["speed"].as_f64() {
                s.speed = sp.clamp(0.1, 20.0);
                info!("⚡ Sim speed set to {}×", s.speed);
            }
            CommandOutcome::default()
        }
        _ => {
            warn!("Unknown control command: {cmd}");
            CommandOutcome::default()
        }
    }
}
