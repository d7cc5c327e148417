use std::{
    net::SocketAddr,
    sync::{Arc, OnceLock},
    time::{Duration, Instant},
};

use anyhow::Context;
use axum::{
    routing::get,
    Router,
};
use chrono::Local;
use tokio::io::{AsyncReadExt, ReadHalf};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_serial::SerialStream;
use tower_http::services::ServeDir;
use tracing::{error, info, warn};

use alarmclock_common::{
    encode_state_frame, Button, DeviceEngine, EngineAction, RuntimeConfig,
};

use crate::playback::PlaybackClient;
use crate::serial::{self, SerialLink};
use crate::store::AppStore;
use crate::web;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Mutex<DeviceEngine>>,
    pub store: AppStore,
    pub runtime: Arc<RuntimeConfig>,
    pub serial: SerialLink,
    pub playback: PlaybackClient,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = AppStore::new();
    let mut runtime = store.load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        RuntimeConfig::default()
    });
    runtime.clock.sanitize();

    if let Ok(port) = std::env::var("SERIAL_PORT") {
        runtime.serial.port = port;
    }
    if let Ok(enabled) = std::env::var("PLAYBACK_ENABLED") {
        runtime.playback.enabled = matches!(enabled.as_str(), "1" | "true");
    }

    let alarms = store.load_alarms(&runtime).await;
    info!("loaded {} alarm(s)", alarms.len());

    let engine = DeviceEngine::new(runtime.clock.clone(), alarms);

    let (link, reader) = serial::open(&runtime.serial)?;
    info!(
        "serial link open on {} at {} baud",
        runtime.serial.port, runtime.serial.baud
    );

    let playback = PlaybackClient::new(runtime.playback.clone());
    let app_state = AppState {
        engine: Arc::new(Mutex::new(engine)),
        store,
        runtime: Arc::new(runtime),
        serial: link,
        playback,
    };

    let actions = {
        let mut engine = app_state.engine.lock().await;
        engine.on_connect(Local::now().naive_local(), monotonic_ms())
    };
    execute_engine_actions(&app_state, actions).await;

    spawn_serial_read_loop(app_state.clone(), reader);
    spawn_tick_loop(app_state.clone());
    spawn_emit_loop(app_state.clone());

    let web_root = format!("{}/web", env!("CARGO_MANIFEST_DIR"));
    let app = Router::new()
        .route("/api/status", get(web::handle_get_status))
        .route(
            "/api/alarms",
            get(web::handle_get_alarms).put(web::handle_put_alarms),
        )
        .fallback_service(ServeDir::new(web_root))
        .with_state(app_state);

    let port = std::env::var("CONTROLLER_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8000);
    let addr: SocketAddr = format!("0.0.0.0:{port}")
        .parse()
        .context("bad controller listen address")?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Reads button bytes off the device link; on EOF, a read error, or a
/// write fault reported by the link, reopens the port and
/// resynchronizes the device with a fresh frame.
fn spawn_serial_read_loop(app_state: AppState, mut reader: ReadHalf<SerialStream>) {
    tokio::spawn(async move {
        let mut buf = [0u8; 64];
        loop {
            tokio::select! {
                result = reader.read(&mut buf) => match result {
                    Ok(0) => {
                        warn!("serial link closed, reconnecting");
                        reader = reconnect(&app_state).await;
                    }
                    Ok(n) => {
                        for &byte in &buf[..n] {
                            let Some(button) = Button::from_frame_byte(byte) else {
                                continue;
                            };
                            info!("button pressed: {button:?}");
                            let actions = {
                                let mut engine = app_state.engine.lock().await;
                                engine.handle_button(button, monotonic_ms())
                            };
                            execute_engine_actions(&app_state, actions).await;
                        }
                    }
                    Err(err) => {
                        warn!("serial read failed: {err}, reconnecting");
                        reader = reconnect(&app_state).await;
                    }
                },
                _ = app_state.serial.write_failed() => {
                    warn!("serial write fault, reconnecting");
                    reader = reconnect(&app_state).await;
                }
            }
        }
    });
}

async fn reconnect(app_state: &AppState) -> ReadHalf<SerialStream> {
    loop {
        tokio::time::sleep(Duration::from_secs(2)).await;
        match serial::reopen(&app_state.runtime.serial) {
            Ok(stream) => {
                let (reader, writer) = tokio::io::split(stream);
                app_state.serial.replace(writer).await;
                info!("serial link reopened on {}", app_state.runtime.serial.port);

                let actions = {
                    let mut engine = app_state.engine.lock().await;
                    engine.on_connect(Local::now().naive_local(), monotonic_ms())
                };
                execute_engine_actions(app_state, actions).await;
                return reader;
            }
            Err(err) => {
                warn!(
                    "serial reopen of {} failed: {err}",
                    app_state.runtime.serial.port
                );
            }
        }
    }
}

fn spawn_tick_loop(app_state: AppState) {
    let tick_interval_ms = app_state.runtime.clock.tick_interval_ms;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(tick_interval_ms));
        loop {
            interval.tick().await;
            let actions = {
                let mut engine = app_state.engine.lock().await;
                engine.tick(Local::now().naive_local(), monotonic_ms())
            };
            if !actions.is_empty() {
                execute_engine_actions(&app_state, actions).await;
            }
        }
    });
}

/// Pushes a state frame on a fixed cadence so the device clock stays in
/// step even when nothing is happening.
fn spawn_emit_loop(app_state: AppState) {
    let emit_interval_ms = app_state.runtime.clock.emit_interval_ms;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(emit_interval_ms));
        loop {
            interval.tick().await;
            emit_state_frame(&app_state).await;
        }
    });
}

async fn emit_state_frame(app_state: &AppState) {
    let outputs = { app_state.engine.lock().await.outputs() };
    let frame = encode_state_frame(Local::now().naive_local(), outputs);
    app_state.serial.send_frame(&frame).await;
}

pub async fn execute_engine_actions(app_state: &AppState, actions: Vec<EngineAction>) {
    for action in actions {
        match action {
            EngineAction::EmitState => emit_state_frame(app_state).await,
            EngineAction::StartPlayback => {
                if app_state.playback.enabled() {
                    let client = app_state.playback.clone();
                    tokio::spawn(async move {
                        if let Err(err) = client.start_stream().await {
                            warn!("failed to start playback: {err:#}");
                        }
                    });
                }
            }
            EngineAction::StopPlayback => {
                if app_state.playback.enabled() {
                    let client = app_state.playback.clone();
                    tokio::spawn(async move {
                        if let Err(err) = client.stop().await {
                            warn!("failed to stop playback: {err:#}");
                        }
                    });
                }
            }
            EngineAction::ScheduledNext { delay_ms } => {
                info!("next alarm in {}s", delay_ms / 1_000);
            }
            EngineAction::NothingScheduled => {
                info!("no alarms scheduled");
            }
            EngineAction::BadTimerFire { timer, state } => {
                error!(
                    "{} timer fired in {} state, ignoring",
                    timer.as_str(),
                    state.as_str()
                );
            }
        }
    }
}

pub fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
