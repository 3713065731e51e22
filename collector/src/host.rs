use std::{io::ErrorKind, net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::{net::TcpListener, sync::Mutex};
use tracing::{info, warn};

use envbot_common::{
    validate_payload, AverageSummarizer, MachineSession, SessionKey, SessionLog,
    SessionLogEntry, Summarizer, TelemetryPayload, INGEST_PATH,
};

#[derive(Clone)]
struct AppState {
    log: Arc<Mutex<SessionLog>>,
    store: AppStore,
    summarizer: Arc<dyn Summarizer + Send + Sync>,
}

#[derive(Clone)]
struct AppStore {
    sessions_path: Arc<PathBuf>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct IngestResponse {
    ok: bool,
}

#[derive(Debug, Serialize)]
struct SessionView {
    date: String,
    #[serde(rename = "startTime")]
    start_time: DateTime<Utc>,
    #[serde(rename = "logCount")]
    log_count: usize,
    logs: Vec<SessionLogEntry>,
    summary: Option<String>,
}

#[derive(Debug, Serialize)]
struct MachineSessionsView {
    #[serde(rename = "machineID")]
    machine_id: String,
    sessions: Vec<SessionView>,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = AppStore::new();
    let log = store.load_sessions().await.unwrap_or_else(|err| {
        warn!("failed to load session log from store: {err:#}");
        SessionLog::default()
    });

    let app = router(AppState {
        log: Arc::new(Mutex::new(log)),
        store,
        summarizer: Arc::new(AverageSummarizer),
    });

    let port = std::env::var("COLLECTOR_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind collector server at {addr}"))?;

    info!("collector listening on http://{addr}{INGEST_PATH}");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!("failed to listen for shutdown signal: {err}");
            }
        })
        .await?;
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route(INGEST_PATH, post(handle_ingest))
        .route("/api/sessions/{machine_id}", get(handle_get_sessions))
        .route("/api/sessions/{machine_id}/{date}", get(handle_get_session))
        .with_state(state)
}

async fn handle_ingest(
    State(state): State<AppState>,
    payload: Result<Json<TelemetryPayload>, JsonRejection>,
) -> axum::response::Response {
    let Json(payload) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return error_response(rejection.status(), &rejection.body_text()),
    };

    if let Err(message) = validate_payload(&payload) {
        return error_response(StatusCode::BAD_REQUEST, message);
    }

    let mut log = state.log.lock().await;
    let outcome = log.record(&payload, Utc::now(), state.summarizer.as_ref());

    if let Err(err) = state.store.save_sessions(&log).await {
        warn!("failed to persist session log: {err:#}");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string());
    }
    drop(log);

    info!(
        "logged {} temp={:.2} hum={:.2} ({} log(s) on {})",
        outcome.key.machine_id,
        payload.data.temp,
        payload.data.hum,
        outcome.log_count,
        outcome.key.date
    );
    if outcome.summarized {
        info!(
            "summary written for {} on {}",
            outcome.key.machine_id, outcome.key.date
        );
    }

    Json(IngestResponse { ok: true }).into_response()
}

async fn handle_get_sessions(
    State(state): State<AppState>,
    Path(machine_id): Path<String>,
) -> axum::response::Response {
    let log = state.log.lock().await;
    let sessions: Vec<SessionView> = log
        .sessions_for(&machine_id)
        .into_iter()
        .map(|(date, session)| build_session_view(date, session))
        .collect();

    if sessions.is_empty() {
        return error_response(StatusCode::NOT_FOUND, "Unknown machineID");
    }

    Json(MachineSessionsView {
        machine_id,
        sessions,
    })
    .into_response()
}

async fn handle_get_session(
    State(state): State<AppState>,
    Path((machine_id, date)): Path<(String, String)>,
) -> axum::response::Response {
    let log = state.log.lock().await;
    let key = SessionKey { machine_id, date };

    match log.get(&key) {
        Some(session) => Json(build_session_view(&key.date, session)).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "Session not found"),
    }
}

fn build_session_view(date: &str, session: &MachineSession) -> SessionView {
    SessionView {
        date: date.to_string(),
        start_time: session.start_time,
        log_count: session.logs.len(),
        logs: session.logs.clone(),
        summary: session.summary.clone(),
    }
}

impl AppStore {
    fn new() -> Self {
        let data_dir = std::env::var("COLLECTOR_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.envbot"));
        Self::in_dir(data_dir)
    }

    fn in_dir(data_dir: PathBuf) -> Self {
        Self {
            sessions_path: Arc::new(data_dir.join("sessions.json")),
        }
    }

    async fn load_sessions(&self) -> anyhow::Result<SessionLog> {
        match tokio::fs::read(self.sessions_path.as_ref()).await {
            Ok(raw) => Ok(serde_json::from_slice::<SessionLog>(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(SessionLog::default()),
            Err(err) => Err(err.into()),
        }
    }

    /// Callers hold the session log lock, which also serializes writes.
    async fn save_sessions(&self, log: &SessionLog) -> anyhow::Result<()> {
        let path = self.sessions_path.as_ref().clone();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let payload = serde_json::to_vec_pretty(log)?;
        tokio::fs::write(path, payload).await?;
        Ok(())
    }
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}
