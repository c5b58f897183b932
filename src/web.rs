//! HTTP surface: `GET /state`, `GET /image/<relative>`, `POST /command`, and a fallback that
//! serves the temp directory (generated artifacts plus the static control UI). Built on `axum`,
//! following the teacher's `web.rs` `Router::new().route(...)`/`State`/graceful-shutdown shape.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::{Path as AxumPath, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{self, Configuration};
use crate::server::StateSnapshot;
use crate::signals::Signals;

#[derive(Clone)]
pub struct AppState {
    pub state_rx: watch::Receiver<StateSnapshot>,
    pub signals: Signals,
    pub config: Arc<Mutex<Configuration>>,
    pub config_path: PathBuf,
    pub images_path: PathBuf,
    pub temp_path: PathBuf,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/state", get(get_state))
        .route("/image/{*rel}", get(get_source_image))
        .route("/command", post(post_command))
        .fallback(serve_temp)
        .with_state(state)
}

/// Bind and serve until `cancel` fires. Bind failure is the one HTTP-layer error this crate
/// treats as unrecoverable (§7): it is reported to the caller so the binary can request exit.
pub async fn serve(
    bind_addr: SocketAddr,
    state: AppState,
    cancel: CancellationToken,
) -> Result<(), std::io::Error> {
    let app = router(state);
    info!(%bind_addr, "starting HTTP surface");
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
        })
        .await
}

#[derive(Serialize)]
struct StateResponse {
    chromecast_name: String,
    is_paused: bool,
    slideshow_duration_seconds: f64,
    image_path: Option<PathBuf>,
    images: Vec<PathBuf>,
    current_image_index: usize,
    images_min_index: usize,
    image_count: usize,
    log_lines: Vec<String>,
}

async fn get_state(State(state): State<AppState>) -> Json<StateResponse> {
    let snapshot = state.state_rx.borrow().clone();
    Json(StateResponse {
        chromecast_name: snapshot.chromecast_name,
        is_paused: snapshot.is_paused,
        slideshow_duration_seconds: snapshot.slideshow_duration_seconds,
        image_path: snapshot.image_path,
        images: snapshot.images,
        current_image_index: snapshot.current_image_index,
        images_min_index: snapshot.images_min_index,
        image_count: snapshot.image_count,
        log_lines: snapshot.log_lines,
    })
}

async fn get_source_image(
    State(state): State<AppState>,
    AxumPath(rel): AxumPath<String>,
) -> Response {
    serve_under_root(&state.images_path, &rel).await
}

async fn serve_temp(State(state): State<AppState>, uri: axum::http::Uri) -> Response {
    let rel = uri.path().trim_start_matches('/');
    serve_under_root(&state.temp_path, rel).await
}

/// Read `rel` under `root`, rejecting any path that normalises outside of it. Traversal and
/// I/O failures both surface as 404, per §4.D's failure policy.
async fn serve_under_root(root: &Path, rel: &str) -> Response {
    let candidate = root.join(rel);
    let normalised = match normalise(&candidate) {
        Some(p) => p,
        None => return not_found("invalid path"),
    };
    let root_normalised = normalise(root).unwrap_or_else(|| root.to_path_buf());
    if !normalised.starts_with(&root_normalised) {
        warn!(path = %candidate.display(), "rejected path escaping served root");
        return not_found("not found");
    }

    match tokio::fs::read(&normalised).await {
        Ok(bytes) => {
            let content_type = content_type_for(&normalised);
            ([(header::CONTENT_TYPE, content_type)], bytes).into_response()
        }
        Err(err) => {
            warn!(path = %normalised.display(), error = %err, "failed to read file");
            not_found("not found")
        }
    }
}

/// Lexically normalise `.`/`..` components without touching the filesystem (the target may not
/// exist yet, e.g. a just-deleted temp artifact).
fn normalise(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            std::path::Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    Some(out)
}

fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("html") => "text/html; charset=utf-8",
        _ => "application/octet-stream",
    }
}

fn not_found(message: &str) -> Response {
    (StatusCode::NOT_FOUND, message.to_string()).into_response()
}

#[derive(Deserialize)]
struct Command {
    name: String,
    #[serde(default)]
    parameters: serde_json::Value,
}

async fn post_command(
    State(state): State<AppState>,
    body: Result<Json<Command>, axum::extract::rejection::JsonRejection>,
) -> Response {
    let Json(command) = match body {
        Ok(command) => command,
        Err(err) => return (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    };

    match command.name.as_str() {
        "exit" => {
            state.signals.request_exit();
            StatusCode::OK.into_response()
        }
        "pause" => {
            state.signals.toggle_pause();
            StatusCode::OK.into_response()
        }
        "reload" => {
            state.signals.request_reload();
            StatusCode::OK.into_response()
        }
        "duration_update" => handle_duration_update(&state, &command.parameters).await,
        other => (StatusCode::BAD_REQUEST, format!("unknown command: {other}")).into_response(),
    }
}

async fn handle_duration_update(state: &AppState, parameters: &serde_json::Value) -> Response {
    let Some(seconds) = parameters.as_f64() else {
        return (StatusCode::BAD_REQUEST, "duration_update requires a numeric value").into_response();
    };
    if seconds <= 0.0 {
        return (StatusCode::BAD_REQUEST, "duration must be positive").into_response();
    }

    state.signals.set_duration(seconds);

    let mut config = state.config.lock().await;
    config.slideshow_duration_seconds = seconds;
    let path = state.config_path.clone();
    let to_write = config.clone();
    drop(config);

    let write_result =
        tokio::task::spawn_blocking(move || config::rewrite_slideshow_duration(&path, &to_write))
            .await;
    match write_result {
        Ok(Ok(())) => StatusCode::OK.into_response(),
        Ok(Err(err)) => {
            error!(error = %err, "failed to persist duration_update, keeping in-memory value");
            StatusCode::OK.into_response()
        }
        Err(err) => {
            error!(error = %err, "config rewrite task panicked");
            StatusCode::OK.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalise_rejects_escaping_parent_dirs() {
        assert_eq!(normalise(Path::new("a/../../b")), None);
    }

    #[test]
    fn normalise_collapses_current_dir_components() {
        assert_eq!(
            normalise(Path::new("a/./b/../c")),
            Some(PathBuf::from("a/c"))
        );
    }

    #[test]
    fn content_type_matches_known_extensions() {
        assert_eq!(content_type_for(Path::new("x.jpg")), "image/jpeg");
        assert_eq!(content_type_for(Path::new("x.PNG")), "image/png");
        assert_eq!(content_type_for(Path::new("x.bin")), "application/octet-stream");
    }
}
