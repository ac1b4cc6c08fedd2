//! HTTP control surface.
//!
//! JSON in, JSON out; the `:name` path segment is percent-decoded before the
//! registry lookup. Lifecycle conflicts map onto 409, unknown pages onto
//! 404, validation problems onto 400, and browser/CDP failures onto 500.

use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use warp::http::StatusCode;
use warp::Filter;

use crate::agent::perception::{LoopConfig, PerceptionLoop};
use crate::browser::{ChromeDriver, Viewport};
use crate::error::StudioError;
use crate::pages::PageRegistry;
use crate::recording::types::RecordingOptions;
use crate::recording::RecordingEngine;

pub struct AppState {
    pub driver: tokio::sync::Mutex<Option<ChromeDriver>>,
    pub registry: Arc<PageRegistry>,
    pub engine: RecordingEngine,
    pub loop_config: LoopConfig,
}

#[derive(Debug, Deserialize)]
struct CreatePageRequest {
    name: Option<Value>,
    viewport: Option<Viewport>,
}

#[derive(Debug, Default, Deserialize)]
struct StartRecordingRequest {
    options: Option<RecordingOptions>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PerceiveRequest {
    task: String,
    max_cycles: Option<u32>,
    model: Option<String>,
    read_only_mode: Option<bool>,
    blocked_url_patterns: Option<Vec<String>>,
}

type Reply = warp::reply::WithStatus<warp::reply::Json>;

pub fn routes(
    state: Arc<AppState>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let root = warp::path::end()
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(handle_root);

    let list_pages = warp::path!("pages")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(handle_list_pages);

    let create_page = warp::path!("pages")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_state(state.clone()))
        .and_then(handle_create_page);

    let delete_page = warp::path!("pages" / String)
        .and(warp::delete())
        .and(with_state(state.clone()))
        .and_then(handle_delete_page);

    let get_console = warp::path!("pages" / String / "console")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(handle_get_console);

    let clear_console = warp::path!("pages" / String / "console")
        .and(warp::delete())
        .and(with_state(state.clone()))
        .and_then(handle_clear_console);

    let recording_status = warp::path!("pages" / String / "recording" / "status")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(handle_recording_status);

    let recording_start = warp::path!("pages" / String / "recording" / "start")
        .and(warp::post())
        .and(warp::body::bytes())
        .and(with_state(state.clone()))
        .and_then(handle_recording_start);

    let recording_stop = warp::path!("pages" / String / "recording" / "stop")
        .and(warp::post())
        .and(with_state(state.clone()))
        .and_then(handle_recording_stop);

    let get_video = warp::path!("pages" / String / "video")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(handle_get_video);

    let perceive = warp::path!("pages" / String / "perceive")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_state(state))
        .and_then(handle_perceive);

    root.or(list_pages)
        .or(create_page)
        .or(delete_page)
        .or(get_console)
        .or(clear_console)
        .or(recording_status)
        .or(recording_start)
        .or(recording_stop)
        .or(get_video)
        .or(perceive)
}

fn with_state(
    state: Arc<AppState>,
) -> impl Filter<Extract = (Arc<AppState>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || Arc::clone(&state))
}

async fn handle_root(state: Arc<AppState>) -> Result<Reply, warp::Rejection> {
    let driver = state.driver.lock().await;
    let ws_endpoint = driver
        .as_ref()
        .map(|d| d.ws_endpoint())
        .unwrap_or_default();
    Ok(reply(StatusCode::OK, json!({ "wsEndpoint": ws_endpoint })))
}

async fn handle_list_pages(state: Arc<AppState>) -> Result<Reply, warp::Rejection> {
    let pages = state.registry.names().await;
    Ok(reply(StatusCode::OK, json!({ "pages": pages })))
}

async fn handle_create_page(
    req: CreatePageRequest,
    state: Arc<AppState>,
) -> Result<Reply, warp::Rejection> {
    let Some(name_value) = req.name else {
        return Ok(error_reply(StatusCode::BAD_REQUEST, "name is required"));
    };
    let Some(name) = name_value.as_str() else {
        return Ok(error_reply(StatusCode::BAD_REQUEST, "name must be a string"));
    };
    if let Err(e) = PageRegistry::validate_name(name) {
        return Ok(error_reply(StatusCode::BAD_REQUEST, &e.to_string()));
    }

    let driver = state.driver.lock().await;
    let Some(driver) = driver.as_ref() else {
        return Ok(error_reply(StatusCode::BAD_REQUEST, "browser is not running"));
    };

    let page = match driver.create_page(req.viewport).await {
        Ok(page) => page,
        Err(e) => {
            log::error!("page creation failed: {}", e);
            return Ok(error_reply(StatusCode::BAD_REQUEST, &e.to_string()));
        }
    };

    match state.registry.insert(name, page.clone()).await {
        Ok(entry) => Ok(reply(
            StatusCode::OK,
            json!({
                "wsEndpoint": driver.ws_endpoint(),
                "name": entry.name,
                "targetId": entry.target_id,
            }),
        )),
        Err(e) => {
            // Don't leak the freshly created target on a rejected name.
            use chromiumoxide::cdp::browser_protocol::target::CloseTargetParams;
            let _ = page
                .execute(CloseTargetParams::new(page.target_id().clone()))
                .await;
            Ok(error_reply(StatusCode::BAD_REQUEST, &e.to_string()))
        }
    }
}

async fn handle_delete_page(
    name: String,
    state: Arc<AppState>,
) -> Result<Reply, warp::Rejection> {
    let name = percent_decode(&name);
    match state.registry.remove(&name).await {
        Some(_) => Ok(reply(StatusCode::OK, json!({ "success": true }))),
        None => Ok(not_found(&name)),
    }
}

async fn handle_get_console(
    name: String,
    state: Arc<AppState>,
) -> Result<Reply, warp::Rejection> {
    let name = percent_decode(&name);
    match state.registry.get(&name).await {
        Some(entry) => {
            let logs = entry.console_snapshot();
            Ok(reply(
                StatusCode::OK,
                json!({ "count": logs.len(), "logs": logs }),
            ))
        }
        None => Ok(not_found(&name)),
    }
}

async fn handle_clear_console(
    name: String,
    state: Arc<AppState>,
) -> Result<Reply, warp::Rejection> {
    let name = percent_decode(&name);
    match state.registry.get(&name).await {
        Some(entry) => {
            let cleared = entry.clear_console();
            Ok(reply(
                StatusCode::OK,
                json!({ "success": true, "cleared": cleared }),
            ))
        }
        None => Ok(not_found(&name)),
    }
}

async fn handle_recording_status(
    name: String,
    state: Arc<AppState>,
) -> Result<Reply, warp::Rejection> {
    let name = percent_decode(&name);
    match state.registry.get(&name).await {
        Some(entry) => {
            let status = state.engine.status(&entry);
            Ok(reply(
                StatusCode::OK,
                serde_json::to_value(status).unwrap_or_default(),
            ))
        }
        None => Ok(not_found(&name)),
    }
}

async fn handle_recording_start(
    name: String,
    body: warp::hyper::body::Bytes,
    state: Arc<AppState>,
) -> Result<Reply, warp::Rejection> {
    let name = percent_decode(&name);
    let Some(entry) = state.registry.get(&name).await else {
        return Ok(not_found(&name));
    };

    // The body is optional; an empty body means default options.
    let request: StartRecordingRequest = if body.is_empty() {
        StartRecordingRequest::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(request) => request,
            Err(e) => {
                return Ok(reply(
                    StatusCode::BAD_REQUEST,
                    json!({ "success": false, "error": format!("invalid body: {}", e) }),
                ))
            }
        }
    };

    match state
        .engine
        .start(&entry, request.options.unwrap_or_default())
        .await
    {
        Ok(()) => Ok(reply(StatusCode::OK, json!({ "success": true }))),
        Err(e) => {
            let status = recording_error_status(&e);
            Ok(reply(
                status,
                json!({ "success": false, "error": e.to_string() }),
            ))
        }
    }
}

async fn handle_recording_stop(
    name: String,
    state: Arc<AppState>,
) -> Result<Reply, warp::Rejection> {
    let name = percent_decode(&name);
    let Some(entry) = state.registry.get(&name).await else {
        return Ok(not_found(&name));
    };

    match state.engine.stop(&entry).await {
        Ok(outcome) => {
            let mut body = json!({ "success": true });
            if let (Some(obj), Ok(Value::Object(outcome))) =
                (body.as_object_mut(), serde_json::to_value(&outcome))
            {
                obj.extend(outcome);
            }
            Ok(reply(StatusCode::OK, body))
        }
        Err(e) => {
            let status = recording_error_status(&e);
            Ok(reply(
                status,
                json!({ "success": false, "error": e.to_string() }),
            ))
        }
    }
}

async fn handle_get_video(
    name: String,
    state: Arc<AppState>,
) -> Result<Reply, warp::Rejection> {
    let name = percent_decode(&name);
    let Some(entry) = state.registry.get(&name).await else {
        return Ok(not_found(&name));
    };

    let pending = entry.is_recording();
    let video_path = entry.last_video.lock().ok().and_then(|v| v.clone());

    let mut body = json!({ "pending": pending });
    match (&video_path, pending) {
        (Some(path), _) => body["videoPath"] = json!(path),
        (None, false) => {
            body["error"] = json!("No video has been recorded for this page");
        }
        (None, true) => {}
    }
    Ok(reply(StatusCode::OK, body))
}

async fn handle_perceive(
    name: String,
    req: PerceiveRequest,
    state: Arc<AppState>,
) -> Result<Reply, warp::Rejection> {
    let name = percent_decode(&name);
    if state.registry.get(&name).await.is_none() {
        return Ok(not_found(&name));
    }

    let mut config = state.loop_config.clone();
    if let Some(max_cycles) = req.max_cycles {
        config.max_cycles = max_cycles;
    }
    if let Some(model) = req.model {
        config.model = model;
    }
    if let Some(read_only) = req.read_only_mode {
        config.safety.read_only_mode = read_only;
    }
    if let Some(patterns) = req.blocked_url_patterns {
        config.safety.blocked_url_patterns = patterns;
    }

    let perception = match PerceptionLoop::from_env(config) {
        Ok(perception) => perception,
        Err(e) => return Ok(error_reply(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())),
    };

    match perception.run(state.registry.as_ref(), &name, &req.task).await {
        Ok(result) => Ok(reply(
            StatusCode::OK,
            serde_json::to_value(&result).unwrap_or_default(),
        )),
        Err(e) => Ok(error_reply(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())),
    }
}

fn reply(status: StatusCode, body: Value) -> Reply {
    warp::reply::with_status(warp::reply::json(&body), status)
}

fn error_reply(status: StatusCode, message: &str) -> Reply {
    reply(status, json!({ "error": message }))
}

fn not_found(name: &str) -> Reply {
    error_reply(
        StatusCode::NOT_FOUND,
        &format!("Page not found: {}", name),
    )
}

fn recording_error_status(error: &StudioError) -> StatusCode {
    match error {
        StudioError::Recording(message)
            if message.contains("already in progress") || message.contains("No recording") =>
        {
            StatusCode::CONFLICT
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Decode %XX escapes in a path segment. Enough for page names; invalid
/// escapes pass through untouched.
fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = &input[i + 1..i + 3];
            if let Ok(byte) = u8::from_str_radix(hex, 16) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_decode() {
        assert_eq!(percent_decode("plain-name"), "plain-name");
        assert_eq!(percent_decode("my%20page"), "my page");
        assert_eq!(percent_decode("a%2Fb"), "a/b");
        // Invalid escapes pass through.
        assert_eq!(percent_decode("50%"), "50%");
        assert_eq!(percent_decode("%zz"), "%zz");
    }

    #[test]
    fn test_recording_error_statuses() {
        assert_eq!(
            recording_error_status(&StudioError::Recording(
                "Recording already in progress".to_string()
            )),
            StatusCode::CONFLICT
        );
        assert_eq!(
            recording_error_status(&StudioError::Recording(
                "No recording in progress".to_string()
            )),
            StatusCode::CONFLICT
        );
        assert_eq!(
            recording_error_status(&StudioError::Recording(
                "Page.startScreencast failed: boom".to_string()
            )),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
