//! REST endpoint handlers.
//!
//! All reads come from the per-tick snapshot or the event log; the
//! control and game endpoints write only through operator state and
//! the engine command channel. Persistence failures surface to the
//! caller as 500s with the message, leaving in-memory state untouched.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Html;
use serde::Deserialize;
use tokio::sync::oneshot;
use xiuxian_core::runner::EngineCommand;
use xiuxian_db::event_log::MajorFilter;
use xiuxian_types::AvatarId;

use crate::dto::StateDto;
use crate::state::AppState;

/// Handler error: status plus message.
type ApiError = (StatusCode, String);

/// Minimal status page.
pub async fn index() -> Html<&'static str> {
    Html(
        "<html><head><title>xiuxian</title></head>\
         <body><h1>Cultivation world engine</h1>\
         <p>REST under <code>/api</code>, tick stream at <code>/ws</code>.</p></body></html>",
    )
}

/// `GET /api/state` -- the current world snapshot.
pub async fn get_state(State(state): State<AppState>) -> Result<Json<StateDto>, ApiError> {
    let snapshot = state
        .snapshot
        .read()
        .map_err(|_| internal("snapshot lock poisoned"))?;
    Ok(Json(StateDto {
        year: snapshot.year,
        month: snapshot.month,
        paused: state.operator.is_paused(),
        llm_unhealthy: state.operator.is_llm_unhealthy(),
        avatars: snapshot.avatars.clone(),
        phenomenon: snapshot.phenomenon.clone(),
        recent_events: snapshot.recent_events.clone(),
    }))
}

/// `GET /api/map` -- the static map, served once per client.
pub async fn get_map(State(state): State<AppState>) -> Result<Json<crate::dto::MapDto>, ApiError> {
    let snapshot = state
        .snapshot
        .read()
        .map_err(|_| internal("snapshot lock poisoned"))?;
    Ok(Json(snapshot.map.clone()))
}

/// Query parameters for `GET /api/events`.
#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    /// Single-participant filter.
    pub avatar_id: Option<String>,
    /// Pair filter, first id.
    pub avatar_id_1: Option<String>,
    /// Pair filter, second id.
    pub avatar_id_2: Option<String>,
    /// Page cursor from the previous response.
    pub cursor: Option<String>,
    /// Page size (default 20, capped at 100).
    pub limit: Option<u32>,
    /// `major` or `minor` to filter on the major flag.
    pub major: Option<String>,
}

/// Response shape for `GET /api/events`.
#[derive(Debug, serde::Serialize)]
pub struct EventsResponse {
    /// The page of events, newest first.
    pub events: Vec<xiuxian_types::Event>,
    /// Cursor for the next page, when one exists.
    pub next_cursor: Option<String>,
}

/// `GET /api/events` -- paginated event history.
pub async fn get_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<EventsResponse>, ApiError> {
    let Some(log) = state.event_log_handle() else {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            "no game is running".to_owned(),
        ));
    };
    let limit = query.limit.unwrap_or(20).min(100);
    let filter = match query.major.as_deref() {
        Some("major") => MajorFilter::MajorOnly,
        Some("minor") => MajorFilter::MinorOnly,
        _ => MajorFilter::All,
    };

    let page = match (&query.avatar_id_1, &query.avatar_id_2, &query.avatar_id) {
        (Some(first), Some(second), _) => {
            let a = parse_avatar_id(first)?;
            let b = parse_avatar_id(second)?;
            log.between(a, b, filter, query.cursor.as_deref(), limit)
                .await
                .map_err(|e| internal(&e.to_string()))?
        }
        (_, _, Some(single)) => {
            let id = parse_avatar_id(single)?;
            log.by_participant(id, filter, query.cursor.as_deref(), limit)
                .await
                .map_err(|e| internal(&e.to_string()))?
        }
        _ => xiuxian_db::event_log::EventPage {
            events: log
                .recent(limit)
                .await
                .map_err(|e| internal(&e.to_string()))?,
            next_cursor: None,
        },
    };

    Ok(Json(EventsResponse {
        events: page.events,
        next_cursor: page.next_cursor,
    }))
}

/// Query parameters for `GET /api/detail`.
#[derive(Debug, Deserialize)]
pub struct DetailQuery {
    /// `avatar`, `region`, or `sect`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Entity id.
    pub id: String,
}

/// `GET /api/detail` -- structured detail for one entity.
pub async fn get_detail(
    State(state): State<AppState>,
    Query(query): Query<DetailQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let snapshot = state
        .snapshot
        .read()
        .map_err(|_| internal("snapshot lock poisoned"))?;
    let not_found = || (StatusCode::NOT_FOUND, format!("no such {}: {}", query.kind, query.id));

    let value = match query.kind.as_str() {
        "avatar" => snapshot
            .avatar_details
            .get(&query.id)
            .map(|detail| serde_json::to_value(detail))
            .ok_or_else(not_found)?,
        "region" => snapshot
            .regions
            .get(&query.id)
            .map(|region| serde_json::to_value(region))
            .ok_or_else(not_found)?,
        "sect" => snapshot
            .sects
            .get(&query.id)
            .map(|sect| serde_json::to_value(sect))
            .ok_or_else(not_found)?,
        other => {
            return Err((
                StatusCode::BAD_REQUEST,
                format!("unknown detail type: {other}"),
            ));
        }
    };
    value.map(Json).map_err(|e| internal(&e.to_string()))
}

/// `POST /api/control/{action}` -- trivial operator controls.
pub async fn control(
    State(state): State<AppState>,
    Path(action): Path<String>,
) -> Result<StatusCode, ApiError> {
    match action.as_str() {
        "pause" => state.operator.pause(),
        "resume" => state.operator.resume(),
        "reset" => state.operator.request_reset(),
        "reinit" => state.operator.request_reinit(),
        "shutdown" => state.operator.request_shutdown(),
        other => {
            return Err((
                StatusCode::BAD_REQUEST,
                format!("unknown control action: {other}"),
            ));
        }
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Body for game lifecycle requests.
#[derive(Debug, Default, Deserialize)]
pub struct GameRequest {
    /// Save slot name (required for save/load/delete).
    pub name: Option<String>,
}

/// `POST /api/game/{action}` -- game lifecycle.
pub async fn game(
    State(state): State<AppState>,
    Path(action): Path<String>,
    body: Option<Json<GameRequest>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let name = body.and_then(|Json(request)| request.name);
    match action.as_str() {
        "start" => {
            // Starting a fresh game is a reinit of the engine loop.
            state.operator.request_reinit();
            Ok(Json(serde_json::json!({"ok": true})))
        }
        "save" => {
            let name = name.ok_or_else(missing_name)?;
            let (tx, rx) = oneshot::channel();
            send_command(&state, EngineCommand::Save { name, reply: tx }).await?;
            await_reply(rx).await??;
            Ok(Json(serde_json::json!({"ok": true})))
        }
        "load" => {
            let name = name.ok_or_else(missing_name)?;
            let (tx, rx) = oneshot::channel();
            send_command(&state, EngineCommand::Load { name, reply: tx }).await?;
            let log = await_reply(rx).await??;
            state.set_event_log(log);
            Ok(Json(serde_json::json!({"ok": true})))
        }
        "delete" => {
            let name = name.ok_or_else(missing_name)?;
            let (tx, rx) = oneshot::channel();
            send_command(&state, EngineCommand::DeleteSave { name, reply: tx }).await?;
            await_reply(rx).await??;
            Ok(Json(serde_json::json!({"ok": true})))
        }
        "list" => {
            let (tx, rx) = oneshot::channel();
            send_command(&state, EngineCommand::ListSaves { reply: tx }).await?;
            let saves = await_reply(rx).await??;
            Ok(Json(serde_json::json!({"saves": saves})))
        }
        other => Err((
            StatusCode::BAD_REQUEST,
            format!("unknown game action: {other}"),
        )),
    }
}

/// Send a command to the engine loop.
async fn send_command(state: &AppState, command: EngineCommand) -> Result<(), ApiError> {
    state
        .commands
        .send(command)
        .await
        .map_err(|_| internal("engine loop is gone"))
}

/// Await a reply channel, mapping both failure layers to API errors.
async fn await_reply<T>(rx: oneshot::Receiver<Result<T, String>>) -> Result<Result<T, ApiError>, ApiError> {
    let reply = rx.await.map_err(|_| internal("engine dropped the reply"))?;
    Ok(reply.map_err(|message| (StatusCode::INTERNAL_SERVER_ERROR, message)))
}

fn parse_avatar_id(s: &str) -> Result<AvatarId, ApiError> {
    AvatarId::parse(s).map_err(|_| (StatusCode::BAD_REQUEST, format!("bad avatar id: {s}")))
}

fn missing_name() -> ApiError {
    (StatusCode::BAD_REQUEST, "missing save name".to_owned())
}

fn internal(message: &str) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, message.to_owned())
}
