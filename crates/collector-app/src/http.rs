use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::info;

use poller::{DeviceSnapshot, PollerHandle, WriteError, WriteValue};
use register_map::{DataType, RegisterMap};
use types::DeviceIdentity;

/// Shared state behind the HTTP handlers.
#[derive(Clone)]
pub struct ApiState {
    pub snapshot_rx: watch::Receiver<DeviceSnapshot>,
    pub handle: PollerHandle,
    pub map: Arc<RegisterMap>,
    pub identity: DeviceIdentity,
    pub started_at_ms: u64,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/snapshot", get(snapshot))
        .route("/registers", get(registers))
        .route("/diagnostics", get(diagnostics))
        .route("/refresh", post(refresh))
        .route("/write", post(write))
        .with_state(state)
}

async fn health(State(state): State<ApiState>) -> (StatusCode, Json<Value>) {
    let snapshot = state.snapshot_rx.borrow().clone();
    let status = if snapshot.online {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "online": snapshot.online,
            "cycle": snapshot.cycle,
            "collected_at_ms": snapshot.collected_at_ms,
        })),
    )
}

async fn snapshot(State(state): State<ApiState>) -> Json<DeviceSnapshot> {
    Json(state.snapshot_rx.borrow().clone())
}

async fn registers(State(state): State<ApiState>) -> Json<Value> {
    let entries: Vec<Value> = state
        .map
        .iter()
        .map(|def| {
            json!({
                "key": def.key,
                "name": def.name,
                "address": def.address,
                "region": def.region.as_str(),
                "data_type": def.data_type,
                "scale": def.scale,
                "offset": def.offset,
                "precision": def.precision,
                "unit": def.unit,
                "writable": def.writable,
                "cumulative": def.cumulative,
            })
        })
        .collect();
    Json(json!({ "registers": entries }))
}

/// Support dump with network identifiers redacted.
async fn diagnostics(State(state): State<ApiState>) -> Json<Value> {
    let snapshot = state.snapshot_rx.borrow().clone();
    let sample: Vec<Value> = state
        .map
        .iter()
        .take(10)
        .map(|def| {
            json!({
                "key": def.key,
                "region": def.region.as_str(),
                "address": def.address,
                "value": snapshot.readings.get(&def.key),
            })
        })
        .collect();

    let mut region_counts = serde_json::Map::new();
    for region in [
        register_map::Region::Coil,
        register_map::Region::DiscreteInput,
        register_map::Region::Holding,
        register_map::Region::Input,
    ] {
        region_counts.insert(
            region.as_str().to_string(),
            json!(state.map.count_in_region(region)),
        );
    }

    Json(json!({
        "device": {
            "host": "**REDACTED**",
            "unit_id": state.identity.unit_id,
        },
        "started_at_ms": state.started_at_ms,
        "cycle": snapshot.cycle,
        "online": snapshot.online,
        "read_errors": snapshot.read_errors,
        "connect_errors": snapshot.connect_errors,
        "register_count": state.map.len(),
        "regions": region_counts,
        "sample": sample,
    }))
}

async fn refresh(State(state): State<ApiState>) -> StatusCode {
    state.handle.refresh().await;
    StatusCode::ACCEPTED
}

#[derive(Debug, Deserialize)]
struct WriteRequest {
    key: Option<String>,
    address: Option<u16>,
    data_type: Option<String>,
    value: Value,
}

async fn write(
    State(state): State<ApiState>,
    Json(request): Json<WriteRequest>,
) -> (StatusCode, Json<Value>) {
    let result = match (&request.key, request.address) {
        (Some(key), None) => {
            let value = match parse_write_value(&request.value) {
                Ok(value) => value,
                Err(message) => return bad_request(message),
            };
            state.handle.write(key.clone(), value).await
        }
        (None, Some(address)) => {
            let data_type = match request.data_type.as_deref() {
                None => DataType::Uint16,
                Some(name) => match name.parse::<DataType>() {
                    Ok(data_type) => data_type,
                    Err(err) => return bad_request(&err.to_string()),
                },
            };
            let Some(value) = request.value.as_f64() else {
                return bad_request("value must be numeric for raw writes");
            };
            state.handle.write_raw(address, value, data_type).await
        }
        _ => return bad_request("exactly one of key or address is required"),
    };

    match result {
        Ok(()) => {
            info!(key = ?request.key, address = ?request.address, "write accepted");
            (StatusCode::OK, Json(json!({ "status": "ok" })))
        }
        Err(err) => {
            let status = write_error_status(&err);
            (status, Json(json!({ "error": err.to_string() })))
        }
    }
}

fn parse_write_value(value: &Value) -> Result<WriteValue, &'static str> {
    if let Some(on) = value.as_bool() {
        return Ok(WriteValue::Bool(on));
    }
    if let Some(number) = value.as_f64() {
        return Ok(WriteValue::Number(number));
    }
    Err("value must be a boolean or a number")
}

fn write_error_status(err: &WriteError) -> StatusCode {
    match err {
        WriteError::UnknownKey(_) => StatusCode::NOT_FOUND,
        WriteError::NotWritable(_) | WriteError::TypeMismatch { .. } | WriteError::Encode(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        WriteError::NotConnected | WriteError::PollerGone => StatusCode::SERVICE_UNAVAILABLE,
        WriteError::Client(_) => StatusCode::BAD_GATEWAY,
    }
}

fn bad_request(message: &str) -> (StatusCode, Json<Value>) {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}
