use crate::{state::AppState, AlertQuery, ApiError, ApiResponse, ApiResult};
use axum::{
    extract::{Path, Query, State},
    Json,
};
use monitor_anomaly::{Alert, DetectorStatus};
use monitor_core::SymbolSeries;
use std::collections::BTreeMap;

pub async fn health_check() -> ApiResult<String> {
    Ok(Json(ApiResponse::success("OK".to_string())))
}

pub async fn get_status(State(state): State<AppState>) -> ApiResult<DetectorStatus> {
    let detector = state.detector()?;
    Ok(Json(ApiResponse::success(detector.status())))
}

/// Held alerts, newest first.
pub async fn get_alerts(
    Query(query): Query<AlertQuery>,
    State(state): State<AppState>,
) -> ApiResult<Vec<Alert>> {
    let detector = state.detector()?;
    let alerts = match query.limit {
        Some(limit) => detector.recent_alerts(limit),
        None => detector.alerts(),
    };
    Ok(Json(ApiResponse::success(alerts)))
}

pub async fn get_current_data(
    State(state): State<AppState>,
) -> ApiResult<BTreeMap<String, SymbolSeries>> {
    let detector = state.detector()?;
    Ok(Json(ApiResponse::success(detector.current_data())))
}

pub async fn get_symbol_data(
    Path(symbol): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<SymbolSeries> {
    let detector = state.detector()?;
    let series = detector
        .symbol_data(&symbol)
        .ok_or_else(|| ApiError::not_found(format!("No history for {}", symbol)))?;
    Ok(Json(ApiResponse::success(series)))
}
