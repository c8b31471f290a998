//! Hardware report endpoint
//!
//! GET /hardware - probe the host now and return inventory plus capabilities

use axum::{Json, extract::State};
use inferd_hardware::HardwareReport;
use std::sync::Arc;

use crate::error::ServerResult;
use crate::state::AppState;

/// GET /hardware
///
/// Never served from cache. The fresh inventory also refreshes the core
/// count the provisioner uses for its thread hint.
pub async fn hardware(State(state): State<Arc<AppState>>) -> ServerResult<Json<HardwareReport>> {
    let report = state.probe.report().await?;
    state.provisioner.observe_inventory(&report.inventory);
    Ok(Json(report))
}

pub fn hardware_router() -> axum::Router<Arc<AppState>> {
    use axum::routing::get;
    axum::Router::new().route("/hardware", get(hardware))
}
