use axum::{extract::State, Json};
use serde::Serialize;
use super::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub environment: String,
    pub testnet: bool,
    pub icrc_index: String,
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let icrc_index = if state.icrc_client.is_some() {
        "configured".to_string()
    } else {
        "disabled".to_string()
    };

    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        environment: state.config.environment.clone(),
        testnet: state.config.is_testnet(),
        icrc_index,
    })
}
