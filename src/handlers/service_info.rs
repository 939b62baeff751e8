use super::AppState;
use axum::{Json, extract::State};
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub version: String,
    /// Storage engines this server can open.
    pub engines: Vec<String>,
    pub limit_default: u64,
    pub limit_max: u64,
}

pub async fn service_info(State(state): State<AppState>) -> Json<ServiceInfo> {
    let configuration = state.manager.configuration();
    Json(ServiceInfo {
        id: "org.example.varstore".to_string(),
        name: "varstore".to_string(),
        description: "Permission-gated variant queries over pluggable storage engines"
            .to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        engines: state.manager.resolver().registry().names(),
        limit_default: configuration.limit_default,
        limit_max: configuration.limit_max,
    })
}
