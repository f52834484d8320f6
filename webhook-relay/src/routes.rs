use axum::extract::{Json, State};
use axum::http::StatusCode;
use axum::routing::put;
use axum::Router;
use serde::Deserialize;
use tower_http::cors::CorsLayer;

use crate::error::RelayError;
use crate::registry::RegistryHandle;

/// `key` names both the subscription and the sync-service key it listens to.
#[derive(Debug, Deserialize)]
pub struct RegisterWebhook {
    pub key: String,
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct UnregisterWebhook {
    pub key: String,
    #[serde(default)]
    pub url: Option<String>,
}

pub fn router(registry: RegistryHandle) -> Router {
    Router::new()
        .route("/webhooks", put(put_webhook).delete(delete_webhook))
        .layer(CorsLayer::permissive())
        .with_state(registry)
}

/// Always 200: the listen stream attaches after the response is sent.
async fn put_webhook(
    State(registry): State<RegistryHandle>,
    Json(request): Json<RegisterWebhook>,
) -> StatusCode {
    log::info!("Put request: {request:?}");
    let RegisterWebhook { key, url } = request;
    if let Err(e) = registry.register(key.clone(), key, url).await {
        log::error!("Dropping registration: {e}");
    }
    StatusCode::OK
}

async fn delete_webhook(
    State(registry): State<RegistryHandle>,
    Json(request): Json<UnregisterWebhook>,
) -> Result<StatusCode, RelayError> {
    log::info!("Delete request: {request:?}");
    registry.unregister(request.key).await?;
    Ok(StatusCode::OK)
}
