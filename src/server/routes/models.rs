use axum::{Json, extract::State};
use serde::Serialize;

use crate::server::guards::auth::AuthedKey;
use crate::server::router::GatewayState;

#[derive(Debug, Serialize)]
pub struct ModelList {
    pub object: &'static str,
    pub data: Vec<ModelEntry>,
}

#[derive(Debug, Serialize)]
pub struct ModelEntry {
    pub id: String,
    pub object: &'static str,
    pub owned_by: &'static str,
}

/// `GET /v1/models`: static merge of every provider's supported-model
/// list.
pub async fn models_handler(
    State(state): State<GatewayState>,
    _auth: AuthedKey,
) -> Json<ModelList> {
    let data = state
        .providers
        .model_names()
        .into_iter()
        .map(|id| ModelEntry {
            id,
            object: "model",
            owned_by: "castor",
        })
        .collect();

    Json(ModelList {
        object: "list",
        data,
    })
}
