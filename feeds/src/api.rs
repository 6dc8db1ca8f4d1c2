use crate::config::Listener as ListenerConfig;
use crate::errors::ServiceError;
use crate::registry::Registry;
use crate::types::{FeedId, Filter, Order};
use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;

const DEFAULT_LIMIT: u32 = 100;
const MAX_LIMIT: u32 = 1_000;

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub fn router(registry: Arc<Registry>) -> Router {
    Router::new()
        .route("/v1/feeds", post(create).get(list))
        .route("/v1/feeds/item", get(read).delete(delete))
        .with_state(registry)
}

pub async fn serve(listener: ListenerConfig, registry: Arc<Registry>) -> Result<(), ApiError> {
    let addr = format!("{}:{}", listener.host, listener.port);
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "Management API listening");
    axum::serve(listener, router(registry)).await?;
    Ok(())
}

#[derive(Deserialize, Debug)]
struct CreateRequest {
    id: String,
    #[serde(default)]
    auth: String,
    group_id: String,
    user_id: String,
}

/// Registration as returned to API clients. The auth payload is never
/// echoed back.
#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct FeedResponse {
    pub id: FeedId,
    pub group_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub replica: u32,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct ListResponse {
    pub ids: Vec<FeedId>,
}

#[derive(Serialize)]
struct ApiErrorResponse {
    error_message: String,
}

#[derive(Deserialize, Debug)]
struct ItemParams {
    id: String,
}

#[derive(Deserialize, Debug)]
struct DeleteParams {
    id: String,
    group_id: String,
    user_id: String,
}

#[derive(Deserialize, Debug)]
struct ListParams {
    limit: Option<u32>,
    #[serde(default)]
    cursor: String,
    #[serde(default)]
    order: Order,
    #[serde(default)]
    group_id: String,
    #[serde(default)]
    user_id: String,
    #[serde(default)]
    pattern: String,
}

async fn create(
    State(registry): State<Arc<Registry>>,
    Json(request): Json<CreateRequest>,
) -> Result<StatusCode, ServiceError> {
    registry
        .register(
            &request.id,
            &request.auth,
            &request.group_id,
            &request.user_id,
            Utc::now(),
        )
        .await?;
    Ok(StatusCode::CREATED)
}

async fn read(
    State(registry): State<Arc<Registry>>,
    Query(params): Query<ItemParams>,
) -> Result<Json<FeedResponse>, ServiceError> {
    let feed = registry.lookup(&params.id).await?;
    Ok(Json(FeedResponse {
        id: params.id,
        group_id: feed.group_id,
        user_id: feed.user_id,
        created_at: feed.created_at,
        replica: feed.replica,
    }))
}

async fn delete(
    State(registry): State<Arc<Registry>>,
    Query(params): Query<DeleteParams>,
) -> Result<StatusCode, ServiceError> {
    registry
        .unregister(&params.id, &params.group_id, &params.user_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list(
    State(registry): State<Arc<Registry>>,
    Query(params): Query<ListParams>,
) -> Result<Json<ListResponse>, ServiceError> {
    let limit = match params.limit {
        None | Some(0) => DEFAULT_LIMIT,
        Some(n) => n.min(MAX_LIMIT),
    };
    let filter = Filter {
        group_id: params.group_id,
        user_id: params.user_id,
        pattern: params.pattern,
    };
    let ids = registry
        .list(limit, &filter, params.order, &params.cursor)
        .await?;
    Ok(Json(ListResponse { ids }))
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = match self {
            ServiceError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ServiceError::Conflict(_) => StatusCode::CONFLICT,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Unexpected(ref e) => {
                tracing::error!(error = %e, "Request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(ApiErrorResponse {
            error_message: self.to_string(),
        });

        (status, body).into_response()
    }
}
