//! Stream lifecycle and read endpoints

use actix_web::{get, post, web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateStreamRequest {
    pub owner_id: Uuid,
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    pub scheduled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct CallerRequest {
    pub user_id: Uuid,
}

/// POST /api/v1/streams
#[post("/streams")]
pub async fn create_stream(
    state: web::Data<AppState>,
    body: web::Json<CreateStreamRequest>,
) -> AppResult<HttpResponse> {
    body.validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let stream = state
        .streams
        .create(body.owner_id, body.title.clone(), body.scheduled_at)
        .await?;
    Ok(HttpResponse::Created().json(stream))
}

/// GET /api/v1/streams/{id}
#[get("/streams/{id}")]
pub async fn get_stream(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> AppResult<HttpResponse> {
    let details = state.streams.details(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(details))
}

/// GET /api/v1/streams
#[get("/streams")]
pub async fn list_live_streams(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let streams = state.streams.list_live().await?;
    Ok(HttpResponse::Ok().json(streams))
}

/// POST /api/v1/streams/{id}/start
#[post("/streams/{id}/start")]
pub async fn start_stream(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<CallerRequest>,
) -> AppResult<HttpResponse> {
    let stream = state
        .streams
        .start(path.into_inner(), body.user_id)
        .await?;
    Ok(HttpResponse::Ok().json(stream))
}

/// POST /api/v1/streams/{id}/end
#[post("/streams/{id}/end")]
pub async fn end_stream(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<CallerRequest>,
) -> AppResult<HttpResponse> {
    let stream = state.streams.end(path.into_inner(), body.user_id).await?;
    Ok(HttpResponse::Ok().json(stream))
}

/// GET /api/v1/streams/{id}/analytics
#[get("/streams/{id}/analytics")]
pub async fn stream_analytics(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> AppResult<HttpResponse> {
    let analytics = state.streams.analytics(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(analytics))
}
