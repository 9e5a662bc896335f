//! Viewer engagement endpoints
//!
//! These share the gateway's counter and broadcast paths, so a REST join
//! and a WebSocket connect move the same counters and emit the same events.

use actix_web::{post, web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ViewerRequest {
    pub user_id: Uuid,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CommentRequest {
    pub user_id: Uuid,
    #[validate(length(min = 1, max = 500))]
    pub body: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct GiftRequest {
    pub user_id: Uuid,
    #[validate(length(min = 1, max = 64))]
    pub gift_type: String,
    pub value: i64,
}

#[derive(Debug, Deserialize)]
pub struct ReactionRequest {
    pub user_id: Uuid,
    pub reaction_type: String,
}

/// POST /api/v1/streams/{id}/join
#[post("/streams/{id}/join")]
pub async fn join_stream(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<ViewerRequest>,
) -> AppResult<HttpResponse> {
    let counts = state.streams.join(path.into_inner(), body.user_id).await?;
    Ok(HttpResponse::Ok().json(counts))
}

/// POST /api/v1/streams/{id}/leave
#[post("/streams/{id}/leave")]
pub async fn leave_stream(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<ViewerRequest>,
) -> AppResult<HttpResponse> {
    let counts = state.streams.leave(path.into_inner(), body.user_id).await?;
    Ok(HttpResponse::Ok().json(counts))
}

/// POST /api/v1/streams/{id}/comments
#[post("/streams/{id}/comments")]
pub async fn post_comment(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<CommentRequest>,
) -> AppResult<HttpResponse> {
    body.validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let comment = state
        .streams
        .comment(path.into_inner(), body.user_id, body.body.clone())
        .await?;
    Ok(HttpResponse::Created().json(comment))
}

/// POST /api/v1/streams/{id}/gifts
#[post("/streams/{id}/gifts")]
pub async fn send_gift(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<GiftRequest>,
) -> AppResult<HttpResponse> {
    body.validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let gift = state
        .streams
        .gift(
            path.into_inner(),
            body.user_id,
            body.gift_type.clone(),
            body.value,
        )
        .await?;
    Ok(HttpResponse::Created().json(gift))
}

/// POST /api/v1/streams/{id}/likes
#[post("/streams/{id}/likes")]
pub async fn like_stream(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<ViewerRequest>,
) -> AppResult<HttpResponse> {
    state.streams.like(path.into_inner(), body.user_id).await?;
    Ok(HttpResponse::Created().finish())
}

/// POST /api/v1/streams/{id}/shares
#[post("/streams/{id}/shares")]
pub async fn share_stream(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<ViewerRequest>,
) -> AppResult<HttpResponse> {
    state.streams.share(path.into_inner(), body.user_id).await?;
    Ok(HttpResponse::Created().finish())
}

/// POST /api/v1/streams/{id}/reactions
#[post("/streams/{id}/reactions")]
pub async fn send_reaction(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<ReactionRequest>,
) -> AppResult<HttpResponse> {
    let kind = state
        .streams
        .reaction(path.into_inner(), body.user_id, &body.reaction_type)
        .await?;
    Ok(HttpResponse::Created().json(json!({ "reaction_type": kind })))
}
