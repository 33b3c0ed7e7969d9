use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    api::state::AppState,
    domain::{NewPaymentConcept, PaymentConcept},
    error::{AppError, Result},
};

#[derive(Deserialize)]
pub struct TransitionRequest {
    pub status: String,
}

pub async fn create(
    State(state): State<AppState>,
    Json(request): Json<NewPaymentConcept>,
) -> Result<Json<PaymentConcept>> {
    let concept = state
        .service_context
        .concept_service
        .create_concept(request)
        .await?;
    Ok(Json(concept))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<PaymentConcept>> {
    let concept = state.service_context.concept_service.find_concept(id).await?;
    Ok(Json(concept))
}

pub async fn list_active(State(state): State<AppState>) -> Result<Json<Vec<PaymentConcept>>> {
    let concepts = state.service_context.concept_service.list_active().await?;
    Ok(Json(concepts))
}

pub async fn transition(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<TransitionRequest>,
) -> Result<Json<PaymentConcept>> {
    let requested =
        crate::repository::payment_concept_repository::parse_concept_status(&request.status)
            .map_err(|_| {
                AppError::Validation(format!("invalid concept status: {}", request.status))
            })?;
    let concept = state
        .service_context
        .concept_service
        .transition(id, requested)
        .await?;
    Ok(Json(concept))
}
