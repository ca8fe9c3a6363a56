//! Request handlers.

use crate::error::ApiError;
use crate::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use serde_json::Value;
use typetree_core::model::record::payload_from_value;
use typetree_core::telemetry::Sample;
use typetree_core::{
    EntityKind, EnumView, InstanceDataRow, Record, RowId, TypeDataRow, ValidationError,
};

fn parse_kind(raw: &str) -> Result<EntityKind, ApiError> {
    Ok(raw.parse::<EntityKind>()?)
}

fn parse_id(raw: &str) -> Result<RowId, ApiError> {
    raw.trim()
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid id `{raw}`")))
}

fn object_body(
    kind: EntityKind,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<typetree_core::Payload, ApiError> {
    let Json(value) = body?;
    Ok(payload_from_value(kind, value)?)
}

/// `POST /tree/{kind}`: returns the new id.
pub async fn create_row(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<RowId>, ApiError> {
    let kind = parse_kind(&kind)?;
    let payload = object_body(kind, body)?;
    let id = state
        .run(move |service| Ok(service.create(kind, &payload)?))
        .await?;
    Ok(Json(id))
}

/// `GET /tree/{kind}`
pub async fn list_rows(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> Result<Json<Vec<Record>>, ApiError> {
    let kind = parse_kind(&kind)?;
    let rows = state
        .run(move |service| Ok(service.get_all(kind)?))
        .await?;
    Ok(Json(rows))
}

/// `DELETE /tree/{kind}`: wipes the kind; returns rows removed.
pub async fn delete_kind(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> Result<Json<u64>, ApiError> {
    let kind = parse_kind(&kind)?;
    let removed = state
        .run(move |service| Ok(service.delete_all(kind)?))
        .await?;
    Ok(Json(removed))
}

/// `GET /tree/{kind}/{id}`
pub async fn get_row(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
) -> Result<Json<Record>, ApiError> {
    let kind = parse_kind(&kind)?;
    let id = parse_id(&id)?;
    let record = state
        .run(move |service| Ok(service.get_by_id(kind, id)?))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("{kind} not found: {id}")))?;
    Ok(Json(record))
}

/// `PATCH /tree/{kind}/{id}`: returns the merged row.
pub async fn patch_row(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Record>, ApiError> {
    let kind = parse_kind(&kind)?;
    let id = parse_id(&id)?;
    let changes = object_body(kind, body)?;
    let record = state
        .run(move |service| Ok(service.patch(kind, id, &changes)?))
        .await?;
    Ok(Json(record))
}

/// `DELETE /tree/{kind}/{id}`: returns rows removed, cascades included.
pub async fn delete_row(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
) -> Result<Json<u64>, ApiError> {
    let kind = parse_kind(&kind)?;
    let id = parse_id(&id)?;
    let removed = state
        .run(move |service| Ok(service.delete_by_id(kind, id)?))
        .await?;
    Ok(Json(removed))
}

/// `GET /enums`
pub async fn list_enums(State(state): State<AppState>) -> Result<Json<Vec<EnumView>>, ApiError> {
    let enums = state.run(|service| Ok(service.list_enums()?)).await?;
    Ok(Json(enums))
}

/// `GET /types/{id}/data`: property definitions of one type.
pub async fn type_data(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<TypeDataRow>>, ApiError> {
    let id = parse_id(&id)?;
    let rows = state
        .run(move |service| {
            service
                .list_attached(EntityKind::TypeData, id)?
                .iter()
                .map(|record| TypeDataRow::try_from(record).map_err(invalid_row))
                .collect::<Result<Vec<_>, _>>()
        })
        .await?;
    Ok(Json(rows))
}

/// `GET /instances/{id}/data`: stored property values of one instance.
pub async fn instance_data(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<InstanceDataRow>>, ApiError> {
    let id = parse_id(&id)?;
    let rows = state
        .run(move |service| {
            service
                .list_attached(EntityKind::InstanceData, id)?
                .iter()
                .map(|record| InstanceDataRow::try_from(record).map_err(invalid_row))
                .collect::<Result<Vec<_>, _>>()
        })
        .await?;
    Ok(Json(rows))
}

/// `GET /telemetry/latest`
pub async fn latest_sample(State(state): State<AppState>) -> Result<Json<Sample>, ApiError> {
    state
        .latest_sample()
        .latest()
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("no telemetry sample received yet".to_string()))
}

// Stored rows that fail typed conversion are a storage fault, not a bad request.
fn invalid_row(err: ValidationError) -> ApiError {
    ApiError::Internal(format!("invalid stored row: {err}"))
}
