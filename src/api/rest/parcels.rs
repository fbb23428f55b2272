use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::api::rest::extract::AuthUser;
use crate::engine::parcels;
use crate::error::AppError;
use crate::models::parcel::{NewParcel, Parcel};
use crate::models::user::Role;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/parcels", get(list_parcels).post(create_parcel))
        .route(
            "/parcels/:parcel_code",
            get(get_parcel).patch(update_parcel),
        )
}

async fn create_parcel(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(payload): Json<NewParcel>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    auth.require(&[Role::Customer, Role::Admin])?;
    let parcel = parcels::create_parcel(&state, &auth, payload).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Parcel booked successfully",
            "parcel": parcel,
        })),
    ))
}

async fn list_parcels(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<Vec<Parcel>>, AppError> {
    Ok(Json(parcels::list_parcels(&state, &auth).await?))
}

async fn get_parcel(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(parcel_code): Path<String>,
) -> Result<Json<Parcel>, AppError> {
    Ok(Json(parcels::get_parcel(&state, &auth, &parcel_code).await?))
}

/// The body is decoded per caller role, so it is taken as raw JSON here.
async fn update_parcel(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(parcel_code): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, AppError> {
    auth.require(&[Role::Admin, Role::Agent])?;
    let parcel = parcels::update_parcel(&state, &auth, &parcel_code, body).await?;

    Ok(Json(json!({
        "message": "Parcel updated successfully",
        "parcel": parcel,
    })))
}
