use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::rest::extract::AuthUser;
use crate::engine::aggregator::{self, PositionPing};
use crate::engine::tracking::{self, LiveParcel, TrackingInfo};
use crate::error::AppError;
use crate::models::tracking::GeoPoint;
use crate::models::user::Role;
use crate::realtime::RealtimeEvent;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/track", post(report_location))
        .route("/track/live", get(live_tracking))
        .route("/track/:parcel_code", get(tracking_info))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationPayload {
    /// Parcel the client was viewing when it sent the ping. Only used to
    /// emit the single-parcel event for older map clients.
    pub parcel_id: Option<String>,
    pub coordinates: GeoPoint,
    pub recorded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationResponse {
    pub message: String,
    pub updated_count: usize,
    pub updated_parcels: Vec<String>,
}

async fn report_location(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(payload): Json<LocationPayload>,
) -> Result<(StatusCode, Json<LocationResponse>), AppError> {
    auth.require(&[Role::Agent])?;

    let ping = PositionPing {
        coordinates: payload.coordinates,
        recorded_at: payload.recorded_at,
    };
    let report = aggregator::report_position(&state, auth.user_id(), ping).await?;

    if let Some(parcel_id) = payload.parcel_id {
        if report.updated_parcel_ids.contains(&parcel_id) {
            state.dispatcher.broadcast(RealtimeEvent::TrackingUpdated {
                parcel_id,
                coordinates: payload.coordinates,
            });
        }
    }

    let message = if report.updated_count == 0 {
        "No active parcels to update".to_string()
    } else {
        format!("Location updated for {} parcel(s)", report.updated_count)
    };

    Ok((
        StatusCode::CREATED,
        Json(LocationResponse {
            message,
            updated_count: report.updated_count,
            updated_parcels: report.updated_parcel_ids,
        }),
    ))
}

async fn live_tracking(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<Vec<LiveParcel>>, AppError> {
    auth.require(&[Role::Admin])?;
    Ok(Json(tracking::live_tracking_data(&state).await?))
}

async fn tracking_info(
    State(state): State<Arc<AppState>>,
    Path(parcel_code): Path<String>,
) -> Result<Json<TrackingInfo>, AppError> {
    Ok(Json(tracking::tracking_info(&state, &parcel_code).await?))
}
