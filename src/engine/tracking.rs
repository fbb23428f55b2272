//! Public tracking lookups and the admin live map.

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde::Serialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::geo::haversine_km;
use crate::models::parcel::{Parcel, ParcelStatus};
use crate::models::tracking::{GeoPoint, TrackPoint};
use crate::models::user::AgentContact;
use crate::state::AppState;
use crate::store::bounded;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingInfo {
    pub parcel_code: String,
    pub status: ParcelStatus,
    pub assigned_agent: Option<AgentContact>,
    pub pickup_address: String,
    pub delivery_address: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Ascending by timestamp.
    pub tracking_history: Vec<TrackPoint>,
}

/// One row of the live map.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveParcel {
    pub parcel_code: String,
    pub status: ParcelStatus,
    pub assigned_agent: Option<AgentContact>,
    pub delivery_address: String,
    pub coordinates: GeoPoint,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_to_delivery_km: Option<f64>,
}

pub async fn tracking_info(state: &AppState, parcel_code: &str) -> Result<TrackingInfo, AppError> {
    let parcel_code = parcel_code.trim();
    if parcel_code.is_empty() {
        return Err(AppError::field("parcelCode", "parcel code is required"));
    }

    let timeout = state.storage_timeout();
    let parcel = bounded(timeout, "parcel lookup", state.parcels.find_by_code(parcel_code))
        .await?
        .ok_or_else(|| AppError::NotFound("Parcel not found".to_string()))?;

    let (agent, history) = tokio::try_join!(
        agent_contact(state, parcel.assigned_agent),
        bounded(timeout, "history read", state.tracking.history(parcel_code)),
    )?;

    Ok(TrackingInfo {
        parcel_code: parcel.parcel_code,
        status: parcel.status,
        assigned_agent: agent,
        pickup_address: parcel.pickup_address,
        delivery_address: parcel.delivery_address,
        created_at: parcel.created_at,
        updated_at: parcel.updated_at,
        tracking_history: history.into_vec(),
    })
}

/// Parcels currently moving, each joined with its latest position. Parcels
/// that have not reported a position yet are left out.
pub async fn live_tracking_data(state: &AppState) -> Result<Vec<LiveParcel>, AppError> {
    let timeout = state.storage_timeout();
    let parcels = bounded(
        timeout,
        "live parcel lookup",
        state.parcels.find_by_status(&ParcelStatus::LIVE),
    )
    .await?;

    let rows = try_join_all(parcels.into_iter().map(|parcel| live_row(state, parcel))).await?;

    Ok(rows.into_iter().flatten().collect())
}

async fn live_row(state: &AppState, parcel: Parcel) -> Result<Option<LiveParcel>, AppError> {
    let timeout = state.storage_timeout();
    let (latest, agent) = tokio::try_join!(
        bounded(timeout, "latest position read", state.tracking.latest(&parcel.parcel_code)),
        agent_contact(state, parcel.assigned_agent),
    )?;

    let Some(point) = latest else {
        return Ok(None);
    };

    let distance = parcel
        .delivery_coordinates
        .map(|destination| round_km(haversine_km(&point.coordinates, &destination)));

    Ok(Some(LiveParcel {
        parcel_code: parcel.parcel_code,
        status: parcel.status,
        assigned_agent: agent,
        delivery_address: parcel.delivery_address,
        coordinates: point.coordinates,
        timestamp: point.timestamp,
        distance_to_delivery_km: distance,
    }))
}

async fn agent_contact(
    state: &AppState,
    agent_id: Option<Uuid>,
) -> Result<Option<AgentContact>, AppError> {
    let Some(agent_id) = agent_id else {
        return Ok(None);
    };
    let agent = bounded(
        state.storage_timeout(),
        "agent lookup",
        state.users.find_by_id(agent_id),
    )
    .await?;
    Ok(agent.map(|user| user.contact()))
}

fn round_km(km: f64) -> f64 {
    (km * 100.0).round() / 100.0
}
