//! Turns one agent location ping into position updates for every parcel the
//! agent is currently carrying.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::geo::check_coordinates;
use crate::models::tracking::{GeoPoint, TrackPoint, UpsertOutcome};
use crate::realtime::RealtimeEvent;
use crate::state::AppState;
use crate::store::bounded;

#[derive(Debug, Clone, Copy)]
pub struct PositionPing {
    pub coordinates: GeoPoint,
    /// When the device took the fix. Server receipt time is used when absent.
    pub recorded_at: Option<DateTime<Utc>>,
}

impl PositionPing {
    pub fn now(coordinates: GeoPoint) -> Self {
        Self {
            coordinates,
            recorded_at: None,
        }
    }

    /// Logical timestamp for ordering, capped at receipt time.
    fn timestamp(&self, received_at: DateTime<Utc>) -> DateTime<Utc> {
        self.recorded_at
            .map_or(received_at, |recorded| recorded.min(received_at))
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PositionReport {
    pub updated_count: usize,
    pub updated_parcel_ids: Vec<String>,
}

pub async fn report_position(
    state: &AppState,
    agent_id: Uuid,
    ping: PositionPing,
) -> Result<PositionReport, AppError> {
    check_coordinates(&ping.coordinates)?;

    let active = bounded(
        state.storage_timeout(),
        "active parcel lookup",
        state.parcels.find_active_for_agent(agent_id),
    )
    .await
    .inspect_err(|_| {
        state
            .metrics
            .position_pings_total
            .with_label_values(&["error"])
            .inc();
    })?;

    if active.is_empty() {
        info!(agent_id = %agent_id, "position ping with no active parcels");
        state
            .metrics
            .ping_fanout_parcels
            .with_label_values(&["idle"])
            .observe(0.0);
        state
            .metrics
            .position_pings_total
            .with_label_values(&["idle"])
            .inc();
        return Ok(PositionReport::default());
    }

    let point = TrackPoint::new(ping.coordinates, ping.timestamp(Utc::now()));

    // All upserts for one ping start together; none waits on another parcel.
    let results = join_all(
        active
            .iter()
            .map(|parcel_code| record_point(state, parcel_code, point)),
    )
    .await;

    let attempted = active.len();
    let mut updated = Vec::with_capacity(attempted);

    for (parcel_code, result) in active.into_iter().zip(results) {
        match result {
            Ok(outcome) => {
                state
                    .metrics
                    .tracking_upserts_total
                    .with_label_values(&[outcome_label(outcome)])
                    .inc();
                updated.push(parcel_code);
            }
            Err(err) => {
                state
                    .metrics
                    .tracking_upserts_total
                    .with_label_values(&["error"])
                    .inc();
                warn!(
                    agent_id = %agent_id,
                    parcel_code = %parcel_code,
                    error = %err,
                    "failed to record position for parcel"
                );
            }
        }
    }

    state
        .metrics
        .ping_fanout_parcels
        .with_label_values(&["carrying"])
        .observe(attempted as f64);

    if updated.is_empty() {
        state
            .metrics
            .position_pings_total
            .with_label_values(&["error"])
            .inc();
        return Err(AppError::Database(format!(
            "failed to record position for any of {attempted} active parcels of agent {agent_id}"
        )));
    }

    if updated.len() < attempted {
        warn!(
            agent_id = %agent_id,
            attempted,
            updated = updated.len(),
            "position recorded for a subset of active parcels"
        );
        state
            .metrics
            .position_pings_total
            .with_label_values(&["partial"])
            .inc();
    } else {
        state
            .metrics
            .position_pings_total
            .with_label_values(&["success"])
            .inc();
    }

    state.dispatcher.broadcast(RealtimeEvent::BulkTrackingUpdated {
        agent_id,
        coordinates: ping.coordinates,
        updated_parcels: updated.clone(),
    });

    info!(
        agent_id = %agent_id,
        parcels = updated.len(),
        lat = ping.coordinates.lat,
        lng = ping.coordinates.lng,
        "position recorded"
    );

    Ok(PositionReport {
        updated_count: updated.len(),
        updated_parcel_ids: updated,
    })
}

/// Latest point first, then the trail. Both are keyed by the point's own
/// timestamp, so replays and late arrivals settle to the same state.
async fn record_point(
    state: &AppState,
    parcel_code: &str,
    point: TrackPoint,
) -> Result<UpsertOutcome, AppError> {
    let timeout = state.storage_timeout();
    let outcome = bounded(
        timeout,
        "current position upsert",
        state.tracking.upsert_current(parcel_code, point),
    )
    .await?;
    bounded(
        timeout,
        "history append",
        state.tracking.append_history(parcel_code, point),
    )
    .await?;
    Ok(outcome)
}

fn outcome_label(outcome: UpsertOutcome) -> &'static str {
    match outcome {
        UpsertOutcome::Created => "created",
        UpsertOutcome::Replaced => "replaced",
        UpsertOutcome::Unchanged => "unchanged",
        UpsertOutcome::Stale => "stale",
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::Duration;

    use super::*;
    use crate::config::Config;
    use crate::models::parcel::{Parcel, ParcelSize, ParcelStatus, PaymentType};
    use crate::models::tracking::TrackHistory;
    use crate::realtime::Envelope;
    use crate::store::memory::{MemoryParcelRegistry, MemoryTrackingStore, MemoryUserStore};
    use crate::store::TrackingStore;

    const AGENT: Uuid = Uuid::from_u128(0xA1);

    fn dhaka() -> GeoPoint {
        GeoPoint { lat: 23.8, lng: 90.4 }
    }

    fn parcel(code: &str, agent: Option<Uuid>, status: ParcelStatus) -> Parcel {
        let now = Utc::now();
        Parcel {
            parcel_code: code.to_string(),
            sender: Uuid::from_u128(1),
            assigned_agent: agent,
            pickup_address: "BR001 Mirpur".to_string(),
            delivery_address: "Dhanmondi 27".to_string(),
            delivery_coordinates: None,
            receiver_name: "Rahim".to_string(),
            receiver_number: "01700000000".to_string(),
            parcel_type: "box".to_string(),
            parcel_size: ParcelSize::Small,
            payment_type: PaymentType::Prepaid,
            cod_amount: 0.0,
            status,
            qr_code: None,
            created_at: now,
            updated_at: now,
        }
    }

    async fn seed(state: &AppState, parcels: Vec<Parcel>) {
        for p in parcels {
            state.parcels.insert(p).await.unwrap();
        }
    }

    /// Wraps the in-memory store and refuses writes for one parcel code.
    struct FlakyTracking {
        inner: MemoryTrackingStore,
        broken: Vec<String>,
    }

    #[async_trait]
    impl TrackingStore for FlakyTracking {
        async fn upsert_current(
            &self,
            parcel_code: &str,
            point: TrackPoint,
        ) -> Result<UpsertOutcome, AppError> {
            if self.broken.iter().any(|code| code == parcel_code) {
                return Err(AppError::Database("write refused".to_string()));
            }
            self.inner.upsert_current(parcel_code, point).await
        }

        async fn append_history(
            &self,
            parcel_code: &str,
            point: TrackPoint,
        ) -> Result<(), AppError> {
            self.inner.append_history(parcel_code, point).await
        }

        async fn history(&self, parcel_code: &str) -> Result<TrackHistory, AppError> {
            self.inner.history(parcel_code).await
        }

        async fn latest(&self, parcel_code: &str) -> Result<Option<TrackPoint>, AppError> {
            self.inner.latest(parcel_code).await
        }
    }

    fn flaky_state(broken: &[&str]) -> AppState {
        AppState::with_stores(
            Config::for_tests(),
            Arc::new(MemoryParcelRegistry::new()),
            Arc::new(FlakyTracking {
                inner: MemoryTrackingStore::new(),
                broken: broken.iter().map(|s| s.to_string()).collect(),
            }),
            Arc::new(MemoryUserStore::new()),
        )
    }

    #[tokio::test]
    async fn fans_out_to_every_active_parcel() {
        let state = AppState::new(Config::for_tests());
        seed(
            &state,
            vec![
                parcel("P1", Some(AGENT), ParcelStatus::Assigned),
                parcel("P2", Some(AGENT), ParcelStatus::PickedUp),
                parcel("P3", Some(AGENT), ParcelStatus::InTransit),
            ],
        )
        .await;
        let mut events = state.dispatcher.subscribe();

        let report = report_position(&state, AGENT, PositionPing::now(dhaka()))
            .await
            .unwrap();

        assert_eq!(report.updated_count, 3);
        assert_eq!(report.updated_parcel_ids, vec!["P1", "P2", "P3"]);
        for code in ["P1", "P2", "P3"] {
            let latest = state.tracking.latest(code).await.unwrap().unwrap();
            assert_eq!(latest.coordinates, dhaka());
        }

        let Envelope { target, event } = events.recv().await.unwrap();
        assert!(target.is_none());
        match event {
            RealtimeEvent::BulkTrackingUpdated {
                agent_id,
                updated_parcels,
                ..
            } => {
                assert_eq!(agent_id, AGENT);
                assert_eq!(updated_parcels.len(), 3);
            }
            other => panic!("unexpected event {}", other.name()),
        }
        assert!(events.try_recv().is_err(), "one event per ping");
    }

    #[tokio::test]
    async fn idle_agent_changes_nothing() {
        let state = AppState::new(Config::for_tests());
        seed(
            &state,
            vec![
                parcel("DONE", Some(AGENT), ParcelStatus::Delivered),
                parcel("LOST", Some(AGENT), ParcelStatus::Failed),
                parcel("NEW", None, ParcelStatus::Booked),
            ],
        )
        .await;
        let mut events = state.dispatcher.subscribe();

        let report = report_position(&state, AGENT, PositionPing::now(dhaka()))
            .await
            .unwrap();

        assert_eq!(report, PositionReport::default());
        for code in ["DONE", "LOST", "NEW"] {
            assert!(state.tracking.latest(code).await.unwrap().is_none());
            assert!(state.tracking.history(code).await.unwrap().is_empty());
        }
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn identical_ping_is_idempotent() {
        let state = AppState::new(Config::for_tests());
        seed(&state, vec![parcel("P1", Some(AGENT), ParcelStatus::InTransit)]).await;

        let ping = PositionPing {
            coordinates: dhaka(),
            recorded_at: Some(Utc::now() - Duration::seconds(5)),
        };
        report_position(&state, AGENT, ping).await.unwrap();
        let latest_once = state.tracking.latest("P1").await.unwrap();
        let history_once = state.tracking.history("P1").await.unwrap();

        report_position(&state, AGENT, ping).await.unwrap();
        assert_eq!(state.tracking.latest("P1").await.unwrap(), latest_once);
        assert_eq!(state.tracking.history("P1").await.unwrap(), history_once);
        assert_eq!(history_once.len(), 1);
    }

    #[tokio::test]
    async fn late_ping_does_not_overwrite_newer_position() {
        let state = AppState::new(Config::for_tests());
        seed(&state, vec![parcel("P1", Some(AGENT), ParcelStatus::InTransit)]).await;

        let now = Utc::now();
        let newer = PositionPing {
            coordinates: GeoPoint { lat: 23.81, lng: 90.41 },
            recorded_at: Some(now - Duration::seconds(1)),
        };
        let older = PositionPing {
            coordinates: GeoPoint { lat: 23.70, lng: 90.30 },
            recorded_at: Some(now - Duration::seconds(30)),
        };

        report_position(&state, AGENT, newer).await.unwrap();
        let report = report_position(&state, AGENT, older).await.unwrap();
        assert_eq!(report.updated_count, 1);

        let latest = state.tracking.latest("P1").await.unwrap().unwrap();
        assert_eq!(latest.coordinates, newer.coordinates);

        let history = state.tracking.history("P1").await.unwrap();
        let lats: Vec<f64> = history.iter().map(|p| p.coordinates.lat).collect();
        assert_eq!(lats, vec![23.70, 23.81]);
    }

    #[tokio::test]
    async fn future_device_time_is_capped() {
        let state = AppState::new(Config::for_tests());
        seed(&state, vec![parcel("P1", Some(AGENT), ParcelStatus::InTransit)]).await;

        let ping = PositionPing {
            coordinates: dhaka(),
            recorded_at: Some(Utc::now() + Duration::hours(3)),
        };
        report_position(&state, AGENT, ping).await.unwrap();

        let latest = state.tracking.latest("P1").await.unwrap().unwrap();
        assert!(latest.timestamp <= Utc::now());
    }

    #[tokio::test]
    async fn invalid_coordinates_are_rejected_before_any_write() {
        let state = AppState::new(Config::for_tests());
        seed(&state, vec![parcel("P1", Some(AGENT), ParcelStatus::InTransit)]).await;

        let err = report_position(&state, AGENT, PositionPing::now(GeoPoint { lat: 95.0, lng: 0.0 }))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(state.tracking.latest("P1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn partial_failure_still_updates_the_rest() {
        let state = flaky_state(&["P2"]);
        seed(
            &state,
            vec![
                parcel("P1", Some(AGENT), ParcelStatus::PickedUp),
                parcel("P2", Some(AGENT), ParcelStatus::PickedUp),
            ],
        )
        .await;

        let report = report_position(&state, AGENT, PositionPing::now(dhaka()))
            .await
            .unwrap();

        assert_eq!(report.updated_parcel_ids, vec!["P1"]);
        assert!(state.tracking.latest("P1").await.unwrap().is_some());
        assert!(state.tracking.latest("P2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn total_failure_is_a_database_error() {
        let state = flaky_state(&["P1"]);
        seed(&state, vec![parcel("P1", Some(AGENT), ParcelStatus::PickedUp)]).await;

        let err = report_position(&state, AGENT, PositionPing::now(dhaka()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Database(_)));
    }
}
