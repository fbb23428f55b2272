//! Process-local document store backed by `DashMap`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::parcel::{Parcel, ParcelFilter, ParcelStatus};
use crate::models::tracking::{GeoPoint, TrackHistory, TrackPoint, UpsertOutcome};
use crate::models::user::{Role, User};
use crate::store::{ParcelChange, ParcelMutation, ParcelRegistry, TrackingStore, UserStore};

#[derive(Default)]
pub struct MemoryParcelRegistry {
    parcels: DashMap<String, Parcel>,
}

impl MemoryParcelRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first(mut parcels: Vec<Parcel>) -> Vec<Parcel> {
    parcels.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.parcel_code.cmp(&a.parcel_code))
    });
    parcels
}

#[async_trait]
impl ParcelRegistry for MemoryParcelRegistry {
    async fn insert(&self, parcel: Parcel) -> Result<Parcel, AppError> {
        match self.parcels.entry(parcel.parcel_code.clone()) {
            Entry::Occupied(_) => Err(AppError::Conflict(format!(
                "parcel {} already exists",
                parcel.parcel_code
            ))),
            Entry::Vacant(slot) => {
                slot.insert(parcel.clone());
                Ok(parcel)
            }
        }
    }

    async fn find_by_code(&self, parcel_code: &str) -> Result<Option<Parcel>, AppError> {
        Ok(self.parcels.get(parcel_code).map(|entry| entry.value().clone()))
    }

    async fn find_active_for_agent(&self, agent_id: Uuid) -> Result<Vec<String>, AppError> {
        let mut codes: Vec<String> = self
            .parcels
            .iter()
            .filter(|entry| {
                let parcel = entry.value();
                parcel.assigned_agent == Some(agent_id) && parcel.status.is_active()
            })
            .map(|entry| entry.key().clone())
            .collect();
        codes.sort();
        Ok(codes)
    }

    async fn find_by_status(&self, statuses: &[ParcelStatus]) -> Result<Vec<Parcel>, AppError> {
        let parcels = self
            .parcels
            .iter()
            .filter(|entry| statuses.contains(&entry.value().status))
            .map(|entry| entry.value().clone())
            .collect();
        Ok(newest_first(parcels))
    }

    async fn list(&self, filter: ParcelFilter) -> Result<Vec<Parcel>, AppError> {
        let parcels = self
            .parcels
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        Ok(newest_first(parcels))
    }

    async fn update(
        &self,
        parcel_code: &str,
        mutation: ParcelMutation,
    ) -> Result<Option<ParcelChange>, AppError> {
        let Some(mut stored) = self.parcels.get_mut(parcel_code) else {
            return Ok(None);
        };

        let before = stored.clone();
        let mut draft = before.clone();
        mutation(&mut draft)?;
        *stored = draft.clone();

        Ok(Some(ParcelChange {
            before,
            after: draft,
        }))
    }
}

#[derive(Default)]
pub struct MemoryTrackingStore {
    current: DashMap<String, TrackPoint>,
    history: DashMap<String, BTreeMap<DateTime<Utc>, GeoPoint>>,
}

impl MemoryTrackingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TrackingStore for MemoryTrackingStore {
    async fn upsert_current(
        &self,
        parcel_code: &str,
        point: TrackPoint,
    ) -> Result<UpsertOutcome, AppError> {
        let outcome = match self.current.entry(parcel_code.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(point);
                UpsertOutcome::Created
            }
            Entry::Occupied(mut slot) => {
                let stored = *slot.get();
                if point.timestamp < stored.timestamp {
                    UpsertOutcome::Stale
                } else if point == stored {
                    UpsertOutcome::Unchanged
                } else {
                    slot.insert(point);
                    UpsertOutcome::Replaced
                }
            }
        };
        Ok(outcome)
    }

    async fn append_history(&self, parcel_code: &str, point: TrackPoint) -> Result<(), AppError> {
        self.history
            .entry(parcel_code.to_string())
            .or_default()
            .insert(point.timestamp, point.coordinates);
        Ok(())
    }

    async fn history(&self, parcel_code: &str) -> Result<TrackHistory, AppError> {
        let points = self
            .history
            .get(parcel_code)
            .map(|trail| {
                trail
                    .iter()
                    .map(|(timestamp, coordinates)| TrackPoint::new(*coordinates, *timestamp))
                    .collect()
            })
            .unwrap_or_default();
        Ok(TrackHistory::from_sorted(points))
    }

    async fn latest(&self, parcel_code: &str) -> Result<Option<TrackPoint>, AppError> {
        Ok(self.current.get(parcel_code).map(|entry| *entry.value()))
    }
}

#[derive(Default)]
pub struct MemoryUserStore {
    users: DashMap<Uuid, User>,
    emails: DashMap<String, Uuid>,
    phones: DashMap<String, Uuid>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn insert(&self, user: User) -> Result<User, AppError> {
        match self.emails.entry(user.email.clone()) {
            Entry::Occupied(_) => {
                return Err(AppError::Conflict(
                    "User with this email already exists".to_string(),
                ));
            }
            Entry::Vacant(slot) => {
                slot.insert(user.id);
            }
        }

        if let Some(phone) = &user.phone {
            match self.phones.entry(phone.clone()) {
                Entry::Occupied(_) => {
                    self.emails.remove(&user.email);
                    return Err(AppError::Conflict(
                        "User with this phone already exists".to_string(),
                    ));
                }
                Entry::Vacant(slot) => {
                    slot.insert(user.id);
                }
            }
        }

        self.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AppError> {
        Ok(self.users.get(&id).map(|entry| entry.value().clone()))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let Some(id) = self.emails.get(email).map(|entry| *entry.value()) else {
            return Ok(None);
        };
        Ok(self.users.get(&id).map(|entry| entry.value().clone()))
    }

    async fn list(&self, role: Option<Role>) -> Result<Vec<User>, AppError> {
        let mut users: Vec<User> = self
            .users
            .iter()
            .filter(|entry| role.is_none_or(|role| entry.value().role == role))
            .map(|entry| entry.value().clone())
            .collect();
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(users)
    }

    async fn set_active(&self, id: Uuid, is_active: bool) -> Result<Option<User>, AppError> {
        let Some(mut user) = self.users.get_mut(&id) else {
            return Ok(None);
        };
        user.is_active = is_active;
        user.updated_at = Utc::now();
        Ok(Some(user.clone()))
    }
}
