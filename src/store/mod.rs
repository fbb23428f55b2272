//! Storage seams for the document store.
//!
//! Each mutating method is a single atomic operation on one record: callers
//! hand over the change and the store applies it under that record's lock,
//! so no task ever reads a document, awaits, and writes it back.

pub mod memory;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::parcel::{Parcel, ParcelFilter, ParcelStatus};
use crate::models::tracking::{TrackHistory, TrackPoint, UpsertOutcome};
use crate::models::user::{Role, User};

/// A change applied to one parcel while its record is locked. Returning an
/// error leaves the stored record untouched.
pub type ParcelMutation = Box<dyn FnOnce(&mut Parcel) -> Result<(), AppError> + Send>;

/// A parcel as it was before and after one atomic update.
#[derive(Debug, Clone)]
pub struct ParcelChange {
    pub before: Parcel,
    pub after: Parcel,
}

impl ParcelChange {
    pub fn status_changed(&self) -> bool {
        self.before.status != self.after.status
    }
}

#[async_trait]
pub trait ParcelRegistry: Send + Sync {
    /// Fails with `Conflict` when the code is already taken.
    async fn insert(&self, parcel: Parcel) -> Result<Parcel, AppError>;

    async fn find_by_code(&self, parcel_code: &str) -> Result<Option<Parcel>, AppError>;

    /// Codes of parcels assigned to `agent_id` whose status is active.
    async fn find_active_for_agent(&self, agent_id: Uuid) -> Result<Vec<String>, AppError>;

    async fn find_by_status(&self, statuses: &[ParcelStatus]) -> Result<Vec<Parcel>, AppError>;

    /// Newest first.
    async fn list(&self, filter: ParcelFilter) -> Result<Vec<Parcel>, AppError>;

    /// Applies `mutation` atomically. `Ok(None)` when the code is unknown.
    async fn update(
        &self,
        parcel_code: &str,
        mutation: ParcelMutation,
    ) -> Result<Option<ParcelChange>, AppError>;
}

#[async_trait]
pub trait TrackingStore: Send + Sync {
    /// Keeps the newest point per parcel; an older point never replaces a
    /// newer one.
    async fn upsert_current(
        &self,
        parcel_code: &str,
        point: TrackPoint,
    ) -> Result<UpsertOutcome, AppError>;

    /// Adds `point` to the trail. A point with an already recorded timestamp
    /// replaces that entry instead of duplicating it.
    async fn append_history(&self, parcel_code: &str, point: TrackPoint) -> Result<(), AppError>;

    async fn history(&self, parcel_code: &str) -> Result<TrackHistory, AppError>;

    async fn latest(&self, parcel_code: &str) -> Result<Option<TrackPoint>, AppError>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Fails with `Conflict` naming the clashing field (email or phone).
    async fn insert(&self, user: User) -> Result<User, AppError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AppError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError>;

    /// Newest first; `None` lists every role.
    async fn list(&self, role: Option<Role>) -> Result<Vec<User>, AppError>;

    async fn set_active(&self, id: Uuid, is_active: bool) -> Result<Option<User>, AppError>;
}

/// Runs one storage call under the configured deadline. An expired call
/// surfaces as the retryable `Timeout` error.
pub async fn bounded<T, F>(limit: Duration, operation: &str, call: F) -> Result<T, AppError>
where
    F: Future<Output = Result<T, AppError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(AppError::Timeout(format!(
            "{operation} did not complete within {}ms, retry the request",
            limit.as_millis()
        ))),
    }
}
