//! Booking, listing and updating parcels.

use chrono::Utc;
use serde::de::DeserializeOwned;
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::auth::Claims;
use crate::engine::{lifecycle, parcel_code};
use crate::error::AppError;
use crate::models::parcel::{
    AdminParcelUpdate, AgentParcelUpdate, NewParcel, Parcel, ParcelFilter, ParcelStatus,
    ParcelUpdate,
};
use crate::models::tracking::TrackPoint;
use crate::models::user::Role;
use crate::realtime::RealtimeEvent;
use crate::state::AppState;
use crate::store::{bounded, ParcelMutation};

const CODE_ATTEMPTS: usize = 5;

/// Digits with optional spaces, dashes or parentheses and a leading `+`.
pub(crate) fn check_phone(field: &str, value: &str) -> Result<(), AppError> {
    let body = value.strip_prefix('+').unwrap_or(value);
    let allowed = body
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, ' ' | '-' | '(' | ')'));
    let digits = body.chars().filter(char::is_ascii_digit).count();

    if allowed && digits >= 8 {
        Ok(())
    } else {
        Err(AppError::field(field, "Invalid phone number format"))
    }
}

pub async fn create_parcel(
    state: &AppState,
    sender: &Claims,
    request: NewParcel,
) -> Result<Parcel, AppError> {
    if !matches!(sender.role, Role::Customer | Role::Admin) {
        return Err(AppError::Authorization(
            "Only customers and admins can book parcels".to_string(),
        ));
    }

    request.validate()?;
    check_phone("receiverNumber", request.receiver_number.trim())?;
    lifecycle::check_payment(request.payment_type, request.cod_amount)?;

    let now = Utc::now();
    let branch = parcel_code::branch_code(&request.pickup_address);
    let template = Parcel {
        parcel_code: String::new(),
        sender: sender.user_id(),
        assigned_agent: None,
        pickup_address: request.pickup_address.trim().to_string(),
        delivery_address: request.delivery_address.trim().to_string(),
        delivery_coordinates: request.delivery_coordinates,
        receiver_name: request.receiver_name.trim().to_string(),
        receiver_number: request.receiver_number.trim().to_string(),
        parcel_type: request.parcel_type.trim().to_string(),
        parcel_size: request.parcel_size,
        payment_type: request.payment_type,
        cod_amount: request.cod_amount,
        status: ParcelStatus::Booked,
        qr_code: request.qr_code.filter(|code| !code.is_empty()),
        created_at: now,
        updated_at: now,
    };

    for attempt in 1..=CODE_ATTEMPTS {
        let parcel = Parcel {
            parcel_code: parcel_code::generate(&branch, Utc::now()),
            ..template.clone()
        };
        match bounded(state.storage_timeout(), "parcel insert", state.parcels.insert(parcel)).await {
            Ok(parcel) => {
                info!(
                    parcel_code = %parcel.parcel_code,
                    sender = %parcel.sender,
                    "parcel booked"
                );
                state
                    .metrics
                    .parcel_status_transitions_total
                    .with_label_values(&[parcel.status.label()])
                    .inc();
                return Ok(parcel);
            }
            Err(AppError::Conflict(_)) => {
                warn!(attempt, branch = %branch, "parcel code collision, regenerating");
            }
            Err(err) => return Err(err),
        }
    }

    Err(AppError::Internal(format!(
        "could not allocate a unique parcel code after {CODE_ATTEMPTS} attempts"
    )))
}

pub async fn list_parcels(state: &AppState, caller: &Claims) -> Result<Vec<Parcel>, AppError> {
    let filter = match caller.role {
        Role::Admin => ParcelFilter::All,
        Role::Agent => ParcelFilter::AssignedTo(caller.user_id()),
        Role::Customer => ParcelFilter::SentBy(caller.user_id()),
    };
    bounded(state.storage_timeout(), "parcel listing", state.parcels.list(filter)).await
}

pub async fn get_parcel(
    state: &AppState,
    caller: &Claims,
    parcel_code: &str,
) -> Result<Parcel, AppError> {
    let parcel = bounded(
        state.storage_timeout(),
        "parcel lookup",
        state.parcels.find_by_code(parcel_code),
    )
    .await?
    .ok_or_else(|| AppError::NotFound("Parcel not found".to_string()))?;

    if caller.role == Role::Customer && parcel.sender != caller.user_id() {
        return Err(AppError::Authorization(
            "You can only view your own parcels".to_string(),
        ));
    }
    Ok(parcel)
}

/// Parses a role-specific update from `body` and applies it atomically.
pub async fn update_parcel(
    state: &AppState,
    caller: &Claims,
    parcel_code: &str,
    body: serde_json::Value,
) -> Result<Parcel, AppError> {
    let update = match caller.role {
        Role::Admin => {
            let update: AdminParcelUpdate = parse_body(body)?;
            update.validate()?;
            if let Some(agent_id) = update.assigned_agent {
                ensure_agent(state, agent_id).await?;
            }
            ParcelUpdate::Admin(update)
        }
        Role::Agent => {
            let update: AgentParcelUpdate = parse_body(body)?;
            update.validate()?;
            ParcelUpdate::Agent(update)
        }
        Role::Customer => {
            return Err(AppError::Authorization(
                "Customers cannot modify parcels".to_string(),
            ));
        }
    };

    apply_update(state, caller.user_id(), parcel_code, update).await
}

pub async fn apply_update(
    state: &AppState,
    actor: Uuid,
    parcel_code: &str,
    update: ParcelUpdate,
) -> Result<Parcel, AppError> {
    let now = Utc::now();

    // Position reported together with a pickup becomes the first trail point.
    let pickup_point = match &update {
        ParcelUpdate::Agent(AgentParcelUpdate {
            status: ParcelStatus::PickedUp,
            coordinates: Some(coordinates),
        }) => Some(TrackPoint::new(*coordinates, now)),
        _ => None,
    };

    let mutation: ParcelMutation = match update {
        ParcelUpdate::Admin(update) => Box::new(move |parcel: &mut Parcel| -> Result<(), AppError> {
            lifecycle::apply_admin_update(parcel, &update, now)
        }),
        ParcelUpdate::Agent(update) => Box::new(move |parcel: &mut Parcel| -> Result<(), AppError> {
            lifecycle::apply_agent_update(parcel, actor, &update, now)
        }),
    };

    let change = bounded(
        state.storage_timeout(),
        "parcel update",
        state.parcels.update(parcel_code, mutation),
    )
    .await?
    .ok_or_else(|| AppError::NotFound("Parcel not found".to_string()))?;

    if change.status_changed() {
        state
            .metrics
            .parcel_status_transitions_total
            .with_label_values(&[change.after.status.label()])
            .inc();
        info!(
            parcel_code = %parcel_code,
            actor = %actor,
            from = %change.before.status,
            to = %change.after.status,
            "parcel status changed"
        );
    }

    if let Some(point) = pickup_point {
        seed_trail(state, parcel_code, point).await;
    }

    state
        .dispatcher
        .broadcast(RealtimeEvent::ParcelUpdated(change.after.clone()));

    Ok(change.after)
}

/// The status change is already committed; a failed trail write is logged
/// and the next ping fills the position in.
async fn seed_trail(state: &AppState, parcel_code: &str, point: TrackPoint) {
    let timeout = state.storage_timeout();
    let result = async {
        bounded(timeout, "current position upsert", state.tracking.upsert_current(parcel_code, point))
            .await?;
        bounded(timeout, "history append", state.tracking.append_history(parcel_code, point)).await
    }
    .await;

    if let Err(err) = result {
        warn!(parcel_code = %parcel_code, error = %err, "failed to record pickup position");
    }
}

async fn ensure_agent(state: &AppState, agent_id: Uuid) -> Result<(), AppError> {
    let user = bounded(
        state.storage_timeout(),
        "agent lookup",
        state.users.find_by_id(agent_id),
    )
    .await?;

    match user {
        Some(user) if user.role == Role::Agent => Ok(()),
        Some(_) => Err(AppError::field("assignedAgent", "assigned user is not an agent")),
        None => Err(AppError::NotFound("Agent not found".to_string())),
    }
}

fn parse_body<T: DeserializeOwned>(body: serde_json::Value) -> Result<T, AppError> {
    serde_json::from_value(body).map_err(|err| AppError::field("body", err.to_string()))
}
