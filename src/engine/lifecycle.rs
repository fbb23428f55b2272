//! Parcel lifecycle rules.
//!
//! ```text
//! Booked -> Assigned -> Picked Up -> In Transit -> Delivered
//!    \__________\___________\____________\______-> Failed
//! ```
//!
//! `Booked -> Assigned` only happens as a side effect of an admin assigning
//! an agent. `Delivered` and `Failed` are terminal.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::parcel::{
    AdminParcelUpdate, AgentParcelUpdate, Parcel, ParcelStatus, PaymentType,
};

/// Checks a status change requested by the parcel's agent.
pub fn check_agent_transition(from: ParcelStatus, to: ParcelStatus) -> Result<(), AppError> {
    use ParcelStatus::*;

    if from.is_terminal() {
        return Err(closed(from));
    }

    let allowed = match (from, to) {
        (Assigned, PickedUp) | (PickedUp, InTransit) => true,
        (_, Delivered) | (_, Failed) => true,
        _ => false,
    };

    if allowed {
        Ok(())
    } else {
        Err(AppError::field(
            "status",
            format!("cannot move a parcel from {from} to {to}"),
        ))
    }
}

/// `codAmount > 0` exactly when payment is collected on delivery.
pub fn check_payment(payment_type: PaymentType, cod_amount: f64) -> Result<(), AppError> {
    if !cod_amount.is_finite() || cod_amount < 0.0 {
        return Err(AppError::field("codAmount", "COD amount cannot be negative"));
    }
    match payment_type {
        PaymentType::Cod if cod_amount <= 0.0 => Err(AppError::field(
            "codAmount",
            "A valid COD amount is required for COD payments.",
        )),
        PaymentType::Prepaid if cod_amount > 0.0 => Err(AppError::field(
            "codAmount",
            "COD amount should not be set for prepaid orders.",
        )),
        _ => Ok(()),
    }
}

pub fn apply_agent_update(
    parcel: &mut Parcel,
    agent_id: Uuid,
    update: &AgentParcelUpdate,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    if parcel.assigned_agent != Some(agent_id) {
        return Err(AppError::Authorization(
            "Only the assigned agent can update this parcel".to_string(),
        ));
    }

    check_agent_transition(parcel.status, update.status)?;

    parcel.status = update.status;
    parcel.updated_at = now;
    Ok(())
}

pub fn apply_admin_update(
    parcel: &mut Parcel,
    update: &AdminParcelUpdate,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    let AdminParcelUpdate {
        assigned_agent,
        pickup_address,
        delivery_address,
        delivery_coordinates,
        receiver_name,
        receiver_number,
        parcel_type,
        parcel_size,
        payment_type,
        cod_amount,
        status,
        qr_code,
    } = update.clone();

    if let Some(value) = pickup_address {
        parcel.pickup_address = value.trim().to_string();
    }
    if let Some(value) = delivery_address {
        parcel.delivery_address = value.trim().to_string();
    }
    if let Some(value) = delivery_coordinates {
        parcel.delivery_coordinates = Some(value);
    }
    if let Some(value) = receiver_name {
        parcel.receiver_name = value.trim().to_string();
    }
    if let Some(value) = receiver_number {
        parcel.receiver_number = value.trim().to_string();
    }
    if let Some(value) = parcel_type {
        parcel.parcel_type = value.trim().to_string();
    }
    if let Some(value) = parcel_size {
        parcel.parcel_size = value;
    }
    if let Some(value) = payment_type {
        parcel.payment_type = value;
    }
    if let Some(value) = cod_amount {
        parcel.cod_amount = value;
    }
    if payment_type.is_some() || cod_amount.is_some() {
        check_payment(parcel.payment_type, parcel.cod_amount)?;
    }
    if let Some(value) = qr_code {
        parcel.qr_code = (!value.is_empty()).then_some(value);
    }

    if let Some(agent) = assigned_agent {
        if parcel.status.is_terminal() {
            return Err(closed(parcel.status));
        }
        parcel.assigned_agent = Some(agent);
        if parcel.status == ParcelStatus::Booked && status.is_none() {
            parcel.status = ParcelStatus::Assigned;
        }
    }

    if let Some(target) = status {
        set_status_as_admin(parcel, target)?;
    }

    parcel.updated_at = now;
    Ok(())
}

fn set_status_as_admin(parcel: &mut Parcel, target: ParcelStatus) -> Result<(), AppError> {
    if target == parcel.status {
        return Ok(());
    }
    if parcel.status.is_terminal() {
        return Err(closed(parcel.status));
    }
    if target == ParcelStatus::Booked {
        return Err(AppError::field(
            "status",
            "a parcel cannot be moved back to Booked",
        ));
    }
    if target.is_active() && parcel.assigned_agent.is_none() {
        return Err(AppError::field(
            "status",
            format!("{target} requires an assigned agent"),
        ));
    }
    parcel.status = target;
    Ok(())
}

fn closed(status: ParcelStatus) -> AppError {
    AppError::field(
        "status",
        format!("parcel is already {status}; no further status changes are accepted"),
    )
}
