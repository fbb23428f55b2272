use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::tracking::GeoPoint;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ParcelStatus {
    Booked,
    Assigned,
    #[serde(rename = "Picked Up", alias = "PickedUp")]
    PickedUp,
    #[serde(rename = "In Transit", alias = "InTransit")]
    InTransit,
    Delivered,
    Failed,
}

impl ParcelStatus {
    pub const ALL: [ParcelStatus; 6] = [
        ParcelStatus::Booked,
        ParcelStatus::Assigned,
        ParcelStatus::PickedUp,
        ParcelStatus::InTransit,
        ParcelStatus::Delivered,
        ParcelStatus::Failed,
    ];

    /// Statuses in which the assigned agent is carrying, or about to carry,
    /// the parcel and should be feeding positions for it.
    pub const ACTIVE: [ParcelStatus; 3] = [
        ParcelStatus::Assigned,
        ParcelStatus::PickedUp,
        ParcelStatus::InTransit,
    ];

    /// Statuses shown on the live map.
    pub const LIVE: [ParcelStatus; 2] = [ParcelStatus::PickedUp, ParcelStatus::InTransit];

    pub fn is_terminal(self) -> bool {
        matches!(self, ParcelStatus::Delivered | ParcelStatus::Failed)
    }

    pub fn is_active(self) -> bool {
        Self::ACTIVE.contains(&self)
    }

    pub fn label(self) -> &'static str {
        match self {
            ParcelStatus::Booked => "Booked",
            ParcelStatus::Assigned => "Assigned",
            ParcelStatus::PickedUp => "Picked Up",
            ParcelStatus::InTransit => "In Transit",
            ParcelStatus::Delivered => "Delivered",
            ParcelStatus::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for ParcelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParcelSize {
    Small,
    Medium,
    Large,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PaymentType {
    #[serde(rename = "COD")]
    Cod,
    #[serde(rename = "prepaid")]
    Prepaid,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Parcel {
    pub parcel_code: String,
    pub sender: Uuid,
    pub assigned_agent: Option<Uuid>,
    pub pickup_address: String,
    pub delivery_address: String,
    pub delivery_coordinates: Option<GeoPoint>,
    pub receiver_name: String,
    pub receiver_number: String,
    pub parcel_type: String,
    pub parcel_size: ParcelSize,
    pub payment_type: PaymentType,
    pub cod_amount: f64,
    pub status: ParcelStatus,
    pub qr_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Booking request body.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewParcel {
    #[validate(length(min = 1, max = 200, message = "pickup address is required"))]
    pub pickup_address: String,
    #[validate(length(min = 1, max = 200, message = "delivery address is required"))]
    pub delivery_address: String,
    #[validate(nested)]
    pub delivery_coordinates: Option<GeoPoint>,
    #[validate(length(min = 2, max = 50, message = "receiver name must be 2-50 characters"))]
    pub receiver_name: String,
    #[validate(length(min = 8, max = 20, message = "phone number must be at least 8 digits"))]
    pub receiver_number: String,
    #[validate(length(min = 1, max = 50, message = "parcel type is required"))]
    pub parcel_type: String,
    pub parcel_size: ParcelSize,
    pub payment_type: PaymentType,
    #[serde(default)]
    pub cod_amount: f64,
    pub qr_code: Option<String>,
}

/// Fields an admin may change on a parcel. Anything not named here is
/// rejected when the body is parsed.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AdminParcelUpdate {
    pub assigned_agent: Option<Uuid>,
    #[validate(length(min = 1, message = "pickup address cannot be empty"))]
    pub pickup_address: Option<String>,
    #[validate(length(min = 1, message = "delivery address cannot be empty"))]
    pub delivery_address: Option<String>,
    #[validate(nested)]
    pub delivery_coordinates: Option<GeoPoint>,
    #[validate(length(min = 1, message = "receiver name cannot be empty"))]
    pub receiver_name: Option<String>,
    #[validate(length(min = 8, message = "phone number must be at least 8 digits"))]
    pub receiver_number: Option<String>,
    #[validate(length(min = 1, message = "parcel type cannot be empty"))]
    pub parcel_type: Option<String>,
    pub parcel_size: Option<ParcelSize>,
    pub payment_type: Option<PaymentType>,
    #[validate(range(min = 0.0, message = "COD amount cannot be negative"))]
    pub cod_amount: Option<f64>,
    pub status: Option<ParcelStatus>,
    /// An empty string clears the stored code.
    pub qr_code: Option<String>,
}

/// The only change an agent can make: move the parcel along its lifecycle,
/// optionally reporting where it happened.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AgentParcelUpdate {
    pub status: ParcelStatus,
    #[validate(nested)]
    pub coordinates: Option<GeoPoint>,
}

#[derive(Debug, Clone)]
pub enum ParcelUpdate {
    Admin(AdminParcelUpdate),
    Agent(AgentParcelUpdate),
}

/// Selects which parcels a listing returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParcelFilter {
    All,
    SentBy(Uuid),
    AssignedTo(Uuid),
}

impl ParcelFilter {
    pub fn matches(&self, parcel: &Parcel) -> bool {
        match self {
            ParcelFilter::All => true,
            ParcelFilter::SentBy(sender) => parcel.sender == *sender,
            ParcelFilter::AssignedTo(agent) => parcel.assigned_agent == Some(*agent),
        }
    }
}
