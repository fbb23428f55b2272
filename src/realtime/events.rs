use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::parcel::Parcel;
use crate::models::tracking::GeoPoint;
use crate::models::user::User;

/// Server to client frames, serialized as `{"event": "...", "data": {...}}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum RealtimeEvent {
    /// Single-parcel position update kept for older map clients.
    #[serde(rename = "tracking:updated", rename_all = "camelCase")]
    TrackingUpdated {
        parcel_id: String,
        coordinates: GeoPoint,
    },

    #[serde(rename = "bulk-tracking:updated", rename_all = "camelCase")]
    BulkTrackingUpdated {
        agent_id: Uuid,
        coordinates: GeoPoint,
        updated_parcels: Vec<String>,
    },

    #[serde(rename = "parcel:updated")]
    ParcelUpdated(Parcel),

    #[serde(rename = "user:status-updated")]
    UserStatusUpdated(User),
}

impl RealtimeEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RealtimeEvent::TrackingUpdated { .. } => "tracking:updated",
            RealtimeEvent::BulkTrackingUpdated { .. } => "bulk-tracking:updated",
            RealtimeEvent::ParcelUpdated(_) => "parcel:updated",
            RealtimeEvent::UserStatusUpdated(_) => "user:status-updated",
        }
    }
}

/// Client to server frames.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    RegisterUser { user_id: Uuid },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bulk_update_wire_shape() {
        let event = RealtimeEvent::BulkTrackingUpdated {
            agent_id: Uuid::nil(),
            coordinates: GeoPoint { lat: 23.8, lng: 90.4 },
            updated_parcels: vec!["BR001-240101-ABC-D".to_string()],
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "bulk-tracking:updated");
        assert_eq!(value["data"]["agentId"], Uuid::nil().to_string());
        assert_eq!(value["data"]["coordinates"]["lat"], 23.8);
        assert_eq!(value["data"]["updatedParcels"][0], "BR001-240101-ABC-D");
        assert_eq!(event.name(), "bulk-tracking:updated");
    }

    #[test]
    fn parses_register_message() {
        let id = Uuid::from_u128(42);
        let raw = format!(r#"{{"event":"registerUser","userId":"{id}"}}"#);
        let msg: ClientMessage = serde_json::from_str(&raw).unwrap();
        assert_eq!(msg, ClientMessage::RegisterUser { user_id: id });
    }
}
