use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Validate, PartialEq)]
pub struct GeoPoint {
    #[validate(range(min = -90.0, max = 90.0, message = "latitude must be within [-90, 90]"))]
    pub lat: f64,
    #[validate(range(min = -180.0, max = 180.0, message = "longitude must be within [-180, 180]"))]
    pub lng: f64,
}

/// One recorded position of a parcel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrackPoint {
    pub coordinates: GeoPoint,
    pub timestamp: DateTime<Utc>,
}

impl TrackPoint {
    pub fn new(coordinates: GeoPoint, timestamp: DateTime<Utc>) -> Self {
        Self {
            coordinates,
            timestamp,
        }
    }
}

/// What an `upsert_current` call did to the stored latest point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Replaced,
    /// Same timestamp and coordinate as the stored point.
    Unchanged,
    /// Incoming point is older than the stored one and was dropped.
    Stale,
}

/// Snapshot of a parcel's trail, ascending by timestamp.
///
/// Iterating borrows the snapshot, so the sequence can be walked any number
/// of times.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackHistory {
    points: Vec<TrackPoint>,
}

impl TrackHistory {
    pub(crate) fn from_sorted(points: Vec<TrackPoint>) -> Self {
        debug_assert!(points.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        Self { points }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TrackPoint> {
        self.points.iter()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn last(&self) -> Option<&TrackPoint> {
        self.points.last()
    }

    pub fn into_vec(self) -> Vec<TrackPoint> {
        self.points
    }
}

impl<'a> IntoIterator for &'a TrackHistory {
    type Item = &'a TrackPoint;
    type IntoIter = std::slice::Iter<'a, TrackPoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}
