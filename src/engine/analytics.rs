//! Admin dashboard figures.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;

use crate::error::AppError;
use crate::models::parcel::{Parcel, ParcelFilter, ParcelStatus};
use crate::state::AppState;
use crate::store::bounded;

const BOOKING_WINDOW_DAYS: i64 = 7;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DailyBookings {
    pub date: NaiveDate,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusStats {
    pub status: ParcelStatus,
    pub count: usize,
    pub total_cod_amount: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Analytics {
    pub daily_bookings: Vec<DailyBookings>,
    pub status_stats: Vec<StatusStats>,
}

pub async fn dashboard(state: &AppState) -> Result<Analytics, AppError> {
    let parcels = bounded(
        state.storage_timeout(),
        "parcel listing",
        state.parcels.list(ParcelFilter::All),
    )
    .await?;
    Ok(summarize(&parcels, Utc::now()))
}

/// Days without bookings are omitted. Statuses appear in lifecycle order and
/// only when at least one parcel has them.
pub fn summarize(parcels: &[Parcel], now: DateTime<Utc>) -> Analytics {
    let since = now - Duration::days(BOOKING_WINDOW_DAYS);

    let mut per_day: BTreeMap<NaiveDate, usize> = BTreeMap::new();
    for parcel in parcels.iter().filter(|p| p.created_at >= since) {
        *per_day.entry(parcel.created_at.date_naive()).or_default() += 1;
    }

    let status_stats = ParcelStatus::ALL
        .into_iter()
        .filter_map(|status| {
            let (count, total_cod_amount) = parcels
                .iter()
                .filter(|p| p.status == status)
                .fold((0, 0.0), |(count, cod), p| (count + 1, cod + p.cod_amount));
            (count > 0).then_some(StatusStats {
                status,
                count,
                total_cod_amount,
            })
        })
        .collect();

    Analytics {
        daily_bookings: per_day
            .into_iter()
            .map(|(date, count)| DailyBookings { date, count })
            .collect(),
        status_stats,
    }
}
