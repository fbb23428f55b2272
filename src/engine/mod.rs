pub mod accounts;
pub mod aggregator;
pub mod analytics;
pub mod lifecycle;
pub mod parcel_code;
pub mod parcels;
pub mod tracking;
