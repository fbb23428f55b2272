pub mod parcel;
pub mod tracking;
pub mod user;
