// src/gps/mod.rs
//! GPS data handling and parsing

pub mod data;
pub mod gps2ip;
pub mod nmea;

pub use data::PositionFix;
pub use nmea::{decode, Rejection};
