// src/lib.rs
//! GPS Tracker Library
//!
//! Reads position telemetry from a GPS-over-network device, decodes RMC
//! sentences into fixes and keeps a running odometer per tracked entity.

pub mod config;
pub mod error;
pub mod gps;
pub mod link;
pub mod logging;
pub mod odometer;
pub mod store;

// Re-export main types for convenience
pub use error::{GpsError, Result};
pub use gps::{decode, PositionFix, Rejection};
pub use link::{ConnectionState, LinkConfig, LinkEvent, LinkHandle, LinkSink, TelemetryLink};
pub use odometer::{apply, EntityId, TrackingState};
pub use store::TrackingStore;
