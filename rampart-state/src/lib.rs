//! The single-writer custodian of all station state.
//!
//! [`SystemStateModel`] owns the only mutable [`SystemState`]. Every
//! mutation goes through one of its operations, each of which is a
//! transaction: the whole mutation applies or none of it does. Readers
//! subscribe to change events or hold a [`SharedState`] handle that the
//! model refreshes after each commit.

mod aimpoint;
mod model;
mod stationary;
mod zone_store;

pub use aimpoint::{azimuth_in_range, pixel_shift_for_offsets, reticle_position_px};
pub use model::{
    SharedState, StateEvent, SystemStateModel, AZ_COUNTS_TO_DEG, EL_COUNTS_TO_DEG, EL_MAX_DEG,
    EL_MIN_DEG,
};
pub use zone_store::{load_zones, save_zones, ZoneCollections};

/// Errors surfaced by state-model persistence.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("zone file parse error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
    #[error("zone file has unsupported root structure")]
    BadZoneFile,
}

pub type Result<T> = std::result::Result<T, Error>;
