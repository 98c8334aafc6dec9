//! Shared plain-data types for the rampart control stack.
//!
//! Every other crate in the workspace depends on this one and nothing in
//! here depends on anything else in the workspace. Types that are
//! persisted (the zone file) or that cross a thread boundary carry serde
//! derives; everything else is plain `Clone` data.

mod alarm;
mod devices;
mod modes;
mod state;
mod video;
mod zones;

pub use alarm::{active_alarms, Alarm, ALL_NOMINAL};
pub use devices::{
    ActuatorStatus, DayCameraData, ImuSample, JoystickInput, LrfData, NightCameraData,
    Plc21Panel, Plc42Io, RadarPlot, ServoActuatorData, ServoAxisData,
};
pub use modes::{
    FireMode, LeadAngleStatus, MotionMode, OperationalMode, OsdColor, ReticleType,
    TrackerRawState, TrackingPhase,
};
pub use state::SystemState;
pub use video::{Detection, FrameData, PixelBox};
pub use zones::{
    AreaZone, SectorScanZone, TargetReferencePoint, ZoneFile, ZoneType, ZONE_FILE_VERSION,
};
