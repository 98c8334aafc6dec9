use serde::{Deserialize, Serialize};

/// Top-level operating mode of the station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OperationalMode {
    #[default]
    Idle,
    Surveillance,
    Tracking,
    Engagement,
    EmergencyStop,
}

/// How the gimbal is currently being driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MotionMode {
    #[default]
    Idle,
    Manual,
    AutoSectorScan,
    TrpScan,
    RadarSlew,
    AutoTrack,
}

/// Phase of the operator-driven tracking procedure.
///
/// `Off -> Acquisition -> LockPending -> ActiveLock <-> Coast` with
/// `Firing` entered and left by the weapon controller. Transitions are
/// owned by the state model; the video pipeline only reports the raw
/// tracker verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TrackingPhase {
    #[default]
    Off,
    Acquisition,
    LockPending,
    ActiveLock,
    Coast,
    Firing,
}

/// The correlation tracker's own verdict for the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TrackerRawState {
    New,
    Tracked,
    #[default]
    Lost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FireMode {
    SingleShot,
    ShortBurst,
    LongBurst,
    #[default]
    Unknown,
}

impl FireMode {
    /// Solenoid-mode code written to PLC42.
    pub fn solenoid_code(&self) -> u16 {
        match self {
            FireMode::SingleShot | FireMode::Unknown => 1,
            FireMode::ShortBurst => 2,
            FireMode::LongBurst => 3,
        }
    }
}

/// Status of the lead-angle computation, as shown on the OSD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LeadAngleStatus {
    #[default]
    Off,
    On,
    /// Time of flight too large for the tracker's rate envelope.
    Lag,
    /// Computed lead exceeds what the current HFOV can display.
    ZoomOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReticleType {
    #[default]
    BoxCrosshair,
    Crosshair,
    Dot,
    CircleDot,
}

/// OSD color style. Stored as plain RGB so the renderer stays out of
/// scope here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsdColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Default for OsdColor {
    fn default() -> Self {
        // The station's traditional phosphor green.
        OsdColor {
            r: 70,
            g: 226,
            b: 165,
        }
    }
}

impl OsdColor {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        OsdColor { r, g, b }
    }
}
