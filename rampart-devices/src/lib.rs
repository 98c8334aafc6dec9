//! Peripheral drivers: one module per device, each pairing a stateful
//! wire-protocol parser with a device harness.
//!
//! The harness pattern is uniform: a snapshot record is merged after
//! every valid message and republished only when something changed; a
//! communication watchdog marks the device disconnected after silence
//! and the next valid message restores it; poll-driven devices issue
//! their reads from a poll timer; actuators serialise commands through a
//! pending-command gate.

pub mod day_camera;
pub mod imu;
pub mod joystick;
pub mod lrf;
pub mod night_camera;
pub mod plc21;
pub mod plc42;
pub mod radar;
pub mod servo_actuator;
pub mod servo_driver;

mod merge;

pub use merge::{fuzzy_eq_f32, fuzzy_eq_f64};

use rampart_types::{
    DayCameraData, ImuSample, JoystickInput, LrfData, NightCameraData, Plc21Panel, Plc42Io,
    RadarPlot, ServoActuatorData, ServoAxisData,
};

/// Which peripheral an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    DayCamera,
    NightCamera,
    Lrf,
    Imu,
    Plc21,
    Plc42,
    ServoAz,
    ServoEl,
    ServoActuator,
    Radar,
    Joystick,
}

/// Lifecycle state of one device harness. The connection sub-state
/// (watchdog-driven) is independent of this and lives in each snapshot's
/// `is_connected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceLifecycle {
    #[default]
    Offline,
    Initializing,
    Online,
    Error,
}

/// Typed data-changed events aggregated onto the UI thread.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    DayCamera(DayCameraData),
    NightCamera(NightCameraData),
    Lrf(LrfData),
    LrfInfo { product_id: u8, version: String },
    Imu(ImuSample),
    Plc21(Plc21Panel),
    Plc42(Plc42Io),
    ServoAz(ServoAxisData),
    ServoEl(ServoAxisData),
    Actuator(ServoActuatorData),
    ActuatorPositionReached,
    RadarPlots(Vec<RadarPlot>),
    Joystick(JoystickInput),
    Fault { device: DeviceKind, message: String },
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("link error: {source}")]
    Comms {
        #[from]
        source: rampart_comms::Error,
    },
    #[error("event channel closed")]
    EventChannelClosed,
    #[error("joystick backend error: {0}")]
    Joystick(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Send a device event, mapping a closed channel (UI thread gone) into
/// an error that terminates the device task.
pub(crate) fn send_event(
    events: &crossbeam_channel::Sender<DeviceEvent>,
    event: DeviceEvent,
) -> Result<()> {
    events.send(event).map_err(|_| Error::EventChannelClosed)
}
