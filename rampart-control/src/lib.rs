//! Operator-facing controllers.
//!
//! Controllers hold no state the central model can express. They read
//! snapshots, mutate the model through its narrow operations and emit
//! device commands as [`StationAction`] values that the composition
//! root routes to the owning device threads.

mod app;
mod camera;
mod gimbal;
mod joystick;
mod weapon;

pub use app::{AppEffect, ApplicationController, MenuState};
pub use camera::CameraController;
pub use gimbal::{GimbalController, OUTPUT_HEIGHT_PX, OUTPUT_WIDTH_PX};
pub use joystick::JoystickController;
pub use weapon::{AmmoState, WeaponController};

use rampart_devices::day_camera::DayCameraCommand;
use rampart_devices::lrf::LrfCommand;
use rampart_devices::night_camera::NightCameraCommand;
use rampart_devices::plc42::Plc42Command;
use rampart_devices::servo_actuator::ActuatorCommand;
use rampart_devices::servo_driver::ServoDriverCommand;

/// A device command produced by a controller, routed by the composition
/// root onto the owning device's command channel.
#[derive(Debug, Clone, PartialEq)]
pub enum StationAction {
    Actuator(ActuatorCommand),
    Plc42(Plc42Command),
    DayCamera(DayCameraCommand),
    NightCamera(NightCameraCommand),
    Lrf(LrfCommand),
    ServoAz(ServoDriverCommand),
    ServoEl(ServoDriverCommand),
    /// Toggle the object detector on the camera pipelines.
    ToggleDetection,
    /// Orderly process shutdown requested from the menu.
    Shutdown,
}
