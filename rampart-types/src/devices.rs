//! Immutable per-device snapshot records.
//!
//! Each device publishes one of these after every merge; readers receive
//! them by value and never share them mutably. The merge rules live with
//! the device harnesses, not here.

use serde::{Deserialize, Serialize};

/// Panel switch and analog state read from PLC21.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Plc21Panel {
    pub is_connected: bool,
    pub authorize_sw: bool,
    pub menu_val_sw: bool,
    pub menu_down_sw: bool,
    pub menu_up_sw: bool,
    pub switch_camera_sw: bool,
    pub enable_stabilization_sw: bool,
    pub home_position_sw: bool,
    pub load_ammunition_sw: bool,
    pub arm_gun_sw: bool,
    pub enable_station_sw: bool,
    /// Fire-mode selector position: 0 single, 1 short burst, 2 long burst.
    pub fire_mode_raw: u16,
    pub speed_sw: u16,
    pub panel_temperature: u16,
}

/// Station IO read from (and partially written through) PLC42.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Plc42Io {
    pub is_connected: bool,
    pub station_upper_sensor: bool,
    pub station_lower_sensor: bool,
    pub emergency_stop_active: bool,
    pub ammunition_level: bool,
    pub station_input1: bool,
    pub station_input2: bool,
    pub station_input3: bool,
    pub solenoid_active: bool,
    pub solenoid_mode: u16,
    pub gimbal_op_mode: u16,
    pub azimuth_speed: u32,
    pub elevation_speed: u32,
    pub azimuth_direction: u16,
    pub elevation_direction: u16,
    pub solenoid_state: u16,
    pub reset_alarm: u16,
}

/// One servo axis (azimuth or elevation) read from its Modbus driver.
///
/// `position_counts` is the raw signed 32-bit encoder value; the state
/// model applies the per-axis scale factor.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ServoAxisData {
    pub is_connected: bool,
    pub position_counts: f32,
    pub driver_temp_c: f32,
    pub motor_temp_c: f32,
    pub alarm_code: u32,
    pub alarm_text: String,
    pub fault: bool,
    pub alarm_history: Vec<u16>,
}

/// Decoded status-register bitfield of the linear actuator.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ActuatorStatus {
    pub is_latching_fault_active: bool,
    pub is_motor_off: bool,
    pub active_status_messages: Vec<String>,
}

/// Snapshot of the ammunition-charging linear actuator.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ServoActuatorData {
    pub is_connected: bool,
    pub position_mm: f64,
    pub velocity_mm_s: f64,
    pub torque_percent: f64,
    pub temperature_c: f64,
    pub bus_voltage_v: f64,
    pub status: ActuatorStatus,
}

/// Laser range finder snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LrfData {
    pub is_connected: bool,
    /// Last measured distance in metres (0 = no valid return yet).
    pub last_distance_m: u16,
    pub is_last_ranging_valid: bool,
    pub pulse_count: u8,
    /// Accumulated laser shot counter (raw x 100).
    pub laser_count: u32,
    pub is_fault: bool,
    pub no_echo: bool,
    pub laser_not_out: bool,
    pub is_over_temperature: bool,
    pub temperature_c: i8,
    pub is_temp_valid: bool,
    pub raw_status_byte: u8,
}

/// One inertial sample from the SST810.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ImuSample {
    pub is_connected: bool,
    pub roll_deg: f32,
    pub pitch_deg: f32,
    pub yaw_deg: f32,
    pub temperature_c: f32,
    pub accel_x_g: f32,
    pub accel_y_g: f32,
    pub accel_z_g: f32,
    pub gyro_x_dps: f32,
    pub gyro_y_dps: f32,
    pub gyro_z_dps: f32,
}

/// Day camera (Pelco-D) snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DayCameraData {
    pub is_connected: bool,
    pub zoom_position: u16,
    pub focus_position: u16,
    pub current_hfov_deg: f32,
    pub error_state: bool,
}

/// Thermal night camera snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NightCameraData {
    pub is_connected: bool,
    pub digital_zoom_level: u8,
    pub current_hfov_deg: f32,
    pub ffc_in_progress: bool,
    /// Color LUT index, clamped to [0, 12].
    pub lut_index: u8,
    /// Focal-plane-array temperature in units of 0.1 C.
    pub fpa_temperature_raw: i16,
    pub camera_status: u8,
    pub error_state: u8,
    pub pan_position: i16,
    pub tilt_position: i16,
}

/// One radar plot from a $RATTM sentence, converted to SI units.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RadarPlot {
    pub id: u32,
    pub azimuth_deg: f32,
    pub range_m: f32,
    pub relative_course_deg: f32,
    pub relative_speed_mps: f32,
}

/// One normalised joystick input event.
#[derive(Debug, Clone, PartialEq)]
pub enum JoystickInput {
    /// Axis index with deflection normalised to [-1, 1].
    Axis { axis: u8, value: f32 },
    Button { button: u8, pressed: bool },
    /// Hat direction bitmap: up=1, right=2, down=4, left=8, centered=0.
    Hat { hat: u8, value: u8 },
    Connected { name: String },
    Disconnected,
}
