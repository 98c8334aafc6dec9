use std::time::Instant;

use crate::devices::RadarPlot;
use crate::modes::{
    FireMode, LeadAngleStatus, MotionMode, OperationalMode, OsdColor, ReticleType,
    TrackerRawState, TrackingPhase,
};
use crate::video::PixelBox;
use crate::zones::{AreaZone, SectorScanZone, TargetReferencePoint};

/// The single authoritative state record of the whole station.
///
/// Every field has exactly one writer (the state model) and many readers;
/// readers receive clones or hold a shared read-only handle. Fields never
/// change meaning after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemState {
    // --- Operational mode ---
    pub op_mode: OperationalMode,
    pub previous_op_mode: OperationalMode,
    pub motion_mode: MotionMode,
    pub previous_motion_mode: MotionMode,

    // --- Tracking ---
    pub tracking_phase: TrackingPhase,
    pub tracker_has_valid_target: bool,
    /// User-adjustable template rectangle in image pixels.
    pub acquisition_box: PixelBox,
    pub tracked_center_px: (f32, f32),
    pub tracked_size_px: (f32, f32),
    pub tracked_velocity_px_s: (f32, f32),
    pub tracked_raw_state: TrackerRawState,

    // --- Gimbal ---
    pub gimbal_az_deg: f32,
    pub gimbal_el_deg: f32,
    pub az_fault: bool,
    pub el_fault: bool,
    pub az_motor_temp_c: f32,
    pub az_driver_temp_c: f32,
    pub el_motor_temp_c: f32,
    pub el_driver_temp_c: f32,
    pub joystick_az: f32,
    pub joystick_el: f32,
    pub joystick_hat: u8,
    /// Panel speed-switch position scaling the manual slew rate.
    pub gimbal_speed: u16,
    pub stabilization_enabled: bool,
    pub goto_home_position: bool,

    // --- Cameras ---
    pub active_camera_is_day: bool,
    pub day_camera_connected: bool,
    pub day_hfov_deg: f32,
    pub day_zoom_position: u16,
    pub day_focus_position: u16,
    pub night_camera_connected: bool,
    pub night_hfov_deg: f32,
    pub night_zoom_level: u8,
    pub night_ffc_in_progress: bool,
    pub night_lut_index: u8,
    pub night_fpa_temperature_raw: i16,
    pub image_width_px: u32,
    pub image_height_px: u32,

    // --- Ballistics overlays ---
    pub zeroing_mode_active: bool,
    pub zeroing_applied: bool,
    pub zeroing_az_offset_deg: f32,
    pub zeroing_el_offset_deg: f32,
    pub windage_mode_active: bool,
    pub windage_applied: bool,
    pub windage_speed_knots: f32,
    pub lead_angle_active: bool,
    pub lead_angle_status: LeadAngleStatus,
    pub lead_angle_offset_az_deg: f32,
    pub lead_angle_offset_el_deg: f32,
    pub muzzle_velocity_mps: f32,
    pub target_angular_rate_az_dps: f32,
    pub target_angular_rate_el_dps: f32,

    // --- Derived aimpoint ---
    pub reticle_aimpoint_image_x_px: f32,
    pub reticle_aimpoint_image_y_px: f32,
    pub lead_status_text: String,
    pub zeroing_status_text: String,
    pub current_scan_name: String,

    // --- Zones ---
    pub area_zones: Vec<AreaZone>,
    pub sector_scan_zones: Vec<SectorScanZone>,
    pub target_reference_points: Vec<TargetReferencePoint>,
    pub next_area_zone_id: u32,
    pub next_sector_scan_id: u32,
    pub next_trp_id: u32,
    pub active_sector_scan_id: Option<u32>,
    pub active_trp_page: u32,

    // --- Radar ---
    pub radar_plots: Vec<RadarPlot>,
    /// 0 means no selection.
    pub selected_radar_track_id: u32,

    // --- Safety ---
    pub station_enabled: bool,
    pub gun_armed: bool,
    pub ammo_loaded: bool,
    pub authorized: bool,
    pub menu_up_sw: bool,
    pub menu_down_sw: bool,
    pub menu_val_sw: bool,
    pub deadman_switch_active: bool,
    pub emergency_stop_active: bool,
    pub is_reticle_in_no_fire_zone: bool,
    pub is_reticle_in_no_traverse_zone: bool,
    pub upper_limit_sensor_active: bool,
    pub lower_limit_sensor_active: bool,
    pub station_ammunition_level: bool,
    pub solenoid_active: bool,

    // --- Charging actuator ---
    pub actuator_position_mm: f32,

    // --- LRF ---
    pub lrf_distance_m: f32,
    pub lrf_fault: bool,
    pub lrf_over_temperature: bool,
    pub lrf_connected: bool,

    // --- Stationary detection ---
    pub imu_roll_deg: f32,
    pub imu_pitch_deg: f32,
    pub imu_yaw_deg: f32,
    pub accel_g: (f32, f32, f32),
    pub gyro_dps: (f32, f32, f32),
    pub previous_accel_magnitude: f64,
    pub stationary_start_time: Option<Instant>,
    pub is_vehicle_stationary: bool,
    pub imu_connected: bool,

    // --- Device connectivity for the alarm list ---
    pub plc21_connected: bool,
    pub plc42_connected: bool,
    pub actuator_connected: bool,

    // --- UI styling ---
    pub color_style: OsdColor,
    pub osd_color_style: OsdColor,
    pub reticle_type: ReticleType,
    pub fire_mode: FireMode,
}

impl Default for SystemState {
    fn default() -> Self {
        SystemState {
            op_mode: OperationalMode::Idle,
            previous_op_mode: OperationalMode::Idle,
            motion_mode: MotionMode::Manual,
            previous_motion_mode: MotionMode::Idle,

            tracking_phase: TrackingPhase::Off,
            tracker_has_valid_target: false,
            acquisition_box: PixelBox::default(),
            tracked_center_px: (0.0, 0.0),
            tracked_size_px: (0.0, 0.0),
            tracked_velocity_px_s: (0.0, 0.0),
            tracked_raw_state: TrackerRawState::Lost,

            gimbal_az_deg: 0.0,
            gimbal_el_deg: 0.0,
            az_fault: false,
            el_fault: false,
            az_motor_temp_c: 0.0,
            az_driver_temp_c: 0.0,
            el_motor_temp_c: 0.0,
            el_driver_temp_c: 0.0,
            joystick_az: 0.0,
            joystick_el: 0.0,
            joystick_hat: 0,
            gimbal_speed: 1,
            stabilization_enabled: false,
            goto_home_position: false,

            active_camera_is_day: true,
            day_camera_connected: false,
            day_hfov_deg: 63.7,
            day_zoom_position: 0,
            day_focus_position: 0,
            night_camera_connected: false,
            night_hfov_deg: 10.6,
            night_zoom_level: 0,
            night_ffc_in_progress: false,
            night_lut_index: 0,
            night_fpa_temperature_raw: 0,
            image_width_px: 1024,
            image_height_px: 768,

            zeroing_mode_active: false,
            zeroing_applied: false,
            zeroing_az_offset_deg: 0.0,
            zeroing_el_offset_deg: 0.0,
            windage_mode_active: false,
            windage_applied: false,
            windage_speed_knots: 0.0,
            lead_angle_active: false,
            lead_angle_status: LeadAngleStatus::Off,
            lead_angle_offset_az_deg: 0.0,
            lead_angle_offset_el_deg: 0.0,
            muzzle_velocity_mps: 900.0,
            target_angular_rate_az_dps: 0.0,
            target_angular_rate_el_dps: 0.0,

            reticle_aimpoint_image_x_px: 512.0,
            reticle_aimpoint_image_y_px: 384.0,
            lead_status_text: String::new(),
            zeroing_status_text: String::new(),
            current_scan_name: String::new(),

            area_zones: Vec::new(),
            sector_scan_zones: Vec::new(),
            target_reference_points: Vec::new(),
            next_area_zone_id: 1,
            next_sector_scan_id: 1,
            next_trp_id: 1,
            active_sector_scan_id: None,
            active_trp_page: 1,

            radar_plots: Vec::new(),
            selected_radar_track_id: 0,

            station_enabled: false,
            gun_armed: false,
            ammo_loaded: false,
            authorized: false,
            menu_up_sw: false,
            menu_down_sw: false,
            menu_val_sw: false,
            deadman_switch_active: false,
            emergency_stop_active: false,
            is_reticle_in_no_fire_zone: false,
            is_reticle_in_no_traverse_zone: false,
            upper_limit_sensor_active: false,
            lower_limit_sensor_active: false,
            station_ammunition_level: false,
            solenoid_active: false,

            actuator_position_mm: 0.0,

            lrf_distance_m: 0.0,
            lrf_fault: false,
            lrf_over_temperature: false,
            lrf_connected: false,

            imu_roll_deg: 0.0,
            imu_pitch_deg: 0.0,
            imu_yaw_deg: 0.0,
            accel_g: (0.0, 0.0, 0.0),
            gyro_dps: (0.0, 0.0, 0.0),
            previous_accel_magnitude: 0.0,
            stationary_start_time: None,
            is_vehicle_stationary: false,
            imu_connected: false,

            plc21_connected: false,
            plc42_connected: false,
            actuator_connected: false,

            color_style: OsdColor::default(),
            osd_color_style: OsdColor::default(),
            reticle_type: ReticleType::BoxCrosshair,
            fire_mode: FireMode::Unknown,
        }
    }
}

impl SystemState {
    /// HFOV of whichever camera is currently active.
    pub fn active_hfov_deg(&self) -> f32 {
        if self.active_camera_is_day {
            self.day_hfov_deg
        } else {
            self.night_hfov_deg
        }
    }

    /// Index of the active camera: 0 = day, 1 = night.
    pub fn active_camera_index(&self) -> usize {
        if self.active_camera_is_day {
            0
        } else {
            1
        }
    }

    /// The fire-permission predicate. The hardware interlock remains
    /// authoritative; this only gates what the software will command.
    pub fn may_fire(&self) -> bool {
        self.station_enabled
            && self.gun_armed
            && self.deadman_switch_active
            && !self.emergency_stop_active
            && !self.is_reticle_in_no_fire_zone
    }
}
