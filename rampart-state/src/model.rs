use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, info, warn};

use rampart_types::{
    AreaZone, DayCameraData, ImuSample, LeadAngleStatus, LrfData, MotionMode, NightCameraData,
    OperationalMode, OsdColor, PixelBox, Plc21Panel, Plc42Io, RadarPlot, ReticleType,
    SectorScanZone, ServoActuatorData, ServoAxisData, SystemState, TargetReferencePoint,
    TrackerRawState, TrackingPhase, ZoneType,
};

use crate::aimpoint::{azimuth_in_range, reticle_position_px};
use crate::stationary::update_stationary_status;
use crate::zone_store::{self, ZoneCollections};
use crate::Result;

/// Azimuth servo: encoder counts to degrees.
pub const AZ_COUNTS_TO_DEG: f64 = 0.0016179775280;
/// Elevation servo: encoder counts to degrees (inverted axis).
pub const EL_COUNTS_TO_DEG: f64 = -0.0018;

/// Mechanical elevation limits in degrees.
pub const EL_MIN_DEG: f32 = -20.0;
pub const EL_MAX_DEG: f32 = 60.0;

/// Default acquisition box edge length in pixels.
const DEFAULT_ACQ_BOX: f32 = 100.0;
/// Acquisition box clamp: minimum edge and maximum fraction of image dim.
const MIN_ACQ_BOX: f32 = 20.0;
const MAX_ACQ_FRACTION: f32 = 0.8;

/// Fine-grained change notifications published by the model.
#[derive(Debug, Clone, PartialEq)]
pub enum StateEvent {
    DataChanged,
    GimbalPositionChanged { az_deg: f32, el_deg: f32 },
    ZonesChanged,
    ColorStyleChanged(OsdColor),
    ZeroingStateChanged {
        mode_active: bool,
        az_offset_deg: f32,
        el_offset_deg: f32,
    },
    WindageStateChanged {
        mode_active: bool,
        speed_knots: f32,
    },
    LeadAngleStateChanged {
        active: bool,
        status: LeadAngleStatus,
        az_offset_deg: f32,
        el_offset_deg: f32,
    },
}

/// Read-only cross-thread handle onto the latest committed state.
#[derive(Clone)]
pub struct SharedState(Arc<RwLock<SystemState>>);

impl SharedState {
    pub fn snapshot(&self) -> SystemState {
        self.0.read().expect("state lock poisoned").clone()
    }

    /// Run `f` against the latest state without cloning the whole record.
    pub fn with<R>(&self, f: impl FnOnce(&SystemState) -> R) -> R {
        f(&self.0.read().expect("state lock poisoned"))
    }
}

/// Single-writer custodian of [`SystemState`].
///
/// All mutation funnels through [`SystemStateModel::commit`], which runs
/// the automatic mode transitions, refreshes the shared snapshot and
/// fans out change events. Each public operation is a transaction.
pub struct SystemStateModel {
    state: SystemState,
    shared: Arc<RwLock<SystemState>>,
    subscribers: Vec<Sender<StateEvent>>,
    zones_path: Option<PathBuf>,
}

impl Default for SystemStateModel {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemStateModel {
    pub fn new() -> Self {
        let mut state = SystemState::default();
        // Zeroing and windage are intentionally lost between runs.
        state.zeroing_mode_active = false;
        state.zeroing_applied = false;
        state.zeroing_az_offset_deg = 0.0;
        state.zeroing_el_offset_deg = 0.0;
        state.windage_mode_active = false;
        state.windage_applied = false;
        state.windage_speed_knots = 0.0;
        recalculate_aimpoint(&mut state);

        let shared = Arc::new(RwLock::new(state.clone()));
        SystemStateModel {
            state,
            shared,
            subscribers: Vec::new(),
            zones_path: None,
        }
    }

    /// Construct and load zones from `path` when the file exists.
    pub fn with_zones_file(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut model = Self::new();
        if path.exists() {
            if let Err(e) = model.load_zones_from_file(&path) {
                warn!("could not load zones from {}: {e}", path.display());
            }
        } else {
            info!("no zones file at {}, starting empty", path.display());
        }
        model.zones_path = Some(path);
        model
    }

    /// Subscribe to change events. The returned receiver is unbounded;
    /// a dropped receiver is pruned on the next emission.
    pub fn subscribe(&mut self) -> Receiver<StateEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    /// Shared read-only handle for other threads.
    pub fn shared(&self) -> SharedState {
        SharedState(self.shared.clone())
    }

    pub fn data(&self) -> &SystemState {
        &self.state
    }

    pub fn snapshot(&self) -> SystemState {
        self.state.clone()
    }

    // ----------------------------------------------------------------
    // Core commit path
    // ----------------------------------------------------------------

    /// Replace the whole state. Emits `DataChanged`, plus
    /// `GimbalPositionChanged` when az/el differ and `ZonesChanged` when
    /// any zone list changed.
    pub fn update(&mut self, new_state: SystemState) {
        self.commit(new_state);
    }

    fn commit(&mut self, new_state: SystemState) {
        if self.state == new_state {
            return;
        }
        let old = self.state.clone();
        let mut next = new_state;
        process_auto_transitions(&old, &mut next);

        let gimbal_changed =
            old.gimbal_az_deg != next.gimbal_az_deg || old.gimbal_el_deg != next.gimbal_el_deg;
        let zones_changed = old.area_zones != next.area_zones
            || old.sector_scan_zones != next.sector_scan_zones
            || old.target_reference_points != next.target_reference_points;

        self.state = next;
        *self.shared.write().expect("state lock poisoned") = self.state.clone();

        self.emit(StateEvent::DataChanged);
        if gimbal_changed {
            self.emit(StateEvent::GimbalPositionChanged {
                az_deg: self.state.gimbal_az_deg,
                el_deg: self.state.gimbal_el_deg,
            });
        }
        if zones_changed {
            self.emit(StateEvent::ZonesChanged);
        }
    }

    fn emit(&mut self, event: StateEvent) {
        self.subscribers
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    // ----------------------------------------------------------------
    // Device data intake
    // ----------------------------------------------------------------

    pub fn on_servo_az_data(&mut self, d: &ServoAxisData) {
        let mut next = self.state.clone();
        let az = (d.position_counts as f64 * AZ_COUNTS_TO_DEG).rem_euclid(360.0);
        next.gimbal_az_deg = az as f32;
        next.az_motor_temp_c = d.motor_temp_c;
        next.az_driver_temp_c = d.driver_temp_c;
        next.az_fault = d.fault || d.alarm_code != 0;
        self.commit(next);
    }

    pub fn on_servo_el_data(&mut self, d: &ServoAxisData) {
        let mut next = self.state.clone();
        let el = (d.position_counts as f64 * EL_COUNTS_TO_DEG) as f32;
        next.gimbal_el_deg = el.clamp(EL_MIN_DEG, EL_MAX_DEG);
        next.el_motor_temp_c = d.motor_temp_c;
        next.el_driver_temp_c = d.driver_temp_c;
        next.el_fault = d.fault || d.alarm_code != 0;
        self.commit(next);
    }

    pub fn on_day_camera_data(&mut self, d: &DayCameraData) {
        let mut next = self.state.clone();
        next.day_camera_connected = d.is_connected;
        next.day_zoom_position = d.zoom_position;
        next.day_focus_position = d.focus_position;
        next.day_hfov_deg = d.current_hfov_deg;
        recalculate_aimpoint(&mut next);
        self.commit(next);
    }

    pub fn on_night_camera_data(&mut self, d: &NightCameraData) {
        let mut next = self.state.clone();
        next.night_camera_connected = d.is_connected;
        next.night_zoom_level = d.digital_zoom_level;
        next.night_hfov_deg = d.current_hfov_deg;
        next.night_ffc_in_progress = d.ffc_in_progress;
        next.night_lut_index = d.lut_index.min(12);
        next.night_fpa_temperature_raw = d.fpa_temperature_raw;
        recalculate_aimpoint(&mut next);
        self.commit(next);
    }

    pub fn on_lrf_data(&mut self, d: &LrfData) {
        let mut next = self.state.clone();
        next.lrf_connected = d.is_connected;
        if d.is_last_ranging_valid {
            next.lrf_distance_m = d.last_distance_m as f32;
        }
        next.lrf_fault = d.is_fault;
        next.lrf_over_temperature = d.is_over_temperature;
        self.commit(next);
    }

    pub fn on_imu_data(&mut self, d: &ImuSample) {
        self.on_imu_data_at(d, Instant::now());
    }

    /// Time-injected variant of [`Self::on_imu_data`] for tests.
    pub fn on_imu_data_at(&mut self, d: &ImuSample, now: Instant) {
        let mut next = self.state.clone();
        next.imu_connected = d.is_connected;
        next.imu_roll_deg = d.roll_deg;
        next.imu_pitch_deg = d.pitch_deg;
        next.imu_yaw_deg = d.yaw_deg;
        next.accel_g = (d.accel_x_g, d.accel_y_g, d.accel_z_g);
        next.gyro_dps = (d.gyro_x_dps, d.gyro_y_dps, d.gyro_z_dps);
        update_stationary_status(&mut next, now);
        self.commit(next);
    }

    pub fn on_plc21_data(&mut self, d: &Plc21Panel) {
        let mut next = self.state.clone();
        next.plc21_connected = d.is_connected;
        next.authorized = d.authorize_sw;
        next.menu_up_sw = d.menu_up_sw;
        next.menu_down_sw = d.menu_down_sw;
        next.menu_val_sw = d.menu_val_sw;
        next.station_enabled = d.enable_station_sw;
        next.gun_armed = d.arm_gun_sw;
        next.ammo_loaded = d.load_ammunition_sw;
        next.goto_home_position = d.home_position_sw;
        next.stabilization_enabled = d.enable_stabilization_sw;
        next.active_camera_is_day = d.switch_camera_sw;
        next.fire_mode = match d.fire_mode_raw {
            0 => rampart_types::FireMode::SingleShot,
            1 => rampart_types::FireMode::ShortBurst,
            2 => rampart_types::FireMode::LongBurst,
            _ => rampart_types::FireMode::Unknown,
        };
        next.gimbal_speed = d.speed_sw;
        self.commit(next);
    }

    pub fn on_plc42_data(&mut self, d: &Plc42Io) {
        let mut next = self.state.clone();
        next.plc42_connected = d.is_connected;
        next.upper_limit_sensor_active = d.station_upper_sensor;
        next.lower_limit_sensor_active = d.station_lower_sensor;
        next.emergency_stop_active = d.emergency_stop_active;
        next.station_ammunition_level = d.ammunition_level;
        next.solenoid_active = d.solenoid_active;
        self.commit(next);
    }

    pub fn on_actuator_data(&mut self, d: &ServoActuatorData) {
        let mut next = self.state.clone();
        next.actuator_connected = d.is_connected;
        next.actuator_position_mm = d.position_mm as f32;
        self.commit(next);
    }

    pub fn on_joystick_axis(&mut self, axis: u8, normalized: f32) {
        let mut next = self.state.clone();
        match axis {
            0 => next.joystick_az = normalized,
            1 => next.joystick_el = normalized,
            _ => return,
        }
        self.commit(next);
    }

    /// Button policy (track, fire, LAC toggle) lives in the joystick
    /// controller, which calls the semantic operations directly.
    pub fn on_joystick_button(&mut self, button: u8, pressed: bool) {
        debug!("joystick button {button} => {pressed}");
    }

    pub fn on_joystick_hat(&mut self, hat: u8, value: u8) {
        if hat != 0 {
            return;
        }
        let mut next = self.state.clone();
        next.joystick_hat = value;
        self.commit(next);
    }

    pub fn on_radar_plots(&mut self, plots: Vec<RadarPlot>) {
        let mut next = self.state.clone();
        if next.selected_radar_track_id != 0
            && !plots.iter().any(|p| p.id == next.selected_radar_track_id)
        {
            next.selected_radar_track_id = 0;
        }
        next.radar_plots = plots;
        self.commit(next);
    }

    // ----------------------------------------------------------------
    // Modes and tracking
    // ----------------------------------------------------------------

    pub fn set_op_mode(&mut self, mode: OperationalMode) {
        if self.state.op_mode == mode {
            return;
        }
        let mut next = self.state.clone();
        next.previous_op_mode = next.op_mode;
        next.op_mode = mode;
        self.commit(next);
    }

    pub fn set_motion_mode(&mut self, mode: MotionMode) {
        if self.state.motion_mode == mode {
            return;
        }
        let mut next = self.state.clone();
        next.previous_motion_mode = next.motion_mode;
        next.motion_mode = mode;
        update_scan_name(&mut next);
        self.commit(next);
    }

    /// Start or stop an engagement. Starting requires an armed gun and
    /// caches the previous modes; stopping restores them.
    pub fn command_engagement(&mut self, start: bool) -> bool {
        let mut next = self.state.clone();
        if start {
            if next.op_mode == OperationalMode::Engagement || !next.gun_armed {
                return false;
            }
            next.previous_op_mode = next.op_mode;
            next.previous_motion_mode = next.motion_mode;
            next.op_mode = OperationalMode::Engagement;
        } else {
            if next.op_mode != OperationalMode::Engagement {
                return false;
            }
            next.op_mode = next.previous_op_mode;
            next.motion_mode = next.previous_motion_mode;
        }
        self.commit(next);
        true
    }

    /// TRACK pressed while idle: open the acquisition gate centred on
    /// the current reticle aimpoint.
    pub fn start_tracking_acquisition(&mut self) -> bool {
        if self.state.tracking_phase != TrackingPhase::Off {
            return false;
        }
        let mut next = self.state.clone();
        let cx = next.reticle_aimpoint_image_x_px;
        let cy = next.reticle_aimpoint_image_y_px;
        let w = DEFAULT_ACQ_BOX;
        let h = DEFAULT_ACQ_BOX;
        let max_x = (next.image_width_px as f32 - w).max(0.0);
        let max_y = (next.image_height_px as f32 - h).max(0.0);
        next.acquisition_box = PixelBox {
            x: (cx - w / 2.0).clamp(0.0, max_x),
            y: (cy - h / 2.0).clamp(0.0, max_y),
            w,
            h,
        };
        next.tracking_phase = TrackingPhase::Acquisition;
        next.op_mode = OperationalMode::Surveillance;
        next.motion_mode = MotionMode::Manual;
        self.commit(next);
        true
    }

    /// TRACK pressed again during acquisition: hand the box to the
    /// tracker. Motion stays manual until a valid lock arrives.
    pub fn request_tracker_lock_on(&mut self) -> bool {
        if self.state.tracking_phase != TrackingPhase::Acquisition {
            return false;
        }
        let mut next = self.state.clone();
        next.tracking_phase = TrackingPhase::LockPending;
        self.commit(next);
        true
    }

    pub fn stop_tracking(&mut self) {
        if self.state.tracking_phase == TrackingPhase::Off {
            return;
        }
        let mut next = self.state.clone();
        next.tracking_phase = TrackingPhase::Off;
        next.tracker_has_valid_target = false;
        next.op_mode = OperationalMode::Surveillance;
        next.motion_mode = MotionMode::Manual;
        self.commit(next);
    }

    /// The weapon controller holds the tracking phase at `Firing` while
    /// rounds are going out; tracker reports do not drive transitions
    /// in that phase.
    pub fn begin_firing_phase(&mut self) -> bool {
        if !matches!(
            self.state.tracking_phase,
            TrackingPhase::ActiveLock | TrackingPhase::Coast
        ) {
            return false;
        }
        let mut next = self.state.clone();
        next.tracking_phase = TrackingPhase::Firing;
        self.commit(next);
        true
    }

    /// Leave the firing phase, falling back to lock or coast depending
    /// on whether the tracker still has the target.
    pub fn end_firing_phase(&mut self) {
        if self.state.tracking_phase != TrackingPhase::Firing {
            return;
        }
        let mut next = self.state.clone();
        next.tracking_phase = if next.tracker_has_valid_target {
            TrackingPhase::ActiveLock
        } else {
            TrackingPhase::Coast
        };
        self.commit(next);
    }

    /// Resize the acquisition gate. The box is clamped to
    /// [20 px, 0.8 x image dim] per axis and re-centred on the image.
    pub fn adjust_acquisition_box_size(&mut self, dw: f32, dh: f32) -> bool {
        if self.state.tracking_phase != TrackingPhase::Acquisition {
            return false;
        }
        let mut next = self.state.clone();
        let max_w = next.image_width_px as f32 * MAX_ACQ_FRACTION;
        let max_h = next.image_height_px as f32 * MAX_ACQ_FRACTION;
        let w = (next.acquisition_box.w + dw).clamp(MIN_ACQ_BOX, max_w);
        let h = (next.acquisition_box.h + dh).clamp(MIN_ACQ_BOX, max_h);
        next.acquisition_box = PixelBox {
            x: next.image_width_px as f32 / 2.0 - w / 2.0,
            y: next.image_height_px as f32 / 2.0 - h / 2.0,
            w,
            h,
        };
        self.commit(next);
        true
    }

    /// Per-frame report from a camera pipeline. Reports from the
    /// inactive camera never change any field.
    #[allow(clippy::too_many_arguments)]
    pub fn update_tracking_result(
        &mut self,
        camera_index: usize,
        _has_lock: bool,
        center_px: (f32, f32),
        size_px: (f32, f32),
        velocity_px_s: (f32, f32),
        raw_state: TrackerRawState,
    ) {
        if camera_index != self.state.active_camera_index() {
            return;
        }

        let mut next = self.state.clone();
        next.tracker_has_valid_target = raw_state == TrackerRawState::Tracked;
        next.tracked_center_px = center_px;
        next.tracked_size_px = size_px;
        next.tracked_velocity_px_s = velocity_px_s;
        next.tracked_raw_state = raw_state;
        update_target_angular_rates(&mut next);

        match next.tracking_phase {
            TrackingPhase::Off => {
                if raw_state != TrackerRawState::Lost {
                    warn!("tracking data received while phase is Off, resetting");
                    next.tracker_has_valid_target = false;
                    next.tracked_raw_state = TrackerRawState::Lost;
                    next.motion_mode = MotionMode::Manual;
                }
            }
            TrackingPhase::Acquisition => {
                // The tracker is not initialised during acquisition; any
                // report here is stale and does not drive transitions.
            }
            TrackingPhase::LockPending => match raw_state {
                TrackerRawState::Tracked => {
                    next.tracking_phase = TrackingPhase::ActiveLock;
                    next.op_mode = OperationalMode::Tracking;
                    next.motion_mode = MotionMode::AutoTrack;
                    info!("tracker lock acquired");
                }
                TrackerRawState::Lost => {
                    next.tracking_phase = TrackingPhase::Off;
                    next.op_mode = OperationalMode::Idle;
                    next.motion_mode = MotionMode::Manual;
                    next.tracker_has_valid_target = false;
                    warn!("tracker failed to acquire lock");
                }
                TrackerRawState::New => {
                    // Initialised, still converging. Keep waiting.
                }
            },
            TrackingPhase::ActiveLock => {
                if raw_state == TrackerRawState::Lost {
                    next.tracking_phase = TrackingPhase::Coast;
                    next.motion_mode = MotionMode::Manual;
                    next.tracker_has_valid_target = false;
                    warn!("target lost, coasting");
                }
            }
            TrackingPhase::Coast => {
                if raw_state == TrackerRawState::Tracked {
                    next.tracking_phase = TrackingPhase::ActiveLock;
                    next.op_mode = OperationalMode::Tracking;
                    next.motion_mode = MotionMode::AutoTrack;
                    info!("target re-acquired");
                }
            }
            TrackingPhase::Firing => {
                // Phase changes during firing are owned by the weapon
                // controller, not the tracker.
            }
        }

        self.commit(next);
    }

    // ----------------------------------------------------------------
    // UI styling and switches
    // ----------------------------------------------------------------

    pub fn set_color_style(&mut self, color: OsdColor) {
        let mut next = self.state.clone();
        next.color_style = color;
        next.osd_color_style = color;
        self.commit(next);
        self.emit(StateEvent::ColorStyleChanged(color));
    }

    pub fn set_reticle_style(&mut self, reticle: ReticleType) {
        let mut next = self.state.clone();
        next.reticle_type = reticle;
        self.commit(next);
    }

    pub fn set_deadman_switch(&mut self, pressed: bool) {
        let mut next = self.state.clone();
        next.deadman_switch_active = pressed;
        self.commit(next);
    }

    pub fn set_active_camera_is_day(&mut self, day: bool) {
        let mut next = self.state.clone();
        next.active_camera_is_day = day;
        recalculate_aimpoint(&mut next);
        self.commit(next);
    }

    pub fn set_point_in_no_fire_zone(&mut self, in_zone: bool) {
        let mut next = self.state.clone();
        next.is_reticle_in_no_fire_zone = in_zone;
        self.commit(next);
    }

    pub fn set_point_in_no_traverse_zone(&mut self, in_zone: bool) {
        let mut next = self.state.clone();
        next.is_reticle_in_no_traverse_zone = in_zone;
        self.commit(next);
    }

    // ----------------------------------------------------------------
    // Zones
    // ----------------------------------------------------------------

    pub fn add_area_zone(&mut self, mut zone: AreaZone) -> u32 {
        let mut next = self.state.clone();
        zone.id = next.next_area_zone_id;
        next.next_area_zone_id += 1;
        let id = zone.id;
        next.area_zones.push(zone);
        self.commit(next);
        debug!("added area zone {id}");
        id
    }

    pub fn modify_area_zone(&mut self, id: u32, updated: AreaZone) -> bool {
        let mut next = self.state.clone();
        match next.area_zones.iter_mut().find(|z| z.id == id) {
            Some(slot) => {
                *slot = AreaZone { id, ..updated };
            }
            None => {
                warn!("modify_area_zone: id {id} not found");
                return false;
            }
        }
        self.commit(next);
        true
    }

    pub fn delete_area_zone(&mut self, id: u32) -> bool {
        let mut next = self.state.clone();
        let before = next.area_zones.len();
        next.area_zones.retain(|z| z.id != id);
        if next.area_zones.len() == before {
            warn!("delete_area_zone: id {id} not found");
            return false;
        }
        self.commit(next);
        true
    }

    pub fn add_sector_scan_zone(&mut self, mut zone: SectorScanZone) -> u32 {
        let mut next = self.state.clone();
        zone.id = next.next_sector_scan_id;
        zone.scan_speed = zone.scan_speed.clamp(1.0, 50.0);
        next.next_sector_scan_id += 1;
        let id = zone.id;
        next.sector_scan_zones.push(zone);
        self.commit(next);
        id
    }

    pub fn modify_sector_scan_zone(&mut self, id: u32, updated: SectorScanZone) -> bool {
        let mut next = self.state.clone();
        match next.sector_scan_zones.iter_mut().find(|z| z.id == id) {
            Some(slot) => {
                *slot = SectorScanZone {
                    id,
                    scan_speed: updated.scan_speed.clamp(1.0, 50.0),
                    ..updated
                };
            }
            None => {
                warn!("modify_sector_scan_zone: id {id} not found");
                return false;
            }
        }
        update_scan_name(&mut next);
        self.commit(next);
        true
    }

    pub fn delete_sector_scan_zone(&mut self, id: u32) -> bool {
        let mut next = self.state.clone();
        let before = next.sector_scan_zones.len();
        next.sector_scan_zones.retain(|z| z.id != id);
        if next.sector_scan_zones.len() == before {
            warn!("delete_sector_scan_zone: id {id} not found");
            return false;
        }
        if next.active_sector_scan_id == Some(id) {
            next.active_sector_scan_id = None;
        }
        update_scan_name(&mut next);
        self.commit(next);
        true
    }

    pub fn add_trp(&mut self, mut trp: TargetReferencePoint) -> u32 {
        let mut next = self.state.clone();
        trp.id = next.next_trp_id;
        trp.location_page = trp.location_page.max(1);
        trp.trp_in_page = trp.trp_in_page.max(1);
        trp.halt_time = trp.halt_time.max(0.0);
        next.next_trp_id += 1;
        let id = trp.id;
        next.target_reference_points.push(trp);
        self.commit(next);
        id
    }

    pub fn modify_trp(&mut self, id: u32, updated: TargetReferencePoint) -> bool {
        let mut next = self.state.clone();
        match next.target_reference_points.iter_mut().find(|t| t.id == id) {
            Some(slot) => {
                *slot = TargetReferencePoint { id, ..updated };
            }
            None => {
                warn!("modify_trp: id {id} not found");
                return false;
            }
        }
        self.commit(next);
        true
    }

    pub fn delete_trp(&mut self, id: u32) -> bool {
        let mut next = self.state.clone();
        let before = next.target_reference_points.len();
        next.target_reference_points.retain(|t| t.id != id);
        if next.target_reference_points.len() == before {
            warn!("delete_trp: id {id} not found");
            return false;
        }
        self.commit(next);
        true
    }

    pub fn save_zones_to_file(&self, path: &Path) -> Result<()> {
        let zones = ZoneCollections {
            area_zones: self.state.area_zones.clone(),
            sector_scan_zones: self.state.sector_scan_zones.clone(),
            target_reference_points: self.state.target_reference_points.clone(),
            next_area_zone_id: self.state.next_area_zone_id,
            next_sector_scan_id: self.state.next_sector_scan_id,
            next_trp_id: self.state.next_trp_id,
        };
        zone_store::save_zones(path, &zones)
    }

    /// Save to the path this model was constructed with, when any.
    pub fn save_zones(&self) -> Result<()> {
        match &self.zones_path {
            Some(path) => self.save_zones_to_file(path),
            None => Ok(()),
        }
    }

    pub fn load_zones_from_file(&mut self, path: &Path) -> Result<()> {
        let zones = zone_store::load_zones(path)?;
        let mut next = self.state.clone();
        next.area_zones = zones.area_zones;
        next.sector_scan_zones = zones.sector_scan_zones;
        next.target_reference_points = zones.target_reference_points;
        next.next_area_zone_id = zones.next_area_zone_id;
        next.next_sector_scan_id = zones.next_sector_scan_id;
        next.next_trp_id = zones.next_trp_id;
        update_scan_name(&mut next);
        self.commit(next);
        info!("zones loaded from {}", path.display());
        Ok(())
    }

    // ----------------------------------------------------------------
    // Scan and radar selection
    // ----------------------------------------------------------------

    pub fn select_next_sector_scan_zone(&mut self) {
        self.cycle_sector_scan(true);
    }

    pub fn select_previous_sector_scan_zone(&mut self) {
        self.cycle_sector_scan(false);
    }

    fn cycle_sector_scan(&mut self, forward: bool) {
        let mut next = self.state.clone();
        let mut ids: Vec<u32> = next
            .sector_scan_zones
            .iter()
            .filter(|z| z.is_enabled)
            .map(|z| z.id)
            .collect();
        ids.sort_unstable();
        next.active_sector_scan_id = cycle(&ids, next.active_sector_scan_id, forward);
        update_scan_name(&mut next);
        self.commit(next);
    }

    pub fn select_next_trp_page(&mut self) {
        self.cycle_trp_page(true);
    }

    pub fn select_previous_trp_page(&mut self) {
        self.cycle_trp_page(false);
    }

    fn cycle_trp_page(&mut self, forward: bool) {
        let mut next = self.state.clone();
        let mut pages: Vec<u32> = next
            .target_reference_points
            .iter()
            .map(|t| t.location_page)
            .collect();
        pages.sort_unstable();
        pages.dedup();
        if let Some(page) = cycle(&pages, Some(next.active_trp_page), forward) {
            next.active_trp_page = page;
        }
        update_scan_name(&mut next);
        self.commit(next);
    }

    pub fn select_next_radar_track(&mut self) {
        self.cycle_radar_track(true);
    }

    pub fn select_previous_radar_track(&mut self) {
        self.cycle_radar_track(false);
    }

    fn cycle_radar_track(&mut self, forward: bool) {
        let mut next = self.state.clone();
        let ids: Vec<u32> = next.radar_plots.iter().map(|p| p.id).collect();
        if ids.is_empty() {
            return;
        }
        let current = if next.selected_radar_track_id == 0 {
            None
        } else {
            Some(next.selected_radar_track_id)
        };
        next.selected_radar_track_id = cycle(&ids, current, forward).unwrap_or(0);
        self.commit(next);
    }

    /// One-shot slew towards the selected radar track. Only honoured in
    /// surveillance with a real selection.
    pub fn command_radar_slew(&mut self) -> bool {
        if self.state.op_mode != OperationalMode::Surveillance
            || self.state.selected_radar_track_id == 0
        {
            return false;
        }
        let mut next = self.state.clone();
        next.previous_motion_mode = next.motion_mode;
        next.motion_mode = MotionMode::RadarSlew;
        self.commit(next);
        true
    }

    // ----------------------------------------------------------------
    // Zeroing, windage, lead angle
    // ----------------------------------------------------------------

    pub fn start_zeroing(&mut self) {
        if self.state.zeroing_mode_active {
            return;
        }
        let mut next = self.state.clone();
        next.zeroing_mode_active = true;
        recalculate_aimpoint(&mut next);
        self.commit(next);
        self.emit_zeroing();
    }

    /// Nudge the in-progress zeroing offsets. Only valid while zeroing
    /// mode is active; adjustments accumulate.
    pub fn apply_zeroing_adjustment(&mut self, d_az: f32, d_el: f32) {
        if !self.state.zeroing_mode_active {
            return;
        }
        let mut next = self.state.clone();
        next.zeroing_az_offset_deg += d_az;
        next.zeroing_el_offset_deg += d_el;
        recalculate_aimpoint(&mut next);
        self.commit(next);
        self.emit_zeroing();
    }

    pub fn finalize_zeroing(&mut self) {
        if !self.state.zeroing_mode_active {
            return;
        }
        let mut next = self.state.clone();
        next.zeroing_mode_active = false;
        next.zeroing_applied = true;
        recalculate_aimpoint(&mut next);
        self.commit(next);
        self.emit_zeroing();
    }

    pub fn clear_zeroing(&mut self) {
        let mut next = self.state.clone();
        next.zeroing_mode_active = false;
        next.zeroing_applied = false;
        next.zeroing_az_offset_deg = 0.0;
        next.zeroing_el_offset_deg = 0.0;
        recalculate_aimpoint(&mut next);
        self.commit(next);
        self.emit_zeroing();
    }

    fn emit_zeroing(&mut self) {
        self.emit(StateEvent::ZeroingStateChanged {
            mode_active: self.state.zeroing_mode_active,
            az_offset_deg: self.state.zeroing_az_offset_deg,
            el_offset_deg: self.state.zeroing_el_offset_deg,
        });
    }

    pub fn start_windage(&mut self) {
        if self.state.windage_mode_active {
            return;
        }
        let mut next = self.state.clone();
        next.windage_mode_active = true;
        self.commit(next);
        self.emit_windage();
    }

    pub fn set_windage_speed(&mut self, knots: f32) {
        if !self.state.windage_mode_active {
            return;
        }
        let mut next = self.state.clone();
        next.windage_speed_knots = knots.max(0.0);
        self.commit(next);
        self.emit_windage();
    }

    pub fn finalize_windage(&mut self) {
        if !self.state.windage_mode_active {
            return;
        }
        let mut next = self.state.clone();
        next.windage_mode_active = false;
        next.windage_applied = next.windage_speed_knots > 0.001;
        self.commit(next);
        self.emit_windage();
    }

    pub fn clear_windage(&mut self) {
        let mut next = self.state.clone();
        next.windage_mode_active = false;
        next.windage_speed_knots = 0.0;
        next.windage_applied = false;
        self.commit(next);
        self.emit_windage();
    }

    fn emit_windage(&mut self) {
        self.emit(StateEvent::WindageStateChanged {
            mode_active: self.state.windage_mode_active,
            speed_knots: self.state.windage_speed_knots,
        });
    }

    pub fn set_lead_angle_compensation_active(&mut self, active: bool) {
        if self.state.lead_angle_active == active {
            return;
        }
        let mut next = self.state.clone();
        next.lead_angle_active = active;
        if active {
            // Offsets stay until the ballistics processor reports.
            next.lead_angle_status = LeadAngleStatus::On;
        } else {
            next.lead_angle_status = LeadAngleStatus::Off;
            next.lead_angle_offset_az_deg = 0.0;
            next.lead_angle_offset_el_deg = 0.0;
        }
        recalculate_aimpoint(&mut next);
        self.commit(next);
        self.emit_lead_angle();
    }

    pub fn update_calculated_lead_offsets(
        &mut self,
        az_deg: f32,
        el_deg: f32,
        status: LeadAngleStatus,
    ) {
        let mut next = self.state.clone();
        next.lead_angle_offset_az_deg = az_deg;
        next.lead_angle_offset_el_deg = el_deg;
        next.lead_angle_status = status;
        recalculate_aimpoint(&mut next);
        self.commit(next);
        self.emit_lead_angle();
    }

    fn emit_lead_angle(&mut self) {
        self.emit(StateEvent::LeadAngleStateChanged {
            active: self.state.lead_angle_active,
            status: self.state.lead_angle_status,
            az_offset_deg: self.state.lead_angle_offset_az_deg,
            el_offset_deg: self.state.lead_angle_offset_el_deg,
        });
    }

    pub fn update_camera_optics_and_activity(
        &mut self,
        width_px: u32,
        height_px: u32,
        day_hfov_deg: f32,
        night_hfov_deg: f32,
        active_is_day: bool,
    ) {
        let mut next = self.state.clone();
        next.image_width_px = width_px;
        next.image_height_px = height_px;
        next.day_hfov_deg = day_hfov_deg;
        next.night_hfov_deg = night_hfov_deg;
        next.active_camera_is_day = active_is_day;
        recalculate_aimpoint(&mut next);
        self.commit(next);
    }

    // ----------------------------------------------------------------
    // Zone queries
    // ----------------------------------------------------------------

    /// True when the point falls inside an enabled no-fire zone.
    /// Range participates only when the zone defines positive bounds and
    /// a range is supplied.
    pub fn is_point_in_no_fire_zone(&self, az_deg: f32, el_deg: f32, range_m: Option<f32>) -> bool {
        self.state.area_zones.iter().any(|zone| {
            zone.is_enabled
                && zone.zone_type == ZoneType::NoFire
                && azimuth_in_range(az_deg, zone.start_azimuth, zone.end_azimuth)
                && el_deg >= zone.min_elevation
                && el_deg <= zone.max_elevation
                && match range_m {
                    Some(r) if zone.min_range > 0.0 && zone.max_range > 0.0 => {
                        r >= zone.min_range && r <= zone.max_range
                    }
                    _ => true,
                }
        })
    }

    /// No-traverse membership is independent of target range.
    pub fn is_point_in_no_traverse_zone(&self, az_deg: f32, el_deg: f32) -> bool {
        self.state.area_zones.iter().any(|zone| {
            zone.is_enabled
                && zone.zone_type == ZoneType::NoTraverse
                && el_deg >= zone.min_elevation
                && el_deg <= zone.max_elevation
                && azimuth_in_range(az_deg, zone.start_azimuth, zone.end_azimuth)
        })
    }
}

/// Cycle forward/backward through a sorted candidate list, wrapping.
/// Returns `None` when the list is empty.
fn cycle(candidates: &[u32], current: Option<u32>, forward: bool) -> Option<u32> {
    if candidates.is_empty() {
        return None;
    }
    let pos = current.and_then(|c| candidates.iter().position(|&x| x == c));
    let next_pos = match (pos, forward) {
        (None, true) => 0,
        (None, false) => candidates.len() - 1,
        (Some(p), true) => (p + 1) % candidates.len(),
        (Some(p), false) => (p + candidates.len() - 1) % candidates.len(),
    };
    Some(candidates[next_pos])
}

/// Recompute the derived reticle aimpoint and status texts in place.
fn recalculate_aimpoint(state: &mut SystemState) {
    let hfov = state.active_hfov_deg();
    let (x, y) = reticle_position_px(
        state.zeroing_az_offset_deg,
        state.zeroing_el_offset_deg,
        state.zeroing_applied,
        state.lead_angle_offset_az_deg,
        state.lead_angle_offset_el_deg,
        state.lead_angle_active,
        state.lead_angle_status,
        hfov,
        state.image_width_px,
        state.image_height_px,
    );
    state.reticle_aimpoint_image_x_px = x;
    state.reticle_aimpoint_image_y_px = y;

    state.zeroing_status_text = if state.zeroing_applied {
        "Z".to_string()
    } else if state.zeroing_mode_active {
        "ZEROING".to_string()
    } else {
        String::new()
    };

    state.lead_status_text = if state.lead_angle_active {
        match state.lead_angle_status {
            LeadAngleStatus::On => "LEAD ANGLE ON".to_string(),
            LeadAngleStatus::Lag => "LEAD ANGLE LAG".to_string(),
            LeadAngleStatus::ZoomOut => "ZOOM OUT".to_string(),
            LeadAngleStatus::Off => String::new(),
        }
    } else {
        String::new()
    };
}

/// Refresh the OSD scan name from the motion mode and selections.
fn update_scan_name(state: &mut SystemState) {
    state.current_scan_name = match state.motion_mode {
        MotionMode::AutoSectorScan => {
            let active = state.active_sector_scan_id.and_then(|id| {
                state
                    .sector_scan_zones
                    .iter()
                    .find(|z| z.id == id && z.is_enabled)
            });
            match active {
                Some(zone) => format!("SCAN: SECTOR {}", zone.id),
                None => "SCAN: SECTOR (none)".to_string(),
            }
        }
        MotionMode::TrpScan => format!("SCAN: TRP PAGE {}", state.active_trp_page),
        _ => String::new(),
    };
}

/// Convert tracked pixel velocity into angular rates for ballistics.
fn update_target_angular_rates(state: &mut SystemState) {
    if !state.tracker_has_valid_target {
        state.target_angular_rate_az_dps = 0.0;
        state.target_angular_rate_el_dps = 0.0;
        return;
    }
    let hfov = state.active_hfov_deg() as f64;
    if hfov <= 0.001 || state.image_width_px == 0 || state.image_height_px == 0 {
        return;
    }
    let width = state.image_width_px as f64;
    let height = state.image_height_px as f64;
    let ppd_az = width / hfov;
    let aspect = width / height;
    let vfov_deg = (2.0 * ((hfov.to_radians() / 2.0).tan() / aspect).atan()).to_degrees();
    let ppd_el = if vfov_deg > 0.001 {
        height / vfov_deg
    } else {
        ppd_az
    };
    state.target_angular_rate_az_dps = (state.tracked_velocity_px_s.0 as f64 / ppd_az) as f32;
    state.target_angular_rate_el_dps = (state.tracked_velocity_px_s.1 as f64 / ppd_el) as f32;
}

/// Automatic transitions evaluated on every commit.
///
/// Priority: E-stop engage, E-stop release, E-stop latch, station
/// disable, station enable.
fn process_auto_transitions(old: &SystemState, next: &mut SystemState) {
    if next.emergency_stop_active && !old.emergency_stop_active {
        enter_emergency_stop(next);
        return;
    }
    if !next.emergency_stop_active && old.emergency_stop_active {
        enter_idle(next);
        return;
    }
    if next.emergency_stop_active {
        // Latched: no transition may escape EmergencyStop.
        enter_emergency_stop(next);
        return;
    }
    if !next.station_enabled && old.station_enabled {
        enter_idle(next);
        return;
    }
    if next.station_enabled && !old.station_enabled && next.op_mode == OperationalMode::Idle {
        enter_surveillance(next);
    }
}

fn enter_emergency_stop(state: &mut SystemState) {
    state.op_mode = OperationalMode::EmergencyStop;
    state.motion_mode = MotionMode::Idle;
    state.tracking_phase = TrackingPhase::Off;
    state.tracker_has_valid_target = false;
    state.lead_angle_active = false;
    state.lead_angle_status = LeadAngleStatus::Off;
    state.lead_angle_offset_az_deg = 0.0;
    state.lead_angle_offset_el_deg = 0.0;
    // Zeroing and windage calibration survive an E-stop.
    recalculate_aimpoint(state);
}

fn enter_idle(state: &mut SystemState) {
    state.op_mode = OperationalMode::Idle;
    state.motion_mode = MotionMode::Idle;
    state.tracking_phase = TrackingPhase::Off;
    state.tracker_has_valid_target = false;
}

fn enter_surveillance(state: &mut SystemState) {
    state.op_mode = OperationalMode::Surveillance;
    state.motion_mode = MotionMode::Manual;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_wraps_both_ways() {
        let ids = [2u32, 5, 9];
        assert_eq!(cycle(&ids, None, true), Some(2));
        assert_eq!(cycle(&ids, Some(9), true), Some(2));
        assert_eq!(cycle(&ids, Some(2), false), Some(9));
        assert_eq!(cycle(&ids, Some(5), true), Some(9));
        assert_eq!(cycle(&[], Some(5), true), None);
    }

    #[test]
    fn add_zone_assigns_monotonic_ids() {
        let mut model = SystemStateModel::new();
        let a = model.add_area_zone(AreaZone::default());
        let b = model.add_area_zone(AreaZone::default());
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert_eq!(model.data().next_area_zone_id, 3);
    }

    #[test]
    fn modify_unknown_zone_fails_without_mutation() {
        let mut model = SystemStateModel::new();
        model.add_area_zone(AreaZone::default());
        let before = model.snapshot();
        assert!(!model.modify_area_zone(42, AreaZone::default()));
        assert_eq!(model.snapshot(), before);
    }

    #[test]
    fn engagement_requires_armed_gun_and_restores_modes() {
        let mut model = SystemStateModel::new();
        assert!(!model.command_engagement(true));

        let mut armed = model.snapshot();
        armed.gun_armed = true;
        armed.station_enabled = true;
        armed.plc21_connected = true;
        model.update(armed);
        assert_eq!(model.data().op_mode, OperationalMode::Surveillance);

        assert!(model.command_engagement(true));
        assert_eq!(model.data().op_mode, OperationalMode::Engagement);
        assert!(model.command_engagement(false));
        assert_eq!(model.data().op_mode, OperationalMode::Surveillance);
        assert_eq!(model.data().motion_mode, MotionMode::Manual);
    }

    #[test]
    fn servo_counts_scale_to_degrees() {
        let mut model = SystemStateModel::new();
        model.on_servo_az_data(&ServoAxisData {
            is_connected: true,
            position_counts: 10000.0,
            ..Default::default()
        });
        approx::assert_relative_eq!(
            model.data().gimbal_az_deg,
            16.179_775,
            epsilon = 1e-4
        );
        model.on_servo_el_data(&ServoAxisData {
            is_connected: true,
            position_counts: -10000.0,
            ..Default::default()
        });
        approx::assert_relative_eq!(model.data().gimbal_el_deg, 18.0, epsilon = 1e-5);
    }

    #[test]
    fn elevation_clamps_to_mechanical_limits() {
        let mut model = SystemStateModel::new();
        model.on_servo_el_data(&ServoAxisData {
            position_counts: -1_000_000.0,
            ..Default::default()
        });
        assert_eq!(model.data().gimbal_el_deg, EL_MAX_DEG);
    }

    #[test]
    fn radar_selection_stays_valid_after_plot_update() {
        let mut model = SystemStateModel::new();
        model.on_radar_plots(vec![
            RadarPlot {
                id: 101,
                ..Default::default()
            },
            RadarPlot {
                id: 102,
                ..Default::default()
            },
        ]);
        model.select_next_radar_track();
        assert_eq!(model.data().selected_radar_track_id, 101);

        // Selected plot disappears: selection resets to none.
        model.on_radar_plots(vec![RadarPlot {
            id: 102,
            ..Default::default()
        }]);
        assert_eq!(model.data().selected_radar_track_id, 0);
    }

    #[test]
    fn windage_applies_only_for_positive_speed() {
        let mut model = SystemStateModel::new();
        model.start_windage();
        model.set_windage_speed(0.0);
        model.finalize_windage();
        assert!(!model.data().windage_applied);

        model.start_windage();
        model.set_windage_speed(12.0);
        model.finalize_windage();
        assert!(model.data().windage_applied);
        assert_eq!(model.data().windage_speed_knots, 12.0);
    }

    #[test]
    fn scan_name_follows_motion_mode() {
        let mut model = SystemStateModel::new();
        let id = model.add_sector_scan_zone(SectorScanZone {
            is_enabled: true,
            ..Default::default()
        });
        model.select_next_sector_scan_zone();
        model.set_motion_mode(MotionMode::AutoSectorScan);
        assert_eq!(model.data().current_scan_name, format!("SCAN: SECTOR {id}"));
        model.set_motion_mode(MotionMode::Manual);
        assert!(model.data().current_scan_name.is_empty());
    }
}
