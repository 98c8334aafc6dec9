//! Gimbal motion control: translate the motion mode plus operator input
//! into azimuth/elevation rate commands, clamp at mechanical limits and
//! refuse to enter no-traverse zones.

use std::time::Instant;

use tracing::{debug, info};

use rampart_devices::plc42::Plc42Command;
use rampart_state::{SystemStateModel, EL_MAX_DEG, EL_MIN_DEG};
use rampart_types::MotionMode;

use crate::StationAction;

/// Working image geometry used for pixel-to-degree conversion.
pub const OUTPUT_WIDTH_PX: f32 = 1024.0;
pub const OUTPUT_HEIGHT_PX: f32 = 768.0;

/// Full-scale manual slew rate at the top speed-switch position.
const MAX_MANUAL_RATE_DPS: f32 = 60.0;
/// Rate ceiling for the auto-track loop.
const MAX_TRACK_RATE_DPS: f32 = 30.0;
/// Fixed slew rate for TRP moves and radar slews.
const SLEW_RATE_DPS: f32 = 20.0;
/// Arrival tolerance for point moves.
const ARRIVAL_TOLERANCE_DEG: f32 = 0.5;
/// Rate command register scaling (hundredths of a degree per second).
const RATE_TO_REGISTER: f32 = 100.0;
/// Lookahead used for the no-traverse clamp.
const TRAVERSE_LOOKAHEAD_S: f32 = 0.25;

/// Bounded proportional-integral loop for one axis.
#[derive(Debug, Default)]
struct AxisPi {
    integral: f32,
}

impl AxisPi {
    const KP: f32 = 2.5;
    const KI: f32 = 0.4;
    const INTEGRAL_LIMIT: f32 = 10.0;

    fn step(&mut self, error_deg: f32, dt_s: f32) -> f32 {
        self.integral = (self.integral + error_deg * dt_s)
            .clamp(-Self::INTEGRAL_LIMIT, Self::INTEGRAL_LIMIT);
        (Self::KP * error_deg + Self::KI * self.integral)
            .clamp(-MAX_TRACK_RATE_DPS, MAX_TRACK_RATE_DPS)
    }

    fn reset(&mut self) {
        self.integral = 0.0;
    }
}

/// Sector-scan sweep direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SweepDir {
    Forward,
    Reverse,
}

pub struct GimbalController {
    az_pi: AxisPi,
    el_pi: AxisPi,
    sweep: SweepDir,
    trp_index: usize,
    dwell_until: Option<Instant>,
    last_tick: Option<Instant>,
    /// Last rate words put on the wire; duplicates are suppressed so a
    /// steady state does not flood the PLC.
    last_sent: Option<(u32, u16, u32, u16)>,
}

impl Default for GimbalController {
    fn default() -> Self {
        Self::new()
    }
}

impl GimbalController {
    pub fn new() -> Self {
        GimbalController {
            az_pi: AxisPi::default(),
            el_pi: AxisPi::default(),
            sweep: SweepDir::Forward,
            trp_index: 0,
            dwell_until: None,
            last_tick: None,
            last_sent: None,
        }
    }

    /// One control tick. Mutates the model's zone flags and returns the
    /// rate commands for the station PLC.
    pub fn tick(&mut self, model: &mut SystemStateModel, now: Instant) -> Vec<StationAction> {
        let dt = self
            .last_tick
            .map(|t| now.duration_since(t).as_secs_f32())
            .unwrap_or(0.02)
            .clamp(0.001, 0.2);
        self.last_tick = Some(now);

        let state = model.snapshot();
        let (mut az_rate, mut el_rate) = match state.motion_mode {
            MotionMode::Idle => {
                self.az_pi.reset();
                self.el_pi.reset();
                (0.0, 0.0)
            }
            MotionMode::Manual => self.manual_rates(&state),
            MotionMode::AutoTrack => self.auto_track_rates(&state, dt),
            MotionMode::AutoSectorScan => self.sector_scan_rates(&state),
            MotionMode::TrpScan => self.trp_scan_rates(&state, model, now),
            MotionMode::RadarSlew => self.radar_slew_rates(&state, model),
        };

        // Mechanical elevation limits.
        if (state.gimbal_el_deg >= EL_MAX_DEG && el_rate > 0.0)
            || (state.gimbal_el_deg <= EL_MIN_DEG && el_rate < 0.0)
        {
            el_rate = 0.0;
        }

        // No-traverse clamp: test where the azimuth is heading.
        let predicted_az =
            (state.gimbal_az_deg + az_rate * TRAVERSE_LOOKAHEAD_S).rem_euclid(360.0);
        let blocked = az_rate != 0.0
            && model.is_point_in_no_traverse_zone(predicted_az, state.gimbal_el_deg);
        if blocked {
            az_rate = 0.0;
        }
        if state.is_reticle_in_no_traverse_zone != blocked {
            model.set_point_in_no_traverse_zone(blocked);
        }

        // Keep the no-fire overlay flag current with the aimpoint.
        let in_no_fire = model.is_point_in_no_fire_zone(
            state.gimbal_az_deg,
            state.gimbal_el_deg,
            (state.lrf_distance_m > 0.0).then_some(state.lrf_distance_m),
        );
        if state.is_reticle_in_no_fire_zone != in_no_fire {
            model.set_point_in_no_fire_zone(in_no_fire);
        }

        let words = rate_words(az_rate, el_rate);
        if self.last_sent == Some(words) {
            return Vec::new();
        }
        self.last_sent = Some(words);
        rate_commands(words)
    }

    fn manual_rates(&mut self, state: &rampart_types::SystemState) -> (f32, f32) {
        self.az_pi.reset();
        self.el_pi.reset();

        // The panel home switch overrides the stick and slews to the
        // stow position.
        if state.goto_home_position {
            let az_err = signed_shortest_arc(state.gimbal_az_deg, 0.0);
            let el_err = -state.gimbal_el_deg;
            return (
                az_err.clamp(-SLEW_RATE_DPS, SLEW_RATE_DPS),
                el_err.clamp(-SLEW_RATE_DPS, SLEW_RATE_DPS),
            );
        }

        let speed_scale = (state.gimbal_speed.max(1) as f32 / 5.0).min(1.0);
        let az = state.joystick_az * MAX_MANUAL_RATE_DPS * speed_scale;
        // Stick forward (negative Y) raises the elevation.
        let el = -state.joystick_el * MAX_MANUAL_RATE_DPS * speed_scale;
        (az, el)
    }

    /// Drive the tracked target centre onto the reticle aimpoint.
    fn auto_track_rates(&mut self, state: &rampart_types::SystemState, dt: f32) -> (f32, f32) {
        if !state.tracker_has_valid_target {
            return (0.0, 0.0);
        }
        let hfov = state.active_hfov_deg();
        if hfov <= 0.001 {
            return (0.0, 0.0);
        }
        let width = state.image_width_px.max(1) as f32;
        let height = state.image_height_px.max(1) as f32;
        let ppd_az = width / hfov;
        let aspect = width / height;
        let vfov =
            (2.0 * ((hfov.to_radians() / 2.0).tan() / aspect).atan()).to_degrees();
        let ppd_el = if vfov > 0.001 { height / vfov } else { ppd_az };

        let err_az = (state.tracked_center_px.0 - state.reticle_aimpoint_image_x_px) / ppd_az;
        // Positive pixel error downward means the gun must go down.
        let err_el = -(state.tracked_center_px.1 - state.reticle_aimpoint_image_y_px) / ppd_el;

        (self.az_pi.step(err_az, dt), self.el_pi.step(err_el, dt))
    }

    /// Ping-pong the azimuth between the two corners at scan speed,
    /// holding the first corner's elevation.
    fn sector_scan_rates(&mut self, state: &rampart_types::SystemState) -> (f32, f32) {
        let Some(zone) = state
            .active_sector_scan_id
            .and_then(|id| state.sector_scan_zones.iter().find(|z| z.id == id))
            .filter(|z| z.is_enabled)
        else {
            return (0.0, 0.0);
        };

        let speed = zone.scan_speed.clamp(1.0, 50.0);
        let (from, to) = match self.sweep {
            SweepDir::Forward => (zone.az1, zone.az2),
            SweepDir::Reverse => (zone.az2, zone.az1),
        };
        let remaining = forward_distance_deg(state.gimbal_az_deg, to);
        let span = forward_distance_deg(from, to);
        if remaining < ARRIVAL_TOLERANCE_DEG || remaining > span + 5.0 {
            self.sweep = match self.sweep {
                SweepDir::Forward => SweepDir::Reverse,
                SweepDir::Reverse => SweepDir::Forward,
            };
            debug!("sector scan reversing at {:.1} deg", state.gimbal_az_deg);
            return (0.0, 0.0);
        }

        let el_err = zone.el1 - state.gimbal_el_deg;
        let el_rate = el_err.clamp(-SLEW_RATE_DPS, SLEW_RATE_DPS);
        (speed, el_rate)
    }

    /// Visit the active page's TRPs in order, dwelling `halt_time` at
    /// each.
    fn trp_scan_rates(
        &mut self,
        state: &rampart_types::SystemState,
        _model: &mut SystemStateModel,
        now: Instant,
    ) -> (f32, f32) {
        let mut page: Vec<_> = state
            .target_reference_points
            .iter()
            .filter(|t| t.location_page == state.active_trp_page)
            .collect();
        if page.is_empty() {
            return (0.0, 0.0);
        }
        page.sort_by_key(|t| t.trp_in_page);
        let target = page[self.trp_index % page.len()];

        if let Some(until) = self.dwell_until {
            if now < until {
                return (0.0, 0.0);
            }
            self.dwell_until = None;
            self.trp_index = (self.trp_index + 1) % page.len();
            return (0.0, 0.0);
        }

        let az_err = signed_shortest_arc(state.gimbal_az_deg, target.azimuth);
        let el_err = target.elevation - state.gimbal_el_deg;
        if az_err.abs() < ARRIVAL_TOLERANCE_DEG && el_err.abs() < ARRIVAL_TOLERANCE_DEG {
            self.dwell_until =
                Some(now + std::time::Duration::from_secs_f32(target.halt_time.max(0.0)));
            return (0.0, 0.0);
        }
        (
            az_err.clamp(-SLEW_RATE_DPS, SLEW_RATE_DPS),
            el_err.clamp(-SLEW_RATE_DPS, SLEW_RATE_DPS),
        )
    }

    /// One-shot slew to the selected radar track; revert to the
    /// previous motion mode on arrival.
    fn radar_slew_rates(
        &mut self,
        state: &rampart_types::SystemState,
        model: &mut SystemStateModel,
    ) -> (f32, f32) {
        let Some(plot) = state
            .radar_plots
            .iter()
            .find(|p| p.id == state.selected_radar_track_id)
        else {
            model.set_motion_mode(state.previous_motion_mode);
            return (0.0, 0.0);
        };
        let az_err = signed_shortest_arc(state.gimbal_az_deg, plot.azimuth_deg);
        if az_err.abs() < ARRIVAL_TOLERANCE_DEG {
            info!("radar slew complete at {:.1} deg", state.gimbal_az_deg);
            model.set_motion_mode(state.previous_motion_mode);
            return (0.0, 0.0);
        }
        (az_err.clamp(-SLEW_RATE_DPS, SLEW_RATE_DPS), 0.0)
    }
}

/// Degrees travelled moving clockwise (increasing azimuth) from `from`
/// to `to`.
fn forward_distance_deg(from: f32, to: f32) -> f32 {
    (to - from).rem_euclid(360.0)
}

/// Signed shortest arc from `from` to `to`, in [-180, 180).
fn signed_shortest_arc(from: f32, to: f32) -> f32 {
    let mut d = (to - from).rem_euclid(360.0);
    if d >= 180.0 {
        d -= 360.0;
    }
    d
}

/// Quantise signed rates into the PLC's speed/direction register words.
fn rate_words(az_rate_dps: f32, el_rate_dps: f32) -> (u32, u16, u32, u16) {
    (
        (az_rate_dps.abs() * RATE_TO_REGISTER) as u32,
        u16::from(az_rate_dps < 0.0),
        (el_rate_dps.abs() * RATE_TO_REGISTER) as u32,
        u16::from(el_rate_dps < 0.0),
    )
}

fn rate_commands((az_speed, az_dir, el_speed, el_dir): (u32, u16, u32, u16)) -> Vec<StationAction> {
    vec![
        StationAction::Plc42(Plc42Command::SetAzimuthSpeed(az_speed)),
        StationAction::Plc42(Plc42Command::SetAzimuthDirection(az_dir)),
        StationAction::Plc42(Plc42Command::SetElevationSpeed(el_speed)),
        StationAction::Plc42(Plc42Command::SetElevationDirection(el_dir)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rampart_types::{AreaZone, MotionMode, ZoneType};

    fn extract_az_speed(actions: &[StationAction]) -> (u32, u16) {
        let mut speed = 0;
        let mut dir = 0;
        for action in actions {
            match action {
                StationAction::Plc42(Plc42Command::SetAzimuthSpeed(s)) => speed = *s,
                StationAction::Plc42(Plc42Command::SetAzimuthDirection(d)) => dir = *d,
                _ => {}
            }
        }
        (speed, dir)
    }

    #[test]
    fn arc_helpers() {
        assert_relative_eq!(signed_shortest_arc(350.0, 10.0), 20.0);
        assert_relative_eq!(signed_shortest_arc(10.0, 350.0), -20.0);
        assert_relative_eq!(forward_distance_deg(350.0, 10.0), 20.0);
    }

    #[test]
    fn manual_mode_follows_joystick_and_speed_switch() {
        let mut model = SystemStateModel::new();
        let mut state = model.snapshot();
        state.station_enabled = true;
        model.update(state);
        model.on_joystick_axis(0, 0.5);

        let mut gimbal = GimbalController::new();
        let actions = gimbal.tick(&mut model, Instant::now());
        let (speed, dir) = extract_az_speed(&actions);
        // gimbal_speed default 1 => scale 0.2; 0.5 * 60 * 0.2 = 6 dps.
        assert_eq!(speed, 600);
        assert_eq!(dir, 0);

        model.on_joystick_axis(0, -0.5);
        let actions = gimbal.tick(&mut model, Instant::now());
        let (_, dir) = extract_az_speed(&actions);
        assert_eq!(dir, 1);
    }

    #[test]
    fn no_traverse_zone_stops_azimuth_and_sets_flag() {
        let mut model = SystemStateModel::new();
        model.add_area_zone(AreaZone {
            zone_type: ZoneType::NoTraverse,
            is_enabled: true,
            start_azimuth: 0.0,
            end_azimuth: 30.0,
            min_elevation: -20.0,
            max_elevation: 60.0,
            ..Default::default()
        });
        let mut state = model.snapshot();
        state.station_enabled = true;
        model.update(state);
        // Full right deflection aiming straight into the zone from 359.
        let mut state = model.snapshot();
        state.gimbal_az_deg = 359.0;
        model.update(state);
        model.on_joystick_axis(0, 1.0);

        let mut gimbal = GimbalController::new();
        let actions = gimbal.tick(&mut model, Instant::now());
        let (speed, _) = extract_az_speed(&actions);
        assert_eq!(speed, 0);
        assert!(model.data().is_reticle_in_no_traverse_zone);
    }

    #[test]
    fn auto_track_steers_toward_reticle() {
        let mut model = SystemStateModel::new();
        let mut state = model.snapshot();
        state.station_enabled = true;
        model.update(state);
        let mut state = model.snapshot();
        state.motion_mode = MotionMode::AutoTrack;
        state.tracker_has_valid_target = true;
        // Target right of the reticle: gimbal must slew right.
        state.tracked_center_px = (612.0, 384.0);
        model.update(state);

        let mut gimbal = GimbalController::new();
        let actions = gimbal.tick(&mut model, Instant::now());
        let (speed, dir) = extract_az_speed(&actions);
        assert!(speed > 0);
        assert_eq!(dir, 0);
    }

    #[test]
    fn idle_mode_commands_zero_rates() {
        let mut model = SystemStateModel::new();
        let mut gimbal = GimbalController::new();
        let actions = gimbal.tick(&mut model, Instant::now());
        let (speed, _) = extract_az_speed(&actions);
        assert_eq!(speed, 0);
    }
}
