//! Joystick policy: map normalised stick events onto model operations
//! and device actions.
//!
//! The TRACK button walks the acquisition procedure one press at a
//! time; a double press (under 400 ms) aborts tracking. The hat resizes
//! the acquisition gate while the gate is open and is otherwise cached
//! for whoever wants it. TRACK and fire are gated on the deadman
//! switch.

use std::time::{Duration, Instant};

use tracing::debug;

use rampart_state::SystemStateModel;
use rampart_types::{JoystickInput, TrackingPhase};

use crate::camera::CameraController;
use crate::weapon::WeaponController;
use crate::StationAction;

pub const BUTTON_TRACK: u8 = 4;
pub const BUTTON_FIRE: u8 = 5;
pub const BUTTON_DEADMAN: u8 = 6;
/// Trigger-guard style engagement switch.
pub const BUTTON_ENGAGE: u8 = 7;
pub const BUTTON_CAMERA_SWITCH: u8 = 2;
pub const BUTTON_LAC_TOGGLE: u8 = 3;
pub const BUTTON_ZOOM_OUT: u8 = 8;
pub const BUTTON_ZOOM_IN: u8 = 9;
pub const BUTTON_THERMAL_FFC: u8 = 10;
pub const BUTTON_THERMAL_LUT: u8 = 11;

const DOUBLE_CLICK_WINDOW: Duration = Duration::from_millis(400);
/// Pixels of gate resize per hat press.
const GATE_SIZE_STEP: f32 = 4.0;

#[derive(Debug, Default)]
pub struct JoystickController {
    last_track_press: Option<Instant>,
}

impl JoystickController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle one input event. Device commands (fire solenoid, camera
    /// moves) come back as actions for the composition root to route.
    pub fn handle_input(
        &mut self,
        input: &JoystickInput,
        model: &mut SystemStateModel,
        weapon: &WeaponController,
        camera: &CameraController,
        now: Instant,
    ) -> Vec<StationAction> {
        match input {
            JoystickInput::Axis { axis, value } => {
                model.on_joystick_axis(*axis, *value);
                Vec::new()
            }
            JoystickInput::Hat { hat, value } => self.handle_hat(*hat, *value, model),
            JoystickInput::Button { button, pressed } => {
                self.handle_button(*button, *pressed, model, weapon, camera, now)
            }
            JoystickInput::Connected { name } => {
                debug!("joystick connected: {name}");
                Vec::new()
            }
            JoystickInput::Disconnected => {
                // Fail safe: a vanished stick must not keep fire alive.
                model.set_deadman_switch(false);
                weapon.stop_firing(model)
            }
        }
    }

    fn handle_hat(&mut self, hat: u8, value: u8, model: &mut SystemStateModel) -> Vec<StationAction> {
        if model.data().tracking_phase == TrackingPhase::Acquisition && hat == 0 {
            // Resize the acquisition gate: up/down trim height,
            // left/right trim width.
            match value {
                v if v & rampart_devices::joystick::HAT_UP != 0 => {
                    model.adjust_acquisition_box_size(0.0, -GATE_SIZE_STEP);
                }
                v if v & rampart_devices::joystick::HAT_DOWN != 0 => {
                    model.adjust_acquisition_box_size(0.0, GATE_SIZE_STEP);
                }
                v if v & rampart_devices::joystick::HAT_LEFT != 0 => {
                    model.adjust_acquisition_box_size(-GATE_SIZE_STEP, 0.0);
                }
                v if v & rampart_devices::joystick::HAT_RIGHT != 0 => {
                    model.adjust_acquisition_box_size(GATE_SIZE_STEP, 0.0);
                }
                _ => {}
            }
            return Vec::new();
        }
        model.on_joystick_hat(hat, value);
        Vec::new()
    }

    fn handle_button(
        &mut self,
        button: u8,
        pressed: bool,
        model: &mut SystemStateModel,
        weapon: &WeaponController,
        camera: &CameraController,
        now: Instant,
    ) -> Vec<StationAction> {
        match (button, pressed) {
            (BUTTON_DEADMAN, _) => {
                model.set_deadman_switch(pressed);
                if !pressed {
                    // Releasing the deadman always de-energises the
                    // solenoid.
                    return weapon.stop_firing(model);
                }
                Vec::new()
            }
            (BUTTON_TRACK, true) => {
                if !model.data().deadman_switch_active {
                    debug!("TRACK ignored: deadman switch not held");
                    return Vec::new();
                }
                let double = self
                    .last_track_press
                    .map(|t| now.duration_since(t) < DOUBLE_CLICK_WINDOW)
                    .unwrap_or(false);
                self.last_track_press = Some(now);

                if double {
                    model.stop_tracking();
                    return Vec::new();
                }
                match model.data().tracking_phase {
                    TrackingPhase::Off => {
                        model.start_tracking_acquisition();
                    }
                    TrackingPhase::Acquisition => {
                        model.request_tracker_lock_on();
                    }
                    other => debug!("TRACK press in phase {other:?} ignored"),
                }
                Vec::new()
            }
            (BUTTON_FIRE, true) => weapon.start_firing(model),
            (BUTTON_FIRE, false) => weapon.stop_firing(model),
            (BUTTON_ENGAGE, _) => {
                model.command_engagement(pressed);
                if !pressed {
                    // Leaving engagement also closes the solenoid.
                    return weapon.stop_firing(model);
                }
                Vec::new()
            }
            (BUTTON_CAMERA_SWITCH, true) => {
                camera.toggle_active_camera(model);
                Vec::new()
            }
            (BUTTON_ZOOM_IN, true) => camera.zoom_in(model.data()),
            (BUTTON_ZOOM_IN, false) | (BUTTON_ZOOM_OUT, false) => {
                camera.zoom_stop(model.data())
            }
            (BUTTON_ZOOM_OUT, true) => camera.zoom_out(model.data()),
            (BUTTON_THERMAL_FFC, true) => camera.trigger_ffc(),
            (BUTTON_THERMAL_LUT, true) => camera.step_lut(model.data(), true),
            (BUTTON_LAC_TOGGLE, true) => {
                if model.data().deadman_switch_active {
                    let active = model.data().lead_angle_active;
                    model.set_lead_angle_compensation_active(!active);
                }
                Vec::new()
            }
            _ => {
                model.on_joystick_button(button, pressed);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rampart_devices::plc42::Plc42Command;
    use rampart_types::{MotionMode, OperationalMode};

    fn surveillance_model() -> SystemStateModel {
        let mut model = SystemStateModel::new();
        let mut state = model.snapshot();
        state.station_enabled = true;
        model.update(state);
        model
    }

    fn press(button: u8) -> JoystickInput {
        JoystickInput::Button {
            button,
            pressed: true,
        }
    }

    #[test]
    fn track_walks_acquisition_then_lock_pending() {
        let mut model = surveillance_model();
        let mut joystick = JoystickController::new();
        let weapon = WeaponController::new();
        let camera = CameraController::new();
        let t0 = Instant::now();

        // No deadman: ignored.
        joystick.handle_input(&press(BUTTON_TRACK), &mut model, &weapon, &camera, t0);
        assert_eq!(model.data().tracking_phase, TrackingPhase::Off);

        joystick.handle_input(
            &press(BUTTON_DEADMAN),
            &mut model,
            &weapon,
            &camera,
            t0,
        );
        joystick.handle_input(&press(BUTTON_TRACK), &mut model, &weapon, &camera, t0);
        assert_eq!(model.data().tracking_phase, TrackingPhase::Acquisition);

        // Second press outside the double-click window continues the
        // procedure.
        joystick.handle_input(
            &press(BUTTON_TRACK),
            &mut model,
            &weapon,
            &camera,
            t0 + Duration::from_millis(600),
        );
        assert_eq!(model.data().tracking_phase, TrackingPhase::LockPending);
    }

    #[test]
    fn double_click_aborts_tracking() {
        let mut model = surveillance_model();
        let mut joystick = JoystickController::new();
        let weapon = WeaponController::new();
        let camera = CameraController::new();
        let t0 = Instant::now();

        joystick.handle_input(&press(BUTTON_DEADMAN), &mut model, &weapon, &camera, t0);
        joystick.handle_input(&press(BUTTON_TRACK), &mut model, &weapon, &camera, t0);
        assert_eq!(model.data().tracking_phase, TrackingPhase::Acquisition);

        joystick.handle_input(
            &press(BUTTON_TRACK),
            &mut model,
            &weapon,
            &camera,
            t0 + Duration::from_millis(150),
        );
        assert_eq!(model.data().tracking_phase, TrackingPhase::Off);
        assert_eq!(model.data().op_mode, OperationalMode::Surveillance);
        assert_eq!(model.data().motion_mode, MotionMode::Manual);
    }

    #[test]
    fn hat_resizes_gate_during_acquisition() {
        let mut model = surveillance_model();
        let mut joystick = JoystickController::new();
        let weapon = WeaponController::new();
        let camera = CameraController::new();
        let t0 = Instant::now();

        joystick.handle_input(&press(BUTTON_DEADMAN), &mut model, &weapon, &camera, t0);
        joystick.handle_input(&press(BUTTON_TRACK), &mut model, &weapon, &camera, t0);
        let before = model.data().acquisition_box;

        joystick.handle_input(
            &JoystickInput::Hat {
                hat: 0,
                value: rampart_devices::joystick::HAT_RIGHT,
            },
            &mut model,
            &weapon,
            &camera,
            t0,
        );
        let after = model.data().acquisition_box;
        assert_eq!(after.w, before.w + GATE_SIZE_STEP);
        assert_eq!(after.h, before.h);
    }

    #[test]
    fn deadman_release_stops_firing() {
        let mut model = surveillance_model();
        let mut joystick = JoystickController::new();
        let weapon = WeaponController::new();
        let camera = CameraController::new();
        let t0 = Instant::now();

        let actions = joystick.handle_input(
            &JoystickInput::Button {
                button: BUTTON_DEADMAN,
                pressed: false,
            },
            &mut model,
            &weapon,
            &camera,
            t0,
        );
        assert_eq!(
            actions,
            vec![StationAction::Plc42(Plc42Command::SetSolenoidState(0))]
        );
    }

    #[test]
    fn engage_button_enters_and_leaves_engagement() {
        let mut model = surveillance_model();
        let mut state = model.snapshot();
        state.gun_armed = true;
        model.update(state);

        let mut joystick = JoystickController::new();
        let weapon = WeaponController::new();
        let camera = CameraController::new();
        let t0 = Instant::now();

        joystick.handle_input(&press(BUTTON_ENGAGE), &mut model, &weapon, &camera, t0);
        assert_eq!(model.data().op_mode, OperationalMode::Engagement);

        let actions = joystick.handle_input(
            &JoystickInput::Button {
                button: BUTTON_ENGAGE,
                pressed: false,
            },
            &mut model,
            &weapon,
            &camera,
            t0,
        );
        assert_eq!(model.data().op_mode, OperationalMode::Surveillance);
        assert_eq!(
            actions,
            vec![StationAction::Plc42(Plc42Command::SetSolenoidState(0))]
        );
    }

    #[test]
    fn zoom_buttons_route_to_the_active_camera() {
        let mut model = surveillance_model();
        let mut joystick = JoystickController::new();
        let weapon = WeaponController::new();
        let camera = CameraController::new();
        let actions = joystick.handle_input(
            &press(BUTTON_ZOOM_IN),
            &mut model,
            &weapon,
            &camera,
            Instant::now(),
        );
        assert_eq!(
            actions,
            vec![StationAction::DayCamera(
                rampart_devices::day_camera::DayCameraCommand::ZoomIn
            )]
        );
    }

    #[test]
    fn camera_switch_button_flips_active_camera() {
        let mut model = surveillance_model();
        let mut joystick = JoystickController::new();
        let weapon = WeaponController::new();
        let camera = CameraController::new();
        joystick.handle_input(
            &press(BUTTON_CAMERA_SWITCH),
            &mut model,
            &weapon,
            &camera,
            Instant::now(),
        );
        assert!(!model.data().active_camera_is_day);
    }
}
