//! Camera control: zoom/focus pass-through to whichever camera is
//! active, thermal housekeeping (FFC, LUT stepping) and keeping the
//! model's optics block in sync with the working geometry.

use rampart_devices::day_camera::DayCameraCommand;
use rampart_devices::night_camera::{NightCameraCommand, MAX_LUT_INDEX};
use rampart_state::SystemStateModel;
use rampart_types::SystemState;

use crate::{StationAction, OUTPUT_HEIGHT_PX, OUTPUT_WIDTH_PX};

#[derive(Debug, Default)]
pub struct CameraController;

impl CameraController {
    pub fn new() -> Self {
        CameraController
    }

    /// Push the active optics into the model so the aimpoint math uses
    /// the right HFOV and image size.
    pub fn sync_optics(&self, model: &mut SystemStateModel) {
        let state = model.snapshot();
        model.update_camera_optics_and_activity(
            OUTPUT_WIDTH_PX as u32,
            OUTPUT_HEIGHT_PX as u32,
            state.day_hfov_deg,
            state.night_hfov_deg,
            state.active_camera_is_day,
        );
    }

    pub fn zoom_in(&self, state: &SystemState) -> Vec<StationAction> {
        if state.active_camera_is_day {
            vec![StationAction::DayCamera(DayCameraCommand::ZoomIn)]
        } else {
            let level = (state.night_zoom_level + 1).min(3);
            vec![StationAction::NightCamera(NightCameraCommand::SetDigitalZoom(level))]
        }
    }

    pub fn zoom_out(&self, state: &SystemState) -> Vec<StationAction> {
        if state.active_camera_is_day {
            vec![StationAction::DayCamera(DayCameraCommand::ZoomOut)]
        } else {
            let level = state.night_zoom_level.saturating_sub(1);
            vec![StationAction::NightCamera(NightCameraCommand::SetDigitalZoom(level))]
        }
    }

    pub fn zoom_stop(&self, state: &SystemState) -> Vec<StationAction> {
        if state.active_camera_is_day {
            vec![StationAction::DayCamera(DayCameraCommand::ZoomStop)]
        } else {
            Vec::new()
        }
    }

    pub fn focus_near(&self, state: &SystemState) -> Vec<StationAction> {
        if state.active_camera_is_day {
            vec![StationAction::DayCamera(DayCameraCommand::FocusNear)]
        } else {
            Vec::new()
        }
    }

    pub fn focus_far(&self, state: &SystemState) -> Vec<StationAction> {
        if state.active_camera_is_day {
            vec![StationAction::DayCamera(DayCameraCommand::FocusFar)]
        } else {
            Vec::new()
        }
    }

    /// Trigger a thermal flat-field correction.
    pub fn trigger_ffc(&self) -> Vec<StationAction> {
        vec![StationAction::NightCamera(NightCameraCommand::DoFfc)]
    }

    /// Step the thermal palette LUT, clamped to [0, 12].
    pub fn step_lut(&self, state: &SystemState, forward: bool) -> Vec<StationAction> {
        let next = if forward {
            (state.night_lut_index + 1).min(MAX_LUT_INDEX)
        } else {
            state.night_lut_index.saturating_sub(1)
        };
        vec![StationAction::NightCamera(NightCameraCommand::SetLut(next))]
    }

    /// Flip the active camera and re-sync optics.
    pub fn toggle_active_camera(&self, model: &mut SystemStateModel) {
        let day = !model.data().active_camera_is_day;
        model.set_active_camera_is_day(day);
        self.sync_optics(model);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zoom_routes_to_active_camera() {
        let controller = CameraController::new();
        let mut state = SystemState::default();
        assert_eq!(
            controller.zoom_in(&state),
            vec![StationAction::DayCamera(DayCameraCommand::ZoomIn)]
        );

        state.active_camera_is_day = false;
        state.night_zoom_level = 1;
        assert_eq!(
            controller.zoom_in(&state),
            vec![StationAction::NightCamera(NightCameraCommand::SetDigitalZoom(2))]
        );
    }

    #[test]
    fn lut_steps_clamp_at_both_ends() {
        let controller = CameraController::new();
        let mut state = SystemState::default();
        state.night_lut_index = MAX_LUT_INDEX;
        assert_eq!(
            controller.step_lut(&state, true),
            vec![StationAction::NightCamera(NightCameraCommand::SetLut(MAX_LUT_INDEX))]
        );
        state.night_lut_index = 0;
        assert_eq!(
            controller.step_lut(&state, false),
            vec![StationAction::NightCamera(NightCameraCommand::SetLut(0))]
        );
    }

    #[test]
    fn toggling_camera_updates_model_and_aimpoint_inputs() {
        let controller = CameraController::new();
        let mut model = SystemStateModel::new();
        assert!(model.data().active_camera_is_day);
        controller.toggle_active_camera(&mut model);
        assert!(!model.data().active_camera_is_day);
        assert_eq!(model.data().image_width_px, 1024);
    }
}
