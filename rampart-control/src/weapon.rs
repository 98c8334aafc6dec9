//! Weapon control: ammunition handling over the linear actuator,
//! solenoid mode/state, fire permission and the periodic lead-angle
//! refresh.

use tracing::{debug, info, warn};

use rampart_ballistics::{compute_lead, LeadInputs};
use rampart_devices::plc42::Plc42Command;
use rampart_devices::servo_actuator::ActuatorCommand;
use rampart_state::SystemStateModel;
use rampart_types::{LeadAngleStatus, OperationalMode, SystemState};

use crate::StationAction;

// Actuator positions (sensor counts) for the ammunition sequences.
const POS_EXTENDED: i64 = 63_000;
const POS_CHARGE_FORWARD: i64 = 50_000;
const POS_CHARGE_BACK: i64 = 2_500;
const POS_RETRACTED: i64 = 2_048;

/// Ammunition handling state machine. Each transition is gated on the
/// actuator reporting the commanded position reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AmmoState {
    #[default]
    Idle,
    LoadExtend,
    LoadCharge1Back,
    LoadCharge2Forward,
    LoadCharge2Back,
    Loaded,
    UnloadCharge1Forward,
    UnloadCharge1Back,
    UnloadCharge2Forward,
    UnloadCharge2Back,
    UnloadRetract,
    Cleared,
}

#[derive(Debug, Default)]
pub struct WeaponController {
    ammo_state: AmmoState,
    previous: Option<SystemState>,
}

impl WeaponController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ammo_state(&self) -> AmmoState {
        self.ammo_state
    }

    /// React to a state change: ammo switch edges start the sequences,
    /// fire-mode changes retune the solenoid.
    pub fn on_state_changed(&mut self, state: &SystemState) -> Vec<StationAction> {
        let mut actions = Vec::new();
        let previous = self.previous.replace(state.clone());

        let ammo_edge = previous
            .as_ref()
            .map(|p| p.ammo_loaded != state.ammo_loaded)
            .unwrap_or(state.ammo_loaded);
        if ammo_edge {
            if state.ammo_loaded {
                info!("ammunition load sequence started");
                self.ammo_state = AmmoState::LoadExtend;
                actions.push(StationAction::Actuator(ActuatorCommand::MoveTo(
                    POS_EXTENDED,
                )));
            } else {
                info!("ammunition clear sequence started");
                self.ammo_state = AmmoState::UnloadCharge1Forward;
                actions.push(StationAction::Actuator(ActuatorCommand::MoveTo(
                    POS_CHARGE_FORWARD,
                )));
            }
        }

        let mode_changed = previous
            .as_ref()
            .map(|p| p.fire_mode != state.fire_mode)
            .unwrap_or(true);
        if mode_changed {
            actions.push(StationAction::Plc42(Plc42Command::SetSolenoidMode(
                state.fire_mode.solenoid_code(),
            )));
        }

        actions
    }

    /// Advance the ammunition sequence after a position-reached report.
    pub fn on_actuator_position_reached(&mut self) -> Vec<StationAction> {
        use AmmoState::*;
        let (next, command) = match self.ammo_state {
            LoadExtend => (LoadCharge1Back, Some(POS_CHARGE_BACK)),
            LoadCharge1Back => (LoadCharge2Forward, Some(POS_CHARGE_FORWARD)),
            LoadCharge2Forward => (LoadCharge2Back, Some(POS_CHARGE_BACK)),
            LoadCharge2Back => {
                info!("ammunition load sequence complete");
                (Loaded, None)
            }
            UnloadCharge1Forward => (UnloadCharge1Back, Some(POS_CHARGE_BACK)),
            UnloadCharge1Back => (UnloadCharge2Forward, Some(POS_CHARGE_FORWARD)),
            UnloadCharge2Forward => (UnloadCharge2Back, Some(POS_CHARGE_BACK)),
            UnloadCharge2Back => (UnloadRetract, Some(POS_RETRACTED)),
            UnloadRetract => {
                info!("ammunition clear sequence complete, gun is cleared");
                (Cleared, None)
            }
            other => {
                debug!("actuator reached position in state {other:?}, no action");
                (other, None)
            }
        };
        self.ammo_state = next;
        command
            .map(|pos| vec![StationAction::Actuator(ActuatorCommand::MoveTo(pos))])
            .unwrap_or_default()
    }

    /// Command the firing solenoid. Denied attempts are logged and
    /// ignored per the safety policy.
    pub fn start_firing(&self, model: &mut SystemStateModel) -> Vec<StationAction> {
        let state = model.data();
        if state.op_mode != OperationalMode::Engagement {
            warn!("fire request outside engagement mode, ignored");
            return Vec::new();
        }
        if !state.may_fire() {
            warn!("fire request denied by safety predicate");
            return Vec::new();
        }
        info!("firing solenoid energised");
        model.begin_firing_phase();
        vec![StationAction::Plc42(Plc42Command::SetSolenoidState(1))]
    }

    pub fn stop_firing(&self, model: &mut SystemStateModel) -> Vec<StationAction> {
        model.end_firing_phase();
        vec![StationAction::Plc42(Plc42Command::SetSolenoidState(0))]
    }

    /// Periodic fire-control update: feed the ballistics processor and
    /// publish the lead offsets while LAC is active.
    pub fn update_fire_control(&mut self, model: &mut SystemStateModel) {
        let state = model.snapshot();
        if !state.lead_angle_active {
            if state.lead_angle_offset_az_deg != 0.0
                || state.lead_angle_offset_el_deg != 0.0
                || state.lead_angle_status != LeadAngleStatus::Off
            {
                model.update_calculated_lead_offsets(0.0, 0.0, LeadAngleStatus::Off);
            }
            return;
        }

        let crosswind = if state.windage_applied {
            state.windage_speed_knots as f64
        } else {
            0.0
        };
        let tof_seed = if state.lrf_distance_m > 0.0 && state.muzzle_velocity_mps > 0.0 {
            (state.lrf_distance_m / state.muzzle_velocity_mps) as f64
        } else {
            0.0
        };
        let solution = compute_lead(&LeadInputs {
            target_range_m: state.lrf_distance_m as f64,
            target_rate_az_dps: state.target_angular_rate_az_dps as f64,
            target_rate_el_dps: state.target_angular_rate_el_dps as f64,
            muzzle_velocity_mps: state.muzzle_velocity_mps as f64,
            tof_seed_s: tof_seed,
            camera_hfov_deg: state.active_hfov_deg() as f64,
            crosswind_knots: crosswind,
        });
        model.update_calculated_lead_offsets(
            solution.lead_az_deg as f32,
            solution.lead_el_deg as f32,
            solution.status,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rampart_types::FireMode;

    fn armed_engaged_state() -> SystemState {
        SystemState {
            station_enabled: true,
            gun_armed: true,
            deadman_switch_active: true,
            op_mode: OperationalMode::Engagement,
            ..Default::default()
        }
    }

    #[test]
    fn load_sequence_walks_the_charge_cycle() {
        let mut weapon = WeaponController::new();
        let mut state = SystemState::default();
        weapon.on_state_changed(&state);

        state.ammo_loaded = true;
        let actions = weapon.on_state_changed(&state);
        assert!(actions
            .contains(&StationAction::Actuator(ActuatorCommand::MoveTo(63_000))));
        assert_eq!(weapon.ammo_state(), AmmoState::LoadExtend);

        let expected = [
            (AmmoState::LoadCharge1Back, Some(2_500)),
            (AmmoState::LoadCharge2Forward, Some(50_000)),
            (AmmoState::LoadCharge2Back, Some(2_500)),
            (AmmoState::Loaded, None),
        ];
        for (want_state, want_pos) in expected {
            let actions = weapon.on_actuator_position_reached();
            assert_eq!(weapon.ammo_state(), want_state);
            match want_pos {
                Some(pos) => assert_eq!(
                    actions,
                    vec![StationAction::Actuator(ActuatorCommand::MoveTo(pos))]
                ),
                None => assert!(actions.is_empty()),
            }
        }
    }

    #[test]
    fn unload_sequence_ends_cleared_and_retracted() {
        let mut weapon = WeaponController::new();
        let mut state = SystemState {
            ammo_loaded: true,
            ..Default::default()
        };
        weapon.on_state_changed(&state);
        // Run the load to completion.
        for _ in 0..4 {
            weapon.on_actuator_position_reached();
        }
        assert_eq!(weapon.ammo_state(), AmmoState::Loaded);

        state.ammo_loaded = false;
        weapon.on_state_changed(&state);
        assert_eq!(weapon.ammo_state(), AmmoState::UnloadCharge1Forward);
        let mut last = Vec::new();
        for _ in 0..5 {
            last = weapon.on_actuator_position_reached();
        }
        assert_eq!(weapon.ammo_state(), AmmoState::Cleared);
        assert!(last.is_empty());
    }

    #[test]
    fn fire_mode_change_maps_to_solenoid_code() {
        let mut weapon = WeaponController::new();
        let mut state = SystemState::default();
        weapon.on_state_changed(&state);

        state.fire_mode = FireMode::LongBurst;
        let actions = weapon.on_state_changed(&state);
        assert!(actions.contains(&StationAction::Plc42(Plc42Command::SetSolenoidMode(3))));
    }

    fn model_with(state: SystemState) -> SystemStateModel {
        let mut model = SystemStateModel::new();
        model.update(state);
        model
    }

    #[test]
    fn firing_requires_engagement_and_safety() {
        let weapon = WeaponController::new();

        let mut ready = model_with(armed_engaged_state());
        assert_eq!(
            weapon.start_firing(&mut ready),
            vec![StationAction::Plc42(Plc42Command::SetSolenoidState(1))]
        );

        let mut state = armed_engaged_state();
        state.deadman_switch_active = false;
        assert!(weapon.start_firing(&mut model_with(state)).is_empty());

        let mut state = armed_engaged_state();
        state.is_reticle_in_no_fire_zone = true;
        assert!(weapon.start_firing(&mut model_with(state)).is_empty());

        let mut state = armed_engaged_state();
        state.op_mode = OperationalMode::Surveillance;
        assert!(weapon.start_firing(&mut model_with(state)).is_empty());
    }

    #[test]
    fn firing_holds_the_tracking_phase() {
        let weapon = WeaponController::new();
        let mut state = armed_engaged_state();
        state.tracking_phase = rampart_types::TrackingPhase::ActiveLock;
        state.tracker_has_valid_target = true;
        let mut model = model_with(state);

        weapon.start_firing(&mut model);
        assert_eq!(
            model.data().tracking_phase,
            rampart_types::TrackingPhase::Firing
        );
        weapon.stop_firing(&mut model);
        assert_eq!(
            model.data().tracking_phase,
            rampart_types::TrackingPhase::ActiveLock
        );
    }

    #[test]
    fn lead_offsets_clear_once_when_lac_turns_off() {
        let mut weapon = WeaponController::new();
        let mut model = SystemStateModel::new();
        model.set_lead_angle_compensation_active(true);
        // Give the ballistics something to chew on.
        let mut state = model.snapshot();
        state.lrf_distance_m = 1200.0;
        state.target_angular_rate_az_dps = 3.0;
        model.update(state);
        weapon.update_fire_control(&mut model);
        assert!(model.data().lead_angle_offset_az_deg > 0.0);

        model.set_lead_angle_compensation_active(false);
        weapon.update_fire_control(&mut model);
        assert_eq!(model.data().lead_angle_offset_az_deg, 0.0);
        assert_eq!(model.data().lead_angle_status, LeadAngleStatus::Off);
    }
}
